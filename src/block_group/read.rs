//! Block group descriptor reading and accessors.

use crate::{
    block::{BlockDev, BlockDevice},
    consts::*,
    error::Result,
    superblock::Superblock,
    types::ext4_group_desc,
};
use alloc::vec;

/// Locates group `group_num`'s descriptor: `(block, byte offset within that
/// block)`. Shared by every reader/writer that needs a descriptor's
/// position, so `META_BG` support lives in exactly one place.
///
/// Outside `META_BG`, every group's descriptor sits back-to-back starting
/// right after the superblock. Under `META_BG`, a metagroup's descriptors
/// live inside the metagroup itself: the first, second, and last group of
/// each metagroup each carry one block of the table.
pub fn get_block_group_desc_location(sb: &Superblock, group_num: u32) -> (u64, u64) {
    let block_size = sb.block_size() as u64;
    let desc_size = sb.group_desc_size() as u64;
    let first_data_block = sb.first_data_block() as u64;

    let desc_per_block = block_size / desc_size;

    let has_meta_bg = sb.has_incompat_feature(EXT4_FEATURE_INCOMPAT_META_BG);
    let first_meta_bg = u32::from_le(sb.inner().first_meta_bg);

    let gdt_block: u64;
    let desc_offset_in_block: u64;

    if has_meta_bg {
        let metagroup = (group_num as u64) / desc_per_block;

        if metagroup < first_meta_bg as u64 {
            gdt_block = first_data_block + 1;
            desc_offset_in_block = (group_num as u64) * desc_size;
        } else {
            let first_group_in_metagroup = metagroup * desc_per_block;
            let group_offset_in_metagroup = (group_num as u64) - first_group_in_metagroup;

            let metagroup_start_block = first_group_in_metagroup * sb.blocks_per_group() as u64;

            let gdt_offset_blocks = if group_offset_in_metagroup == 0 {
                1
            } else if group_offset_in_metagroup == 1 {
                sb.blocks_per_group() as u64 + 1
            } else if group_offset_in_metagroup == desc_per_block - 1 {
                (desc_per_block - 1) * sb.blocks_per_group() as u64 + 1
            } else {
                1
            };

            gdt_block = metagroup_start_block + gdt_offset_blocks;
            desc_offset_in_block = group_offset_in_metagroup * desc_size;
        }
    } else {
        gdt_block = first_data_block + 1 + ((group_num as u64) * desc_size) / block_size;
        desc_offset_in_block = ((group_num as u64) * desc_size) % block_size;
    }

    (gdt_block, desc_offset_in_block)
}

/// Reads group `group_num`'s descriptor from the GDT.
pub fn read_block_group_desc<D: BlockDevice>(
    bdev: &mut BlockDev<D>,
    sb: &Superblock,
    group_num: u32,
) -> Result<ext4_group_desc> {
    let block_size = sb.block_size() as u64;

    let (gdt_block, desc_offset_in_block) = get_block_group_desc_location(sb, group_num);
    let desc_offset = gdt_block * block_size + desc_offset_in_block;

    let mut desc_buf = vec![0u8; core::mem::size_of::<ext4_group_desc>()];
    bdev.read_bytes(desc_offset, &mut desc_buf)?;

    let desc = unsafe { core::ptr::read_unaligned(desc_buf.as_ptr() as *const ext4_group_desc) };

    Ok(desc)
}

/// Typed view over one group descriptor, with 32/64-bit-field merging
/// handled in the getters so callers never have to check
/// [`Superblock::group_desc_size`] themselves.
pub struct BlockGroup {
    pub(super) inner: ext4_group_desc,
    pub(super) group_num: u32,
}

impl BlockGroup {
    /// Loads group `group_num`'s descriptor from `bdev`.
    pub fn load<D: BlockDevice>(bdev: &mut BlockDev<D>, sb: &Superblock, group_num: u32) -> Result<Self> {
        let inner = read_block_group_desc(bdev, sb, group_num)?;
        Ok(Self { inner, group_num })
    }

    pub fn group_num(&self) -> u32 {
        self.group_num
    }

    pub fn inner(&self) -> &ext4_group_desc {
        &self.inner
    }

    pub fn get_block_bitmap(&self, sb: &Superblock) -> u64 {
        let mut v = u32::from_le(self.inner.block_bitmap_lo) as u64;

        if sb.group_desc_size() > EXT4_MIN_BLOCK_GROUP_DESCRIPTOR_SIZE {
            v |= (u32::from_le(self.inner.block_bitmap_hi) as u64) << 32;
        }

        v
    }

    pub fn get_inode_bitmap(&self, sb: &Superblock) -> u64 {
        let mut v = u32::from_le(self.inner.inode_bitmap_lo) as u64;

        if sb.group_desc_size() > EXT4_MIN_BLOCK_GROUP_DESCRIPTOR_SIZE {
            v |= (u32::from_le(self.inner.inode_bitmap_hi) as u64) << 32;
        }

        v
    }

    pub fn get_inode_table_first_block(&self, sb: &Superblock) -> u64 {
        let mut v = u32::from_le(self.inner.inode_table_lo) as u64;

        if sb.group_desc_size() > EXT4_MIN_BLOCK_GROUP_DESCRIPTOR_SIZE {
            v |= (u32::from_le(self.inner.inode_table_hi) as u64) << 32;
        }

        v
    }

    pub fn get_free_blocks_count(&self, sb: &Superblock) -> u32 {
        let mut v = u16::from_le(self.inner.free_blocks_count_lo) as u32;

        if sb.group_desc_size() > EXT4_MIN_BLOCK_GROUP_DESCRIPTOR_SIZE {
            v |= (u16::from_le(self.inner.free_blocks_count_hi) as u32) << 16;
        }

        v
    }

    pub fn get_free_inodes_count(&self, sb: &Superblock) -> u32 {
        let mut v = u16::from_le(self.inner.free_inodes_count_lo) as u32;

        if sb.group_desc_size() > EXT4_MIN_BLOCK_GROUP_DESCRIPTOR_SIZE {
            v |= (u16::from_le(self.inner.free_inodes_count_hi) as u32) << 16;
        }

        v
    }

    pub fn get_used_dirs_count(&self, sb: &Superblock) -> u32 {
        let mut v = u16::from_le(self.inner.used_dirs_count_lo) as u32;

        if sb.group_desc_size() > EXT4_MIN_BLOCK_GROUP_DESCRIPTOR_SIZE {
            v |= (u16::from_le(self.inner.used_dirs_count_hi) as u32) << 16;
        }

        v
    }

    pub fn get_itable_unused(&self, sb: &Superblock) -> u32 {
        let mut v = u16::from_le(self.inner.itable_unused_lo) as u32;

        if sb.group_desc_size() > EXT4_MIN_BLOCK_GROUP_DESCRIPTOR_SIZE {
            v |= (u16::from_le(self.inner.itable_unused_hi) as u32) << 16;
        }

        v
    }

    pub fn has_flag(&self, flag: u16) -> bool {
        (u16::from_le(self.inner.flags) & flag) != 0
    }

    /// Checks this descriptor's own checksum (`bg_checksum`), separate from
    /// the block/inode bitmap checksums stored alongside it.
    pub fn verify_checksum(&self, sb: &Superblock) -> bool {
        super::checksum::verify_checksum(sb, self.group_num, &self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn getters_merge_hi_lo_halves() {
        let mut desc = ext4_group_desc::default();

        desc.block_bitmap_lo = 100u32.to_le();
        desc.inode_bitmap_lo = 200u32.to_le();
        desc.inode_table_lo = 300u32.to_le();
        desc.free_blocks_count_lo = 1000u16.to_le();
        desc.free_inodes_count_lo = 2000u16.to_le();
        desc.used_dirs_count_lo = 50u16.to_le();
        desc.itable_unused_lo = 500u16.to_le();

        let bg = BlockGroup { inner: desc, group_num: 0 };

        let mut sb_inner = crate::types::ext4_sblock::default();
        sb_inner.desc_size = (EXT4_MIN_BLOCK_GROUP_DESCRIPTOR_SIZE as u16).to_le();
        let sb = Superblock::new(sb_inner);

        assert_eq!(bg.get_block_bitmap(&sb), 100);
        assert_eq!(bg.get_inode_bitmap(&sb), 200);
        assert_eq!(bg.get_inode_table_first_block(&sb), 300);
        assert_eq!(bg.get_free_blocks_count(&sb), 1000);
        assert_eq!(bg.get_free_inodes_count(&sb), 2000);
        assert_eq!(bg.get_used_dirs_count(&sb), 50);
        assert_eq!(bg.get_itable_unused(&sb), 500);
    }

    #[test]
    fn flags_are_bitwise() {
        let mut desc = ext4_group_desc::default();
        desc.flags = 0x0005u16.to_le();

        let bg = BlockGroup { inner: desc, group_num: 0 };

        assert!(bg.has_flag(0x0001));
        assert!(!bg.has_flag(0x0002));
        assert!(bg.has_flag(0x0004));
        assert!(!bg.has_flag(0x0008));
    }
}
