//! Block group descriptor mutation and write-back.

use crate::{
    block::{BlockDev, BlockDevice},
    consts::*,
    error::Result,
    superblock::Superblock,
    types::ext4_group_desc,
};

use super::{get_block_group_desc_location, BlockGroup};

/// Writes group `group_num`'s descriptor to the GDT.
pub fn write_block_group_desc<D: BlockDevice>(
    bdev: &mut BlockDev<D>,
    sb: &Superblock,
    group_num: u32,
    desc: &ext4_group_desc,
) -> Result<()> {
    let block_size = sb.block_size() as u64;

    let (gdt_block, desc_offset_in_block) = get_block_group_desc_location(sb, group_num);
    let desc_offset = gdt_block * block_size + desc_offset_in_block;

    let desc_bytes = unsafe {
        core::slice::from_raw_parts(
            desc as *const ext4_group_desc as *const u8,
            core::mem::size_of::<ext4_group_desc>(),
        )
    };

    bdev.write_bytes(desc_offset, desc_bytes)?;

    Ok(())
}

impl BlockGroup {
    pub(crate) fn inner_mut(&mut self) -> &mut ext4_group_desc {
        &mut self.inner
    }

    pub fn set_block_bitmap(&mut self, sb: &Superblock, block: u64) {
        self.inner.block_bitmap_lo = (block as u32).to_le();

        if sb.group_desc_size() > EXT4_MIN_BLOCK_GROUP_DESCRIPTOR_SIZE {
            self.inner.block_bitmap_hi = ((block >> 32) as u32).to_le();
        }
    }

    pub fn set_inode_bitmap(&mut self, sb: &Superblock, block: u64) {
        self.inner.inode_bitmap_lo = (block as u32).to_le();

        if sb.group_desc_size() > EXT4_MIN_BLOCK_GROUP_DESCRIPTOR_SIZE {
            self.inner.inode_bitmap_hi = ((block >> 32) as u32).to_le();
        }
    }

    pub fn set_inode_table_first_block(&mut self, sb: &Superblock, block: u64) {
        self.inner.inode_table_lo = (block as u32).to_le();

        if sb.group_desc_size() > EXT4_MIN_BLOCK_GROUP_DESCRIPTOR_SIZE {
            self.inner.inode_table_hi = ((block >> 32) as u32).to_le();
        }
    }

    pub fn set_free_blocks_count(&mut self, sb: &Superblock, count: u32) {
        self.inner.free_blocks_count_lo = (count as u16).to_le();

        if sb.group_desc_size() > EXT4_MIN_BLOCK_GROUP_DESCRIPTOR_SIZE {
            self.inner.free_blocks_count_hi = ((count >> 16) as u16).to_le();
        }
    }

    pub fn set_free_inodes_count(&mut self, sb: &Superblock, count: u32) {
        self.inner.free_inodes_count_lo = (count as u16).to_le();

        if sb.group_desc_size() > EXT4_MIN_BLOCK_GROUP_DESCRIPTOR_SIZE {
            self.inner.free_inodes_count_hi = ((count >> 16) as u16).to_le();
        }
    }

    pub fn set_used_dirs_count(&mut self, sb: &Superblock, count: u32) {
        self.inner.used_dirs_count_lo = (count as u16).to_le();

        if sb.group_desc_size() > EXT4_MIN_BLOCK_GROUP_DESCRIPTOR_SIZE {
            self.inner.used_dirs_count_hi = ((count >> 16) as u16).to_le();
        }
    }

    pub fn set_itable_unused(&mut self, sb: &Superblock, count: u32) {
        self.inner.itable_unused_lo = (count as u16).to_le();

        if sb.group_desc_size() > EXT4_MIN_BLOCK_GROUP_DESCRIPTOR_SIZE {
            self.inner.itable_unused_hi = ((count >> 16) as u16).to_le();
        }
    }

    /// Stores a precomputed `bg_checksum`. Prefer [`Self::update_checksum`]
    /// unless the value genuinely comes from elsewhere (e.g. a descriptor
    /// read verbatim off disk).
    pub fn set_checksum(&mut self, checksum: u16) {
        self.inner.checksum = checksum.to_le();
    }

    /// Recomputes and stores `bg_checksum` from the descriptor's current
    /// contents, a no-op when neither checksum feature is enabled.
    pub fn update_checksum(&mut self, sb: &Superblock) {
        super::checksum::set_checksum(sb, self.group_num, &mut self.inner);
    }

    pub fn set_flag(&mut self, flag: u16) {
        let mut flags = u16::from_le(self.inner.flags);
        flags |= flag;
        self.inner.flags = flags.to_le();
    }

    pub fn clear_flag(&mut self, flag: u16) {
        let mut flags = u16::from_le(self.inner.flags);
        flags &= !flag;
        self.inner.flags = flags.to_le();
    }

    /// Writes this descriptor back to the GDT, after refreshing its
    /// checksum.
    pub fn write<D: BlockDevice>(&mut self, bdev: &mut BlockDev<D>, sb: &Superblock) -> Result<()> {
        self.update_checksum(sb);
        write_block_group_desc(bdev, sb, self.group_num, &self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::{EXT4_FEATURE_INCOMPAT_64BIT, EXT4_GROUP_DESC_SIZE_64};
    use crate::types::ext4_sblock;

    #[test]
    fn setters_round_trip_through_getters() {
        let desc = ext4_group_desc::default();
        let mut bg = BlockGroup { inner: desc, group_num: 0 };

        let mut sb_inner = ext4_sblock::default();
        sb_inner.desc_size = (EXT4_MIN_BLOCK_GROUP_DESCRIPTOR_SIZE as u16).to_le();
        let sb = Superblock::new(sb_inner);

        bg.set_block_bitmap(&sb, 12345);
        assert_eq!(bg.get_block_bitmap(&sb), 12345);

        bg.set_inode_bitmap(&sb, 23456);
        assert_eq!(bg.get_inode_bitmap(&sb), 23456);

        bg.set_inode_table_first_block(&sb, 34567);
        assert_eq!(bg.get_inode_table_first_block(&sb), 34567);

        bg.set_free_blocks_count(&sb, 5000);
        assert_eq!(bg.get_free_blocks_count(&sb), 5000);

        bg.set_free_inodes_count(&sb, 6000);
        assert_eq!(bg.get_free_inodes_count(&sb), 6000);

        bg.set_used_dirs_count(&sb, 100);
        assert_eq!(bg.get_used_dirs_count(&sb), 100);

        bg.set_itable_unused(&sb, 500);
        assert_eq!(bg.get_itable_unused(&sb), 500);
    }

    #[test]
    fn flag_set_and_clear_are_independent() {
        let desc = ext4_group_desc::default();
        let mut bg = BlockGroup { inner: desc, group_num: 0 };

        bg.set_flag(0x0001);
        assert!(bg.has_flag(0x0001));

        bg.set_flag(0x0004);
        assert!(bg.has_flag(0x0004));
        assert!(bg.has_flag(0x0001));

        bg.clear_flag(0x0001);
        assert!(!bg.has_flag(0x0001));
        assert!(bg.has_flag(0x0004));
    }

    #[test]
    fn explicit_checksum_is_stored_verbatim() {
        let desc = ext4_group_desc::default();
        let mut bg = BlockGroup { inner: desc, group_num: 0 };

        bg.set_checksum(0x1234);
        assert_eq!(u16::from_le(bg.inner.checksum), 0x1234);
    }

    #[test]
    fn update_checksum_round_trips_under_metadata_csum() {
        let mut sb_inner = ext4_sblock::default();
        sb_inner.feature_ro_compat =
            crate::consts::EXT4_FEATURE_RO_COMPAT_METADATA_CSUM.to_le();
        sb_inner.desc_size = (EXT4_MIN_BLOCK_GROUP_DESCRIPTOR_SIZE as u16).to_le();
        let sb = Superblock::new(sb_inner);

        let desc = ext4_group_desc::default();
        let mut bg = BlockGroup { inner: desc, group_num: 3 };
        bg.set_free_blocks_count(&sb, 42);

        bg.update_checksum(&sb);
        assert!(bg.verify_checksum(&sb));
    }

    #[test]
    fn supports_64bit_descriptor_fields() {
        let desc = ext4_group_desc::default();
        let mut bg = BlockGroup { inner: desc, group_num: 0 };

        let mut sb_inner = ext4_sblock::default();
        sb_inner.feature_incompat = EXT4_FEATURE_INCOMPAT_64BIT.to_le();
        sb_inner.desc_size = (EXT4_GROUP_DESC_SIZE_64 as u16).to_le();
        let sb = Superblock::new(sb_inner);

        let large_block = 0x1_0000_1234u64;
        bg.set_block_bitmap(&sb, large_block);
        assert_eq!(bg.get_block_bitmap(&sb), large_block);

        let large_inode_bitmap = 0x2_0000_5678u64;
        bg.set_inode_bitmap(&sb, large_inode_bitmap);
        assert_eq!(bg.get_inode_bitmap(&sb), large_inode_bitmap);
    }
}
