//! Shared xattr block refcounting.
//!
//! Extended attribute *content* (namespaces, value storage, inode-body vs.
//! block placement) is out of scope here — it belongs to the external file
//! layer. The one piece that can't live there is this: an inode's
//! `file_acl` can point at a block shared by several inodes (ext4 dedups
//! identical attribute sets), so deleting an inode has to decrement that
//! block's `h_refcount` and free the block once nobody references it, or
//! every deletion on a filesystem with shared xattr blocks leaks one.

use crate::{
    block::{Block, BlockDev, BlockDevice},
    consts::EXT4_XATTR_MAGIC,
    error::{Error, ErrorKind, Result},
    superblock::Superblock,
    types::ext4_xattr_header,
};

fn read_header(block_data: &[u8]) -> Result<ext4_xattr_header> {
    if block_data.len() < core::mem::size_of::<ext4_xattr_header>() {
        return Err(Error::new(ErrorKind::Corrupted, "xattr block too short for header"));
    }

    let header = unsafe { core::ptr::read_unaligned(block_data.as_ptr() as *const ext4_xattr_header) };

    if u32::from_le(header.h_magic) != EXT4_XATTR_MAGIC {
        return Err(Error::new(ErrorKind::Corrupted, "invalid xattr block magic"));
    }

    Ok(header)
}

fn write_refcount(block_data: &mut [u8], refcount: u32) {
    block_data[4..8].copy_from_slice(&refcount.to_le_bytes());
}

/// Drops this inode's reference to its shared xattr block (`file_acl`),
/// freeing the block once the refcount reaches zero. A no-op when
/// `file_acl` is 0 (the inode carries no block-stored attributes).
///
/// Mirrors lwext4's `ext4_fs_put_inode_ref`/xattr-block teardown: called
/// once from the inode-free path, never from anywhere that reads or
/// writes attribute values.
pub fn release_block_ref<D: BlockDevice>(
    bdev: &mut BlockDev<D>,
    sb: &mut Superblock,
    file_acl: u64,
) -> Result<()> {
    if file_acl == 0 {
        return Ok(());
    }

    let refcount_after = {
        let mut block = Block::get(bdev, file_acl)?;
        let mut result = 0u32;
        block.with_data_mut(|data| {
            let header = read_header(data)?;
            let current = u32::from_le(header.h_refcount);
            if current == 0 {
                return Err(Error::new(ErrorKind::Corrupted, "xattr block refcount already zero"));
            }
            result = current - 1;
            write_refcount(data, result);
            Ok::<_, Error>(())
        })??;
        result
    };

    if refcount_after == 0 {
        crate::balloc::free_block(bdev, sb, file_acl)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as CrateResult;
    use alloc::vec;
    use alloc::vec::Vec;

    struct MockDevice {
        block_size: u32,
        sector_size: u32,
        total_blocks: u64,
        storage: Vec<u8>,
    }

    impl MockDevice {
        fn new() -> Self {
            let block_size = 1024;
            let sector_size = 512;
            let total_blocks = 64;
            let storage = vec![0u8; (total_blocks * block_size as u64) as usize];
            Self { block_size, sector_size, total_blocks, storage }
        }
    }

    impl BlockDevice for MockDevice {
        fn block_size(&self) -> u32 {
            self.block_size
        }
        fn sector_size(&self) -> u32 {
            self.sector_size
        }
        fn total_blocks(&self) -> u64 {
            self.total_blocks
        }
        fn read_blocks(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> CrateResult<usize> {
            let start = (lba * self.sector_size as u64) as usize;
            let len = (count * self.sector_size) as usize;
            buf[..len].copy_from_slice(&self.storage[start..start + len]);
            Ok(len)
        }
        fn write_blocks(&mut self, lba: u64, count: u32, buf: &[u8]) -> CrateResult<usize> {
            let start = (lba * self.sector_size as u64) as usize;
            let len = (count * self.sector_size) as usize;
            self.storage[start..start + len].copy_from_slice(&buf[..len]);
            Ok(len)
        }
    }

    fn seed_xattr_block(dev: &mut BlockDev<MockDevice>, block: u64, refcount: u32) {
        let mut data = vec![0u8; 1024];
        data[0..4].copy_from_slice(&EXT4_XATTR_MAGIC.to_le_bytes());
        data[4..8].copy_from_slice(&refcount.to_le_bytes());
        data[8..12].copy_from_slice(&1u32.to_le_bytes());
        dev.write_bytes(block * 1024, &data).unwrap();
    }

    #[test]
    fn zero_file_acl_is_a_no_op() {
        let device = MockDevice::new();
        let mut bdev = BlockDev::new(device).unwrap();
        let mut sb = Superblock::new(crate::types::ext4_sblock::default());

        assert!(release_block_ref(&mut bdev, &mut sb, 0).is_ok());
    }

    #[test]
    fn decrements_without_freeing_while_shared() {
        let device = MockDevice::new();
        let mut bdev = BlockDev::new(device).unwrap();
        let mut sb_inner = crate::types::ext4_sblock::default();
        sb_inner.log_block_size = 0u32.to_le();
        sb_inner.blocks_count_lo = 64u32.to_le();
        sb_inner.blocks_per_group = 64u32.to_le();
        sb_inner.first_data_block = 1u32.to_le();
        let mut sb = Superblock::new(sb_inner);

        seed_xattr_block(&mut bdev, 10, 2);

        release_block_ref(&mut bdev, &mut sb, 10).unwrap();

        let mut buf = vec![0u8; 1024];
        bdev.read_bytes(10 * 1024, &mut buf).unwrap();
        let header = read_header(&buf).unwrap();
        assert_eq!(u32::from_le(header.h_refcount), 1);
    }
}
