//! Superblock mutation and write-back.

use crate::{
    block::{BlockDev, BlockDevice},
    consts::*,
    error::Result,
    types::ext4_sblock,
};
use alloc::vec;

/// Writes only the primary superblock (offset 1024), after refreshing its
/// checksum.
pub fn write_superblock<D: BlockDevice>(bdev: &mut BlockDev<D>, sb: &mut ext4_sblock) -> Result<()> {
    super::checksum::set_checksum(sb);

    let sb_bytes = unsafe {
        core::slice::from_raw_parts(
            sb as *const ext4_sblock as *const u8,
            core::mem::size_of::<ext4_sblock>(),
        )
    };

    bdev.write_bytes(EXT4_SUPERBLOCK_OFFSET, sb_bytes)?;

    Ok(())
}

/// Writes the primary superblock plus every backup copy the `SPARSE_SUPER`
/// placement rule calls for, so the filesystem survives a corrupted primary
/// copy.
pub fn write_superblock_with_backups<D: BlockDevice>(bdev: &mut BlockDev<D>, sb: &mut ext4_sblock) -> Result<()> {
    super::checksum::set_checksum(sb);

    let sb_bytes = unsafe {
        core::slice::from_raw_parts(
            sb as *const ext4_sblock as *const u8,
            core::mem::size_of::<ext4_sblock>(),
        )
    };

    bdev.write_bytes(EXT4_SUPERBLOCK_OFFSET, sb_bytes)?;

    let sb_wrapper = super::Superblock::new(*sb);
    let block_size = sb_wrapper.block_size() as u64;
    let block_group_count = sb_wrapper.block_group_count();

    for bgid in 0..block_group_count {
        if bgid == 0 {
            // Already written as the primary copy above.
            continue;
        }

        if sb_wrapper.has_super_in_bg(bgid) {
            let bg_start_block = sb_wrapper.first_data_block() as u64
                + (bgid as u64) * sb_wrapper.blocks_per_group() as u64;

            let sb_offset = bg_start_block * block_size;

            bdev.write_bytes(sb_offset, sb_bytes)?;
        }
    }

    Ok(())
}

impl super::Superblock {
    pub fn inner_mut(&mut self) -> &mut ext4_sblock {
        &mut self.inner
    }

    /// Writes only the primary superblock.
    pub fn write<D: BlockDevice>(&mut self, bdev: &mut BlockDev<D>) -> Result<()> {
        write_superblock(bdev, &mut self.inner)
    }

    /// Writes the primary superblock and every sparse-super backup.
    pub fn write_with_backups<D: BlockDevice>(&mut self, bdev: &mut BlockDev<D>) -> Result<()> {
        write_superblock_with_backups(bdev, &mut self.inner)
    }

    pub fn set_free_blocks_count(&mut self, count: u64) {
        self.inner.free_blocks_count_lo = count as u32;
        self.inner.free_blocks_count_hi = (count >> 32) as u32;
    }

    pub fn set_free_inodes_count(&mut self, count: u32) {
        self.inner.free_inodes_count = count;
    }

    pub fn add_free_blocks(&mut self, delta: u64) {
        let current = self.free_blocks_count();
        self.set_free_blocks_count(current + delta);
    }

    pub fn sub_free_blocks(&mut self, delta: u64) {
        let current = self.free_blocks_count();
        self.set_free_blocks_count(current.saturating_sub(delta));
    }

    pub fn add_free_inodes(&mut self, delta: u32) {
        let current = self.free_inodes_count();
        self.set_free_inodes_count(current + delta);
    }

    pub fn sub_free_inodes(&mut self, delta: u32) {
        let current = self.free_inodes_count();
        self.set_free_inodes_count(current.saturating_sub(delta));
    }

    pub fn inc_mount_count(&mut self) {
        self.inner.mnt_count = self.inner.mnt_count.saturating_add(1);
    }

    /// Adds `kb` kilobytes to the lifetime-written counter. Fed by the
    /// buffer cache's write-back path, which already counts bytes flushed.
    pub fn add_kbytes_written(&mut self, kb: u64) {
        let current = self.kbytes_written();
        self.inner.set_kbytes_written(current + kb);
    }

    pub fn update_mount_time(&mut self) {
        self.inner.mtime = current_timestamp();
    }

    pub fn update_write_time(&mut self) {
        self.inner.wtime = current_timestamp();
    }

    pub fn update_check_time(&mut self) {
        self.inner.lastcheck = current_timestamp();
    }

    pub fn set_state(&mut self, state: u16) {
        self.inner.state = state;
    }

    pub fn mark_clean(&mut self) {
        self.set_state(EXT4_SUPER_STATE_VALID);
    }

    pub fn mark_error(&mut self) {
        self.set_state(EXT4_SUPER_STATE_ERROR);
    }

    pub fn update_checksum(&mut self) {
        super::checksum::set_checksum(&mut self.inner);
    }

    pub fn set_checksum(&mut self) {
        self.update_checksum();
    }
}

/// Timestamp source for superblock mount/write/check times. `no_std` has no
/// clock of its own, so this returns 0 until a caller wires one in (e.g. by
/// calling [`super::Superblock::update_mount_time`] only after stamping
/// `mtime` itself from a host-provided clock).
fn current_timestamp() -> u32 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockDevice, BlockDev};
    use crate::error::Result;
    use crate::superblock::Superblock;

    struct MockDevice {
        block_size: u32,
        sector_size: u32,
        total_blocks: u64,
        storage: alloc::vec::Vec<u8>,
    }

    impl MockDevice {
        fn new() -> Self {
            let block_size = 4096;
            let sector_size = 512;
            let total_blocks = 1000;
            let storage = alloc::vec![0u8; (total_blocks * block_size as u64) as usize];
            Self {
                block_size,
                sector_size,
                total_blocks,
                storage,
            }
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

        fn read_blocks(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize> {
            let start = (lba * self.sector_size as u64) as usize;
            let len = (count * self.sector_size) as usize;
            buf[..len].copy_from_slice(&self.storage[start..start + len]);
            Ok(len)
        }

        fn write_blocks(&mut self, lba: u64, count: u32, buf: &[u8]) -> Result<usize> {
            let start = (lba * self.sector_size as u64) as usize;
            let len = (count * self.sector_size) as usize;
            self.storage[start..start + len].copy_from_slice(&buf[..len]);
            Ok(len)
        }
    }

    #[test]
    fn free_counters_and_write_round_trip() {
        let device = MockDevice::new();
        let mut block_dev = BlockDev::new(device).unwrap();

        let mut sb = ext4_sblock::default();
        sb.magic = EXT4_SUPERBLOCK_MAGIC;
        sb.free_blocks_count_lo = 1000;
        sb.free_blocks_count_hi = 0;
        sb.free_inodes_count = 500;

        let mut superblock = Superblock { inner: sb };

        assert_eq!(superblock.free_blocks_count(), 1000);
        superblock.add_free_blocks(100);
        assert_eq!(superblock.free_blocks_count(), 1100);
        superblock.sub_free_blocks(50);
        assert_eq!(superblock.free_blocks_count(), 1050);

        assert_eq!(superblock.free_inodes_count(), 500);
        superblock.add_free_inodes(50);
        assert_eq!(superblock.free_inodes_count(), 550);
        superblock.sub_free_inodes(100);
        assert_eq!(superblock.free_inodes_count(), 450);

        superblock.write(&mut block_dev).unwrap();
    }

    #[test]
    fn state_transitions() {
        let mut superblock = Superblock {
            inner: ext4_sblock::default(),
        };

        superblock.mark_clean();
        assert_eq!(superblock.inner().state, EXT4_SUPER_STATE_VALID);

        superblock.mark_error();
        assert_eq!(superblock.inner().state, EXT4_SUPER_STATE_ERROR);
    }

    #[test]
    fn kbytes_written_accumulates() {
        let mut superblock = Superblock { inner: ext4_sblock::default() };
        assert_eq!(superblock.kbytes_written(), 0);
        superblock.add_kbytes_written(64);
        superblock.add_kbytes_written(36);
        assert_eq!(superblock.kbytes_written(), 100);
    }
}
