//! Core block device types.

use crate::error::{Error, ErrorKind, Result};
use alloc::vec;

/// Interface a caller implements to expose raw block storage.
///
/// # Example
///
/// ```rust,ignore
/// use lwext4_core::{BlockDevice, Result};
///
/// struct MyDevice { /* ... */ }
///
/// impl BlockDevice for MyDevice {
///     fn block_size(&self) -> u32 { 4096 }
///     fn sector_size(&self) -> u32 { 512 }
///     fn total_blocks(&self) -> u64 { 1_000_000 }
///     fn read_blocks(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize> {
///         Ok(count as usize * self.sector_size() as usize)
///     }
///     fn write_blocks(&mut self, lba: u64, count: u32, buf: &[u8]) -> Result<usize> {
///         Ok(count as usize * self.sector_size() as usize)
///     }
/// }
/// ```
pub trait BlockDevice {
    /// Logical block size, typically 4096.
    fn block_size(&self) -> u32;

    /// Physical sector size, typically 512.
    fn sector_size(&self) -> u32;

    /// Total number of logical blocks.
    fn total_blocks(&self) -> u64;

    /// Reads `count` sectors starting at physical sector `lba` into `buf`
    /// (at least `count * sector_size` bytes). Returns bytes read.
    fn read_blocks(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize>;

    /// Writes `count` sectors starting at physical sector `lba` from `buf`.
    /// Returns bytes written.
    fn write_blocks(&mut self, lba: u64, count: u32, buf: &[u8]) -> Result<usize>;

    /// Flushes any device-level write cache (e.g. `fsync`).
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        false
    }

    /// Called before the device is first used.
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called once the device is no longer needed.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Wraps a [`BlockDevice`] with partitioning, an optional block cache, and
/// access counters.
///
/// `BlockDev` carries no internal lock; single-threaded callers use it
/// directly, multi-threaded callers pair it with a [`super::DeviceLock`]
/// (e.g. `Arc<Mutex<BlockDev<D>>>`).
pub struct BlockDev<D> {
    pub(super) device: D,
    partition_offset: u64,
    partition_size: u64,
    /// Logical reads, including cache hits.
    read_count: u64,
    /// Logical writes, including writes that only touch the cache.
    write_count: u64,
    /// Reads that actually reached the device.
    physical_read_count: u64,
    /// Writes that actually reached the device.
    physical_write_count: u64,
    ref_count: u32,
    pub(super) bcache: Option<crate::cache::BlockCache>,
}

impl<D: BlockDevice> BlockDev<D> {
    /// Wraps `device` with no cache.
    pub fn new(device: D) -> Result<Self> {
        let block_size = device.block_size();
        let sector_size = device.sector_size();

        if block_size % sector_size != 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "block size must be a multiple of sector size"));
        }

        let total_blocks = device.total_blocks();
        let partition_size = total_blocks * block_size as u64;

        Ok(Self {
            device,
            partition_offset: 0,
            partition_size,
            read_count: 0,
            write_count: 0,
            physical_read_count: 0,
            physical_write_count: 0,
            ref_count: 0,
            bcache: None,
        })
    }

    /// Wraps `device` with a cache of `cache_blocks` entries.
    pub fn new_with_cache(device: D, cache_blocks: usize) -> Result<Self> {
        let mut bd = Self::new(device)?;
        let block_size = bd.block_size() as usize;
        bd.bcache = Some(crate::cache::BlockCache::new(cache_blocks, block_size));
        Ok(bd)
    }

    /// Wraps `device` with [`crate::cache::DEFAULT_CACHE_SIZE`] blocks of
    /// cache.
    pub fn with_default_cache(device: D) -> Result<Self> {
        Self::new_with_cache(device, crate::cache::DEFAULT_CACHE_SIZE)
    }

    /// Wraps `device` restricted to the partition at `[offset, offset+size)`.
    pub fn new_partition(device: D, offset: u64, size: u64) -> Result<Self> {
        let mut bd = Self::new(device)?;
        bd.set_partition(offset, size);
        Ok(bd)
    }

    /// Combination of [`Self::new_partition`] and [`Self::new_with_cache`].
    pub fn new_partition_with_cache(device: D, offset: u64, size: u64, cache_blocks: usize) -> Result<Self> {
        let mut bd = Self::new_with_cache(device, cache_blocks)?;
        bd.set_partition(offset, size);
        Ok(bd)
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn block_size(&self) -> u32 {
        self.device.block_size()
    }

    pub fn sector_size(&self) -> u32 {
        self.device.sector_size()
    }

    pub fn total_blocks(&self) -> u64 {
        self.device.total_blocks()
    }

    pub fn read_count(&self) -> u64 {
        self.read_count
    }

    pub fn write_count(&self) -> u64 {
        self.write_count
    }

    pub fn physical_read_count(&self) -> u64 {
        self.physical_read_count
    }

    pub fn physical_write_count(&self) -> u64 {
        self.physical_write_count
    }

    /// Fraction of logical reads that were satisfied from the cache, in
    /// `[0.0, 1.0]`.
    pub fn cache_hit_rate(&self) -> f64 {
        if self.read_count == 0 {
            return 0.0;
        }
        let hits = self.read_count.saturating_sub(self.physical_read_count);
        hits as f64 / self.read_count as f64
    }

    pub fn set_partition(&mut self, offset: u64, size: u64) {
        self.partition_offset = offset;
        self.partition_size = size;
    }

    pub fn partition_offset(&self) -> u64 {
        self.partition_offset
    }

    pub fn partition_size(&self) -> u64 {
        self.partition_size
    }

    pub(super) fn logical_to_physical(&self, lba: u64) -> u64 {
        let block_size = self.device.block_size() as u64;
        let sector_size = self.device.sector_size() as u64;
        (lba * block_size + self.partition_offset) / sector_size
    }

    pub(super) fn sectors_per_block(&self) -> u32 {
        self.device.block_size() / self.device.sector_size()
    }

    pub(super) fn inc_read_count(&mut self) {
        self.read_count += 1;
    }

    pub(super) fn inc_write_count(&mut self) {
        self.write_count += 1;
    }

    pub(super) fn inc_physical_read_count(&mut self) {
        self.physical_read_count += 1;
    }

    pub(super) fn inc_physical_write_count(&mut self) {
        self.physical_write_count += 1;
    }

    /// Writes back a cached block, if present and dirty.
    pub fn flush_lba(&mut self, lba: u64) -> Result<()> {
        if let Some(cache) = &mut self.bcache {
            let sector_size = self.device.sector_size();
            let partition_offset = self.partition_offset;
            cache.flush_lba(lba, &mut self.device, sector_size, partition_offset)?;
        }
        Ok(())
    }

    /// Writes back at most `n` dirty cached blocks, to make room under
    /// cache pressure without flushing everything.
    pub fn flush_some_dirty_blocks(&mut self, n: usize) -> Result<usize> {
        if let Some(cache) = &mut self.bcache {
            let sector_size = self.device.sector_size();
            let partition_offset = self.partition_offset;
            return cache.flush_some(n, &mut self.device, sector_size, partition_offset);
        }
        Ok(0)
    }

    // ===== Direct access, bypassing the cache =====

    /// Reads blocks straight from the device. Used for metadata the caller
    /// doesn't want to pollute the cache with (superblock, descriptors).
    pub fn read_blocks_direct(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize> {
        let block_size = self.device.block_size();
        let required_size = count as usize * block_size as usize;

        if buf.len() < required_size {
            return Err(Error::new(ErrorKind::InvalidInput, "buffer too small for requested blocks"));
        }

        let pba = self.logical_to_physical(lba);
        let sectors_per_block = self.sectors_per_block();
        let sector_count = count * sectors_per_block;

        self.inc_read_count();
        self.inc_physical_read_count();
        self.device.read_blocks(pba, sector_count, buf)
    }

    pub fn write_blocks_direct(&mut self, lba: u64, count: u32, buf: &[u8]) -> Result<usize> {
        let block_size = self.device.block_size();
        let required_size = count as usize * block_size as usize;

        if buf.len() < required_size {
            return Err(Error::new(ErrorKind::InvalidInput, "buffer too small for requested blocks"));
        }

        let pba = self.logical_to_physical(lba);
        let sectors_per_block = self.sectors_per_block();
        let sector_count = count * sectors_per_block;

        self.inc_write_count();
        self.inc_physical_write_count();
        self.device.write_blocks(pba, sector_count, buf)
    }

    pub fn read_bytes_direct(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let len = buf.len();
        let block_size = self.device.block_size() as u64;

        let start_block = offset / block_size;
        let block_offset = (offset % block_size) as usize;

        let total_size = block_offset + len;
        let block_count = ((total_size as u64 + block_size - 1) / block_size) as u32;

        let mut temp = alloc::vec![0u8; block_count as usize * block_size as usize];

        self.read_blocks_direct(start_block, block_count, &mut temp)?;

        buf.copy_from_slice(&temp[block_offset..block_offset + len]);

        Ok(len)
    }

    pub fn write_bytes_direct(&mut self, offset: u64, buf: &[u8]) -> Result<usize> {
        let len = buf.len();
        let block_size = self.device.block_size() as u64;

        let start_block = offset / block_size;
        let block_offset = (offset % block_size) as usize;

        let total_size = block_offset + len;
        let block_count = ((total_size as u64 + block_size - 1) / block_size) as u32;

        let mut temp = alloc::vec![0u8; block_count as usize * block_size as usize];

        if block_offset != 0 || len % block_size as usize != 0 {
            // Unaligned write: pull in the surrounding data first. A read
            // failure here is fine for a block that's never been written.
            let _ = self.read_blocks_direct(start_block, block_count, &mut temp);
        }

        temp[block_offset..block_offset + len].copy_from_slice(buf);

        self.write_blocks_direct(start_block, block_count, &temp)?;

        Ok(len)
    }

    // ===== Cache administration =====

    pub fn cache_stats(&self) -> Option<crate::cache::CacheStats> {
        self.bcache.as_ref().map(|cache| cache.stats())
    }

    pub fn has_cache(&self) -> bool {
        self.bcache.is_some()
    }

    pub fn invalidate_cache_block(&mut self, lba: u64) -> Result<()> {
        if let Some(cache) = &mut self.bcache {
            cache.invalidate_buffer(lba)?;
        }
        Ok(())
    }

    pub fn invalidate_cache_range(&mut self, from: u64, count: u32) -> Result<usize> {
        if let Some(cache) = &mut self.bcache {
            return cache.invalidate_range(from, count);
        }
        Ok(0)
    }

    // ===== Write-back control =====

    /// Enables deferred write-back: modified blocks stay cached until
    /// explicitly flushed or evicted. Nests.
    ///
    /// ```rust,ignore
    /// block_dev.enable_write_back();
    /// block_dev.write_block(0, &data1)?;
    /// block_dev.write_block(1, &data2)?;
    /// block_dev.disable_write_back()?;
    /// ```
    pub fn enable_write_back(&mut self) {
        if let Some(cache) = &mut self.bcache {
            cache.enable_write_back();
        }
    }

    /// Disables one level of write-back; flushes everything dirty once the
    /// nesting count reaches zero.
    pub fn disable_write_back(&mut self) -> Result<usize> {
        if let Some(cache) = &mut self.bcache {
            let sector_size = self.device.sector_size();
            let partition_offset = self.partition_offset;
            return cache.disable_write_back(&mut self.device, sector_size, partition_offset);
        }
        Ok(0)
    }

    pub fn is_write_back_enabled(&self) -> bool {
        self.bcache.as_ref().map(|cache| cache.is_write_back_enabled()).unwrap_or(false)
    }

    pub fn write_back_counter(&self) -> u32 {
        self.bcache.as_ref().map(|cache| cache.write_back_counter()).unwrap_or(0)
    }

    pub fn open(&mut self) -> Result<()> {
        self.device.open()
    }

    /// Flushes everything, then closes the underlying device.
    pub fn close(&mut self) -> Result<()> {
        self.flush()?;
        self.device.close()
    }

    pub fn get(&mut self) {
        self.ref_count = self.ref_count.saturating_add(1);
    }

    pub fn put(&mut self) {
        self.ref_count = self.ref_count.saturating_sub(1);
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    pub fn is_referenced(&self) -> bool {
        self.ref_count > 0
    }
}
