//! A fixed-capacity block cache keyed by logical block address.
//!
//! The cache keeps two indices over the same backing store: an LBA index for
//! lookups and an LRU index for eviction. Only buffers with `refctr == 0` and
//! no pending write-back live in the LRU index — referenced or dirty buffers
//! are never eviction candidates. The cache never talks to a [`BlockDevice`]
//! except through the explicit `flush_*` entry points; everything else
//! (`alloc`, `free`, `lookup`, ...) is pure bookkeeping over in-memory
//! buffers, so the block layer decides when I/O actually happens.
//!
//! A buffer leaves the `buffers` slots for good in exactly two places:
//! [`BlockCache::evict_one`] and [`BlockCache::drop_buffer`]. Both only drop
//! the index entries; neither writes back a dirty buffer first, so callers
//! must flush before invalidating or evicting anything they care about.

use crate::{
    block::BlockDevice,
    error::{Error, ErrorKind, Result},
};

use super::buffer::{BufferId, CacheBuffer};
use alloc::{collections::BTreeMap, collections::VecDeque, vec::Vec};

/// Default cache size, in blocks.
pub const DEFAULT_CACHE_SIZE: usize = 8;

pub struct BlockCache {
    capacity: usize,
    block_size: usize,

    /// Logical block address -> buffer slot.
    lba_index: BTreeMap<u64, BufferId>,

    /// LRU counter -> buffer slot. Only holds buffers with `refctr == 0`
    /// and `!is_dirty()`.
    lru_index: BTreeMap<u32, BufferId>,

    /// Buffer storage; `None` marks a free slot available for reuse.
    buffers: Vec<Option<CacheBuffer>>,

    /// Buffers with unwritten data, in the order they were dirtied.
    dirty_list: VecDeque<BufferId>,

    /// Slots vacated by `evict_one`/`drop_buffer`, ready for reuse before
    /// growing `buffers`.
    free_list: Vec<BufferId>,

    lru_counter: u32,
    ref_blocks: u32,
    max_ref_blocks: Option<u32>,

    /// When set, the cache refuses to evict and returns `NoSpace` instead.
    dont_shake: bool,

    /// Write-back nesting counter: > 0 defers flushing, 0 means write-through.
    write_back_counter: u32,
}

impl BlockCache {
    pub fn new(capacity: usize, block_size: usize) -> Self {
        Self {
            capacity,
            block_size,
            lba_index: BTreeMap::new(),
            lru_index: BTreeMap::new(),
            buffers: Vec::with_capacity(capacity),
            dirty_list: VecDeque::new(),
            free_list: Vec::new(),
            lru_counter: 0,
            ref_blocks: 0,
            max_ref_blocks: None,
            dont_shake: false,
            write_back_counter: 0,
        }
    }

    /// Maximum number of blocks this cache can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn set_max_ref_blocks(&mut self, max: Option<u32>) {
        self.max_ref_blocks = max;
    }

    pub fn set_dont_shake(&mut self, dont_shake: bool) {
        self.dont_shake = dont_shake;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            capacity: self.capacity,
            used: self.lba_index.len(),
            ref_blocks: self.ref_blocks as usize,
            dirty_blocks: self.dirty_list.len(),
            lru_counter: self.lru_counter,
        }
    }

    /// Looks up a block without touching its reference count.
    pub fn lookup(&self, lba: u64) -> Option<&CacheBuffer> {
        let id = *self.lba_index.get(&lba)?;
        self.buffers.get(id)?.as_ref()
    }

    /// Looks up a block and pins it: bumps `refctr` and, the first time it
    /// goes from unreferenced to referenced, removes it from the LRU index.
    pub fn find_get(&mut self, lba: u64) -> Option<&mut CacheBuffer> {
        let id = *self.lba_index.get(&lba)?;
        let buf = self.buffers.get_mut(id)?.as_mut()?;

        if !buf.is_referenced() {
            self.lru_index.remove(&buf.lru_id);
        }

        buf.get();
        self.ref_blocks += 1;

        Some(buf)
    }

    /// Looks up a block without touching its reference count or LRU
    /// position. For callers (like a held [`crate::block::Block`] handle)
    /// that already pinned the buffer and just need repeated access to it.
    pub fn peek_mut(&mut self, lba: u64) -> Option<&mut CacheBuffer> {
        let id = *self.lba_index.get(&lba)?;
        self.buffers.get_mut(id)?.as_mut()
    }

    /// The least-recently-used unreferenced block.
    pub fn lowest_lru(&self) -> Option<&CacheBuffer> {
        let (_lru_id, &buf_id) = self.lru_index.first_key_value()?;
        self.buffers.get(buf_id)?.as_ref()
    }

    fn evict_one(&mut self) -> Result<BufferId> {
        if self.dont_shake {
            return Err(Error::new(ErrorKind::NoSpace, "cache full and eviction disabled"));
        }

        let lru_buf = self
            .lowest_lru()
            .ok_or_else(|| Error::new(ErrorKind::NoSpace, "all cache blocks are referenced"))?;

        let lba = lru_buf.lba;
        let id = lru_buf.id;
        let lru_id = lru_buf.lru_id;

        self.lba_index.remove(&lba);
        self.lru_index.remove(&lru_id);

        if let Some(pos) = self.dirty_list.iter().position(|&x| x == id) {
            self.dirty_list.remove(pos);
        }

        self.buffers[id] = None;

        Ok(id)
    }

    fn allocate_slot(&mut self) -> Result<BufferId> {
        if let Some(id) = self.free_list.pop() {
            return Ok(id);
        }

        if self.buffers.len() < self.capacity {
            let id = self.buffers.len();
            self.buffers.push(None);
            return Ok(id);
        }

        self.evict_one()
    }

    /// Returns the buffer for `lba`, allocating and pinning it (refctr 1) if
    /// it wasn't already cached. The `bool` is `true` on a fresh allocation.
    pub fn alloc(&mut self, lba: u64) -> Result<(&mut CacheBuffer, bool)> {
        let exists = self.lba_index.contains_key(&lba);

        if exists {
            let buf = self.find_get(lba).unwrap();
            return Ok((buf, false));
        }

        if let Some(max) = self.max_ref_blocks {
            if self.ref_blocks >= max {
                return Err(Error::new(ErrorKind::NoSpace, "maximum referenced blocks reached"));
            }
        }

        let id = self.allocate_slot()?;

        let lru_id = self.next_lru_id();
        let mut buf = CacheBuffer::new(lba, self.block_size, id);
        buf.lru_id = lru_id;
        buf.get();

        self.lba_index.insert(lba, id);
        // refctr is 1, so the new buffer stays out of the LRU index.

        self.buffers[id] = Some(buf);
        self.ref_blocks += 1;

        let buf = self.buffers[id].as_mut().unwrap();
        Ok((buf, true))
    }

    /// Drops one reference to `lba`. Once the count hits zero and the block
    /// isn't dirty, it becomes eligible for eviction again.
    pub fn free(&mut self, lba: u64) -> Result<u32> {
        let id = *self
            .lba_index
            .get(&lba)
            .ok_or_else(|| Error::new(ErrorKind::NotFound, "block not in cache"))?;

        let buf = self.buffers[id]
            .as_mut()
            .ok_or_else(|| Error::new(ErrorKind::NotFound, "invalid buffer slot"))?;

        if !buf.is_referenced() {
            return Err(Error::new(ErrorKind::InvalidInput, "block reference count already zero"));
        }

        buf.put();
        self.ref_blocks = self.ref_blocks.saturating_sub(1);

        // Dirty blocks stay out of the LRU index even at refctr 0 — they
        // must survive until a flush, not get evicted out from under it.
        if !buf.is_referenced() && !buf.is_dirty() {
            let lru_id = buf.lru_id;
            let buf_id = buf.id;
            self.lru_index.insert(lru_id, buf_id);
        }

        Ok(buf.refctr)
    }

    /// Removes an unreferenced buffer from its slot outright. Callers must
    /// already have flushed it if it was dirty.
    pub fn drop_buffer(&mut self, id: BufferId) -> Result<()> {
        let buf = self.buffers[id]
            .take()
            .ok_or_else(|| Error::new(ErrorKind::NotFound, "buffer slot empty"))?;

        if buf.is_referenced() {
            self.buffers[id] = Some(buf);
            return Err(Error::new(ErrorKind::InvalidInput, "cannot drop a referenced buffer"));
        }

        self.lba_index.remove(&buf.lba);
        self.lru_index.remove(&buf.lru_id);

        if let Some(pos) = self.dirty_list.iter().position(|&x| x == id) {
            self.dirty_list.remove(pos);
        }

        self.free_list.push(id);

        Ok(())
    }

    /// Drops `lba` from the cache if present. A missing block is not an
    /// error — the caller's intent ("this address is stale") is satisfied
    /// either way.
    pub fn invalidate_buffer(&mut self, lba: u64) -> Result<()> {
        if let Some(&id) = self.lba_index.get(&lba) {
            self.drop_buffer(id)?;
        }
        Ok(())
    }

    /// Invalidates `count` consecutive blocks starting at `from`. Returns
    /// only the number that were actually present and removed.
    pub fn invalidate_range(&mut self, from: u64, count: u32) -> Result<usize> {
        let mut invalidated = 0;

        for offset in 0..count {
            let lba = from + offset as u64;
            if self.lba_index.contains_key(&lba) {
                self.invalidate_buffer(lba)?;
                invalidated += 1;
            }
        }

        Ok(invalidated)
    }

    pub fn mark_dirty(&mut self, lba: u64) -> Result<()> {
        let id = *self
            .lba_index
            .get(&lba)
            .ok_or_else(|| Error::new(ErrorKind::NotFound, "block not in cache"))?;

        let buf = self.buffers[id]
            .as_mut()
            .ok_or_else(|| Error::new(ErrorKind::NotFound, "invalid buffer slot"))?;

        if !buf.is_dirty() {
            buf.mark_dirty();
            self.dirty_list.push_back(id);
        }

        Ok(())
    }

    /// Writes every dirty block back to `device`, in dirty-order. A failed
    /// write re-queues the block and stops the flush.
    pub fn flush_all<D: BlockDevice>(
        &mut self,
        device: &mut D,
        sector_size: u32,
        partition_offset: u64,
    ) -> Result<usize> {
        self.flush_n(usize::MAX, device, sector_size, partition_offset)
    }

    /// Writes back at most `n` dirty blocks, oldest-dirtied first. Used by
    /// the block layer to make room without flushing the whole cache.
    pub fn flush_some<D: BlockDevice>(
        &mut self,
        n: usize,
        device: &mut D,
        sector_size: u32,
        partition_offset: u64,
    ) -> Result<usize> {
        self.flush_n(n, device, sector_size, partition_offset)
    }

    fn flush_n<D: BlockDevice>(
        &mut self,
        n: usize,
        device: &mut D,
        sector_size: u32,
        partition_offset: u64,
    ) -> Result<usize> {
        let mut flushed = 0;

        while flushed < n {
            let Some(id) = self.dirty_list.pop_front() else {
                break;
            };

            let Some(buf) = &mut self.buffers[id] else {
                continue;
            };
            if !buf.is_dirty() {
                continue;
            }

            let byte_offset = buf.lba * self.block_size as u64 + partition_offset;
            let pba = byte_offset / sector_size as u64;
            let count = self.block_size as u32 / sector_size;

            let result = device.write_blocks(pba, count, &buf.data);
            let is_ok = result.is_ok();
            buf.invoke_end_write(result.map(|_| ()));

            if !is_ok {
                self.dirty_list.push_back(id);
                return Err(Error::new(ErrorKind::Io, "failed to write block"));
            }

            buf.mark_clean();
            flushed += 1;
            if !buf.is_referenced() {
                let lru_id = buf.lru_id;
                self.lru_index.insert(lru_id, id);
            }
        }

        Ok(flushed)
    }

    pub fn flush_lba<D: BlockDevice>(
        &mut self,
        lba: u64,
        device: &mut D,
        sector_size: u32,
        partition_offset: u64,
    ) -> Result<()> {
        let id = *self
            .lba_index
            .get(&lba)
            .ok_or_else(|| Error::new(ErrorKind::NotFound, "block not in cache"))?;

        if !self.dirty_list.contains(&id) {
            return Ok(());
        }

        let buf = self.buffers[id].as_mut().unwrap();
        if !buf.is_dirty() {
            return Ok(());
        }

        let byte_offset = buf.lba * self.block_size as u64 + partition_offset;
        let pba = byte_offset / sector_size as u64;
        let count = self.block_size as u32 / sector_size;

        let result = device.write_blocks(pba, count, &buf.data);
        let is_ok = result.is_ok();
        buf.invoke_end_write(result.map(|_| ()));

        if !is_ok {
            return Err(Error::new(ErrorKind::Io, "failed to write block"));
        }

        buf.mark_clean();
        if let Some(index) = self.dirty_list.iter().position(|x| x == &id) {
            self.dirty_list.remove(index);
        }
        if !buf.is_referenced() {
            let lru_id = buf.lru_id;
            self.lru_index.insert(lru_id, id);
        }

        Ok(())
    }

    /// Returns a cached block's data, provided it has been read in.
    pub fn read_block(&self, lba: u64) -> Result<&[u8]> {
        let id = *self
            .lba_index
            .get(&lba)
            .ok_or_else(|| Error::new(ErrorKind::NotFound, "block not in cache"))?;

        let buf = self.buffers[id]
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::NotFound, "invalid buffer slot"))?;

        if !buf.is_uptodate() {
            return Err(Error::new(ErrorKind::InvalidInput, "block data not valid"));
        }

        Ok(&buf.data)
    }

    /// Overwrites a cached block's data and marks it dirty.
    pub fn write_block(&mut self, lba: u64, data: &[u8]) -> Result<usize> {
        let id = *self
            .lba_index
            .get(&lba)
            .ok_or_else(|| Error::new(ErrorKind::NotFound, "block not in cache"))?;

        let buf = self.buffers[id]
            .as_mut()
            .ok_or_else(|| Error::new(ErrorKind::NotFound, "invalid buffer slot"))?;

        if data.len() > buf.data.len() {
            return Err(Error::new(ErrorKind::InvalidInput, "data too large for block"));
        }

        buf.data[..data.len()].copy_from_slice(data);

        buf.mark_uptodate();
        if !buf.is_dirty() {
            buf.mark_dirty();
            self.dirty_list.push_back(id);
        }

        Ok(data.len())
    }

    /// Logical block addresses currently queued for write-back, oldest
    /// first.
    pub fn dirty_lbas(&self) -> Vec<u64> {
        self.dirty_list
            .iter()
            .filter_map(|&id| self.buffers[id].as_ref().map(|b| b.lba))
            .collect()
    }

    fn next_lru_id(&mut self) -> u32 {
        let id = self.lru_counter;
        self.lru_counter = self.lru_counter.wrapping_add(1);
        id
    }

    /// Enables deferred write-back; nests, so N enables need N disables
    /// before a flush is forced again.
    pub fn enable_write_back(&mut self) {
        self.write_back_counter = self.write_back_counter.saturating_add(1);
    }

    /// Disables one level of write-back; once the counter reaches zero,
    /// flushes everything still dirty.
    pub fn disable_write_back<D: BlockDevice>(
        &mut self,
        device: &mut D,
        sector_size: u32,
        partition_offset: u64,
    ) -> Result<usize> {
        if self.write_back_counter > 0 {
            self.write_back_counter -= 1;
        }

        if self.write_back_counter == 0 {
            return self.flush_all(device, sector_size, partition_offset);
        }

        Ok(0)
    }

    pub fn is_write_back_enabled(&self) -> bool {
        self.write_back_counter > 0
    }

    pub fn write_back_counter(&self) -> u32 {
        self.write_back_counter
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub capacity: usize,
    pub used: usize,
    pub ref_blocks: usize,
    pub dirty_blocks: usize,
    pub lru_counter: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_creation() {
        let cache = BlockCache::new(8, 4096);
        let stats = cache.stats();
        assert_eq!(stats.capacity, 8);
        assert_eq!(stats.used, 0);
        assert_eq!(stats.ref_blocks, 0);
        assert_eq!(stats.dirty_blocks, 0);
        assert_eq!(cache.capacity(), 8);
    }

    #[test]
    fn test_alloc_new_block() {
        let mut cache = BlockCache::new(8, 4096);

        let (buf, is_new) = cache.alloc(100).unwrap();
        assert!(is_new);
        assert_eq!(buf.lba, 100);
        assert_eq!(buf.refctr, 1);
        assert_eq!(buf.data.len(), 4096);

        let stats = cache.stats();
        assert_eq!(stats.used, 1);
        assert_eq!(stats.ref_blocks, 1);
    }

    #[test]
    fn test_alloc_existing_block() {
        let mut cache = BlockCache::new(8, 4096);

        let (buf1, is_new1) = cache.alloc(100).unwrap();
        assert!(is_new1);
        assert_eq!(buf1.refctr, 1);

        let (buf2, is_new2) = cache.alloc(100).unwrap();
        assert!(!is_new2);
        assert_eq!(buf2.refctr, 2);

        let stats = cache.stats();
        assert_eq!(stats.used, 1);
        assert_eq!(stats.ref_blocks, 2);
    }

    #[test]
    fn test_free_block() {
        let mut cache = BlockCache::new(8, 4096);

        cache.alloc(100).unwrap();
        assert_eq!(cache.stats().ref_blocks, 1);

        let refctr = cache.free(100).unwrap();
        assert_eq!(refctr, 0);
        assert_eq!(cache.stats().ref_blocks, 0);
    }

    #[test]
    fn test_find_get() {
        let mut cache = BlockCache::new(8, 4096);

        cache.alloc(100).unwrap();
        cache.free(100).unwrap();

        let buf = cache.find_get(100).unwrap();
        assert_eq!(buf.lba, 100);
        assert_eq!(buf.refctr, 1);

        assert!(cache.find_get(200).is_none());
    }

    #[test]
    fn test_lru_eviction() {
        let mut cache = BlockCache::new(2, 4096);

        cache.alloc(100).unwrap();
        cache.alloc(200).unwrap();

        cache.free(100).unwrap();
        cache.free(200).unwrap();

        cache.alloc(300).unwrap();

        assert!(cache.lookup(100).is_none());
        assert!(cache.lookup(200).is_some());
        assert!(cache.lookup(300).is_some());
    }

    #[test]
    fn test_cannot_evict_referenced_block() {
        let mut cache = BlockCache::new(2, 4096);

        cache.alloc(100).unwrap();
        cache.alloc(200).unwrap();

        let result = cache.alloc(300);
        assert!(result.is_err());
    }

    #[test]
    fn test_dirty_list() {
        let mut cache = BlockCache::new(8, 4096);

        cache.alloc(100).unwrap();
        cache.mark_dirty(100).unwrap();

        let stats = cache.stats();
        assert_eq!(stats.dirty_blocks, 1);
    }

    #[test]
    fn test_invalidate_buffer() {
        let mut cache = BlockCache::new(8, 4096);

        cache.alloc(100).unwrap();
        cache.free(100).unwrap();

        cache.invalidate_buffer(100).unwrap();

        assert!(cache.lookup(100).is_none());
    }

    #[test]
    fn test_invalidate_range() {
        let mut cache = BlockCache::new(8, 4096);

        for i in 100..105 {
            cache.alloc(i).unwrap();
            cache.free(i).unwrap();
        }

        let count = cache.invalidate_range(100, 5).unwrap();
        assert_eq!(count, 5);

        for i in 100..105 {
            assert!(cache.lookup(i).is_none());
        }
    }

    #[test]
    fn test_invalidate_range_only_counts_present_blocks() {
        let mut cache = BlockCache::new(8, 4096);

        cache.alloc(100).unwrap();
        cache.free(100).unwrap();

        // 101..105 were never allocated.
        let count = cache.invalidate_range(100, 5).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_dont_shake() {
        let mut cache = BlockCache::new(2, 4096);
        cache.set_dont_shake(true);

        cache.alloc(100).unwrap();
        cache.alloc(200).unwrap();

        cache.free(100).unwrap();
        cache.free(200).unwrap();

        let result = cache.alloc(300);
        assert!(result.is_err());
    }

    #[test]
    fn test_max_ref_blocks() {
        let mut cache = BlockCache::new(8, 4096);
        cache.set_max_ref_blocks(Some(2));

        cache.alloc(100).unwrap();
        cache.alloc(200).unwrap();

        let result = cache.alloc(300);
        assert!(result.is_err());
    }

    struct NullDevice {
        block_size: u32,
    }

    impl BlockDevice for NullDevice {
        fn block_size(&self) -> u32 {
            self.block_size
        }
        fn sector_size(&self) -> u32 {
            512
        }
        fn total_blocks(&self) -> u64 {
            u64::MAX
        }
        fn read_blocks(&mut self, _pba: u64, _count: u32, buf: &mut [u8]) -> Result<usize> {
            Ok(buf.len())
        }
        fn write_blocks(&mut self, _pba: u64, _count: u32, buf: &[u8]) -> Result<usize> {
            Ok(buf.len())
        }
    }

    #[test]
    fn test_flush_some_bounds_how_many_blocks_are_written() {
        let mut cache = BlockCache::new(8, 4096);
        let mut dev = NullDevice { block_size: 512 };

        for lba in 0..4 {
            cache.alloc(lba).unwrap();
            cache.write_block(lba, &[0xAB; 16]).unwrap();
            cache.free(lba).unwrap();
        }
        assert_eq!(cache.stats().dirty_blocks, 4);

        let flushed = cache.flush_some(2, &mut dev, 512, 0).unwrap();
        assert_eq!(flushed, 2);
        assert_eq!(cache.stats().dirty_blocks, 2);
    }
}
