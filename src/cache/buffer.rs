//! A single cached block and the flags describing its state.

use crate::error::Result;
use alloc::boxed::Box;
use alloc::vec::Vec;
use bitflags::bitflags;

/// Opaque handle identifying a buffer slot inside a [`super::BlockCache`].
pub type BufferId = usize;

bitflags! {
    /// Per-buffer state flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CacheFlags: u8 {
        /// Data has been filled in and is valid to read.
        const UPTODATE = 0x01;
        /// Data has been modified since the last write-back.
        const DIRTY    = 0x02;
        /// Queued for an asynchronous flush.
        const FLUSH    = 0x04;
        /// Scratch buffer that should not be kept once released.
        const TMP      = 0x08;
    }
}

/// Callback invoked once a dirty buffer's write-back completes.
pub type EndWriteCallback = Box<dyn FnOnce(Result<()>) + Send>;

/// One cached block: its data plus the bookkeeping the cache needs to decide
/// when it can be evicted or must be flushed.
pub struct CacheBuffer {
    pub lba: u64,
    pub data: Vec<u8>,
    /// Non-zero while a caller holds this buffer; referenced buffers are
    /// never evicted.
    pub refctr: u32,
    /// Position in the eviction order — lower means older.
    pub lru_id: u32,
    pub flags: CacheFlags,
    pub id: BufferId,
    pub end_write: Option<EndWriteCallback>,
}

impl core::fmt::Debug for CacheBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CacheBuffer")
            .field("lba", &self.lba)
            .field("data_len", &self.data.len())
            .field("refctr", &self.refctr)
            .field("lru_id", &self.lru_id)
            .field("flags", &self.flags)
            .field("id", &self.id)
            .field("end_write", &self.end_write.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl CacheBuffer {
    pub fn new(lba: u64, block_size: usize, id: BufferId) -> Self {
        Self {
            lba,
            data: alloc::vec![0u8; block_size],
            refctr: 0,
            lru_id: 0,
            flags: CacheFlags::empty(),
            id,
            end_write: None,
        }
    }

    pub fn get(&mut self) {
        self.refctr = self.refctr.saturating_add(1);
    }

    pub fn put(&mut self) {
        self.refctr = self.refctr.saturating_sub(1);
    }

    pub fn is_referenced(&self) -> bool {
        self.refctr > 0
    }

    pub fn mark_dirty(&mut self) {
        self.flags.insert(CacheFlags::DIRTY);
    }

    pub fn mark_clean(&mut self) {
        self.flags.remove(CacheFlags::DIRTY);
    }

    pub fn is_dirty(&self) -> bool {
        self.flags.contains(CacheFlags::DIRTY)
    }

    pub fn mark_uptodate(&mut self) {
        self.flags.insert(CacheFlags::UPTODATE);
    }

    pub fn is_uptodate(&self) -> bool {
        self.flags.contains(CacheFlags::UPTODATE)
    }

    pub fn mark_flush(&mut self) {
        self.flags.insert(CacheFlags::FLUSH);
    }

    pub fn needs_flush(&self) -> bool {
        self.flags.contains(CacheFlags::FLUSH)
    }

    pub fn mark_tmp(&mut self) {
        self.flags.insert(CacheFlags::TMP);
    }

    pub fn is_tmp(&self) -> bool {
        self.flags.contains(CacheFlags::TMP)
    }

    pub fn set_end_write_callback(&mut self, callback: EndWriteCallback) {
        self.end_write = Some(callback);
    }

    /// Consumes and invokes the pending write-completion callback, if any.
    pub fn invoke_end_write(&mut self, result: Result<()>) {
        if let Some(callback) = self.end_write.take() {
            callback(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_creation() {
        let buf = CacheBuffer::new(100, 4096, 0);
        assert_eq!(buf.lba, 100);
        assert_eq!(buf.data.len(), 4096);
        assert!(!buf.is_referenced());
    }

    #[test]
    fn reference_counting_saturates() {
        let mut buf = CacheBuffer::new(100, 4096, 0);
        buf.get();
        buf.get();
        assert_eq!(buf.refctr, 2);
        buf.put();
        buf.put();
        assert_eq!(buf.refctr, 0);
        buf.put();
        assert_eq!(buf.refctr, 0);
    }

    #[test]
    fn dirty_flag_round_trip() {
        let mut buf = CacheBuffer::new(100, 4096, 0);
        assert!(!buf.is_dirty());
        buf.mark_dirty();
        assert!(buf.is_dirty());
        buf.mark_clean();
        assert!(!buf.is_dirty());
    }

    #[test]
    fn end_write_callback_fires_once() {
        use alloc::sync::Arc;
        use core::sync::atomic::{AtomicBool, Ordering};

        let mut buf = CacheBuffer::new(100, 4096, 0);
        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();
        buf.set_end_write_callback(Box::new(move |_| called_clone.store(true, Ordering::SeqCst)));
        buf.invoke_end_write(Ok(()));
        assert!(called.load(Ordering::SeqCst));
        buf.invoke_end_write(Ok(())); // no-op, already consumed
    }
}
