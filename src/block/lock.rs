//! Concurrency hook for block device access.

use crate::error::Result;

/// A lock a [`super::BlockDev`] can be paired with for multi-threaded use.
///
/// This is an extension point, not a full concurrency story: `NoLock` is the
/// default for single-threaded use, and the `std` impls below only assert
/// that the lock is currently acquirable — they drop the guard immediately
/// rather than holding it across an operation. Real cross-thread exclusion
/// belongs at a higher layer (typically around the whole mounted
/// filesystem, not per block device).
pub trait DeviceLock: Send {
    fn lock(&self) -> Result<()>;
    fn unlock(&self) -> Result<()>;
}

/// No-op lock for single-threaded use.
pub struct NoLock;

impl DeviceLock for NoLock {
    #[inline]
    fn lock(&self) -> Result<()> {
        Ok(())
    }

    #[inline]
    fn unlock(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(feature = "std")]
mod std_locks {
    use super::*;
    use std::sync::{Mutex, RwLock};

    impl DeviceLock for Mutex<()> {
        fn lock(&self) -> Result<()> {
            let _ = self
                .lock()
                .map_err(|_| crate::error::Error::new(crate::error::ErrorKind::Io, "failed to acquire mutex lock"))?;
            Ok(())
        }

        fn unlock(&self) -> Result<()> {
            Ok(())
        }
    }

    impl DeviceLock for RwLock<()> {
        fn lock(&self) -> Result<()> {
            let _ = self
                .write()
                .map_err(|_| crate::error::Error::new(crate::error::ErrorKind::Io, "failed to acquire write lock"))?;
            Ok(())
        }

        fn unlock(&self) -> Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_lock() {
        let lock = NoLock;
        lock.lock().unwrap();
        lock.unlock().unwrap();
    }

    #[cfg(feature = "std")]
    #[test]
    fn test_mutex_lock() {
        use std::sync::Mutex;

        let lock = Mutex::new(());
        lock.lock().unwrap();
        lock.unlock().unwrap();
    }
}
