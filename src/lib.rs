//! lwext4_core: a pure-Rust ext4 filesystem core.
//!
//! This crate implements the on-disk structures, allocation, extent/indirect
//! block mapping, directory block parsing, transaction/journal replay, and
//! mount lifecycle of ext4. Path resolution, POSIX file semantics, xattr
//! value storage, and HTree construction are left to an external file layer
//! built on top of the interfaces here.
//!
//! # Example
//!
//! ```rust,ignore
//! use lwext4_core::{BlockDevice, block::BlockDev, Ext4FileSystem, Result};
//!
//! struct MyDevice {
//!     // ...
//! }
//!
//! impl BlockDevice for MyDevice {
//!     // ...
//! }
//!
//! fn main() -> Result<()> {
//!     let bdev = BlockDev::new(MyDevice::new())?;
//!     let mut fs = Ext4FileSystem::mount(bdev)?;
//!     let stats = fs.stats()?;
//!     Ok(())
//! }
//! ```
//!
//! # Module map
//!
//! - [`error`] - error type
//! - [`block`] - block device abstraction and I/O
//! - [`consts`] - on-disk constants
//! - [`types`] - on-disk struct definitions
//! - [`superblock`] - superblock load/validate/write
//! - [`fs`] - mounted-filesystem handle

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

// ===== Core modules =====

/// Error handling.
pub mod error;

/// Block device abstraction.
pub mod block;

/// On-disk constants.
pub mod consts;

/// On-disk struct definitions.
pub mod types;

/// Superblock operations.
pub mod superblock;

/// Inode operations.
pub mod inode;

/// Block group operations.
pub mod block_group;

/// Extent tree operations.
pub mod extent;

/// Indirect block mapping (legacy ext2/ext3 addressing).
pub mod indirect;

/// Directory block parsing and mutation.
pub mod dir;

/// Mounted-filesystem handle.
pub mod fs;

/// Block cache.
pub mod cache;

/// Bitmap operations.
pub mod bitmap;

/// Inode allocation.
pub mod ialloc;

/// Block allocation.
pub mod balloc;

/// Transaction system.
pub mod transaction;

/// Journal (JBD2) system.
pub mod journal;

/// Shared xattr block refcounting.
pub mod xattr;

/// CRC32/CRC32C/CRC16 checksum computation.
pub(crate) mod crc;

// ===== Public exports =====

pub use error::{Error, ErrorKind, Result};

pub use block::{BlockDevice, BlockDev, Block};

pub use superblock::{Superblock, read_superblock};

pub use inode::{Inode, InodeFileType, read_inode};

pub use block_group::{BlockGroup, read_block_group_desc, write_block_group_desc};

pub use extent::ExtentTree;

pub use indirect::IndirectBlockMapper;

pub use dir::{DirEntry, DirIterator, DirReader, read_dir};

pub use fs::{Ext4FileSystem, FileSystemStats, FsConfig, InodeRef, BlockGroupRef};

pub use cache::{BlockCache, CacheBuffer, CacheFlags, CacheStats, BufferId, DEFAULT_CACHE_SIZE};

pub use transaction::SimpleTransaction;

pub use journal::{JbdFs, JbdJournal, JbdTrans, JbdBuf, JournalError};

pub use xattr::release_block_ref as xattr_release_block_ref;
