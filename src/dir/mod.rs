//! Directory block parsing and entry mutation for a single, already-resolved
//! directory inode.
//!
//! A hash-indexed (HTree) directory's root and index blocks are never
//! walked here: they present themselves to a linear scan as ordinary
//! dirents spanning the whole block with `inode == 0`, so `iterator` skips
//! them for free and falls through to whatever leaf blocks the index would
//! have pointed at anyway. Building or maintaining the index itself, and
//! resolving a multi-component path down to an inode, both live outside
//! this crate.

pub mod checksum;
pub mod iterator;
pub mod reader;
pub mod write;

pub use iterator::{DirEntry, DirIterator, read_dir};
pub use reader::DirReader;
