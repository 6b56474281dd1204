//! Superblock reading, validation, mutation and write-back.

mod read;
mod write;
pub mod checksum;

pub use read::*;
pub use write::*;
