//! Raw bit-level operations shared by the block and inode allocators.

mod ops;

pub use ops::*;
