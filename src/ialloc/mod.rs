//! Inode 分配和释放模块
//!
//! 这个模块提供 inode 的分配和释放功能，对应 lwext4 的 `ext4_ialloc.c`

mod alloc;
mod free;
mod helpers;

pub use alloc::*;
pub use free::*;
pub use helpers::*;
