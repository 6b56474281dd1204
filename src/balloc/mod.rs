//! 物理块分配模块
//!
//! 对应 lwext4 的 ext4_balloc.c 功能

pub mod helpers;
pub mod checksum;
pub mod free;
pub mod alloc;
pub mod fs_integration;

pub use helpers::*;
pub use checksum::*;
pub use free::*;
pub use alloc::*;
pub use fs_integration::*;
