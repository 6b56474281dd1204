//! Mounted-filesystem handle and the refcounted inode/block-group views it
//! hands out.

mod filesystem;
mod inode_ref;
mod block_group_ref;
mod types;

pub use filesystem::{Ext4FileSystem, FileSystemStats};
pub use inode_ref::InodeRef;
pub use block_group_ref::BlockGroupRef;
pub use types::FsConfig;
