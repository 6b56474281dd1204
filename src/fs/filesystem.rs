//! The mounted filesystem handle: superblock/inode/block-group access and
//! the inode/block allocation and truncation primitives an external file
//! layer builds on. Path resolution, directory-entry linking, and POSIX
//! file semantics (open/read/write/rename/link/...) are that external
//! layer's job, not this crate's.

use crate::{
    block::{BlockDev, BlockDevice},
    error::{Error, ErrorKind, Result},
    superblock::Superblock,
};

use super::{block_group_ref::BlockGroupRef, inode_ref::InodeRef, types::FsConfig};

/// Filesystem usage snapshot returned by [`Ext4FileSystem::stats`].
#[derive(Debug, Clone)]
pub struct FileSystemStats {
    pub block_size: u32,
    pub blocks_total: u64,
    pub blocks_free: u64,
    /// Free blocks minus the reserved-for-root count.
    pub blocks_available: u64,
    pub inodes_total: u32,
    pub inodes_free: u32,
    /// First 8 bytes of the volume UUID.
    pub filesystem_id: u64,
    pub max_filename_len: u32,
}

/// A mounted ext4 volume: owns the block device and superblock, and hands
/// out the refcounted [`InodeRef`]/[`BlockGroupRef`] handles everything else
/// is built from.
pub struct Ext4FileSystem<D: BlockDevice> {
    pub(crate) bdev: BlockDev<D>,
    sb: Superblock,
}

impl<D: BlockDevice> Ext4FileSystem<D> {
    /// Mounts `bdev`, loading and validating its superblock.
    ///
    /// # Errors
    ///
    /// - `ErrorKind::Corrupted` — invalid superblock
    /// - `ErrorKind::Io` — device read failure
    pub fn mount(mut bdev: BlockDev<D>) -> Result<Self> {
        let sb = Superblock::load(&mut bdev)?;

        Ok(Self { bdev, sb })
    }

    /// Wraps `device` with a block cache sized per `config`, then mounts it.
    pub fn mount_with_cache(device: D, config: FsConfig) -> Result<Self> {
        let bdev = BlockDev::new_with_cache(device, config.bcache_size as usize)?;
        Self::mount(bdev)
    }

    /// Unmounts, writing the superblock back and returning the block device.
    ///
    /// Consumes `self`: an `Ext4FileSystem` dropped without calling this
    /// never gets an explicit superblock write-back (every other write is
    /// already synchronous, so no data is lost, but `mount_count`/checksum
    /// bookkeeping on the superblock itself would be stale).
    pub fn unmount(mut self) -> Result<BlockDev<D>> {
        self.sb.write(&mut self.bdev)?;
        Ok(self.bdev)
    }

    pub fn superblock(&self) -> &Superblock {
        &self.sb
    }

    pub fn block_device(&self) -> &BlockDev<D> {
        &self.bdev
    }

    pub fn block_device_mut(&mut self) -> &mut BlockDev<D> {
        &mut self.bdev
    }

    pub fn superblock_mut(&mut self) -> &mut Superblock {
        &mut self.sb
    }

    /// Snapshot of block/inode usage, read straight off the superblock.
    pub fn stats(&self) -> Result<FileSystemStats> {
        let sb_inner = self.sb.inner();

        Ok(FileSystemStats {
            block_size: self.sb.block_size(),
            blocks_total: u32::from_le(sb_inner.blocks_count_lo) as u64
                | ((u32::from_le(sb_inner.blocks_count_hi) as u64) << 32),
            blocks_free: u32::from_le(sb_inner.free_blocks_count_lo) as u64
                | ((u32::from_le(sb_inner.free_blocks_count_hi) as u64) << 32),
            blocks_available: {
                let free = u32::from_le(sb_inner.free_blocks_count_lo) as u64
                    | ((u32::from_le(sb_inner.free_blocks_count_hi) as u64) << 32);
                let reserved = u32::from_le(sb_inner.r_blocks_count_lo) as u64
                    | ((u32::from_le(sb_inner.r_blocks_count_hi) as u64) << 32);
                free.saturating_sub(reserved)
            },
            inodes_total: u32::from_le(sb_inner.inodes_count),
            inodes_free: u32::from_le(sb_inner.free_inodes_count),
            filesystem_id: {
                let uuid = &sb_inner.uuid;
                u64::from_le_bytes([
                    uuid[0], uuid[1], uuid[2], uuid[3], uuid[4], uuid[5], uuid[6], uuid[7],
                ])
            },
            max_filename_len: 255,
        })
    }

    /// Writes back every dirty cached block and flushes the device.
    pub fn flush(&mut self) -> Result<()> {
        self.bdev.flush()
    }

    /// Loads (or returns the cached copy of) inode `inode_num`.
    pub fn get_inode_ref(&mut self, inode_num: u32) -> Result<InodeRef<D>> {
        InodeRef::get(&mut self.bdev, &mut self.sb, inode_num)
    }

    /// Loads the descriptor and bitmap for block group `bgid`.
    pub fn get_block_group_ref(&mut self, bgid: u32) -> Result<BlockGroupRef<D>> {
        BlockGroupRef::get(&mut self.bdev, &mut self.sb, bgid)
    }

    /// Allocates a free inode number, marking it used in its group's bitmap.
    pub fn alloc_inode(&mut self, is_dir: bool) -> Result<u32> {
        use crate::ialloc::InodeAllocator;

        let mut allocator = InodeAllocator::new();
        allocator.alloc_inode(&mut self.bdev, &mut self.sb, is_dir)
    }

    /// Releases an inode number back to its group's bitmap.
    ///
    /// The caller must have already freed the inode's data blocks and
    /// confirmed `links_count == 0`.
    pub fn free_inode(&mut self, inode_num: u32, is_dir: bool) -> Result<()> {
        crate::ialloc::free_inode(&mut self.bdev, &mut self.sb, inode_num, is_dir)
    }

    /// Allocates a single data block, preferring locality near `goal`.
    pub fn alloc_block(&mut self, goal: u64) -> Result<u64> {
        use crate::balloc::BlockAllocator;

        let mut allocator = BlockAllocator::new();
        allocator.alloc_block(&mut self.bdev, &mut self.sb, goal)
    }

    /// Releases a single data block back to its group's bitmap.
    pub fn free_block(&mut self, block_addr: u64) -> Result<()> {
        crate::balloc::free_block(&mut self.bdev, &mut self.sb, block_addr)
    }

    /// Shrinks or grows an inode to `new_size`, freeing (and zeroing the
    /// tail of) any blocks the new size no longer covers. Growing only
    /// updates `i_size`: the newly exposed range reads back as a sparse
    /// hole until something writes to it.
    pub fn truncate_file(&mut self, inode_num: u32, new_size: u64) -> Result<()> {
        use crate::extent::remove_space;

        let block_size = self.sb.block_size() as u64;

        let mut inode_ref = InodeRef::get(&mut self.bdev, &mut self.sb, inode_num)?;
        let old_size = inode_ref.size()?;
        let uses_extents = inode_ref.has_extents()?;

        if old_size == new_size {
            return Ok(());
        }

        if !inode_ref.get_inode()?.can_truncate() {
            return Err(Error::new(
                ErrorKind::PermissionDenied,
                "inode is immutable or append-only",
            ));
        }

        log::debug!(
            "truncate inode {}: {} -> {} bytes",
            inode_num, old_size, new_size
        );

        if old_size < new_size {
            inode_ref.set_size(new_size)?;
            inode_ref.mark_dirty()?;
            return Ok(());
        }

        inode_ref.set_size(new_size)?;
        inode_ref.mark_dirty()?;
        drop(inode_ref);

        let offset_in_block = (new_size % block_size) as usize;
        if new_size > 0 && offset_in_block != 0 {
            let last_block_num = ((new_size - 1) / block_size) as u32;
            let physical_block = if uses_extents {
                let mut inode_ref = InodeRef::get(&mut self.bdev, &mut self.sb, inode_num)?;

                use crate::balloc::BlockAllocator;
                use crate::extent::get_blocks;

                // get_blocks wants &mut Superblock alongside an InodeRef that
                // already borrows it; same split-borrow as remove_space below.
                let sb_ptr = inode_ref.superblock_mut() as *mut crate::superblock::Superblock;
                let sb_ref = unsafe { &mut *sb_ptr };

                let mut allocator = BlockAllocator::new();
                let (physical_block, _count) =
                    get_blocks(&mut inode_ref, sb_ref, &mut allocator, last_block_num, 1, false)?;
                physical_block
            } else {
                self.fs_get_inode_data_block_index(inode_num, last_block_num)?
            };

            if physical_block != 0 {
                let mut block_buf = alloc::vec![0u8; block_size as usize];
                self.bdev.read_block(physical_block, &mut block_buf)?;
                block_buf[offset_in_block..].fill(0);
                self.bdev.write_block(physical_block, &block_buf)?;
            }
        }

        if uses_extents {
            let first_block_to_remove = if new_size == 0 {
                0
            } else {
                ((new_size + block_size - 1) / block_size) as u32
            };
            let last_block_to_remove = if old_size == 0 {
                0
            } else {
                ((old_size - 1) / block_size) as u32
            };

            if first_block_to_remove <= last_block_to_remove {
                let mut inode_ref = InodeRef::get(&mut self.bdev, &mut self.sb, inode_num)?;

                let sb_ptr = inode_ref.superblock_mut() as *mut crate::superblock::Superblock;
                let sb_ref = unsafe { &mut *sb_ptr };

                remove_space(&mut inode_ref, sb_ref, first_block_to_remove, last_block_to_remove)?;
            }
        } else {
            let new_block_count = (new_size + block_size - 1) / block_size;
            let mut inode_ref = InodeRef::get(&mut self.bdev, &mut self.sb, inode_num)?;
            let mut inode_wrapper = inode_ref.get_inode()?;

            use crate::indirect::IndirectBlockMapper;
            let mapper = IndirectBlockMapper::new(block_size as u32);
            let (bdev_ref, sb_ref) = inode_ref.bdev_and_sb_mut();
            mapper.truncate(bdev_ref, sb_ref, &mut inode_wrapper, new_block_count)?;

            let blocks = inode_wrapper.inner().blocks;
            inode_ref.with_inode_mut(|raw| raw.blocks = blocks)?;
        }

        Ok(())
    }

    /// Maps a logical block index to its physical block, or `0` if the
    /// range is an unallocated hole.
    pub fn fs_get_inode_data_block_index(&mut self, inode_num: u32, logical_block: u32) -> Result<u64> {
        let mut inode_ref = InodeRef::get(&mut self.bdev, &mut self.sb, inode_num)?;

        match inode_ref.get_inode_dblk_idx(logical_block, false) {
            Ok(physical_block) => Ok(physical_block),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Allocates and maps the block immediately past an inode's current
    /// end, extending `i_size` to cover it, and returns the new physical
    /// block.
    pub fn fs_append_inode_block(&mut self, inode_num: u32) -> Result<u64> {
        let block_size = self.sb.block_size() as u64;

        let mut inode_ref = InodeRef::get(&mut self.bdev, &mut self.sb, inode_num)?;
        let size = inode_ref.size()?;
        let next_logical_block = (size / block_size) as u32;

        let physical_block = inode_ref.get_inode_dblk_idx(next_logical_block, true)?;
        if physical_block == 0 {
            return Err(Error::new(ErrorKind::NoSpace, "no space to append inode block"));
        }

        inode_ref.set_size((next_logical_block as u64 + 1) * block_size)?;
        inode_ref.mark_dirty()?;

        Ok(physical_block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_fs_config_gives_default_cache_size() {
        assert_eq!(FsConfig::default().bcache_size, 256);
    }
}
