//! Classic ext2/ext3-style indirect block addressing: 12 direct slots plus
//! single/double/triple indirect index blocks, used whenever an inode lacks
//! the extents flag.

use alloc::vec;

use crate::balloc;
use crate::block::BlockDev;
use crate::consts::EXT4_INODE_DIRECT_BLOCKS;
use crate::error::{Error, ErrorKind, Result};
use crate::inode::Inode;
use crate::superblock::Superblock;
use crate::BlockDevice;

/// Precomputed per-block-size geometry for indirect addressing.
///
/// `block_limits[i]` is the first logical block number past everything
/// addressable through levels `0..=i`; `blocks_per_level[i]` is how many
/// logical blocks a single pointer at level `i` covers.
pub struct IndirectBlockMapper {
    blocks_per_indirect: u32,
    block_limits: [u64; 4],
    blocks_per_level: [u64; 4],
}

impl IndirectBlockMapper {
    /// Builds the geometry table for a given filesystem block size.
    pub fn new(block_size: u32) -> Self {
        let blocks_per_indirect = block_size / 4;

        let mut block_limits = [0u64; 4];
        let mut blocks_per_level = [0u64; 4];

        block_limits[0] = EXT4_INODE_DIRECT_BLOCKS as u64;
        blocks_per_level[0] = 1;

        for i in 1..4 {
            blocks_per_level[i] = blocks_per_level[i - 1] * blocks_per_indirect as u64;
            block_limits[i] = block_limits[i - 1] + blocks_per_level[i];
        }

        Self {
            blocks_per_indirect,
            block_limits,
            blocks_per_level,
        }
    }

    /// Maps a logical block to its physical block without allocating.
    ///
    /// Returns `Ok(None)` for a sparse hole.
    pub fn map_block<D: BlockDevice>(
        &self,
        blockdev: &mut BlockDev<D>,
        inode: &Inode,
        logical_block: u64,
    ) -> Result<Option<u64>> {
        if logical_block < EXT4_INODE_DIRECT_BLOCKS as u64 {
            return Ok(match inode.get_direct_block(logical_block as usize) {
                Some(physical_block) if physical_block != 0 => Some(physical_block as u64),
                _ => None,
            });
        }

        let level = self.determine_indirect_level(logical_block)?;
        let top = match level {
            1 => inode.get_indirect_block(),
            2 => inode.get_double_indirect_block(),
            3 => inode.get_triple_indirect_block(),
            _ => unreachable!(),
        };
        if top == 0 {
            return Ok(None);
        }

        self.walk(blockdev, None, top as u64, level, logical_block - self.block_limits[level as usize - 1], None)
    }

    /// Maps a logical block to its physical block, allocating direct,
    /// intermediate, and leaf blocks on demand.
    ///
    /// `goal` is a placement hint for the allocator (e.g. the file's last
    /// allocated block); callers with no better hint pass `0`. Any newly
    /// allocated index block is zeroed before its address is linked in, so
    /// unfilled slots keep reading back as holes.
    pub fn map_block_create<D: BlockDevice>(
        &self,
        blockdev: &mut BlockDev<D>,
        sb: &mut Superblock,
        inode: &mut Inode,
        logical_block: u64,
        goal: u64,
    ) -> Result<u64> {
        if logical_block < EXT4_INODE_DIRECT_BLOCKS as u64 {
            let index = logical_block as usize;
            if let Some(existing) = inode.get_direct_block(index) {
                if existing != 0 {
                    return Ok(existing as u64);
                }
            }
            let new_block = self.alloc_data_block(blockdev, sb, goal)?;
            inode.set_direct_block(logical_block as u32, new_block as u32);
            return Ok(new_block);
        }

        let level = self.determine_indirect_level(logical_block)?;
        let mut top = match level {
            1 => inode.get_indirect_block(),
            2 => inode.get_double_indirect_block(),
            3 => inode.get_triple_indirect_block(),
            _ => unreachable!(),
        };
        if top == 0 {
            let new_block = self.alloc_index_block(blockdev, sb, goal)?;
            inode.set_indirect_block(level - 1, new_block as u32);
            top = new_block as u32;
        }

        let offset_in_level = logical_block - self.block_limits[level as usize - 1];
        match self.walk(blockdev, Some(sb), top as u64, level, offset_in_level, Some(goal))? {
            Some(physical_block) => Ok(physical_block),
            None => Err(Error::new(
                ErrorKind::Corrupted,
                "indirect block allocation did not produce a leaf block",
            )),
        }
    }

    /// Frees every block (leaf and intermediate) addressing logical blocks
    /// at or past `new_block_count`, and clears the inode pointers that
    /// pointed only into freed subtrees.
    ///
    /// Used by truncation: a leaf whose logical index is `>= new_block_count`
    /// is released immediately; an intermediate index block is released once
    /// every child it still had has itself been released.
    pub fn truncate<D: BlockDevice>(
        &self,
        blockdev: &mut BlockDev<D>,
        sb: &mut Superblock,
        inode: &mut Inode,
        new_block_count: u64,
    ) -> Result<()> {
        let direct_start = new_block_count.min(EXT4_INODE_DIRECT_BLOCKS as u64) as u32;
        for index in direct_start..EXT4_INODE_DIRECT_BLOCKS as u32 {
            if let Some(block) = inode.get_direct_block(index as usize) {
                if block != 0 {
                    balloc::free_block(blockdev, sb, block as u64)?;
                    inode.set_direct_block(index, 0);
                }
            }
        }

        for level in 1..4u32 {
            let level_start = self.block_limits[level as usize - 1];
            let level_end = self.block_limits[level as usize];
            if new_block_count >= level_end {
                continue;
            }
            let top = match level {
                1 => inode.get_indirect_block(),
                2 => inode.get_double_indirect_block(),
                3 => inode.get_triple_indirect_block(),
                _ => unreachable!(),
            };
            if top == 0 {
                continue;
            }
            let start = new_block_count.saturating_sub(level_start);
            if self.free_subtree(blockdev, sb, top as u64, level, start)? {
                inode.set_indirect_block(level - 1, 0);
            }
        }

        Ok(())
    }

    fn determine_indirect_level(&self, logical_block: u64) -> Result<u32> {
        for level in 1..4 {
            if logical_block < self.block_limits[level] {
                return Ok(level as u32);
            }
        }
        Err(Error::new(
            ErrorKind::InvalidInput,
            "logical block number exceeds maximum indirect-addressable file size",
        ))
    }

    /// Descends `level` index blocks starting at `top`, reading (and, when
    /// `sb`/`goal` are given, allocating) down to the leaf data pointer.
    fn walk<D: BlockDevice>(
        &self,
        blockdev: &mut BlockDev<D>,
        mut sb: Option<&mut Superblock>,
        top: u64,
        level: u32,
        offset_in_level: u64,
        goal: Option<u64>,
    ) -> Result<Option<u64>> {
        let mut current_block = top;
        let mut remaining = offset_in_level;

        for depth in (1..=level).rev() {
            let span = self.blocks_per_level[(depth - 1) as usize];
            let index = (remaining / span) as u32;
            remaining %= span;

            if depth == 1 {
                match self.read_block_pointer(blockdev, current_block, index)? {
                    Some(leaf) => return Ok(Some(leaf)),
                    None => {
                        let Some(sb) = sb.as_deref_mut() else {
                            return Ok(None);
                        };
                        let new_block = self.alloc_data_block(blockdev, sb, goal.unwrap_or(0))?;
                        self.write_block_pointer(blockdev, current_block, index, new_block)?;
                        return Ok(Some(new_block));
                    }
                }
            }

            match self.read_block_pointer(blockdev, current_block, index)? {
                Some(next) => current_block = next,
                None => {
                    let Some(sb) = sb.as_deref_mut() else {
                        return Ok(None);
                    };
                    let new_block = self.alloc_index_block(blockdev, sb, goal.unwrap_or(0))?;
                    self.write_block_pointer(blockdev, current_block, index, new_block)?;
                    current_block = new_block;
                }
            }
        }

        Ok(Some(current_block))
    }

    /// Frees `block_addr` and everything under it at logical offset `start`
    /// or past (relative to the start of this subtree), returning whether
    /// `block_addr` itself ended up fully empty and was freed.
    fn free_subtree<D: BlockDevice>(
        &self,
        blockdev: &mut BlockDev<D>,
        sb: &mut Superblock,
        block_addr: u64,
        depth: u32,
        start: u64,
    ) -> Result<bool> {
        if depth == 0 {
            balloc::free_block(blockdev, sb, block_addr)?;
            return Ok(true);
        }

        let span = self.blocks_per_level[(depth - 1) as usize];
        let first_child = (start / span) as u32;
        let mut all_freed = first_child == 0;

        for index in first_child..self.blocks_per_indirect {
            let Some(child_addr) = self.read_block_pointer(blockdev, block_addr, index)? else {
                continue;
            };
            let child_start = if index == first_child { start % span } else { 0 };
            if self.free_subtree(blockdev, sb, child_addr, depth - 1, child_start)? {
                self.write_block_pointer(blockdev, block_addr, index, 0)?;
            } else {
                all_freed = false;
            }
        }

        if all_freed {
            balloc::free_block(blockdev, sb, block_addr)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn alloc_data_block<D: BlockDevice>(
        &self,
        blockdev: &mut BlockDev<D>,
        sb: &mut Superblock,
        goal: u64,
    ) -> Result<u64> {
        let mut allocator = balloc::BlockAllocator::new();
        allocator.alloc_block(blockdev, sb, goal)
    }

    /// Allocates a block for use as an index node and zeroes it, so every
    /// pointer slot in it reads back as a hole until written.
    fn alloc_index_block<D: BlockDevice>(
        &self,
        blockdev: &mut BlockDev<D>,
        sb: &mut Superblock,
        goal: u64,
    ) -> Result<u64> {
        let block_addr = self.alloc_data_block(blockdev, sb, goal)?;
        let zeros = vec![0u8; blockdev.block_size() as usize];
        blockdev.write_blocks_direct(block_addr, 1, &zeros)?;
        Ok(block_addr)
    }

    fn read_block_pointer<D: BlockDevice>(
        &self,
        blockdev: &mut BlockDev<D>,
        indirect_block: u64,
        index: u32,
    ) -> Result<Option<u64>> {
        let block_size = blockdev.block_size() as usize;
        let mut buf = vec![0u8; block_size];
        blockdev.read_blocks_direct(indirect_block, 1, &mut buf)?;

        let offset = (index as usize) * 4;
        if offset + 4 > buf.len() {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "index out of bounds in indirect block",
            ));
        }

        let block_num = u32::from_le_bytes([
            buf[offset],
            buf[offset + 1],
            buf[offset + 2],
            buf[offset + 3],
        ]);

        Ok(if block_num == 0 {
            None
        } else {
            Some(block_num as u64)
        })
    }

    fn write_block_pointer<D: BlockDevice>(
        &self,
        blockdev: &mut BlockDev<D>,
        indirect_block: u64,
        index: u32,
        value: u64,
    ) -> Result<()> {
        let block_size = blockdev.block_size() as usize;
        let mut buf = vec![0u8; block_size];
        blockdev.read_blocks_direct(indirect_block, 1, &mut buf)?;

        let offset = (index as usize) * 4;
        if offset + 4 > buf.len() {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "index out of bounds in indirect block",
            ));
        }
        buf[offset..offset + 4].copy_from_slice(&(value as u32).to_le_bytes());

        blockdev.write_blocks_direct(indirect_block, 1, &buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_for_4k_blocks() {
        let mapper = IndirectBlockMapper::new(4096);

        assert_eq!(mapper.blocks_per_indirect, 1024);
        assert_eq!(mapper.block_limits[0], 12);
        assert_eq!(mapper.block_limits[1], 12 + 1024);
        assert_eq!(mapper.block_limits[2], 1036 + 1024 * 1024);

        assert_eq!(mapper.blocks_per_level[0], 1);
        assert_eq!(mapper.blocks_per_level[1], 1024);
        assert_eq!(mapper.blocks_per_level[2], 1024 * 1024);
    }

    #[test]
    fn level_boundaries() {
        let mapper = IndirectBlockMapper::new(4096);

        assert_eq!(mapper.determine_indirect_level(12).unwrap(), 1);
        assert_eq!(mapper.determine_indirect_level(1035).unwrap(), 1);
        assert_eq!(mapper.determine_indirect_level(1036).unwrap(), 2);
        assert_eq!(mapper.determine_indirect_level(1049611).unwrap(), 2);
        assert_eq!(mapper.determine_indirect_level(1049612).unwrap(), 3);
    }

    #[test]
    fn level_past_triple_indirect_is_out_of_range() {
        let mapper = IndirectBlockMapper::new(4096);
        let max = mapper.block_limits[3];
        assert!(mapper.determine_indirect_level(max).is_err());
    }
}
