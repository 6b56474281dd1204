//! Directory entry mutation: linear add/remove within a single directory
//! inode's existing blocks, falling back to a freshly allocated block when
//! none has room.
//!
//! Hash-indexed (HTree) directories are read transparently (the linear
//! scan below skips their fake whole-block dirent the same way it skips
//! any other entry with `inode == 0`), but building or maintaining the
//! index itself is an external concern: every mutation here goes through
//! the plain linear path regardless of whether the directory carries an
//! index.

use crate::{
    block::{Block, BlockDevice},
    consts::*,
    dir::checksum,
    error::{Error, ErrorKind, Result},
    fs::InodeRef,
    superblock::Superblock,
    types::{ext4_dir_entry, ext4_dir_entry_tail},
};

pub const EXT4_DE_UNKNOWN: u8 = 0;
pub const EXT4_DE_REG_FILE: u8 = 1;
pub const EXT4_DE_DIR: u8 = 2;
pub const EXT4_DE_CHRDEV: u8 = 3;
pub const EXT4_DE_BLKDEV: u8 = 4;
pub const EXT4_DE_FIFO: u8 = 5;
pub const EXT4_DE_SOCK: u8 = 6;
pub const EXT4_DE_SYMLINK: u8 = 7;

/// Adds `name -> child_inode` to a directory, reusing a deleted entry's or
/// a live entry's slack space if one fits, otherwise appending a new block
/// holding a single entry that spans it.
pub fn add_entry<D: BlockDevice>(
    inode_ref: &mut InodeRef<D>,
    sb: &mut Superblock,
    name: &str,
    child_inode: u32,
    file_type: u8,
) -> Result<()> {
    if name.is_empty() || name.len() > 255 {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            "Directory entry name too long or empty",
        ));
    }

    let required_len = calculate_entry_len(name.len() as u8);

    let mut block_idx = 0_u32;
    loop {
        let block_addr = match inode_ref.get_inode_dblk_idx(block_idx, false) {
            Ok(addr) => addr,
            Err(_) => {
                return append_new_block(inode_ref, sb, name, child_inode, file_type, required_len);
            }
        };

        let has_csum = inode_ref.sb().has_ro_compat_feature(EXT4_FEATURE_RO_COMPAT_METADATA_CSUM);
        let block_size = inode_ref.sb().block_size() as usize;
        let uuid = inode_ref.sb().inner().uuid;
        let inode_index = inode_ref.index();
        let inode_generation = inode_ref.generation()?;

        let bdev = inode_ref.bdev();
        let mut block = Block::get(bdev, block_addr)?;

        let insert_result = block.with_data_mut(|data| {
            let result = find_and_insert_entry(data, name, child_inode, file_type, required_len);
            if result {
                update_dir_block_checksum(has_csum, &uuid, inode_index, inode_generation, data, block_size);
            }
            result
        })?;

        drop(block);

        if insert_result {
            return Ok(());
        }

        block_idx += 1;
    }
}

/// Scans a single block's dirents for room, splitting a live entry's slack
/// or reusing a deleted one. Returns `false` if nothing fits.
fn find_and_insert_entry(
    data: &mut [u8],
    name: &str,
    child_inode: u32,
    file_type: u8,
    required_len: u16,
) -> bool {
    let mut offset = 0;

    while offset < data.len() {
        if offset + core::mem::size_of::<ext4_dir_entry>() > data.len() {
            break;
        }

        let entry = unsafe { &*(data[offset..].as_ptr() as *const ext4_dir_entry) };
        let rec_len = u16::from_le(entry.rec_len);
        if rec_len == 0 {
            break;
        }

        let entry_inode = u32::from_le(entry.inode);
        let actual_len = if entry_inode != 0 { calculate_entry_len(entry.name_len) } else { 0 };

        let free_space = match rec_len.checked_sub(actual_len) {
            Some(space) => space,
            None => {
                offset += rec_len as usize;
                continue;
            }
        };

        if free_space >= required_len {
            if entry_inode != 0 && actual_len > 0 {
                split_entry_and_insert(data, offset, actual_len, name, child_inode, file_type, required_len);
            } else {
                write_entry(data, offset, name, child_inode, file_type, rec_len);
            }
            return true;
        }

        offset += rec_len as usize;
    }

    false
}

fn split_entry_and_insert(
    data: &mut [u8],
    offset: usize,
    actual_len: u16,
    name: &str,
    child_inode: u32,
    file_type: u8,
    _required_len: u16,
) {
    let old_entry = unsafe { &mut *(data[offset..].as_mut_ptr() as *mut ext4_dir_entry) };
    let total_len = u16::from_le(old_entry.rec_len);
    old_entry.rec_len = actual_len.to_le();

    let new_offset = offset + actual_len as usize;
    let new_rec_len = total_len - actual_len;

    write_entry(data, new_offset, name, child_inode, file_type, new_rec_len);
}

fn write_entry(data: &mut [u8], offset: usize, name: &str, inode: u32, file_type: u8, rec_len: u16) {
    let entry = unsafe { &mut *(data[offset..].as_mut_ptr() as *mut ext4_dir_entry) };

    entry.inode = inode.to_le();
    entry.rec_len = rec_len.to_le();
    entry.name_len = name.len() as u8;
    entry.file_type = file_type;

    let name_bytes = name.as_bytes();
    let name_offset = offset + core::mem::size_of::<ext4_dir_entry>();
    data[name_offset..name_offset + name_bytes.len()].copy_from_slice(name_bytes);
}

/// Allocates the directory's next logical block and writes a single entry
/// spanning it, used once no existing block has room.
pub fn append_new_block<D: BlockDevice>(
    inode_ref: &mut InodeRef<D>,
    sb: &mut Superblock,
    name: &str,
    child_inode: u32,
    file_type: u8,
    _required_len: u16,
) -> Result<()> {
    let block_size = sb.block_size();
    let has_csum = sb.has_ro_compat_feature(EXT4_FEATURE_RO_COMPAT_METADATA_CSUM);

    let current_size = inode_ref.size()?;
    let logical_block = (current_size / block_size as u64) as u32;

    use crate::balloc::BlockAllocator;
    use crate::extent::get_blocks;

    let mut allocator = BlockAllocator::new();
    let (new_block_addr, _count) = get_blocks(inode_ref, sb, &mut allocator, logical_block, 1, true)?;

    let uuid = sb.inner().uuid;
    let dir_inode = inode_ref.index();
    let inode_generation = inode_ref.generation()?;

    let bdev = inode_ref.bdev();
    let mut block = Block::get_noread(bdev, new_block_addr)?;

    block.with_data_mut(|data| {
        data.fill(0);

        let entry_space = if has_csum {
            block_size as usize - core::mem::size_of::<ext4_dir_entry_tail>()
        } else {
            block_size as usize
        };

        write_entry(data, 0, name, child_inode, file_type, entry_space as u16);

        if has_csum {
            let tail_offset = block_size as usize - core::mem::size_of::<ext4_dir_entry_tail>();
            let tail = unsafe { &mut *(data[tail_offset..].as_mut_ptr() as *mut ext4_dir_entry_tail) };
            checksum::init_entry_tail(tail);
            update_dir_block_checksum(has_csum, &uuid, dir_inode, inode_generation, data, block_size as usize);
        }
    })?;

    drop(block);

    let new_size = (logical_block as u64 + 1) * block_size as u64;
    inode_ref.set_size(new_size)?;

    Ok(())
}

/// Writes a fresh directory's first block: `.` pointing at itself and
/// `..` pointing at `parent_inode`, occupying the whole block between them.
pub fn dir_init<D: BlockDevice>(dir_inode_ref: &mut InodeRef<D>, parent_inode: u32) -> Result<()> {
    let block_size = dir_inode_ref.sb().block_size();
    let has_csum = dir_inode_ref.sb().has_ro_compat_feature(EXT4_FEATURE_RO_COMPAT_METADATA_CSUM);

    let block_addr = dir_inode_ref.get_inode_dblk_idx(0, true)?;

    let uuid = dir_inode_ref.sb().inner().uuid;
    let dir_inode = dir_inode_ref.index();
    let inode_generation = dir_inode_ref.generation()?;

    let bdev = dir_inode_ref.bdev();
    let mut block = Block::get_noread(bdev, block_addr)?;

    block.with_data_mut(|data| {
        data.fill(0);

        let entry_space = if has_csum {
            block_size as usize - core::mem::size_of::<ext4_dir_entry_tail>()
        } else {
            block_size as usize
        };

        let dot_len = 12_u16;
        write_entry(data, 0, ".", dir_inode, EXT4_DE_DIR, dot_len);

        let dotdot_offset = dot_len as usize;
        let dotdot_len = (entry_space - dot_len as usize) as u16;
        write_entry(data, dotdot_offset, "..", parent_inode, EXT4_DE_DIR, dotdot_len);

        if has_csum {
            let tail_offset = block_size as usize - core::mem::size_of::<ext4_dir_entry_tail>();
            let tail = unsafe { &mut *(data[tail_offset..].as_mut_ptr() as *mut ext4_dir_entry_tail) };
            checksum::init_entry_tail(tail);
            update_dir_block_checksum(has_csum, &uuid, dir_inode, inode_generation, data, block_size as usize);
        }
    })?;

    drop(block);

    dir_inode_ref.set_size(block_size as u64)?;

    Ok(())
}

/// 8-byte-aligned record length for a name of `name_len` bytes.
fn calculate_entry_len(name_len: u8) -> u16 {
    let base_len = core::mem::size_of::<ext4_dir_entry>() + name_len as usize;
    ((base_len + 7) & !7) as u16
}

/// Recomputes the trailing checksum from scalars already pulled out of the
/// `InodeRef`, so callers don't fight the borrow checker over `bdev()`
/// while also holding `sb()`/`index()`.
pub(super) fn update_dir_block_checksum(
    has_csum: bool,
    uuid: &[u8; 16],
    inode_index: u32,
    inode_generation: u32,
    data: &mut [u8],
    block_size: usize,
) {
    if !has_csum {
        return;
    }

    let tail_offset = block_size - core::mem::size_of::<ext4_dir_entry_tail>();

    let mut csum = crate::crc::crc32c_append(crate::crc::EXT4_CRC32_INIT, uuid);
    csum = crate::crc::crc32c_append(csum, &inode_index.to_le_bytes());
    csum = crate::crc::crc32c_append(csum, &inode_generation.to_le_bytes());
    csum = crate::crc::crc32c_append(csum, &data[..tail_offset]);

    if let Some(tail) = checksum::get_tail_mut(data, block_size) {
        tail.set_checksum(csum);
    }
}

/// Removes the entry named `name`, merging its record into its
/// predecessor's `rec_len` (or marking it `inode = 0` if it's the first
/// entry in the block).
pub fn remove_entry<D: BlockDevice>(inode_ref: &mut InodeRef<D>, name: &str) -> Result<()> {
    let mut block_idx = 0_u32;
    loop {
        let block_addr = match inode_ref.get_inode_dblk_idx(block_idx, false) {
            Ok(addr) => addr,
            Err(_) => {
                return Err(Error::new(ErrorKind::NotFound, "Directory entry not found"));
            }
        };

        let has_csum = inode_ref.sb().has_ro_compat_feature(EXT4_FEATURE_RO_COMPAT_METADATA_CSUM);
        let block_size = inode_ref.sb().block_size() as usize;
        let uuid = inode_ref.sb().inner().uuid;
        let inode_index = inode_ref.index();
        let inode_generation = inode_ref.generation()?;

        let bdev = inode_ref.bdev();
        let mut block = Block::get(bdev, block_addr)?;

        let found = block.with_data_mut(|data| {
            let result = remove_entry_from_block(data, name);
            if result {
                update_dir_block_checksum(has_csum, &uuid, inode_index, inode_generation, data, block_size);
            }
            result
        })?;

        drop(block);

        if found {
            return Ok(());
        }

        block_idx += 1;
    }
}

fn remove_entry_from_block(data: &mut [u8], name: &str) -> bool {
    let mut prev_offset: Option<usize> = None;
    let mut offset = 0;

    while offset < data.len() {
        if offset + core::mem::size_of::<ext4_dir_entry>() > data.len() {
            break;
        }

        let entry = unsafe { &*(data[offset..].as_ptr() as *const ext4_dir_entry) };
        let rec_len = u16::from_le(entry.rec_len);
        if rec_len == 0 {
            break;
        }

        let entry_inode = u32::from_le(entry.inode);

        if entry_inode != 0 {
            let name_offset = offset + core::mem::size_of::<ext4_dir_entry>();
            let entry_name_len = entry.name_len as usize;

            if name_offset + entry_name_len <= data.len() {
                let entry_name = &data[name_offset..name_offset + entry_name_len];

                if entry_name == name.as_bytes() {
                    if let Some(prev_off) = prev_offset {
                        let prev_entry = unsafe { &mut *(data[prev_off..].as_mut_ptr() as *mut ext4_dir_entry) };
                        let prev_rec_len = u16::from_le(prev_entry.rec_len);
                        prev_entry.rec_len = (prev_rec_len + rec_len).to_le();
                    } else {
                        let entry_mut = unsafe { &mut *(data[offset..].as_mut_ptr() as *mut ext4_dir_entry) };
                        entry_mut.inode = 0_u32.to_le();
                    }

                    return true;
                }
            }
        }

        prev_offset = Some(offset);
        offset += rec_len as usize;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_len_rounds_up_to_8_bytes() {
        assert_eq!(calculate_entry_len(1), 16);
        assert_eq!(calculate_entry_len(2), 16);
        assert_eq!(calculate_entry_len(8), 24);
    }

    #[test]
    fn file_type_constants_match_spec() {
        assert_eq!(EXT4_DE_REG_FILE, 1);
        assert_eq!(EXT4_DE_DIR, 2);
        assert_eq!(EXT4_DE_SYMLINK, 7);
    }
}
