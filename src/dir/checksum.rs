//! Per-block directory checksum (`ext4_dir_entry_tail`), written by every
//! mutation and checked by the linear reader when `METADATA_CSUM` is on.

use crate::{
    block::BlockDevice,
    consts::*,
    error::Result,
    fs::InodeRef,
    superblock::Superblock,
    types::ext4_dir_entry_tail,
};

/// Locates the trailing checksum record in a directory block, if one is
/// present and well-formed (`inode == 0`, `file_type == DIR_CSUM`, and a
/// `rec_len` spanning exactly the tail struct).
pub fn get_tail(dirent_block: &[u8], block_size: usize) -> Option<&ext4_dir_entry_tail> {
    if block_size < core::mem::size_of::<ext4_dir_entry_tail>() || dirent_block.len() < block_size {
        return None;
    }

    let tail_offset = block_size - core::mem::size_of::<ext4_dir_entry_tail>();
    let tail_bytes = &dirent_block[tail_offset..block_size];

    let tail = unsafe { &*(tail_bytes.as_ptr() as *const ext4_dir_entry_tail) };

    if tail.reserved_zero1 != 0 || tail.reserved_zero2 != 0 {
        return None;
    }
    if tail.rec_len() != core::mem::size_of::<ext4_dir_entry_tail>() as u16 {
        return None;
    }
    if tail.reserved_ft != EXT4_DIRENTRY_DIR_CSUM {
        return None;
    }

    Some(tail)
}

/// Mutable counterpart of [`get_tail`].
pub fn get_tail_mut(dirent_block: &mut [u8], block_size: usize) -> Option<&mut ext4_dir_entry_tail> {
    if block_size < core::mem::size_of::<ext4_dir_entry_tail>() || dirent_block.len() < block_size {
        return None;
    }

    let tail_offset = block_size - core::mem::size_of::<ext4_dir_entry_tail>();
    let tail_bytes = &mut dirent_block[tail_offset..block_size];

    let tail = unsafe { &mut *(tail_bytes.as_mut_ptr() as *mut ext4_dir_entry_tail) };

    if tail.reserved_zero1 != 0 || tail.reserved_zero2 != 0 {
        return None;
    }
    if tail.rec_len() != core::mem::size_of::<ext4_dir_entry_tail>() as u16 {
        return None;
    }
    if tail.reserved_ft != EXT4_DIRENTRY_DIR_CSUM {
        return None;
    }

    Some(tail)
}

/// CRC32C of `uuid + inode number + inode generation + dirent bytes`
/// (everything before the tail), or 0 without `METADATA_CSUM`.
pub fn calculate_csum<D: BlockDevice>(sb: &Superblock, inode_ref: &mut InodeRef<D>, dirent: &[u8]) -> Result<u32> {
    if !sb.has_ro_compat_feature(EXT4_FEATURE_RO_COMPAT_METADATA_CSUM) {
        return Ok(0);
    }

    let mut csum = crate::crc::crc32c_append(crate::crc::EXT4_CRC32_INIT, sb.uuid());
    csum = crate::crc::crc32c_append(csum, &inode_ref.index().to_le_bytes());
    csum = crate::crc::crc32c_append(csum, &inode_ref.generation()?.to_le_bytes());
    Ok(crate::crc::crc32c_append(csum, dirent))
}

/// Verifies the tail checksum, returning `true` unconditionally without
/// `METADATA_CSUM` and `false` if the block has no tail to check against.
pub fn verify_csum<D: BlockDevice>(
    sb: &Superblock,
    inode_ref: &mut InodeRef<D>,
    dirent_block: &[u8],
    block_size: usize,
) -> Result<bool> {
    if !sb.has_ro_compat_feature(EXT4_FEATURE_RO_COMPAT_METADATA_CSUM) {
        return Ok(true);
    }

    let tail = match get_tail(dirent_block, block_size) {
        Some(t) => t,
        None => return Ok(false),
    };

    let tail_offset = block_size - core::mem::size_of::<ext4_dir_entry_tail>();
    let csum = calculate_csum(sb, inode_ref, &dirent_block[..tail_offset])?;

    Ok(tail.checksum() == csum)
}

/// Resets a tail record to its empty, checksum-pending state.
pub fn init_entry_tail(tail: &mut ext4_dir_entry_tail) {
    tail.reserved_zero1 = 0;
    tail.reserved_zero2 = 0;
    tail.set_rec_len(core::mem::size_of::<ext4_dir_entry_tail>() as u16);
    tail.reserved_ft = EXT4_DIRENTRY_DIR_CSUM;
    tail.set_checksum(0);
}

/// Recomputes and stores the tail checksum, a no-op without `METADATA_CSUM`.
pub fn set_csum<D: BlockDevice>(
    sb: &Superblock,
    inode_ref: &mut InodeRef<D>,
    dirent_block: &mut [u8],
    block_size: usize,
) -> Result<()> {
    if !sb.has_ro_compat_feature(EXT4_FEATURE_RO_COMPAT_METADATA_CSUM) {
        return Ok(());
    }

    let tail_offset = block_size - core::mem::size_of::<ext4_dir_entry_tail>();
    let csum = calculate_csum(sb, inode_ref, &dirent_block[..tail_offset])?;

    if let Some(tail) = get_tail_mut(dirent_block, block_size) {
        tail.set_checksum(csum);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn init_entry_tail_is_well_formed() {
        let mut tail = ext4_dir_entry_tail::default();
        init_entry_tail(&mut tail);

        unsafe {
            let ptr = &tail as *const ext4_dir_entry_tail;
            assert_eq!(core::ptr::addr_of!((*ptr).reserved_zero1).read_unaligned(), 0);
            assert_eq!(core::ptr::addr_of!((*ptr).reserved_zero2).read_unaligned(), 0);
            assert_eq!(tail.rec_len(), core::mem::size_of::<ext4_dir_entry_tail>() as u16);
            assert_eq!(core::ptr::addr_of!((*ptr).reserved_ft).read_unaligned(), EXT4_DIRENTRY_DIR_CSUM);
            assert_eq!(tail.checksum(), 0);
        }
    }

    #[test]
    fn uninitialized_block_has_no_tail() {
        let block = vec![0u8; 512];
        assert!(get_tail(&block, 512).is_none());
    }

    #[test]
    fn finds_tail_once_initialized() {
        let block_size = 1024;
        let mut block = vec![0u8; block_size];

        let tail_offset = block_size - core::mem::size_of::<ext4_dir_entry_tail>();
        let tail = unsafe { &mut *(block[tail_offset..].as_mut_ptr() as *mut ext4_dir_entry_tail) };
        init_entry_tail(tail);

        let found = get_tail(&block, block_size).unwrap();
        assert_eq!(found.rec_len(), core::mem::size_of::<ext4_dir_entry_tail>() as u16);
        unsafe {
            let ptr = found as *const ext4_dir_entry_tail;
            assert_eq!(core::ptr::addr_of!((*ptr).reserved_ft).read_unaligned(), EXT4_DIRENTRY_DIR_CSUM);
        }
    }
}
