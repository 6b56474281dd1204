//! Block bitmap checksum (`bg_block_bitmap_csum_{lo,hi}`), separate from the
//! group descriptor's own `bg_checksum` in [`crate::block_group::checksum`].

use crate::{consts::*, superblock::Superblock, types::ext4_group_desc};

/// CRC32C of the bitmap's live bytes (`uuid` then the first
/// `ceil(blocks_per_group / 8)` bytes), or 0 when `METADATA_CSUM` isn't
/// enabled — there's nothing to check.
pub fn bitmap_csum(sb: &Superblock, bitmap: &[u8]) -> u32 {
    if !sb.has_ro_compat_feature(EXT4_FEATURE_RO_COMPAT_METADATA_CSUM) {
        return 0;
    }

    let blocks_per_group = sb.blocks_per_group();

    let mut csum = crate::crc::crc32c_append(crate::crc::EXT4_CRC32_INIT, sb.uuid());

    let bitmap_size = ((blocks_per_group + 7) / 8) as usize;
    csum = crate::crc::crc32c_append(csum, &bitmap[..bitmap_size]);

    csum
}

/// Recomputes and stores the block bitmap checksum in `bg`, a no-op when
/// `METADATA_CSUM` isn't enabled.
pub fn set_bitmap_csum(sb: &Superblock, bg: &mut ext4_group_desc, bitmap: &[u8]) {
    if !sb.has_ro_compat_feature(EXT4_FEATURE_RO_COMPAT_METADATA_CSUM) {
        return;
    }

    let csum = bitmap_csum(sb, bitmap);
    let lo_csum = (csum & 0xFFFF) as u16;
    let hi_csum = ((csum >> 16) & 0xFFFF) as u16;

    bg.block_bitmap_csum_lo = lo_csum.to_le();

    if sb.group_desc_size() == EXT4_MAX_BLOCK_GROUP_DESCRIPTOR_SIZE {
        bg.block_bitmap_csum_hi = hi_csum.to_le();
    }
}

/// Verifies the block bitmap checksum, returning `true` unconditionally
/// when `METADATA_CSUM` isn't enabled.
pub fn verify_bitmap_csum(sb: &Superblock, bg: &ext4_group_desc, bitmap: &[u8]) -> bool {
    if !sb.has_ro_compat_feature(EXT4_FEATURE_RO_COMPAT_METADATA_CSUM) {
        return true;
    }

    let csum = bitmap_csum(sb, bitmap);
    let lo_csum = (csum & 0xFFFF) as u16;
    let hi_csum = ((csum >> 16) & 0xFFFF) as u16;

    if u16::from_le(bg.block_bitmap_csum_lo) != lo_csum {
        return false;
    }

    if sb.group_desc_size() == EXT4_MAX_BLOCK_GROUP_DESCRIPTOR_SIZE
        && u16::from_le(bg.block_bitmap_csum_hi) != hi_csum
    {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ext4_sblock;
    use alloc::vec;

    #[test]
    fn csum_is_zero_without_metadata_csum_feature() {
        let bitmap = vec![0u8; 1024];
        let sb = Superblock::new(ext4_sblock::default());

        assert_eq!(bitmap_csum(&sb, &bitmap), 0);
        assert!(verify_bitmap_csum(&sb, &ext4_group_desc::default(), &bitmap));
    }

    #[test]
    fn csum_round_trips_with_metadata_csum_feature() {
        let mut sb_inner = ext4_sblock::default();
        sb_inner.feature_ro_compat = EXT4_FEATURE_RO_COMPAT_METADATA_CSUM.to_le();
        sb_inner.blocks_per_group = 32768u32.to_le();
        sb_inner.desc_size = (EXT4_MIN_BLOCK_GROUP_DESCRIPTOR_SIZE as u16).to_le();
        let sb = Superblock::new(sb_inner);

        let bitmap = vec![0xAAu8; 4096];
        let mut bg = ext4_group_desc::default();

        set_bitmap_csum(&sb, &mut bg, &bitmap);
        assert!(verify_bitmap_csum(&sb, &bg, &bitmap));
    }

    #[test]
    fn csum_detects_bitmap_corruption() {
        let mut sb_inner = ext4_sblock::default();
        sb_inner.feature_ro_compat = EXT4_FEATURE_RO_COMPAT_METADATA_CSUM.to_le();
        sb_inner.blocks_per_group = 32768u32.to_le();
        sb_inner.desc_size = (EXT4_MIN_BLOCK_GROUP_DESCRIPTOR_SIZE as u16).to_le();
        let sb = Superblock::new(sb_inner);

        let mut bitmap = vec![0xAAu8; 4096];
        let mut bg = ext4_group_desc::default();
        set_bitmap_csum(&sb, &mut bg, &bitmap);

        bitmap[0] ^= 0xFF;
        assert!(!verify_bitmap_csum(&sb, &bg, &bitmap));
    }
}
