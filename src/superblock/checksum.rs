//! Superblock checksum computation and verification.

use crate::{
    consts::{EXT4_FEATURE_RO_COMPAT_METADATA_CSUM, EXT4_CHECKSUM_CRC32C},
    types::ext4_sblock,
    crc::EXT4_CRC32_INIT,
};

/// CRC32C of the superblock over every field preceding `checksum` itself.
pub fn compute_checksum(sb: &ext4_sblock) -> u32 {
    let sb_bytes = unsafe {
        core::slice::from_raw_parts(
            sb as *const ext4_sblock as *const u8,
            core::mem::size_of::<ext4_sblock>(),
        )
    };

    let data_to_hash = &sb_bytes[..offset_of_checksum()];
    crate::crc::crc32c_append(EXT4_CRC32_INIT, data_to_hash)
}

/// Verifies the stored checksum, or returns `true` unconditionally when
/// `METADATA_CSUM` isn't enabled — there's nothing to check.
pub fn verify_checksum(sb: &ext4_sblock) -> bool {
    let feature_ro_compat = u32::from_le(sb.feature_ro_compat);
    if (feature_ro_compat & EXT4_FEATURE_RO_COMPAT_METADATA_CSUM) == 0 {
        return true;
    }

    if sb.checksum_type != EXT4_CHECKSUM_CRC32C {
        return false;
    }

    let computed = compute_checksum(sb);
    let stored = u32::from_le(sb.checksum);

    computed == stored
}

/// Recomputes and stores the checksum, a no-op when `METADATA_CSUM` isn't
/// enabled.
pub fn set_checksum(sb: &mut ext4_sblock) {
    let feature_ro_compat = u32::from_le(sb.feature_ro_compat);
    if (feature_ro_compat & EXT4_FEATURE_RO_COMPAT_METADATA_CSUM) == 0 {
        return;
    }

    let csum = compute_checksum(sb);
    sb.checksum = csum.to_le();
}

/// Byte offset of the `checksum` field within `ext4_sblock` — the fixed
/// 1024-byte on-disk layout puts it at 1020.
fn offset_of_checksum() -> usize {
    1020
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::EXT4_SUPERBLOCK_MAGIC;

    #[test]
    fn checksum_skipped_without_feature() {
        let mut sb = ext4_sblock::default();
        sb.magic = EXT4_SUPERBLOCK_MAGIC.to_le();
        sb.feature_ro_compat = 0u32.to_le();

        assert!(verify_checksum(&sb));

        set_checksum(&mut sb);
        assert_eq!(sb.checksum, 0);
    }

    #[test]
    fn checksum_round_trips_with_feature() {
        let mut sb = ext4_sblock::default();
        sb.magic = EXT4_SUPERBLOCK_MAGIC.to_le();
        sb.feature_ro_compat = EXT4_FEATURE_RO_COMPAT_METADATA_CSUM.to_le();
        sb.checksum_type = EXT4_CHECKSUM_CRC32C;

        set_checksum(&mut sb);

        assert!(verify_checksum(&sb));
    }

    #[test]
    fn checksum_catches_corruption() {
        let mut sb = ext4_sblock::default();
        sb.magic = EXT4_SUPERBLOCK_MAGIC.to_le();
        sb.feature_ro_compat = EXT4_FEATURE_RO_COMPAT_METADATA_CSUM.to_le();
        sb.checksum_type = EXT4_CHECKSUM_CRC32C;

        set_checksum(&mut sb);
        assert!(verify_checksum(&sb));

        sb.blocks_count_lo = 12345u32.to_le();

        assert!(!verify_checksum(&sb));
    }

    #[test]
    fn compute_checksum_is_deterministic() {
        let mut sb = ext4_sblock::default();
        sb.magic = EXT4_SUPERBLOCK_MAGIC.to_le();
        sb.blocks_count_lo = 1000u32.to_le();

        let csum1 = compute_checksum(&sb);
        let csum2 = compute_checksum(&sb);
        assert_eq!(csum1, csum2);
    }
}
