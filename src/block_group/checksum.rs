//! Group descriptor checksum (the `bg_checksum` field itself, distinct from
//! the block/inode bitmap checksums computed in `balloc`/`ialloc`).

use crate::{
    consts::{EXT4_FEATURE_RO_COMPAT_GDT_CSUM, EXT4_FEATURE_RO_COMPAT_METADATA_CSUM},
    crc::{crc16, crc32c_append, EXT4_CRC32_INIT},
    superblock::Superblock,
    types::ext4_group_desc,
};

/// Byte offset of `checksum` within `ext4_group_desc` — every field before
/// it participates in the hash, and it has to be zeroed/skipped while
/// hashing the bytes after it.
const CHECKSUM_OFFSET: usize = 30;

fn desc_bytes(desc: &ext4_group_desc) -> &[u8] {
    unsafe {
        core::slice::from_raw_parts(
            desc as *const ext4_group_desc as *const u8,
            core::mem::size_of::<ext4_group_desc>(),
        )
    }
}

/// Computes `bg_checksum`: CRC32C (low 16 bits) under `METADATA_CSUM`,
/// legacy CRC16 under `GDT_CSUM` alone, or 0 if neither is enabled. Hashes
/// the UUID, the little-endian group number, every descriptor byte before
/// `checksum`, two zero bytes standing in for the field itself, then
/// whatever trails it (the 64-bit descriptor's high-word fields).
pub fn compute_checksum(sb: &Superblock, group_num: u32, desc: &ext4_group_desc) -> u16 {
    let bytes = desc_bytes(desc);
    let desc_size = sb.group_desc_size().min(bytes.len());
    let le_group = group_num.to_le_bytes();
    let zero_checksum = [0u8; 2];

    if sb.has_ro_compat_feature(EXT4_FEATURE_RO_COMPAT_METADATA_CSUM) {
        let mut csum = crc32c_append(EXT4_CRC32_INIT, sb.uuid());
        csum = crc32c_append(csum, &le_group);
        csum = crc32c_append(csum, &bytes[..CHECKSUM_OFFSET]);
        csum = crc32c_append(csum, &zero_checksum);
        if CHECKSUM_OFFSET + 2 < desc_size {
            csum = crc32c_append(csum, &bytes[CHECKSUM_OFFSET + 2..desc_size]);
        }
        (csum & 0xFFFF) as u16
    } else if sb.has_ro_compat_feature(EXT4_FEATURE_RO_COMPAT_GDT_CSUM) {
        let mut crc = crc16(0, sb.uuid());
        crc = crc16(crc, &le_group);
        crc = crc16(crc, &bytes[..CHECKSUM_OFFSET]);
        crc = crc16(crc, &zero_checksum);
        if CHECKSUM_OFFSET + 2 < desc_size {
            crc = crc16(crc, &bytes[CHECKSUM_OFFSET + 2..desc_size]);
        }
        crc
    } else {
        0
    }
}

/// Recomputes and stores `bg_checksum`, a no-op with neither checksum
/// feature enabled.
pub fn set_checksum(sb: &Superblock, group_num: u32, desc: &mut ext4_group_desc) {
    if !sb.has_ro_compat_feature(EXT4_FEATURE_RO_COMPAT_METADATA_CSUM)
        && !sb.has_ro_compat_feature(EXT4_FEATURE_RO_COMPAT_GDT_CSUM)
    {
        return;
    }

    let csum = compute_checksum(sb, group_num, desc);
    desc.checksum = csum.to_le();
}

/// Verifies `bg_checksum`, returning `true` unconditionally when neither
/// checksum feature is enabled.
pub fn verify_checksum(sb: &Superblock, group_num: u32, desc: &ext4_group_desc) -> bool {
    if !sb.has_ro_compat_feature(EXT4_FEATURE_RO_COMPAT_METADATA_CSUM)
        && !sb.has_ro_compat_feature(EXT4_FEATURE_RO_COMPAT_GDT_CSUM)
    {
        return true;
    }

    let computed = compute_checksum(sb, group_num, desc);
    u16::from_le(desc.checksum) == computed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::EXT4_MIN_BLOCK_GROUP_DESCRIPTOR_SIZE;
    use crate::types::ext4_sblock;

    fn sb_with(ro_compat: u32) -> Superblock {
        let mut inner = ext4_sblock::default();
        inner.feature_ro_compat = ro_compat.to_le();
        inner.desc_size = (EXT4_MIN_BLOCK_GROUP_DESCRIPTOR_SIZE as u16).to_le();
        Superblock::new(inner)
    }

    #[test]
    fn checksum_skipped_without_either_feature() {
        let sb = sb_with(0);
        let mut desc = ext4_group_desc::default();

        assert!(verify_checksum(&sb, 0, &desc));
        set_checksum(&sb, 0, &mut desc);
        assert_eq!(desc.checksum, 0);
    }

    #[test]
    fn metadata_csum_round_trips() {
        let sb = sb_with(EXT4_FEATURE_RO_COMPAT_METADATA_CSUM);
        let mut desc = ext4_group_desc::default();
        desc.block_bitmap_lo = 123u32.to_le();

        set_checksum(&sb, 5, &mut desc);
        assert!(verify_checksum(&sb, 5, &desc));
    }

    #[test]
    fn gdt_csum_round_trips_and_differs_from_metadata_csum() {
        let sb_gdt = sb_with(EXT4_FEATURE_RO_COMPAT_GDT_CSUM);
        let sb_meta = sb_with(EXT4_FEATURE_RO_COMPAT_METADATA_CSUM);
        let mut desc = ext4_group_desc::default();
        desc.inode_bitmap_lo = 77u32.to_le();

        set_checksum(&sb_gdt, 2, &mut desc);
        let gdt_csum = u16::from_le(desc.checksum);
        assert!(verify_checksum(&sb_gdt, 2, &desc));

        set_checksum(&sb_meta, 2, &mut desc);
        assert_ne!(u16::from_le(desc.checksum), gdt_csum);
    }

    #[test]
    fn checksum_changes_with_group_number() {
        let sb = sb_with(EXT4_FEATURE_RO_COMPAT_METADATA_CSUM);
        let desc = ext4_group_desc::default();

        let c0 = compute_checksum(&sb, 0, &desc);
        let c1 = compute_checksum(&sb, 1, &desc);
        assert_ne!(c0, c1);
    }
}
