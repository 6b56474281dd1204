//! Superblock reading and structural validation.

use crate::{
    block::{BlockDev, BlockDevice},
    consts::*,
    error::{Error, ErrorKind, Result},
    types::ext4_sblock,
};
use crate::consts::{
    EXT4_FEATURE_RO_COMPAT_METADATA_CSUM,
    EXT4_FEATURE_RO_COMPAT_SPARSE_SUPER,
    EXT4_FEATURE_INCOMPAT_META_BG,
    EXT4_MIN_BLOCK_GROUP_DESCRIPTOR_SIZE,
    EXT4_MAX_BLOCK_GROUP_DESCRIPTOR_SIZE,
};
use alloc::vec;

/// Reads the primary superblock (always at byte offset 1024) from `bdev`.
pub fn read_superblock<D: BlockDevice>(bdev: &mut BlockDev<D>) -> Result<ext4_sblock> {
    let mut sb_buf = vec![0u8; EXT4_SUPERBLOCK_SIZE];

    bdev.read_bytes(EXT4_SUPERBLOCK_OFFSET, &mut sb_buf)?;

    let sb = unsafe {
        core::ptr::read_unaligned(sb_buf.as_ptr() as *const ext4_sblock)
    };

    if !sb.is_valid() {
        return Err(Error::new(
            ErrorKind::Corrupted,
            "Invalid ext4 superblock magic number",
        ));
    }

    Ok(sb)
}

/// Typed view over the raw on-disk superblock, with the derived quantities
/// (block group count, GDT size, sparse-super membership, ...) callers
/// actually need.
pub struct Superblock {
    pub(super) inner: ext4_sblock,
}

impl Superblock {
    /// Wraps an already-parsed superblock, mainly for tests.
    pub fn new(inner: ext4_sblock) -> Self {
        Self { inner }
    }

    /// Loads and validates the superblock from `bdev`.
    pub fn load<D: BlockDevice>(bdev: &mut BlockDev<D>) -> Result<Self> {
        let inner = read_superblock(bdev)?;
        Ok(Self { inner })
    }

    pub fn inner(&self) -> &ext4_sblock {
        &self.inner
    }

    pub fn block_size(&self) -> u32 {
        self.inner.block_size()
    }

    pub fn inode_size(&self) -> u16 {
        self.inner.inode_size()
    }

    pub fn blocks_count(&self) -> u64 {
        self.inner.blocks_count()
    }

    pub fn free_blocks_count(&self) -> u64 {
        self.inner.free_blocks_count()
    }

    pub fn inodes_count(&self) -> u32 {
        u32::from_le(self.inner.inodes_count)
    }

    pub fn free_inodes_count(&self) -> u32 {
        u32::from_le(self.inner.free_inodes_count)
    }

    pub fn blocks_per_group(&self) -> u32 {
        u32::from_le(self.inner.blocks_per_group)
    }

    pub fn inodes_per_group(&self) -> u32 {
        u32::from_le(self.inner.inodes_per_group)
    }

    pub fn block_group_count(&self) -> u32 {
        self.inner.block_group_count()
    }

    pub fn first_data_block(&self) -> u32 {
        u32::from_le(self.inner.first_data_block)
    }

    pub fn has_compat_feature(&self, feature: u32) -> bool {
        (u32::from_le(self.inner.feature_compat) & feature) != 0
    }

    pub fn has_incompat_feature(&self, feature: u32) -> bool {
        (u32::from_le(self.inner.feature_incompat) & feature) != 0
    }

    pub fn has_ro_compat_feature(&self, feature: u32) -> bool {
        (u32::from_le(self.inner.feature_ro_compat) & feature) != 0
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        (u32::from_le(self.inner.flags) & flag) != 0
    }

    /// Seed used by the HTree hash function.
    pub fn hash_seed(&self) -> [u32; 4] {
        [
            u32::from_le(self.inner.hash_seed[0]),
            u32::from_le(self.inner.hash_seed[1]),
            u32::from_le(self.inner.hash_seed[2]),
            u32::from_le(self.inner.hash_seed[3]),
        ]
    }

    pub fn has_extents(&self) -> bool {
        self.has_incompat_feature(EXT4_FEATURE_INCOMPAT_EXTENTS)
    }

    pub fn is_64bit(&self) -> bool {
        self.has_incompat_feature(EXT4_FEATURE_INCOMPAT_64BIT)
    }

    /// Size of one group descriptor: `desc_size` when 64-bit group
    /// descriptors are enabled and non-zero, else the fixed 32-bit size.
    pub fn group_desc_size(&self) -> usize {
        if self.is_64bit() {
            let size = u16::from_le(self.inner.desc_size) as usize;
            if size > 0 {
                size
            } else {
                EXT4_GROUP_DESC_SIZE_64
            }
        } else {
            EXT4_GROUP_DESC_SIZE
        }
    }

    pub fn volume_name(&self) -> Option<&str> {
        let len = self.inner.volume_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.inner.volume_name.len());

        core::str::from_utf8(&self.inner.volume_name[..len]).ok()
    }

    pub fn uuid(&self) -> &[u8; 16] {
        &self.inner.uuid
    }

    pub fn has_metadata_csum(&self) -> bool {
        self.has_ro_compat_feature(EXT4_FEATURE_RO_COMPAT_METADATA_CSUM)
    }

    pub fn is_clean(&self) -> bool {
        const EXT4_VALID_FS: u16 = 0x0001;
        (u16::from_le(self.inner.state) & EXT4_VALID_FS) != 0
    }

    /// Inode of the head of the orphan-inode list, or 0 if empty. Orphan
    /// processing itself (reclaiming inodes unlinked while still open when
    /// the filesystem last crashed) is a file-layer concern; this is the
    /// narrow accessor that layer needs instead of reaching into raw bytes.
    pub fn last_orphan(&self) -> u32 {
        self.inner.last_orphan()
    }

    pub fn set_last_orphan(&mut self, ino: u32) {
        self.inner.set_last_orphan(ino);
    }

    pub fn kbytes_written(&self) -> u64 {
        self.inner.kbytes_written()
    }

    pub fn mnt_count(&self) -> u16 {
        self.inner.mnt_count()
    }

    /// Full structural check: magic, non-zero counters, size ranges, group
    /// descriptor size bounds, and the metadata checksum if enabled.
    pub fn check(&self) -> Result<()> {
        if !self.inner.is_valid() {
            return Err(Error::new(
                ErrorKind::Corrupted,
                "Invalid ext4 superblock magic number",
            ));
        }

        if self.inodes_count() == 0 {
            return Err(Error::new(
                ErrorKind::Corrupted,
                "Superblock inodes_count is zero",
            ));
        }

        if self.blocks_count() == 0 {
            return Err(Error::new(
                ErrorKind::Corrupted,
                "Superblock blocks_count is zero",
            ));
        }

        if self.blocks_per_group() == 0 {
            return Err(Error::new(
                ErrorKind::Corrupted,
                "Superblock blocks_per_group is zero",
            ));
        }

        if self.inodes_per_group() == 0 {
            return Err(Error::new(
                ErrorKind::Corrupted,
                "Superblock inodes_per_group is zero",
            ));
        }

        if self.inode_size() < 128 {
            return Err(Error::new(
                ErrorKind::Corrupted,
                "Superblock inode_size is less than 128",
            ));
        }

        if self.first_data_block() < 11 && self.inodes_count() > 10 {
            return Err(Error::new(
                ErrorKind::Corrupted,
                "Superblock first_inode is less than 11",
            ));
        }

        let desc_size = self.group_desc_size();
        if desc_size < EXT4_MIN_BLOCK_GROUP_DESCRIPTOR_SIZE {
            return Err(Error::new(
                ErrorKind::Corrupted,
                "Block group descriptor size too small",
            ));
        }
        if desc_size > EXT4_MAX_BLOCK_GROUP_DESCRIPTOR_SIZE {
            return Err(Error::new(
                ErrorKind::Corrupted,
                "Block group descriptor size too large",
            ));
        }

        if !self.verify_checksum() {
            return Err(Error::new(
                ErrorKind::Corrupted,
                "Superblock checksum verification failed",
            ));
        }

        Ok(())
    }

    pub fn verify_checksum(&self) -> bool {
        super::checksum::verify_checksum(&self.inner)
    }

    pub fn compute_checksum(&self) -> u32 {
        super::checksum::compute_checksum(&self.inner)
    }

    /// Number of blocks actually belonging to group `bgid` — every group
    /// but the last holds a full `blocks_per_group`; the last holds
    /// whatever remains.
    pub fn blocks_in_group_cnt(&self, bgid: u32) -> u32 {
        let block_group_count = self.block_group_count();
        let blocks_per_group = self.blocks_per_group();
        let total_blocks = self.blocks_count();

        if bgid < block_group_count - 1 {
            blocks_per_group
        } else {
            (total_blocks - ((block_group_count as u64 - 1) * blocks_per_group as u64)) as u32
        }
    }

    /// Number of inodes actually belonging to group `bgid`, following the
    /// same last-group-is-a-remainder rule as [`Self::blocks_in_group_cnt`].
    pub fn inodes_in_group_cnt(&self, bgid: u32) -> u32 {
        let block_group_count = self.block_group_count();
        let inodes_per_group = self.inodes_per_group();
        let total_inodes = self.inodes_count();

        if bgid < block_group_count - 1 {
            inodes_per_group
        } else {
            total_inodes - ((block_group_count - 1) * inodes_per_group)
        }
    }

    /// Whether `group` holds a superblock/GDT backup under the
    /// `SPARSE_SUPER` placement rule (groups 0, 1, and powers of 3/5/7),
    /// independent of whether the feature is actually enabled.
    pub fn is_sparse_group(group: u32) -> bool {
        if group <= 1 {
            return true;
        }

        if (group & 1) == 0 {
            return false;
        }

        is_power_of(group, 7) || is_power_of(group, 5) || is_power_of(group, 3)
    }

    /// Whether group `group` carries a superblock/GDT backup, honoring
    /// `SPARSE_SUPER` when set and defaulting to "every group" otherwise.
    pub fn has_super_in_bg(&self, group: u32) -> bool {
        if self.has_ro_compat_feature(EXT4_FEATURE_RO_COMPAT_SPARSE_SUPER) {
            Self::is_sparse_group(group)
        } else {
            true
        }
    }

    /// GDT blocks group `group` carries under `META_BG` layout: only the
    /// first, second, and last group of each meta-group hold a copy.
    fn num_gdb_meta(&self, group: u32) -> u32 {
        let dsc_per_block = self.block_size() / self.group_desc_size() as u32;
        let metagroup = group / dsc_per_block;
        let first = metagroup * dsc_per_block;
        let last = first + dsc_per_block - 1;

        if group == first || group == first + 1 || group == last {
            1
        } else {
            0
        }
    }

    /// GDT blocks group `group` carries outside `META_BG` layout: the
    /// whole descriptor table if the group has a superblock at all.
    fn num_gdb_nometa(&self, group: u32) -> u32 {
        if !self.has_super_in_bg(group) {
            return 0;
        }

        let dsc_per_block = self.block_size() / self.group_desc_size() as u32;
        let db_count = (self.block_group_count() + dsc_per_block - 1) / dsc_per_block;

        if self.has_incompat_feature(EXT4_FEATURE_INCOMPAT_META_BG) {
            u32::from_le(self.inner.first_meta_bg)
        } else {
            db_count
        }
    }

    /// Number of blocks the group descriptor table occupies within group
    /// `group`.
    pub fn num_gdb(&self, group: u32) -> u32 {
        let dsc_per_block = self.block_size() / self.group_desc_size() as u32;
        let first_meta_bg = u32::from_le(self.inner.first_meta_bg);
        let metagroup = group / dsc_per_block;

        if !self.has_incompat_feature(EXT4_FEATURE_INCOMPAT_META_BG) || metagroup < first_meta_bg {
            self.num_gdb_nometa(group)
        } else {
            self.num_gdb_meta(group)
        }
    }

    /// Clusters consumed by fixed metadata (superblock, GDT, reserved GDT
    /// blocks) in `block_group`. `reserved_gdt_blocks` only applies outside
    /// `META_BG`, so the group-descriptor-table reader must skip it
    /// precisely where this accounts for it — getting this wrong
    /// miscomputes every subsequent offset for `META_BG` layouts.
    pub fn num_base_meta_clusters(&self, block_group: u32) -> u32 {
        let dsc_per_block = self.block_size() / self.group_desc_size() as u32;

        let mut num = if self.has_super_in_bg(block_group) { 1 } else { 0 };

        if !self.has_incompat_feature(EXT4_FEATURE_INCOMPAT_META_BG)
            || block_group < u32::from_le(self.inner.first_meta_bg) * dsc_per_block
        {
            if num > 0 {
                num += self.num_gdb(block_group);
                num += u16::from_le(self.inner.reserved_gdt_blocks) as u32;
            }
        } else {
            num += self.num_gdb(block_group);
        }

        let log_cluster_size = u32::from_le(self.inner.log_cluster_size);
        let cluster_ratio = 1u32 << log_cluster_size;

        (num + cluster_ratio - 1) >> log_cluster_size
    }
}

fn is_power_of(mut a: u32, b: u32) -> bool {
    loop {
        if a < b {
            return false;
        }
        if a == b {
            return true;
        }
        if (a % b) != 0 {
            return false;
        }
        a /= b;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_requires_magic() {
        let mut sb = ext4_sblock::default();

        assert!(!sb.is_valid());

        sb.magic = EXT4_SUPERBLOCK_MAGIC.to_le();
        assert!(sb.is_valid());
    }

    #[test]
    fn derived_helpers_match_fields() {
        let mut sb = ext4_sblock::default();
        sb.magic = EXT4_SUPERBLOCK_MAGIC.to_le();
        sb.log_block_size = 2u32.to_le(); // 4096 = 1024 << 2
        sb.blocks_count_lo = 1000u32.to_le();
        sb.blocks_per_group = 100u32.to_le();

        assert_eq!(sb.block_size(), 4096);
        assert_eq!(sb.blocks_count(), 1000);
        assert_eq!(sb.block_group_count(), 10);
    }

    #[test]
    fn blocks_in_group_cnt_accounts_for_partial_last_group() {
        let mut sb = ext4_sblock::default();
        sb.magic = EXT4_SUPERBLOCK_MAGIC.to_le();
        sb.log_block_size = 2u32.to_le();
        sb.blocks_count_lo = 950u32.to_le(); // not a multiple of 100
        sb.blocks_per_group = 100u32.to_le();

        let superblock = Superblock { inner: sb };

        assert_eq!(superblock.block_group_count(), 10);

        for bgid in 0..9 {
            assert_eq!(superblock.blocks_in_group_cnt(bgid), 100);
        }

        assert_eq!(superblock.blocks_in_group_cnt(9), 50);
    }

    #[test]
    fn inodes_in_group_cnt_accounts_for_partial_last_group() {
        let mut sb = ext4_sblock::default();
        sb.magic = EXT4_SUPERBLOCK_MAGIC.to_le();
        sb.log_block_size = 2u32.to_le();
        sb.blocks_count_lo = 1000u32.to_le();
        sb.blocks_per_group = 100u32.to_le();
        sb.inodes_count = 9050u32.to_le(); // not a multiple of 1000
        sb.inodes_per_group = 1000u32.to_le();

        let superblock = Superblock { inner: sb };

        assert_eq!(superblock.block_group_count(), 10);

        for bgid in 0..9 {
            assert_eq!(superblock.inodes_in_group_cnt(bgid), 1000);
        }

        assert_eq!(superblock.inodes_in_group_cnt(9), 50);
    }

    #[test]
    fn last_orphan_round_trips() {
        let mut superblock = Superblock { inner: ext4_sblock::default() };
        assert_eq!(superblock.last_orphan(), 0);
        superblock.set_last_orphan(42);
        assert_eq!(superblock.last_orphan(), 42);
    }
}
