//! On-disk structures.
//!
//! These mirror the on-disk byte layout directly (`#[repr(C)]`/`#[repr(C,
//! packed)]`), so field names follow the format's own naming rather than
//! Rust convention, and every multi-byte field is accessed through an
//! explicit `from_le`/`to_le` accessor instead of relying on the host being
//! little-endian.

#![allow(non_camel_case_types)]

use crate::consts::*;

/// The filesystem superblock (`ext4_super_block`), at byte offset 1024.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ext4_sblock {
    pub inodes_count: u32,
    pub blocks_count_lo: u32,
    pub r_blocks_count_lo: u32,
    pub free_blocks_count_lo: u32,
    pub free_inodes_count: u32,
    pub first_data_block: u32,
    pub log_block_size: u32,
    pub log_cluster_size: u32,
    pub blocks_per_group: u32,
    pub clusters_per_group: u32,
    pub inodes_per_group: u32,
    pub mtime: u32,
    pub wtime: u32,
    pub mnt_count: u16,
    pub max_mnt_count: u16,
    pub magic: u16,
    pub state: u16,
    pub errors: u16,
    pub minor_rev_level: u16,
    pub lastcheck: u32,
    pub checkinterval: u32,
    pub creator_os: u32,
    pub rev_level: u32,
    pub def_resuid: u16,
    pub def_resgid: u16,

    pub first_ino: u32,
    pub inode_size: u16,
    pub block_group_nr: u16,
    pub feature_compat: u32,
    pub feature_incompat: u32,
    pub feature_ro_compat: u32,

    pub uuid: [u8; 16],
    pub volume_name: [u8; 16],
    pub last_mounted: [u8; 64],
    pub algorithm_usage_bitmap: u32,

    pub prealloc_blocks: u8,
    pub prealloc_dir_blocks: u8,
    pub reserved_gdt_blocks: u16,

    pub journal_uuid: [u8; 16],
    pub journal_inum: u32,
    pub journal_dev: u32,
    pub last_orphan: u32,
    pub hash_seed: [u32; 4],
    pub def_hash_version: u8,
    pub jnl_backup_type: u8,
    pub desc_size: u16,
    pub default_mount_opts: u32,
    pub first_meta_bg: u32,
    pub mkfs_time: u32,
    pub jnl_blocks: [u32; 17],

    pub blocks_count_hi: u32,
    pub r_blocks_count_hi: u32,
    pub free_blocks_count_hi: u32,
    pub min_extra_isize: u16,
    pub want_extra_isize: u16,
    pub flags: u32,
    pub raid_stride: u16,
    pub mmp_interval: u16,
    pub mmp_block: u64,
    pub raid_stripe_width: u32,
    pub log_groups_per_flex: u8,
    pub checksum_type: u8,
    pub reserved_pad: u16,
    pub kbytes_written: u64,
    pub snapshot_inum: u32,
    pub snapshot_id: u32,
    pub snapshot_r_blocks_count: u64,
    pub snapshot_list: u32,
    pub error_count: u32,
    pub first_error_time: u32,
    pub first_error_ino: u32,
    pub first_error_block: u64,
    pub first_error_func: [u8; 32],
    pub first_error_line: u32,
    pub last_error_time: u32,
    pub last_error_ino: u32,
    pub last_error_line: u32,
    pub last_error_block: u64,
    pub last_error_func: [u8; 32],
    pub mount_opts: [u8; 64],
    pub usr_quota_inum: u32,
    pub grp_quota_inum: u32,
    pub overhead_blocks: u32,
    pub backup_bgs: [u32; 2],
    pub encrypt_algos: [u8; 4],
    pub encrypt_pw_salt: [u8; 16],
    pub lpf_ino: u32,
    pub prj_quota_inum: u32,
    pub checksum_seed: u32,
    pub reserved: [u32; 98],
    pub checksum: u32,
}

impl Default for ext4_sblock {
    fn default() -> Self {
        unsafe { core::mem::zeroed() }
    }
}

impl ext4_sblock {
    pub fn block_size(&self) -> u32 {
        1024 << u32::from_le(self.log_block_size)
    }

    pub fn inode_size(&self) -> u16 {
        match u16::from_le(self.inode_size) {
            0 => 128,
            size => size,
        }
    }

    pub fn blocks_count(&self) -> u64 {
        (u32::from_le(self.blocks_count_lo) as u64) | ((u32::from_le(self.blocks_count_hi) as u64) << 32)
    }

    pub fn free_blocks_count(&self) -> u64 {
        (u32::from_le(self.free_blocks_count_lo) as u64)
            | ((u32::from_le(self.free_blocks_count_hi) as u64) << 32)
    }

    pub fn block_group_count(&self) -> u32 {
        let blocks_count = self.blocks_count();
        let blocks_per_group = u32::from_le(self.blocks_per_group) as u64;
        ((blocks_count + blocks_per_group - 1) / blocks_per_group) as u32
    }

    pub fn is_valid(&self) -> bool {
        u16::from_le(self.magic) == EXT4_SUPERBLOCK_MAGIC
    }

    pub fn free_inodes_count(&self) -> u32 {
        u32::from_le(self.free_inodes_count)
    }

    pub fn inodes_per_group(&self) -> u32 {
        u32::from_le(self.inodes_per_group)
    }

    pub fn blocks_per_group(&self) -> u32 {
        u32::from_le(self.blocks_per_group)
    }

    pub fn first_data_block(&self) -> u32 {
        u32::from_le(self.first_data_block)
    }

    pub fn feature_compat(&self) -> u32 {
        u32::from_le(self.feature_compat)
    }

    pub fn feature_incompat(&self) -> u32 {
        u32::from_le(self.feature_incompat)
    }

    pub fn feature_ro_compat(&self) -> u32 {
        u32::from_le(self.feature_ro_compat)
    }

    pub fn desc_size(&self) -> u16 {
        if self.feature_incompat() & EXT4_FEATURE_INCOMPAT_64BIT != 0 {
            let size = u16::from_le(self.desc_size);
            if size == 0 {
                EXT4_GROUP_DESC_SIZE as u16
            } else {
                size
            }
        } else {
            EXT4_GROUP_DESC_SIZE as u16
        }
    }

    /// Head of the orphan inode singly-linked list (external unlink-while-open
    /// recovery uses this; the core only exposes the field).
    pub fn last_orphan(&self) -> u32 {
        u32::from_le(self.last_orphan)
    }

    pub fn set_last_orphan(&mut self, ino: u32) {
        self.last_orphan = ino.to_le();
    }

    pub fn reserved_gdt_blocks(&self) -> u16 {
        u16::from_le(self.reserved_gdt_blocks)
    }

    pub fn mnt_count(&self) -> u16 {
        u16::from_le(self.mnt_count)
    }

    pub fn set_mnt_count(&mut self, count: u16) {
        self.mnt_count = count.to_le();
    }

    pub fn kbytes_written(&self) -> u64 {
        u64::from_le(self.kbytes_written)
    }

    pub fn set_kbytes_written(&mut self, kb: u64) {
        self.kbytes_written = kb.to_le();
    }

    pub fn checksum_type(&self) -> u8 {
        self.checksum_type
    }

    pub fn has_metadata_csum(&self) -> bool {
        self.feature_ro_compat() & EXT4_FEATURE_RO_COMPAT_METADATA_CSUM != 0
    }

    pub fn has_gdt_csum(&self) -> bool {
        self.feature_ro_compat() & EXT4_FEATURE_RO_COMPAT_GDT_CSUM != 0
    }
}

/// An inode (`ext4_inode`).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ext4_inode {
    pub mode: u16,
    pub uid: u16,
    pub size_lo: u32,
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub dtime: u32,
    pub gid: u16,
    pub links_count: u16,
    pub blocks_count_lo: u32,
    pub flags: u32,
    pub osd1: u32,
    pub blocks: [u32; EXT4_INODE_BLOCKS],
    pub generation: u32,
    pub file_acl_lo: u32,
    pub size_hi: u32,
    pub obso_faddr: u32,

    pub blocks_high: u16,
    pub file_acl_high: u16,
    pub uid_high: u16,
    pub gid_high: u16,
    pub checksum_lo: u16,
    pub reserved: u16,

    pub extra_isize: u16,
    pub checksum_hi: u16,
    pub ctime_extra: u32,
    pub mtime_extra: u32,
    pub atime_extra: u32,
    pub crtime: u32,
    pub crtime_extra: u32,
    pub version_hi: u32,
    pub projid: u32,
}

impl Default for ext4_inode {
    fn default() -> Self {
        unsafe { core::mem::zeroed() }
    }
}

impl ext4_inode {
    pub fn file_size(&self) -> u64 {
        (u32::from_le(self.size_lo) as u64) | ((u32::from_le(self.size_hi) as u64) << 32)
    }

    pub fn set_file_size(&mut self, size: u64) {
        self.size_lo = (size as u32).to_le();
        self.size_hi = ((size >> 32) as u32).to_le();
    }

    pub fn blocks_count(&self) -> u64 {
        (u32::from_le(self.blocks_count_lo) as u64) | ((u16::from_le(self.blocks_high) as u64) << 32)
    }

    pub fn set_blocks_count(&mut self, count: u64) {
        self.blocks_count_lo = (count as u32).to_le();
        self.blocks_high = ((count >> 32) as u16).to_le();
    }

    pub fn mode(&self) -> u16 {
        u16::from_le(self.mode)
    }

    pub fn set_mode(&mut self, mode: u16) {
        self.mode = mode.to_le();
    }

    pub fn links_count(&self) -> u16 {
        u16::from_le(self.links_count)
    }

    pub fn set_links_count(&mut self, count: u16) {
        self.links_count = count.to_le();
    }

    pub fn flags(&self) -> u32 {
        u32::from_le(self.flags)
    }

    pub fn set_flags(&mut self, flags: u32) {
        self.flags = flags.to_le();
    }

    pub fn has_extents(&self) -> bool {
        self.flags() & EXT4_INODE_FLAG_EXTENTS != 0
    }

    pub fn is_dir(&self) -> bool {
        (self.mode() & EXT4_INODE_MODE_TYPE_MASK) == EXT4_INODE_MODE_DIRECTORY
    }

    pub fn is_file(&self) -> bool {
        (self.mode() & EXT4_INODE_MODE_TYPE_MASK) == EXT4_INODE_MODE_FILE
    }

    pub fn is_symlink(&self) -> bool {
        (self.mode() & EXT4_INODE_MODE_TYPE_MASK) == EXT4_INODE_MODE_SOFTLINK
    }

    /// Shared xattr block, if any (`file_acl`). Value storage is external;
    /// the core only needs this to drop the block's refcount on free.
    pub fn file_acl(&self) -> u64 {
        (u32::from_le(self.file_acl_lo) as u64) | ((u16::from_le(self.file_acl_high) as u64) << 32)
    }

    pub fn set_file_acl(&mut self, block: u64) {
        self.file_acl_lo = (block as u32).to_le();
        self.file_acl_high = ((block >> 32) as u16).to_le();
    }

    pub fn checksum(&self) -> u32 {
        (u16::from_le(self.checksum_lo) as u32) | ((u16::from_le(self.checksum_hi) as u32) << 16)
    }

    pub fn set_checksum(&mut self, csum: u32) {
        self.checksum_lo = (csum as u16).to_le();
        self.checksum_hi = ((csum >> 16) as u16).to_le();
    }

    pub fn extra_isize(&self) -> u16 {
        u16::from_le(self.extra_isize)
    }

    pub fn generation(&self) -> u32 {
        u32::from_le(self.generation)
    }
}

/// A directory entry (`ext4_dir_entry_2`), followed in the block by `name_len`
/// bytes of name (not part of this struct — callers slice past the header).
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct ext4_dir_entry {
    pub inode: u32,
    pub rec_len: u16,
    pub name_len: u8,
    pub file_type: u8,
}

pub type ext4_dir_en = ext4_dir_entry;

impl ext4_dir_entry {
    pub fn inode(&self) -> u32 {
        u32::from_le(self.inode)
    }

    pub fn set_inode(&mut self, inode: u32) {
        self.inode = inode.to_le();
    }

    pub fn rec_len(&self) -> u16 {
        u16::from_le(self.rec_len)
    }

    pub fn set_rec_len(&mut self, len: u16) {
        self.rec_len = len.to_le();
    }

    pub fn name_len(&self) -> u8 {
        self.name_len
    }

    pub fn file_type(&self) -> u8 {
        self.file_type
    }
}

/// Minimal HTree root-info header (`ext4_dir_idx_root_info`), kept only so
/// the linear directory reader can tell a structurally sound `dx_root` from
/// a corrupted one while skipping over it (HTree construction/traversal
/// itself is not part of this crate).
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct ext4_dir_idx_rinfo {
    pub reserved_zero: u32,
    pub hash_version: u8,
    pub info_length: u8,
    pub indirect_levels: u8,
    pub unused_flags: u8,
}

impl Default for ext4_dir_idx_rinfo {
    fn default() -> Self {
        unsafe { core::mem::zeroed() }
    }
}

impl ext4_dir_idx_rinfo {
    pub fn reserved_zero(&self) -> u32 {
        u32::from_le(self.reserved_zero)
    }

    pub fn info_length(&self) -> u8 {
        self.info_length
    }

    /// Structural sanity check lwext4 applies before trusting a root-info
    /// header; failing it distinguishes real corruption from "just not
    /// indexed" when the core notices a `dx_root`-shaped block in passing.
    pub fn is_sane(&self) -> bool {
        self.reserved_zero() == 0 && self.info_length() == 8
    }
}

/// Directory block checksum tail (`ext4_dir_entry_tail`), stored as a fake
/// dirent with `file_type == 0xDE` at the end of a checksummed leaf block.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct ext4_dir_entry_tail {
    pub reserved_zero1: u32,
    pub rec_len: u16,
    pub reserved_zero2: u8,
    pub reserved_ft: u8,
    pub checksum: u32,
}

impl Default for ext4_dir_entry_tail {
    fn default() -> Self {
        unsafe { core::mem::zeroed() }
    }
}

impl ext4_dir_entry_tail {
    pub fn checksum(&self) -> u32 {
        u32::from_le(self.checksum)
    }

    pub fn set_checksum(&mut self, csum: u32) {
        self.checksum = csum.to_le();
    }

    pub fn rec_len(&self) -> u16 {
        u16::from_le(self.rec_len)
    }

    pub fn set_rec_len(&mut self, len: u16) {
        self.rec_len = len.to_le();
    }

    pub fn is_tail(&self) -> bool {
        self.reserved_zero1 == 0 && self.reserved_zero2 == 0 && self.reserved_ft == EXT4_DIRENTRY_DIR_CSUM
    }
}

/// A block group descriptor (`ext4_group_desc`).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ext4_group_desc {
    pub block_bitmap_lo: u32,
    pub inode_bitmap_lo: u32,
    pub inode_table_lo: u32,
    pub free_blocks_count_lo: u16,
    pub free_inodes_count_lo: u16,
    pub used_dirs_count_lo: u16,
    pub flags: u16,
    pub exclude_bitmap_lo: u32,
    pub block_bitmap_csum_lo: u16,
    pub inode_bitmap_csum_lo: u16,
    pub itable_unused_lo: u16,
    pub checksum: u16,

    pub block_bitmap_hi: u32,
    pub inode_bitmap_hi: u32,
    pub inode_table_hi: u32,
    pub free_blocks_count_hi: u16,
    pub free_inodes_count_hi: u16,
    pub used_dirs_count_hi: u16,
    pub itable_unused_hi: u16,
    pub exclude_bitmap_hi: u32,
    pub block_bitmap_csum_hi: u16,
    pub inode_bitmap_csum_hi: u16,
    pub reserved: u32,
}

impl Default for ext4_group_desc {
    fn default() -> Self {
        unsafe { core::mem::zeroed() }
    }
}

/// `bg_flags`: inode table not yet initialized.
pub const EXT4_BG_INODE_UNINIT: u16 = 0x0001;
/// `bg_flags`: block bitmap not yet initialized.
pub const EXT4_BG_BLOCK_UNINIT: u16 = 0x0002;
/// `bg_flags`: inode table zeroed.
pub const EXT4_BG_INODE_ZEROED: u16 = 0x0004;

impl ext4_group_desc {
    pub fn block_bitmap(&self) -> u64 {
        (u32::from_le(self.block_bitmap_lo) as u64) | ((u32::from_le(self.block_bitmap_hi) as u64) << 32)
    }

    pub fn set_block_bitmap(&mut self, block: u64, has_64bit: bool) {
        self.block_bitmap_lo = (block as u32).to_le();
        if has_64bit {
            self.block_bitmap_hi = ((block >> 32) as u32).to_le();
        }
    }

    pub fn inode_bitmap(&self) -> u64 {
        (u32::from_le(self.inode_bitmap_lo) as u64) | ((u32::from_le(self.inode_bitmap_hi) as u64) << 32)
    }

    pub fn set_inode_bitmap(&mut self, block: u64, has_64bit: bool) {
        self.inode_bitmap_lo = (block as u32).to_le();
        if has_64bit {
            self.inode_bitmap_hi = ((block >> 32) as u32).to_le();
        }
    }

    pub fn inode_table(&self) -> u64 {
        (u32::from_le(self.inode_table_lo) as u64) | ((u32::from_le(self.inode_table_hi) as u64) << 32)
    }

    pub fn set_inode_table(&mut self, block: u64, has_64bit: bool) {
        self.inode_table_lo = (block as u32).to_le();
        if has_64bit {
            self.inode_table_hi = ((block >> 32) as u32).to_le();
        }
    }

    pub fn free_blocks_count(&self) -> u32 {
        (u16::from_le(self.free_blocks_count_lo) as u32) | ((u16::from_le(self.free_blocks_count_hi) as u32) << 16)
    }

    pub fn set_free_blocks_count(&mut self, count: u32, has_64bit: bool) {
        self.free_blocks_count_lo = (count as u16).to_le();
        if has_64bit {
            self.free_blocks_count_hi = ((count >> 16) as u16).to_le();
        }
    }

    pub fn free_inodes_count(&self) -> u32 {
        (u16::from_le(self.free_inodes_count_lo) as u32) | ((u16::from_le(self.free_inodes_count_hi) as u32) << 16)
    }

    pub fn set_free_inodes_count(&mut self, count: u32, has_64bit: bool) {
        self.free_inodes_count_lo = (count as u16).to_le();
        if has_64bit {
            self.free_inodes_count_hi = ((count >> 16) as u16).to_le();
        }
    }

    pub fn used_dirs_count(&self) -> u32 {
        (u16::from_le(self.used_dirs_count_lo) as u32) | ((u16::from_le(self.used_dirs_count_hi) as u32) << 16)
    }

    pub fn set_used_dirs_count(&mut self, count: u32, has_64bit: bool) {
        self.used_dirs_count_lo = (count as u16).to_le();
        if has_64bit {
            self.used_dirs_count_hi = ((count >> 16) as u16).to_le();
        }
    }

    pub fn itable_unused(&self) -> u32 {
        (u16::from_le(self.itable_unused_lo) as u32) | ((u16::from_le(self.itable_unused_hi) as u32) << 16)
    }

    pub fn set_itable_unused(&mut self, count: u32, has_64bit: bool) {
        self.itable_unused_lo = (count as u16).to_le();
        if has_64bit {
            self.itable_unused_hi = ((count >> 16) as u16).to_le();
        }
    }

    pub fn flags(&self) -> u16 {
        u16::from_le(self.flags)
    }

    pub fn set_flags(&mut self, flags: u16) {
        self.flags = flags.to_le();
    }

    pub fn checksum(&self) -> u16 {
        u16::from_le(self.checksum)
    }

    pub fn set_checksum(&mut self, csum: u16) {
        self.checksum = csum.to_le();
    }
}

/// Extent tree node header (`ext4_extent_header`).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ext4_extent_header {
    pub magic: u16,
    pub entries: u16,
    pub max: u16,
    pub depth: u16,
    pub generation: u32,
}

impl Default for ext4_extent_header {
    fn default() -> Self {
        unsafe { core::mem::zeroed() }
    }
}

impl ext4_extent_header {
    pub fn is_valid(&self) -> bool {
        u16::from_le(self.magic) == EXT4_EXTENT_MAGIC
    }

    pub fn entries_count(&self) -> u16 {
        u16::from_le(self.entries)
    }

    pub fn set_entries_count(&mut self, count: u16) {
        self.entries = count.to_le();
    }

    pub fn max_entries(&self) -> u16 {
        u16::from_le(self.max)
    }

    pub fn set_max_entries(&mut self, max: u16) {
        self.max = max.to_le();
    }

    pub fn depth(&self) -> u16 {
        u16::from_le(self.depth)
    }

    pub fn set_depth(&mut self, depth: u16) {
        self.depth = depth.to_le();
    }

    pub fn is_leaf(&self) -> bool {
        self.depth() == 0
    }

    pub fn init(&mut self, max: u16, depth: u16) {
        self.magic = EXT4_EXTENT_MAGIC.to_le();
        self.entries = 0u16.to_le();
        self.max = max.to_le();
        self.depth = depth.to_le();
        self.generation = 0;
    }
}

/// Extent leaf entry (`ext4_extent`): a run of contiguous physical blocks
/// backing a run of contiguous logical blocks.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ext4_extent {
    pub block: u32,
    pub len: u16,
    pub start_hi: u16,
    pub start_lo: u32,
}

impl Default for ext4_extent {
    fn default() -> Self {
        unsafe { core::mem::zeroed() }
    }
}

/// Bit set in `len` to mark an extent allocated-but-unwritten.
const EXT4_EXT_UNWRITTEN_MASK: u16 = 0x8000;
/// Largest representable length for a single extent (`2^15 - 1`).
pub const EXT4_EXT_MAX_LEN: u16 = 0x7FFF;
/// Largest length an unwritten extent may hold (half of `MAX_LEN`, since the
/// top bit is the unwritten flag).
pub const EXT4_EXT_UNWRITTEN_MAX_LEN: u16 = 0x8000;

impl ext4_extent {
    pub fn logical_block(&self) -> u32 {
        u32::from_le(self.block)
    }

    pub fn set_logical_block(&mut self, block: u32) {
        self.block = block.to_le();
    }

    pub fn physical_block(&self) -> u64 {
        (u32::from_le(self.start_lo) as u64) | ((u16::from_le(self.start_hi) as u64) << 32)
    }

    pub fn set_physical_block(&mut self, block: u64) {
        self.start_lo = (block as u32).to_le();
        self.start_hi = ((block >> 32) as u16).to_le();
    }

    pub fn is_initialized(&self) -> bool {
        (u16::from_le(self.len) & EXT4_EXT_UNWRITTEN_MASK) == 0
    }

    pub fn actual_len(&self) -> u16 {
        let len = u16::from_le(self.len) & EXT4_EXT_MAX_LEN;
        if len == 0 { EXT4_EXT_UNWRITTEN_MAX_LEN } else { len }
    }

    pub fn set_len(&mut self, len: u16, unwritten: bool) {
        let raw = if unwritten { len | EXT4_EXT_UNWRITTEN_MASK } else { len };
        self.len = raw.to_le();
    }

    pub fn mark_unwritten(&mut self) {
        let len = u16::from_le(self.len);
        self.len = (len | EXT4_EXT_UNWRITTEN_MASK).to_le();
    }

    pub fn mark_initialized(&mut self) {
        let len = self.actual_len();
        self.len = len.to_le();
    }
}

/// Extent tree index entry (`ext4_extent_idx`): points at the block holding
/// the next level down.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ext4_extent_idx {
    pub block: u32,
    pub leaf_lo: u32,
    pub leaf_hi: u16,
    pub unused: u16,
}

impl Default for ext4_extent_idx {
    fn default() -> Self {
        unsafe { core::mem::zeroed() }
    }
}

impl ext4_extent_idx {
    pub fn logical_block(&self) -> u32 {
        u32::from_le(self.block)
    }

    pub fn set_logical_block(&mut self, block: u32) {
        self.block = block.to_le();
    }

    pub fn leaf_block(&self) -> u64 {
        let lo = u32::from_le(self.leaf_lo) as u64;
        let hi = u16::from_le(self.leaf_hi) as u64;
        let pblock = lo | (hi << 32);
        if hi > 0 {
            log::warn!("extent index leaf_hi non-zero: lo={:#x} hi={:#x}", lo as u32, hi as u16);
        }
        pblock
    }

    pub fn set_leaf_block(&mut self, block: u64) {
        self.leaf_lo = (block as u32).to_le();
        self.leaf_hi = ((block >> 32) as u16).to_le();
    }
}

/// CRC32C checksum trailing an extent tree node's entries
/// (`crc32c(uuid + inode number + extent block)`).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ext4_extent_tail {
    pub checksum: u32,
}

impl Default for ext4_extent_tail {
    fn default() -> Self {
        unsafe { core::mem::zeroed() }
    }
}

impl ext4_extent_tail {
    pub fn checksum(&self) -> u32 {
        u32::from_le(self.checksum)
    }

    pub fn set_checksum(&mut self, csum: u32) {
        self.checksum = csum.to_le();
    }
}

/// Header of a shared xattr block (`ext4_xattr_header`). Kept only for the
/// refcount-decrement-on-free path (component P); xattr value storage and
/// retrieval is external.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ext4_xattr_header {
    pub h_magic: u32,
    pub h_refcount: u32,
    pub h_blocks: u32,
    pub h_hash: u32,
    pub h_checksum: u32,
    pub h_reserved: [u32; 3],
}

impl Default for ext4_xattr_header {
    fn default() -> Self {
        unsafe { core::mem::zeroed() }
    }
}

impl ext4_xattr_header {
    pub fn is_valid(&self) -> bool {
        u32::from_le(self.h_magic) == EXT4_XATTR_MAGIC
    }

    pub fn refcount(&self) -> u32 {
        u32::from_le(self.h_refcount)
    }

    pub fn set_refcount(&mut self, count: u32) {
        self.h_refcount = count.to_le();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sblock_default_is_invalid() {
        let sb = ext4_sblock::default();
        assert!(!sb.is_valid());
    }

    #[test]
    fn extent_unwritten_round_trip() {
        let mut e = ext4_extent::default();
        e.set_len(100, true);
        assert!(!e.is_initialized());
        assert_eq!(e.actual_len(), 100);
        e.mark_initialized();
        assert!(e.is_initialized());
        assert_eq!(e.actual_len(), 100);
    }

    #[test]
    fn group_desc_64bit_round_trip() {
        let mut gd = ext4_group_desc::default();
        gd.set_block_bitmap(0x1_0000_0003, true);
        assert_eq!(gd.block_bitmap(), 0x1_0000_0003);
    }

    #[test]
    fn dx_rinfo_sanity() {
        let mut info = ext4_dir_idx_rinfo::default();
        info.info_length = 8;
        assert!(info.is_sane());
        info.reserved_zero = 1u32.to_le();
        assert!(!info.is_sane());
    }
}
