//! On-disk format constants.
//!
//! Layout offsets, magic numbers, mode/flag bit definitions, and the feature
//! flag bitmasks used by the superblock, inode, group descriptor and
//! directory entry readers.

//=============================================================================
// Sizes
//=============================================================================

/// Physical sector size assumed by the block layer's logical/physical mapping.
pub const EXT4_DEFAULT_SECTOR_SIZE: u32 = 512;

/// Logical block size used when a device doesn't specify one.
pub const EXT4_DEFAULT_BLOCK_SIZE: u32 = 4096;

/// Smallest legal ext2/3/4 block size.
pub const EXT4_MIN_BLOCK_SIZE: u32 = 1024;

/// Largest legal block size.
pub const EXT4_MAX_BLOCK_SIZE: u32 = 65536;

//=============================================================================
// Superblock
//=============================================================================

/// Byte offset of the superblock from the start of the device/partition.
pub const EXT4_SUPERBLOCK_OFFSET: u64 = 1024;

/// On-disk superblock size.
pub const EXT4_SUPERBLOCK_SIZE: usize = 1024;

pub const EXT4_SUPERBLOCK_MAGIC: u16 = 0xEF53;
pub const EXT4_EXTENT_MAGIC: u16 = 0xF30A;
pub const EXT4_ROOT_INODE: u32 = 2;

pub const EXT4_GROUP_DESC_SIZE: usize = 32;
pub const EXT4_GROUP_DESC_SIZE_64: usize = 64;
pub const EXT4_MIN_BLOCK_GROUP_DESCRIPTOR_SIZE: usize = 32;
pub const EXT4_MAX_BLOCK_GROUP_DESCRIPTOR_SIZE: usize = 1024;

pub const EXT4_SUPER_STATE_VALID: u16 = 0x0001;
pub const EXT4_SUPER_STATE_ERROR: u16 = 0x0002;
pub const EXT4_SUPER_STATE_ORPHAN: u16 = 0x0004;

/// `s_checksum_type`: the only type currently defined is CRC32C.
pub const EXT4_CHECKSUM_CRC32C: u8 = 1;

pub const EXT4_SUPERBLOCK_FLAGS_SIGNED_HASH: u32 = 0x0001;
pub const EXT4_SUPERBLOCK_FLAGS_UNSIGNED_HASH: u32 = 0x0002;
pub const EXT4_SUPERBLOCK_FLAGS_TEST_FILESYS: u32 = 0x0004;

/// Reserved GDT blocks field exists whenever `RESIZE_INODE` is set; table
/// readers must skip this region when walking group descriptor blocks.
pub const EXT4_RESIZE_INODE_NUM: u32 = 7;

//=============================================================================
// Inode block-pointer layout
//=============================================================================

/// Total entries in `i_block` (12 direct + indirect + double + triple).
pub const EXT4_INODE_BLOCKS: usize = 15;
pub const EXT4_INODE_DIRECT_BLOCKS: usize = 12;
pub const EXT4_INODE_INDIRECT_BLOCK: usize = 12;
pub const EXT4_INODE_DOUBLE_INDIRECT_BLOCK: usize = 13;
pub const EXT4_INODE_TRIPLE_INDIRECT_BLOCK: usize = 14;

pub const EXT4_DEFAULT_INODE_SIZE: u16 = 128;
pub const EXT4_LARGE_INODE_SIZE: u16 = 256;
pub const EXT4_GOOD_OLD_INODE_SIZE: usize = 128;

//=============================================================================
// Superblock creator OS
//=============================================================================

pub const EXT4_SUPERBLOCK_OS_LINUX: u32 = 0;
pub const EXT4_SUPERBLOCK_OS_HURD: u32 = 1;

//=============================================================================
// Inode mode bits
//=============================================================================

pub const EXT4_INODE_MODE_TYPE_MASK: u16 = 0xF000;
pub const EXT4_INODE_MODE_FIFO: u16 = 0x1000;
pub const EXT4_INODE_MODE_CHARDEV: u16 = 0x2000;
pub const EXT4_INODE_MODE_DIRECTORY: u16 = 0x4000;
pub const EXT4_INODE_MODE_BLOCKDEV: u16 = 0x6000;
pub const EXT4_INODE_MODE_FILE: u16 = 0x8000;
pub const EXT4_INODE_MODE_SOFTLINK: u16 = 0xA000;
pub const EXT4_INODE_MODE_SOCKET: u16 = 0xC000;

pub const EXT4_INODE_MODE_PERM_MASK: u16 = 0x0FFF;
pub const EXT4_INODE_MODE_USER_READ: u16 = 0x0100;
pub const EXT4_INODE_MODE_USER_WRITE: u16 = 0x0080;
pub const EXT4_INODE_MODE_USER_EXEC: u16 = 0x0040;
pub const EXT4_INODE_MODE_GROUP_READ: u16 = 0x0020;
pub const EXT4_INODE_MODE_GROUP_WRITE: u16 = 0x0010;
pub const EXT4_INODE_MODE_GROUP_EXEC: u16 = 0x0008;
pub const EXT4_INODE_MODE_OTHER_READ: u16 = 0x0004;
pub const EXT4_INODE_MODE_OTHER_WRITE: u16 = 0x0002;
pub const EXT4_INODE_MODE_OTHER_EXEC: u16 = 0x0001;

//=============================================================================
// Inode flags (i_flags)
//=============================================================================

pub const EXT4_INODE_FLAG_EXTENTS: u32 = 0x00080000;
pub const EXT4_INODE_FLAG_HUGE_FILE: u32 = 0x00040000;
pub const EXT4_INODE_FLAG_INDEX: u32 = 0x00001000;
pub const EXT4_INODE_FLAG_IMMUTABLE: u32 = 0x00000010;
pub const EXT4_INODE_FLAG_APPEND: u32 = 0x00000020;

//=============================================================================
// Directory entry file types
//=============================================================================

pub const EXT4_DE_UNKNOWN: u8 = 0;
pub const EXT4_DE_REG_FILE: u8 = 1;
pub const EXT4_DE_DIR: u8 = 2;
pub const EXT4_DE_CHRDEV: u8 = 3;
pub const EXT4_DE_BLKDEV: u8 = 4;
pub const EXT4_DE_FIFO: u8 = 5;
pub const EXT4_DE_SOCK: u8 = 6;
pub const EXT4_DE_SYMLINK: u8 = 7;

pub const EXT4_DIR_ENTRY_MIN_LEN: usize = 8;
pub const EXT4_DIR_ENTRY_ALIGN: usize = 4;

/// `file_type == 0xDE` marks the last dirent's tail as a checksum record
/// rather than a real entry (`EXT4_FEATURE_RO_COMPAT_METADATA_CSUM`).
pub const EXT4_DIRENTRY_DIR_CSUM: u8 = 0xDE;

pub const EXT4_NAME_MAX: usize = 255;

//=============================================================================
// Feature flags
//=============================================================================

pub const EXT4_FEATURE_COMPAT_DIR_PREALLOC: u32 = 0x0001;
pub const EXT4_FEATURE_COMPAT_HAS_JOURNAL: u32 = 0x0004;
pub const EXT4_FEATURE_COMPAT_RESIZE_INODE: u32 = 0x0010;
pub const EXT4_FEATURE_COMPAT_DIR_INDEX: u32 = 0x0020;
pub const EXT4_FEATURE_COMPAT_LAZY_BG: u32 = 0x0040;

pub const EXT4_FEATURE_INCOMPAT_COMPRESSION: u32 = 0x0001;
pub const EXT4_FEATURE_INCOMPAT_FILETYPE: u32 = 0x0002;
pub const EXT4_FEATURE_INCOMPAT_RECOVER: u32 = 0x0004;
pub const EXT4_FEATURE_INCOMPAT_JOURNAL_DEV: u32 = 0x0008;
pub const EXT4_FEATURE_INCOMPAT_META_BG: u32 = 0x0010;
pub const EXT4_FEATURE_INCOMPAT_EXTENTS: u32 = 0x0040;
pub const EXT4_FEATURE_INCOMPAT_64BIT: u32 = 0x0080;
pub const EXT4_FEATURE_INCOMPAT_MMP: u32 = 0x0100;
pub const EXT4_FEATURE_INCOMPAT_FLEX_BG: u32 = 0x0200;
pub const EXT4_FEATURE_INCOMPAT_EA_INODE: u32 = 0x0400;
pub const EXT4_FEATURE_INCOMPAT_DIRDATA: u32 = 0x1000;
pub const EXT4_FEATURE_INCOMPAT_CSUM_SEED: u32 = 0x2000;
pub const EXT4_FEATURE_INCOMPAT_LARGEDIR: u32 = 0x4000;
pub const EXT4_FEATURE_INCOMPAT_INLINE_DATA: u32 = 0x8000;
pub const EXT4_FEATURE_INCOMPAT_ENCRYPT: u32 = 0x10000;

pub const EXT4_FEATURE_RO_COMPAT_SPARSE_SUPER: u32 = 0x0001;
pub const EXT4_FEATURE_RO_COMPAT_LARGE_FILE: u32 = 0x0002;
pub const EXT4_FEATURE_RO_COMPAT_BTREE_DIR: u32 = 0x0004;
pub const EXT4_FEATURE_RO_COMPAT_HUGE_FILE: u32 = 0x0008;
pub const EXT4_FEATURE_RO_COMPAT_GDT_CSUM: u32 = 0x0010;
pub const EXT4_FEATURE_RO_COMPAT_DIR_NLINK: u32 = 0x0020;
pub const EXT4_FEATURE_RO_COMPAT_EXTRA_ISIZE: u32 = 0x0040;
pub const EXT4_FEATURE_RO_COMPAT_HAS_SNAPSHOT: u32 = 0x0080;
pub const EXT4_FEATURE_RO_COMPAT_QUOTA: u32 = 0x0100;
pub const EXT4_FEATURE_RO_COMPAT_BIGALLOC: u32 = 0x0200;
pub const EXT4_FEATURE_RO_COMPAT_METADATA_CSUM: u32 = 0x0400;
pub const EXT4_FEATURE_RO_COMPAT_READONLY: u32 = 0x1000;
pub const EXT4_FEATURE_RO_COMPAT_PROJECT: u32 = 0x2000;

//=============================================================================
// Cache defaults
//=============================================================================

pub const CONFIG_BLOCK_DEV_CACHE_SIZE: u32 = 8;
pub const CONFIG_MAX_CACHE_REF_BLOCKS: u32 = 256;

//=============================================================================
// errno (POSIX-compatible numeric codes, exposed via Error::errno())
//=============================================================================

pub const EOK: i32 = 0;
pub const EPERM: i32 = 1;
pub const ENOENT: i32 = 2;
pub const EIO: i32 = 5;
pub const ENXIO: i32 = 6;
pub const ENOMEM: i32 = 12;
pub const EACCES: i32 = 13;
pub const EEXIST: i32 = 17;
pub const EXDEV: i32 = 18;
pub const ENODEV: i32 = 19;
pub const ENOTDIR: i32 = 20;
pub const EISDIR: i32 = 21;
pub const EINVAL: i32 = 22;
pub const ENOSPC: i32 = 28;
pub const EROFS: i32 = 30;
pub const ENOTEMPTY: i32 = 39;
pub const ENODATA: i32 = 61;
pub const ENOTSUP: i32 = 95;
pub const ERANGE: i32 = 34;

/// Distinguished sentinel for a structurally corrupted HTree index, matching
/// the original implementation's reserved negative errno outside the normal
/// POSIX range.
pub const ERR_BAD_DX_DIR: i32 = -75000;

//=============================================================================
// Limits
//=============================================================================

pub const EXT4_PATH_MAX: usize = 4096;
pub const EXT4_LINK_MAX: u32 = 65000;
pub const EXT4_EXTENT_MAX_DEPTH: u8 = 5;

//=============================================================================
// Minimal xattr constants (only what fs_free_inode needs to drop a shared
// xattr block's refcount; value storage/retrieval is external)
//=============================================================================

pub const EXT4_XATTR_MAGIC: u32 = 0xEA020000;
pub const EXT4_XATTR_REFCOUNT_MAX: u32 = 1024;
pub const EXT4_XATTR_PAD_BITS: u32 = 2;
pub const EXT4_XATTR_PAD: u32 = 1 << EXT4_XATTR_PAD_BITS;
pub const EXT4_XATTR_ROUND: u32 = EXT4_XATTR_PAD - 1;
