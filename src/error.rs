//! Error type for the core filesystem engine.
//!
//! Every operation, from a raw block read to a transaction commit, reports
//! through the same `Result<T>` so callers embedding this crate under a
//! POSIX-shaped VFS can map straight back to errno without per-layer
//! conversions.

use core::fmt;

/// An engine error: a classification plus a short static description.
///
/// `message` is `&'static str` (never heap-allocated) so errors stay
/// constructible even on an allocation-failure recovery path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: &'static str,
}

/// Error classification, aligned with the errno values `errno()` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Operation not permitted (immutable/append-only inode, etc).
    PermissionDenied,
    /// No such file or directory.
    NotFound,
    /// Low-level I/O failure from the block device.
    Io,
    /// Allocation failed.
    NoMemory,
    /// Target already exists.
    AlreadyExists,
    /// Operation spans devices.
    CrossDevice,
    /// No such device.
    NoDevice,
    /// Expected a directory, found something else.
    NotDirectory,
    /// Expected a non-directory, found a directory.
    IsDirectory,
    /// Malformed argument (bad length, out-of-range field, ...).
    InvalidInput,
    /// Device has no space left (data blocks or inodes).
    NoSpace,
    /// Mount is read-only; write attempted.
    ReadOnly,
    /// Directory not empty.
    NotEmpty,
    /// No extended attribute data (reserved for external xattr callers).
    NoData,
    /// Feature bit or operation not supported by this build.
    Unsupported,
    /// Value outside the representable/allowed range.
    OutOfRange,
    /// On-disk structure failed a structural or checksum check.
    Corrupted,
    /// Distinguished sentinel for a corrupted HTree (`dx_root`/`dx_node`) index.
    BadDxDir,
    /// Device or journal busy.
    Busy,
    /// Caller used the API out of the state machine's expected order.
    InvalidState,
}

impl Error {
    pub const fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self { kind, message }
    }

    /// Build an error, discarding a non-`'static` cause (kept for call
    /// sites that want to log a formatted cause before dropping it).
    pub fn with_cause(kind: ErrorKind, message: &'static str, _cause: impl core::fmt::Debug) -> Self {
        Self { kind, message }
    }

    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub const fn message(&self) -> &'static str {
        self.message
    }

    /// Traditional numeric errno, for callers crossing an FFI boundary
    /// shaped like POSIX. Values match `consts::E*`.
    pub const fn errno(&self) -> i32 {
        use crate::consts::*;
        match self.kind {
            ErrorKind::PermissionDenied => EPERM,
            ErrorKind::NotFound => ENOENT,
            ErrorKind::Io => EIO,
            ErrorKind::NoMemory => ENOMEM,
            ErrorKind::AlreadyExists => EEXIST,
            ErrorKind::CrossDevice => EXDEV,
            ErrorKind::NoDevice => ENODEV,
            ErrorKind::NotDirectory => ENOTDIR,
            ErrorKind::IsDirectory => EISDIR,
            ErrorKind::InvalidInput => EINVAL,
            ErrorKind::NoSpace => ENOSPC,
            ErrorKind::ReadOnly => EROFS,
            ErrorKind::NotEmpty => ENOTEMPTY,
            ErrorKind::NoData => ENODATA,
            ErrorKind::Unsupported => ENOTSUP,
            ErrorKind::OutOfRange => ERANGE,
            ErrorKind::Corrupted => EIO,
            ErrorKind::BadDxDir => ERR_BAD_DX_DIR,
            ErrorKind::Busy => ENXIO,
            ErrorKind::InvalidState => EINVAL,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

impl From<crate::journal::JournalError> for Error {
    fn from(err: crate::journal::JournalError) -> Self {
        use crate::journal::JournalError;
        match err {
            JournalError::NoJournalInode => Error::new(ErrorKind::NotFound, "journal inode not set"),
            JournalError::InvalidSuperblock => Error::new(ErrorKind::Corrupted, "invalid JBD2 superblock"),
            JournalError::UnsupportedFeature(_) => {
                Error::new(ErrorKind::Unsupported, "unsupported JBD2 feature bit")
            }
            JournalError::RecoveryFailed => Error::new(ErrorKind::Corrupted, "journal recovery failed"),
            JournalError::NoSpace => Error::new(ErrorKind::NoSpace, "journal full"),
            JournalError::IoError => Error::new(ErrorKind::Io, "journal I/O error"),
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_round_trip() {
        let e = Error::new(ErrorKind::NoSpace, "out of blocks");
        assert_eq!(e.kind(), ErrorKind::NoSpace);
        assert_eq!(e.errno(), crate::consts::ENOSPC);
    }

    #[test]
    fn bad_dx_dir_is_distinguished() {
        let e = Error::new(ErrorKind::BadDxDir, "corrupted htree root");
        assert_ne!(e.errno(), crate::consts::EIO);
    }
}
