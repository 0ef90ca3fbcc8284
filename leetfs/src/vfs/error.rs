use thiserror::Error;

/// Failure of a filesystem operation, surfaced to the kernel as an errno.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FsError {
    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // Returned by getattr for paths deeper than `/<slug>/<file>`.
    #[error("entry already exists: {0}")]
    AlreadyExists(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("bad file handle: {0}")]
    BadHandle(u64),
}

impl FsError {
    pub fn errno(&self) -> libc::c_int {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::IsADirectory(_) => libc::EISDIR,
            FsError::NotADirectory(_) => libc::ENOTDIR,
            FsError::InvalidArgument(_) => libc::EINVAL,
            FsError::AlreadyExists(_) => libc::EEXIST,
            FsError::AccessDenied(_) => libc::EACCES,
            FsError::BadHandle(_) => libc::EBADF,
        }
    }
}
