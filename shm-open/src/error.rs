use core::fmt;

/// An error code reported by the operating system.
///
/// This is `errno` on unix and `GetLastError` on Windows, captured right after the failing call.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct OsError(pub(crate) i32);

impl OsError {
    /// Capture the calling thread's last OS error.
    pub fn last() -> Self {
        OsError(std::io::Error::last_os_error().raw_os_error().unwrap_or(0))
    }

    pub fn from_raw(code: i32) -> Self {
        OsError(code)
    }

    pub fn raw(self) -> i32 {
        self.0
    }

    pub fn into_io(self) -> std::io::Error {
        std::io::Error::from_raw_os_error(self.0)
    }
}

impl fmt::Debug for OsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OsError")
            .field(&self.0)
            .field(&self.into_io().kind())
            .finish()
    }
}

impl fmt::Display for OsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.into_io(), f)
    }
}

impl std::error::Error for OsError {}

/// A request that was rejected before any OS call was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("the segment name is empty")]
    EmptyName,
    #[error("the segment name contains a NUL byte")]
    NulInName,
    #[error("the requested length is zero")]
    ZeroLength,
}

/// Errors of opening, accessing and closing a shared memory segment.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid shared memory request: {0}")]
    Validation(#[from] ValidationError),

    /// The named segment does not exist or can not be opened for reading and writing.
    #[error("could not open shared memory segment `{name}`: {source}")]
    OpenFailed { name: String, source: OsError },

    /// The segment was opened but mapping it failed. The handle was already released.
    #[error("could not map shared memory segment `{name}`: {source}")]
    MapFailed { name: String, source: OsError },

    /// Unmapping failed. The handle is considered closed nonetheless.
    #[error("could not unmap shared memory segment `{name}`: {source}")]
    UnmapFailed { name: String, source: OsError },

    /// The mapping was removed but the OS handle could not be released.
    #[error("could not release the handle of shared memory segment `{name}`: {source}")]
    HandleReleaseFailed { name: String, source: OsError },

    /// The handle was closed before.
    #[error("shared memory segment `{name}` is already closed")]
    AlreadyClosed { name: String },
}

/// The category of an [`Error`], for translating it into another error convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    Validation,
    OpenFailed,
    MapFailed,
    UnmapFailed,
    HandleReleaseFailed,
    AlreadyClosed,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::OpenFailed { .. } => ErrorKind::OpenFailed,
            Error::MapFailed { .. } => ErrorKind::MapFailed,
            Error::UnmapFailed { .. } => ErrorKind::UnmapFailed,
            Error::HandleReleaseFailed { .. } => ErrorKind::HandleReleaseFailed,
            Error::AlreadyClosed { .. } => ErrorKind::AlreadyClosed,
        }
    }

    /// The OS error underlying this error, if any.
    pub fn os_error(&self) -> Option<&OsError> {
        match self {
            Error::OpenFailed { source, .. }
            | Error::MapFailed { source, .. }
            | Error::UnmapFailed { source, .. }
            | Error::HandleReleaseFailed { source, .. } => Some(source),
            Error::Validation(_) | Error::AlreadyClosed { .. } => None,
        }
    }
}
