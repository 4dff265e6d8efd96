//! The OS strategies for attaching to a named segment.
//!
//! Each backend splits attaching into two acquisitions, a handle and a mapping, and releasing
//! into the two inverse steps. The ordering and rollback between those steps is not the concern
//! of a backend, [`SharedMemory`](crate::SharedMemory) drives them.
use core::fmt;
use core::ptr::NonNull;

use crate::OsError;

#[cfg(all(unix, not(target_os = "android")))]
pub mod posix;
#[cfg(unix)]
pub mod sysv;
#[cfg(windows)]
pub mod windows;

/// One OS strategy for shared memory.
///
/// Implementations are expected to be thin wrappers around the OS calls. In particular `acquire`
/// must not map anything, and `map` must not take ownership of the handle.
pub trait Backend {
    /// The raw OS token: a kernel handle, a file descriptor or a segment id.
    type Handle: Copy + fmt::Debug;

    /// Open the existing segment called `name` for reading and writing.
    ///
    /// The name has been validated: it is not empty and contains no NUL byte.
    fn acquire(&self, name: &str, len: usize) -> Result<Self::Handle, OsError>;

    /// Map `len` bytes of the segment, shared and writable.
    fn map(&self, handle: Self::Handle, len: usize) -> Result<NonNull<u8>, OsError>;

    /// Remove a mapping.
    ///
    /// # Safety
    ///
    /// `ptr` and `len` must be exactly those of a previous successful `map` on this backend, and
    /// the mapping must not have been removed before. No reference into it may be alive.
    unsafe fn unmap(&self, ptr: NonNull<u8>, len: usize) -> Result<(), OsError>;

    /// Release a handle.
    ///
    /// # Safety
    ///
    /// `handle` must come from a previous successful `acquire` on this backend and must not have
    /// been released before.
    unsafe fn release(&self, handle: Self::Handle) -> Result<(), OsError>;
}

/// The backend compiled in for this target.
#[cfg(windows)]
pub type Native = windows::Windows;

/// The backend compiled in for this target.
#[cfg(all(unix, not(target_os = "android"), not(feature = "sysv")))]
pub type Native = posix::Posix;

/// The backend compiled in for this target.
///
/// Android does not provide `shm_open` so the System V calls are the only option there.
#[cfg(all(unix, any(target_os = "android", feature = "sysv")))]
pub type Native = sysv::SysV;
