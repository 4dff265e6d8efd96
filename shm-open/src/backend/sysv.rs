//! Legacy System V shared memory, `shmget` and `shmat`.
//!
//! System V segments are not named. Producers and consumers instead agree on an existing file
//! and derive the segment key from it with `ftok`. This backend places that file in a key
//! directory under the segment name, see [`KeyDir`] for how the directory is found.
use alloc::sync::Arc;
use core::ffi::{c_int, c_void, CStr};
use core::ptr::NonNull;
use std::ffi::CString;
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};

use super::Backend;
use crate::OsError;

/// Environment variable that overrides the automatic key directory.
pub const KEY_DIR_ENV: &str = "SHM_OPEN_KEY_DIR";

/// The `ftok` project id used unless configured otherwise.
pub const DEFAULT_PROJECT: c_int = 1;

/// Attach through `ftok`, `shmget`, `shmat` and `shmdt`.
#[derive(Clone)]
pub struct SysV {
    vtable: Arc<SysvVTable>,
    dir: KeyDir,
    project: c_int,
}

/// Where the files backing segment keys live.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum KeyDir {
    /// Pick the first of: `$SHM_OPEN_KEY_DIR`, `/dev/shm` if it is a directory, `$TMPDIR`, `/tmp`.
    ///
    /// The order matches what existing producers of such segments look for.
    #[default]
    Auto,
    /// Always use this directory.
    Path(PathBuf),
}

/// A table of OS functions, see [`PosixVTable`](super::posix::PosixVTable) for the conventions.
#[non_exhaustive]
pub struct SysvVTable {
    pub ftok: fn(path: &CStr, project: c_int) -> libc::key_t,
    /// `shmget` of an existing segment.
    pub shmget: fn(key: libc::key_t, size: usize, flags: c_int) -> c_int,
    /// Simplified `shmat`, the OS chooses the address.
    pub shmat: fn(id: c_int) -> *mut c_void,
    pub shmdt: fn(*const c_void) -> c_int,
    pub errno: fn() -> c_int,
}

impl KeyDir {
    pub fn resolve(&self) -> PathBuf {
        match self {
            KeyDir::Path(path) => path.clone(),
            KeyDir::Auto => {
                if let Some(dir) = std::env::var_os(KEY_DIR_ENV) {
                    return PathBuf::from(dir);
                }

                let shm = Path::new("/dev/shm");
                if shm.is_dir() {
                    return shm.to_owned();
                }

                std::env::var_os("TMPDIR")
                    .map_or_else(|| PathBuf::from("/tmp"), PathBuf::from)
            }
        }
    }
}

impl SysV {
    /// Create a `SysV` backend from a customized vtable.
    ///
    /// # Safety
    ///
    /// The VTable must contain functions that implement the System V shared memory interface.
    /// `shmat` must return `(void*)-1` or an attachment valid until the matching `shmdt`.
    pub unsafe fn new_unchecked(vtable: SysvVTable) -> Self {
        SysV {
            vtable: Arc::new(vtable),
            dir: KeyDir::Auto,
            project: DEFAULT_PROJECT,
        }
    }

    pub fn new() -> Self {
        // Safety: the libc functions are the reference for the interface.
        unsafe { Self::new_unchecked(SysvVTable::new_libc()) }
    }

    /// Derive keys from files in this directory instead of guessing one.
    pub fn with_dir(self, dir: impl Into<PathBuf>) -> Self {
        SysV {
            dir: KeyDir::Path(dir.into()),
            ..self
        }
    }

    pub fn with_project(self, project: c_int) -> Self {
        SysV { project, ..self }
    }

    /// The file whose identity determines the key of segment `name`.
    pub fn key_path(&self, name: &str) -> PathBuf {
        self.dir.resolve().join(name)
    }

    fn errno(&self) -> OsError {
        OsError::from_raw((self.vtable.errno)())
    }
}

impl Default for SysV {
    fn default() -> Self {
        SysV::new()
    }
}

impl Backend for SysV {
    type Handle = c_int;

    fn acquire(&self, name: &str, len: usize) -> Result<c_int, OsError> {
        let path = self.key_path(name);
        tracing::trace!(path = %path.display(), project = self.project, "ftok");

        let path = CString::new(path.into_os_string().into_vec())
            .map_err(|_| OsError::from_raw(libc::EINVAL))?;

        let key = (self.vtable.ftok)(&path, self.project);
        if key == -1 {
            return Err(self.errno());
        }

        tracing::trace!(key, len, "shmget");
        match (self.vtable.shmget)(key, len, 0o600) {
            -1 => Err(self.errno()),
            id => Ok(id),
        }
    }

    fn map(&self, id: c_int, _: usize) -> Result<NonNull<u8>, OsError> {
        tracing::trace!(id, "shmat");
        let ptr = (self.vtable.shmat)(id);
        if ptr as isize == -1 {
            return Err(self.errno());
        }

        NonNull::new(ptr.cast()).ok_or(OsError::from_raw(libc::EFAULT))
    }

    unsafe fn unmap(&self, ptr: NonNull<u8>, _: usize) -> Result<(), OsError> {
        tracing::trace!(?ptr, "shmdt");
        match (self.vtable.shmdt)(ptr.as_ptr().cast_const().cast()) {
            0 => Ok(()),
            _ => Err(self.errno()),
        }
    }

    /// Segment ids are not owned by the process, detaching was the only release step.
    unsafe fn release(&self, _: c_int) -> Result<(), OsError> {
        Ok(())
    }
}

impl SysvVTable {
    pub fn new_libc() -> Self {
        fn _ftok(path: &CStr, project: c_int) -> libc::key_t {
            // Safety: `path` is a valid nul-terminated string.
            unsafe { libc::ftok(path.as_ptr(), project) }
        }

        fn _shmget(key: libc::key_t, size: usize, flags: c_int) -> c_int {
            unsafe { libc::shmget(key, size, flags) }
        }

        fn _shmat(id: c_int) -> *mut c_void {
            unsafe { libc::shmat(id, core::ptr::null(), 0) }
        }

        fn _shmdt(addr: *const c_void) -> c_int {
            unsafe { libc::shmdt(addr) }
        }

        fn _errno() -> c_int {
            OsError::last().raw()
        }

        SysvVTable {
            ftok: _ftok,
            shmget: _shmget,
            shmat: _shmat,
            shmdt: _shmdt,
            errno: _errno,
        }
    }
}
