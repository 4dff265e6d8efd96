//! POSIX shared memory objects, `shm_open` and `mmap`.
//!
//! A mapping may extend past the end of the object, and touching those pages raises `SIGBUS`.
//! The object size is therefore checked before mapping, a shorter object fails like `shmget` does
//! for System V segments, with `EINVAL`.
use alloc::sync::Arc;
use core::ffi::{c_int, c_void, CStr};
use core::ptr::NonNull;
use std::ffi::CString;

use super::Backend;
use crate::OsError;

/// Attach through `shm_open`, `fstat`, `mmap`, `munmap` and `close`.
#[derive(Clone)]
pub struct Posix {
    inner: Arc<Inner>,
}

struct Inner {
    vtable: PosixVTable,
}

// Safety: the table holds function pointers and plain values. `map_failed` is a sentinel that is
// only ever compared, never dereferenced.
unsafe impl Send for Inner {}
unsafe impl Sync for Inner {}

/// A table of OS functions.
///
/// Each entry must behave like the correspondingly named libc function, see the Safety
/// precondition of [`Posix::new_unchecked`]. The default table links against `libc`; start from
/// [`PosixVTable::new_libc`] and replace entries to intercept individual calls.
#[non_exhaustive]
pub struct PosixVTable {
    /// `shm_open` of an existing object, the mode is irrelevant without `O_CREAT`.
    pub shm_open: fn(name: &CStr, oflag: c_int) -> c_int,
    /// Simplified `fstat`, writes `st_size` on success.
    pub fstat: fn(fd: c_int, size: &mut i64) -> c_int,
    /// Simplified `mmap`, always a `MAP_SHARED` mapping of the whole length at offset zero.
    pub mmap: fn(len: usize, prot: c_int, fd: c_int) -> *mut c_void,
    pub munmap: fn(*mut c_void, usize) -> c_int,
    pub close: fn(c_int) -> c_int,
    pub errno: fn() -> c_int,

    pub o_rdwr: c_int,
    pub prot_read: c_int,
    pub prot_write: c_int,
    pub map_failed: *mut c_void,
}

impl Posix {
    /// Create a `Posix` backend from a customized vtable.
    ///
    /// # Safety
    ///
    /// The VTable must contain functions that implement the `shm_open`/`mmap` interface. In
    /// particular `mmap` must return `map_failed` or a mapping of at least the requested length
    /// that stays valid until the matching `munmap`.
    pub unsafe fn new_unchecked(vtable: PosixVTable) -> Self {
        Posix {
            inner: Arc::new(Inner { vtable }),
        }
    }

    pub fn new() -> Self {
        // Safety: the libc functions are the reference for the interface.
        unsafe { Self::new_unchecked(PosixVTable::new_libc()) }
    }

    fn errno(&self) -> OsError {
        OsError::from_raw((self.inner.vtable.errno)())
    }
}

impl Default for Posix {
    fn default() -> Self {
        Posix::new()
    }
}

/// The shared memory object name for a segment name.
///
/// Objects are named with a leading slash. Apple targets expect the name as given instead.
pub fn object_name(name: &str) -> String {
    if cfg!(target_vendor = "apple") || name.starts_with('/') {
        name.to_owned()
    } else {
        format!("/{name}")
    }
}

impl Backend for Posix {
    type Handle = c_int;

    fn acquire(&self, name: &str, _: usize) -> Result<c_int, OsError> {
        let path = CString::new(object_name(name)).map_err(|_| OsError::from_raw(libc::EINVAL))?;
        let vtable = &self.inner.vtable;

        tracing::trace!(path = ?path, "shm_open");
        match (vtable.shm_open)(&path, vtable.o_rdwr) {
            -1 => Err(self.errno()),
            fd => Ok(fd),
        }
    }

    fn map(&self, fd: c_int, len: usize) -> Result<NonNull<u8>, OsError> {
        let vtable = &self.inner.vtable;
        let prot = vtable.prot_read | vtable.prot_write;

        let mut size = 0;
        tracing::trace!(fd, "fstat");
        if (vtable.fstat)(fd, &mut size) != 0 {
            return Err(self.errno());
        }

        if u64::try_from(size).map_or(true, |size| size < len as u64) {
            tracing::debug!(fd, size, len, "shared memory object is smaller than the mapping");
            return Err(OsError::from_raw(libc::EINVAL));
        }

        tracing::trace!(fd, len, "mmap");
        let ptr = (vtable.mmap)(len, prot, fd);
        if ptr == vtable.map_failed {
            return Err(self.errno());
        }

        NonNull::new(ptr.cast()).ok_or(OsError::from_raw(libc::EFAULT))
    }

    unsafe fn unmap(&self, ptr: NonNull<u8>, len: usize) -> Result<(), OsError> {
        tracing::trace!(?ptr, len, "munmap");
        // munmap must see the length passed to mmap, not the size of the object.
        match (self.inner.vtable.munmap)(ptr.as_ptr().cast(), len) {
            0 => Ok(()),
            _ => Err(self.errno()),
        }
    }

    unsafe fn release(&self, fd: c_int) -> Result<(), OsError> {
        tracing::trace!(fd, "close");
        match (self.inner.vtable.close)(fd) {
            0 => Ok(()),
            _ => Err(self.errno()),
        }
    }
}

impl PosixVTable {
    pub fn new_libc() -> Self {
        fn _shm_open(name: &CStr, oflag: c_int) -> c_int {
            // Safety: `name` is a valid nul-terminated string.
            unsafe { libc::shm_open(name.as_ptr(), oflag, 0) }
        }

        fn _fstat(fd: c_int, size: &mut i64) -> c_int {
            let mut uninit = core::mem::MaybeUninit::<libc::stat>::zeroed();
            // Safety: passing the correct pointer to a struct of libc::stat.
            let ret = unsafe { libc::fstat(fd, uninit.as_mut_ptr()) };

            if ret == 0 {
                // Safety: always initialized on return with success.
                *size = unsafe { uninit.assume_init() }.st_size.into();
            }

            ret
        }

        fn _mmap_inner(len: usize, prot: c_int, fd: c_int) -> *mut c_void {
            unsafe { libc::mmap(core::ptr::null_mut(), len, prot, libc::MAP_SHARED, fd, 0) }
        }

        fn _munmap(addr: *mut c_void, len: usize) -> c_int {
            unsafe { libc::munmap(addr, len) }
        }

        fn _close_inner(fd: c_int) -> c_int {
            unsafe { libc::close(fd) }
        }

        fn _errno() -> c_int {
            OsError::last().raw()
        }

        PosixVTable {
            shm_open: _shm_open,
            fstat: _fstat,
            mmap: _mmap_inner,
            munmap: _munmap,
            close: _close_inner,
            errno: _errno,
            o_rdwr: libc::O_RDWR,
            prot_read: libc::PROT_READ,
            prot_write: libc::PROT_WRITE,
            map_failed: libc::MAP_FAILED,
        }
    }
}
