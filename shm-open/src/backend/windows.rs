//! Windows named file-mapping objects.
use alloc::sync::Arc;
use core::ffi::c_void;
use core::ptr::NonNull;

use windows_sys::Win32::Foundation::{CloseHandle, GetLastError, BOOL, FALSE, HANDLE};
use windows_sys::Win32::System::Memory::{
    MapViewOfFile, OpenFileMappingW, UnmapViewOfFile, FILE_MAP_READ, FILE_MAP_WRITE,
    MEMORY_MAPPED_VIEW_ADDRESS,
};

use super::Backend;
use crate::OsError;

// https://learn.microsoft.com/en-us/windows/win32/api/memoryapi/nf-memoryapi-openfilemappingw
// https://learn.microsoft.com/en-us/windows/win32/api/memoryapi/nf-memoryapi-mapviewoffile

/// Attach through `OpenFileMappingW`, `MapViewOfFile`, `UnmapViewOfFile` and `CloseHandle`.
#[derive(Clone)]
pub struct Windows {
    inner: Arc<Inner>,
}

struct Inner {
    vtable: WindowsVTable,
}

/// A table of OS functions, see [`Windows::new_unchecked`].
#[non_exhaustive]
pub struct WindowsVTable {
    /// `OpenFileMappingW` without handle inheritance, `name` is nul-terminated.
    pub open_file_mapping: fn(access: u32, name: &[u16]) -> HANDLE,
    /// `MapViewOfFile` at offset zero.
    pub map_view: fn(handle: HANDLE, access: u32, len: usize) -> *mut c_void,
    pub unmap_view: fn(*mut c_void) -> BOOL,
    pub close_handle: fn(HANDLE) -> BOOL,
    pub last_error: fn() -> u32,

    pub file_map_read: u32,
    pub file_map_write: u32,
}

/// The object name passed to the OS for a segment name, nul-terminated UTF-16.
///
/// The name is used literally. Namespace prefixes such as `Local\` are part of the name.
pub fn wide_name(name: &str) -> Vec<u16> {
    name.encode_utf16().chain(core::iter::once(0)).collect()
}

impl Windows {
    /// Create a `Windows` backend from a customized vtable.
    ///
    /// # Safety
    ///
    /// The VTable must contain functions that implement the file-mapping interface. `map_view`
    /// must return null or a view of at least the requested length.
    pub unsafe fn new_unchecked(vtable: WindowsVTable) -> Self {
        Windows {
            inner: Arc::new(Inner { vtable }),
        }
    }

    pub fn new() -> Self {
        // Safety: the system functions are the reference for the interface.
        unsafe { Self::new_unchecked(WindowsVTable::new_system()) }
    }

    fn last_error(&self) -> OsError {
        OsError::from_raw((self.inner.vtable.last_error)() as i32)
    }

    fn access(&self) -> u32 {
        self.inner.vtable.file_map_read | self.inner.vtable.file_map_write
    }
}

impl Default for Windows {
    fn default() -> Self {
        Windows::new()
    }
}

impl Backend for Windows {
    type Handle = HANDLE;

    fn acquire(&self, name: &str, _: usize) -> Result<HANDLE, OsError> {
        let wide = wide_name(name);

        tracing::trace!(name, "OpenFileMappingW");
        match (self.inner.vtable.open_file_mapping)(self.access(), &wide) {
            0 => Err(self.last_error()),
            handle => Ok(handle),
        }
    }

    fn map(&self, handle: HANDLE, len: usize) -> Result<NonNull<u8>, OsError> {
        tracing::trace!(handle, len, "MapViewOfFile");
        let ptr = (self.inner.vtable.map_view)(handle, self.access(), len);
        NonNull::new(ptr.cast()).ok_or_else(|| self.last_error())
    }

    unsafe fn unmap(&self, ptr: NonNull<u8>, _: usize) -> Result<(), OsError> {
        tracing::trace!(?ptr, "UnmapViewOfFile");
        match (self.inner.vtable.unmap_view)(ptr.as_ptr().cast()) {
            FALSE => Err(self.last_error()),
            _ => Ok(()),
        }
    }

    unsafe fn release(&self, handle: HANDLE) -> Result<(), OsError> {
        tracing::trace!(handle, "CloseHandle");
        match (self.inner.vtable.close_handle)(handle) {
            FALSE => Err(self.last_error()),
            _ => Ok(()),
        }
    }
}

impl WindowsVTable {
    pub fn new_system() -> Self {
        fn _open_file_mapping(access: u32, name: &[u16]) -> HANDLE {
            debug_assert_eq!(name.last(), Some(&0));
            // Safety: `name` is a nul-terminated wide string.
            unsafe { OpenFileMappingW(access, FALSE, name.as_ptr()) }
        }

        fn _map_view(handle: HANDLE, access: u32, len: usize) -> *mut c_void {
            unsafe { MapViewOfFile(handle, access, 0, 0, len).Value }
        }

        fn _unmap_view(addr: *mut c_void) -> BOOL {
            unsafe { UnmapViewOfFile(MEMORY_MAPPED_VIEW_ADDRESS { Value: addr }) }
        }

        fn _close_handle(handle: HANDLE) -> BOOL {
            unsafe { CloseHandle(handle) }
        }

        fn _last_error() -> u32 {
            // Safety: `GetLastError`'s internal errno is stored using TLS.
            unsafe { GetLastError() }
        }

        WindowsVTable {
            open_file_mapping: _open_file_mapping,
            map_view: _map_view,
            unmap_view: _unmap_view,
            close_handle: _close_handle,
            last_error: _last_error,
            file_map_read: FILE_MAP_READ,
            file_map_write: FILE_MAP_WRITE,
        }
    }
}
