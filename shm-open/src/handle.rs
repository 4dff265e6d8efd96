use core::fmt;
use core::ptr::NonNull;
use core::sync::atomic::AtomicU8;

use crate::backend::{Backend, Native};
use crate::{Error, ValidationError};

/// A mapping of an existing named shared memory segment.
///
/// The handle owns exactly one OS handle and one mapping while open. Both are released by
/// [`close`](Self::close), or by dropping the handle. The bytes are shared with the other processes
/// that map the segment; nothing synchronizes access to them.
///
/// [`as_slice`](Self::as_slice) and [`as_mut_slice`](Self::as_mut_slice) assume the other
/// processes do not write while the slice is in use, which must be coordinated outside of this
/// type. Otherwise the contents of the slice may change underneath it. When writers run
/// concurrently use [`as_atomic_slice`](Self::as_atomic_slice) instead.
pub struct SharedMemory<B: Backend = Native> {
    name: String,
    len: usize,
    backend: B,
    state: State<B::Handle>,
}

enum State<H> {
    Mapped { handle: H, ptr: NonNull<u8> },
    Closed,
}

// Safety: the mapping is valid process-wide and is only reachable through this value, so moving
// it to another thread is no different from moving a `Box<[u8]>`. Shared references only give
// out `&[u8]` but the other side of the segment may write concurrently, so no `Sync`.
unsafe impl<B: Backend + Send> Send for SharedMemory<B> where B::Handle: Send {}

impl SharedMemory {
    /// Open and map the segment `name` with the backend native to this target.
    pub fn open(name: &str, len: usize) -> Result<Self, Error> {
        Self::open_with(Native::default(), name, len)
    }
}

impl<B: Backend> SharedMemory<B> {
    /// Open and map `len` bytes of the segment `name` through `backend`.
    ///
    /// Fails with [`Error::Validation`] before doing any OS call if the name is empty or contains
    /// a NUL byte, or if `len` is zero. If the segment opens but can not be mapped, its handle is
    /// released again before returning [`Error::MapFailed`].
    pub fn open_with(backend: B, name: &str, len: usize) -> Result<Self, Error> {
        validate(name, len)?;

        let handle = backend
            .acquire(name, len)
            .map_err(|source| Error::OpenFailed {
                name: name.to_owned(),
                source,
            })?;

        let ptr = match backend.map(handle, len) {
            Ok(ptr) => ptr,
            Err(source) => {
                // Safety: acquired above and not yet released.
                if let Err(err) = unsafe { backend.release(handle) } {
                    tracing::warn!(name, ?handle, %err, "failed to release handle after map failure");
                }

                return Err(Error::MapFailed {
                    name: name.to_owned(),
                    source,
                });
            }
        };

        tracing::debug!(name, len, ?handle, ?ptr, "mapped shared memory");
        Ok(SharedMemory {
            name: name.to_owned(),
            len,
            backend,
            state: State::Mapped { handle, ptr },
        })
    }

    /// Unmap the region, then release the handle.
    ///
    /// Both steps are attempted, and afterwards the handle is closed whatever the outcome. When
    /// unmapping fails that error is reported, otherwise a failure to release the handle. Closing
    /// again reports [`Error::AlreadyClosed`].
    pub fn close(&mut self) -> Result<(), Error> {
        let (handle, ptr) = match core::mem::replace(&mut self.state, State::Closed) {
            State::Mapped { handle, ptr } => (handle, ptr),
            State::Closed => {
                return Err(Error::AlreadyClosed {
                    name: self.name.clone(),
                })
            }
        };

        // Safety: `ptr` and `len` are those of the mapping made in `open_with`, and the state no
        // longer refers to them. Any borrow of the region ended with the `&mut self` we hold.
        let unmapped = unsafe { self.backend.unmap(ptr, self.len) };
        // Safety: acquired in `open_with`, released only here.
        let released = unsafe { self.backend.release(handle) };

        tracing::debug!(name = %self.name, ok = unmapped.is_ok() && released.is_ok(), "closed shared memory");
        match (unmapped, released) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(source), released) => {
                if let Err(err) = released {
                    tracing::warn!(name = %self.name, %err, "failed to release handle after unmap failure");
                }

                Err(Error::UnmapFailed {
                    name: self.name.clone(),
                    source,
                })
            }
            (Ok(()), Err(source)) => Err(Error::HandleReleaseFailed {
                name: self.name.clone(),
                source,
            }),
        }
    }

    /// The name the segment was opened with. Remains available after closing.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The length of the mapped region. Remains available after closing.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    /// The start of the mapped region, or `None` once closed.
    ///
    /// For wrapping the region in a buffer that is not tied to the lifetime of `&self`. Whoever
    /// does so must stop using the pointer when the handle is closed or dropped.
    pub fn as_ptr(&self) -> Option<NonNull<u8>> {
        match self.state {
            State::Mapped { ptr, .. } => Some(ptr),
            State::Closed => None,
        }
    }

    /// The mapped bytes, while no other process writes to them.
    pub fn as_slice(&self) -> Result<&[u8], Error> {
        match self.state {
            // Safety: the mapping covers `len` bytes until `close`, which needs `&mut self`.
            State::Mapped { ptr, .. } => Ok(unsafe {
                core::slice::from_raw_parts(ptr.as_ptr(), self.len)
            }),
            State::Closed => Err(self.closed()),
        }
    }

    /// The mapped bytes for writing, while no other process accesses them.
    pub fn as_mut_slice(&mut self) -> Result<&mut [u8], Error> {
        match self.state {
            // Safety: as in `as_slice`, and `&mut self` makes this the only reference.
            State::Mapped { ptr, .. } => Ok(unsafe {
                core::slice::from_raw_parts_mut(ptr.as_ptr(), self.len)
            }),
            State::Closed => Err(self.closed()),
        }
    }

    /// The mapped bytes as atomics, for access concurrent with other processes.
    pub fn as_atomic_slice(&self) -> Result<&[AtomicU8], Error> {
        match self.state {
            // Safety: `AtomicU8` has the layout of `u8`, and the mapping covers `len` bytes until
            // `close`, which needs `&mut self`.
            State::Mapped { ptr, .. } => Ok(unsafe {
                core::slice::from_raw_parts(ptr.as_ptr().cast::<AtomicU8>(), self.len)
            }),
            State::Closed => Err(self.closed()),
        }
    }

    fn closed(&self) -> Error {
        Error::AlreadyClosed {
            name: self.name.clone(),
        }
    }
}

fn validate(name: &str, len: usize) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }

    if name.contains('\0') {
        return Err(ValidationError::NulInName);
    }

    if len == 0 {
        return Err(ValidationError::ZeroLength);
    }

    Ok(())
}

impl<B: Backend> Drop for SharedMemory<B> {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }

        if let Err(err) = self.close() {
            tracing::warn!(name = %self.name, %err, "failed to close shared memory on drop");
        }
    }
}

impl<B: Backend> fmt::Debug for SharedMemory<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("SharedMemory");
        dbg.field("name", &self.name).field("len", &self.len);
        match &self.state {
            State::Mapped { handle, ptr } => dbg.field("handle", handle).field("ptr", ptr),
            State::Closed => dbg.field("state", &"closed"),
        };
        dbg.finish()
    }
}
