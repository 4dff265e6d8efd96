//! Attach to a named shared memory segment that another process created.
//!
//! A [`SharedMemory`] opens the segment by name, maps the requested number of bytes read/write
//! into this process and hands them out as a byte slice until it is [closed](SharedMemory::close).
//! Creating, resizing or removing segments is left to the process that owns them.
//!
//! The OS interface is chosen when building:
//!
//! - Windows: named file-mapping objects, see [`backend::windows`].
//! - unix: POSIX shared memory objects, see [`backend::posix`].
//! - Android, or unix with the `sysv` feature: System V segments, see [`backend::sysv`].
//!
//! ```no_run
//! let mut shm = shm_open::SharedMemory::open("seg", 5)?;
//! shm.as_mut_slice()?.copy_from_slice(b"WORLD");
//! shm.close()?;
//! # Ok::<(), shm_open::Error>(())
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]
extern crate alloc;

pub mod backend;
mod error;
mod handle;


pub use backend::{Backend, Native};
pub use error::{Error, ErrorKind, OsError, ValidationError};
pub use handle::SharedMemory;
