//! The producing side of a shared memory segment, for tests.
//!
//! Consumers under test only ever attach to segments. These types create them the way an
//! unrelated process would, with the platform calls and naming conventions used directly.
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};

use assert_cmd::assert::Assert;

#[cfg(unix)]
pub use unix::{Segment, SysvSegment};
#[cfg(windows)]
pub use windows::Segment;

/// A name that no other test, nor a concurrent test run, is using.
pub fn unique_name(prefix: &str) -> String {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.subsec_nanos());

    format!(
        "{prefix}-{}-{}-{nanos}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

impl Segment {
    /// Run a process attaching to this segment: `cmd <subcommand> <name> <len> <args..>`.
    ///
    /// The segment outlives the process since we borrow it until the process exited.
    pub fn run(&self, cmd: Command, subcommand: &str, args: &[&str]) -> Assert {
        let mut cmd = assert_cmd::Command::from_std(cmd);
        cmd.arg(subcommand)
            .arg(self.name())
            .arg(self.len().to_string())
            .args(args);
        cmd.assert()
    }
}

#[cfg(unix)]
mod unix {
    use std::ffi::CString;
    use std::fs::File;
    use std::os::fd::FromRawFd;
    use std::path::{Path, PathBuf};

    use memmap2::{MmapOptions, MmapRaw};

    /// A POSIX shared memory object, unlinked on drop.
    pub struct Segment {
        name: String,
        object: CString,
        len: usize,
        map: MmapRaw,
    }

    impl Segment {
        pub fn create(len: usize) -> Self {
            let name = super::unique_name("shm-open");
            let object = if cfg!(target_vendor = "apple") {
                name.clone()
            } else {
                format!("/{name}")
            };
            let object = CString::new(object).unwrap();

            let fd = unsafe {
                libc::shm_open(
                    object.as_ptr(),
                    libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                    0o600 as libc::c_uint,
                )
            };
            if fd == -1 {
                panic!("failed to create {object:?}: {}", std::io::Error::last_os_error());
            }

            // Safety: freshly opened and not owned by anything else.
            let file = unsafe { File::from_raw_fd(fd) };
            file.set_len(len as u64).expect("failed to size the segment");
            let map = MmapOptions::new()
                .len(len)
                .map_raw(&file)
                .expect("failed to map the segment");

            Segment { name, object, len, map }
        }

        pub fn name(&self) -> &str {
            &self.name
        }

        pub fn len(&self) -> usize {
            self.len
        }

        pub fn write(&self, offset: usize, data: &[u8]) {
            write_raw(self.map.as_mut_ptr(), self.len, offset, data)
        }

        pub fn read(&self) -> Vec<u8> {
            read_raw(self.map.as_ptr(), self.len)
        }
    }

    impl Drop for Segment {
        fn drop(&mut self) {
            unsafe { libc::shm_unlink(self.object.as_ptr()) };
        }
    }

    /// A System V segment keyed by a file in `dir`, removed on drop.
    pub struct SysvSegment {
        name: String,
        key_file: PathBuf,
        id: libc::c_int,
        addr: *mut u8,
        len: usize,
    }

    impl SysvSegment {
        /// Create the key file `dir/<name>` and a segment for `ftok(key_file, project)`.
        pub fn create(dir: &Path, project: libc::c_int, len: usize) -> Self {
            let name = super::unique_name("shm-open-sysv");
            let key_file = dir.join(&name);
            File::create(&key_file).expect("failed to create the key file");

            let path = CString::new(key_file.to_str().unwrap()).unwrap();
            let key = unsafe { libc::ftok(path.as_ptr(), project) };
            assert_ne!(key, -1, "ftok: {}", std::io::Error::last_os_error());

            let id = unsafe { libc::shmget(key, len, libc::IPC_CREAT | libc::IPC_EXCL | 0o600) };
            assert_ne!(id, -1, "shmget: {}", std::io::Error::last_os_error());

            let addr = unsafe { libc::shmat(id, core::ptr::null(), 0) };
            assert_ne!(addr as isize, -1, "shmat: {}", std::io::Error::last_os_error());

            SysvSegment {
                name,
                key_file,
                id,
                addr: addr.cast(),
                len,
            }
        }

        pub fn name(&self) -> &str {
            &self.name
        }

        pub fn write(&self, offset: usize, data: &[u8]) {
            write_raw(self.addr, self.len, offset, data)
        }

        pub fn read(&self) -> Vec<u8> {
            read_raw(self.addr, self.len)
        }
    }

    impl Drop for SysvSegment {
        fn drop(&mut self) {
            unsafe {
                libc::shmdt(self.addr.cast_const().cast());
                libc::shmctl(self.id, libc::IPC_RMID, core::ptr::null_mut());
            }
            let _ = std::fs::remove_file(&self.key_file);
        }
    }

    fn write_raw(base: *mut u8, len: usize, offset: usize, data: &[u8]) {
        assert!(offset + data.len() <= len, "write out of bounds");
        // Volatile since the other side of the mapping is invisible to the compiler.
        for (idx, byte) in data.iter().enumerate() {
            unsafe { base.add(offset + idx).write_volatile(*byte) };
        }
    }

    fn read_raw(base: *const u8, len: usize) -> Vec<u8> {
        (0..len)
            .map(|idx| unsafe { base.add(idx).read_volatile() })
            .collect()
    }
}

#[cfg(windows)]
mod windows {
    use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};
    use windows_sys::Win32::System::Memory::{
        CreateFileMappingW, MapViewOfFile, UnmapViewOfFile, FILE_MAP_ALL_ACCESS,
        MEMORY_MAPPED_VIEW_ADDRESS, PAGE_READWRITE,
    };

    /// A pagefile-backed named file mapping, closed on drop.
    pub struct Segment {
        name: String,
        handle: HANDLE,
        addr: *mut u8,
        len: usize,
    }

    impl Segment {
        pub fn create(len: usize) -> Self {
            let name = super::unique_name("shm-open");
            let wide: Vec<u16> = name.encode_utf16().chain([0]).collect();

            let handle = unsafe {
                CreateFileMappingW(
                    INVALID_HANDLE_VALUE,
                    core::ptr::null(),
                    PAGE_READWRITE,
                    0,
                    u32::try_from(len).unwrap(),
                    wide.as_ptr(),
                )
            };
            assert_ne!(handle, 0, "CreateFileMappingW: {}", std::io::Error::last_os_error());

            let addr = unsafe { MapViewOfFile(handle, FILE_MAP_ALL_ACCESS, 0, 0, len).Value };
            assert!(!addr.is_null(), "MapViewOfFile: {}", std::io::Error::last_os_error());

            Segment {
                name,
                handle,
                addr: addr.cast(),
                len,
            }
        }

        pub fn name(&self) -> &str {
            &self.name
        }

        pub fn len(&self) -> usize {
            self.len
        }

        pub fn write(&self, offset: usize, data: &[u8]) {
            assert!(offset + data.len() <= self.len, "write out of bounds");
            for (idx, byte) in data.iter().enumerate() {
                unsafe { self.addr.add(offset + idx).write_volatile(*byte) };
            }
        }

        pub fn read(&self) -> Vec<u8> {
            (0..self.len)
                .map(|idx| unsafe { self.addr.add(idx).read_volatile() })
                .collect()
        }
    }

    impl Drop for Segment {
        fn drop(&mut self) {
            unsafe {
                UnmapViewOfFile(MEMORY_MAPPED_VIEW_ADDRESS { Value: self.addr.cast() });
                CloseHandle(self.handle);
            }
        }
    }
}
