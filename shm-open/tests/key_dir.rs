//! The automatic System V key directory.
//!
//! This reads and changes the process environment, so it is a single test in its own binary.
#![cfg(unix)]
use std::path::Path;

use shm_open::backend::sysv::{KeyDir, SysV, DEFAULT_PROJECT, KEY_DIR_ENV};
use shm_open::SharedMemory;
use shm_test_validate::SysvSegment;

#[test]
fn automatic_key_dir_fallbacks() {
    let dir = tempfile::tempdir().unwrap();

    std::env::set_var(KEY_DIR_ENV, dir.path());
    assert_eq!(KeyDir::Auto.resolve(), dir.path());

    let segment = SysvSegment::create(dir.path(), DEFAULT_PROJECT, 5);
    segment.write(0, b"hello");

    let mut shm = SharedMemory::open_with(SysV::new(), segment.name(), 5).unwrap();
    assert_eq!(shm.as_slice().unwrap(), b"hello");
    shm.as_mut_slice().unwrap().copy_from_slice(b"WORLD");
    assert_eq!(segment.read(), b"WORLD");
    shm.close().unwrap();

    // The native handle uses the automatic directory as well when System V is compiled in.
    #[cfg(feature = "sysv")]
    {
        let mut shm = SharedMemory::open(segment.name(), 5).unwrap();
        assert_eq!(shm.as_slice().unwrap(), b"WORLD");
        shm.close().unwrap();
    }

    std::env::remove_var(KEY_DIR_ENV);
    let shm_dir = Path::new("/dev/shm");
    if shm_dir.is_dir() {
        assert_eq!(KeyDir::Auto.resolve(), shm_dir);
    } else {
        std::env::set_var("TMPDIR", dir.path());
        assert_eq!(KeyDir::Auto.resolve(), dir.path());

        std::env::remove_var("TMPDIR");
        assert_eq!(KeyDir::Auto.resolve(), Path::new("/tmp"));
    }
}
