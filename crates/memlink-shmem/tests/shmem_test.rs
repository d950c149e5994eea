//! Integration tests against real POSIX shared memory.

#![cfg(unix)]
#![allow(unsafe_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use memlink_shmem::{SegmentOpener, SegmentReader, SharedMemorySegment, ShmemError, SystemOpener};
use std::ffi::CString;

/// Writer side of a region, standing in for the emulator integration.
struct TestRegion {
    name: String,
    c_name: CString,
}

impl TestRegion {
    /// Create and fill a region, or `None` where `/dev/shm` is unavailable.
    fn create(suffix: &str, contents: &[u8]) -> Option<Self> {
        let name = format!("/memlink_test_{}_{suffix}", std::process::id());
        let c_name = CString::new(name.clone()).expect("cstring");

        unsafe {
            let fd = libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR,
                (libc::S_IRUSR | libc::S_IWUSR) as libc::mode_t as libc::c_uint,
            );
            if fd == -1 {
                eprintln!(
                    "skipping shmem test (not available): {}",
                    std::io::Error::last_os_error()
                );
                return None;
            }

            let size = contents.len();
            if libc::ftruncate(fd, size as libc::off_t) == -1 {
                libc::close(fd);
                libc::shm_unlink(c_name.as_ptr());
                return None;
            }

            let ptr = libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            );
            libc::close(fd);
            if ptr == libc::MAP_FAILED {
                libc::shm_unlink(c_name.as_ptr());
                return None;
            }

            std::ptr::copy_nonoverlapping(contents.as_ptr(), ptr.cast::<u8>(), size);
            libc::munmap(ptr, size);
        }

        Some(Self { name, c_name })
    }
}

impl Drop for TestRegion {
    fn drop(&mut self) {
        unsafe {
            libc::shm_unlink(self.c_name.as_ptr());
        }
    }
}

#[test]
fn test_read_mapped_region() {
    let contents: Vec<u8> = (0..=255u8).collect();
    let Some(region) = TestRegion::create("read", &contents) else {
        return;
    };

    let segment = SharedMemorySegment::open(&region.name, contents.len()).unwrap();
    assert_eq!(segment.size(), 256);

    let mut out = [0u8; 4];
    segment.copy_bytes_to(0x10, &mut out).unwrap();
    assert_eq!(out, [0x10, 0x11, 0x12, 0x13]);

    segment.copy_bytes_to(252, &mut out).unwrap();
    assert_eq!(out, [252, 253, 254, 255]);
}

#[test]
fn test_out_of_bounds_read_is_rejected() {
    let Some(region) = TestRegion::create("bounds", &[0u8; 64]) else {
        return;
    };

    let segment = SharedMemorySegment::open(&region.name, 64).unwrap();
    let mut out = [0u8; 8];
    assert!(matches!(
        segment.copy_bytes_to(60, &mut out),
        Err(ShmemError::OutOfBoundsRead { .. })
    ));
}

#[test]
fn test_region_smaller_than_requested() {
    let Some(region) = TestRegion::create("small", &[0u8; 32]) else {
        return;
    };

    assert!(matches!(
        SharedMemorySegment::open(&region.name, 4096),
        Err(ShmemError::SizeMismatch { .. })
    ));
}

#[test]
fn test_close_twice_then_read() {
    let Some(region) = TestRegion::create("close", &[1u8; 32]) else {
        return;
    };

    let mut segment = SystemOpener.open(&region.name, 32).unwrap();
    segment.close();
    segment.close();

    let mut out = [0u8; 1];
    assert!(matches!(
        segment.copy_bytes_to(0, &mut out),
        Err(ShmemError::Closed(_))
    ));
}

#[test]
fn test_missing_region_is_unavailable() {
    let name = format!("/memlink_test_{}_missing", std::process::id());
    let err = SharedMemorySegment::open(&name, 32).unwrap_err();
    assert!(err.is_unavailable());
}
