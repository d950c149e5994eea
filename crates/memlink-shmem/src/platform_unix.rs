//! Unix shared memory mapping using `shm_open` and `mmap`.
//!
//! The object is opened `O_RDONLY` and mapped `PROT_READ | MAP_SHARED`.
//! The descriptor is closed right after mapping; the mapping stays valid
//! until `munmap`.

use std::ffi::CString;
use std::ptr;

use libc::{MAP_SHARED, O_RDONLY, PROT_READ};
use libc::{c_void, size_t};
use libc::{close, fstat, mmap, munmap, shm_open};

use crate::{Result, ShmemError};

/// Read-only mapping of a POSIX shared memory object.
#[allow(unsafe_code)]
pub struct PlatformSegment {
    /// Start of the mapping.
    ptr: *mut c_void,
    /// Mapped length.
    size: usize,
}

impl PlatformSegment {
    /// Open and map an existing shared memory object.
    ///
    /// Names are prefixed with `/` when missing, as POSIX requires.
    #[allow(unsafe_code)]
    pub fn open(name: &str, size: usize) -> Result<Self> {
        let shm_name = if name.starts_with('/') {
            name.to_string()
        } else {
            format!("/{name}")
        };

        let c_name = CString::new(shm_name.clone())
            .map_err(|e| ShmemError::InvalidName(format!("{shm_name}: {e}")))?;

        let fd = unsafe { shm_open(c_name.as_ptr(), O_RDONLY, 0) };
        if fd == -1 {
            return Err(ShmemError::ConnectionUnavailable {
                name: shm_name,
                source: std::io::Error::last_os_error(),
            });
        }

        // Mapping past the end of the object faults on access, so check first
        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { fstat(fd, &raw mut stat) } == -1 {
            let source = std::io::Error::last_os_error();
            unsafe { close(fd) };
            return Err(ShmemError::ConnectionUnavailable {
                name: shm_name,
                source,
            });
        }
        let actual = usize::try_from(stat.st_size).unwrap_or(0);
        if actual < size {
            unsafe { close(fd) };
            return Err(ShmemError::SizeMismatch {
                name: shm_name,
                expected: size,
                actual,
            });
        }

        let ptr = unsafe {
            mmap(
                ptr::null_mut(),
                size as size_t,
                PROT_READ,
                MAP_SHARED,
                fd,
                0,
            )
        };
        let map_error = std::io::Error::last_os_error();
        unsafe { close(fd) };

        if ptr == libc::MAP_FAILED {
            return Err(ShmemError::ConnectionUnavailable {
                name: shm_name,
                source: map_error,
            });
        }

        tracing::debug!("Mapped {shm_name} ({size} bytes) read-only");

        Ok(Self { ptr, size })
    }

    /// Copy bytes out of the mapping. Bounds are checked by the caller.
    #[allow(unsafe_code)]
    pub fn copy_to(&self, offset: usize, destination: &mut [u8]) {
        debug_assert!(offset + destination.len() <= self.size);
        unsafe {
            ptr::copy_nonoverlapping(
                self.ptr.cast::<u8>().add(offset),
                destination.as_mut_ptr(),
                destination.len(),
            );
        }
    }
}

impl Drop for PlatformSegment {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                munmap(self.ptr, self.size as size_t);
            }
            self.ptr = ptr::null_mut();
        }
    }
}

// SAFETY: the mapping is read-only from this process and owned by exactly
// one PlatformSegment, so moving it between threads is sound.
#[allow(unsafe_code)]
unsafe impl Send for PlatformSegment {}

// SAFETY: only shared reads go through &PlatformSegment.
#[allow(unsafe_code)]
unsafe impl Sync for PlatformSegment {}
