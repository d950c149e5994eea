//! Windows shared memory mapping using `OpenFileMappingW`.
//!
//! The integration creates a named file mapping backed by the page file.
//! We open it with `FILE_MAP_READ` and map a view of `size` bytes.

use std::ptr;

use winapi::shared::minwindef::{FALSE, LPVOID};
use winapi::um::handleapi::CloseHandle;
use winapi::um::memoryapi::{FILE_MAP_READ, MapViewOfFile, OpenFileMappingW, UnmapViewOfFile};
use winapi::um::winnt::HANDLE;

use crate::{Result, ShmemError};

/// Read-only view of a named file mapping.
#[allow(unsafe_code)]
pub struct PlatformSegment {
    /// File mapping handle.
    handle: HANDLE,
    /// Start of the mapped view.
    view: LPVOID,
    /// Mapped length.
    size: usize,
}

impl PlatformSegment {
    /// Open and map an existing named file mapping.
    #[allow(unsafe_code)]
    pub fn open(name: &str, size: usize) -> Result<Self> {
        if name.contains('\0') {
            return Err(ShmemError::InvalidName(name.to_string()));
        }
        let name_wide: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();

        let handle = unsafe { OpenFileMappingW(FILE_MAP_READ, FALSE, name_wide.as_ptr()) };
        if handle.is_null() {
            return Err(ShmemError::ConnectionUnavailable {
                name: name.to_string(),
                source: std::io::Error::last_os_error(),
            });
        }

        let view = unsafe { MapViewOfFile(handle, FILE_MAP_READ, 0, 0, size) };
        if view.is_null() {
            let source = std::io::Error::last_os_error();
            unsafe { CloseHandle(handle) };
            return Err(ShmemError::ConnectionUnavailable {
                name: name.to_string(),
                source,
            });
        }

        tracing::debug!("Mapped {name} ({size} bytes) read-only");

        Ok(Self { handle, view, size })
    }

    /// Copy bytes out of the view. Bounds are checked by the caller.
    #[allow(unsafe_code)]
    pub fn copy_to(&self, offset: usize, destination: &mut [u8]) {
        debug_assert!(offset + destination.len() <= self.size);
        unsafe {
            ptr::copy_nonoverlapping(
                self.view.cast::<u8>().add(offset),
                destination.as_mut_ptr(),
                destination.len(),
            );
        }
    }
}

impl Drop for PlatformSegment {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        unsafe {
            if !self.view.is_null() {
                UnmapViewOfFile(self.view);
                self.view = ptr::null_mut();
            }
            if !self.handle.is_null() {
                CloseHandle(self.handle);
                self.handle = ptr::null_mut();
            }
        }
    }
}

// SAFETY: the view is read-only from this process and owned by exactly one
// PlatformSegment; HANDLE values are process-wide.
#[allow(unsafe_code)]
unsafe impl Send for PlatformSegment {}

// SAFETY: only shared reads go through &PlatformSegment.
#[allow(unsafe_code)]
unsafe impl Sync for PlatformSegment {}
