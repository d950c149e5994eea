//! Read-only shared memory access for emulator integrations.
//!
//! Emulator-side integrations continuously mirror console memory into a
//! named, fixed-size shared region. This crate maps such a region into the
//! current process and exposes it only through bounds-checked copies.
//!
//! ## Platform support
//!
//! - Unix: `shm_open` + `mmap(PROT_READ)` directly, so the region never
//!   needs to exist as a regular file
//! - Windows: `OpenFileMappingW` / `MapViewOfFile` on the named mapping
//!
//! The raw pointer lives only in the platform modules; everything above
//! them goes through [`SegmentReader`].
//!
//! ## Consistency
//!
//! The integration writes the region while we read it. A copy is not
//! atomic with respect to the writer: two copies taken back to back may
//! straddle an emulator frame, so separate domains can reflect different
//! frames. Callers accept that approximation.

#![warn(missing_docs)]
#![allow(clippy::must_use_candidate)]

use std::time::{Duration, Instant};
use thiserror::Error;

#[cfg(unix)]
mod platform_unix;
#[cfg(windows)]
mod platform_windows;

mod segment;
mod snapshot;

pub use segment::SharedMemorySegment;
pub use snapshot::{InMemoryOpener, SnapshotBuffer, SnapshotView};

/// Interval between open attempts in [`open_with_retry`].
const OPEN_RETRY_MS: u64 = 10;

/// Result type for shared memory operations.
pub type Result<T> = std::result::Result<T, ShmemError>;

/// Errors that can occur while mapping or reading shared memory.
#[derive(Debug, Error)]
pub enum ShmemError {
    /// The named region does not exist (integration not started) or could
    /// not be mapped.
    #[error("Shared memory region {name} is unavailable: {source}")]
    ConnectionUnavailable {
        /// Region name
        name: String,
        /// OS error
        #[source]
        source: std::io::Error,
    },

    /// A copy would read past the end of the mapped region.
    #[error("Read of {length} bytes at offset {offset} exceeds region size {size}")]
    OutOfBoundsRead {
        /// Requested offset
        offset: usize,
        /// Requested length
        length: usize,
        /// Mapped size
        size: usize,
    },

    /// The region exists but is smaller than the size we were told to map.
    #[error("Shared memory region {name} holds {actual} bytes, expected at least {expected}")]
    SizeMismatch {
        /// Region name
        name: String,
        /// Size requested by the caller
        expected: usize,
        /// Size reported by the OS
        actual: usize,
    },

    /// The segment was closed before the read.
    #[error("Shared memory region {0} is closed")]
    Closed(String),

    /// The region name cannot be passed to the OS.
    #[error("Invalid shared memory name: {0}")]
    InvalidName(String),
}

impl ShmemError {
    /// Whether the error means "integration not running yet".
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::ConnectionUnavailable { .. })
    }
}

/// Read access to a mapped region.
pub trait SegmentReader: Send + Sync {
    /// Region name
    fn name(&self) -> &str;

    /// Mapped size in bytes
    fn size(&self) -> usize;

    /// Copy `destination.len()` bytes starting at `offset`.
    ///
    /// Fails with [`ShmemError::OutOfBoundsRead`] if
    /// `offset + destination.len()` exceeds [`SegmentReader::size`].
    fn copy_bytes_to(&self, offset: usize, destination: &mut [u8]) -> Result<()>;

    /// Release the mapping. Safe to call more than once.
    fn close(&mut self);
}

/// Opens named regions. The seam drivers use to reach shared memory.
pub trait SegmentOpener: Send + Sync {
    /// Map the named region read-only.
    fn open(&self, name: &str, size: usize) -> Result<Box<dyn SegmentReader>>;
}

/// Opens regions through the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemOpener;

impl SegmentOpener for SystemOpener {
    fn open(&self, name: &str, size: usize) -> Result<Box<dyn SegmentReader>> {
        Ok(Box::new(SharedMemorySegment::open(name, size)?))
    }
}

/// Open a region, retrying while it does not exist yet.
///
/// Retries every 10ms until `timeout` has elapsed, then returns the last
/// [`ShmemError::ConnectionUnavailable`]. Other errors return immediately.
pub fn open_with_retry(
    opener: &dyn SegmentOpener,
    name: &str,
    size: usize,
    timeout: Duration,
) -> Result<Box<dyn SegmentReader>> {
    let start = Instant::now();
    let retry_interval = Duration::from_millis(OPEN_RETRY_MS);

    loop {
        match opener.open(name, size) {
            Ok(segment) => return Ok(segment),
            Err(e) if e.is_unavailable() && start.elapsed() + retry_interval < timeout => {
                std::thread::sleep(retry_interval);
            }
            Err(e) => {
                tracing::debug!("Giving up on shared memory {name}: {e}");
                return Err(e);
            }
        }
    }
}

pub(crate) fn check_bounds(offset: usize, length: usize, size: usize) -> Result<()> {
    match offset.checked_add(length) {
        Some(end) if end <= size => Ok(()),
        _ => Err(ShmemError::OutOfBoundsRead {
            offset,
            length,
            size,
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_check_bounds() {
        assert!(check_bounds(0, 32, 32).is_ok());
        assert!(check_bounds(31, 1, 32).is_ok());
        assert!(check_bounds(32, 0, 32).is_ok());
        assert!(matches!(
            check_bounds(31, 2, 32),
            Err(ShmemError::OutOfBoundsRead { .. })
        ));
        assert!(check_bounds(usize::MAX, 2, 32).is_err());
    }

    #[test]
    fn test_open_with_retry_gives_up() {
        let opener = InMemoryOpener::new();
        let start = Instant::now();
        let result = open_with_retry(&opener, "missing", 16, Duration::from_millis(50));

        assert!(matches!(
            result,
            Err(ShmemError::ConnectionUnavailable { .. })
        ));
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_open_with_retry_does_not_retry_size_mismatch() {
        let opener = InMemoryOpener::new();
        opener.insert(SnapshotBuffer::new("small", 8));

        let result = open_with_retry(&opener, "small", 16, Duration::from_secs(5));
        assert!(matches!(result, Err(ShmemError::SizeMismatch { .. })));
    }

    #[test]
    fn test_system_opener_missing_region() {
        let result = SystemOpener.open("memlink_test_region_that_does_not_exist", 32);
        assert!(result.is_err());
    }
}
