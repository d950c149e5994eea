//! Owned handle to a mapped integration region.

#[cfg(unix)]
use crate::platform_unix::PlatformSegment;
#[cfg(windows)]
use crate::platform_windows::PlatformSegment;

use crate::{Result, SegmentReader, ShmemError, check_bounds};

/// A read-only shared memory segment.
///
/// The mapping is released exactly once: on [`SharedMemorySegment::close`]
/// or on drop, whichever comes first.
pub struct SharedMemorySegment {
    platform: Option<PlatformSegment>,
    name: String,
    size: usize,
}

impl SharedMemorySegment {
    /// Map an existing region of `size` bytes.
    ///
    /// Fails with [`ShmemError::ConnectionUnavailable`] when the region does
    /// not exist, which usually means the integration has not started.
    pub fn open(name: &str, size: usize) -> Result<Self> {
        let platform = PlatformSegment::open(name, size)?;
        Ok(Self {
            platform: Some(platform),
            name: name.to_string(),
            size,
        })
    }

    /// Whether the mapping is still live
    pub const fn is_open(&self) -> bool {
        self.platform.is_some()
    }
}

impl SegmentReader for SharedMemorySegment {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> usize {
        self.size
    }

    fn copy_bytes_to(&self, offset: usize, destination: &mut [u8]) -> Result<()> {
        let platform = self
            .platform
            .as_ref()
            .ok_or_else(|| ShmemError::Closed(self.name.clone()))?;
        check_bounds(offset, destination.len(), self.size)?;
        platform.copy_to(offset, destination);
        Ok(())
    }

    fn close(&mut self) {
        if self.platform.take().is_some() {
            tracing::debug!("Closed shared memory {}", self.name);
        }
    }
}

impl std::fmt::Debug for SharedMemorySegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMemorySegment")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("open", &self.is_open())
            .finish()
    }
}
