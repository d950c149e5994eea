//! In-process regions for fixtures and tests.
//!
//! [`SnapshotBuffer`] plays the integration's side of a region: it owns the
//! bytes and can be written at any time. [`InMemoryOpener`] hands out
//! read-only [`SnapshotView`]s of registered buffers through the same
//! [`SegmentOpener`] seam the drivers use for real shared memory.

use crate::{Result, SegmentOpener, SegmentReader, ShmemError, check_bounds};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;

/// Named, shared, growable byte buffer.
#[derive(Debug, Clone)]
pub struct SnapshotBuffer {
    name: Arc<str>,
    data: Arc<RwLock<Vec<u8>>>,
}

impl SnapshotBuffer {
    /// Zero-filled buffer of `size` bytes
    pub fn new(name: &str, size: usize) -> Self {
        Self::from_bytes(name, vec![0u8; size])
    }

    /// Buffer holding `bytes`
    pub fn from_bytes(name: &str, bytes: Vec<u8>) -> Self {
        Self {
            name: Arc::from(name),
            data: Arc::new(RwLock::new(bytes)),
        }
    }

    /// Region name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current length
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Overwrite bytes at `offset`, growing the buffer if needed.
    pub fn write(&self, offset: usize, bytes: &[u8]) {
        let mut data = self.data.write();
        let end = offset + bytes.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(bytes);
    }

    /// Copy of the current contents
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Read-only view, as handed out by [`InMemoryOpener`]
    pub fn view(&self) -> SnapshotView {
        SnapshotView {
            buffer: Some(self.clone()),
            name: self.name.to_string(),
            size: self.len(),
        }
    }
}

/// Read-only view of a [`SnapshotBuffer`].
#[derive(Debug)]
pub struct SnapshotView {
    buffer: Option<SnapshotBuffer>,
    name: String,
    size: usize,
}

impl SegmentReader for SnapshotView {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> usize {
        self.size
    }

    fn copy_bytes_to(&self, offset: usize, destination: &mut [u8]) -> Result<()> {
        let buffer = self
            .buffer
            .as_ref()
            .ok_or_else(|| ShmemError::Closed(self.name.clone()))?;
        check_bounds(offset, destination.len(), self.size)?;

        let data = buffer.data.read();
        // Buffers only grow, so a view sized at open time stays in range
        destination.copy_from_slice(&data[offset..offset + destination.len()]);
        Ok(())
    }

    fn close(&mut self) {
        self.buffer = None;
    }
}

/// Opener backed by registered [`SnapshotBuffer`]s.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOpener {
    regions: Arc<RwLock<HashMap<String, SnapshotBuffer>>>,
}

impl InMemoryOpener {
    /// Opener with no regions
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a buffer openable under its name
    pub fn insert(&self, buffer: SnapshotBuffer) {
        self.regions
            .write()
            .insert(buffer.name().to_string(), buffer);
    }

    /// Stop handing out a region; existing views keep working
    pub fn remove(&self, name: &str) -> Option<SnapshotBuffer> {
        self.regions.write().remove(name)
    }
}

impl SegmentOpener for InMemoryOpener {
    fn open(&self, name: &str, size: usize) -> Result<Box<dyn SegmentReader>> {
        let regions = self.regions.read();
        let buffer = regions
            .get(name)
            .ok_or_else(|| ShmemError::ConnectionUnavailable {
                name: name.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "region not registered"),
            })?;

        let actual = buffer.len();
        if actual < size {
            return Err(ShmemError::SizeMismatch {
                name: name.to_string(),
                expected: size,
                actual,
            });
        }

        Ok(Box::new(SnapshotView {
            buffer: Some(buffer.clone()),
            name: name.to_string(),
            size,
        }))
    }
}
