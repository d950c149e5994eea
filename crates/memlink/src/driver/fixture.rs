//! In-process driver serving a fixed snapshot.
//!
//! Only usable in builds with debug assertions; release builds refuse to
//! connect so a fixture can never stand in for a real emulator.

use super::{BlockData, Driver};
use crate::error::{DriverError, Result};
use crate::platform::{MemoryAddressBlock, PlatformEntry};
use async_trait::async_trait;
use memlink_shmem::SnapshotBuffer;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Driver name
pub const STATIC_DRIVER_NAME: &str = "static";

/// A write received by [`StaticDriver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    /// Console address
    pub address: u32,
    /// Written bytes
    pub data: Vec<u8>,
    /// Property path, if given
    pub path: Option<String>,
}

/// Fixture driver backed by one [`SnapshotBuffer`] per domain.
#[derive(Debug)]
pub struct StaticDriver {
    platform: &'static PlatformEntry,
    buffers: Vec<SnapshotBuffer>,
    writes: Arc<Mutex<Vec<RecordedWrite>>>,
    reachable: bool,
    connected: bool,
}

impl StaticDriver {
    /// Zero-filled snapshot of every domain of `platform`.
    pub fn new(platform: &'static PlatformEntry) -> Self {
        let buffers = platform
            .domains
            .iter()
            .map(|d| SnapshotBuffer::new(d.domain_id, usize::try_from(d.length).unwrap_or(0)))
            .collect();

        Self {
            platform,
            buffers,
            writes: Arc::new(Mutex::new(Vec::new())),
            reachable: true,
            connected: false,
        }
    }

    /// Make the driver fail (or pass) its connection test.
    #[must_use]
    pub fn reachable(mut self, reachable: bool) -> Self {
        self.reachable = reachable;
        self
    }

    /// Buffer of a domain, for seeding test data
    pub fn snapshot(&self, domain_id: &str) -> Option<SnapshotBuffer> {
        self.buffers.iter().find(|b| b.name() == domain_id).cloned()
    }

    /// Writes received so far
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().clone()
    }

    /// Shared handle to the write log, usable after the driver is boxed
    pub fn write_log(&self) -> Arc<Mutex<Vec<RecordedWrite>>> {
        Arc::clone(&self.writes)
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(DriverError::NotConnected(STATIC_DRIVER_NAME.to_string()))
        }
    }
}

#[async_trait]
impl Driver for StaticDriver {
    fn name(&self) -> &str {
        STATIC_DRIVER_NAME
    }

    fn delay_between_reads(&self) -> Duration {
        self.platform.frame_interval()
    }

    fn platform(&self) -> Option<&'static PlatformEntry> {
        Some(self.platform)
    }

    async fn establish_connection(&mut self) -> Result<()> {
        if !cfg!(debug_assertions) {
            return Err(DriverError::FixtureInRelease(STATIC_DRIVER_NAME.to_string()));
        }
        if !self.reachable {
            return Err(DriverError::ConnectionUnavailable(format!(
                "{STATIC_DRIVER_NAME} fixture is marked unreachable"
            )));
        }
        self.connected = true;
        Ok(())
    }

    async fn test_connection(&mut self) -> bool {
        match self.establish_connection().await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("{STATIC_DRIVER_NAME}: {e}");
                self.connected = false;
                false
            }
        }
    }

    async fn read_bytes(&mut self, _blocks: &[MemoryAddressBlock]) -> Result<Vec<BlockData>> {
        self.ensure_connected()?;
        Ok(self
            .platform
            .domains
            .iter()
            .zip(&self.buffers)
            .map(|(domain, buffer)| BlockData::new(domain.memory_start, buffer.to_vec()))
            .collect())
    }

    async fn write_bytes(
        &mut self,
        address: u32,
        bytes: &[u8],
        path: Option<&str>,
    ) -> Result<()> {
        self.ensure_connected()?;
        let (domain, relative) = self
            .platform
            .resolve_write(address, bytes.len())
            .ok_or_else(|| DriverError::AddressNotMapped {
                address,
                system: self.platform.system_id.to_string(),
            })?;

        if let Some(buffer) = self.buffers.iter().find(|b| b.name() == domain.domain_id) {
            buffer.write(relative as usize, bytes);
        }
        self.writes.lock().push(RecordedWrite {
            address,
            data: bytes.to_vec(),
            path: path.map(str::to_string),
        });
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::lookup;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_writes_show_up_in_reads() {
        let mut driver = StaticDriver::new(lookup("NES").unwrap());
        assert!(driver.test_connection().await);

        driver
            .write_bytes(0x0010, &[0xAA, 0xBB], Some("player.hp"))
            .await
            .unwrap();

        let blocks = driver.read_bytes(&[]).await.unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].start, 0);
        assert_eq!(&blocks[0].data[0x10..0x12], &[0xAA, 0xBB]);
        assert_eq!(
            driver.writes(),
            vec![RecordedWrite {
                address: 0x10,
                data: vec![0xAA, 0xBB],
                path: Some("player.hp".to_string()),
            }]
        );
    }

    #[tokio::test]
    async fn test_unreachable_fixture() {
        let mut driver = StaticDriver::new(lookup("NES").unwrap()).reachable(false);
        assert!(!driver.test_connection().await);
        assert!(matches!(
            driver.read_bytes(&[]).await,
            Err(DriverError::NotConnected(_))
        ));
    }

    #[tokio::test]
    async fn test_write_outside_domains() {
        let mut driver = StaticDriver::new(lookup("NES").unwrap());
        driver.establish_connection().await.unwrap();

        let result = driver.write_bytes(0x4000, &[1], None).await;
        assert!(matches!(
            result,
            Err(DriverError::AddressNotMapped {
                address: 0x4000,
                ..
            })
        ));
        assert!(driver.writes().is_empty());
    }

    #[tokio::test]
    async fn test_writes_stay_inside_their_domain() {
        let platform = lookup("GB").unwrap();
        let mut driver = StaticDriver::new(platform);
        driver.establish_connection().await.unwrap();

        driver.write_bytes(0xA000, &[0x55], None).await.unwrap();
        let blocks = driver.read_bytes(&[]).await.unwrap();
        assert_eq!(blocks[1].start, 0xA000);
        assert_eq!(blocks[1].data[0], 0x55);
        assert_eq!(blocks[0].data[0x1FFF], 0);

        // Runs past the end of VRAM
        let result = driver.write_bytes(0x9FFF, &[1, 2], None).await;
        assert!(matches!(
            result,
            Err(DriverError::AddressNotMapped { address: 0x9FFF, .. })
        ));

        let blocks = driver.read_bytes(&[]).await.unwrap();
        let lengths: Vec<usize> = blocks.iter().map(|b| b.data.len()).collect();
        let expected: Vec<usize> = platform.domains.iter().map(|d| d.length as usize).collect();
        assert_eq!(lengths, expected);
        assert_eq!(driver.writes().len(), 1);
    }
}
