//! Driver for integrations that mirror memory into shared memory.
//!
//! The integration exposes two regions:
//!
//! - a 32-byte metadata region: byte 1 is the integration version, bytes
//!   2..32 the UTF-8 system name padded with NULs
//! - a data region holding every domain of the active platform at the
//!   offsets given by [`PlatformEntry::domains`]
//!
//! Writes go through the named pipe side channel and are fire-and-forget.

use super::pipe::{PipeWriter, WriteRequest};
use super::{BlockData, Driver};
use crate::error::{DriverError, Result};
use crate::platform::{MemoryAddressBlock, PLATFORMS, PlatformEntry, lookup_in};
use async_trait::async_trait;
use memlink_shmem::{SegmentOpener, SegmentReader, SystemOpener, open_with_retry};
use std::sync::Arc;
use std::time::Duration;

/// Driver name
pub const SHARED_MEMORY_DRIVER_NAME: &str = "shared-memory";

/// Integration version this build understands
pub const SUPPORTED_INTEGRATION_VERSION: u8 = 1;

/// Size of the metadata region
pub const METADATA_REGION_SIZE: usize = 32;

const VERSION_OFFSET: usize = 1;
const SYSTEM_NAME_OFFSET: usize = 2;

/// Settings for [`SharedMemoryDriver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedMemoryDriverConfig {
    /// Name of the metadata region
    pub metadata_region: String,
    /// Name of the data region
    pub data_region: String,
    /// Size of the data region in bytes
    pub data_size: usize,
    /// Side channel pipe name
    pub pipe_name: String,
    /// Bound on opening regions and connecting the pipe
    pub timeout: Duration,
}

impl Default for SharedMemoryDriverConfig {
    fn default() -> Self {
        Self {
            metadata_region: "MEMLINK_INTEGRATION_META".to_string(),
            data_region: "MEMLINK_INTEGRATION_DATA".to_string(),
            data_size: 4 * 1024 * 1024,
            pipe_name: "memlink_integration".to_string(),
            timeout: Duration::from_millis(100),
        }
    }
}

/// Metadata preamble published by the integration.
#[derive(Debug, Clone, PartialEq, Eq)]
struct IntegrationMetadata {
    version: u8,
    system: String,
}

impl IntegrationMetadata {
    fn parse(bytes: &[u8; METADATA_REGION_SIZE]) -> Self {
        let name = String::from_utf8_lossy(&bytes[SYSTEM_NAME_OFFSET..]);
        Self {
            version: bytes[VERSION_OFFSET],
            system: name.trim_end_matches('\0').trim().to_string(),
        }
    }
}

struct Connection {
    platform: &'static PlatformEntry,
    data: Box<dyn SegmentReader>,
}

/// Shared memory snapshot driver with a named pipe write channel.
pub struct SharedMemoryDriver {
    config: SharedMemoryDriverConfig,
    opener: Arc<dyn SegmentOpener>,
    platforms: &'static [PlatformEntry],
    connection: Option<Connection>,
}

impl SharedMemoryDriver {
    /// Driver reading real OS shared memory.
    pub fn new(config: SharedMemoryDriverConfig) -> Self {
        Self::with_opener(config, Arc::new(SystemOpener))
    }

    /// Driver reading regions through `opener`.
    pub fn with_opener(config: SharedMemoryDriverConfig, opener: Arc<dyn SegmentOpener>) -> Self {
        Self {
            config,
            opener,
            platforms: PLATFORMS,
            connection: None,
        }
    }

    /// Replace the platform table.
    #[must_use]
    pub fn with_platforms(mut self, platforms: &'static [PlatformEntry]) -> Self {
        self.platforms = platforms;
        self
    }

    /// Whether a data region is mapped
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    async fn open_region(&self, name: &str, size: usize) -> Result<Box<dyn SegmentReader>> {
        let opener = Arc::clone(&self.opener);
        let name = name.to_string();
        let timeout = self.config.timeout;

        let segment = tokio::task::spawn_blocking(move || {
            open_with_retry(opener.as_ref(), &name, size, timeout)
        })
        .await
        .map_err(|e| DriverError::Io(std::io::Error::other(e)))??;

        Ok(segment)
    }

    async fn read_metadata(&self) -> Result<IntegrationMetadata> {
        let mut segment = self
            .open_region(&self.config.metadata_region, METADATA_REGION_SIZE)
            .await?;

        let mut bytes = [0u8; METADATA_REGION_SIZE];
        let copied = segment.copy_bytes_to(0, &mut bytes);
        segment.close();
        copied?;

        Ok(IntegrationMetadata::parse(&bytes))
    }

    fn close_connection(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.data.close();
            tracing::debug!(
                "Released {} data region for {}",
                self.config.data_region,
                connection.platform.system_id
            );
        }
    }
}

#[async_trait]
impl Driver for SharedMemoryDriver {
    fn name(&self) -> &str {
        SHARED_MEMORY_DRIVER_NAME
    }

    fn delay_between_reads(&self) -> Duration {
        self.platform()
            .map_or(Duration::from_secs(1) / 60, PlatformEntry::frame_interval)
    }

    fn platform(&self) -> Option<&'static PlatformEntry> {
        self.connection.as_ref().map(|c| c.platform)
    }

    async fn establish_connection(&mut self) -> Result<()> {
        self.close_connection();

        let metadata = self.read_metadata().await?;

        if metadata.version != SUPPORTED_INTEGRATION_VERSION {
            return Err(DriverError::IntegrationVersionMismatch {
                expected: SUPPORTED_INTEGRATION_VERSION,
                actual: metadata.version,
            });
        }
        if metadata.system.is_empty() {
            return Err(DriverError::NoActiveGame);
        }
        let platform = lookup_in(self.platforms, &metadata.system)
            .ok_or_else(|| DriverError::UnsupportedSystem(metadata.system.clone()))?;

        let data = self
            .open_region(&self.config.data_region, self.config.data_size)
            .await?;

        tracing::info!(
            "Connected to {} integration ({} domains, {} byte region)",
            platform.system_id,
            platform.domains.len(),
            data.size()
        );

        self.connection = Some(Connection { platform, data });
        Ok(())
    }

    async fn test_connection(&mut self) -> bool {
        if self.connection.is_some() {
            // The integration may have switched games or shut down
            match self.read_metadata().await {
                Ok(metadata)
                    if metadata.version == SUPPORTED_INTEGRATION_VERSION
                        && self
                            .platform()
                            .is_some_and(|p| p.system_id.eq_ignore_ascii_case(&metadata.system)) =>
                {
                    return true;
                }
                Ok(_) => tracing::info!("Integration metadata changed, reconnecting"),
                Err(e) => tracing::debug!("Shared memory metadata unavailable: {e}"),
            }
        }

        match self.establish_connection().await {
            Ok(()) => true,
            Err(e) => {
                if e.is_user_facing() {
                    tracing::warn!("{SHARED_MEMORY_DRIVER_NAME}: {e}");
                } else {
                    tracing::debug!("{SHARED_MEMORY_DRIVER_NAME}: {e}");
                }
                false
            }
        }
    }

    async fn read_bytes(&mut self, _blocks: &[MemoryAddressBlock]) -> Result<Vec<BlockData>> {
        let connection = self
            .connection
            .as_ref()
            .ok_or_else(|| DriverError::NotConnected(SHARED_MEMORY_DRIVER_NAME.to_string()))?;

        let mut blocks = Vec::with_capacity(connection.platform.domains.len());
        let mut failure = None;

        for domain in connection.platform.domains {
            let (Ok(offset), Ok(length)) = (
                usize::try_from(domain.start_offset),
                usize::try_from(domain.length),
            ) else {
                failure = Some(DriverError::OutOfBoundsRead {
                    offset: 0,
                    length: 0,
                });
                break;
            };

            let mut data = vec![0u8; length];
            if let Err(e) = connection.data.copy_bytes_to(offset, &mut data) {
                failure = Some(e.into());
                break;
            }
            blocks.push(BlockData::new(domain.memory_start, data));
        }

        if let Some(err) = failure {
            // A region smaller than the layout means both sides disagree on
            // the size contract; this connection cannot be trusted
            tracing::error!("Dropping shared memory connection: {err}");
            self.close_connection();
            return Err(err);
        }

        Ok(blocks)
    }

    async fn write_bytes(
        &mut self,
        address: u32,
        bytes: &[u8],
        path: Option<&str>,
    ) -> Result<()> {
        let platform = self
            .platform()
            .ok_or_else(|| DriverError::NotConnected(SHARED_MEMORY_DRIVER_NAME.to_string()))?;

        let (domain, relative) = platform
            .resolve_write(address, bytes.len())
            .ok_or_else(|| DriverError::AddressNotMapped {
                address,
                system: platform.system_id.to_string(),
            })?;

        let request = WriteRequest::new(domain.domain_id, relative, bytes);
        let line = request.to_line()?;
        let writer = PipeWriter::connect(&self.config.pipe_name, self.config.timeout).await?;

        tracing::debug!(
            "Writing {} bytes to {}+0x{relative:X} ({}): {}",
            bytes.len(),
            domain.domain_id,
            path.unwrap_or("-"),
            hex::encode(bytes)
        );

        let pipe_name = self.config.pipe_name.clone();
        let path = path.map(str::to_string);
        tokio::spawn(async move {
            if let Err(e) = writer.send(&line).await {
                tracing::error!(
                    "Write of 0x{address:X} ({}) over pipe {pipe_name} failed: {e}",
                    path.as_deref().unwrap_or("-")
                );
            }
        });

        Ok(())
    }

    async fn disconnect(&mut self) {
        self.close_connection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn metadata_bytes(version: u8, system: &str) -> [u8; METADATA_REGION_SIZE] {
        let mut bytes = [0u8; METADATA_REGION_SIZE];
        bytes[VERSION_OFFSET] = version;
        bytes[SYSTEM_NAME_OFFSET..SYSTEM_NAME_OFFSET + system.len()]
            .copy_from_slice(system.as_bytes());
        bytes
    }

    #[test]
    fn test_parse_metadata() {
        let metadata = IntegrationMetadata::parse(&metadata_bytes(1, "GBA"));
        assert_eq!(
            metadata,
            IntegrationMetadata {
                version: 1,
                system: "GBA".to_string()
            }
        );
    }

    #[test]
    fn test_parse_metadata_full_width_name() {
        let name = "X".repeat(METADATA_REGION_SIZE - SYSTEM_NAME_OFFSET);
        let metadata = IntegrationMetadata::parse(&metadata_bytes(1, &name));
        assert_eq!(metadata.system, name);
    }

    #[test]
    fn test_parse_metadata_empty_name() {
        let metadata = IntegrationMetadata::parse(&metadata_bytes(1, ""));
        assert!(metadata.system.is_empty());
    }
}
