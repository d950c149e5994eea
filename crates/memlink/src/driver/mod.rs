//! Driver abstraction over emulator transports.
//!
//! A driver connects to one kind of emulator integration and exposes the
//! same five operations regardless of transport:
//!
//! - [`SharedMemoryDriver`]: reads a mirrored snapshot from shared memory
//!   and sends writes over a named pipe side channel
//! - [`UdpDriver`]: declares read windows over the UDP instruction
//!   protocol and reads the pushed region
//! - [`StaticDriver`]: fixed in-process snapshot for tests and demos
//!
//! New transports implement [`Driver`] without touching the probe loop.

use crate::error::Result;
use crate::platform::{MemoryAddressBlock, PlatformEntry};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

mod fixture;
mod pipe;
mod shared_memory;
mod udp;

pub use fixture::{RecordedWrite, STATIC_DRIVER_NAME, StaticDriver};
pub use pipe::WriteRequest;
pub use shared_memory::{
    METADATA_REGION_SIZE, SHARED_MEMORY_DRIVER_NAME, SUPPORTED_INTEGRATION_VERSION,
    SharedMemoryDriver, SharedMemoryDriverConfig,
};
pub use udp::{UDP_DRIVER_NAME, UdpDriver, UdpDriverConfig};

/// Bytes read from one memory range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockData {
    /// Console address of the first byte
    pub start: u32,
    /// Memory contents
    pub data: Vec<u8>,
}

impl BlockData {
    /// Create a block
    pub fn new(start: u32, data: Vec<u8>) -> Self {
        Self { start, data }
    }
}

/// One transport to an emulator integration.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Human-readable driver name, unique among registered drivers
    fn name(&self) -> &str;

    /// Minimum delay callers should leave between reads
    fn delay_between_reads(&self) -> Duration;

    /// Platform of the connected game, when the transport reports one
    fn platform(&self) -> Option<&'static PlatformEntry> {
        None
    }

    /// Connect to the integration, replacing any previous connection.
    async fn establish_connection(&mut self) -> Result<()>;

    /// Whether the integration is reachable now.
    ///
    /// Connects first when not yet connected. Never returns an error;
    /// failures are logged and reported as `false`.
    async fn test_connection(&mut self) -> bool;

    /// Read the current memory contents.
    async fn read_bytes(&mut self, blocks: &[MemoryAddressBlock]) -> Result<Vec<BlockData>>;

    /// Write `bytes` at console address `address`.
    ///
    /// `path` names the property being written, for diagnostics.
    async fn write_bytes(&mut self, address: u32, bytes: &[u8], path: Option<&str>)
    -> Result<()>;

    /// Release the connection. Safe to call when not connected.
    async fn disconnect(&mut self);
}
