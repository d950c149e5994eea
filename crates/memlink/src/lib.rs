//! Emulator memory synchronization.
//!
//! This crate connects to emulator-side integrations, reads mirrored
//! console memory, writes back into it, and turns memory churn into
//! batched change notifications.
//!
//! # Architecture
//!
//! - `platform`: static per-console memory layouts
//! - `driver`: the [`Driver`] trait and its shared memory, UDP and fixture
//!   transports
//! - `probe`: failover loop that finds a reachable driver
//! - `service`: owns the drivers and the active session
//! - `poller`: byte-level diffing of successive reads
//! - `batch`: windowed change coalescing and fan-out
//! - `handler`: protocol server handler forwarding integration events
//! - `config`: CLI and environment configuration
//!
//! # Example
//!
//! ```no_run
//! use memlink::{ChangeBatcher, DriverService, MemlinkConfig, MemoryPoller};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = MemlinkConfig::from_args();
//! config.validate()?;
//!
//! let blocks = config.platform()?.address_blocks();
//! let mut service = DriverService::new(config.build_drivers()?, config.probe());
//! let mut poller = MemoryPoller::new(&blocks);
//! let mut batcher = ChangeBatcher::new(config.batch_window());
//! let _changes = batcher.subscribe();
//!
//! service.connect(|attempt| println!("waiting for emulator ({attempt})")).await?;
//! let read = service.read_bytes(&blocks).await?;
//! batcher.observe(poller.diff(&read));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod batch;
pub mod config;
pub mod driver;
pub mod error;
pub mod handler;
pub mod platform;
pub mod poller;
pub mod probe;
pub mod service;

pub use batch::{BatchStats, ChangeBatch, ChangeBatcher, ChangeReceiver, DEFAULT_BATCH_WINDOW};
pub use config::{DriverKind, LogFormat, MemlinkConfig};
pub use driver::{
    BlockData, Driver, SharedMemoryDriver, SharedMemoryDriverConfig, StaticDriver, UdpDriver,
    UdpDriverConfig, WriteRequest,
};
pub use error::{ConfigError, DriverError, Result};
pub use handler::{EventForwarder, IntegrationEvent};
pub use platform::{DomainLayout, MemoryAddressBlock, PLATFORMS, PlatformEntry};
pub use poller::MemoryPoller;
pub use probe::DriverProbe;
pub use service::{DriverService, DriverSession, ProbeOutcome};
