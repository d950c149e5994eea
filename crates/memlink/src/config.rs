//! Runtime configuration.
//!
//! Every option can be given on the command line or through a `MEMLINK_*`
//! environment variable, with defaults matching the stock integration.
//!
//! # Example
//!
//! ```no_run
//! use memlink::MemlinkConfig;
//!
//! let config = MemlinkConfig::from_args();
//! config.validate().expect("Invalid configuration");
//!
//! println!("Protocol server binds to {}", config.udp_bind);
//! ```

use crate::driver::{
    Driver, SharedMemoryDriver, SharedMemoryDriverConfig, StaticDriver, UdpDriver,
    UdpDriverConfig,
};
use crate::error::ConfigError;
use crate::platform::{self, PlatformEntry};
use crate::probe::DriverProbe;
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;

/// Transport kinds that can be registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum DriverKind {
    /// Shared memory snapshot with a named pipe write channel
    SharedMemory,
    /// UDP instruction protocol with a pushed region
    Udp,
    /// In-process fixture, debug builds only
    Static,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Memlink configuration loaded from CLI args and environment variables.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "memlink",
    about = "Synchronize emulator memory over shared memory and UDP",
    version
)]
pub struct MemlinkConfig {
    /// Protocol server bind address (loopback only)
    #[arg(long, env = "MEMLINK_UDP_BIND", default_value = "127.0.0.1:55356")]
    pub udp_bind: SocketAddr,

    /// Endpoint of the UDP push integration
    #[arg(
        long,
        env = "MEMLINK_INTEGRATION_ENDPOINT",
        default_value = "127.0.0.1:55355"
    )]
    pub integration_endpoint: SocketAddr,

    /// Shared memory metadata region name
    #[arg(
        long,
        env = "MEMLINK_METADATA_REGION",
        default_value = "MEMLINK_INTEGRATION_META"
    )]
    pub metadata_region: String,

    /// Shared memory data region name
    #[arg(
        long,
        env = "MEMLINK_DATA_REGION",
        default_value = "MEMLINK_INTEGRATION_DATA"
    )]
    pub data_region: String,

    /// Size of the data and push regions in bytes
    #[arg(long, env = "MEMLINK_DATA_SIZE", default_value_t = 4 * 1024 * 1024)]
    pub data_size: usize,

    /// Region the UDP push integration mirrors into
    #[arg(long, env = "MEMLINK_PUSH_REGION", default_value = "MEMLINK_PUSH_DATA")]
    pub push_region: String,

    /// Side channel pipe name for shared memory writes
    #[arg(long, env = "MEMLINK_PIPE_NAME", default_value = "memlink_integration")]
    pub pipe_name: String,

    /// Timeout for opening regions and waiting for answers
    #[arg(long, env = "MEMLINK_READ_TIMEOUT_MS", default_value_t = 100)]
    pub read_timeout_ms: u64,

    /// Passes over the driver list before giving up
    #[arg(long, env = "MEMLINK_PROBE_ATTEMPTS", default_value_t = 25)]
    pub probe_attempts: u32,

    /// Pause between probe passes
    #[arg(long, env = "MEMLINK_PROBE_PAUSE_MS", default_value_t = 50)]
    pub probe_pause_ms: u64,

    /// Change notification window
    #[arg(long, env = "MEMLINK_BATCH_WINDOW_MS", default_value_t = 50)]
    pub batch_window_ms: u64,

    /// Poll interval; defaults to the active driver's read delay
    #[arg(long, env = "MEMLINK_POLL_INTERVAL_MS")]
    pub poll_interval_ms: Option<u64>,

    /// Drivers to register, in probe order
    #[arg(
        long,
        env = "MEMLINK_DRIVERS",
        value_enum,
        value_delimiter = ',',
        default_value = "shared-memory,udp"
    )]
    pub drivers: Vec<DriverKind>,

    /// System whose domains the UDP driver and the fixture use
    #[arg(long, env = "MEMLINK_SYSTEM", default_value = "GBA")]
    pub system: String,

    /// Log output format
    #[arg(long, env = "MEMLINK_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl MemlinkConfig {
    /// Parse configuration from command-line arguments.
    #[must_use]
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Validate configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - either endpoint is not a loopback address
    /// - a size, timeout, attempt count or window is zero
    /// - the data region cannot hold the largest platform layout
    /// - the driver list is empty, repeats a driver, or asks for the
    ///   static fixture in a release build
    /// - the system is unknown
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (address, what) in [
            (self.udp_bind, "protocol server"),
            (self.integration_endpoint, "integration endpoint"),
        ] {
            if !address.ip().is_loopback() {
                return Err(ConfigError::InvalidAddress {
                    address: address.to_string(),
                    reason: format!("{what} must be a loopback address"),
                });
            }
        }

        if self.data_size == 0 {
            return Err(ConfigError::ZeroValue("data size"));
        }
        if self.read_timeout_ms == 0 {
            return Err(ConfigError::ZeroValue("read timeout"));
        }
        if self.probe_attempts == 0 {
            return Err(ConfigError::ZeroValue("probe attempts"));
        }
        if self.batch_window_ms == 0 {
            return Err(ConfigError::ZeroValue("batch window"));
        }
        if self.poll_interval_ms == Some(0) {
            return Err(ConfigError::ZeroValue("poll interval"));
        }

        let required = platform::largest_domain_end();
        if self.data_size < required {
            return Err(ConfigError::DataRegionTooSmall {
                size: self.data_size,
                required,
            });
        }

        if self.drivers.is_empty() {
            return Err(ConfigError::InvalidDrivers(
                "at least one driver is required".to_string(),
            ));
        }
        for (i, kind) in self.drivers.iter().enumerate() {
            if self.drivers[..i].contains(kind) {
                return Err(ConfigError::InvalidDrivers(format!(
                    "{kind:?} is listed more than once"
                )));
            }
        }
        if self.drivers.contains(&DriverKind::Static) && !cfg!(debug_assertions) {
            return Err(ConfigError::InvalidDrivers(
                "the static fixture driver is not available in release builds".to_string(),
            ));
        }

        self.platform()?;
        Ok(())
    }

    /// Platform named by `--system`.
    pub fn platform(&self) -> Result<&'static PlatformEntry, ConfigError> {
        platform::lookup(&self.system)
            .ok_or_else(|| ConfigError::UnknownSystem(self.system.clone()))
    }

    /// Timeout for regions and requests
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Change notification window
    pub const fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    /// Explicit poll interval, if configured
    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_ms.map(Duration::from_millis)
    }

    /// Probe loop settings
    pub const fn probe(&self) -> DriverProbe {
        DriverProbe::new(
            self.probe_attempts,
            Duration::from_millis(self.probe_pause_ms),
        )
    }

    /// Settings for the shared memory driver
    pub fn shared_memory_driver(&self) -> SharedMemoryDriverConfig {
        SharedMemoryDriverConfig {
            metadata_region: self.metadata_region.clone(),
            data_region: self.data_region.clone(),
            data_size: self.data_size,
            pipe_name: self.pipe_name.clone(),
            timeout: self.read_timeout(),
        }
    }

    /// Settings for the UDP push driver
    pub fn udp_driver(&self) -> Result<UdpDriverConfig, ConfigError> {
        Ok(UdpDriverConfig {
            endpoint: self.integration_endpoint,
            push_region: self.push_region.clone(),
            push_size: self.data_size,
            timeout: self.read_timeout(),
            read_delay: self.platform()?.frame_interval(),
        })
    }

    /// Instantiate the configured drivers in probe order.
    pub fn build_drivers(&self) -> Result<Vec<Box<dyn Driver>>, ConfigError> {
        self.drivers
            .iter()
            .map(|kind| -> Result<Box<dyn Driver>, ConfigError> {
                Ok(match kind {
                    DriverKind::SharedMemory => {
                        Box::new(SharedMemoryDriver::new(self.shared_memory_driver()))
                    }
                    DriverKind::Udp => Box::new(UdpDriver::new(self.udp_driver()?)),
                    DriverKind::Static => Box::new(StaticDriver::new(self.platform()?)),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> MemlinkConfig {
        MemlinkConfig::try_parse_from(std::iter::once("memlink").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.udp_bind, "127.0.0.1:55356".parse().unwrap());
        assert_eq!(config.integration_endpoint, "127.0.0.1:55355".parse().unwrap());
        assert_eq!(config.data_size, 4 * 1024 * 1024);
        assert_eq!(config.drivers, vec![DriverKind::SharedMemory, DriverKind::Udp]);
        assert_eq!(config.probe(), DriverProbe::default());
        assert_eq!(config.read_timeout(), Duration::from_millis(100));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_public_bind() {
        let config = parse(&["--udp-bind", "0.0.0.0:55356"]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn test_rejects_small_data_region() {
        let config = parse(&["--data-size", "1024"]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DataRegionTooSmall { size: 1024, .. })
        ));
    }

    #[test]
    fn test_rejects_zero_values() {
        assert!(matches!(
            parse(&["--probe-attempts", "0"]).validate(),
            Err(ConfigError::ZeroValue("probe attempts"))
        ));
        assert!(matches!(
            parse(&["--poll-interval-ms", "0"]).validate(),
            Err(ConfigError::ZeroValue("poll interval"))
        ));
    }

    #[test]
    fn test_driver_list() {
        let config = parse(&["--drivers", "udp,static"]);
        assert_eq!(config.drivers, vec![DriverKind::Udp, DriverKind::Static]);
        if cfg!(debug_assertions) {
            assert!(config.validate().is_ok());
        } else {
            assert!(config.validate().is_err());
        }

        let names: Vec<String> = config
            .build_drivers()
            .unwrap()
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        assert_eq!(names, vec!["udp", "static"]);

        let config = parse(&["--drivers", "udp,udp"]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDrivers(_))
        ));
    }

    #[test]
    fn test_unknown_system() {
        let config = parse(&["--system", "PSX"]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownSystem(_))
        ));
    }
}
