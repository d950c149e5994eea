//! Error types for drivers and configuration.
//!
//! Driver errors follow one propagation policy: transport and decode
//! failures are handled and logged where they happen, and only states a
//! user can act on (integration missing, version mismatch, unsupported
//! system, no game loaded) are surfaced.

use thiserror::Error;

/// Driver-level errors.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The emulator integration is not running or not reachable
    #[error("Emulator integration is not reachable: {0}")]
    ConnectionUnavailable(String),

    /// The integration speaks a different version than we support
    #[error("Integration version {actual} is not supported, expected {expected}; update the emulator integration")]
    IntegrationVersionMismatch {
        /// Version this build supports
        expected: u8,
        /// Version found in the metadata region
        actual: u8,
    },

    /// The loaded system has no platform entry
    #[error("System '{0}' is not supported")]
    UnsupportedSystem(String),

    /// The integration is running but no game is loaded
    #[error("No game is loaded in the emulator")]
    NoActiveGame,

    /// No domain covers the requested address
    #[error("Address 0x{address:X} is not mapped by platform {system}")]
    AddressNotMapped {
        /// Requested address
        address: u32,
        /// Active system
        system: String,
    },

    /// The integration sent something we could not decode
    #[error("Malformed instruction: {0}")]
    MalformedInstruction(String),

    /// A read went past the end of the shared buffer
    #[error("Read of {length} bytes at offset {offset} exceeds the shared buffer")]
    OutOfBoundsRead {
        /// Buffer offset
        offset: usize,
        /// Requested length
        length: usize,
    },

    /// The driver did not answer in time
    #[error("Driver {driver} timed out at address 0x{address:X}")]
    DriverTimeout {
        /// Address being accessed, 0 for liveness checks
        address: u32,
        /// Driver name
        driver: String,
    },

    /// Operation attempted before `establish_connection` succeeded
    #[error("Driver {0} is not connected")]
    NotConnected(String),

    /// The fixture driver was asked to run in a release build
    #[error("Driver {0} is only available in debug builds")]
    FixtureInRelease(String),

    /// No registered driver answered the probe
    #[error("No working driver found after {attempts} attempts")]
    NoDriverAvailable {
        /// Passes made over the driver list
        attempts: u32,
    },

    /// Instruction codec or UDP transport failure
    #[error("Protocol error: {0}")]
    Protocol(#[from] memlink_protocol::ProtocolError),

    /// Shared memory failure not covered by a more specific variant
    #[error("Shared memory error: {0}")]
    Shmem(memlink_shmem::ShmemError),

    /// Side channel serialization failure
    #[error("Failed to encode write request: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<memlink_shmem::ShmemError> for DriverError {
    fn from(err: memlink_shmem::ShmemError) -> Self {
        use memlink_shmem::ShmemError;
        match err {
            ShmemError::ConnectionUnavailable { .. } => Self::ConnectionUnavailable(err.to_string()),
            ShmemError::OutOfBoundsRead { offset, length, .. } => {
                Self::OutOfBoundsRead { offset, length }
            }
            other => Self::Shmem(other),
        }
    }
}

impl DriverError {
    /// Whether the error should be shown to the user as-is.
    pub const fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::ConnectionUnavailable(_)
                | Self::IntegrationVersionMismatch { .. }
                | Self::UnsupportedSystem(_)
                | Self::NoActiveGame
        )
    }

    /// Whether trying again later (or another driver) may succeed.
    pub const fn should_retry(&self) -> bool {
        match self {
            Self::ConnectionUnavailable(_) | Self::DriverTimeout { .. } => true,
            Self::Protocol(e) => matches!(e, memlink_protocol::ProtocolError::Timeout { .. }),
            _ => false,
        }
    }
}

/// Result type for driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid bind or endpoint address
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress {
        /// The rejected address
        address: String,
        /// Reason for rejection
        reason: String,
    },

    /// A size, count or duration that must be positive was zero
    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),

    /// The data region cannot hold every platform domain
    #[error("Data region of {size} bytes is smaller than the largest domain end ({required})")]
    DataRegionTooSmall {
        /// Configured size
        size: usize,
        /// Largest domain end offset
        required: usize,
    },

    /// Driver list problem
    #[error("Invalid driver list: {0}")]
    InvalidDrivers(String),

    /// `--system` names no platform
    #[error("Unknown system '{0}'")]
    UnknownSystem(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_facing_policy() {
        assert!(DriverError::NoActiveGame.is_user_facing());
        assert!(DriverError::UnsupportedSystem("PSX".to_string()).is_user_facing());
        assert!(
            DriverError::IntegrationVersionMismatch {
                expected: 1,
                actual: 2
            }
            .is_user_facing()
        );

        let timeout = DriverError::DriverTimeout {
            address: 0x7E_0000,
            driver: "udp".to_string(),
        };
        assert!(!timeout.is_user_facing());
        assert!(timeout.should_retry());

        let unmapped = DriverError::AddressNotMapped {
            address: 0xFFFF_FFFF,
            system: "NES".to_string(),
        };
        assert!(!unmapped.is_user_facing());
        assert!(!unmapped.should_retry());
    }

    #[test]
    fn test_shmem_conversion() {
        let err: DriverError = memlink_shmem::ShmemError::OutOfBoundsRead {
            offset: 10,
            length: 4,
            size: 12,
        }
        .into();
        assert!(matches!(
            err,
            DriverError::OutOfBoundsRead {
                offset: 10,
                length: 4
            }
        ));

        let err: DriverError = memlink_shmem::ShmemError::ConnectionUnavailable {
            name: "meta".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        }
        .into();
        assert!(err.should_retry());
        assert!(err.is_user_facing());
    }

    #[test]
    fn test_timeout_message_names_driver() {
        let err = DriverError::DriverTimeout {
            address: 0x10,
            driver: "udp".to_string(),
        };
        assert_eq!(err.to_string(), "Driver udp timed out at address 0x10");
    }
}
