//! Driver service: owns the registered drivers and the active session.
//!
//! The active driver name lives in a [`DriverSession`] owned by the
//! service rather than in global state. A retryable driver error clears
//! the active driver so the next call probes again, starting with the
//! driver that just failed.

use crate::driver::{BlockData, Driver};
use crate::error::{DriverError, Result};
use crate::platform::{MemoryAddressBlock, PlatformEntry};
use crate::probe::DriverProbe;
use std::time::Duration;

/// Result of the last probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// A driver answered
    Connected(String),
    /// Every pass failed
    Exhausted {
        /// Passes made
        attempts: u32,
    },
}

/// Which driver is in use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverSession {
    active: Option<String>,
    preferred: Option<String>,
    last_probe: Option<ProbeOutcome>,
}

impl DriverSession {
    /// Session with nothing selected
    pub fn new() -> Self {
        Self::default()
    }

    /// Driver currently in use
    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Driver the next probe starts with
    pub fn preferred(&self) -> Option<&str> {
        self.preferred.as_deref()
    }

    /// Outcome of the most recent probe
    pub const fn last_probe(&self) -> Option<&ProbeOutcome> {
        self.last_probe.as_ref()
    }

    fn activate(&mut self, name: String) {
        self.preferred = Some(name.clone());
        self.active = Some(name.clone());
        self.last_probe = Some(ProbeOutcome::Connected(name));
    }

    fn exhausted(&mut self, attempts: u32) {
        self.active = None;
        self.last_probe = Some(ProbeOutcome::Exhausted { attempts });
    }

    /// Forget the active driver; it stays preferred for the next probe.
    pub fn clear_active(&mut self) -> Option<String> {
        self.active.take()
    }
}

/// Registered drivers plus the session that selects one of them.
pub struct DriverService {
    drivers: Vec<Box<dyn Driver>>,
    probe: DriverProbe,
    session: DriverSession,
}

impl DriverService {
    /// Service over `drivers`, probed in registration order.
    pub fn new(drivers: Vec<Box<dyn Driver>>, probe: DriverProbe) -> Self {
        Self {
            drivers,
            probe,
            session: DriverSession::new(),
        }
    }

    /// Names of the registered drivers
    pub fn driver_names(&self) -> Vec<&str> {
        self.drivers.iter().map(|d| d.name()).collect()
    }

    /// Current session
    pub const fn session(&self) -> &DriverSession {
        &self.session
    }

    /// Mutable access to a registered driver
    pub fn driver_mut(&mut self, name: &str) -> Option<&mut (dyn Driver + 'static)> {
        self.drivers
            .iter_mut()
            .find(|d| d.name() == name)
            .map(|d| &mut **d)
    }

    /// Probe for a reachable driver and make it active.
    ///
    /// Other drivers that were connected are disconnected. Fails with
    /// [`DriverError::NoDriverAvailable`] when the probe gives up.
    pub async fn connect<F>(&mut self, on_pass_failed: F) -> Result<String>
    where
        F: FnMut(u32) + Send,
    {
        let previous = self.session.clear_active();
        let mut attempts = 0u32;
        let mut on_pass_failed = on_pass_failed;

        let found = self
            .probe
            .test_drivers(
                &mut self.drivers,
                self.session.preferred.as_deref(),
                |attempt| {
                    attempts = attempt;
                    on_pass_failed(attempt);
                },
            )
            .await;

        let Some(name) = found else {
            self.session.exhausted(attempts);
            return Err(DriverError::NoDriverAvailable { attempts });
        };

        if let Some(previous) = previous.filter(|p| *p != name) {
            if let Some(old) = self.driver_mut(&previous) {
                old.disconnect().await;
                tracing::info!("Switched from driver {previous} to {name}");
            }
        }

        self.session.activate(name.clone());
        Ok(name)
    }

    /// Active driver, probing first when there is none.
    async fn active_driver(&mut self) -> Result<&mut (dyn Driver + 'static)> {
        let active = self.session.active().map(str::to_string);
        let name = match active {
            Some(name) => name,
            None => self.connect(|_| {}).await?,
        };

        self.driver_mut(&name)
            .ok_or_else(|| DriverError::NotConnected(name.clone()))
    }

    /// Minimum delay between reads of the active driver.
    pub fn delay_between_reads(&self) -> Duration {
        self.session
            .active()
            .and_then(|name| self.drivers.iter().find(|d| d.name() == name))
            .map_or(Duration::from_secs(1) / 60, |d| d.delay_between_reads())
    }

    /// Platform reported by the active driver.
    pub fn active_platform(&self) -> Option<&'static PlatformEntry> {
        self.session
            .active()
            .and_then(|name| self.drivers.iter().find(|d| d.name() == name))
            .and_then(|d| d.platform())
    }

    /// Read through the active driver.
    pub async fn read_bytes(&mut self, blocks: &[MemoryAddressBlock]) -> Result<Vec<BlockData>> {
        let driver = self.active_driver().await?;
        let result = driver.read_bytes(blocks).await;
        self.after_call(result).await
    }

    /// Write through the active driver.
    pub async fn write_bytes(
        &mut self,
        address: u32,
        bytes: &[u8],
        path: Option<&str>,
    ) -> Result<()> {
        let driver = self.active_driver().await?;
        let result = driver.write_bytes(address, bytes, path).await;
        self.after_call(result).await
    }

    /// Disconnect every driver and clear the session.
    pub async fn disconnect(&mut self) {
        for driver in &mut self.drivers {
            driver.disconnect().await;
        }
        self.session.clear_active();
    }

    async fn after_call<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.should_retry() {
                if let Some(name) = self.session.clear_active() {
                    tracing::warn!("Driver {name} failed, probing again on next call: {e}");
                    if let Some(driver) = self.driver_mut(&name) {
                        driver.disconnect().await;
                    }
                }
            } else if e.is_user_facing() {
                tracing::warn!("{e}");
            } else {
                tracing::debug!("Driver call failed: {e}");
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::StaticDriver;
    use crate::platform::lookup;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_session_keeps_preferred() {
        let mut session = DriverSession::new();
        session.activate("udp".to_string());
        assert_eq!(session.active(), Some("udp"));

        assert_eq!(session.clear_active().as_deref(), Some("udp"));
        assert_eq!(session.active(), None);
        assert_eq!(session.preferred(), Some("udp"));
    }

    #[tokio::test]
    async fn test_read_probes_on_first_use() {
        let driver = StaticDriver::new(lookup("GBA").unwrap());
        let mut service = DriverService::new(
            vec![Box::new(driver)],
            DriverProbe::new(1, Duration::from_millis(1)),
        );

        let blocks = service.read_bytes(&[]).await.unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(service.session().active(), Some("static"));
        assert_eq!(
            service.session().last_probe(),
            Some(&ProbeOutcome::Connected("static".to_string()))
        );
    }

    #[tokio::test]
    async fn test_active_platform_follows_connected_driver() {
        let driver = StaticDriver::new(lookup("NES").unwrap());
        let mut service = DriverService::new(
            vec![Box::new(driver)],
            DriverProbe::new(1, Duration::from_millis(1)),
        );
        assert!(service.active_platform().is_none());

        service.connect(|_| {}).await.unwrap();
        assert_eq!(service.active_platform().map(|p| p.system_id), Some("NES"));

        service.disconnect().await;
        assert!(service.active_platform().is_none());
    }

    #[tokio::test]
    async fn test_exhausted_probe() {
        let driver = StaticDriver::new(lookup("GBA").unwrap()).reachable(false);
        let mut service = DriverService::new(
            vec![Box::new(driver)],
            DriverProbe::new(2, Duration::from_millis(1)),
        );

        let result = service.read_bytes(&[]).await;
        assert!(matches!(
            result,
            Err(DriverError::NoDriverAvailable { attempts: 2 })
        ));
        assert_eq!(
            service.session().last_probe(),
            Some(&ProbeOutcome::Exhausted { attempts: 2 })
        );
    }
}
