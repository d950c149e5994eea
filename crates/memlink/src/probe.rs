//! Driver probe and failover loop.
//!
//! Finds a registered driver whose integration is reachable. Individual
//! driver failures never escape the loop; only total failure is reported,
//! as `None`.

use crate::driver::Driver;
use std::collections::VecDeque;
use std::time::Duration;

/// Probe loop settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverProbe {
    /// Full passes over the driver list before giving up
    pub max_attempts: u32,
    /// Wait between passes
    pub pause: Duration,
}

impl Default for DriverProbe {
    fn default() -> Self {
        Self {
            max_attempts: 25,
            pause: Duration::from_millis(50),
        }
    }
}

impl DriverProbe {
    /// Create a probe
    pub const fn new(max_attempts: u32, pause: Duration) -> Self {
        Self {
            max_attempts,
            pause,
        }
    }

    /// Worst-case time spent in [`DriverProbe::test_drivers`], excluding
    /// the drivers' own connection tests
    pub fn worst_case_wait(&self) -> Duration {
        self.pause * self.max_attempts.saturating_sub(1)
    }

    /// Find a reachable driver.
    ///
    /// Starts with `preferred` (the previously active driver) when it is
    /// registered, then the remaining drivers in registration order. A
    /// driver that fails its test is dropped from the current pass. When a
    /// pass runs out of candidates, `on_pass_failed` is called with the
    /// 1-based attempt number; after `max_attempts` passes the probe gives
    /// up, otherwise it waits `pause` and starts over with every driver.
    ///
    /// Returns the name of the first driver that answered.
    pub async fn test_drivers<F>(
        &self,
        drivers: &mut [Box<dyn Driver>],
        preferred: Option<&str>,
        mut on_pass_failed: F,
    ) -> Option<String>
    where
        F: FnMut(u32) + Send,
    {
        if drivers.is_empty() {
            tracing::warn!("No drivers registered");
            return None;
        }

        let order = Self::candidate_order(drivers, preferred);
        let mut attempt = 0u32;

        loop {
            let mut candidates: VecDeque<usize> = order.iter().copied().collect();

            while let Some(index) = candidates.pop_front() {
                let driver = &mut drivers[index];
                if driver.test_connection().await {
                    let name = driver.name().to_string();
                    tracing::info!("Using driver {name}");
                    return Some(name);
                }
                tracing::debug!("Driver {} is not reachable", driver.name());
            }

            attempt += 1;
            on_pass_failed(attempt);

            if attempt >= self.max_attempts {
                tracing::warn!("No working driver found after {attempt} attempts");
                return None;
            }

            tokio::time::sleep(self.pause).await;
        }
    }

    fn candidate_order(drivers: &[Box<dyn Driver>], preferred: Option<&str>) -> Vec<usize> {
        let first = preferred.and_then(|name| drivers.iter().position(|d| d.name() == name));

        first
            .into_iter()
            .chain((0..drivers.len()).filter(|&i| Some(i) != first))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{BlockData, Driver};
    use crate::error::Result;
    use crate::platform::MemoryAddressBlock;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Scripted {
        name: &'static str,
        succeed_on: Option<u32>,
        tests: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Driver for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn delay_between_reads(&self) -> Duration {
            Duration::ZERO
        }

        async fn establish_connection(&mut self) -> Result<()> {
            Ok(())
        }

        async fn test_connection(&mut self) -> bool {
            let n = self.tests.fetch_add(1, Ordering::SeqCst) + 1;
            self.succeed_on.is_some_and(|s| n >= s)
        }

        async fn read_bytes(&mut self, _blocks: &[MemoryAddressBlock]) -> Result<Vec<BlockData>> {
            Ok(Vec::new())
        }

        async fn write_bytes(&mut self, _: u32, _: &[u8], _: Option<&str>) -> Result<()> {
            Ok(())
        }

        async fn disconnect(&mut self) {}
    }

    fn scripted(name: &'static str, succeed_on: Option<u32>) -> (Box<dyn Driver>, Arc<AtomicU32>) {
        let tests = Arc::new(AtomicU32::new(0));
        let driver = Scripted {
            name,
            succeed_on,
            tests: Arc::clone(&tests),
        };
        (Box::new(driver), tests)
    }

    #[test]
    fn test_candidate_order() {
        let drivers = vec![
            scripted("a", None).0,
            scripted("b", None).0,
            scripted("c", None).0,
        ];

        assert_eq!(DriverProbe::candidate_order(&drivers, None), vec![0, 1, 2]);
        assert_eq!(
            DriverProbe::candidate_order(&drivers, Some("c")),
            vec![2, 0, 1]
        );
        assert_eq!(
            DriverProbe::candidate_order(&drivers, Some("missing")),
            vec![0, 1, 2]
        );
    }

    #[tokio::test]
    async fn test_preferred_driver_tried_first() {
        let (a, a_tests) = scripted("a", Some(1));
        let (b, b_tests) = scripted("b", Some(1));
        let mut drivers = vec![a, b];

        let probe = DriverProbe::new(3, Duration::from_millis(1));
        let found = probe.test_drivers(&mut drivers, Some("b"), |_| {}).await;

        assert_eq!(found.as_deref(), Some("b"));
        assert_eq!(b_tests.load(Ordering::SeqCst), 1);
        assert_eq!(a_tests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_recovers_on_later_pass() {
        let (a, a_tests) = scripted("a", None);
        let (b, _) = scripted("b", Some(3));
        let mut drivers = vec![a, b];

        let mut passes = Vec::new();
        let probe = DriverProbe::new(25, Duration::from_millis(1));
        let found = probe
            .test_drivers(&mut drivers, None, |attempt| passes.push(attempt))
            .await;

        assert_eq!(found.as_deref(), Some("b"));
        assert_eq!(passes, vec![1, 2]);
        assert_eq!(a_tests.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_no_drivers() {
        let probe = DriverProbe::default();
        let mut calls = 0;
        let mut drivers: Vec<Box<dyn Driver>> = Vec::new();
        assert!(
            probe
                .test_drivers(&mut drivers, None, |_| calls += 1)
                .await
                .is_none()
        );
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_defaults() {
        let probe = DriverProbe::default();
        assert_eq!(probe.max_attempts, 25);
        assert_eq!(probe.pause, Duration::from_millis(50));
        assert_eq!(probe.worst_case_wait(), Duration::from_millis(1200));
    }
}
