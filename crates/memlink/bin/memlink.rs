//! Memlink binary entry point.
//!
//! A thin wrapper around the memlink library that:
//! 1. Parses and validates configuration
//! 2. Initializes logging
//! 3. Starts the loopback protocol server
//! 4. Polls the active driver and logs batched memory changes until Ctrl-C

use anyhow::Result;
use memlink::{
    ChangeBatcher, DriverService, EventForwarder, LogFormat, MemlinkConfig, MemoryAddressBlock,
    MemoryPoller, PlatformEntry,
};
use memlink_protocol::ProtocolServer;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Wait before probing again after every driver failed
const IDLE_RETRY: Duration = Duration::from_secs(1);

/// Bound on stopping the protocol server
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

struct Poll<'a> {
    config: &'a MemlinkConfig,
    /// Layout used when the active driver reports none
    fallback: &'static PlatformEntry,
    tracked: &'static PlatformEntry,
    blocks: Vec<MemoryAddressBlock>,
    service: DriverService,
    poller: MemoryPoller,
    batcher: ChangeBatcher<u8>,
}

impl<'a> Poll<'a> {
    fn new(
        config: &'a MemlinkConfig,
        platform: &'static PlatformEntry,
        service: DriverService,
        batcher: ChangeBatcher<u8>,
    ) -> Self {
        let blocks = platform.address_blocks();
        Self {
            config,
            fallback: platform,
            tracked: platform,
            poller: MemoryPoller::new(&blocks),
            blocks,
            service,
            batcher,
        }
    }

    /// Follow the layout of whichever game the new connection reports.
    fn track(&mut self, platform: &'static PlatformEntry) {
        if platform.system_id == self.tracked.system_id {
            self.poller.reset();
            return;
        }

        tracing::info!(
            "Tracking {} domains of {}",
            platform.domains.len(),
            platform.system_id
        );
        self.tracked = platform;
        self.blocks = platform.address_blocks();
        self.poller = MemoryPoller::new(&self.blocks);
    }

    /// One read cycle; returns how long to wait before the next.
    async fn once(&mut self) -> Duration {
        if self.service.session().active().is_none() {
            let connected = self
                .service
                .connect(|attempt| tracing::debug!("No integration answered (pass {attempt})"))
                .await;
            if let Err(e) = connected {
                tracing::warn!("{e}; retrying in {}s", IDLE_RETRY.as_secs());
                return IDLE_RETRY;
            }
            self.track(self.service.active_platform().unwrap_or(self.fallback));
        }

        match self.service.read_bytes(&self.blocks).await {
            Ok(read) => {
                self.batcher.observe(self.poller.diff(&read));
            }
            Err(e) if e.is_user_facing() => tracing::warn!("{e}"),
            Err(e) => tracing::debug!("Read failed: {e}"),
        }
        self.batcher.flush_due(Instant::now());

        self.config
            .poll_interval()
            .unwrap_or_else(|| self.service.delay_between_reads())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = MemlinkConfig::from_args();
    init_tracing(config.log_format);

    tracing::info!("Memlink starting...");
    tracing::info!(
        "Configuration loaded: server={}, integration={}, drivers={:?}, system={}",
        config.udp_bind,
        config.integration_endpoint,
        config.drivers,
        config.system
    );

    config.validate()?;

    let (handler, mut events) = EventForwarder::channel();
    let server = ProtocolServer::bind(config.udp_bind, Arc::new(handler))
        .await?
        .spawn();
    let event_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::debug!("Integration event: {event:?}");
        }
    });

    let mut batcher = ChangeBatcher::new(config.batch_window());
    let mut changes = batcher.subscribe();
    let notify_task = tokio::spawn(async move {
        while let Some(batch) = changes.recv().await {
            match serde_json::to_string(batch.as_ref()) {
                Ok(json) => tracing::info!(target: "memlink::changes", "{json}"),
                Err(e) => tracing::warn!("Failed to encode change batch: {e}"),
            }
        }
    });

    let service = DriverService::new(config.build_drivers()?, config.probe());
    let mut poll = Poll::new(&config, config.platform()?, service, batcher);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let delay = tokio::select! {
            _ = &mut shutdown => break,
            delay = poll.once() => delay,
        };
        tokio::select! {
            _ = &mut shutdown => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    tracing::info!("Shutting down");

    poll.service.disconnect().await;
    poll.batcher.flush();
    drop(poll);
    notify_task.await?;

    server.shutdown(SHUTDOWN_TIMEOUT).await?;
    event_task.await?;

    Ok(())
}
