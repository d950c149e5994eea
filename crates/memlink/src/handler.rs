//! Protocol server handler used by the `memlink` binary.
//!
//! Inbound instructions are logged and forwarded as [`IntegrationEvent`]s
//! to whoever holds the receiving end.

use memlink_protocol::{
    FreezeInstruction, HandlerError, InstructionHandler, ReadBlock, SetupInstruction,
    UnfreezeInstruction, WriteInstruction,
};
use tokio::sync::mpsc;

/// Something an integration told us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrationEvent {
    /// Windows the integration mirrors
    Setup(Vec<ReadBlock>),
    /// Bytes written at an address
    Write {
        /// Console address
        address: i64,
        /// Written bytes
        data: Vec<u8>,
    },
    /// Address frozen to a value
    Freeze {
        /// Console address
        address: i64,
        /// Frozen bytes
        data: Vec<u8>,
    },
    /// Freeze released
    Unfreeze {
        /// Console address
        address: i64,
    },
    /// Integration closed its session
    Close,
}

/// Forwards inbound instructions to a channel.
#[derive(Debug, Clone)]
pub struct EventForwarder {
    events: mpsc::UnboundedSender<IntegrationEvent>,
}

impl EventForwarder {
    /// Handler and the receiver its events arrive on
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<IntegrationEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { events }, rx)
    }

    fn forward(&self, event: IntegrationEvent) -> Result<(), HandlerError> {
        self.events
            .send(event)
            .map_err(|_| "integration event receiver is gone".into())
    }
}

impl InstructionHandler for EventForwarder {
    fn on_setup(&self, setup: &SetupInstruction) -> Result<(), HandlerError> {
        tracing::info!("Integration declared {} read blocks", setup.block_count());
        for block in setup.blocks() {
            tracing::debug!(
                "  0x{:08X} -> +0x{:X} ({} bytes)",
                block.game_address,
                block.position,
                block.length
            );
        }
        self.forward(IntegrationEvent::Setup(setup.blocks().to_vec()))
    }

    fn on_write(&self, write: &WriteInstruction) -> Result<(), HandlerError> {
        tracing::debug!(
            "Integration wrote 0x{:X}: {}",
            write.address,
            hex::encode(&write.data)
        );
        self.forward(IntegrationEvent::Write {
            address: write.address,
            data: write.data.clone(),
        })
    }

    fn on_freeze(&self, freeze: &FreezeInstruction) -> Result<(), HandlerError> {
        tracing::debug!(
            "Integration froze 0x{:X}: {}",
            freeze.address,
            hex::encode(&freeze.data)
        );
        self.forward(IntegrationEvent::Freeze {
            address: freeze.address,
            data: freeze.data.clone(),
        })
    }

    fn on_unfreeze(&self, unfreeze: &UnfreezeInstruction) -> Result<(), HandlerError> {
        self.forward(IntegrationEvent::Unfreeze {
            address: unfreeze.address,
        })
    }

    fn on_close(&self) {
        tracing::info!("Integration closed its session");
        if let Err(e) = self.forward(IntegrationEvent::Close) {
            tracing::debug!("Close event not delivered: {e}");
        }
    }
}
