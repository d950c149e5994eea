//! Driver for push-style integrations speaking the UDP instruction protocol.
//!
//! The driver declares the windows it wants with a SETUP instruction. The
//! integration then mirrors each window into the push region at the
//! position assigned to it, packed back to back in request order. Writes,
//! freezes and unfreezes are sent as instructions.

use super::{BlockData, Driver};
use crate::error::{DriverError, Result};
use crate::platform::MemoryAddressBlock;
use async_trait::async_trait;
use memlink_protocol::{
    Instruction, InstructionClient, ProtocolError, ReadBlock, SetupInstruction,
    UnfreezeInstruction, WriteInstruction,
};
use memlink_shmem::{SegmentOpener, SegmentReader, SystemOpener, open_with_retry};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Driver name
pub const UDP_DRIVER_NAME: &str = "udp";

/// Settings for [`UdpDriver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpDriverConfig {
    /// Integration endpoint
    pub endpoint: SocketAddr,
    /// Region the integration pushes read windows into
    pub push_region: String,
    /// Size of the push region
    pub push_size: usize,
    /// Bound on every request and on opening the push region
    pub timeout: Duration,
    /// Minimum delay between reads
    pub read_delay: Duration,
}

impl Default for UdpDriverConfig {
    fn default() -> Self {
        Self {
            endpoint: SocketAddr::from(([127, 0, 0, 1], 55355)),
            push_region: "MEMLINK_PUSH_DATA".to_string(),
            push_size: 4 * 1024 * 1024,
            timeout: Duration::from_millis(100),
            read_delay: Duration::from_secs(1) / 60,
        }
    }
}

/// UDP push driver.
pub struct UdpDriver {
    config: UdpDriverConfig,
    opener: Arc<dyn SegmentOpener>,
    client: Option<InstructionClient>,
    push: Option<Box<dyn SegmentReader>>,
    /// Windows declared by the last acknowledged SETUP
    windows: Vec<(MemoryAddressBlock, ReadBlock)>,
    frozen: BTreeSet<u32>,
}

impl UdpDriver {
    /// Driver reading the push region from OS shared memory.
    pub fn new(config: UdpDriverConfig) -> Self {
        Self::with_opener(config, Arc::new(SystemOpener))
    }

    /// Driver reading the push region through `opener`.
    pub fn with_opener(config: UdpDriverConfig, opener: Arc<dyn SegmentOpener>) -> Self {
        Self {
            config,
            opener,
            client: None,
            push: None,
            windows: Vec::new(),
            frozen: BTreeSet::new(),
        }
    }

    /// Addresses currently frozen through this driver
    pub fn frozen(&self) -> impl Iterator<Item = u32> + '_ {
        self.frozen.iter().copied()
    }

    /// Keep re-applying `bytes` at `address` every frame until unfrozen.
    pub async fn freeze_bytes(&mut self, address: u32, bytes: &[u8]) -> Result<()> {
        self.resolve(address)?;
        let instruction = Instruction::Freeze(WriteInstruction::new(i64::from(address), bytes));
        self.send(&instruction, address).await?;
        self.frozen.insert(address);
        tracing::debug!("Froze 0x{address:X}: {}", hex::encode(bytes));
        Ok(())
    }

    /// Stop re-applying a frozen value.
    pub async fn unfreeze_bytes(&mut self, address: u32) -> Result<()> {
        self.resolve(address)?;
        let instruction = Instruction::Unfreeze(UnfreezeInstruction {
            address: i64::from(address),
        });
        self.send(&instruction, address).await?;
        self.frozen.remove(&address);
        tracing::debug!("Unfroze 0x{address:X}");
        Ok(())
    }

    fn client(&self) -> Result<&InstructionClient> {
        self.client
            .as_ref()
            .ok_or_else(|| DriverError::NotConnected(UDP_DRIVER_NAME.to_string()))
    }

    fn timeout_error(address: u32) -> DriverError {
        DriverError::DriverTimeout {
            address,
            driver: UDP_DRIVER_NAME.to_string(),
        }
    }

    fn map_protocol(err: ProtocolError, address: u32) -> DriverError {
        match err {
            ProtocolError::Timeout { .. } => Self::timeout_error(address),
            other => other.into(),
        }
    }

    /// Check that `address` lies in a declared window.
    fn resolve(&self, address: u32) -> Result<&MemoryAddressBlock> {
        self.windows
            .iter()
            .map(|(block, _)| block)
            .find(|block| block.contains(address))
            .ok_or_else(|| DriverError::AddressNotMapped {
                address,
                system: UDP_DRIVER_NAME.to_string(),
            })
    }

    async fn ping(&self) -> Result<()> {
        self.client()?
            .ping()
            .await
            .map_err(|e| Self::map_protocol(e, 0))
    }

    async fn send(&self, instruction: &Instruction, address: u32) -> Result<()> {
        self.client()?
            .send(instruction)
            .await
            .map_err(|e| Self::map_protocol(e, address))
    }

    /// Lay out `blocks` back to back in the push region.
    fn plan_windows(
        blocks: &[MemoryAddressBlock],
        push_size: usize,
    ) -> Result<Vec<(MemoryAddressBlock, ReadBlock)>> {
        let mut position: u64 = 0;
        let mut windows = Vec::with_capacity(blocks.len());

        for block in blocks {
            let length = block.len();
            let end = position + length;
            if end > push_size as u64 {
                return Err(DriverError::OutOfBoundsRead {
                    offset: position as usize,
                    length: length as usize,
                });
            }

            let read = ReadBlock {
                position: u32::try_from(position).map_err(|_| DriverError::OutOfBoundsRead {
                    offset: position as usize,
                    length: length as usize,
                })?,
                game_address: block.start_address,
                length: i32::try_from(length).map_err(|_| DriverError::OutOfBoundsRead {
                    offset: position as usize,
                    length: length as usize,
                })?,
            };
            windows.push((block.clone(), read));
            position = end;
        }

        Ok(windows)
    }

    async fn setup(&mut self, blocks: &[MemoryAddressBlock]) -> Result<()> {
        let windows = Self::plan_windows(blocks, self.config.push_size)?;
        let setup = SetupInstruction::new(windows.iter().map(|(_, read)| *read).collect())?;
        let first = blocks.first().map_or(0, |b| b.start_address);

        self.client()?
            .request(&Instruction::Setup(setup))
            .await
            .map_err(|e| Self::map_protocol(e, first))?;

        tracing::info!("Integration mirrors {} windows", windows.len());
        self.windows = windows;
        Ok(())
    }

    async fn open_push_region(&mut self) -> Result<&dyn SegmentReader> {
        if self.push.is_none() {
            let opener = Arc::clone(&self.opener);
            let name = self.config.push_region.clone();
            let size = self.config.push_size;
            let timeout = self.config.timeout;

            let segment = tokio::task::spawn_blocking(move || {
                open_with_retry(opener.as_ref(), &name, size, timeout)
            })
            .await
            .map_err(|e| DriverError::Io(std::io::Error::other(e)))??;
            self.push = Some(segment);
        }

        self.push
            .as_deref()
            .ok_or_else(|| DriverError::NotConnected(UDP_DRIVER_NAME.to_string()))
    }
}

#[async_trait]
impl Driver for UdpDriver {
    fn name(&self) -> &str {
        UDP_DRIVER_NAME
    }

    fn delay_between_reads(&self) -> Duration {
        self.config.read_delay
    }

    async fn establish_connection(&mut self) -> Result<()> {
        self.disconnect().await;

        let client = InstructionClient::connect(self.config.endpoint, self.config.timeout).await?;
        client
            .ping()
            .await
            .map_err(|e| Self::map_protocol(e, 0))?;

        tracing::info!("Connected to UDP integration at {}", self.config.endpoint);
        self.client = Some(client);
        Ok(())
    }

    async fn test_connection(&mut self) -> bool {
        let result = if self.client.is_some() {
            self.ping().await
        } else {
            self.establish_connection().await
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("{UDP_DRIVER_NAME}: {e}");
                self.client = None;
                false
            }
        }
    }

    async fn read_bytes(&mut self, blocks: &[MemoryAddressBlock]) -> Result<Vec<BlockData>> {
        let unchanged = self.windows.iter().map(|(block, _)| block).eq(blocks.iter());
        if !unchanged {
            self.setup(blocks).await?;
        }

        let windows = self.windows.clone();
        let push = self.open_push_region().await?;

        let mut out = Vec::with_capacity(windows.len());
        for (block, read) in &windows {
            let mut data = vec![0u8; read.length as usize];
            push.copy_bytes_to(read.position as usize, &mut data)?;
            out.push(BlockData::new(block.start_address, data));
        }
        Ok(out)
    }

    async fn write_bytes(
        &mut self,
        address: u32,
        bytes: &[u8],
        path: Option<&str>,
    ) -> Result<()> {
        self.resolve(address)?;
        tracing::debug!(
            "Writing {} bytes to 0x{address:X} ({}): {}",
            bytes.len(),
            path.unwrap_or("-"),
            hex::encode(bytes)
        );
        let instruction = Instruction::Write(WriteInstruction::new(i64::from(address), bytes));
        self.send(&instruction, address).await
    }

    async fn disconnect(&mut self) {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.send(&Instruction::Close).await {
                tracing::debug!("CLOSE to {} not sent: {e}", client.peer());
            }
        }
        if let Some(mut push) = self.push.take() {
            push.close();
        }
        self.windows.clear();
        self.frozen.clear();
    }
}
