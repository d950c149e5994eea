//! Wire protocol for emulator memory integrations.
//!
//! This crate provides the binary instruction codec shared with
//! emulator-side helpers and the loopback UDP endpoint that speaks it.
//!
//! # Architecture
//!
//! - `header`: the fixed 32-byte instruction header and instruction codes
//! - `instruction`: SETUP / WRITE / FREEZE / UNFREEZE payloads, encode and decode
//! - `server`: UDP receive loop with handler dispatch and cooperative shutdown
//! - `client`: request/response helper used by the push driver
//! - `cancel`: cancellation token shared by workers
//!
//! # Example
//!
//! ```no_run
//! use memlink_protocol::{Instruction, WriteInstruction};
//!
//! # fn main() -> memlink_protocol::Result<()> {
//! let write = Instruction::Write(WriteInstruction::new(0x0200_0000, vec![0x63]));
//! let bytes = write.encode()?;
//! assert_eq!(bytes.len(), 33);
//! assert_eq!(Instruction::decode(&bytes)?, write);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod cancel;
pub mod client;
pub mod error;
pub mod header;
pub mod instruction;
pub mod server;

pub use cancel::CancellationToken;
pub use client::InstructionClient;
pub use error::{ProtocolError, Result};
pub use header::{HEADER_SIZE, InstructionCode, Metadata, PROTOCOL_VERSION};
pub use instruction::{
    FreezeInstruction, Instruction, MAX_READ_BLOCKS, ReadBlock, SETUP_INSTRUCTION_SIZE,
    SetupInstruction, UnfreezeInstruction, WriteInstruction,
};
pub use server::{
    DEFAULT_SERVER_ADDR, DEFAULT_SERVER_PORT, HandlerError, InstructionHandler, ProtocolServer,
    ServerHandle,
};
