//! Instruction payloads and their wire encoding
//!
//! All multi-byte integers are little-endian. Layouts past the common
//! [`Metadata`] bytes:
//!
//! | Kind            | Offset 8        | Offset 16     | Offset 32                     |
//! |-----------------|-----------------|---------------|-------------------------------|
//! | SETUP           | block count i32 | -             | 128 x ReadBlock (12 bytes)    |
//! | WRITE / FREEZE  | address i64     | length i32    | `length` data bytes           |
//! | UNFREEZE        | address i64     | -             | -                             |
//! | others          | -               | -             | -                             |
//!
//! SETUP always carries the full 128-slot table so that one datagram has a
//! fixed size whatever the block count; unused slots are zero.

use crate::error::{ProtocolError, Result};
use crate::header::{HEADER_SIZE, InstructionCode, Metadata};
use binrw::{BinRead, BinWrite};
use std::io::{Cursor, Seek, SeekFrom, Write};

/// Largest UDP payload on loopback (IPv4)
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Number of read block slots in a SETUP instruction
pub const MAX_READ_BLOCKS: usize = 128;

/// Encoded size of one [`ReadBlock`]
pub const READ_BLOCK_SIZE: usize = 12;

/// Encoded size of a SETUP instruction
pub const SETUP_INSTRUCTION_SIZE: usize = HEADER_SIZE + MAX_READ_BLOCKS * READ_BLOCK_SIZE;

/// Largest data payload a WRITE or FREEZE can carry
pub const MAX_WRITE_PAYLOAD: usize = MAX_DATAGRAM_SIZE - HEADER_SIZE;

const BLOCK_COUNT_OFFSET: u64 = 8;
const ADDRESS_OFFSET: u64 = 8;
const LENGTH_OFFSET: u64 = 16;

/// One window the integration mirrors into the shared buffer.
///
/// `length` bytes starting at `game_address` in emulator memory are copied
/// to `position` in the shared buffer every refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BinRead, BinWrite)]
#[brw(little)]
pub struct ReadBlock {
    /// Offset in the shared buffer
    pub position: u32,
    /// Source address in emulator memory
    pub game_address: u32,
    /// Number of bytes to mirror
    pub length: i32,
}

/// SETUP payload: the windows to mirror for this session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SetupInstruction {
    blocks: Vec<ReadBlock>,
}

impl SetupInstruction {
    /// Create a setup payload, rejecting more blocks than the table holds.
    pub fn new(blocks: Vec<ReadBlock>) -> Result<Self> {
        if blocks.len() > MAX_READ_BLOCKS {
            return Err(ProtocolError::malformed(
                "setup",
                format!(
                    "{} read blocks exceed the {MAX_READ_BLOCKS}-slot table",
                    blocks.len()
                ),
            ));
        }
        Ok(Self { blocks })
    }

    /// Declared blocks
    pub fn blocks(&self) -> &[ReadBlock] {
        &self.blocks
    }

    /// Number of declared blocks
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    fn write_body(&self, cursor: &mut Cursor<Vec<u8>>) -> Result<()> {
        // block_count <= 128 by construction
        cursor.seek(SeekFrom::Start(BLOCK_COUNT_OFFSET))?;
        (self.blocks.len() as i32).write_le(cursor)?;
        pad_to(cursor, HEADER_SIZE)?;

        for block in &self.blocks {
            block.write_le(cursor)?;
        }
        for _ in self.blocks.len()..MAX_READ_BLOCKS {
            ReadBlock::default().write_le(cursor)?;
        }
        Ok(())
    }

    fn decode_body(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SETUP_INSTRUCTION_SIZE {
            return Err(ProtocolError::malformed(
                "setup",
                format!(
                    "need {SETUP_INSTRUCTION_SIZE} bytes, got {}",
                    bytes.len()
                ),
            ));
        }

        let mut cursor = Cursor::new(bytes);
        cursor.seek(SeekFrom::Start(BLOCK_COUNT_OFFSET))?;
        let block_count = i32::read_le(&mut cursor)?;
        let block_count = usize::try_from(block_count)
            .ok()
            .filter(|count| *count <= MAX_READ_BLOCKS)
            .ok_or_else(|| {
                ProtocolError::malformed(
                    "setup",
                    format!("block count {block_count} outside 0..={MAX_READ_BLOCKS}"),
                )
            })?;

        cursor.seek(SeekFrom::Start(HEADER_SIZE as u64))?;
        let mut blocks = Vec::with_capacity(block_count);
        for _ in 0..block_count {
            blocks.push(ReadBlock::read_le(&mut cursor)?);
        }

        Ok(Self { blocks })
    }
}

/// WRITE payload: bytes to store at an emulator address.
///
/// The encoded length field is always `data.len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteInstruction {
    /// Target address in emulator memory
    pub address: i64,
    /// Bytes to write
    pub data: Vec<u8>,
}

/// FREEZE payload. Same layout as WRITE; the integration re-applies the
/// value every frame until an UNFREEZE for the same address arrives.
pub type FreezeInstruction = WriteInstruction;

impl WriteInstruction {
    /// Create a write payload
    pub fn new(address: i64, data: impl Into<Vec<u8>>) -> Self {
        Self {
            address,
            data: data.into(),
        }
    }

    fn write_body(&self, cursor: &mut Cursor<Vec<u8>>) -> Result<()> {
        if self.data.len() > MAX_WRITE_PAYLOAD {
            return Err(ProtocolError::PayloadTooLarge {
                length: self.data.len(),
                max: MAX_WRITE_PAYLOAD,
            });
        }

        cursor.seek(SeekFrom::Start(ADDRESS_OFFSET))?;
        self.address.write_le(cursor)?;
        cursor.seek(SeekFrom::Start(LENGTH_OFFSET))?;
        (self.data.len() as i32).write_le(cursor)?;
        pad_to(cursor, HEADER_SIZE)?;
        cursor.write_all(&self.data)?;
        Ok(())
    }

    fn decode_body(kind: &'static str, bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(ProtocolError::malformed(
                kind,
                format!("need {HEADER_SIZE} bytes, got {}", bytes.len()),
            ));
        }

        let mut cursor = Cursor::new(bytes);
        cursor.seek(SeekFrom::Start(ADDRESS_OFFSET))?;
        let address = i64::read_le(&mut cursor)?;
        cursor.seek(SeekFrom::Start(LENGTH_OFFSET))?;
        let length = i32::read_le(&mut cursor)?;

        let length = usize::try_from(length)
            .map_err(|_| ProtocolError::malformed(kind, format!("negative length {length}")))?;
        let end = HEADER_SIZE + length;
        if bytes.len() < end {
            return Err(ProtocolError::malformed(
                kind,
                format!(
                    "declares {length} data bytes, only {} present",
                    bytes.len() - HEADER_SIZE
                ),
            ));
        }

        Ok(Self {
            address,
            data: bytes[HEADER_SIZE..end].to_vec(),
        })
    }
}

/// UNFREEZE payload: address only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnfreezeInstruction {
    /// Previously frozen address
    pub address: i64,
}

impl UnfreezeInstruction {
    fn write_body(self, cursor: &mut Cursor<Vec<u8>>) -> Result<()> {
        cursor.seek(SeekFrom::Start(ADDRESS_OFFSET))?;
        self.address.write_le(cursor)?;
        Ok(())
    }

    fn decode_body(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        cursor.seek(SeekFrom::Start(ADDRESS_OFFSET))?;
        Ok(Self {
            address: i64::read_le(&mut cursor)?,
        })
    }
}

/// A decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// No operation
    Noop,
    /// Liveness request
    Ping,
    /// Answer to [`Instruction::Ping`]
    PingResponse,
    /// Declare mirrored windows
    Setup(SetupInstruction),
    /// Acknowledges a [`Instruction::Setup`]
    SetupResponse,
    /// One-shot memory write
    Write(WriteInstruction),
    /// Repeated memory write
    Freeze(FreezeInstruction),
    /// Cancel a freeze
    Unfreeze(UnfreezeInstruction),
    /// Session end
    Close,
}

impl Instruction {
    /// Instruction code on the wire
    pub const fn code(&self) -> InstructionCode {
        match self {
            Self::Noop => InstructionCode::Noop,
            Self::Ping | Self::PingResponse => InstructionCode::Ping,
            Self::Setup(_) | Self::SetupResponse => InstructionCode::Setup,
            Self::Write(_) => InstructionCode::Write,
            Self::Freeze(_) => InstructionCode::Freeze,
            Self::Unfreeze(_) => InstructionCode::Unfreeze,
            Self::Close => InstructionCode::Close,
        }
    }

    /// Whether the response flag is set
    pub const fn is_response(&self) -> bool {
        matches!(self, Self::PingResponse | Self::SetupResponse)
    }

    /// Header written in front of the payload
    pub const fn metadata(&self) -> Metadata {
        if self.is_response() {
            Metadata::response(self.code())
        } else {
            Metadata::request(self.code())
        }
    }

    /// Exact encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Setup(_) => SETUP_INSTRUCTION_SIZE,
            Self::Write(w) | Self::Freeze(w) => HEADER_SIZE + w.data.len(),
            _ => HEADER_SIZE,
        }
    }

    /// Encode to wire bytes. The 32-byte header is always present.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::with_capacity(self.encoded_len()));
        self.metadata().write_le(&mut cursor)?;

        match self {
            Self::Setup(setup) => setup.write_body(&mut cursor)?,
            Self::Write(write) | Self::Freeze(write) => write.write_body(&mut cursor)?,
            Self::Unfreeze(unfreeze) => unfreeze.write_body(&mut cursor)?,
            Self::Noop | Self::Ping | Self::PingResponse | Self::SetupResponse | Self::Close => {}
        }

        let mut bytes = cursor.into_inner();
        if bytes.len() < HEADER_SIZE {
            bytes.resize(HEADER_SIZE, 0);
        }
        Ok(bytes)
    }

    /// Decode wire bytes.
    ///
    /// Fails with [`ProtocolError::MalformedInstruction`] when the buffer is
    /// shorter than the fixed layout of its kind, and with
    /// [`ProtocolError::UnknownInstruction`] for codes outside the known set.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let metadata = Metadata::parse(bytes)?;
        let code = metadata
            .code()
            .ok_or(ProtocolError::UnknownInstruction(metadata.instruction))?;

        let instruction = match (code, metadata.is_response) {
            (InstructionCode::Noop, _) => Self::Noop,
            (InstructionCode::Ping, false) => Self::Ping,
            (InstructionCode::Ping, true) => Self::PingResponse,
            (InstructionCode::Setup, false) => Self::Setup(SetupInstruction::decode_body(bytes)?),
            (InstructionCode::Setup, true) => Self::SetupResponse,
            (InstructionCode::Write, _) => {
                Self::Write(WriteInstruction::decode_body("write", bytes)?)
            }
            (InstructionCode::Freeze, _) => {
                Self::Freeze(WriteInstruction::decode_body("freeze", bytes)?)
            }
            (InstructionCode::Unfreeze, _) => {
                Self::Unfreeze(UnfreezeInstruction::decode_body(bytes)?)
            }
            (InstructionCode::Close, _) => Self::Close,
        };

        Ok(instruction)
    }
}

/// Zero-fill the cursor up to `offset`.
fn pad_to(cursor: &mut Cursor<Vec<u8>>, offset: usize) -> Result<()> {
    let position = cursor.position() as usize;
    if position < offset {
        cursor.write_all(&vec![0u8; offset - position])?;
    }
    Ok(())
}
