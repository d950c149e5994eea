//! Fixed 32-byte instruction header
//!
//! Every instruction starts with the same 32-byte region. Only the first
//! eight bytes are common to all kinds:
//!
//! - Byte 0: protocol version
//! - Bytes 1-3: reserved
//! - Byte 4: instruction code
//! - Byte 5: response flag (0 or 1)
//! - Bytes 6-7: reserved
//!
//! Bytes 8-31 belong to the instruction kind (block count for SETUP,
//! address and length for WRITE/FREEZE, address for UNFREEZE) and are zero
//! for kinds without fixed fields.
//!
//! Two integrations disagree on the response flag position. Byte 5 is the
//! canonical offset; a header with byte 6 set to 1 and byte 5 clear comes
//! from a peer using the other layout and is rejected.

use crate::error::{ProtocolError, Result};
use binrw::{BinRead, BinResult, BinWrite};
use std::io::{Read, Seek, Write};

/// Wire protocol version spoken by this crate
pub const PROTOCOL_VERSION: u8 = 1;

/// Size of the header region in bytes
pub const HEADER_SIZE: usize = 32;

/// Size of the fields common to every instruction
pub const METADATA_SIZE: usize = 8;

/// Offset of the canonical response flag
pub const RESPONSE_FLAG_OFFSET: usize = 5;

/// Offset used for the response flag by peers with the legacy layout
pub const LEGACY_RESPONSE_FLAG_OFFSET: usize = 6;

/// Instruction codes.
///
/// `Noop` through `Write` are the enumerated core set; the rest are
/// extensions used by integrations that support freezing values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InstructionCode {
    /// Does nothing
    Noop = 0x00,
    /// Liveness check
    Ping = 0x01,
    /// Declare which memory windows to mirror
    Setup = 0x02,
    /// Write bytes once
    Write = 0x03,
    /// Write bytes every frame until unfrozen
    Freeze = 0x04,
    /// Stop re-applying a frozen address
    Unfreeze = 0x05,
    /// Session is ending
    Close = 0x06,
}

impl InstructionCode {
    /// Parse an instruction code byte
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Noop),
            0x01 => Some(Self::Ping),
            0x02 => Some(Self::Setup),
            0x03 => Some(Self::Write),
            0x04 => Some(Self::Freeze),
            0x05 => Some(Self::Unfreeze),
            0x06 => Some(Self::Close),
            _ => None,
        }
    }

    /// Wire byte for this code
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Lowercase name used in logs and errors
    pub const fn name(self) -> &'static str {
        match self {
            Self::Noop => "noop",
            Self::Ping => "ping",
            Self::Setup => "setup",
            Self::Write => "write",
            Self::Freeze => "freeze",
            Self::Unfreeze => "unfreeze",
            Self::Close => "close",
        }
    }
}

/// The common part of the instruction header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    /// Protocol version of the sender
    pub protocol_version: u8,
    /// Raw instruction code byte
    pub instruction: u8,
    /// Whether this instruction answers a request
    pub is_response: bool,
}

impl Metadata {
    /// Header for a request of the given kind
    pub const fn request(code: InstructionCode) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            instruction: code.as_byte(),
            is_response: false,
        }
    }

    /// Header for a response of the given kind
    pub const fn response(code: InstructionCode) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            instruction: code.as_byte(),
            is_response: true,
        }
    }

    /// Known instruction code, if any
    pub const fn code(&self) -> Option<InstructionCode> {
        InstructionCode::from_byte(self.instruction)
    }

    /// Parse and validate the first bytes of a datagram.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(ProtocolError::malformed(
                "header",
                format!("need {HEADER_SIZE} bytes, got {}", bytes.len()),
            ));
        }

        let flag = bytes[RESPONSE_FLAG_OFFSET];
        let legacy_flag = bytes[LEGACY_RESPONSE_FLAG_OFFSET];
        if flag == 0 && legacy_flag == 1 {
            return Err(ProtocolError::malformed(
                "header",
                "response flag at legacy offset 6",
            ));
        }
        if flag > 1 {
            return Err(ProtocolError::malformed(
                "header",
                format!("response flag must be 0 or 1, got {flag}"),
            ));
        }

        let metadata = Self::read_le(&mut std::io::Cursor::new(bytes))?;
        if metadata.protocol_version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(metadata.protocol_version));
        }

        Ok(metadata)
    }
}

impl BinRead for Metadata {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        _endian: binrw::Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let mut raw = [0u8; METADATA_SIZE];
        reader.read_exact(&mut raw)?;

        Ok(Self {
            protocol_version: raw[0],
            instruction: raw[4],
            is_response: raw[RESPONSE_FLAG_OFFSET] != 0,
        })
    }
}

impl BinWrite for Metadata {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        _endian: binrw::Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        let mut raw = [0u8; METADATA_SIZE];
        raw[0] = self.protocol_version;
        raw[4] = self.instruction;
        raw[RESPONSE_FLAG_OFFSET] = u8::from(self.is_response);
        writer.write_all(&raw)?;
        Ok(())
    }
}
