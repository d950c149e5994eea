//! Per-console memory layouts.
//!
//! Each supported system maps its logical memory domains (work RAM, I/O
//! RAM, ...) onto offsets inside the linear buffer the emulator integration
//! mirrors into shared memory. The table is static and read-only.

use serde::Serialize;
use std::time::Duration;

/// Emulated frame rate used to turn frame skip into wall-clock time.
pub const FRAMES_PER_SECOND: u32 = 60;

/// A named, inclusive, contiguous logical address range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MemoryAddressBlock {
    /// Block name, usually the domain id
    pub name: String,
    /// First address
    pub start_address: u32,
    /// Last address, inclusive
    pub end_address: u32,
}

impl MemoryAddressBlock {
    /// Create a block; `start_address` must not exceed `end_address`.
    pub fn new(name: impl Into<String>, start_address: u32, end_address: u32) -> Self {
        debug_assert!(start_address <= end_address);
        Self {
            name: name.into(),
            start_address,
            end_address,
        }
    }

    /// Number of bytes covered
    pub const fn len(&self) -> u64 {
        self.end_address as u64 - self.start_address as u64 + 1
    }

    /// Always false; a block covers at least one address
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Whether `address` falls inside the block
    pub const fn contains(&self, address: u32) -> bool {
        self.start_address <= address && address <= self.end_address
    }

    /// Whether two blocks share any address
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.start_address <= other.end_address && other.start_address <= self.end_address
    }
}

/// Where one console memory domain lives in the shared buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DomainLayout {
    /// Domain name, sent as the write identifier
    pub domain_id: &'static str,
    /// First console address of the domain
    pub memory_start: u32,
    /// Offset of the domain in the shared buffer
    pub start_offset: i64,
    /// Domain size in bytes
    pub length: i32,
}

impl DomainLayout {
    /// Offset one past the last byte of the domain in the shared buffer
    pub const fn end_offset(&self) -> i64 {
        self.start_offset + self.length as i64
    }

    /// Whether `address` belongs to this domain.
    ///
    /// The upper bound is inclusive: `memory_start + length` still matches,
    /// which lets a caller address the byte just past a domain as its end.
    /// Use [`PlatformEntry::resolve`] to pick between adjacent domains.
    pub const fn contains(&self, address: u32) -> bool {
        let address = address as i64;
        let start = self.memory_start as i64;
        start <= address && address <= start + self.length as i64
    }

    /// Whether `address` is one of the domain's own bytes.
    pub const fn holds(&self, address: u32) -> bool {
        let address = address as i64;
        let start = self.memory_start as i64;
        start <= address && address < start + self.length as i64
    }

    /// Whether `length` bytes written `relative` bytes into the domain
    /// stay inside it
    pub const fn fits(&self, relative: u32, length: usize) -> bool {
        self.length >= 0
            && (relative as u64).saturating_add(length as u64) <= self.length as u64
    }

    /// Console address range covered by the domain
    pub fn address_block(&self) -> MemoryAddressBlock {
        let last = self.memory_start as u64 + (self.length.max(1) as u64) - 1;
        MemoryAddressBlock::new(
            self.domain_id,
            self.memory_start,
            u32::try_from(last).unwrap_or(u32::MAX),
        )
    }
}

/// Memory layout of one supported console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlatformEntry {
    /// System identifier as reported by the integration
    pub system_id: &'static str,
    /// Domains in shared-buffer order
    pub domains: &'static [DomainLayout],
    /// Frames between shared memory refreshes
    pub frame_skip_default: i32,
}

impl PlatformEntry {
    /// Domain containing `address`, with the address relative to the
    /// domain start.
    ///
    /// A domain holding the byte wins over one whose inclusive end merely
    /// touches it, so the first byte of a domain never resolves to its
    /// predecessor.
    pub fn resolve(&self, address: u32) -> Option<(&'static DomainLayout, u32)> {
        self.domains
            .iter()
            .find(|domain| domain.holds(address))
            .or_else(|| self.domains.iter().find(|domain| domain.contains(address)))
            .map(|domain| (domain, address - domain.memory_start))
    }

    /// Like [`PlatformEntry::resolve`], but only when all `length` bytes
    /// land inside the domain.
    pub fn resolve_write(
        &self,
        address: u32,
        length: usize,
    ) -> Option<(&'static DomainLayout, u32)> {
        self.resolve(address)
            .filter(|(domain, relative)| domain.fits(*relative, length))
    }

    /// Largest `end_offset` of any domain
    pub fn buffer_size(&self) -> usize {
        self.domains
            .iter()
            .map(|d| usize::try_from(d.end_offset()).unwrap_or(0))
            .max()
            .unwrap_or(0)
    }

    /// Console address ranges of all domains
    pub fn address_blocks(&self) -> Vec<MemoryAddressBlock> {
        self.domains.iter().map(DomainLayout::address_block).collect()
    }

    /// Minimum delay between reads derived from the default frame skip.
    ///
    /// A frame skip below one is treated as one frame.
    pub fn frame_interval(&self) -> Duration {
        let frames = u32::try_from(self.frame_skip_default.max(1)).unwrap_or(1);
        Duration::from_secs(1) * frames / FRAMES_PER_SECOND
    }
}

const NES_DOMAINS: &[DomainLayout] = &[
    DomainLayout {
        domain_id: "RAM",
        memory_start: 0x0000,
        start_offset: 0x0000,
        length: 0x800,
    },
    DomainLayout {
        domain_id: "PRG RAM",
        memory_start: 0x6000,
        start_offset: 0x0800,
        length: 0x2000,
    },
];

const SNES_DOMAINS: &[DomainLayout] = &[DomainLayout {
    domain_id: "WRAM",
    memory_start: 0x7E_0000,
    start_offset: 0,
    length: 0x2_0000,
}];

const GB_DOMAINS: &[DomainLayout] = &[
    DomainLayout {
        domain_id: "VRAM",
        memory_start: 0x8000,
        start_offset: 0x0000,
        length: 0x2000,
    },
    DomainLayout {
        domain_id: "SRAM",
        memory_start: 0xA000,
        start_offset: 0x2000,
        length: 0x2000,
    },
    DomainLayout {
        domain_id: "WRAM",
        memory_start: 0xC000,
        start_offset: 0x4000,
        length: 0x2000,
    },
    DomainLayout {
        domain_id: "HRAM",
        memory_start: 0xFF80,
        start_offset: 0x6000,
        length: 0x7F,
    },
];

const GBA_DOMAINS: &[DomainLayout] = &[
    DomainLayout {
        domain_id: "EWRAM",
        memory_start: 0x0200_0000,
        start_offset: 0,
        length: 0x4_0000,
    },
    DomainLayout {
        domain_id: "IWRAM",
        memory_start: 0x0300_0000,
        start_offset: 0x4_0000,
        length: 0x8000,
    },
];

const NDS_DOMAINS: &[DomainLayout] = &[DomainLayout {
    domain_id: "Main RAM",
    memory_start: 0x0200_0000,
    start_offset: 0,
    length: 0x40_0000,
}];

/// Supported systems.
pub static PLATFORMS: &[PlatformEntry] = &[
    PlatformEntry {
        system_id: "NES",
        domains: NES_DOMAINS,
        frame_skip_default: 1,
    },
    PlatformEntry {
        system_id: "SNES",
        domains: SNES_DOMAINS,
        frame_skip_default: 1,
    },
    PlatformEntry {
        system_id: "GB",
        domains: GB_DOMAINS,
        frame_skip_default: 1,
    },
    PlatformEntry {
        system_id: "GBC",
        domains: GB_DOMAINS,
        frame_skip_default: 1,
    },
    PlatformEntry {
        system_id: "GBA",
        domains: GBA_DOMAINS,
        frame_skip_default: 2,
    },
    PlatformEntry {
        system_id: "NDS",
        domains: NDS_DOMAINS,
        frame_skip_default: 4,
    },
];

/// Look up a system in `platforms`, ignoring ASCII case.
pub fn lookup_in(
    platforms: &'static [PlatformEntry],
    system_id: &str,
) -> Option<&'static PlatformEntry> {
    platforms
        .iter()
        .find(|p| p.system_id.eq_ignore_ascii_case(system_id))
}

/// Look up a system in [`PLATFORMS`].
pub fn lookup(system_id: &str) -> Option<&'static PlatformEntry> {
    lookup_in(PLATFORMS, system_id)
}

/// Largest domain end across all of [`PLATFORMS`].
///
/// The shared data region must be at least this large.
pub fn largest_domain_end() -> usize {
    PLATFORMS
        .iter()
        .map(PlatformEntry::buffer_size)
        .max()
        .unwrap_or(0)
}
