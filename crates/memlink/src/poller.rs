//! Byte-level change detection between successive reads.

use crate::driver::BlockData;
use crate::platform::MemoryAddressBlock;
use std::collections::HashMap;

/// Diffs successive reads into `<block>:0x<address>` changes.
///
/// The first read of a block only records a baseline. A block whose length
/// changes is treated as new.
#[derive(Debug, Default)]
pub struct MemoryPoller {
    names: HashMap<u32, String>,
    previous: HashMap<u32, Vec<u8>>,
}

impl MemoryPoller {
    /// Poller naming blocks after `blocks`; unnamed blocks use `mem`.
    pub fn new(blocks: &[MemoryAddressBlock]) -> Self {
        Self {
            names: blocks
                .iter()
                .map(|b| (b.start_address, b.name.clone()))
                .collect(),
            previous: HashMap::new(),
        }
    }

    /// Drop all baselines
    pub fn reset(&mut self) {
        self.previous.clear();
    }

    /// Changed bytes since the previous read, keyed by path.
    pub fn diff(&mut self, blocks: &[BlockData]) -> Vec<(String, u8)> {
        let mut changes = Vec::new();

        for block in blocks {
            let name = self.names.get(&block.start).map_or("mem", String::as_str);

            let Some(previous) = self
                .previous
                .get_mut(&block.start)
                .filter(|p| p.len() == block.data.len())
            else {
                self.previous.insert(block.start, block.data.clone());
                continue;
            };

            for (i, (old, new)) in previous.iter_mut().zip(&block.data).enumerate() {
                if *old != *new {
                    let address = u64::from(block.start) + i as u64;
                    changes.push((format!("{name}:0x{address:X}"), *new));
                    *old = *new;
                }
            }
        }

        changes
    }
}
