// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Splits per-node DRAM into the final physical memory map.
//!
//! DRAM below the top of low memory stays where it is, except for the
//! legacy VGA window. DRAM that would sit under the PCI hole is reachable
//! only through the remap above 4 GiB, whose end is taken from the
//! separately tracked top of memory rather than recomputed.

use crate::dram::DramExtent;
use crate::dram::MemoryHole;
use alloc::vec::Vec;
use memory_range::FOUR_GB;
use memory_range::MB;
use memory_range::MemoryRange;
use memory_range::align_down;

/// The legacy VGA frame buffer window.
pub const VGA_WINDOW: MemoryRange = MemoryRange::new(0xa_0000..0xc_0000);

/// Granularity the processor can decode the PCI hole at.
const TOLM_DECODE_ALIGN: u64 = 64 * 1024;
/// The PCI hole is kept to a multiple of 64 MiB to limit MTRR usage.
const TOLM_HOLE_ALIGN: u64 = 64 * MB;

/// A usable DRAM region.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RamRegion {
    /// Owning node.
    pub node: u8,
    /// Address range.
    pub range: MemoryRange,
}

/// Why a region is reserved.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReservedKind {
    /// Extended configuration space window.
    Mmconf,
    /// Integrated graphics frame buffer.
    Uma,
}

/// A region firmware tables must report as reserved.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ReservedRegion {
    /// Reservation reason.
    pub kind: ReservedKind,
    /// Address range.
    pub range: MemoryRange,
}

/// The final physical memory map.
///
/// RAM regions never overlap and appear in ascending address order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryMap {
    ram: Vec<RamRegion>,
    reserved: Vec<ReservedRegion>,
}

impl MemoryMap {
    /// Returns an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Usable DRAM regions.
    pub fn ram(&self) -> &[RamRegion] {
        &self.ram
    }

    /// Reserved regions.
    pub fn reserved(&self) -> &[ReservedRegion] {
        &self.reserved
    }

    /// Total bytes of usable DRAM.
    pub fn ram_size(&self) -> u64 {
        self.ram.iter().map(|r| r.range.len()).sum()
    }

    /// Appends a usable region.
    ///
    /// Empty regions are dropped. A region that starts below the end of the
    /// previous one is trimmed to start there, and dropped if nothing is
    /// left.
    pub fn add_ram(&mut self, node: u8, range: MemoryRange) {
        if range.is_empty() {
            return;
        }
        let range = match self.ram.last() {
            Some(last) if range.start() < last.range.end() => {
                let (_, trimmed) = range.split_at(last.range.end());
                tracing::error!(
                    node,
                    %range,
                    previous = %last.range,
                    "dram region overlaps previous region"
                );
                trimmed
            }
            _ => range,
        };
        if range.is_empty() {
            return;
        }
        tracing::info!(node, %range, "ram region");
        self.ram.push(RamRegion { node, range });
    }

    /// Appends a reserved region.
    pub fn add_reserved(&mut self, kind: ReservedKind, range: MemoryRange) {
        if range.is_empty() {
            return;
        }
        tracing::info!(?kind, %range, "reserved region");
        self.reserved.push(ReservedRegion { kind, range });
    }

    /// The end of the highest DRAM region below 4 GiB.
    pub fn top_of_memory_below_4g(&self) -> u64 {
        self.ram
            .iter()
            .map(|r| r.range.end())
            .filter(|end| *end <= FOUR_GB)
            .max()
            .unwrap_or(0)
    }
}

/// Inputs to [`partition_memory`] that do not come from the DRAM map.
#[derive(Debug, Copy, Clone)]
pub struct PartitionParams {
    /// Top of low memory derived from PCI window placement.
    pub tolm: u64,
    /// The memory hole, if any.
    pub hole: Option<MemoryHole>,
    /// End of DRAM remapped above 4 GiB.
    pub top_mem2: u64,
}

/// Rounds `tolm` down to the base the PCI hole is decoded from, lowered to
/// the memory hole if one starts below it.
pub fn mmio_base(tolm: u64, hole: Option<MemoryHole>) -> u64 {
    let base = align_down(align_down(tolm, TOLM_DECODE_ALIGN), TOLM_HOLE_ALIGN);
    match hole {
        Some(hole) if base > hole.start => hole.start,
        _ => base,
    }
}

/// Builds the RAM portion of the memory map from node DRAM extents, in node
/// order.
pub fn partition_memory(extents: &[DramExtent], params: &PartitionParams) -> MemoryMap {
    let mmio_base = mmio_base(params.tolm, params.hole);
    tracing::info!(
        tolm = params.tolm,
        mmio_base,
        top_mem2 = params.top_mem2,
        "partitioning dram"
    );

    let mut map = MemoryMap::new();
    for extent in extents {
        let node = extent.node;
        let mut range = extent.range;

        if range.contains(&VGA_WINDOW) {
            let (below, _) = range.split_at(VGA_WINDOW.start());
            map.add_ram(node, below);
            range = range.split_at(VGA_WINDOW.end()).1;
        }

        if range.start() < FOUR_GB && range.end() > mmio_base {
            if range.start() <= mmio_base {
                let (below, above) = range.split_at(mmio_base);
                map.add_ram(node, below);
                range = above;
            }
            range = if range.end() <= FOUR_GB {
                MemoryRange::EMPTY
            } else {
                MemoryRange::try_new(FOUR_GB..params.top_mem2).unwrap_or(MemoryRange::EMPTY)
            };
        }

        map.add_ram(node, range);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dram::HoleSource;
    use crate::test_helpers::init_tracing;
    use memory_range::GB;

    fn extent(node: u8, range: core::ops::Range<u64>) -> DramExtent {
        DramExtent {
            node,
            range: MemoryRange::new(range),
        }
    }

    fn params(tolm: u64, top_mem2: u64) -> PartitionParams {
        PartitionParams {
            tolm,
            hole: None,
            top_mem2,
        }
    }

    #[test]
    fn test_vga_carve_out() {
        init_tracing();
        let map = partition_memory(&[extent(0, 0..GB)], &params(3 * GB, 0));
        let ranges: Vec<_> = map.ram().iter().map(|r| r.range).collect();
        assert_eq!(
            ranges,
            [
                MemoryRange::new(0..VGA_WINDOW.start()),
                MemoryRange::new(VGA_WINDOW.end()..GB),
            ]
        );
        assert_eq!(map.ram_size(), GB - VGA_WINDOW.len());
    }

    #[test]
    fn test_two_node_split() {
        init_tracing();
        // 1 GiB under the PCI hole is remapped above 6 GiB.
        let extents = [extent(0, 0..2 * GB), extent(1, 2 * GB..6 * GB)];
        let map = partition_memory(&extents, &params(3 * GB, 7 * GB));

        let regions: Vec<_> = map.ram().iter().map(|r| (r.node, r.range)).collect();
        assert_eq!(
            regions,
            [
                (0, MemoryRange::new(0..VGA_WINDOW.start())),
                (0, MemoryRange::new(VGA_WINDOW.end()..2 * GB)),
                (1, MemoryRange::new(2 * GB..3 * GB)),
                (1, MemoryRange::new(4 * GB..7 * GB)),
            ]
        );
        assert_eq!(map.ram_size(), 6 * GB - VGA_WINDOW.len());
        for pair in map.ram().windows(2) {
            assert!(pair[0].range.end() <= pair[1].range.start());
        }
        assert_eq!(map.top_of_memory_below_4g(), 3 * GB);
    }

    #[test]
    fn test_extent_below_tolm_untouched() {
        let extents = [extent(0, 0..2 * GB), extent(1, 2 * GB..3 * GB)];
        let map = partition_memory(&extents, &params(0xe000_0000, 0));
        assert_eq!(map.ram()[2].range, MemoryRange::new(2 * GB..3 * GB));
    }

    #[test]
    fn test_extent_ending_in_hole_dropped() {
        // Node 1 lies entirely in the PCI hole and nothing is remapped.
        let extents = [extent(0, 0..3 * GB), extent(1, 3 * GB..4 * GB)];
        let map = partition_memory(&extents, &params(3 * GB, 0));
        assert!(map.ram().iter().all(|r| r.node == 0));
        assert_eq!(map.top_of_memory_below_4g(), 3 * GB);
    }

    #[test]
    fn test_mmio_base_rounding() {
        assert_eq!(mmio_base(0xe3ff_0000, None), 0xe000_0000);
        assert_eq!(mmio_base(0xc000_0000, None), 0xc000_0000);

        let hole = MemoryHole {
            start: 2 * GB,
            node: 1,
            source: HoleSource::Inferred,
        };
        assert_eq!(mmio_base(3 * GB, Some(hole)), 2 * GB);
        // A hole above the PCI hole base does not raise it.
        assert_eq!(
            mmio_base(GB, Some(MemoryHole { start: 2 * GB, ..hole })),
            GB
        );
    }

    #[test]
    fn test_hole_lowers_split() {
        let extents = [extent(0, 0..2 * GB), extent(1, 3 * GB..5 * GB)];
        let hole = MemoryHole {
            start: 2 * GB,
            node: 1,
            source: HoleSource::Inferred,
        };
        let map = partition_memory(
            &extents,
            &PartitionParams {
                tolm: 0xe000_0000,
                hole: Some(hole),
                top_mem2: 5 * GB,
            },
        );
        let last = map.ram().last().unwrap();
        assert_eq!((last.node, last.range), (1, MemoryRange::new(4 * GB..5 * GB)));
    }

    #[test]
    fn test_overlap_trimmed() {
        let mut map = MemoryMap::new();
        map.add_ram(0, MemoryRange::new(0..4 * GB));
        map.add_ram(1, MemoryRange::new(2 * GB..6 * GB));
        map.add_ram(2, MemoryRange::new(5 * GB..6 * GB));
        assert_eq!(
            map.ram()[1],
            RamRegion {
                node: 1,
                range: MemoryRange::new(4 * GB..6 * GB)
            }
        );
        assert_eq!(map.ram().len(), 2);
    }
}
