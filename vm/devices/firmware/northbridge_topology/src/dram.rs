// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! DRAM extents and memory hole detection.

use crate::config_space::ConfigSpace;
use crate::config_space::Function;
use crate::topology::Topology;
use alloc::vec::Vec;
use memory_range::FOUR_GB;
use memory_range::MemoryRange;
use northbridge_defs::f1;

/// The DRAM range decoded for one node.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DramExtent {
    /// Owning node.
    pub node: u8,
    /// Address range.
    pub range: MemoryRange,
}

/// Decodes the DRAM extents of all nodes with DRAM enabled, in node order.
pub fn dram_extents(topology: &Topology) -> Vec<DramExtent> {
    topology
        .active_nodes()
        .filter_map(|node| {
            node.dram_range().map(|range| DramExtent {
                node: node.id,
                range,
            })
        })
        .collect()
}

/// How a memory hole was found.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HoleSource {
    /// DRAM init programmed the hole register.
    Explicit,
    /// Two consecutive extents below 4 GiB do not touch.
    Inferred,
}

/// The single sub-4 GiB gap in the DRAM map.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MemoryHole {
    /// First address of the hole.
    pub start: u64,
    /// Node the hole was found on.
    pub node: u8,
    /// How the hole was found.
    pub source: HoleSource,
}

/// Finds the memory hole, preferring an explicitly programmed one.
pub fn find_memory_hole(cfg: &impl ConfigSpace, topology: &Topology) -> Option<MemoryHole> {
    let extents = dram_extents(topology);
    let hole = explicit_hole(cfg, topology, &extents).or_else(|| infer_hole(&extents));
    if let Some(hole) = &hole {
        tracing::debug!(
            start = hole.start,
            node = hole.node,
            source = ?hole.source,
            "found memory hole"
        );
    }
    hole
}

fn explicit_hole(
    cfg: &impl ConfigSpace,
    topology: &Topology,
    extents: &[DramExtent],
) -> Option<MemoryHole> {
    // The DRAM map is read from node 0, so a node can own DRAM without its
    // own function 1 responding.
    extents.iter().find_map(|extent| {
        topology
            .node(extent.node)?
            .function(Function::AddressMap)?;
        let hole = f1::DramHole::from(cfg.read_u32(extent.node, Function::AddressMap, f1::DRAM_HOLE));
        hole.valid().then(|| MemoryHole {
            start: hole.base_address(),
            node: extent.node,
            source: HoleSource::Explicit,
        })
    })
}

/// Scans extents for the first discontinuity below 4 GiB.
///
/// The hole starts at the end of the extent before the gap. Extents are
/// expected in ascending order, with the first one starting at zero.
pub fn infer_hole(extents: &[DramExtent]) -> Option<MemoryHole> {
    let mut previous_end = 0;
    for extent in extents {
        if extent.range.start() > FOUR_GB {
            break;
        }
        if extent.range.start() != previous_end {
            return Some(MemoryHole {
                start: previous_end,
                node: extent.node,
                source: HoleSource::Inferred,
            });
        }
        previous_end = extent.range.end();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NorthbridgeConfig;
    use crate::test_helpers::FakeConfigSpace;
    use memory_range::GB;

    fn extent(node: u8, range: core::ops::Range<u64>) -> DramExtent {
        DramExtent {
            node,
            range: MemoryRange::new(range),
        }
    }

    #[test]
    fn test_infer_hole() {
        let extents = [extent(0, 0..2 * GB), extent(1, 3 * GB..6 * GB)];
        assert_eq!(
            infer_hole(&extents),
            Some(MemoryHole {
                start: 2 * GB,
                node: 1,
                source: HoleSource::Inferred,
            })
        );

        let contiguous = [extent(0, 0..2 * GB), extent(1, 2 * GB..6 * GB)];
        assert_eq!(infer_hole(&contiguous), None);

        // Gaps above 4 GiB are not holes.
        let high = [extent(0, 0..4 * GB), extent(1, 5 * GB..6 * GB)];
        assert_eq!(infer_hole(&high), None);
    }

    #[test]
    fn test_explicit_hole_wins() {
        let mut cfg = FakeConfigSpace::new(2);
        cfg.set_dram(0, 0, 2 * GB);
        cfg.set_dram(1, 3 * GB, 6 * GB);
        cfg.set(1, Function::AddressMap, f1::DRAM_HOLE, 0xc000_0001);
        let topology = Topology::probe(&cfg, &NorthbridgeConfig::default()).unwrap();

        assert_eq!(
            find_memory_hole(&cfg, &topology),
            Some(MemoryHole {
                start: 3 * GB,
                node: 1,
                source: HoleSource::Explicit,
            })
        );
    }

    #[test]
    fn test_explicit_hole_needs_address_map() {
        let mut cfg = FakeConfigSpace::new(2);
        cfg.set_dram(0, 0, 2 * GB);
        cfg.set_dram(1, 3 * GB, 6 * GB);
        cfg.remove_function(1, Function::AddressMap);
        let topology = Topology::probe(&cfg, &NorthbridgeConfig::default()).unwrap();

        // Node 1 still owns DRAM; the hole is inferred from the gap instead.
        assert_eq!(
            find_memory_hole(&cfg, &topology),
            Some(MemoryHole {
                start: 2 * GB,
                node: 1,
                source: HoleSource::Inferred,
            })
        );
    }

    #[test]
    fn test_disabled_node_skipped() {
        let mut cfg = FakeConfigSpace::new(2);
        cfg.set_dram(0, 0, 2 * GB);
        let topology = Topology::probe(&cfg, &NorthbridgeConfig::default()).unwrap();
        let extents = dram_extents(&topology);
        assert_eq!(extents, [extent(0, 0..2 * GB)]);
    }
}
