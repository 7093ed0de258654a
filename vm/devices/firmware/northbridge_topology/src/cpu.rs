// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Processor enumeration and local APIC id assignment.
//!
//! Local APIC ids start above the I/O APIC range once 4-bit I/O APIC ids
//! would collide with them, and the cores of each module are numbered
//! contiguously. In every layout where the early boot code hands out
//! unique ids these match them; elsewhere each node group and module gets
//! its own ids so that no two cores collide.

use crate::FatalError;
use crate::config_space::ConfigSpace;
use crate::config_space::Function;
use crate::topology::Node;
use crate::topology::Topology;
use alloc::collections::BTreeSet;
use alloc::vec::Vec;
use core::num::NonZeroU32;
use northbridge_defs::cpuid;
use northbridge_defs::f3;
use northbridge_defs::f5;

/// I/O APIC ids are only 4 bits wide.
const IOAPIC_ID_LIMIT: u32 = 16;

/// Where the sibling count of a node is read from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SiblingSource {
    /// Function 3 northbridge capabilities.
    Family10h,
    /// Function 5 northbridge capabilities 2.
    Family15h,
    /// Unrecognized family; every node is treated as single core.
    Unknown,
}

impl SiblingSource {
    /// Selects the layout from the CPUID leaf 1 processor signature.
    pub fn from_signature(signature: cpuid::ProcessorSignature) -> Self {
        match signature.ext_family() {
            1 => SiblingSource::Family10h,
            6 => SiblingSource::Family15h,
            _ => SiblingSource::Unknown,
        }
    }

    /// The function whose presence marks the node enabled.
    pub fn function(self) -> Function {
        match self {
            SiblingSource::Family10h => Function::Misc,
            SiblingSource::Family15h => Function::Extended,
            SiblingSource::Unknown => Function::Ht,
        }
    }

    /// Reads the number of cores beyond the first on `node`.
    pub fn discover(self, cfg: &impl ConfigSpace, node: &Node) -> SiblingCount {
        let handle = node.function(self.function());
        match self {
            SiblingSource::Family10h if handle.is_some() => {
                let caps = f3::NbCapabilities::from(cfg.read_u32(
                    node.id,
                    Function::Misc,
                    f3::NB_CAPABILITIES,
                ));
                SiblingCount::Discovered(caps.siblings())
            }
            SiblingSource::Family15h if handle.is_some_and(|h| h.enabled) => {
                let caps = f5::NbCapabilities2::from(cfg.read_u32(
                    node.id,
                    Function::Extended,
                    f5::NB_CAPABILITIES_2,
                ));
                SiblingCount::Discovered(caps.cmp_cap())
            }
            _ => SiblingCount::Defaulted,
        }
    }
}

/// Result of sibling discovery.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SiblingCount {
    /// Read from the family's capability register.
    Discovered(u8),
    /// No usable register; assume a single core.
    Defaulted,
}

impl SiblingCount {
    /// Number of cores beyond the first.
    pub fn siblings(self) -> u8 {
        match self {
            SiblingCount::Discovered(n) => n,
            SiblingCount::Defaulted => 0,
        }
    }
}

/// Processor-wide core counts from CPUID.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CoreCapabilities {
    /// Cores a node's APIC id space is sized for.
    pub core_max: u32,
    /// Populated cores minus one, as reported by CPUID.
    pub core_count_minus_one: u8,
}

impl CoreCapabilities {
    /// Decodes CPUID leaf 0x8000_0008 ECX.
    pub fn from_cpuid(info: cpuid::CoreCountInfo) -> Self {
        Self {
            core_max: 1 << info.apic_id_core_id_size(),
            core_count_minus_one: info.nc(),
        }
    }
}

/// Raw inputs for processor enumeration.
#[derive(Debug, Copy, Clone)]
pub struct CpuInputs {
    /// CPUID leaf 1 EAX.
    pub signature: u32,
    /// CPUID leaf 0x8000_0008 ECX.
    pub core_count_info: u32,
    /// Number of I/O APICs on the platform.
    pub ioapic_count: u32,
    /// Number of nodes sharing one APIC id group.
    pub modules: NonZeroU32,
}

/// One enumerated core.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ProcessorEntry {
    /// Node index.
    pub node: u8,
    /// Core index within the node.
    pub core: u8,
    /// Local APIC id.
    pub apic_id: u32,
    /// The node's sibling-source function was enabled.
    pub enabled: bool,
}

/// Returns the first local APIC id.
///
/// Ids `0..ioapic_count` are left to the I/O APICs, rounded up to a whole
/// node's worth of ids, once the total id count reaches the 4-bit limit.
pub fn lapic_id_start(node_count: u32, core_max: u32, ioapic_count: u32) -> u32 {
    if node_count * core_max + ioapic_count >= IOAPIC_ID_LIMIT {
        ioapic_count.div_ceil(core_max) * core_max
    } else {
        0
    }
}

/// Returns the local APIC id of `core` on `node`.
///
/// Nodes are grouped `modules` at a time. Each group gets its own block of
/// ids, `start` wide or `core_max` wide when nothing is reserved, and each
/// module within a group gets `siblings + 1` ids.
pub fn apic_id(
    node: u32,
    core: u32,
    siblings: u32,
    core_max: u32,
    start: u32,
    modules: NonZeroU32,
) -> u32 {
    let group = node / modules.get();
    let module = node % modules.get();
    let group_stride = if start != 0 { start } else { core_max };
    start + group * group_stride + module * (siblings + 1) + core
}

/// Enumerates the cores of every node and assigns their APIC ids.
pub fn scan_cpus(
    cfg: &impl ConfigSpace,
    topology: &Topology,
    inputs: &CpuInputs,
) -> Result<Vec<ProcessorEntry>, FatalError> {
    let caps = CoreCapabilities::from_cpuid(cpuid::CoreCountInfo::from(inputs.core_count_info));
    let source = SiblingSource::from_signature(cpuid::ProcessorSignature::from(inputs.signature));
    let node_count = u32::from(topology.node_count());
    let start = lapic_id_start(node_count, caps.core_max, inputs.ioapic_count);
    tracing::debug!(
        ?source,
        core_max = caps.core_max,
        cores = u32::from(caps.core_count_minus_one) + 1,
        start,
        "enumerating processors"
    );

    let mut processors = Vec::new();
    let mut seen = BTreeSet::new();
    for node in topology.active_nodes() {
        let count = source.discover(cfg, node);
        if count == SiblingCount::Defaulted {
            tracing::warn!(node = node.id, ?source, "no sibling count, assuming one core");
        }
        let enabled = node.function(source.function()).is_some_and(|h| h.enabled);
        let siblings = count.siblings();

        for core in 0..=siblings {
            let apic_id = apic_id(
                node.id.into(),
                core.into(),
                siblings.into(),
                caps.core_max,
                start,
                inputs.modules,
            );
            if !seen.insert(apic_id) {
                tracing::error!(node = node.id, core, apic_id, "duplicate apic id");
                return Err(FatalError::DuplicateProcessorId {
                    apic_id,
                    node: node.id,
                    core,
                });
            }
            tracing::info!(node = node.id, core, apic_id, enabled, "processor");
            processors.push(ProcessorEntry {
                node: node.id,
                core,
                apic_id,
                enabled,
            });
        }
    }
    Ok(processors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NorthbridgeConfig;
    use crate::test_helpers::FakeConfigSpace;
    use crate::test_helpers::init_tracing;

    const FAMILY_15H: u32 = 0x0063_0f01;
    const FAMILY_10H: u32 = 0x0010_0f42;

    fn ids(nodes: u32, core_max: u32, siblings: u32, ioapics: u32, modules: u32) -> Vec<u32> {
        let modules = NonZeroU32::new(modules).unwrap();
        let start = lapic_id_start(nodes, core_max, ioapics);
        (0..nodes)
            .flat_map(|n| {
                (0..=siblings).map(move |c| apic_id(n, c, siblings, core_max, start, modules))
            })
            .collect()
    }

    #[test]
    fn test_reserved_ioapic_range() {
        let ids = ids(2, 4, 3, 20, 1);
        assert_eq!(ids.len(), 8);
        assert!(ids.iter().all(|id| *id >= 20));
        let unique: BTreeSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), 8);
    }

    #[test]
    fn test_early_boot_numbering() {
        // (nodes, core_max, siblings, ioapics, modules) -> ids. These are
        // the layouts where the early boot numbering is already unique, so
        // both agree.
        let cases: &[((u32, u32, u32, u32, u32), &[u32])] = &[
            ((1, 4, 3, 1, 1), &[0, 1, 2, 3]),
            ((2, 4, 1, 1, 2), &[0, 1, 2, 3]),
            ((2, 4, 3, 20, 1), &[20, 21, 22, 23, 40, 41, 42, 43]),
            ((2, 4, 3, 20, 2), &[20, 21, 22, 23, 24, 25, 26, 27]),
            (
                (4, 8, 3, 1, 2),
                &[8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23],
            ),
        ];
        for &((nodes, core_max, siblings, ioapics, modules), expected) in cases {
            assert_eq!(
                ids(nodes, core_max, siblings, ioapics, modules),
                expected,
                "nodes {nodes} core_max {core_max} modules {modules}"
            );
        }
    }

    #[test]
    fn test_single_module_groups_without_reservation() {
        // Below the threshold each node still gets its own id group, where
        // the early boot numbering would give every node ids 0 and 1.
        assert_eq!(ids(2, 4, 1, 1, 1), [0, 1, 4, 5]);
    }

    #[test]
    fn test_module_offset_scales_with_module() {
        // The third module of a group continues past the second instead of
        // reusing its ids.
        assert_eq!(ids(3, 4, 1, 20, 3), [20, 21, 22, 23, 24, 25]);
    }

    #[test]
    fn test_lapic_id_start() {
        assert_eq!(lapic_id_start(2, 4, 20), 20);
        assert_eq!(lapic_id_start(2, 4, 7), 0);
        assert_eq!(lapic_id_start(2, 4, 8), 8);
        assert_eq!(lapic_id_start(1, 4, 1), 0);
        assert_eq!(lapic_id_start(4, 4, 1), 4);
    }

    #[test]
    fn test_scan_cpus_family15h() {
        init_tracing();
        let mut cfg = FakeConfigSpace::new(2);
        cfg.set_all(Function::Extended, f5::NB_CAPABILITIES_2, 3);
        let topology = Topology::probe(&cfg, &NorthbridgeConfig::default()).unwrap();

        let inputs = CpuInputs {
            signature: FAMILY_15H,
            core_count_info: 0x2003,
            ioapic_count: 20,
            modules: NonZeroU32::new(1).unwrap(),
        };
        let cpus = scan_cpus(&cfg, &topology, &inputs).unwrap();
        let ids: Vec<_> = cpus.iter().map(|p| (p.node, p.core, p.apic_id)).collect();
        assert_eq!(
            ids,
            [
                (0, 0, 20),
                (0, 1, 21),
                (0, 2, 22),
                (0, 3, 23),
                (1, 0, 40),
                (1, 1, 41),
                (1, 2, 42),
                (1, 3, 43),
            ]
        );
        assert!(cpus.iter().all(|p| p.enabled));
    }

    #[test]
    fn test_scan_cpus_family10h() {
        let mut cfg = FakeConfigSpace::new(1);
        cfg.set_all(Function::Misc, f3::NB_CAPABILITIES, 0x1000);
        let topology = Topology::probe(&cfg, &NorthbridgeConfig::default()).unwrap();

        let inputs = CpuInputs {
            signature: FAMILY_10H,
            core_count_info: 0x2003,
            ioapic_count: 1,
            modules: NonZeroU32::new(1).unwrap(),
        };
        let cpus = scan_cpus(&cfg, &topology, &inputs).unwrap();
        assert_eq!(cpus.len(), 2);
    }

    #[test]
    fn test_sibling_defaults() {
        let mut cfg = FakeConfigSpace::new(1);
        cfg.remove_function(0, Function::Extended);
        let topology = Topology::probe(&cfg, &NorthbridgeConfig::default()).unwrap();
        let node = topology.node(0).unwrap();

        assert_eq!(
            SiblingSource::Family15h.discover(&cfg, node),
            SiblingCount::Defaulted
        );
        assert_eq!(
            SiblingSource::Unknown.discover(&cfg, node),
            SiblingCount::Defaulted
        );
        assert_eq!(
            SiblingSource::from_signature(cpuid::ProcessorSignature::from(0x00a0_0f00)),
            SiblingSource::Unknown
        );

        let inputs = CpuInputs {
            signature: FAMILY_15H,
            core_count_info: 0x2003,
            ioapic_count: 1,
            modules: NonZeroU32::new(1).unwrap(),
        };
        let cpus = scan_cpus(&cfg, &topology, &inputs).unwrap();
        assert_eq!(
            cpus,
            [ProcessorEntry {
                node: 0,
                core: 0,
                apic_id: 0,
                enabled: false,
            }]
        );
    }

    #[test]
    fn test_duplicate_is_fatal() {
        // Eight cores per node overflow a four-id group.
        let mut cfg = FakeConfigSpace::new(2);
        cfg.set_all(Function::Extended, f5::NB_CAPABILITIES_2, 7);
        let topology = Topology::probe(&cfg, &NorthbridgeConfig::default()).unwrap();
        let inputs = CpuInputs {
            signature: FAMILY_15H,
            core_count_info: 0x2003,
            ioapic_count: 1,
            modules: NonZeroU32::new(1).unwrap(),
        };
        assert!(matches!(
            scan_cpus(&cfg, &topology, &inputs),
            Err(FatalError::DuplicateProcessorId { node: 1, .. })
        ));
    }
}
