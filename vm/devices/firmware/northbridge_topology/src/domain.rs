// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The PCI domain sequence: probe, size, place, commit, partition.

use crate::FatalError;
use crate::acpi::TopOfMemory;
use crate::config::NorthbridgeConfig;
use crate::config_space::ConfigSpace;
use crate::config_space::Function;
use crate::cpu;
use crate::cpu::CpuInputs;
use crate::cpu::ProcessorEntry;
use crate::dram;
use crate::pairs::PairExhausted;
use crate::pairs::PairTable;
use crate::partition;
use crate::partition::MemoryMap;
use crate::partition::PartitionParams;
use crate::partition::ReservedKind;
use crate::topology::Topology;
use crate::topology::WindowKind;
use crate::topology::WindowState;
use crate::window;
use crate::window::WindowPlacer;
use alloc::vec::Vec;
use memory_range::MemoryRange;
use northbridge_defs::f1;

/// Address map state for one boot.
///
/// Holds the config space exclusively: nothing else can write the
/// replicated address map registers while a `Domain` exists.
pub struct Domain<'a, C: ConfigSpace> {
    cfg: &'a mut C,
    config: NorthbridgeConfig,
    topology: Topology,
    pairs: PairTable,
    exhausted: Vec<PairExhausted>,
    tolm: Option<u64>,
    primary_vga_bus: Option<u8>,
}

impl<'a, C: ConfigSpace> Domain<'a, C> {
    /// Probes the interconnect and recovers register pairs earlier boot
    /// stages left enabled.
    pub fn probe(cfg: &'a mut C, config: NorthbridgeConfig) -> Result<Self, FatalError> {
        let topology = Topology::probe(&*cfg, &config)?;
        let mut pairs = PairTable::new();
        let nodes: Vec<u8> = topology
            .nodes()
            .iter()
            .take(topology.responsive_nodes().into())
            .filter(|n| n.function(Function::AddressMap).is_some())
            .map(|n| n.id)
            .collect();
        pairs.probe_existing_pairs(&*cfg, nodes);

        Ok(Self {
            cfg,
            config,
            topology,
            pairs,
            exhausted: Vec::new(),
            tolm: None,
            primary_vga_bus: None,
        })
    }

    /// The discovered topology.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// The discovered topology, for the bus probe to add links and children.
    pub fn topology_mut(&mut self) -> &mut Topology {
        &mut self.topology
    }

    /// The register pair table.
    pub fn pairs(&self) -> &PairTable {
        &self.pairs
    }

    /// Window requests that found no free register pair.
    pub fn exhausted(&self) -> &[PairExhausted] {
        &self.exhausted
    }

    /// Top of low memory, once windows are placed.
    pub fn tolm(&self) -> Option<u64> {
        self.tolm
    }

    /// Records the secondary bus of the primary VGA device.
    pub fn set_primary_vga_bus(&mut self, bus: u8) {
        self.primary_vga_bus = Some(bus);
    }

    /// Reserves a register pair and sizes a window of every kind for each
    /// link with children.
    ///
    /// A kind with no free pair is skipped for that link; the children get
    /// no address space of that kind.
    pub fn read_resources(&mut self) {
        let node_count = self.topology.node_count().into();
        for node in self.topology.nodes_mut().iter_mut().take(node_count) {
            let node_id = node.id;
            for link in node.links_mut() {
                if !link.has_children() {
                    continue;
                }
                for kind in WindowKind::ALL {
                    if let Some(window) = link.window(kind) {
                        if window.state != WindowState::Requested {
                            continue;
                        }
                    }
                    match self.pairs.find_pair(node_id, link.link_num(), kind) {
                        Ok(slot) => {
                            let window = window::size_window(slot, kind, &link.children);
                            tracing::debug!(
                                node = node_id,
                                link = link.link_num(),
                                ?kind,
                                size = window.size,
                                align = window.align,
                                "window request"
                            );
                            link.set_window(window);
                        }
                        Err(err) => {
                            tracing::warn!(
                                error = &err as &dyn core::error::Error,
                                ?kind,
                                "link left without address space"
                            );
                            self.exhausted.push(err);
                        }
                    }
                }
            }
        }
    }

    /// Places every requested window and hands out child ranges.
    ///
    /// Returns the top of low memory.
    pub fn assign_resources(&mut self) -> u64 {
        let mut windows = Vec::new();
        for node in self.topology.nodes() {
            for link in node.links() {
                for window in link.windows() {
                    if window.state == WindowState::Requested {
                        windows.push((node.id, link.link_num(), window.clone()));
                    }
                }
            }
        }
        window::placement_order(&mut windows);

        let mut placer = WindowPlacer::new(self.config.io_base, self.config.mmio_top());
        for (node, link_num, mut window) in windows {
            if !placer.place(&mut window) {
                if window.size != 0 {
                    tracing::warn!(
                        node,
                        link = link_num,
                        kind = ?window.kind,
                        size = window.size,
                        "window does not fit"
                    );
                }
                continue;
            }
            tracing::debug!(
                node,
                link = link_num,
                kind = ?window.kind,
                range = %window.range(),
                "placed window"
            );
            if let Some(link) = self.topology.link_mut(node, link_num) {
                window::assign_children(&mut link.children, &window);
                link.set_window(window);
            }
        }

        let tolm = placer.tolm(self.config.mmconf_base);
        tracing::info!(tolm, "top of low memory");
        self.tolm = Some(tolm);
        tolm
    }

    /// Programs VGA routing and stores every placed window in the
    /// replicated register pairs.
    pub fn set_resources(&mut self) {
        self.route_vga();

        let targets: Vec<u8> = self
            .topology
            .active_nodes()
            .filter(|n| n.function(Function::AddressMap).is_some())
            .map(|n| n.id)
            .collect();

        let node_count = self.topology.node_count().into();
        for node in self.topology.nodes_mut().iter_mut().take(node_count) {
            let node_id = node.id;
            for link in node.links_mut() {
                let link_num = link.link_num();
                for kind in WindowKind::ALL {
                    let Some(window) = link.window_mut(kind) else {
                        continue;
                    };
                    if window.state != WindowState::Assigned {
                        continue;
                    }
                    self.pairs.commit(
                        &mut *self.cfg,
                        targets.iter().copied(),
                        window.slot,
                        node_id,
                        link_num,
                        window.range(),
                    );
                    window.state = WindowState::Stored;
                }
            }
        }
    }

    fn route_vga(&mut self) {
        let primary_bus = self.primary_vga_bus;
        let multiple_vga = self.config.multiple_vga;
        let found = self.topology.active_nodes().find_map(|node| {
            node.links()
                .iter()
                .find(|link| {
                    link.vga
                        && (!multiple_vga
                            || primary_bus.is_some_and(|bus| {
                                (link.secondary_bus..=link.subordinate_bus).contains(&bus)
                            }))
                })
                .map(|link| (node.id, link.link_num()))
        });
        let Some((node, link)) = found else {
            return;
        };

        // Legacy VGA is always decoded on the southbridge link.
        let sb_link = self.topology.sb_link();
        tracing::info!(node, link, sb_link, "routing vga");
        let value = f1::VgaEnable::new()
            .with_enable(true)
            .with_dst_node(node)
            .with_dst_link(sb_link);
        for target in self
            .topology
            .nodes()
            .iter()
            .take(self.topology.responsive_nodes().into())
        {
            if target
                .function(Function::AddressMap)
                .is_some_and(|h| h.enabled)
            {
                self.cfg
                    .write_u32(target.id, Function::AddressMap, f1::VGA_ENABLE, value.into());
            }
        }
    }

    /// Builds the final memory map.
    ///
    /// `top_mem2` is the end of DRAM remapped above 4 GiB. `uma` is the
    /// integrated graphics carve-out reported by DRAM init, if any.
    pub fn partition_memory(&self, top_mem2: u64, uma: Option<MemoryRange>) -> MemoryMap {
        let tolm = self.tolm.unwrap_or(self.config.mmconf_base);
        let hole = if self.config.hw_mem_hole {
            dram::find_memory_hole(&*self.cfg, &self.topology)
        } else {
            None
        };
        let extents = dram::dram_extents(&self.topology);
        let mut map = partition::partition_memory(
            &extents,
            &PartitionParams {
                tolm,
                hole,
                top_mem2,
            },
        );

        map.add_reserved(ReservedKind::Mmconf, self.config.mmconf_range());
        if let Some(uma) = uma {
            if uma.end() <= tolm {
                map.add_reserved(ReservedKind::Uma, uma);
            } else {
                tracing::warn!(%uma, tolm, "uma region not below top of low memory");
            }
        }
        map
    }

    /// The ACPI top-of-memory values for `map`.
    pub fn top_of_memory(&self, map: &MemoryMap, top_mem2: u64) -> TopOfMemory {
        TopOfMemory::new(map.top_of_memory_below_4g(), top_mem2)
    }

    /// Enumerates processors and assigns APIC ids.
    pub fn scan_cpus(&self, inputs: &CpuInputs) -> Result<Vec<ProcessorEntry>, FatalError> {
        cpu::scan_cpus(&*self.cfg, &self.topology, inputs)
    }
}
