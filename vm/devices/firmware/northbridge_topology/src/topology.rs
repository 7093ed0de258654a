// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The discovered node/link tree.

use crate::FatalError;
use crate::config::NorthbridgeConfig;
use crate::config_space::ConfigSpace;
use crate::config_space::Function;
use crate::config_space::FunctionHandle;
use crate::pairs::PairSlot;
use alloc::vec::Vec;
use arrayvec::ArrayVec;
use memory_range::MemoryRange;
use northbridge_defs::f0;
use northbridge_defs::f1;
use northbridge_defs::f1::DramAddressWord;

/// Maximum number of nodes the interconnect can address.
pub const MAX_NODES: usize = 8;

/// Number of links every present node is normalized to.
pub const LINKS_PER_NODE: u8 = 4;

/// Number of link numbers a register pair can route to.
pub const MAX_LINKS: u8 = 8;

/// The kind of address window a link requests.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum WindowKind {
    /// I/O port space.
    Io,
    /// Prefetchable memory.
    PrefetchableMemory,
    /// Non-prefetchable memory.
    Memory,
}

impl WindowKind {
    /// All kinds, in the order windows are requested.
    pub const ALL: [WindowKind; 3] = [
        WindowKind::Io,
        WindowKind::PrefetchableMemory,
        WindowKind::Memory,
    ];

    const fn index(self) -> usize {
        match self {
            WindowKind::Io => 0,
            WindowKind::PrefetchableMemory => 1,
            WindowKind::Memory => 2,
        }
    }

    /// Returns true for the two memory kinds.
    pub const fn is_memory(self) -> bool {
        !matches!(self, WindowKind::Io)
    }
}

/// One address space request of a device behind a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildResource {
    /// The window this request is satisfied from.
    pub kind: WindowKind,
    /// Size in bytes.
    pub size: u64,
    /// Required alignment in bytes, a power of two.
    pub align: u64,
    /// The range handed to the device, once the link window is placed.
    pub assigned: Option<MemoryRange>,
}

impl ChildResource {
    /// Returns a new unassigned request.
    ///
    /// `align` is raised to at least 1 and rounded to a power of two.
    pub fn new(kind: WindowKind, size: u64, align: u64) -> Self {
        Self {
            kind,
            size,
            align: align.max(1).next_power_of_two(),
            assigned: None,
        }
    }
}

/// A device discovered behind a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildDevice {
    /// Bus number the device was found on.
    pub bus: u8,
    /// Device/function number.
    pub devfn: u8,
    /// Address space requests.
    pub resources: Vec<ChildResource>,
}

/// Lifecycle of a link window.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WindowState {
    /// Requested but not yet placed.
    Requested,
    /// Placed in the address space.
    Assigned,
    /// Written to the register pair.
    Stored,
}

/// An address window requested by a link, backed by a register pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    /// Register pair reserved for this window.
    pub slot: PairSlot,
    /// Window kind.
    pub kind: WindowKind,
    /// Base address, valid once assigned.
    pub base: u64,
    /// Size in bytes.
    pub size: u64,
    /// Minimum alignment in bytes.
    pub align: u64,
    /// Size granularity in bytes.
    pub granularity: u64,
    /// Highest address the window may reach.
    pub limit: u64,
    /// Lifecycle state.
    pub state: WindowState,
}

impl Window {
    /// The window's address range.
    pub fn range(&self) -> MemoryRange {
        MemoryRange::from_base_len(self.base, self.size)
    }

    /// Returns true once the window has a base address.
    pub fn is_assigned(&self) -> bool {
        self.state != WindowState::Requested
    }
}

/// A bridged connection from a node to downstream devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    link_num: u8,
    /// First bus number behind the link.
    pub secondary_bus: u8,
    /// Last bus number behind the link.
    pub subordinate_bus: u8,
    /// VGA enable is set in the link's bridge control.
    pub vga: bool,
    /// Devices discovered behind the link.
    pub children: Vec<ChildDevice>,
    windows: [Option<Window>; 3],
}

impl Link {
    /// Returns an empty link.
    ///
    /// A link only joins a node through [`Node::insert_link`], which
    /// rejects link numbers of [`MAX_LINKS`] and above.
    pub fn new(link_num: u8) -> Self {
        Self {
            link_num,
            secondary_bus: 0,
            subordinate_bus: 0,
            vga: false,
            children: Vec::new(),
            windows: [None, None, None],
        }
    }

    /// Adds a device discovered behind this link.
    pub fn add_child(&mut self, child: ChildDevice) {
        self.children.push(child);
    }

    /// Link number within the node.
    pub fn link_num(&self) -> u8 {
        self.link_num
    }

    /// Returns true if any devices were discovered behind the link.
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// The window of the given kind, if one was requested.
    pub fn window(&self, kind: WindowKind) -> Option<&Window> {
        self.windows[kind.index()].as_ref()
    }

    /// The window of the given kind, if one was requested.
    pub fn window_mut(&mut self, kind: WindowKind) -> Option<&mut Window> {
        self.windows[kind.index()].as_mut()
    }

    /// Records a window request.
    pub fn set_window(&mut self, window: Window) {
        let index = window.kind.index();
        self.windows[index] = Some(window);
    }

    /// All requested windows.
    pub fn windows(&self) -> impl Iterator<Item = &Window> {
        self.windows.iter().flatten()
    }
}

/// One interconnect endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Node id.
    pub id: u8,
    /// Packed DRAM base word.
    pub dram_base: DramAddressWord,
    /// Packed DRAM limit word. Bit 0 is the node's DRAM enable.
    pub dram_mask: DramAddressWord,
    functions: [Option<FunctionHandle>; Function::COUNT],
    links: Vec<Link>,
}

impl Node {
    fn new(id: u8) -> Self {
        Self {
            id,
            dram_base: DramAddressWord::new(),
            dram_mask: DramAddressWord::new(),
            functions: [None; Function::COUNT],
            links: Vec::new(),
        }
    }

    /// The handle for `function`, if it responded to the probe.
    pub fn function(&self, function: Function) -> Option<FunctionHandle> {
        self.functions[function.number() as usize]
    }

    /// The node's links, ordered by link number.
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// The node's links, ordered by link number.
    pub fn links_mut(&mut self) -> &mut [Link] {
        &mut self.links
    }

    /// The link numbered `link_num`.
    pub fn link(&self, link_num: u8) -> Option<&Link> {
        self.links.iter().find(|l| l.link_num == link_num)
    }

    /// The link numbered `link_num`.
    pub fn link_mut(&mut self, link_num: u8) -> Option<&mut Link> {
        self.links.iter_mut().find(|l| l.link_num == link_num)
    }

    /// Adds a discovered link, keeping the list ordered by link number.
    ///
    /// Replaces an existing link with the same number. Fails if the link
    /// number cannot be routed to by a register pair.
    pub fn insert_link(&mut self, link: Link) -> Result<(), FatalError> {
        if link.link_num >= MAX_LINKS {
            tracing::error!(node = self.id, link = link.link_num, "link number out of range");
            return Err(FatalError::LinkOutOfRange {
                node: self.id,
                link: link.link_num,
            });
        }
        match self.links.binary_search_by_key(&link.link_num, |l| l.link_num) {
            Ok(i) => self.links[i] = link,
            Err(i) => self.links.insert(i, link),
        }
        Ok(())
    }

    /// Extends the link list so that links `0..total` all exist.
    ///
    /// Existing links keep their identity and order; missing link numbers
    /// are filled with empty placeholders. Failure to obtain storage is
    /// fatal, since nothing downstream can run without the link list.
    pub fn ensure_link_count(&mut self, total: u8) -> Result<(), FatalError> {
        if total > MAX_LINKS {
            tracing::error!(node = self.id, total, "link count out of range");
            return Err(FatalError::LinkOutOfRange {
                node: self.id,
                link: total - 1,
            });
        }
        let missing = (0..total)
            .filter(|n| self.link(*n).is_none())
            .count();
        if missing == 0 {
            return Ok(());
        }

        if let Err(err) = self.links.try_reserve(missing) {
            tracing::error!(node = self.id, total, "couldn't allocate more links");
            return Err(FatalError::LinkStorage {
                node: self.id,
                requested: total,
                source: err,
            });
        }

        for link_num in 0..total {
            if self.link(link_num).is_none() {
                self.insert_link(Link::new(link_num))?;
            }
        }
        Ok(())
    }

    /// The node's DRAM range, or `None` if the node has no DRAM enabled.
    pub fn dram_range(&self) -> Option<MemoryRange> {
        if !self.dram_mask.enable() {
            return None;
        }
        // The limit names the last 128 MiB block, inclusive.
        let base = self.dram_base.address();
        let limit = (u64::from(self.dram_mask.addr_47_27()) + 1) << 27;
        MemoryRange::try_new(base..limit).ok()
    }
}

/// The discovered interconnect.
///
/// Built once by [`Topology::probe`]; the bus-probe collaborator then adds
/// links and children. DRAM extents and enable flags do not change after
/// probing.
#[derive(Debug, Clone)]
pub struct Topology {
    nodes: ArrayVec<Node, MAX_NODES>,
    node_count: u8,
    sb_link: u8,
    responsive_nodes: u8,
}

impl Topology {
    /// Probes the northbridge functions of every node and reads the system
    /// configuration.
    ///
    /// Fails if node 0's function 0 or 1 is missing, since no address map
    /// can be built without them.
    pub fn probe(
        cfg: &impl ConfigSpace,
        config: &NorthbridgeConfig,
    ) -> Result<Self, FatalError> {
        let max_nodes = config.max_nodes.min(MAX_NODES as u8);
        let mut nodes = ArrayVec::new();
        let mut responsive_nodes = 0;
        for id in 0..max_nodes {
            let mut node = Node::new(id);
            for function in Function::ALL {
                let handle = cfg.probe(id, function).map(|state| FunctionHandle {
                    node: id,
                    function,
                    enabled: state.enabled,
                });
                if let Some(handle) = &handle {
                    tracing::debug!(
                        node = id,
                        devfn = handle.devfn(),
                        enabled = handle.enabled,
                        "found northbridge function"
                    );
                }
                node.functions[function.number() as usize] = handle;
            }
            if node.function(Function::Ht).is_some() && node.function(Function::AddressMap).is_some()
            {
                responsive_nodes = id + 1;
            }
            nodes.push(node);
        }

        let host_bridge_present = nodes.first().is_some_and(|n: &Node| {
            n.function(Function::Ht).is_some() && n.function(Function::AddressMap).is_some()
        });
        if !host_bridge_present || responsive_nodes == 0 {
            tracing::error!(
                device = northbridge_defs::NODE_DEVICE_BASE,
                "cannot find node 0 northbridge functions 0 and 1"
            );
            return Err(FatalError::MissingHostBridge);
        }

        let node_id = f0::NodeId::from(cfg.read_u32(0, Function::Ht, f0::NODE_ID));
        let unit_id = f0::UnitId::from(cfg.read_u32(0, Function::Ht, f0::UNIT_ID));
        let node_count = (node_id.node_cnt() + 1).min(max_nodes);
        let sb_link = unit_id.sb_link();

        // The DRAM map is replicated; node 0's copy describes every node.
        for node in nodes.iter_mut().take(node_count as usize) {
            let stride = u16::from(node.id) * f1::DRAM_PAIR_STRIDE;
            let read = |offset: u16| cfg.read_u32(0, Function::AddressMap, offset + stride);
            let base = f1::DramBase::from(read(f1::DRAM_BASE_LOW));
            let limit = f1::DramLimit::from(read(f1::DRAM_LIMIT_LOW));
            let base_high = f1::DramHigh::from(read(f1::DRAM_BASE_HIGH));
            let limit_high = f1::DramHigh::from(read(f1::DRAM_LIMIT_HIGH));
            node.dram_base = DramAddressWord::from_parts(base.base_39_24(), base_high.addr_47_40());
            node.dram_mask =
                DramAddressWord::from_parts(limit.limit_39_24(), limit_high.addr_47_40())
                    .with_enable(base.re());
        }

        for node in nodes.iter_mut() {
            if node.function(Function::Ht).is_some() {
                node.ensure_link_count(LINKS_PER_NODE)?;
            }
        }

        tracing::info!(node_count, sb_link, responsive_nodes, "probed interconnect");

        Ok(Self {
            nodes,
            node_count,
            sb_link,
            responsive_nodes,
        })
    }

    /// Number of nodes reported by the system configuration register.
    pub fn node_count(&self) -> u8 {
        self.node_count
    }

    /// Number of leading node slots whose functions 0 and 1 responded.
    pub fn responsive_nodes(&self) -> u8 {
        self.responsive_nodes
    }

    /// The link on node 0 connected to the southbridge.
    pub fn sb_link(&self) -> u8 {
        self.sb_link
    }

    /// All probed node slots, in ascending id order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// All probed node slots, in ascending id order.
    pub fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    /// Nodes reported by the system configuration register.
    pub fn active_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().take(self.node_count as usize)
    }

    /// The node with id `id`.
    pub fn node(&self, id: u8) -> Option<&Node> {
        self.nodes.get(id as usize)
    }

    /// The node with id `id`.
    pub fn node_mut(&mut self, id: u8) -> Option<&mut Node> {
        self.nodes.get_mut(id as usize)
    }

    /// The link `link_num` of node `node`.
    pub fn link_mut(&mut self, node: u8, link_num: u8) -> Option<&mut Link> {
        self.node_mut(node)?.link_mut(link_num)
    }

    /// Extends node `node`'s link list to `total` links.
    ///
    /// A node id outside the probed range is ignored.
    pub fn ensure_link_count(&mut self, node: u8, total: u8) -> Result<(), FatalError> {
        match self.node_mut(node) {
            Some(node) => node.ensure_link_count(total),
            None => Ok(()),
        }
    }
}
