// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The replicated address-map register pairs.
//!
//! Function 1 of every node carries the same table of base/limit register
//! pairs, each routing one I/O or MMIO window to a (node, link). The table
//! is system wide: a pair used by one node's link is unavailable to every
//! other link, and a commit writes the pair on every node.

use crate::config_space::ConfigSpace;
use crate::config_space::Function;
use crate::topology::WindowKind;
use memory_range::MemoryRange;
use northbridge_defs::f1;
use thiserror::Error;

/// The register range a pair lives in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum RegisterClass {
    /// I/O base/limit pairs.
    Io,
    /// Memory-mapped I/O base/limit pairs.
    Mmio,
}

impl RegisterClass {
    const fn first(self) -> u16 {
        match self {
            RegisterClass::Io => f1::IO_PAIR_FIRST,
            RegisterClass::Mmio => f1::MMIO_PAIR_FIRST,
        }
    }

    /// Number of pairs in the range.
    pub const fn capacity(self) -> usize {
        match self {
            RegisterClass::Io => f1::IO_PAIR_COUNT,
            RegisterClass::Mmio => f1::MMIO_PAIR_COUNT,
        }
    }
}

impl From<WindowKind> for RegisterClass {
    fn from(kind: WindowKind) -> Self {
        match kind {
            WindowKind::Io => RegisterClass::Io,
            WindowKind::PrefetchableMemory | WindowKind::Memory => RegisterClass::Mmio,
        }
    }
}

/// A register pair.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PairSlot {
    class: RegisterClass,
    index: u8,
}

impl PairSlot {
    /// The register class.
    pub fn class(&self) -> RegisterClass {
        self.class
    }

    /// Offset of the base register.
    pub fn base_offset(&self) -> u16 {
        self.class.first() + u16::from(self.index) * f1::PAIR_STRIDE
    }

    /// Offset of the limit register.
    pub fn limit_offset(&self) -> u16 {
        self.base_offset() + f1::PAIR_LIMIT_OFFSET
    }
}

/// The owner of an allocated pair.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PairOwner {
    /// Destination node.
    pub node: u8,
    /// Destination link.
    pub link: u8,
    /// Window the pair backs. `None` for a pair recovered from hardware,
    /// which its (node, link) may claim for any window of the class.
    pub kind: Option<WindowKind>,
}

/// No register pair of the requested class is free.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("no free {class:?} register pair for node {node} link {link}")]
pub struct PairExhausted {
    /// The exhausted class.
    pub class: RegisterClass,
    /// Requesting node.
    pub node: u8,
    /// Requesting link.
    pub link: u8,
}

/// Allocation state of the replicated register-pair table.
#[derive(Debug, Clone, Default)]
pub struct PairTable {
    io: [Option<PairOwner>; f1::IO_PAIR_COUNT],
    mmio: [Option<PairOwner>; f1::MMIO_PAIR_COUNT],
}

impl PairTable {
    /// Returns a table with every pair free.
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self, class: RegisterClass) -> &[Option<PairOwner>] {
        match class {
            RegisterClass::Io => &self.io,
            RegisterClass::Mmio => &self.mmio,
        }
    }

    fn slots_mut(&mut self, class: RegisterClass) -> &mut [Option<PairOwner>] {
        match class {
            RegisterClass::Io => &mut self.io,
            RegisterClass::Mmio => &mut self.mmio,
        }
    }

    /// The owner of `slot`, if it is allocated.
    pub fn owner(&self, slot: PairSlot) -> Option<PairOwner> {
        self.slots(slot.class)[slot.index as usize]
    }

    /// Number of free pairs of `class`.
    pub fn free_count(&self, class: RegisterClass) -> usize {
        self.slots(class).iter().filter(|s| s.is_none()).count()
    }

    /// Recovers the pairs earlier boot stages already enabled.
    ///
    /// Reads the function 1 copy of each node in `nodes`. A pair whose base
    /// register has read or write enable set is marked as owned by the
    /// (node, link) its limit register routes to.
    pub fn probe_existing_pairs(
        &mut self,
        cfg: &impl ConfigSpace,
        nodes: impl IntoIterator<Item = u8>,
    ) {
        for node in nodes {
            for class in [RegisterClass::Io, RegisterClass::Mmio] {
                for index in 0..class.capacity() as u8 {
                    let slot = PairSlot { class, index };
                    if self.owner(slot).is_some() {
                        continue;
                    }
                    let base = cfg.read_u32(node, Function::AddressMap, slot.base_offset());
                    let limit = cfg.read_u32(node, Function::AddressMap, slot.limit_offset());
                    let owner = match class {
                        RegisterClass::Io => {
                            let base = f1::IoBase::from(base);
                            let limit = f1::IoLimit::from(limit);
                            (base.re() || base.we()).then(|| PairOwner {
                                node: limit.dst_node() | limit.dst_node_hi() << 4,
                                link: limit.dst_link(),
                                kind: None,
                            })
                        }
                        RegisterClass::Mmio => {
                            let base = f1::MmioBase::from(base);
                            let limit = f1::MmioLimit::from(limit);
                            (base.re() || base.we()).then(|| PairOwner {
                                node: limit.dst_node() | base.dst_node_hi() << 4,
                                link: limit.dst_link(),
                                kind: None,
                            })
                        }
                    };
                    if let Some(owner) = owner {
                        tracing::debug!(
                            offset = slot.base_offset(),
                            node = owner.node,
                            link = owner.link,
                            "recovered register pair"
                        );
                        self.slots_mut(class)[index as usize] = Some(owner);
                    }
                }
            }
        }
    }

    /// Finds the pair backing `kind` on (`node`, `link`), allocating one if
    /// needed.
    ///
    /// A pair the caller already owns is returned again, so repeated calls
    /// never consume a second pair. Otherwise a pair recovered for
    /// (`node`, `link`) is claimed, then the first free pair in ascending
    /// offset order. Pairs owned by anyone else are never touched.
    pub fn find_pair(
        &mut self,
        node: u8,
        link: u8,
        kind: WindowKind,
    ) -> Result<PairSlot, PairExhausted> {
        let class = RegisterClass::from(kind);
        let slots = self.slots_mut(class);
        let owned_by = |k: Option<WindowKind>| {
            move |s: &Option<PairOwner>| {
                s.is_some_and(|o| o.node == node && o.link == link && o.kind == k)
            }
        };

        let index = if let Some(i) = slots.iter().position(owned_by(Some(kind))) {
            tracing::debug!(node, link, ?kind, index = i, "reusing register pair");
            i
        } else if let Some(i) = slots
            .iter()
            .position(owned_by(None))
            .or_else(|| slots.iter().position(|s| s.is_none()))
        {
            slots[i] = Some(PairOwner {
                node,
                link,
                kind: Some(kind),
            });
            tracing::debug!(node, link, ?kind, index = i, "allocated register pair");
            i
        } else {
            return Err(PairExhausted { class, node, link });
        };

        Ok(PairSlot {
            class,
            index: index as u8,
        })
    }

    /// Routes `range` to (`node`, `link`) through `slot`.
    ///
    /// The limit register is written before the base register, on every
    /// node in `targets`, so that no node ever sees an enabled pair with a
    /// stale limit.
    pub fn commit(
        &self,
        cfg: &mut impl ConfigSpace,
        targets: impl IntoIterator<Item = u8> + Clone,
        slot: PairSlot,
        node: u8,
        link: u8,
        range: MemoryRange,
    ) {
        let (base, limit) = encode_pair(slot.class, node, link, range);
        tracing::debug!(
            offset = slot.base_offset(),
            node,
            link,
            %range,
            base,
            limit,
            "storing register pair"
        );
        for target in targets.clone() {
            cfg.write_u32(target, Function::AddressMap, slot.limit_offset(), limit);
        }
        for target in targets {
            cfg.write_u32(target, Function::AddressMap, slot.base_offset(), base);
        }
    }
}

/// Returns the (base, limit) register values routing `range` to
/// (`node`, `link`).
pub fn encode_pair(
    class: RegisterClass,
    node: u8,
    link: u8,
    range: MemoryRange,
) -> (u32, u32) {
    let min = range.start();
    let max = range.last().unwrap_or(min);
    match class {
        RegisterClass::Io => {
            // Only address bits [15:12] are decoded for port I/O.
            let limit = f1::IoLimit::new()
                .with_dst_node(node & 0xf)
                .with_dst_link(link)
                .with_dst_node_hi((node >> 4) & 3)
                .with_limit_24_12(((max >> 12) & 0xf) as u16);
            let base = f1::IoBase::new()
                .with_re(true)
                .with_we(true)
                .with_base_24_12(((min >> 12) & 0xf) as u16);
            (base.into(), limit.into())
        }
        RegisterClass::Mmio => {
            let limit = f1::MmioLimit::new()
                .with_dst_node(node & 0xf)
                .with_dst_link(link)
                .with_limit_39_16(((max >> 16) & 0xff_ffff) as u32);
            let base = f1::MmioBase::new()
                .with_re(true)
                .with_we(true)
                .with_dst_node_hi((node >> 4) & 3)
                .with_base_39_16(((min >> 16) & 0xff_ffff) as u32);
            (base.into(), limit.into())
        }
    }
}
