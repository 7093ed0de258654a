// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Register definitions for the per-node northbridge functions of a
//! point-to-point (HyperTransport style) processor interconnect.
//!
//! Each interconnect node exposes its northbridge as a multi-function PCI
//! device at device number [`NODE_DEVICE_BASE`] + node id on bus 0. The
//! address map registers in function 1 are replicated: every node holds an
//! identical copy, and firmware must write all copies.
//!
//! Field layouts are expressed with explicit bit positions; nothing here
//! relies on struct layout reinterpretation.

#![no_std]
#![forbid(unsafe_code)]

/// PCI device number of node 0's northbridge on bus 0.
pub const NODE_DEVICE_BASE: u8 = 0x18;

/// Function 0: link configuration and system configuration.
pub mod f0 {
    use bitfield_struct::bitfield;

    /// Node ID register offset.
    pub const NODE_ID: u16 = 0x60;
    /// Unit ID register offset.
    pub const UNIT_ID: u16 = 0x64;

    /// Node ID register (F0x60).
    #[bitfield(u32)]
    #[derive(PartialEq, Eq)]
    pub struct NodeId {
        /// This node's id.
        #[bits(3)]
        pub node_id: u8,
        #[bits(1)]
        _reserved: u8,
        /// Number of nodes in the system, minus one.
        #[bits(3)]
        pub node_cnt: u8,
        #[bits(25)]
        _reserved2: u32,
    }

    /// Unit ID register (F0x64).
    #[bitfield(u32)]
    #[derive(PartialEq, Eq)]
    pub struct UnitId {
        #[bits(8)]
        _reserved: u8,
        /// Link number of the link connected to the southbridge.
        #[bits(3)]
        pub sb_link: u8,
        #[bits(21)]
        _reserved2: u32,
    }
}

/// Function 1: address map.
pub mod f1 {
    use bitfield_struct::bitfield;
    use static_assertions::const_assert_eq;

    /// DRAM base (low) for node 0. Node `n` is at `+ n * DRAM_PAIR_STRIDE`.
    pub const DRAM_BASE_LOW: u16 = 0x40;
    /// DRAM limit (low) for node 0.
    pub const DRAM_LIMIT_LOW: u16 = 0x44;
    /// DRAM base (high byte) for node 0.
    pub const DRAM_BASE_HIGH: u16 = 0x140;
    /// DRAM limit (high byte) for node 0.
    pub const DRAM_LIMIT_HIGH: u16 = 0x144;
    /// Distance between consecutive nodes' DRAM register pairs.
    pub const DRAM_PAIR_STRIDE: u16 = 8;

    /// First memory-mapped I/O base/limit pair.
    pub const MMIO_PAIR_FIRST: u16 = 0x80;
    /// Last memory-mapped I/O base/limit pair.
    pub const MMIO_PAIR_LAST: u16 = 0xB8;
    /// First I/O base/limit pair.
    pub const IO_PAIR_FIRST: u16 = 0xC0;
    /// Last I/O base/limit pair.
    pub const IO_PAIR_LAST: u16 = 0xD8;
    /// Distance between consecutive base/limit pairs.
    pub const PAIR_STRIDE: u16 = 8;
    /// Offset of the limit register relative to its base register.
    pub const PAIR_LIMIT_OFFSET: u16 = 4;

    /// Number of memory-mapped I/O pairs.
    pub const MMIO_PAIR_COUNT: usize = ((MMIO_PAIR_LAST - MMIO_PAIR_FIRST) / PAIR_STRIDE + 1) as usize;
    /// Number of I/O pairs.
    pub const IO_PAIR_COUNT: usize = ((IO_PAIR_LAST - IO_PAIR_FIRST) / PAIR_STRIDE + 1) as usize;

    const_assert_eq!(MMIO_PAIR_COUNT, 8);
    const_assert_eq!(IO_PAIR_COUNT, 4);
    // The I/O pairs directly follow the memory pairs.
    const_assert_eq!(MMIO_PAIR_LAST + PAIR_STRIDE, IO_PAIR_FIRST);

    /// DRAM hole address register.
    pub const DRAM_HOLE: u16 = 0xF0;
    /// VGA enable register.
    pub const VGA_ENABLE: u16 = 0xF4;

    /// DRAM base register, low part (F1x40 + 8n).
    #[bitfield(u32)]
    #[derive(PartialEq, Eq)]
    pub struct DramBase {
        /// Read enable.
        pub re: bool,
        /// Write enable.
        pub we: bool,
        #[bits(6)]
        _reserved: u8,
        /// Node interleave enable.
        #[bits(3)]
        pub intlv_en: u8,
        #[bits(5)]
        _reserved2: u8,
        /// Address bits `[39:24]`.
        #[bits(16)]
        pub base_39_24: u16,
    }

    /// DRAM limit register, low part (F1x44 + 8n).
    ///
    /// The limit is inclusive: address bits `[23:0]` are implied ones.
    #[bitfield(u32)]
    #[derive(PartialEq, Eq)]
    pub struct DramLimit {
        /// Node that owns the range.
        #[bits(3)]
        pub dst_node: u8,
        #[bits(5)]
        _reserved: u8,
        /// Node interleave select.
        #[bits(3)]
        pub intlv_sel: u8,
        #[bits(5)]
        _reserved2: u8,
        /// Address bits `[39:24]`.
        #[bits(16)]
        pub limit_39_24: u16,
    }

    /// DRAM base or limit register, high part (F1x140/F1x144 + 8n).
    #[bitfield(u32)]
    #[derive(PartialEq, Eq)]
    pub struct DramHigh {
        /// Address bits `[47:40]`.
        pub addr_47_40: u8,
        #[bits(24)]
        _reserved: u32,
    }

    /// DRAM hole address register (F1xF0).
    #[bitfield(u32)]
    #[derive(PartialEq, Eq)]
    pub struct DramHole {
        /// The hole is valid.
        pub valid: bool,
        #[bits(6)]
        _reserved: u8,
        /// Offset applied to addresses hoisted above 4 GiB.
        #[bits(9)]
        pub hole_offset: u16,
        #[bits(8)]
        _reserved2: u8,
        /// Hole base address bits `[31:24]`.
        pub hole_base: u8,
    }

    impl DramHole {
        /// The byte address where the hole starts.
        pub fn base_address(&self) -> u64 {
            u64::from(self.hole_base()) << 24
        }
    }

    /// Memory-mapped I/O base register (F1x80 + 8n).
    #[bitfield(u32)]
    #[derive(PartialEq, Eq)]
    pub struct MmioBase {
        /// Read enable.
        pub re: bool,
        /// Write enable.
        pub we: bool,
        /// CPU access disable.
        pub cpu_dis: bool,
        /// Register lock.
        pub lock: bool,
        /// Destination node bits `[5:4]`.
        #[bits(2)]
        pub dst_node_hi: u8,
        #[bits(2)]
        _reserved: u8,
        /// Address bits `[39:16]`.
        #[bits(24)]
        pub base_39_16: u32,
    }

    /// Memory-mapped I/O limit register (F1x84 + 8n).
    #[bitfield(u32)]
    #[derive(PartialEq, Eq)]
    pub struct MmioLimit {
        /// Destination node bits `[3:0]`.
        #[bits(4)]
        pub dst_node: u8,
        /// Destination link.
        #[bits(3)]
        pub dst_link: u8,
        /// Non-posted.
        pub np: bool,
        /// Address bits `[39:16]`, inclusive.
        #[bits(24)]
        pub limit_39_16: u32,
    }

    /// I/O base register (F1xC0 + 8n).
    #[bitfield(u32)]
    #[derive(PartialEq, Eq)]
    pub struct IoBase {
        /// Read enable.
        pub re: bool,
        /// Write enable.
        pub we: bool,
        #[bits(2)]
        _reserved: u8,
        /// VGA enable.
        pub vga: bool,
        /// ISA enable.
        pub isa: bool,
        #[bits(6)]
        _reserved2: u8,
        /// Address bits `[24:12]`.
        #[bits(13)]
        pub base_24_12: u16,
        #[bits(7)]
        _reserved3: u8,
    }

    /// I/O limit register (F1xC4 + 8n).
    #[bitfield(u32)]
    #[derive(PartialEq, Eq)]
    pub struct IoLimit {
        /// Destination node bits `[3:0]`.
        #[bits(4)]
        pub dst_node: u8,
        /// Destination link.
        #[bits(3)]
        pub dst_link: u8,
        #[bits(1)]
        _reserved: u8,
        /// Destination node bits `[5:4]`.
        #[bits(2)]
        pub dst_node_hi: u8,
        #[bits(2)]
        _reserved2: u8,
        /// Address bits `[24:12]`, inclusive.
        #[bits(13)]
        pub limit_24_12: u16,
        #[bits(7)]
        _reserved3: u8,
    }

    /// VGA enable register (F1xF4).
    ///
    /// When enabled, routes MMIO `0xA0000..=0xBFFFF` and I/O `0x3B0..=0x3BB`,
    /// `0x3C0..=0x3DF` to the given node and link.
    #[bitfield(u32)]
    #[derive(PartialEq, Eq)]
    pub struct VgaEnable {
        /// Enable VGA routing.
        pub enable: bool,
        /// Non-posted.
        pub np: bool,
        /// CPU access disable.
        pub cpu_dis: bool,
        #[bits(1)]
        _reserved: u8,
        /// Destination node.
        #[bits(4)]
        pub dst_node: u8,
        #[bits(4)]
        _reserved2: u8,
        /// Destination link.
        #[bits(3)]
        pub dst_link: u8,
        #[bits(17)]
        _reserved3: u32,
    }

    /// Packed DRAM extent word used by the address map code.
    ///
    /// Carries address bits `[47:27]` at bits `[28:8]` plus an enable bit,
    /// combining a low DRAM register and its high byte into one value.
    #[bitfield(u32)]
    #[derive(PartialEq, Eq)]
    pub struct DramAddressWord {
        /// Range enabled.
        pub enable: bool,
        #[bits(7)]
        _reserved: u8,
        /// Address bits `[47:27]`.
        #[bits(21)]
        pub addr_47_27: u32,
        #[bits(3)]
        _reserved2: u8,
    }

    impl DramAddressWord {
        /// Combines address bits `[39:24]` with the high byte `[47:40]`.
        pub fn from_parts(addr_39_24: u16, addr_47_40: u8) -> Self {
            Self::new().with_addr_47_27(u32::from(addr_39_24 >> 3) | u32::from(addr_47_40) << 13)
        }

        /// The byte address of the 128 MiB block named by this word.
        pub fn address(&self) -> u64 {
            u64::from(self.addr_47_27()) << 27
        }
    }
}

/// Function 3: miscellaneous control.
pub mod f3 {
    use bitfield_struct::bitfield;

    /// Northbridge capabilities register offset.
    pub const NB_CAPABILITIES: u16 = 0xE8;

    /// Northbridge capabilities register (F3xE8), family 10h layout.
    #[bitfield(u32)]
    #[derive(PartialEq, Eq)]
    pub struct NbCapabilities {
        #[bits(12)]
        _reserved: u16,
        /// Core count minus one, bits `[1:0]`.
        #[bits(2)]
        pub cmp_cap: u8,
        #[bits(1)]
        _reserved2: u8,
        /// Core count minus one, bit 2.
        pub cmp_cap_ext: bool,
        #[bits(16)]
        _reserved3: u16,
    }

    impl NbCapabilities {
        /// Number of cores on the node beyond the first.
        pub fn siblings(&self) -> u8 {
            self.cmp_cap() | u8::from(self.cmp_cap_ext()) << 2
        }
    }
}

/// Function 5: extended northbridge.
pub mod f5 {
    use bitfield_struct::bitfield;

    /// Northbridge capabilities 2 register offset.
    pub const NB_CAPABILITIES_2: u16 = 0x84;

    /// Northbridge capabilities 2 register (F5x84), family 15h layout.
    #[bitfield(u32)]
    #[derive(PartialEq, Eq)]
    pub struct NbCapabilities2 {
        /// Core count minus one.
        pub cmp_cap: u8,
        #[bits(24)]
        _reserved: u32,
    }
}

/// CPUID leaves consumed by processor enumeration.
pub mod cpuid {
    use bitfield_struct::bitfield;

    /// Processor signature leaf.
    pub const LEAF_SIGNATURE: u32 = 0x0000_0001;
    /// Address size and core count leaf.
    pub const LEAF_ADDRESS_SIZES: u32 = 0x8000_0008;

    /// Leaf 1 EAX.
    #[bitfield(u32)]
    #[derive(PartialEq, Eq)]
    pub struct ProcessorSignature {
        /// Stepping.
        #[bits(4)]
        pub stepping: u8,
        /// Base model.
        #[bits(4)]
        pub base_model: u8,
        /// Base family.
        #[bits(4)]
        pub base_family: u8,
        #[bits(4)]
        _reserved: u8,
        /// Extended model.
        #[bits(4)]
        pub ext_model: u8,
        /// Extended family.
        pub ext_family: u8,
        #[bits(4)]
        _reserved2: u8,
    }

    /// Leaf 0x8000_0008 ECX.
    #[bitfield(u32)]
    #[derive(PartialEq, Eq)]
    pub struct CoreCountInfo {
        /// Number of populated cores minus one.
        pub nc: u8,
        #[bits(4)]
        _reserved: u8,
        /// Number of low APIC id bits that identify the core.
        #[bits(4)]
        pub apic_id_core_id_size: u8,
        /// Performance time-stamp counter size.
        #[bits(2)]
        pub perf_tsc_size: u8,
        #[bits(14)]
        _reserved2: u16,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mmio_layout() {
        let base = f1::MmioBase::new()
            .with_re(true)
            .with_we(true)
            .with_dst_node_hi(1)
            .with_base_39_16(0xe000);
        assert_eq!(u32::from(base), 3 | 0x10 | 0xe0_0000);

        let limit = f1::MmioLimit::from(0x00ef_ff25);
        assert_eq!(limit.dst_node(), 5);
        assert_eq!(limit.dst_link(), 2);
        assert_eq!(limit.limit_39_16(), 0xefff);
    }

    #[test]
    fn test_io_layout() {
        let limit = f1::IoLimit::new()
            .with_dst_node(2)
            .with_dst_link(1)
            .with_dst_node_hi(1)
            .with_limit_24_12(0xf);
        assert_eq!(u32::from(limit), 2 | (1 << 4) | (1 << 8) | 0xf000);
    }

    #[test]
    fn test_dram_word() {
        // 2 GiB - 1 in the low limit register.
        let word = f1::DramAddressWord::from_parts(0x7f, 0);
        assert_eq!(word.addr_47_27(), 0xf);
        assert_eq!(word.address(), 0x7800_0000);

        let word = f1::DramAddressWord::from_parts(0, 1).with_enable(true);
        assert_eq!(word.address(), 1 << 40);
        assert_eq!(u32::from(word) & 1, 1);
    }

    #[test]
    fn test_siblings() {
        assert_eq!(f3::NbCapabilities::from(0x3000).siblings(), 3);
        assert_eq!(f3::NbCapabilities::from(0xb000).siblings(), 7);
        assert_eq!(f3::NbCapabilities::from(0x8000).siblings(), 4);
    }

    #[test]
    fn test_cpuid() {
        // Family 15h: base family 0xf, extended family 6.
        let sig = cpuid::ProcessorSignature::from(0x0063_0f01);
        assert_eq!(sig.ext_family(), 6);
        assert_eq!(sig.base_family(), 0xf);

        let cores = cpuid::CoreCountInfo::from(0x0000_2003);
        assert_eq!(cores.nc(), 3);
        assert_eq!(cores.apic_id_core_id_size(), 2);
    }
}
