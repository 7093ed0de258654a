// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Access to the per-node northbridge configuration functions.

use northbridge_defs::NODE_DEVICE_BASE;

/// One of the northbridge PCI functions every node exposes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Function {
    /// Link configuration and system configuration.
    Ht = 0,
    /// Address map.
    AddressMap = 1,
    /// DRAM controller.
    Dram = 2,
    /// Miscellaneous control.
    Misc = 3,
    /// Link control.
    Link = 4,
    /// Extended northbridge control.
    Extended = 5,
}

impl Function {
    /// Number of functions.
    pub const COUNT: usize = 6;

    /// All functions, in function-number order.
    pub const ALL: [Function; Self::COUNT] = [
        Function::Ht,
        Function::AddressMap,
        Function::Dram,
        Function::Misc,
        Function::Link,
        Function::Extended,
    ];

    /// The PCI function number.
    pub const fn number(self) -> u8 {
        self as u8
    }
}

/// State of a function that responded to a probe.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FunctionState {
    /// The device was enabled by earlier boot stages.
    pub enabled: bool,
}

/// A discovered northbridge function.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FunctionHandle {
    /// Owning node.
    pub node: u8,
    /// Function number.
    pub function: Function,
    /// Whether the function is enabled.
    pub enabled: bool,
}

impl FunctionHandle {
    /// The bus 0 device/function number of this handle.
    pub fn devfn(&self) -> u8 {
        ((NODE_DEVICE_BASE + self.node) << 3) | self.function.number()
    }
}

/// Configuration space access to the northbridge functions on bus 0.
///
/// Implemented by the bus-probe collaborator. All accesses are dword sized
/// and dword aligned.
pub trait ConfigSpace {
    /// Returns the state of `function` on `node`, or `None` if nothing
    /// responds there.
    fn probe(&self, node: u8, function: Function) -> Option<FunctionState>;

    /// Reads the dword at `offset`.
    fn read_u32(&self, node: u8, function: Function, offset: u16) -> u32;

    /// Writes the dword at `offset`.
    fn write_u32(&mut self, node: u8, function: Function, offset: u16, value: u32);
}

impl<T: ConfigSpace + ?Sized> ConfigSpace for &mut T {
    fn probe(&self, node: u8, function: Function) -> Option<FunctionState> {
        (**self).probe(node, function)
    }

    fn read_u32(&self, node: u8, function: Function, offset: u16) -> u32 {
        (**self).read_u32(node, function, offset)
    }

    fn write_u32(&mut self, node: u8, function: Function, offset: u16, value: u32) {
        (**self).write_u32(node, function, offset, value)
    }
}
