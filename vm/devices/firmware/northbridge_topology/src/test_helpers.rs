// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::config_space::ConfigSpace;
use crate::config_space::Function;
use crate::config_space::FunctionState;
use northbridge_defs::f0;
use northbridge_defs::f1;
use std::collections::BTreeMap;

/// Installs a subscriber that routes tracing output to the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigWrite {
    pub node: u8,
    pub function: Function,
    pub offset: u16,
    pub value: u32,
}

/// Register-backed northbridge functions for `node_count` nodes.
///
/// Every function of every node starts present and enabled, with the node
/// count programmed into node 0's function 0. Unset registers read as zero.
pub struct FakeConfigSpace {
    node_count: u8,
    functions: BTreeMap<(u8, Function), FunctionState>,
    registers: BTreeMap<(u8, Function, u16), u32>,
    writes: Vec<ConfigWrite>,
}

impl FakeConfigSpace {
    pub fn new(node_count: u8) -> Self {
        let mut functions = BTreeMap::new();
        for node in 0..node_count {
            for function in Function::ALL {
                functions.insert((node, function), FunctionState { enabled: true });
            }
        }
        let mut this = Self {
            node_count,
            functions,
            registers: BTreeMap::new(),
            writes: Vec::new(),
        };
        this.set(
            0,
            Function::Ht,
            f0::NODE_ID,
            f0::NodeId::new()
                .with_node_cnt(node_count.saturating_sub(1))
                .into(),
        );
        this
    }

    pub fn remove_function(&mut self, node: u8, function: Function) {
        self.functions.remove(&(node, function));
    }

    pub fn disable_function(&mut self, node: u8, function: Function) {
        self.functions
            .insert((node, function), FunctionState { enabled: false });
    }

    /// Sets a register without recording a write.
    pub fn set(&mut self, node: u8, function: Function, offset: u16, value: u32) {
        self.registers.insert((node, function, offset), value);
    }

    /// Sets a register on every node.
    pub fn set_all(&mut self, function: Function, offset: u16, value: u32) {
        for node in 0..self.node_count {
            self.set(node, function, offset, value);
        }
    }

    pub fn get(&self, node: u8, function: Function, offset: u16) -> u32 {
        self.registers
            .get(&(node, function, offset))
            .copied()
            .unwrap_or(0)
    }

    /// Programs `node`'s DRAM range `[base, end)` into every node's address
    /// map. Both ends must be 128 MiB aligned.
    pub fn set_dram(&mut self, node: u8, base: u64, end: u64) {
        let last = end - 1;
        let stride = u16::from(node) * f1::DRAM_PAIR_STRIDE;
        let base_low = f1::DramBase::new()
            .with_re(true)
            .with_we(true)
            .with_base_39_24((base >> 24) as u16);
        let limit_low = f1::DramLimit::new()
            .with_dst_node(node)
            .with_limit_39_24((last >> 24) as u16);
        let base_high = f1::DramHigh::new().with_addr_47_40((base >> 40) as u8);
        let limit_high = f1::DramHigh::new().with_addr_47_40((last >> 40) as u8);

        self.set_all(Function::AddressMap, f1::DRAM_BASE_LOW + stride, base_low.into());
        self.set_all(Function::AddressMap, f1::DRAM_LIMIT_LOW + stride, limit_low.into());
        self.set_all(Function::AddressMap, f1::DRAM_BASE_HIGH + stride, base_high.into());
        self.set_all(Function::AddressMap, f1::DRAM_LIMIT_HIGH + stride, limit_high.into());
    }

    /// Config writes issued through [`ConfigSpace`], in order.
    pub fn writes(&self) -> &[ConfigWrite] {
        &self.writes
    }
}

impl ConfigSpace for FakeConfigSpace {
    fn probe(&self, node: u8, function: Function) -> Option<FunctionState> {
        self.functions.get(&(node, function)).copied()
    }

    fn read_u32(&self, node: u8, function: Function, offset: u16) -> u32 {
        assert!(
            self.functions.contains_key(&(node, function)),
            "read from missing function {node}.{function:?}"
        );
        self.get(node, function, offset)
    }

    fn write_u32(&mut self, node: u8, function: Function, offset: u16, value: u32) {
        assert!(
            self.functions.contains_key(&(node, function)),
            "write to missing function {node}.{function:?}"
        );
        self.writes.push(ConfigWrite {
            node,
            function,
            offset,
            value,
        });
        self.set(node, function, offset, value);
    }
}
