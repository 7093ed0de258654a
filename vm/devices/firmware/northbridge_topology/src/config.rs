// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Build-time knobs, overridable from the boot command line.

use crate::topology::MAX_NODES;
use memory_range::MB;
use memory_range::MemoryRange;

/// Number of node slots probed for northbridge functions.
const MAX_NODES_ARG: &str = "NB_MAX_NODES=";

/// Memory hole detection.
///
/// * `on`: honor the hole register and infer a hole from gaps in the DRAM
///   map (default).
/// * `off`: ignore holes.
const HW_MEM_HOLE: &str = "NB_HW_MEM_HOLE=";

/// Base of the extended configuration space window.
const MMCONF_BASE: &str = "NB_MMCONF_BASE=";

/// Number of buses decoded by the extended configuration space window.
const MMCONF_BUSES: &str = "NB_MMCONF_BUSES=";

/// Lowest I/O port handed to link windows.
const IO_BASE: &str = "NB_IO_BASE=";

/// Link memory windows are placed downward from this address. Defaults to
/// the MMCONF base.
const MMIO_TOP: &str = "NB_MMIO_TOP=";

/// Route VGA only to the link the primary VGA device sits behind.
const MULTIPLE_VGA: &str = "NB_MULTIPLE_VGA=";

#[derive(Debug, PartialEq, Clone, Copy)]
#[expect(missing_docs)] // documented on the argument constants
pub struct NorthbridgeConfig {
    pub max_nodes: u8,
    pub hw_mem_hole: bool,
    pub mmconf_base: u64,
    pub mmconf_buses: u32,
    pub io_base: u64,
    pub mmio_top: Option<u64>,
    pub multiple_vga: bool,
}

impl NorthbridgeConfig {
    /// Returns the built-in defaults.
    pub const fn new() -> Self {
        NorthbridgeConfig {
            max_nodes: MAX_NODES as u8,
            hw_mem_hole: true,
            mmconf_base: 0xf800_0000,
            mmconf_buses: 64,
            io_base: 0x1000,
            mmio_top: None,
            multiple_vga: false,
        }
    }

    /// Where link memory window placement starts.
    pub fn mmio_top(&self) -> u64 {
        self.mmio_top.unwrap_or(self.mmconf_base)
    }

    /// The extended configuration space window.
    pub fn mmconf_range(&self) -> MemoryRange {
        MemoryRange::from_base_len(self.mmconf_base, u64::from(self.mmconf_buses) * MB)
    }

    /// Parse arguments from a command line.
    ///
    /// Unknown arguments are ignored. Malformed values are logged and leave
    /// the current setting in place.
    pub fn parse(&mut self, cmdline: &str) {
        for arg in cmdline.split_whitespace() {
            if let Some(value) = arg.strip_prefix(MAX_NODES_ARG) {
                match parse_number(value).and_then(|n| u8::try_from(n).ok()) {
                    Some(n) if (1..=MAX_NODES as u8).contains(&n) => self.max_nodes = n,
                    _ => tracing::warn!(value, "invalid NB_MAX_NODES"),
                }
            } else if let Some(value) = arg.strip_prefix(HW_MEM_HOLE) {
                match parse_switch(value) {
                    Some(on) => self.hw_mem_hole = on,
                    None => tracing::warn!(value, "invalid NB_HW_MEM_HOLE"),
                }
            } else if let Some(value) = arg.strip_prefix(MMCONF_BASE) {
                match parse_number(value) {
                    Some(base) if base % MB == 0 => self.mmconf_base = base,
                    _ => tracing::warn!(value, "invalid NB_MMCONF_BASE"),
                }
            } else if let Some(value) = arg.strip_prefix(MMCONF_BUSES) {
                match parse_number(value).and_then(|n| u32::try_from(n).ok()) {
                    Some(n) if (1..=256).contains(&n) => self.mmconf_buses = n,
                    _ => tracing::warn!(value, "invalid NB_MMCONF_BUSES"),
                }
            } else if let Some(value) = arg.strip_prefix(IO_BASE) {
                match parse_number(value) {
                    Some(base) if base <= 0xffff => self.io_base = base,
                    _ => tracing::warn!(value, "invalid NB_IO_BASE"),
                }
            } else if let Some(value) = arg.strip_prefix(MMIO_TOP) {
                match parse_number(value) {
                    Some(top) => self.mmio_top = Some(top),
                    None => tracing::warn!(value, "invalid NB_MMIO_TOP"),
                }
            } else if let Some(value) = arg.strip_prefix(MULTIPLE_VGA) {
                match parse_switch(value) {
                    Some(on) => self.multiple_vga = on,
                    None => tracing::warn!(value, "invalid NB_MULTIPLE_VGA"),
                }
            }
        }
    }
}

impl Default for NorthbridgeConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_number(value: &str) -> Option<u64> {
    let value = value.replace('_', "");
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

fn parse_switch(value: &str) -> Option<bool> {
    match value {
        "on" | "1" => Some(true),
        "off" | "0" => Some(false),
        _ => None,
    }
}
