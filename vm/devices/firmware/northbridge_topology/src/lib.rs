// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Address map and processor topology for multi-node systems joined by a
//! point-to-point interconnect.
//!
//! Firmware runs this once on the bootstrap processor, before any other
//! core is released:
//!
//! 1. [`Domain::probe`] finds every node's northbridge functions, decodes
//!    the DRAM map and recovers register pairs earlier stages enabled.
//! 2. The bus probe adds child devices to the links in
//!    [`Domain::topology_mut`].
//! 3. [`Domain::read_resources`] reserves a register pair per link window
//!    and sizes it; [`Domain::assign_resources`] places the windows;
//!    [`Domain::set_resources`] writes them to every node.
//! 4. [`Domain::partition_memory`] turns the DRAM map into usable regions
//!    around the VGA window and the PCI hole.
//!
//! [`Domain::scan_cpus`] assigns local APIC ids independently of the
//! address map.
//!
//! Only the conditions listed in [`FatalError`] stop the sequence. Running
//! out of register pairs leaves the affected link without address space
//! and is reported through [`Domain::exhausted`].

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

pub mod acpi;
pub mod config;
pub mod config_space;
pub mod cpu;
mod domain;
pub mod dram;
pub mod oprom;
pub mod pairs;
pub mod partition;
pub mod topology;
pub mod window;

#[cfg(test)]
mod test_helpers;

pub use config::NorthbridgeConfig;
pub use config_space::ConfigSpace;
pub use domain::Domain;

use alloc::collections::TryReserveError;
use thiserror::Error;

/// A condition boot cannot continue past.
///
/// Hardware may already hold a partially written address map, so there is
/// nothing to roll back; the caller halts.
#[derive(Debug, Error)]
pub enum FatalError {
    /// Node 0's function 0 or 1 did not respond.
    #[error("cannot find node 0 northbridge functions 0 and 1")]
    MissingHostBridge,
    /// The link list of a node could not be extended.
    #[error("couldn't allocate {requested} links for node {node}")]
    LinkStorage {
        /// Node being extended.
        node: u8,
        /// Requested link count.
        requested: u8,
        /// The allocation failure.
        #[source]
        source: TryReserveError,
    },
    /// A link number does not fit the 3-bit destination link field of a
    /// register pair.
    #[error("link {link} on node {node} is out of range")]
    LinkOutOfRange {
        /// Node the link belongs to.
        node: u8,
        /// The offending link number.
        link: u8,
    },
    /// Two cores were assigned the same local APIC id.
    #[error("apic id {apic_id:#x} for node {node} core {core} is already in use")]
    DuplicateProcessorId {
        /// The conflicting id.
        apic_id: u32,
        /// Node of the second core.
        node: u8,
        /// Core index of the second core.
        core: u8,
    },
}
