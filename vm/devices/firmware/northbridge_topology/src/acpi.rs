// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Top-of-memory values for the SSDT generator.

use memory_range::MB;

/// `TOM1` and `TOM2` as the `\_SB.PCI0` scope names carry them.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TopOfMemory {
    /// Top of DRAM below 4 GiB, in bytes.
    pub tom1: u32,
    /// Top of DRAM above 4 GiB, in 1 MiB units so it fits a dword.
    pub tom2: u32,
}

impl TopOfMemory {
    /// Builds the values from the byte addresses of both memory tops.
    ///
    /// `tom1` saturates at 4 GiB - 1.
    pub fn new(top_mem: u64, top_mem2: u64) -> Self {
        Self {
            tom1: u32::try_from(top_mem).unwrap_or(u32::MAX),
            tom2: u32::try_from(top_mem2 / MB).unwrap_or(u32::MAX),
        }
    }
}
