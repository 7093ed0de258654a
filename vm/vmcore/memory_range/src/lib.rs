// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Half-open physical address ranges.
//!
//! Used for DRAM extents, link address windows, and the final memory map.
//! Unlike a `core::ops::Range<u64>`, a [`MemoryRange`] always satisfies
//! `start <= end`, is `Copy`, and formats as hex.

#![no_std]
#![forbid(unsafe_code)]

use core::fmt;
use core::ops::Range;
use thiserror::Error;

/// One KiB.
pub const KB: u64 = 1024;
/// One MiB.
pub const MB: u64 = 1024 * KB;
/// One GiB.
pub const GB: u64 = 1024 * MB;
/// The 4 GiB line.
pub const FOUR_GB: u64 = 4 * GB;

/// Error returned by [`MemoryRange::try_new`].
#[derive(Debug, Error)]
#[error("invalid memory range {start:#x}..{end:#x}")]
pub struct InvalidMemoryRange {
    start: u64,
    end: u64,
}

/// A half-open address range `[start, end)`.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MemoryRange {
    start: u64,
    end: u64,
}

impl MemoryRange {
    /// The empty range at address zero.
    pub const EMPTY: Self = Self { start: 0, end: 0 };

    /// Returns a new range.
    ///
    /// Panics if `range.start > range.end`.
    #[track_caller]
    pub const fn new(range: Range<u64>) -> Self {
        assert!(range.start <= range.end);
        Self {
            start: range.start,
            end: range.end,
        }
    }

    /// Returns a new range, or an error if `range.start > range.end`.
    pub const fn try_new(range: Range<u64>) -> Result<Self, InvalidMemoryRange> {
        if range.start > range.end {
            return Err(InvalidMemoryRange {
                start: range.start,
                end: range.end,
            });
        }
        Ok(Self {
            start: range.start,
            end: range.end,
        })
    }

    /// Returns the range `[base, base + len)`.
    ///
    /// Panics on overflow.
    #[track_caller]
    pub const fn from_base_len(base: u64, len: u64) -> Self {
        match base.checked_add(len) {
            Some(end) => Self { start: base, end },
            None => panic!("memory range overflows"),
        }
    }

    /// The first address in the range.
    pub const fn start(&self) -> u64 {
        self.start
    }

    /// The address just past the end of the range.
    pub const fn end(&self) -> u64 {
        self.end
    }

    /// The last address in the range, or `None` if it is empty.
    pub const fn last(&self) -> Option<u64> {
        if self.is_empty() {
            None
        } else {
            Some(self.end - 1)
        }
    }

    /// The length of the range in bytes.
    pub const fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Returns true if the range is empty.
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Returns true if `other` lies entirely within this range.
    pub const fn contains(&self, other: &Self) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Splits the range at `addr`, clamped to the range.
    pub fn split_at(&self, addr: u64) -> (Self, Self) {
        let mid = addr.clamp(self.start, self.end);
        (
            Self {
                start: self.start,
                end: mid,
            },
            Self {
                start: mid,
                end: self.end,
            },
        )
    }
}

impl fmt::Debug for MemoryRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}-{:#x}", self.start, self.end)
    }
}

impl fmt::Display for MemoryRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Rounds `value` down to a multiple of `align`, which must be a power of two.
pub const fn align_down(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    value & !(align - 1)
}

/// Rounds `value` up to a multiple of `align`, which must be a power of two.
///
/// Returns `None` on overflow.
pub const fn align_up(value: u64, align: u64) -> Option<u64> {
    debug_assert!(align.is_power_of_two());
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}
