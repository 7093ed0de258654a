// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Link window sizing and placement.

use crate::pairs::PairSlot;
use crate::topology::ChildDevice;
use crate::topology::ChildResource;
use crate::topology::Window;
use crate::topology::WindowKind;
use crate::topology::WindowState;
use alloc::vec::Vec;
use memory_range::KB;
use memory_range::MB;
use memory_range::MemoryRange;
use memory_range::align_down;
use memory_range::align_up;

/// Alignment and granularity of link I/O windows.
pub const IO_ALIGN: u64 = 4 * KB;
/// Alignment and granularity of link memory windows.
pub const MEM_ALIGN: u64 = MB;
/// Highest I/O port a link window may decode.
pub const IO_LIMIT: u64 = 0xffff;
/// Highest address a link memory window may decode.
pub const MEM_LIMIT: u64 = 0xff_ffff_ffff;
/// Memory windows are never placed in the legacy first megabyte.
pub const MEM_FLOOR: u64 = MB;

/// Returns a sized, unplaced window of `kind` covering every child request
/// of that kind.
pub fn size_window(slot: PairSlot, kind: WindowKind, children: &[ChildDevice]) -> Window {
    let (min_align, limit) = match kind {
        WindowKind::Io => (IO_ALIGN, IO_LIMIT),
        WindowKind::PrefetchableMemory | WindowKind::Memory => (MEM_ALIGN, MEM_LIMIT),
    };

    let mut size = 0;
    let mut align = min_align;
    for (request, _) in packing_order(children, kind) {
        size = align_up(size, request.align).unwrap_or(u64::MAX);
        size = size.saturating_add(request.size);
        align = align.max(request.align);
    }
    let size = align_up(size, min_align).unwrap_or(u64::MAX);

    Window {
        slot,
        kind,
        base: 0,
        size,
        align,
        granularity: min_align,
        limit,
        state: WindowState::Requested,
    }
}

/// Child requests of `kind` in the order they are packed into the window,
/// largest alignment first. Ties keep discovery order.
fn packing_order(
    children: &[ChildDevice],
    kind: WindowKind,
) -> Vec<(&ChildResource, (usize, usize))> {
    let mut requests: Vec<_> = children
        .iter()
        .enumerate()
        .flat_map(|(c, child)| {
            child
                .resources
                .iter()
                .enumerate()
                .filter(move |(_, r)| r.kind == kind && r.size != 0)
                .map(move |(r, res)| (res, (c, r)))
        })
        .collect();
    requests.sort_by(|a, b| b.0.align.cmp(&a.0.align));
    requests
}

/// Hands out child ranges inside an assigned window, in packing order.
pub fn assign_children(children: &mut [ChildDevice], window: &Window) {
    if !window.is_assigned() {
        return;
    }
    let order: Vec<(usize, usize)> = packing_order(children, window.kind)
        .into_iter()
        .map(|(_, index)| index)
        .collect();

    let mut cursor = window.base;
    for (c, r) in order {
        let child = &mut children[c];
        let resource = &mut child.resources[r];
        let Some(base) = align_up(cursor, resource.align) else {
            break;
        };
        let range = MemoryRange::from_base_len(base, resource.size);
        resource.assigned = Some(range);
        tracing::debug!(
            bus = child.bus,
            devfn = child.devfn,
            %range,
            "assigned child resource"
        );
        cursor = range.end();
    }
}

/// Places link windows: I/O ascending from a base port, memory descending
/// from a ceiling.
#[derive(Debug, Clone)]
pub struct WindowPlacer {
    io_next: u64,
    mem_top: u64,
    lowest_mem: Option<u64>,
}

impl WindowPlacer {
    /// Returns a placer starting at `io_base` and `mmio_top`.
    pub fn new(io_base: u64, mmio_top: u64) -> Self {
        Self {
            io_next: io_base,
            mem_top: mmio_top,
            lowest_mem: None,
        }
    }

    /// Assigns a base to `window`. Returns false and leaves the window
    /// unassigned if it does not fit below its limit.
    ///
    /// Empty windows are never placed.
    pub fn place(&mut self, window: &mut Window) -> bool {
        if window.size == 0 {
            return false;
        }
        let base = match window.kind {
            WindowKind::Io => {
                let base = align_up(self.io_next, window.align);
                let fits = base
                    .and_then(|b| b.checked_add(window.size))
                    .is_some_and(|end| end - 1 <= window.limit);
                match base {
                    Some(base) if fits => {
                        self.io_next = base + window.size;
                        base
                    }
                    _ => return false,
                }
            }
            WindowKind::PrefetchableMemory | WindowKind::Memory => {
                let top = self.mem_top.min(window.limit.saturating_add(1));
                let Some(base) = top.checked_sub(window.size) else {
                    return false;
                };
                let base = align_down(base, window.align);
                if base < MEM_FLOOR {
                    return false;
                }
                self.mem_top = base;
                self.lowest_mem = Some(base);
                base
            }
        };
        window.base = base;
        window.state = WindowState::Assigned;
        true
    }

    /// Top of low memory: the lowest placed memory window base, or
    /// `mmconf_base` if that is lower.
    pub fn tolm(&self, mmconf_base: u64) -> u64 {
        self.lowest_mem
            .map_or(mmconf_base, |base| base.min(mmconf_base))
    }
}

/// Orders windows for placement: I/O first, then memory by descending
/// alignment and size. Sorting is stable so equal windows keep topology
/// order.
pub fn placement_order(windows: &mut [(u8, u8, Window)]) {
    windows.sort_by(|(_, _, a), (_, _, b)| {
        a.kind
            .is_memory()
            .cmp(&b.kind.is_memory())
            .then(b.align.cmp(&a.align))
            .then(b.size.cmp(&a.size))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pairs::PairTable;
    use alloc::vec;

    fn slot(kind: WindowKind) -> PairSlot {
        PairTable::new().find_pair(0, 0, kind).unwrap()
    }

    fn child(devfn: u8, resources: Vec<ChildResource>) -> ChildDevice {
        ChildDevice {
            bus: 1,
            devfn,
            resources,
        }
    }

    #[test]
    fn test_size_window() {
        let children = [
            child(
                0,
                vec![
                    ChildResource::new(WindowKind::Memory, 0x1000, 0x1000),
                    ChildResource::new(WindowKind::Io, 0x100, 0x100),
                ],
            ),
            child(8, vec![ChildResource::new(WindowKind::Memory, 16 * MB, 16 * MB)]),
        ];

        let mem = size_window(slot(WindowKind::Memory), WindowKind::Memory, &children);
        assert_eq!(mem.size, 17 * MB);
        assert_eq!(mem.align, 16 * MB);
        assert_eq!(mem.granularity, MEM_ALIGN);

        let io = size_window(slot(WindowKind::Io), WindowKind::Io, &children);
        assert_eq!(io.size, IO_ALIGN);
        assert_eq!(io.align, IO_ALIGN);
        assert_eq!(io.limit, IO_LIMIT);

        let pref = size_window(
            slot(WindowKind::PrefetchableMemory),
            WindowKind::PrefetchableMemory,
            &children,
        );
        assert_eq!(pref.size, 0);
    }

    #[test]
    fn test_place() {
        let mut placer = WindowPlacer::new(0x1000, 0xf800_0000);

        let mut io = size_window(slot(WindowKind::Io), WindowKind::Io, &[]);
        io.size = 0x2000;
        assert!(placer.place(&mut io));
        assert_eq!(io.range(), MemoryRange::new(0x1000..0x3000));

        let mut mem = size_window(slot(WindowKind::Memory), WindowKind::Memory, &[]);
        mem.size = 64 * MB;
        mem.align = 64 * MB;
        assert!(placer.place(&mut mem));
        assert_eq!(mem.base, 0xf400_0000);
        assert_eq!(placer.tolm(0xf800_0000), 0xf400_0000);

        // Runs out of port space.
        let mut io = size_window(slot(WindowKind::Io), WindowKind::Io, &[]);
        io.size = 0xf000;
        assert!(!placer.place(&mut io));
        assert_eq!(io.state, WindowState::Requested);
    }

    #[test]
    fn test_tolm_without_windows() {
        let placer = WindowPlacer::new(0x1000, 0xe000_0000);
        assert_eq!(placer.tolm(0xf800_0000), 0xf800_0000);
    }

    #[test]
    fn test_assign_children() {
        let mut children = vec![
            child(0, vec![ChildResource::new(WindowKind::Memory, 0x1000, 0x1000)]),
            child(8, vec![ChildResource::new(WindowKind::Memory, MB, MB)]),
        ];
        let mut window = size_window(slot(WindowKind::Memory), WindowKind::Memory, &children);
        let mut placer = WindowPlacer::new(0x1000, 0xf800_0000);
        assert!(placer.place(&mut window));
        assign_children(&mut children, &window);

        // The larger alignment is packed first.
        assert_eq!(
            children[1].resources[0].assigned,
            Some(MemoryRange::from_base_len(window.base, MB))
        );
        assert_eq!(
            children[0].resources[0].assigned,
            Some(MemoryRange::from_base_len(window.base + MB, 0x1000))
        );
        assert!(window.range().contains(&children[0].resources[0].assigned.unwrap()));
    }
}
