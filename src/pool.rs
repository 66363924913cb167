//! Value pool — a fixed array of cell slots with an intrusive free list.
//!
//! The pool knows nothing about object semantics: allocation pops the free
//! list, freeing relinks a slot. The GC sweep decides *when* to free and
//! runs per-type finalization first (dropping the old payload releases any
//! owned resources).

use crate::cell::{Cell, CellKind, CellRef};

/// Total number of cell slots, fixed at build time.
pub const VALUE_POOL_SIZE: usize = 9000;

pub struct ValuePool {
    slots: Vec<Cell>,
    free_head: Option<CellRef>,
}

impl ValuePool {
    /// Allocate the slot array and thread every cell onto the free list.
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(VALUE_POOL_SIZE);
        let mut free_head = None;
        for i in 0..VALUE_POOL_SIZE {
            slots.push(Cell {
                alive: false,
                mark: false,
                kind: CellKind::HeapNode { next: free_head },
            });
            free_head = Some(CellRef(i as u16));
        }
        Self { slots, free_head }
    }

    /// Pop the free list. The returned slot is alive and unmarked, with its
    /// payload still `HeapNode` — the constructor overwrites it.
    pub fn alloc(&mut self) -> Option<CellRef> {
        let head = self.free_head?;
        let cell = &mut self.slots[head.index()];
        self.free_head = match cell.kind {
            CellKind::HeapNode { next } => next,
            _ => unreachable!("free list points at a non-free cell"),
        };
        cell.alive = true;
        cell.mark = false;
        Some(head)
    }

    /// Return a slot to the free list, dropping its payload.
    pub fn free(&mut self, r: CellRef) {
        let cell = &mut self.slots[r.index()];
        debug_assert!(cell.alive, "double free of pool cell");
        cell.alive = false;
        cell.mark = false;
        cell.kind = CellKind::HeapNode {
            next: self.free_head,
        };
        self.free_head = Some(r);
    }

    /// Decompress a reference into its slot.
    #[inline]
    pub fn get(&self, r: CellRef) -> &Cell {
        &self.slots[r.index()]
    }

    #[inline]
    pub fn get_mut(&mut self, r: CellRef) -> &mut Cell {
        &mut self.slots[r.index()]
    }

    /// Count of cells currently on the free list.
    pub fn free_count(&self) -> usize {
        let mut n = 0;
        let mut cursor = self.free_head;
        while let Some(r) = cursor {
            n += 1;
            cursor = match self.get(r).kind {
                CellKind::HeapNode { next } => next,
                _ => unreachable!("free list points at a non-free cell"),
            };
        }
        n
    }

    /// Count of live (allocated) cells.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|c| c.alive).count()
    }

    /// Visit every live cell in slot order.
    pub fn for_each_live(&self, mut f: impl FnMut(CellRef, &Cell)) {
        for (i, cell) in self.slots.iter().enumerate() {
            if cell.alive {
                f(CellRef(i as u16), cell);
            }
        }
    }
}

impl Default for ValuePool {
    fn default() -> Self {
        Self::new()
    }
}
