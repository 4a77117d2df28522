// Copyright 2014 Nick Fitzgerald
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The `heap` module provides memory management for the Scheme
//! implementation: a uniformly tagged cell store with a bump-pointer
//! allocator and a Cheney two-space copying collector.
//!
//! ## Allocation
//!
//! Unlike a per-type arena-of-`T` scheme, every heap object here -- cons
//! cells, symbols, strings, vectors, closures, ports, ... -- is stored in one
//! contiguous `Vec<Cell>`, addressed by `CellRef` (spec §3.1). The allocator
//! is a simple bump pointer (`Heap::free`) into the active semispace; when
//! the free list would overrun `capacity - safety`, a collection runs first
//! (`Heap::maybe_collect`).
//!
//! Byte payloads (string and symbol bytes) and vector/values element slots
//! are stored as trailing cells immediately after their header, reinterpreted
//! as raw storage (`cell::cells_occupied`). The collector treats byte
//! payloads opaquely and vector/values slots as ordinary live references.
//!
//! ## Garbage Collection
//!
//! We use Cheney's breadth-first two-space copying algorithm (spec §4.2): a
//! `to_space` is allocated, roots are copied first in a fixed order, and then
//! the scan pointer walks forward through the freshly-copied cells, copying
//! (and forwarding) each of *their* references in turn. A `TBrokenHeart` left
//! behind in from-space lets an object be copied at most once even if it is
//! reachable from multiple roots -- this is also what makes the collector
//! cycle-safe.
//!
//! Growing the arena (`Heap::maybe_grow`) doubles the semispace size and the
//! safety margin until `max_arena_cells` is reached, then caps to
//! `max_arena_cells - jam_size` (spec §4.1).

use crate::cell::{cells_occupied, CellRef, Tag, Cell, CELL_BYTES};
use crate::error::{MesError, MesResult};

/// Something that can hand the collector every live root slot, in the fixed
/// order spec §4.2 step 3 requires ("the fixed singletons ..., then
/// `g_symbols`, `g_macros`, `g_ports`, `m0`, and every live stack slot").
/// `Interpreter` is the sole implementor; keeping the trait lets this module
/// stay ignorant of evaluator-level concepts like "the macro table".
pub trait Roots {
    fn for_each_root_mut(&mut self, f: &mut dyn FnMut(&mut CellRef));
}

/// The active semispace plus allocator/collector bookkeeping.
pub struct Heap {
    cells: Vec<Cell>,
    free: usize,
    capacity: usize,
    safety: usize,
    max_arena_cells: usize,
    jam_size: usize,
    /// Number of collections performed, surfaced for diagnostics/tests.
    pub gc_count: u64,
}

/// Initial safety margin reserved between `free` and `capacity`.
const INITIAL_SAFETY: usize = 1024;

impl Heap {
    /// Create a new heap with the given initial capacity per semispace.
    pub fn new(capacity: usize, max_arena_cells: usize, jam_size: usize) -> Heap {
        assert!(capacity > 1, "heap must hold more than the sentinel cell");
        let mut cells = Vec::with_capacity(capacity);
        cells.push(Cell::default()); // index 0: reserved sentinel
        Heap {
            cells,
            free: 1,
            capacity,
            safety: INITIAL_SAFETY.min(capacity / 4).max(1),
            max_arena_cells: max_arena_cells.max(capacity),
            jam_size,
            gc_count: 0,
        }
    }

    #[inline]
    pub fn free(&self) -> usize {
        self.free
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn get(&self, r: CellRef) -> Cell {
        debug_assert!(r.index() < self.free, "dereferencing a dangling CellRef {:?}", r);
        self.cells[r.index()]
    }

    #[inline]
    pub fn car(&self, r: CellRef) -> CellRef {
        self.get(r).car()
    }

    #[inline]
    pub fn cdr(&self, r: CellRef) -> CellRef {
        self.get(r).cdr()
    }

    #[inline]
    pub fn tag(&self, r: CellRef) -> Tag {
        self.get(r).tag
    }

    pub fn set_car(&mut self, r: CellRef, car: CellRef) {
        self.cells[r.index()].a = car.into();
    }

    pub fn set_cdr(&mut self, r: CellRef, cdr: CellRef) {
        self.cells[r.index()].b = cdr.into();
    }

    /// Allocate a plain two-word cell (pairs, refs, variables, closures,
    /// ports, numbers, chars, functions, ...). Triggers GC per §4.1 if the
    /// arena is under pressure.
    pub fn alloc_cell(&mut self, tag: Tag, a: i64, b: i64, roots: &mut dyn Roots) -> MesResult<CellRef> {
        self.maybe_collect(1, roots)?;
        let idx = self.free;
        self.cells.push(Cell::new(tag, a, b));
        self.free += 1;
        Ok(CellRef(idx as u32))
    }

    /// Allocate a byte blob (string or symbol payload) and return the header
    /// cell. `tag` must be `TString`, `TSymbol`, or `TKeyword`.
    pub fn alloc_bytes(&mut self, tag: Tag, bytes: &[u8], roots: &mut dyn Roots) -> MesResult<CellRef> {
        let occ = cells_occupied(tag, bytes.len() as i64);
        self.maybe_collect(occ, roots)?;

        let header_idx = self.free;
        let base_idx = header_idx + 1;
        // Header: a = length, b = base index of first payload cell.
        self.cells.push(Cell::new(tag, bytes.len() as i64, (base_idx as i64).max(header_idx as i64 + 1)));
        for chunk_start in (0..occ.saturating_sub(1)).map(|i| i * CELL_BYTES) {
            let mut a_bytes = [0u8; 8];
            let mut b_bytes = [0u8; 8];
            fill_chunk(&mut a_bytes, bytes, chunk_start);
            fill_chunk(&mut b_bytes, bytes, chunk_start + 8);
            self.cells.push(Cell::new(
                Tag::TBytes,
                i64::from_le_bytes(a_bytes),
                i64::from_le_bytes(b_bytes),
            ));
        }
        self.free += occ;
        Ok(CellRef(header_idx as u32))
    }

    /// Allocate a vector (or values-list) of `len` elements, all initialized
    /// to `fill`.
    pub fn alloc_vector(&mut self, tag: Tag, len: usize, fill: CellRef, roots: &mut dyn Roots) -> MesResult<CellRef> {
        let occ = cells_occupied(tag, len as i64);
        self.maybe_collect(occ, roots)?;

        let header_idx = self.free;
        let base_idx = header_idx + 1;
        self.cells.push(Cell::new(tag, len as i64, base_idx as i64));
        let slot_cells = occ - 1;
        for _ in 0..slot_cells {
            self.cells.push(Cell::new(Tag::TBytes, fill.into(), fill.into()));
        }
        self.free += occ;
        Ok(CellRef(header_idx as u32))
    }

    /// Read the byte payload of a string/symbol/keyword header.
    pub fn bytes_of(&self, header: CellRef) -> Vec<u8> {
        let cell = self.get(header);
        let len = cell.a as usize;
        let base = cell.b as usize;
        let mut out = Vec::with_capacity(len);
        let mut remaining = len;
        let mut idx = base;
        while remaining > 0 {
            let payload = self.cells[idx];
            let mut buf = [0u8; CELL_BYTES];
            buf[0..8].copy_from_slice(&payload.a.to_le_bytes());
            buf[8..16].copy_from_slice(&payload.b.to_le_bytes());
            let take = remaining.min(CELL_BYTES);
            out.extend_from_slice(&buf[..take]);
            remaining -= take;
            idx += 1;
        }
        out
    }

    /// Element accessors for vectors/values (two elements packed per cell).
    pub fn vector_len(&self, header: CellRef) -> usize {
        self.get(header).a as usize
    }

    pub fn vector_ref(&self, header: CellRef, i: usize) -> CellRef {
        let cell = self.get(header);
        debug_assert!(i < cell.a as usize, "vector-ref index {} out of bounds", i);
        let slot_cell_idx = cell.b as usize + i / 2;
        let slot = self.cells[slot_cell_idx];
        CellRef::from(if i % 2 == 0 { slot.a } else { slot.b })
    }

    pub fn vector_set(&mut self, header: CellRef, i: usize, value: CellRef) {
        let cell = self.get(header);
        debug_assert!(i < cell.a as usize, "vector-set! index {} out of bounds", i);
        let slot_cell_idx = cell.b as usize + i / 2;
        if i % 2 == 0 {
            self.cells[slot_cell_idx].a = value.into();
        } else {
            self.cells[slot_cell_idx].b = value.into();
        }
    }

    /// Ensure there is room for `needed` more cells, collecting and/or
    /// growing the arena first if not (spec §4.1).
    fn maybe_collect(&mut self, needed: usize, roots: &mut dyn Roots) -> MesResult<()> {
        if self.free + needed + self.safety > self.capacity {
            self.collect_garbage(roots)?;
            if self.free + needed + self.safety > self.capacity / 2 && self.capacity < self.max_arena_cells {
                self.grow();
            }
            if self.free + needed + self.safety > self.capacity {
                return Err(MesError::fatal("arena exhausted after collection and growth"));
            }
        }
        Ok(())
    }

    fn grow(&mut self) {
        let doubled = self.capacity.saturating_mul(2);
        let new_capacity = if doubled >= self.max_arena_cells {
            self.max_arena_cells.saturating_sub(self.jam_size).max(self.capacity)
        } else {
            doubled
        };
        if new_capacity <= self.capacity {
            return;
        }
        log::info!("heap: growing arena {} -> {} cells", self.capacity, new_capacity);
        self.capacity = new_capacity;
        self.safety = (self.safety * 2).min(self.capacity / 4).max(1);
        self.cells.reserve(self.capacity.saturating_sub(self.cells.len()));
    }

    /// Force a collection (spec §6.1 `gc()`).
    pub fn collect_garbage(&mut self, roots: &mut dyn Roots) -> MesResult<()> {
        let mut to_space: Vec<Cell> = Vec::with_capacity(self.capacity);
        to_space.push(Cell::default());
        let mut free = 1usize;

        roots.for_each_root_mut(&mut |r: &mut CellRef| {
            *r = gc_copy(&mut self.cells, &mut to_space, &mut free, *r);
        });

        let mut scan = 1usize;
        while scan < free {
            let cell = to_space[scan];
            let occ = cells_occupied(cell.tag, cell.a);
            let (mut new_a, mut new_b) = (cell.a, cell.b);

            match cell.tag {
                Tag::TPair | Tag::TStruct => {
                    new_a = gc_copy(&mut self.cells, &mut to_space, &mut free, CellRef::from(cell.a)).into();
                    new_b = gc_copy(&mut self.cells, &mut to_space, &mut free, CellRef::from(cell.b)).into();
                }
                Tag::TRef | Tag::TVariable => {
                    new_a = gc_copy(&mut self.cells, &mut to_space, &mut free, CellRef::from(cell.a)).into();
                }
                Tag::TMacro | Tag::TClosure => {
                    // `a` is the (formals . body) pair, `b` the captured
                    // environment -- both are live cell references.
                    new_a = gc_copy(&mut self.cells, &mut to_space, &mut free, CellRef::from(cell.a)).into();
                    new_b = gc_copy(&mut self.cells, &mut to_space, &mut free, CellRef::from(cell.b)).into();
                }
                Tag::TContinuation | Tag::TPort => {
                    // `a` is a plain integer (escape id / port table index),
                    // never a cell reference; only `b` needs forwarding.
                    new_b = gc_copy(&mut self.cells, &mut to_space, &mut free, CellRef::from(cell.b)).into();
                }
                Tag::TSpecial => {
                    if cell.b != 0 {
                        new_b = gc_copy(&mut self.cells, &mut to_space, &mut free, CellRef::from(cell.b)).into();
                    }
                }
                Tag::TString | Tag::TSymbol | Tag::TKeyword | Tag::TVector | Tag::TValues => {
                    // Payload/slots were already copied (and, for
                    // vector/values, recursively forwarded) alongside the
                    // header inside `gc_copy`.
                }
                Tag::TBytes => {
                    // Opaque trailing storage; never a direct scan target.
                }
                Tag::TChar | Tag::TNumber | Tag::TFunction => {
                    // No live reference fields.
                }
                Tag::TBrokenHeart => {
                    return Err(MesError::fatal("gc: broken heart encountered while scanning to-space"));
                }
            }

            to_space[scan].a = new_a;
            to_space[scan].b = new_b;
            scan += occ;
        }

        self.cells = to_space;
        self.free = free;
        self.gc_count += 1;

        if self.free + self.safety > self.capacity.saturating_sub(self.jam_size / 2 + 1) {
            self.safety = (self.free / 2).max(self.safety);
        }

        log::debug!(
            "gc: collection #{} complete, {} cells live of {} capacity",
            self.gc_count,
            self.free,
            self.capacity
        );

        Ok(())
    }
}

fn fill_chunk(buf: &mut [u8; 8], bytes: &[u8], start: usize) {
    for (i, slot) in buf.iter_mut().enumerate() {
        *slot = bytes.get(start + i).copied().unwrap_or(0);
    }
}

/// Copy (or return the existing forward of) the cell at `old` from
/// `from_space` into `to_space`, advancing `free`. Vector/values element
/// slots are forwarded recursively here rather than in the caller's scan
/// loop, since we already know the tag at copy time.
fn gc_copy(from_space: &mut [Cell], to_space: &mut Vec<Cell>, free: &mut usize, old: CellRef) -> CellRef {
    if old.is_sentinel() {
        return old;
    }

    let header = from_space[old.index()];
    if let Tag::TBrokenHeart = header.tag {
        return CellRef::from(header.a);
    }

    let occ = cells_occupied(header.tag, header.a);
    let new_index = *free;

    match header.tag {
        Tag::TString | Tag::TSymbol | Tag::TKeyword => {
            let new_base = new_index + 1;
            to_space.push(Cell::new(header.tag, header.a, new_base as i64));
            for i in 0..occ - 1 {
                to_space.push(from_space[header.b as usize + i]);
            }
        }
        Tag::TVector | Tag::TValues => {
            let new_base = new_index + 1;
            to_space.push(Cell::new(header.tag, header.a, new_base as i64));
            let old_base = header.b as usize;
            for i in 0..occ - 1 {
                to_space.push(from_space[old_base + i]);
            }
            *free = new_index + occ;
            // Stamp the forward before recursing into elements: a vector
            // that reaches itself (directly or through a cycle) must see
            // the broken heart and bail out via the early return above,
            // rather than re-entering this arm and recursing forever.
            from_space[old.index()] = Cell::new(Tag::TBrokenHeart, new_index as i64, 0);
            // Forward every live element now that the slot cells exist in
            // to-space at their final position.
            let len = header.a as usize;
            for i in 0..len {
                let slot_cell_idx = new_base + i / 2;
                let slot = to_space[slot_cell_idx];
                let forwarded = gc_copy(from_space, to_space, free, CellRef::from(if i % 2 == 0 { slot.a } else { slot.b }));
                if i % 2 == 0 {
                    to_space[slot_cell_idx].a = forwarded.into();
                } else {
                    to_space[slot_cell_idx].b = forwarded.into();
                }
            }
            return CellRef(new_index as u32);
        }
        _ => {
            to_space.push(header);
        }
    }

    *free = new_index + occ;
    from_space[old.index()] = Cell::new(Tag::TBrokenHeart, new_index as i64, 0);
    CellRef(new_index as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoRoots;
    impl Roots for NoRoots {
        fn for_each_root_mut(&mut self, _f: &mut dyn FnMut(&mut CellRef)) {}
    }

    #[test]
    fn cons_cells_survive_a_collection() {
        let mut heap = Heap::new(64, 1024, 16);
        let mut roots = NoRoots;
        let a = heap.alloc_cell(Tag::TNumber, 1, 0, &mut roots).unwrap();
        let b = heap.alloc_cell(Tag::TNumber, 2, 0, &mut roots).unwrap();
        let pair = heap.alloc_cell(Tag::TPair, a.into(), b.into(), &mut roots).unwrap();

        struct OneRoot(CellRef);
        impl Roots for OneRoot {
            fn for_each_root_mut(&mut self, f: &mut dyn FnMut(&mut CellRef)) {
                f(&mut self.0);
            }
        }
        let mut one_root = OneRoot(pair);
        heap.collect_garbage(&mut one_root).unwrap();
        let new_pair = one_root.0;

        let car = heap.car(new_pair);
        let cdr = heap.cdr(new_pair);
        assert_eq!(heap.get(car).a, 1);
        assert_eq!(heap.get(cdr).a, 2);
    }

    #[test]
    fn byte_payload_round_trips_through_gc() {
        let mut heap = Heap::new(64, 1024, 16);
        let mut roots = NoRoots;
        let s = heap.alloc_bytes(Tag::TString, b"hello, world!", &mut roots).unwrap();

        struct OneRoot(CellRef);
        impl Roots for OneRoot {
            fn for_each_root_mut(&mut self, f: &mut dyn FnMut(&mut CellRef)) {
                f(&mut self.0);
            }
        }
        let mut one_root = OneRoot(s);
        heap.collect_garbage(&mut one_root).unwrap();
        assert_eq!(heap.bytes_of(one_root.0), b"hello, world!");
    }

    #[test]
    fn unreachable_cells_are_reclaimed() {
        let mut heap = Heap::new(64, 1024, 16);
        let mut roots = NoRoots;
        for _ in 0..10 {
            heap.alloc_cell(Tag::TNumber, 7, 0, &mut roots).unwrap();
        }
        let free_before = heap.free();
        heap.collect_garbage(&mut roots).unwrap();
        assert!(heap.free() < free_before);
        assert_eq!(heap.free(), 1);
    }

    #[test]
    fn vector_elements_are_traced() {
        let mut heap = Heap::new(64, 1024, 16);
        let mut roots = NoRoots;
        let elem = heap.alloc_cell(Tag::TNumber, 99, 0, &mut roots).unwrap();
        let vec_ref = heap.alloc_vector(Tag::TVector, 3, CellRef::SENTINEL, &mut roots).unwrap();
        heap.vector_set(vec_ref, 1, elem);

        struct OneRoot(CellRef);
        impl Roots for OneRoot {
            fn for_each_root_mut(&mut self, f: &mut dyn FnMut(&mut CellRef)) {
                f(&mut self.0);
            }
        }
        let mut one_root = OneRoot(vec_ref);
        heap.collect_garbage(&mut one_root).unwrap();
        let new_vec = one_root.0;
        assert_eq!(heap.vector_len(new_vec), 3);
        let kept = heap.vector_ref(new_vec, 1);
        assert_eq!(heap.get(kept).a, 99);
    }
}
