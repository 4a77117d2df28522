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

//! The uniformly tagged heap cell and the index-based pointer that stands in
//! for it.
//!
//! Every heap object is a fixed-width, three machine word record: a `Tag`,
//! and two `i64` payload words `a` and `b` whose meaning depends on the tag
//! (car/cdr of a pair, referenced index for a variable box, length and
//! payload base for a byte blob, and so on -- see each tag's doc comment).
//!
//! Cells never move in Rust's sense (no raw pointers into the heap are ever
//! handed out); instead they are addressed by `CellRef`, a `u32` index into
//! the active semispace. That index *does* change across a collection, which
//! is why every structure that holds one must participate in tracing (see
//! `crate::gc`).

use std::fmt;

/// An index into the active semispace. Index `0` is reserved as a sentinel
/// and is never a valid allocated cell.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellRef(pub u32);

impl CellRef {
    /// The reserved sentinel index. Never points at a live cell.
    pub const SENTINEL: CellRef = CellRef(0);

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn is_sentinel(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#<cell {}>", self.0)
    }
}

impl From<CellRef> for i64 {
    fn from(r: CellRef) -> i64 {
        r.0 as i64
    }
}

impl From<i64> for CellRef {
    fn from(i: i64) -> CellRef {
        debug_assert!(i >= 0, "cell indices are never negative: {}", i);
        CellRef(i as u32)
    }
}

/// The closed enumeration of heap object tags (spec §3.1).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Tag {
    TPair,
    TSymbol,
    TString,
    /// Raw trailing storage cell for a byte payload (string/symbol bytes, or
    /// vector/values element slots). Never itself a GC root; the header that
    /// owns it knows how many trailing cells to skip.
    TBytes,
    TChar,
    TNumber,
    TVector,
    TStruct,
    TClosure,
    TContinuation,
    TMacro,
    TPort,
    TRef,
    TVariable,
    TSpecial,
    TKeyword,
    TValues,
    TFunction,
    /// Forwarding marker left behind in from-space during a collection.
    /// Never observed in the live (active) heap once `gc()` returns.
    TBrokenHeart,
}

/// A fixed-size, three-word heap record.
#[derive(Clone, Copy, Debug)]
pub struct Cell {
    pub tag: Tag,
    pub a: i64,
    pub b: i64,
}

impl Default for Cell {
    fn default() -> Cell {
        Cell {
            tag: Tag::TBytes,
            a: 0,
            b: 0,
        }
    }
}

impl Cell {
    pub fn new(tag: Tag, a: i64, b: i64) -> Cell {
        Cell { tag, a, b }
    }

    #[inline]
    pub fn car(&self) -> CellRef {
        CellRef::from(self.a)
    }

    #[inline]
    pub fn cdr(&self) -> CellRef {
        CellRef::from(self.b)
    }
}

/// How many machine words (cells) of storage, including the header itself,
/// a byte blob of `len` bytes occupies. Each trailing cell packs
/// `CELL_BYTES` raw bytes into its two `i64` fields.
pub const CELL_BYTES: usize = 16;

#[inline]
pub fn bytes_cells_occupied(len: usize) -> usize {
    1 + (len + CELL_BYTES - 1) / CELL_BYTES
}

/// How many cells a vector/values object of `len` elements occupies,
/// including its header. Two element slots are packed per trailing cell.
#[inline]
pub fn slots_cells_occupied(len: usize) -> usize {
    1 + (len + 1) / 2
}

/// Cells occupied by a header of the given tag, given its `a`/`b` words.
/// Consulted by both the allocator and the collector so the two never
/// disagree about where the next header starts (spec §9 "Byte-payload
/// cells").
pub fn cells_occupied(tag: Tag, a: i64) -> usize {
    match tag {
        Tag::TString | Tag::TSymbol | Tag::TKeyword => bytes_cells_occupied(a as usize),
        Tag::TVector | Tag::TValues => slots_cells_occupied(a as usize),
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_occupancy_rounds_up() {
        assert_eq!(bytes_cells_occupied(0), 1);
        assert_eq!(bytes_cells_occupied(1), 2);
        assert_eq!(bytes_cells_occupied(16), 2);
        assert_eq!(bytes_cells_occupied(17), 3);
    }

    #[test]
    fn slots_occupancy_packs_two_per_cell() {
        assert_eq!(slots_cells_occupied(0), 1);
        assert_eq!(slots_cells_occupied(1), 1);
        assert_eq!(slots_cells_occupied(2), 1);
        assert_eq!(slots_cells_occupied(3), 2);
    }

    #[test]
    fn cell_ref_roundtrips_through_i64() {
        let r = CellRef(42);
        let i: i64 = r.into();
        assert_eq!(i, 42);
        assert_eq!(CellRef::from(i), r);
    }
}
