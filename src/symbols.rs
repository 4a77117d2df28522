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

//! Symbol interning (spec §4.4).
//!
//! `g_symbols` is a plain heap list of `TSymbol` cells: `(sym1 sym2 ... nil)`.
//! Interning scans this list for a byte-equal name and returns the existing
//! cell if found; otherwise it allocates a new `TSymbol` (with a fresh
//! `TBytes` payload) and prepends it. Strings are never interned -- every
//! `string` literal or `make-string` call allocates its own `TString` cell,
//! even if another string with the same bytes already exists.

use crate::cell::{CellRef, Tag};
use crate::error::MesResult;
use crate::heap::{Heap, Roots};

/// Look up `name` in `g_symbols`; `None` if no interned symbol has those
/// exact bytes yet.
pub fn find(heap: &Heap, mut g_symbols: CellRef, name: &[u8]) -> Option<CellRef> {
    loop {
        if heap.tag(g_symbols) != Tag::TPair {
            return None;
        }
        let sym = heap.car(g_symbols);
        if heap.bytes_of(sym) == name {
            return Some(sym);
        }
        g_symbols = heap.cdr(g_symbols);
    }
}

/// Intern `name`, returning `(symbol, new_g_symbols)`. If `name` is already
/// interned, `new_g_symbols == g_symbols` and the existing cell is returned
/// (spec invariant: "no two live symbols have byte-equal names").
pub fn intern(
    heap: &mut Heap,
    g_symbols: CellRef,
    name: &[u8],
    roots: &mut dyn Roots,
) -> MesResult<(CellRef, CellRef)> {
    if let Some(existing) = find(heap, g_symbols, name) {
        return Ok((existing, g_symbols));
    }

    let sym = heap.alloc_bytes(Tag::TSymbol, name, roots)?;
    let new_g_symbols = heap.alloc_cell(Tag::TPair, sym.into(), g_symbols.into(), roots)?;
    Ok((sym, new_g_symbols))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoRoots;
    impl Roots for NoRoots {
        fn for_each_root_mut(&mut self, _f: &mut dyn FnMut(&mut CellRef)) {}
    }

    #[test]
    fn interning_the_same_name_twice_returns_the_same_cell() {
        let mut heap = Heap::new(256, 1024, 16);
        let mut roots = NoRoots;
        let nil = heap.alloc_cell(Tag::TSpecial, 0, 0, &mut roots).unwrap();

        let (s1, g1) = intern(&mut heap, nil, b"frobnicate", &mut roots).unwrap();
        let (s2, g2) = intern(&mut heap, g1, b"frobnicate", &mut roots).unwrap();

        assert_eq!(s1, s2);
        assert_eq!(g1, g2);
    }

    #[test]
    fn distinct_names_get_distinct_cells() {
        let mut heap = Heap::new(256, 1024, 16);
        let mut roots = NoRoots;
        let nil = heap.alloc_cell(Tag::TSpecial, 0, 0, &mut roots).unwrap();

        let (foo, g1) = intern(&mut heap, nil, b"foo", &mut roots).unwrap();
        let (bar, _g2) = intern(&mut heap, g1, b"bar", &mut roots).unwrap();

        assert_ne!(foo, bar);
        assert_eq!(heap.bytes_of(foo), b"foo");
        assert_eq!(heap.bytes_of(bar), b"bar");
    }
}
