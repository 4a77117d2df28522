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

//! `define-macro` and the macro table (spec §4.9).
//!
//! `g_macros` is an association list `((name1 . transformer1) (name2 .
//! transformer2) ... nil)`, same shape as an environment frame but kept
//! separate since macro bindings are not variable bindings. A transformer is
//! a `TMacro` cell: same `(formals . body)`/captured-env layout as a
//! closure, and applied the same way by `eval::tail_apply`, but tagged apart
//! from `TClosure` so a macro binding can never be called as an ordinary
//! procedure by accident. Expanding a call applies it to the call's
//! unevaluated argument list and fixpoints on the result, so `(m1 (m2 x))`
//! where `m1` expands to a call to `m2` is expanded completely before `eval`
//! ever sees it.
//!
//! Expanding a macro transformer means *applying* a closure, which needs the
//! whole evaluator (environments, primitives, ports), not just a heap and a
//! root set. That fixpoint loop lives in `eval` alongside the rest of
//! application; this module only owns the `g_macros` table itself.

use crate::cell::{CellRef, Tag};
use crate::error::MesResult;
use crate::heap::{Heap, Roots};

/// Look up `name`'s macro transformer, if any.
pub fn lookup(heap: &Heap, mut g_macros: CellRef, name: CellRef) -> Option<CellRef> {
    loop {
        if heap.tag(g_macros) != Tag::TPair {
            return None;
        }
        let binding = heap.car(g_macros);
        if heap.car(binding) == name {
            return Some(heap.cdr(binding));
        }
        g_macros = heap.cdr(g_macros);
    }
}

/// Install (or replace) `name`'s transformer, returning the new `g_macros`.
pub fn install(
    heap: &mut Heap,
    g_macros: CellRef,
    name: CellRef,
    transformer: CellRef,
    roots: &mut dyn Roots,
) -> MesResult<CellRef> {
    let binding = heap.alloc_cell(Tag::TPair, name.into(), transformer.into(), roots)?;
    heap.alloc_cell(Tag::TPair, binding.into(), g_macros.into(), roots)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoRoots;
    impl Roots for NoRoots {
        fn for_each_root_mut(&mut self, _f: &mut dyn FnMut(&mut CellRef)) {}
    }

    #[test]
    fn lookup_on_empty_table_finds_nothing() {
        let mut heap = Heap::new(64, 1024, 16);
        let mut roots = NoRoots;
        let nil = heap.alloc_cell(Tag::TSpecial, 0, 0, &mut roots).unwrap();
        let name = heap.alloc_cell(Tag::TSymbol, 0, 0, &mut roots).unwrap();
        assert_eq!(lookup(&heap, nil, name), None);
    }

    #[test]
    fn installed_macro_is_found_by_name() {
        let mut heap = Heap::new(64, 1024, 16);
        let mut roots = NoRoots;
        let nil = heap.alloc_cell(Tag::TSpecial, 0, 0, &mut roots).unwrap();
        let name = heap.alloc_cell(Tag::TSymbol, 0, 0, &mut roots).unwrap();
        let other_name = heap.alloc_cell(Tag::TSymbol, 0, 0, &mut roots).unwrap();
        let transformer = heap.alloc_cell(Tag::TMacro, 0, 0, &mut roots).unwrap();
        let g_macros = install(&mut heap, nil, name, transformer, &mut roots).unwrap();

        assert_eq!(lookup(&heap, g_macros, name), Some(transformer));
        assert_eq!(lookup(&heap, g_macros, other_name), None);
    }

    #[test]
    fn reinstalling_a_name_shadows_the_old_transformer() {
        let mut heap = Heap::new(64, 1024, 16);
        let mut roots = NoRoots;
        let nil = heap.alloc_cell(Tag::TSpecial, 0, 0, &mut roots).unwrap();
        let name = heap.alloc_cell(Tag::TSymbol, 0, 0, &mut roots).unwrap();
        let t1 = heap.alloc_cell(Tag::TMacro, 0, 0, &mut roots).unwrap();
        let t2 = heap.alloc_cell(Tag::TMacro, 0, 1, &mut roots).unwrap();
        let g_macros = install(&mut heap, nil, name, t1, &mut roots).unwrap();
        let g_macros = install(&mut heap, g_macros, name, t2, &mut roots).unwrap();
        assert_eq!(lookup(&heap, g_macros, name), Some(t2));
    }
}
