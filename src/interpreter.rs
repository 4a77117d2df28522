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

//! The top-level `Interpreter`: the heap plus every VM register the
//! collector must trace, bundled into one value with no hidden globals
//! (spec §5).
//!
//! `Heap` and `Registers` are kept as sibling fields rather than one
//! `impl Roots for Interpreter { ... self.heap ... }` because the collector
//! needs `&mut Heap` and `&mut dyn Roots` at the same time (`alloc_cell`
//! takes both) -- folding the roots into the same type as the heap would
//! make every allocation call a self-borrow of `&mut self` twice over.
//! Splitting them into disjoint fields lets `self.heap.alloc_cell(..., &mut
//! self.regs)` borrow-check: two different fields, two different borrows.

use crate::cell::{CellRef, Tag};
use crate::config::Config;
use crate::error::MesResult;
use crate::heap::{Heap, Roots};
use crate::port::PortTable;
use crate::value::special;

/// Every live cell reference the collector must trace: the fixed singletons,
/// the special-form symbols, the global tables, and the explicit root stack
/// (spec §4.2 step 3's "fixed singletons ..., then `g_symbols`, `g_macros`,
/// `g_ports`, `m0`, and every live stack slot").
pub struct Registers {
    pub nil: CellRef,
    pub t: CellRef,
    pub f: CellRef,
    pub unspecified: CellRef,
    pub eof: CellRef,

    pub s_quote: CellRef,
    pub s_if: CellRef,
    pub s_cond: CellRef,
    pub s_when: CellRef,
    pub s_begin: CellRef,
    pub s_lambda: CellRef,
    pub s_define: CellRef,
    pub s_define_macro: CellRef,
    pub s_set: CellRef,
    pub s_let: CellRef,
    pub s_let_star: CellRef,
    pub s_letrec: CellRef,
    pub s_and: CellRef,
    pub s_or: CellRef,
    pub s_quasiquote: CellRef,
    pub s_unquote: CellRef,
    pub s_unquote_splicing: CellRef,
    pub s_call_cc: CellRef,
    pub s_apply: CellRef,
    pub s_else: CellRef,
    pub s_arrow: CellRef,

    /// The global environment, `r0` at the outermost level.
    pub g_env: CellRef,
    /// Assoc list of interned symbols.
    pub g_symbols: CellRef,
    /// Assoc list of `define-macro` transformers.
    pub g_macros: CellRef,
    /// Every open port's `TPort` cell, kept alive regardless of whether any
    /// Scheme variable still references it (spec §4.1 `g_ports`).
    pub g_ports: Vec<CellRef>,
    /// The explicit root stack: values computed mid-evaluation that are not
    /// yet reachable from any other register are pushed here before any
    /// further allocation that could trigger a collection, and popped once
    /// they are either discarded or installed somewhere permanent.
    pub g_stack: Vec<CellRef>,
}

impl Roots for Registers {
    fn for_each_root_mut(&mut self, f: &mut dyn FnMut(&mut CellRef)) {
        f(&mut self.nil);
        f(&mut self.t);
        f(&mut self.f);
        f(&mut self.unspecified);
        f(&mut self.eof);

        f(&mut self.s_quote);
        f(&mut self.s_if);
        f(&mut self.s_cond);
        f(&mut self.s_when);
        f(&mut self.s_begin);
        f(&mut self.s_lambda);
        f(&mut self.s_define);
        f(&mut self.s_define_macro);
        f(&mut self.s_set);
        f(&mut self.s_let);
        f(&mut self.s_let_star);
        f(&mut self.s_letrec);
        f(&mut self.s_and);
        f(&mut self.s_or);
        f(&mut self.s_quasiquote);
        f(&mut self.s_unquote);
        f(&mut self.s_unquote_splicing);
        f(&mut self.s_call_cc);
        f(&mut self.s_apply);
        f(&mut self.s_else);
        f(&mut self.s_arrow);

        f(&mut self.g_env);
        f(&mut self.g_symbols);
        f(&mut self.g_macros);
        for r in self.g_ports.iter_mut() {
            f(r);
        }
        for r in self.g_stack.iter_mut() {
            f(r);
        }
    }
}

/// The whole interpreter: heap, registers, the native port table, tuning
/// configuration, and the monotonic counter minting `call/cc` escape ids.
pub struct Interpreter {
    pub heap: Heap,
    pub regs: Registers,
    pub ports: PortTable,
    pub config: Config,
    pub next_cont_id: u64,
    pub primitives: crate::primitives::PrimitiveTable,
}

fn intern_during_boot(heap: &mut Heap, g_symbols: &mut CellRef, name: &[u8]) -> MesResult<CellRef> {
    let (sym, new_g_symbols) = crate::symbols::intern(heap, *g_symbols, name, &mut NoRootsDuringBoot)?;
    *g_symbols = new_g_symbols;
    Ok(sym)
}

/// During the very first allocations -- before `Registers` exists -- there is
/// nothing yet to root beyond the symbol list itself, which
/// `intern_during_boot` already threads through by hand.
struct NoRootsDuringBoot;
impl Roots for NoRootsDuringBoot {
    fn for_each_root_mut(&mut self, _f: &mut dyn FnMut(&mut CellRef)) {}
}

impl Interpreter {
    /// Build a fresh interpreter: allocate the heap, the singletons, every
    /// special-form symbol, and an empty global environment frame.
    pub fn new(config: Config) -> MesResult<Interpreter> {
        let mut heap = Heap::new(config.arena_cells, config.max_arena_cells, config.jam_size);
        let mut g_symbols = CellRef::SENTINEL;

        let nil = heap.alloc_cell(Tag::TSpecial, special::NIL, 0, &mut NoRootsDuringBoot)?;
        g_symbols = nil;
        let t = heap.alloc_cell(Tag::TSpecial, special::TRUE, 0, &mut NoRootsDuringBoot)?;
        let f = heap.alloc_cell(Tag::TSpecial, special::FALSE, 0, &mut NoRootsDuringBoot)?;
        let unspecified = heap.alloc_cell(Tag::TSpecial, special::UNSPECIFIED, 0, &mut NoRootsDuringBoot)?;
        let eof = heap.alloc_cell(Tag::TSpecial, special::EOF, 0, &mut NoRootsDuringBoot)?;

        macro_rules! sym {
            ($name:expr) => {
                intern_during_boot(&mut heap, &mut g_symbols, $name)?
            };
        }

        let s_quote = sym!(b"quote");
        let s_if = sym!(b"if");
        let s_cond = sym!(b"cond");
        let s_when = sym!(b"when");
        let s_begin = sym!(b"begin");
        let s_lambda = sym!(b"lambda");
        let s_define = sym!(b"define");
        let s_define_macro = sym!(b"define-macro");
        let s_set = sym!(b"set!");
        let s_let = sym!(b"let");
        let s_let_star = sym!(b"let*");
        let s_letrec = sym!(b"letrec");
        let s_and = sym!(b"and");
        let s_or = sym!(b"or");
        let s_quasiquote = sym!(b"quasiquote");
        let s_unquote = sym!(b"unquote");
        let s_unquote_splicing = sym!(b"unquote-splicing");
        let s_call_cc = sym!(b"call-with-current-continuation");
        let s_apply = sym!(b"apply");
        let s_else = sym!(b"else");
        let s_arrow = sym!(b"=>");

        let g_env = heap.alloc_cell(Tag::TPair, nil.into(), nil.into(), &mut NoRootsDuringBoot)?;

        let mut interp = Interpreter {
            heap,
            regs: Registers {
                nil,
                t,
                f,
                unspecified,
                eof,
                s_quote,
                s_if,
                s_cond,
                s_when,
                s_begin,
                s_lambda,
                s_define,
                s_define_macro,
                s_set,
                s_let,
                s_let_star,
                s_letrec,
                s_and,
                s_or,
                s_quasiquote,
                s_unquote,
                s_unquote_splicing,
                s_call_cc,
                s_apply,
                s_else,
                s_arrow,
                g_env,
                g_symbols,
                g_macros: nil,
                g_ports: Vec::new(),
                g_stack: Vec::with_capacity(config.stack_cells.min(4096)),
            },
            ports: PortTable::new(),
            config,
            next_cont_id: 0,
            primitives: crate::primitives::PrimitiveTable::new(),
        };

        crate::primitives::install_all(&mut interp)?;
        Ok(interp)
    }

    /// Force a garbage collection (spec §6.1 `gc()`).
    pub fn gc(&mut self) -> MesResult<()> {
        self.heap.collect_garbage(&mut self.regs)
    }

    pub fn intern(&mut self, name: &[u8]) -> MesResult<CellRef> {
        let (sym, new_g_symbols) = crate::symbols::intern(&mut self.heap, self.regs.g_symbols, name, &mut self.regs)?;
        self.regs.g_symbols = new_g_symbols;
        Ok(sym)
    }

    /// Build a proper list `(items[0] items[1] ... nil)` from `items`.
    ///
    /// `items` need not be rooted by the caller: every element is copied
    /// onto `g_stack` before the first allocation, so a GC mid-loop can't
    /// strand an element the loop hasn't consumed yet.
    pub fn list_of(&mut self, items: &[CellRef]) -> MesResult<CellRef> {
        let base = self.regs.g_stack.len();
        self.regs.g_stack.push(self.regs.nil);
        let temp = base;
        self.regs.g_stack.extend_from_slice(items);
        let items_base = base + 1;
        let items_len = items.len();

        for idx in (0..items_len).rev() {
            let item = self.regs.g_stack[items_base + idx];
            let tail = self.regs.g_stack[temp];
            let cell = self.heap.alloc_cell(Tag::TPair, item.into(), tail.into(), &mut self.regs)?;
            self.regs.g_stack[temp] = cell;
        }
        let result = self.regs.g_stack[temp];
        self.regs.g_stack.truncate(base);
        Ok(result)
    }

    pub fn is_nil(&self, r: CellRef) -> bool {
        self.heap.tag(r) == Tag::TSpecial && self.heap.get(r).a == special::NIL
    }
}
