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

//! The Scheme environment model: nested association lists of `(symbol .
//! variable)` pairs (spec §4.5).
//!
//! Unlike the original oxischeme, where an `Environment`/`Activation` split
//! keeps bindings off the GC'd heap until runtime, here the environment
//! chain *is* ordinary heap data -- it is one of the VM registers (`r0`)
//! the collector must be able to walk, so it has to be made of cells the
//! collector already understands rather than a side `Vec<HashMap<_, _>>`.
//!
//! An environment is a list of frames: `(frame_innermost ... frame_global)`.
//! A frame is an association list `((sym1 . var1) (sym2 . var2) ...)`.
//! A variable is a `TVariable` cell boxing the bound value, so that `set!`
//! mutates in place and is visible to every closure that captured the same
//! frame.

use crate::cell::{CellRef, Tag};
use crate::error::{MesError, MesResult};
use crate::heap::{Heap, Roots};

/// Create a new, empty frame and cons it onto `env`, returning the extended
/// environment. Used both for the global frame at startup and for each
/// lambda invocation's activation frame. `nil` is the interpreter's
/// singleton empty list, used as both the empty frame and the base case of
/// the frame chain.
pub fn extend(heap: &mut Heap, env: CellRef, nil: CellRef, roots: &mut dyn Roots) -> MesResult<CellRef> {
    heap.alloc_cell(Tag::TPair, nil.into(), env.into(), roots)
}

/// Extends a caller's root set with extra cells for the lifetime of a call,
/// so a helper that only has `&mut dyn Roots` can still root its own working
/// locals across an allocation without knowing the caller's concrete type.
struct ExtraRoots<'a> {
    inner: &'a mut dyn Roots,
    extra: &'a mut [CellRef],
}

impl Roots for ExtraRoots<'_> {
    fn for_each_root_mut(&mut self, f: &mut dyn FnMut(&mut CellRef)) {
        self.inner.for_each_root_mut(f);
        for cell in self.extra.iter_mut() {
            f(cell);
        }
    }
}

/// Insert `(name . value)` at the head of the innermost frame of `env`,
/// shadowing any existing binding of `name` in that frame. Returns the new
/// variable cell. This is `define`.
pub fn define(
    heap: &mut Heap,
    env: CellRef,
    name: CellRef,
    value: CellRef,
    roots: &mut dyn Roots,
) -> MesResult<CellRef> {
    if let Some(existing) = lookup_in_frame(heap, heap.car(env), name) {
        heap.set_car(existing, value);
        return Ok(existing);
    }

    // `name`, `value`, and `env` are all read again after the allocation(s)
    // that precede their next use, so they ride along as extra roots for
    // this call's three `alloc_cell`s rather than risk going stale.
    let mut extra = [env, name, value];
    let mut rooted = ExtraRoots { inner: roots, extra: &mut extra };

    let value = rooted.extra[2];
    let var = heap.alloc_cell(Tag::TVariable, value.into(), 0, &mut rooted)?;

    let name = rooted.extra[1];
    let binding = heap.alloc_cell(Tag::TPair, name.into(), var.into(), &mut rooted)?;

    let env = rooted.extra[0];
    let frame = heap.car(env);
    let new_frame = heap.alloc_cell(Tag::TPair, binding.into(), frame.into(), &mut rooted)?;

    let env = rooted.extra[0];
    heap.set_car(env, new_frame);
    Ok(var)
}

/// Search a single frame's association list for `name` by symbol identity
/// (`eq?`), returning its variable cell if bound there.
fn lookup_in_frame(heap: &Heap, mut frame: CellRef, name: CellRef) -> Option<CellRef> {
    loop {
        if heap.tag(frame) != Tag::TPair {
            return None;
        }
        let binding = heap.car(frame);
        if heap.car(binding) == name {
            return Some(heap.cdr(binding));
        }
        frame = heap.cdr(frame);
    }
}

/// Walk `env` innermost-frame-first, returning the variable cell bound to
/// `name`, or `None` if unbound anywhere in the chain.
pub fn lookup(heap: &Heap, mut env: CellRef, name: CellRef) -> Option<CellRef> {
    loop {
        if heap.tag(env) != Tag::TPair {
            return None;
        }
        if let Some(var) = lookup_in_frame(heap, heap.car(env), name) {
            return Some(var);
        }
        env = heap.cdr(env);
    }
}

/// `set!`: mutate the innermost binding of `name` reachable from `env`.
/// Signals `unbound-variable` if `name` is not bound anywhere in the chain.
pub fn set(heap: &mut Heap, env: CellRef, name: CellRef, value: CellRef, name_str: &str) -> MesResult<()> {
    match lookup(heap, env, name) {
        Some(var) => {
            heap.set_car(var, value);
            Ok(())
        }
        None => Err(MesError::unbound_variable(name_str)),
    }
}

/// Dereference a variable cell to its currently bound value.
pub fn value_of(heap: &Heap, var: CellRef) -> CellRef {
    heap.car(var)
}
