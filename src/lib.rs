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

//! `bootscheme` — the tagged-cell heap, copying collector, reader, macro
//! expander, evaluator, and primitive surface of a minimal bootstrap Scheme
//! (spec §1/§2). The crate is the INTERPRETER CORE only: argument parsing,
//! the REPL loop proper, and the POSIX process wrappers a real bootstrap
//! front end needs are out of scope and live, if anywhere, in `main.rs` as
//! a thin driver over this library (spec §1, §6.1).
//!
//! Module layout mirrors the component table of spec §2, leaves first:
//! `cell` and `value` are the data model; `heap` is the allocator and
//! collector; `symbols`, `environment`, `port` are the supporting tables;
//! `reader` and `writer` are the two directions of the read-print loop;
//! `macros` and `expand` are the macro expander; `eval` is the tree-walking
//! evaluator; `primitives` is the native subroutine surface; `interpreter`
//! ties every root-bearing piece of state into one `Interpreter` value;
//! `config` and `error` are the ambient config/error plumbing every other
//! module depends on.

pub mod cell;
pub mod config;
pub mod environment;
pub mod error;
pub mod eval;
pub mod expand;
pub mod heap;
pub mod interpreter;
pub mod macros;
pub mod port;
pub mod primitives;
pub mod reader;
pub mod symbols;
pub mod value;
pub mod writer;

pub use config::Config;
pub use error::{MesError, MesResult};
pub use interpreter::Interpreter;

use crate::cell::CellRef;
use crate::reader::{Reader, Syntax};
use crate::value::Value;

/// Build the `Syntax` table `read_form` needs from an interpreter's already
/// pre-seeded singletons and special-form symbols (spec §6.1: the reader is
/// reached only through `read_form(port) -> cell | eof`, never by reaching
/// into `Interpreter` fields directly).
fn syntax_of(interp: &Interpreter) -> Syntax {
    Syntax {
        nil: interp.regs.nil,
        t: interp.regs.t,
        f: interp.regs.f,
        eof: interp.regs.eof,
        quote: interp.regs.s_quote,
        quasiquote: interp.regs.s_quasiquote,
        unquote: interp.regs.s_unquote,
        unquote_splicing: interp.regs.s_unquote_splicing,
    }
}

/// Read one top-level form from the port at `port_index` in the
/// interpreter's port table, or the EOF singleton at a clean end of input
/// (spec §6.1 `read_form`).
pub fn read_form(interp: &mut Interpreter, port_index: usize) -> MesResult<CellRef> {
    let syntax = syntax_of(interp);
    let mut g_symbols = interp.regs.g_symbols;
    let result = {
        let port = interp.ports.get_mut(port_index)?;
        let mut r = Reader {
            heap: &mut interp.heap,
            roots: &mut interp.regs,
            g_symbols,
        };
        let form = reader::read_form(&mut r, port, &syntax)?;
        g_symbols = r.g_symbols;
        form
    };
    interp.regs.g_symbols = g_symbols;
    Ok(result)
}

/// Fully macro-expand `form` (spec §6.1 `expand`).
pub fn expand(interp: &mut Interpreter, form: CellRef) -> MesResult<CellRef> {
    expand::expand(interp, form)
}

/// Evaluate `form` in `env`, updating `r1` with the result (spec §6.1 `eval`).
pub fn eval(interp: &mut Interpreter, form: CellRef, env: CellRef) -> MesResult<CellRef> {
    let result = eval::eval(interp, form, env);
    // `g_stack` is cleared whether or not `form` raised: any intermediate
    // the evaluator rooted there mid-evaluation is meaningless once control
    // returns above `eval`, and an error that aborted the current form must
    // not leak its leftover roots into whatever top-level form runs next.
    interp.regs.g_stack.clear();
    result
}

/// Write `form` to the port at `port_index`, `write?` selecting `display`
/// (`false`) vs `write` (`true`) quoting (spec §6.1 `write_form`).
pub fn write_form(interp: &mut Interpreter, port_index: usize, form: CellRef, write_mode: bool) -> MesResult<()> {
    let port = interp.ports.get_mut(port_index)?;
    writer::write_form(&interp.heap, port, form, write_mode)
}

/// Read, macro-expand, evaluate, and print one top-level form from
/// `port_index` to `interp`'s current output port, returning `true` as long
/// as there is more input (spec §2 "Control flow").
///
/// A `MesError::Scheme` anywhere in this pipeline (an unbound variable, a
/// type error in a primitive, division by zero, ...) is the "Scheme-level
/// error" class of spec §7: there is no installed error continuation here,
/// so per spec §7's "absent one, to the top-level loop", it is reported as
/// a `mes: key: irritant` diagnostic on stderr and the driver moves on to
/// the next top-level form. Only `MesError::Fatal` (collector inconsistency,
/// missing boot file, ...) is allowed to terminate the process.
pub fn read_eval_print_one(interp: &mut Interpreter, port_index: usize) -> MesResult<bool> {
    interp.gc()?;
    match read_eval_print_one_inner(interp, port_index) {
        Ok(more) => Ok(more),
        Err(MesError::Scheme { key, irritant }) => {
            eprintln!("mes: {}: {}", key, irritant);
            Ok(true)
        }
        Err(other) => Err(other),
    }
}

fn read_eval_print_one_inner(interp: &mut Interpreter, port_index: usize) -> MesResult<bool> {
    let form = read_form(interp, port_index)?;
    if Value::of(&interp.heap, form) == Value::Eof {
        return Ok(false);
    }
    let expanded = expand(interp, form)?;
    let result = eval(interp, expanded, interp.regs.g_env)?;
    let out = interp.ports.current_output;
    write_form(interp, out, result, true)?;
    interp.ports.get_mut(out)?.write_bytes(b"\n")?;
    Ok(true)
}
