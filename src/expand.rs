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

//! A standalone macro-expansion pass (spec §4.7, §6.1's `expand()` driver
//! entry point), distinct from the expansion `eval` performs inline as it
//! descends a form.
//!
//! `eval` expands macros lazily: it only discovers `(m ...)` names a macro
//! once it reaches that subform in its own dispatch, and only expands
//! exactly the subform it is about to evaluate. `expand` instead walks a
//! whole form up front and rewrites every macro call it finds, recursively,
//! before any of it is evaluated -- useful for a driver that wants to print
//! or inspect the fully expanded form of top-level input (the REPL's `,expand`
//! style tooling) without actually running it.
//!
//! `quote`'s argument is never descended into: a literal `(m 1 2)` sitting
//! inside `'(...)` names data, not a call, and must come back unchanged.
//! `quasiquote`'s template gets the same treatment, except that the
//! template can itself contain live code inside `unquote`/`unquote-splicing`
//! escapes, so those (and only those) subforms are expanded normally.

use crate::cell::{CellRef, Tag};
use crate::error::MesResult;
use crate::interpreter::Interpreter;
use crate::macros;

/// Fully macro-expand `form`, leaving everything else (special forms,
/// applications, literals) structurally alone.
pub fn expand(interp: &mut Interpreter, form: CellRef) -> MesResult<CellRef> {
    if interp.heap.tag(form) != Tag::TPair {
        return Ok(form);
    }

    let head = interp.heap.car(form);
    let tail = interp.heap.cdr(form);

    if head == interp.regs.s_quote {
        return Ok(form);
    }

    if head == interp.regs.s_quasiquote {
        let template = interp.heap.car(tail);
        let expanded_template = expand_quasiquote(interp, template, 1)?;
        let new_tail = interp
            .heap
            .alloc_cell(Tag::TPair, expanded_template.into(), interp.regs.nil.into(), &mut interp.regs)?;
        return interp
            .heap
            .alloc_cell(Tag::TPair, interp.regs.s_quasiquote.into(), new_tail.into(), &mut interp.regs);
    }

    if interp.heap.tag(head) == Tag::TSymbol {
        if let Some(transformer) = macros::lookup(&interp.heap, interp.regs.g_macros, head) {
            let raw_args = collect_list(interp, tail)?;
            let expanded_once = crate::eval::apply_procedure(interp, transformer, &raw_args)?;
            return expand(interp, expanded_once);
        }
    }

    expand_subforms(interp, form)
}

/// Expand every element of a (possibly improper) list, rebuilding the same
/// shape rather than treating it as a call.
fn expand_subforms(interp: &mut Interpreter, form: CellRef) -> MesResult<CellRef> {
    if interp.heap.tag(form) != Tag::TPair {
        return Ok(form);
    }
    let car = interp.heap.car(form);
    let cdr = interp.heap.cdr(form);
    let expanded_car = expand(interp, car)?;
    let expanded_cdr = expand_subforms(interp, cdr)?;
    interp.heap.alloc_cell(Tag::TPair, expanded_car.into(), expanded_cdr.into(), &mut interp.regs)
}

/// Walk a `quasiquote` template at nesting `depth` (starts at 1 for the
/// outermost backquote): `unquote`/`unquote-splicing` subforms at depth 1
/// hold ordinary code and are fully macro-expanded; a nested `quasiquote`
/// increases the depth and an `unquote` at depth > 1 decreases it, mirroring
/// `eval::quasi_expand`'s own nesting rule. Everything else is literal data
/// and is rebuilt unchanged, never handed to `expand`/macro lookup.
fn expand_quasiquote(interp: &mut Interpreter, template: CellRef, depth: u32) -> MesResult<CellRef> {
    if interp.heap.tag(template) != Tag::TPair {
        return Ok(template);
    }

    let head = interp.heap.car(template);
    let tail = interp.heap.cdr(template);

    if head == interp.regs.s_unquote || head == interp.regs.s_unquote_splicing {
        let inner = interp.heap.car(tail);
        let expanded_inner = if depth == 1 {
            expand(interp, inner)?
        } else {
            expand_quasiquote(interp, inner, depth - 1)?
        };
        let new_tail = interp
            .heap
            .alloc_cell(Tag::TPair, expanded_inner.into(), interp.regs.nil.into(), &mut interp.regs)?;
        return interp.heap.alloc_cell(Tag::TPair, head.into(), new_tail.into(), &mut interp.regs);
    }

    if head == interp.regs.s_quasiquote {
        let inner = interp.heap.car(tail);
        let expanded_inner = expand_quasiquote(interp, inner, depth + 1)?;
        let new_tail = interp
            .heap
            .alloc_cell(Tag::TPair, expanded_inner.into(), interp.regs.nil.into(), &mut interp.regs)?;
        return interp.heap.alloc_cell(Tag::TPair, head.into(), new_tail.into(), &mut interp.regs);
    }

    let expanded_car = expand_quasiquote(interp, head, depth)?;
    let expanded_cdr = expand_quasiquote(interp, tail, depth)?;
    interp.heap.alloc_cell(Tag::TPair, expanded_car.into(), expanded_cdr.into(), &mut interp.regs)
}

fn collect_list(interp: &Interpreter, mut list: CellRef) -> MesResult<Vec<CellRef>> {
    let mut out = Vec::new();
    while !interp.is_nil(list) {
        if interp.heap.tag(list) != Tag::TPair {
            return Err(crate::error::MesError::wrong_type("list", "improper list"));
        }
        out.push(interp.heap.car(list));
        list = interp.heap.cdr(list);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn fresh() -> Interpreter {
        Interpreter::new(Config::default()).unwrap()
    }

    fn num(interp: &mut Interpreter, n: i64) -> CellRef {
        interp.heap.alloc_cell(Tag::TNumber, 0, n, &mut interp.regs).unwrap()
    }

    fn sym(interp: &mut Interpreter, name: &[u8]) -> CellRef {
        interp.intern(name).unwrap()
    }

    fn list(interp: &mut Interpreter, items: &[CellRef]) -> CellRef {
        interp.list_of(items).unwrap()
    }

    #[test]
    fn forms_with_no_macros_are_unchanged_in_shape() {
        let mut interp = fresh();
        let plus = sym(&mut interp, b"+");
        let one = num(&mut interp, 1);
        let two = num(&mut interp, 2);
        let form = list(&mut interp, &[plus, one, two]);
        let expanded = expand(&mut interp, form).unwrap();

        assert_eq!(interp.heap.car(expanded), plus);
        assert_eq!(interp.heap.car(interp.heap.cdr(expanded)), one);
        assert_eq!(interp.heap.car(interp.heap.cdr(interp.heap.cdr(expanded))), two);
    }

    #[test]
    fn quoted_data_resembling_a_macro_call_is_left_alone() {
        let mut interp = fresh();
        let name = sym(&mut interp, b"answer");
        let forty_two = num(&mut interp, 42);
        let quoted_template = list(&mut interp, &[interp.regs.s_quote, forty_two]);
        let target = list(&mut interp, &[name]);
        let define_macro_expr = list(&mut interp, &[interp.regs.s_define_macro, target, quoted_template]);
        crate::eval::eval(&mut interp, define_macro_expr, interp.regs.g_env).unwrap();

        let literal_call = list(&mut interp, &[name]);
        let quoted_form = list(&mut interp, &[interp.regs.s_quote, literal_call]);
        let expanded = expand(&mut interp, quoted_form).unwrap();

        assert_eq!(expanded, quoted_form);
    }

    #[test]
    fn a_macro_call_nested_inside_another_form_is_expanded() {
        let mut interp = fresh();
        let name = sym(&mut interp, b"answer");
        let forty_two = num(&mut interp, 42);
        let quoted_template = list(&mut interp, &[interp.regs.s_quote, forty_two]);
        let target = list(&mut interp, &[name]);
        let define_macro_expr = list(&mut interp, &[interp.regs.s_define_macro, target, quoted_template]);
        crate::eval::eval(&mut interp, define_macro_expr, interp.regs.g_env).unwrap();

        let plus = sym(&mut interp, b"+");
        let one = num(&mut interp, 1);
        let call = list(&mut interp, &[name]);
        let form = list(&mut interp, &[plus, one, call]);
        let expanded = expand(&mut interp, form).unwrap();

        let second_arg = interp.heap.car(interp.heap.cdr(interp.heap.cdr(expanded)));
        let quote_tag = interp.heap.car(second_arg);
        assert_eq!(quote_tag, interp.regs.s_quote);
    }

    #[test]
    fn a_literal_call_inside_a_quasiquote_template_is_left_alone() {
        let mut interp = fresh();
        let name = sym(&mut interp, b"foo");
        let ninety_nine = num(&mut interp, 99);
        let target = list(&mut interp, &[name]);
        let define_macro_expr = list(&mut interp, &[interp.regs.s_define_macro, target, ninety_nine]);
        crate::eval::eval(&mut interp, define_macro_expr, interp.regs.g_env).unwrap();

        let a = sym(&mut interp, b"a");
        let literal_call = list(&mut interp, &[name]);
        let template = list(&mut interp, &[a, literal_call]);
        let quasiquoted = list(&mut interp, &[interp.regs.s_quasiquote, template]);
        let expanded = expand(&mut interp, quasiquoted).unwrap();

        let expanded_template = interp.heap.car(interp.heap.cdr(expanded));
        let second = interp.heap.car(interp.heap.cdr(expanded_template));
        assert_eq!(interp.heap.car(second), name);
    }

    #[test]
    fn an_unquoted_call_inside_a_quasiquote_template_is_expanded() {
        let mut interp = fresh();
        let name = sym(&mut interp, b"foo");
        let ninety_nine = num(&mut interp, 99);
        let target = list(&mut interp, &[name]);
        let define_macro_expr = list(&mut interp, &[interp.regs.s_define_macro, target, ninety_nine]);
        crate::eval::eval(&mut interp, define_macro_expr, interp.regs.g_env).unwrap();

        let a = sym(&mut interp, b"a");
        let literal_call = list(&mut interp, &[name]);
        let unquoted = list(&mut interp, &[interp.regs.s_unquote, literal_call]);
        let template = list(&mut interp, &[a, unquoted]);
        let quasiquoted = list(&mut interp, &[interp.regs.s_quasiquote, template]);
        let expanded = expand(&mut interp, quasiquoted).unwrap();

        let expanded_template = interp.heap.car(interp.heap.cdr(expanded));
        let second = interp.heap.car(interp.heap.cdr(expanded_template));
        let unquote_payload = interp.heap.car(interp.heap.cdr(second));
        assert_eq!(crate::value::Value::of(&interp.heap, unquote_payload), crate::value::Value::Number(99));
    }
}
