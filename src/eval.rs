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

//! The tree-walking evaluator (spec §4.6): special-form dispatch, macro
//! expansion at the call site, closure/primitive/continuation application,
//! and `quasiquote`.
//!
//! Every special form that can appear in tail position -- `if`, `cond`,
//! `when`, `begin`, `let`/`let*`/`letrec`, `and`, `or`, and ordinary
//! application -- hands its tail expression back to `eval`'s own `loop`
//! instead of calling `eval` recursively, so a tail-recursive Scheme
//! procedure runs in constant Rust stack regardless of how many times it
//! calls itself. Non-tail positions (operator and operand subexpressions,
//! `if`'s test, a `let` binding's initializer, ...) do recurse, since their
//! result is needed before the enclosing form can continue.
//!
//! `define-macro` transformers are `TMacro` cells (see `crate::macros`),
//! applied by `tail_apply` the same way as a closure; applying one to a
//! call's unevaluated argument list and looping on the result is what gives
//! macro expansion its fixpoint for free -- `(m1 (m2 x))` keeps re-entering
//! this same dispatch until no step's head names a macro anymore.

use crate::cell::{CellRef, Tag};
use crate::environment;
use crate::error::{MesError, MesResult};
use crate::heap::Heap;
use crate::interpreter::Interpreter;
use crate::macros;
use crate::value::Value;

/// Where a special form or application leads next: either it already has
/// its answer, or it has a tail expression/environment pair that the caller
/// should resume the dispatch loop on rather than recurse into.
enum Step {
    Done(CellRef),
    Tail(CellRef, CellRef),
}

/// Evaluate `expr` in `env`, looping in place on every tail position.
pub fn eval(interp: &mut Interpreter, mut expr: CellRef, mut env: CellRef) -> MesResult<CellRef> {
    loop {
        match Value::of(&interp.heap, expr) {
            Value::Symbol(_) => {
                return match environment::lookup(&interp.heap, env, expr) {
                    Some(var) => Ok(environment::value_of(&interp.heap, var)),
                    None => Err(MesError::unbound_variable(&symbol_name(&interp.heap, expr))),
                };
            }
            Value::Pair(_) => {}
            // Numbers, chars, strings, booleans, vectors, nil, unspecified,
            // eof, and procedure values are all self-evaluating.
            _ => return Ok(expr),
        }

        let head = interp.heap.car(expr);
        let tail = interp.heap.cdr(expr);

        if head == interp.regs.s_quote {
            return Ok(interp.heap.car(tail));
        }
        if head == interp.regs.s_if {
            let test = interp.heap.car(tail);
            let rest = interp.heap.cdr(tail);
            let test_val = eval(interp, test, env)?;
            if Value::of(&interp.heap, test_val).is_truthy() {
                expr = interp.heap.car(rest);
            } else {
                let alt_tail = interp.heap.cdr(rest);
                if interp.is_nil(alt_tail) {
                    return Ok(interp.regs.unspecified);
                }
                expr = interp.heap.car(alt_tail);
            }
            continue;
        }
        if head == interp.regs.s_cond {
            match eval_cond(interp, tail, env)? {
                Step::Done(v) => return Ok(v),
                Step::Tail(e, ev) => {
                    expr = e;
                    env = ev;
                    continue;
                }
            }
        }
        if head == interp.regs.s_when {
            let test = interp.heap.car(tail);
            let body = interp.heap.cdr(tail);
            let test_val = eval(interp, test, env)?;
            if !Value::of(&interp.heap, test_val).is_truthy() {
                return Ok(interp.regs.unspecified);
            }
            match eval_body_tail(interp, body, env)? {
                Step::Done(v) => return Ok(v),
                Step::Tail(e, ev) => {
                    expr = e;
                    env = ev;
                    continue;
                }
            }
        }
        if head == interp.regs.s_begin {
            match eval_body_tail(interp, tail, env)? {
                Step::Done(v) => return Ok(v),
                Step::Tail(e, ev) => {
                    expr = e;
                    env = ev;
                    continue;
                }
            }
        }
        if head == interp.regs.s_lambda {
            return make_closure(interp, tail, env);
        }
        if head == interp.regs.s_define {
            return eval_define(interp, tail, env);
        }
        if head == interp.regs.s_define_macro {
            return eval_define_macro(interp, tail, env);
        }
        if head == interp.regs.s_set {
            return eval_set(interp, tail, env);
        }
        if head == interp.regs.s_let {
            match eval_let(interp, tail, env)? {
                Step::Done(v) => return Ok(v),
                Step::Tail(e, ev) => {
                    expr = e;
                    env = ev;
                    continue;
                }
            }
        }
        if head == interp.regs.s_let_star {
            match eval_let_star(interp, tail, env)? {
                Step::Done(v) => return Ok(v),
                Step::Tail(e, ev) => {
                    expr = e;
                    env = ev;
                    continue;
                }
            }
        }
        if head == interp.regs.s_letrec {
            match eval_letrec(interp, tail, env)? {
                Step::Done(v) => return Ok(v),
                Step::Tail(e, ev) => {
                    expr = e;
                    env = ev;
                    continue;
                }
            }
        }
        if head == interp.regs.s_and {
            match eval_and(interp, tail, env)? {
                Step::Done(v) => return Ok(v),
                Step::Tail(e, ev) => {
                    expr = e;
                    env = ev;
                    continue;
                }
            }
        }
        if head == interp.regs.s_or {
            match eval_or(interp, tail, env)? {
                Step::Done(v) => return Ok(v),
                Step::Tail(e, ev) => {
                    expr = e;
                    env = ev;
                    continue;
                }
            }
        }
        if head == interp.regs.s_quasiquote {
            let template = interp.heap.car(tail);
            return quasi_expand(interp, template, env, 1);
        }
        if head == interp.regs.s_unquote || head == interp.regs.s_unquote_splicing {
            return Err(MesError::scheme("bad-syntax", "unquote outside of quasiquote"));
        }
        if head == interp.regs.s_call_cc {
            let proc_expr = interp.heap.car(tail);
            let proc = eval(interp, proc_expr, env)?;
            return call_cc(interp, proc);
        }
        if head == interp.regs.s_apply {
            let proc_expr = interp.heap.car(tail);
            let proc = eval(interp, proc_expr, env)?;
            interp.regs.g_stack.push(proc);
            let proc_slot = interp.regs.g_stack.len() - 1;
            let args = eval_apply_args(interp, interp.heap.cdr(tail), env)?;
            let proc = interp.regs.g_stack[proc_slot];
            interp.regs.g_stack.pop();
            match tail_apply(interp, proc, &args)? {
                Step::Done(v) => return Ok(v),
                Step::Tail(e, ev) => {
                    expr = e;
                    env = ev;
                    continue;
                }
            }
        }

        if interp.heap.tag(head) == Tag::TSymbol {
            if let Some(transformer) = macros::lookup(&interp.heap, interp.regs.g_macros, head) {
                let raw_args = collect_list(&interp.heap, tail)?;
                expr = apply_procedure(interp, transformer, &raw_args)?;
                continue;
            }
        }

        let proc = eval(interp, head, env)?;
        // `eval_args` can allocate (and so collect) while evaluating each
        // argument; root `proc` on `g_stack` across that call rather than
        // trust the bare local to still name the same object afterward.
        // `env` itself is protected inside `eval_args` (see its doc comment).
        interp.regs.g_stack.push(proc);
        let proc_slot = interp.regs.g_stack.len() - 1;
        let args = eval_args(interp, tail, env)?;
        let proc = interp.regs.g_stack[proc_slot];
        interp.regs.g_stack.pop();
        match tail_apply(interp, proc, &args)? {
            Step::Done(v) => return Ok(v),
            Step::Tail(e, ev) => {
                expr = e;
                env = ev;
                continue;
            }
        }
    }
}

/// Apply `proc` to already-evaluated `args`, running any Scheme-level tail
/// call to completion. This is the entry point `map`/`for-each` and macro
/// expansion use to apply a closure outside of `eval`'s own tail position.
pub fn apply_procedure(interp: &mut Interpreter, proc: CellRef, args: &[CellRef]) -> MesResult<CellRef> {
    match tail_apply(interp, proc, args)? {
        Step::Done(v) => Ok(v),
        Step::Tail(e, ev) => eval(interp, e, ev),
    }
}

/// Dispatch a single application step. Closures resolve to their last body
/// form in tail position rather than being evaluated here, so the caller's
/// `loop` (or `apply_procedure`, for non-tail callers) does the recursion.
fn tail_apply(interp: &mut Interpreter, proc: CellRef, args: &[CellRef]) -> MesResult<Step> {
    match interp.heap.tag(proc) {
        Tag::TClosure | Tag::TMacro => {
            let cell = interp.heap.get(proc);
            let formals_body = CellRef::from(cell.a);
            let captured_env = CellRef::from(cell.b);
            let formals = interp.heap.car(formals_body);
            let body = interp.heap.cdr(formals_body);

            // `formals`, `body`, and every arg must survive `extend`'s
            // allocation, so they ride on g_stack rather than as bare
            // locals across it.
            let base = interp.regs.g_stack.len();
            interp.regs.g_stack.push(formals);
            interp.regs.g_stack.push(body);
            interp.regs.g_stack.extend_from_slice(args);
            let formals_slot = base;
            let body_slot = base + 1;
            let args_base = base + 2;
            let args_len = args.len();

            let new_env = environment::extend(&mut interp.heap, captured_env, interp.regs.nil, &mut interp.regs)?;
            let formals = interp.regs.g_stack[formals_slot];
            let rooted_args = interp.regs.g_stack[args_base..args_base + args_len].to_vec();
            let bound = bind_formals(interp, new_env, formals, &rooted_args);
            let body = interp.regs.g_stack[body_slot];
            interp.regs.g_stack.truncate(base);
            bound?;
            eval_body_tail(interp, body, new_env)
        }
        Tag::TFunction => {
            let idx = interp.heap.get(proc).a as usize;
            let f = interp.primitives.get(idx);
            Ok(Step::Done(f(interp, args)?))
        }
        Tag::TContinuation => {
            let id = interp.heap.get(proc).a as u64;
            let value = args.first().copied().unwrap_or(interp.regs.unspecified);
            Err(MesError::escape(id, value))
        }
        _ => Err(MesError::wrong_type("procedure", Value::of(&interp.heap, proc).type_name())),
    }
}

/// Bind `args` to `formals` in `env`'s (already extended, empty) innermost
/// frame. `formals` is `(a b c)`, an improper `(a b . rest)`, or a single
/// symbol that soaks up every argument as a list.
fn bind_formals(interp: &mut Interpreter, env: CellRef, formals: CellRef, args: &[CellRef]) -> MesResult<()> {
    // `env`, the formals cursor, and every remaining arg must survive each
    // allocating `define`/`list_of` call, so they all ride on g_stack
    // instead of being held as bare locals across the loop.
    let base = interp.regs.g_stack.len();
    interp.regs.g_stack.push(env);
    interp.regs.g_stack.push(formals);
    interp.regs.g_stack.extend_from_slice(args);
    let env_slot = base;
    let f_slot = base + 1;
    let args_base = base + 2;
    let args_len = args.len();

    let mut i = 0usize;
    let result = loop {
        let f = interp.regs.g_stack[f_slot];
        match Value::of(&interp.heap, f) {
            Value::Nil => {
                if i != args_len {
                    break Err(MesError::wrong_arity("#<procedure>", &i.to_string(), args_len));
                }
                break Ok(());
            }
            Value::Symbol(_) => {
                let rest_args = interp.regs.g_stack[args_base + i..args_base + args_len].to_vec();
                let rest = match interp.list_of(&rest_args) {
                    Ok(r) => r,
                    Err(e) => break Err(e),
                };
                let env = interp.regs.g_stack[env_slot];
                let f = interp.regs.g_stack[f_slot];
                match environment::define(&mut interp.heap, env, f, rest, &mut interp.regs) {
                    Ok(_) => break Ok(()),
                    Err(e) => break Err(e),
                }
            }
            Value::Pair(_) => {
                if i >= args_len {
                    break Err(MesError::wrong_arity("#<procedure>", &format!("at least {}", i + 1), args_len));
                }
                let name = interp.heap.car(f);
                let arg = interp.regs.g_stack[args_base + i];
                let env = interp.regs.g_stack[env_slot];
                match environment::define(&mut interp.heap, env, name, arg, &mut interp.regs) {
                    Ok(_) => {
                        let f_next = interp.heap.cdr(interp.regs.g_stack[f_slot]);
                        interp.regs.g_stack[f_slot] = f_next;
                        i += 1;
                    }
                    Err(e) => break Err(e),
                }
            }
            _ => break Err(MesError::scheme("bad-syntax", "malformed lambda list")),
        }
    };
    interp.regs.g_stack.truncate(base);
    result
}

/// Evaluate each element of a call's (proper-list) argument forms, left to
/// right. `env` and the remaining-forms cursor are rooted on `g_stack`
/// alongside the growing result the same way `list_of` roots its
/// accumulator, since evaluating argument `k` can collect: that would
/// otherwise leave `env`, the not-yet-walked tail of `exprs`, and arguments
/// `0..k` all dangling in bare locals/a bare `Vec`.
fn eval_args(interp: &mut Interpreter, exprs: CellRef, env: CellRef) -> MesResult<Vec<CellRef>> {
    let base = interp.regs.g_stack.len();
    interp.regs.g_stack.push(env);
    interp.regs.g_stack.push(exprs);
    let env_slot = base;
    let exprs_slot = base + 1;
    let results_base = base + 2;
    loop {
        let cur = interp.regs.g_stack[exprs_slot];
        if interp.is_nil(cur) {
            break;
        }
        if interp.heap.tag(cur) != Tag::TPair {
            interp.regs.g_stack.truncate(base);
            return Err(MesError::scheme("bad-syntax", "improper argument list"));
        }
        let item_expr = interp.heap.car(cur);
        interp.regs.g_stack[exprs_slot] = interp.heap.cdr(cur);
        let value = eval(interp, item_expr, interp.regs.g_stack[env_slot])?;
        interp.regs.g_stack.push(value);
    }
    let args = interp.regs.g_stack[results_base..].to_vec();
    interp.regs.g_stack.truncate(base);
    Ok(args)
}

/// Like `eval_args`, but for `(apply proc arg1 ... args)`: every expression
/// but the last evaluates to a single argument, and the last evaluates to a
/// list that is spread onto the end of the argument vector. `env` and the
/// remaining-forms cursor are rooted the same way `eval_args` roots them.
fn eval_apply_args(interp: &mut Interpreter, exprs: CellRef, env: CellRef) -> MesResult<Vec<CellRef>> {
    let base = interp.regs.g_stack.len();
    if interp.is_nil(exprs) {
        return Ok(Vec::new());
    }
    interp.regs.g_stack.push(env);
    interp.regs.g_stack.push(exprs);
    let env_slot = base;
    let exprs_slot = base + 1;
    let results_base = base + 2;
    loop {
        let cur = interp.regs.g_stack[exprs_slot];
        let item_expr = interp.heap.car(cur);
        interp.regs.g_stack[exprs_slot] = interp.heap.cdr(cur);
        let value = eval(interp, item_expr, interp.regs.g_stack[env_slot])?;
        if interp.is_nil(interp.regs.g_stack[exprs_slot]) {
            let spread = collect_list(&interp.heap, value)?;
            interp.regs.g_stack.extend(spread);
            break;
        }
        interp.regs.g_stack.push(value);
    }
    let args = interp.regs.g_stack[results_base..].to_vec();
    interp.regs.g_stack.truncate(base);
    Ok(args)
}

fn eval_cond(interp: &mut Interpreter, clauses: CellRef, env: CellRef) -> MesResult<Step> {
    // `env` is read again below after `test`'s (possibly allocating) eval,
    // so it is rooted for this call's whole lifetime rather than trusted as
    // a bare local.
    interp.regs.g_stack.push(env);
    let env_slot = interp.regs.g_stack.len() - 1;
    let result = eval_cond_rooted(interp, clauses, env_slot);
    interp.regs.g_stack.pop();
    result
}

fn eval_cond_rooted(interp: &mut Interpreter, clauses: CellRef, env_slot: usize) -> MesResult<Step> {
    let mut cur = clauses;
    loop {
        if interp.is_nil(cur) {
            return Ok(Step::Done(interp.regs.unspecified));
        }
        let clause = interp.heap.car(cur);
        let test = interp.heap.car(clause);
        let body = interp.heap.cdr(clause);
        let env = interp.regs.g_stack[env_slot];

        if test == interp.regs.s_else {
            return eval_body_tail(interp, body, env);
        }

        let test_val = eval(interp, test, env)?;
        if Value::of(&interp.heap, test_val).is_truthy() {
            if interp.is_nil(body) {
                return Ok(Step::Done(test_val));
            }
            let first = interp.heap.car(body);
            if first == interp.regs.s_arrow {
                // `test_val` was computed before `proc`; root it across the
                // `proc_expr` eval so a collection there can't strand it.
                interp.regs.g_stack.push(test_val);
                let test_slot = interp.regs.g_stack.len() - 1;
                let proc_expr = interp.heap.car(interp.heap.cdr(body));
                let env = interp.regs.g_stack[env_slot];
                let proc = eval(interp, proc_expr, env)?;
                let test_val = interp.regs.g_stack[test_slot];
                interp.regs.g_stack.pop();
                return Ok(Step::Done(apply_procedure(interp, proc, &[test_val])?));
            }
            let env = interp.regs.g_stack[env_slot];
            return eval_body_tail(interp, body, env);
        }
        cur = interp.heap.cdr(cur);
    }
}

/// Evaluate every form in `body` but the last for effect, and hand the last
/// back as a tail position. `env` is rooted across the loop since each
/// non-tail form's eval can collect and strand the bare local otherwise.
fn eval_body_tail(interp: &mut Interpreter, body: CellRef, env: CellRef) -> MesResult<Step> {
    if interp.is_nil(body) {
        return Ok(Step::Done(interp.regs.unspecified));
    }
    interp.regs.g_stack.push(env);
    let env_slot = interp.regs.g_stack.len() - 1;
    let mut cur = body;
    let result = loop {
        let next = interp.heap.cdr(cur);
        if interp.is_nil(next) {
            break Ok(Step::Tail(interp.heap.car(cur), interp.regs.g_stack[env_slot]));
        }
        let env = interp.regs.g_stack[env_slot];
        if let Err(e) = eval(interp, interp.heap.car(cur), env) {
            break Err(e);
        }
        cur = next;
    };
    interp.regs.g_stack.pop();
    result
}

fn make_closure(interp: &mut Interpreter, tail: CellRef, env: CellRef) -> MesResult<CellRef> {
    let formals = interp.heap.car(tail);
    let body = interp.heap.cdr(tail);
    interp.regs.g_stack.push(env);
    let env_slot = interp.regs.g_stack.len() - 1;
    let formals_body = interp.heap.alloc_cell(Tag::TPair, formals.into(), body.into(), &mut interp.regs)?;
    let env = interp.regs.g_stack[env_slot];
    interp.regs.g_stack.pop();
    interp.heap.alloc_cell(Tag::TClosure, formals_body.into(), env.into(), &mut interp.regs)
}

fn eval_define(interp: &mut Interpreter, tail: CellRef, env: CellRef) -> MesResult<CellRef> {
    let target = interp.heap.car(tail);
    let rest = interp.heap.cdr(tail);
    interp.regs.g_stack.push(env);
    let env_slot = interp.regs.g_stack.len() - 1;
    match Value::of(&interp.heap, target) {
        Value::Symbol(_) => {
            let value = if interp.is_nil(rest) {
                interp.regs.unspecified
            } else {
                eval(interp, interp.heap.car(rest), env)?
            };
            let env = interp.regs.g_stack[env_slot];
            environment::define(&mut interp.heap, env, target, value, &mut interp.regs)?;
        }
        Value::Pair(_) => {
            // (define (name . formals) body...)
            let name = interp.heap.car(target);
            let formals = interp.heap.cdr(target);
            let formals_body = interp.heap.alloc_cell(Tag::TPair, formals.into(), rest.into(), &mut interp.regs)?;
            let env = interp.regs.g_stack[env_slot];
            let closure = interp.heap.alloc_cell(Tag::TClosure, formals_body.into(), env.into(), &mut interp.regs)?;
            let env = interp.regs.g_stack[env_slot];
            environment::define(&mut interp.heap, env, name, closure, &mut interp.regs)?;
        }
        _ => {
            interp.regs.g_stack.pop();
            return Err(MesError::scheme("bad-syntax", "define expects a symbol or (name . formals)"));
        }
    }
    interp.regs.g_stack.pop();
    Ok(interp.regs.unspecified)
}

fn eval_define_macro(interp: &mut Interpreter, tail: CellRef, env: CellRef) -> MesResult<CellRef> {
    let target = interp.heap.car(tail);
    let rest = interp.heap.cdr(tail);
    if interp.heap.tag(target) != Tag::TPair {
        return Err(MesError::scheme("bad-syntax", "define-macro expects (name . formals)"));
    }
    let name = interp.heap.car(target);
    let formals = interp.heap.cdr(target);
    interp.regs.g_stack.push(env);
    let env_slot = interp.regs.g_stack.len() - 1;
    let formals_body = interp.heap.alloc_cell(Tag::TPair, formals.into(), rest.into(), &mut interp.regs)?;
    // A transformer is shaped like a closure (same car/cdr layout) but
    // tagged `TMacro` so `g_macros` entries are distinguishable from
    // ordinary procedures; `tail_apply` applies it the same way, to the
    // call's raw, unevaluated argument forms.
    let env = interp.regs.g_stack[env_slot];
    let transformer = interp.heap.alloc_cell(Tag::TMacro, formals_body.into(), env.into(), &mut interp.regs)?;
    interp.regs.g_stack.pop();
    let new_g_macros = macros::install(&mut interp.heap, interp.regs.g_macros, name, transformer, &mut interp.regs)?;
    interp.regs.g_macros = new_g_macros;
    Ok(interp.regs.unspecified)
}

fn eval_set(interp: &mut Interpreter, tail: CellRef, env: CellRef) -> MesResult<CellRef> {
    let name = interp.heap.car(tail);
    let value_expr = interp.heap.car(interp.heap.cdr(tail));
    interp.regs.g_stack.push(env);
    let env_slot = interp.regs.g_stack.len() - 1;
    let value = eval(interp, value_expr, env)?;
    let env = interp.regs.g_stack[env_slot];
    interp.regs.g_stack.pop();
    let name_str = symbol_name(&interp.heap, name);
    environment::set(&mut interp.heap, env, name, value, &name_str)?;
    Ok(interp.regs.unspecified)
}

fn eval_and(interp: &mut Interpreter, tail: CellRef, env: CellRef) -> MesResult<Step> {
    if interp.is_nil(tail) {
        return Ok(Step::Done(interp.regs.t));
    }
    // `env` is reused across every non-tail form's eval below, each of
    // which can collect, so it is rooted for the loop's whole lifetime.
    interp.regs.g_stack.push(env);
    let env_slot = interp.regs.g_stack.len() - 1;
    let mut cur = tail;
    let result = loop {
        let next = interp.heap.cdr(cur);
        if interp.is_nil(next) {
            break Ok(Step::Tail(interp.heap.car(cur), interp.regs.g_stack[env_slot]));
        }
        let env = interp.regs.g_stack[env_slot];
        match eval(interp, interp.heap.car(cur), env) {
            Ok(value) if !Value::of(&interp.heap, value).is_truthy() => break Ok(Step::Done(value)),
            Ok(_) => cur = next,
            Err(e) => break Err(e),
        }
    };
    interp.regs.g_stack.pop();
    result
}

fn eval_or(interp: &mut Interpreter, tail: CellRef, env: CellRef) -> MesResult<Step> {
    if interp.is_nil(tail) {
        return Ok(Step::Done(interp.regs.f));
    }
    interp.regs.g_stack.push(env);
    let env_slot = interp.regs.g_stack.len() - 1;
    let mut cur = tail;
    let result = loop {
        let next = interp.heap.cdr(cur);
        if interp.is_nil(next) {
            break Ok(Step::Tail(interp.heap.car(cur), interp.regs.g_stack[env_slot]));
        }
        let env = interp.regs.g_stack[env_slot];
        match eval(interp, interp.heap.car(cur), env) {
            Ok(value) if Value::of(&interp.heap, value).is_truthy() => break Ok(Step::Done(value)),
            Ok(_) => cur = next,
            Err(e) => break Err(e),
        }
    };
    interp.regs.g_stack.pop();
    result
}

/// Collect a `let`/`let*`/`letrec` binding list `((name init) ...)` into
/// pairs. Each binding must supply exactly a name and an initializer form.
fn collect_bindings(interp: &Interpreter, mut bindings: CellRef) -> MesResult<Vec<(CellRef, CellRef)>> {
    let mut out = Vec::new();
    while !interp.is_nil(bindings) {
        if interp.heap.tag(bindings) != Tag::TPair {
            return Err(MesError::scheme("bad-syntax", "malformed bindings"));
        }
        let binding = interp.heap.car(bindings);
        let name = interp.heap.car(binding);
        let init = interp.heap.car(interp.heap.cdr(binding));
        out.push((name, init));
        bindings = interp.heap.cdr(bindings);
    }
    Ok(out)
}

fn eval_let(interp: &mut Interpreter, tail: CellRef, env: CellRef) -> MesResult<Step> {
    let first = interp.heap.car(tail);
    if interp.heap.tag(first) == Tag::TSymbol {
        return eval_named_let(interp, first, interp.heap.cdr(tail), env);
    }

    let bindings = collect_bindings(interp, first)?;
    let body = interp.heap.cdr(tail);

    // `env`, the growing binding values, and (once computed) `new_env` are
    // all read again after allocating calls -- each binding's eval, the
    // frame `extend`, and each `define` below -- so all of them are rooted
    // on `g_stack` for the whole binding phase rather than trusted as bare
    // locals/a bare `Vec`.
    let outer_base = interp.regs.g_stack.len();
    interp.regs.g_stack.push(env);
    let env_slot = outer_base;
    let values_base = outer_base + 1;
    for &(_, init) in &bindings {
        let env = interp.regs.g_stack[env_slot];
        let value = eval(interp, init, env)?;
        interp.regs.g_stack.push(value);
    }
    let env = interp.regs.g_stack[env_slot];
    let new_env = environment::extend(&mut interp.heap, env, interp.regs.nil, &mut interp.regs)?;
    interp.regs.g_stack.push(new_env);
    let new_env_slot = interp.regs.g_stack.len() - 1;
    for (i, &(name, _)) in bindings.iter().enumerate() {
        let value = interp.regs.g_stack[values_base + i];
        let new_env = interp.regs.g_stack[new_env_slot];
        environment::define(&mut interp.heap, new_env, name, value, &mut interp.regs)?;
    }
    let new_env = interp.regs.g_stack[new_env_slot];
    interp.regs.g_stack.truncate(outer_base);
    eval_body_tail(interp, body, new_env)
}

/// `(let loop ((n init) ...) body...)`: binds a self-referential closure
/// named `loop` in a frame that also holds the initial bindings, then
/// applies it -- so recursive calls to `loop` inside `body` are ordinary
/// tail calls.
fn eval_named_let(interp: &mut Interpreter, loop_name: CellRef, rest: CellRef, env: CellRef) -> MesResult<Step> {
    let bindings_list = interp.heap.car(rest);
    let body = interp.heap.cdr(rest);
    let bindings = collect_bindings(interp, bindings_list)?;

    // `env` and the growing binding values are rooted across the loop the
    // same way `eval_let` roots them; `loop_env` is rooted separately
    // below since several more allocations follow before it is dereferenced
    // a final time in `define`.
    let outer_base = interp.regs.g_stack.len();
    interp.regs.g_stack.push(env);
    let env_slot = outer_base;
    let values_base = outer_base + 1;
    for &(_, init) in &bindings {
        let env = interp.regs.g_stack[env_slot];
        let value = eval(interp, init, env)?;
        interp.regs.g_stack.push(value);
    }
    let values_len = bindings.len();

    let names: Vec<CellRef> = bindings.iter().map(|&(n, _)| n).collect();
    let params_list = interp.list_of(&names)?;

    // `list_of` above can collect, so `env` is re-read from its slot rather
    // than reused from before that call.
    let env = interp.regs.g_stack[env_slot];
    let loop_env = environment::extend(&mut interp.heap, env, interp.regs.nil, &mut interp.regs)?;
    interp.regs.g_stack.push(loop_env);
    let loop_env_slot = interp.regs.g_stack.len() - 1;
    let formals_body = interp.heap.alloc_cell(Tag::TPair, params_list.into(), body.into(), &mut interp.regs)?;
    let loop_env = interp.regs.g_stack[loop_env_slot];
    let closure = interp.heap.alloc_cell(Tag::TClosure, formals_body.into(), loop_env.into(), &mut interp.regs)?;
    let loop_env = interp.regs.g_stack[loop_env_slot];
    environment::define(&mut interp.heap, loop_env, loop_name, closure, &mut interp.regs)?;

    let values = interp.regs.g_stack[values_base..values_base + values_len].to_vec();
    interp.regs.g_stack.truncate(outer_base);
    tail_apply(interp, closure, &values)
}

fn eval_let_star(interp: &mut Interpreter, tail: CellRef, env: CellRef) -> MesResult<Step> {
    let bindings = collect_bindings(interp, interp.heap.car(tail))?;
    let body = interp.heap.cdr(tail);

    // Each binding's init is evaluated in the same growing `new_env`, and
    // each `define` extends it further -- both allocate, so `new_env` is
    // rooted across the whole loop rather than trusted as a bare local.
    let new_env = environment::extend(&mut interp.heap, env, interp.regs.nil, &mut interp.regs)?;
    interp.regs.g_stack.push(new_env);
    let new_env_slot = interp.regs.g_stack.len() - 1;
    for (name, init) in bindings {
        let new_env = interp.regs.g_stack[new_env_slot];
        let value = eval(interp, init, new_env)?;
        let new_env = interp.regs.g_stack[new_env_slot];
        environment::define(&mut interp.heap, new_env, name, value, &mut interp.regs)?;
    }
    let new_env = interp.regs.g_stack[new_env_slot];
    interp.regs.g_stack.pop();
    eval_body_tail(interp, body, new_env)
}

fn eval_letrec(interp: &mut Interpreter, tail: CellRef, env: CellRef) -> MesResult<Step> {
    let bindings = collect_bindings(interp, interp.heap.car(tail))?;
    let body = interp.heap.cdr(tail);

    // `new_env` is rooted across both binding loops for the same reason
    // `eval_let_star` roots it.
    let new_env = environment::extend(&mut interp.heap, env, interp.regs.nil, &mut interp.regs)?;
    interp.regs.g_stack.push(new_env);
    let new_env_slot = interp.regs.g_stack.len() - 1;
    for &(name, _) in &bindings {
        let new_env = interp.regs.g_stack[new_env_slot];
        environment::define(&mut interp.heap, new_env, name, interp.regs.unspecified, &mut interp.regs)?;
    }
    for (name, init) in bindings {
        let new_env = interp.regs.g_stack[new_env_slot];
        let value = eval(interp, init, new_env)?;
        let new_env = interp.regs.g_stack[new_env_slot];
        environment::define(&mut interp.heap, new_env, name, value, &mut interp.regs)?;
    }
    let new_env = interp.regs.g_stack[new_env_slot];
    interp.regs.g_stack.pop();
    eval_body_tail(interp, body, new_env)
}

/// `call-with-current-continuation`: mint a fresh escape id, wrap it in a
/// `TContinuation` value, and apply `proc` to it. Invoking the continuation
/// raises `MesError::Escape`, which only this frame's `id` catches -- this
/// implements escape-only (upward) continuations, not full re-entrant
/// call/cc (spec §4.6, §9).
fn call_cc(interp: &mut Interpreter, proc: CellRef) -> MesResult<CellRef> {
    let id = interp.next_cont_id;
    interp.next_cont_id += 1;
    // Root `proc` across the continuation cell's allocation, which can
    // collect before `proc` is dereferenced below.
    interp.regs.g_stack.push(proc);
    let proc_slot = interp.regs.g_stack.len() - 1;
    let cont = interp
        .heap
        .alloc_cell(Tag::TContinuation, id as i64, CellRef::SENTINEL.into(), &mut interp.regs)?;
    let proc = interp.regs.g_stack[proc_slot];
    interp.regs.g_stack.pop();
    match apply_procedure(interp, proc, &[cont]) {
        Ok(value) => Ok(value),
        Err(MesError::Escape { id: escaped_id, value }) if escaped_id == id => Ok(value),
        Err(other) => Err(other),
    }
}

/// Expand a quasiquoted `template` at the given nesting `depth` (starts at
/// 1 for the outermost `quasiquote`). `unquote`/`unquote-splicing` at depth
/// 1 evaluate in `env`; at greater depth they are copied through with the
/// nesting reduced, so nested quasiquotes are left for their own
/// `quasiquote` to expand. Vector templates expand element-wise; splicing
/// inside a vector template is not supported.
fn quasi_expand(interp: &mut Interpreter, template: CellRef, env: CellRef, depth: u32) -> MesResult<CellRef> {
    match interp.heap.tag(template) {
        Tag::TPair => {
            let head = interp.heap.car(template);

            if head == interp.regs.s_unquote {
                let inner = interp.heap.car(interp.heap.cdr(template));
                if depth == 1 {
                    return eval(interp, inner, env);
                }
                let expanded = quasi_expand(interp, inner, env, depth - 1)?;
                return rebuild_tagged(interp, interp.regs.s_unquote, expanded);
            }
            if head == interp.regs.s_quasiquote {
                let inner = interp.heap.car(interp.heap.cdr(template));
                let expanded = quasi_expand(interp, inner, env, depth + 1)?;
                return rebuild_tagged(interp, interp.regs.s_quasiquote, expanded);
            }
            if interp.heap.tag(head) == Tag::TPair {
                let inner_head = interp.heap.car(head);
                if inner_head == interp.regs.s_unquote_splicing && depth == 1 {
                    let spliced_expr = interp.heap.car(interp.heap.cdr(head));
                    let spliced = eval(interp, spliced_expr, env)?;
                    let rest = quasi_expand(interp, interp.heap.cdr(template), env, depth)?;
                    return append_list_onto(interp, spliced, rest);
                }
            }

            let car_part = quasi_expand(interp, head, env, depth)?;
            let cdr_part = quasi_expand(interp, interp.heap.cdr(template), env, depth)?;
            interp.heap.alloc_cell(Tag::TPair, car_part.into(), cdr_part.into(), &mut interp.regs)
        }
        Tag::TVector => {
            let len = interp.heap.vector_len(template);
            let vec_ref = interp.heap.alloc_vector(Tag::TVector, len, interp.regs.nil, &mut interp.regs)?;
            interp.regs.g_stack.push(vec_ref);
            let slot = interp.regs.g_stack.len() - 1;
            for i in 0..len {
                let elem = interp.heap.vector_ref(template, i);
                let expanded = quasi_expand(interp, elem, env, depth)?;
                let current = interp.regs.g_stack[slot];
                interp.heap.vector_set(current, i, expanded);
            }
            let result = interp.regs.g_stack[slot];
            interp.regs.g_stack.pop();
            Ok(result)
        }
        _ => Ok(template),
    }
}

fn rebuild_tagged(interp: &mut Interpreter, tag_sym: CellRef, inner: CellRef) -> MesResult<CellRef> {
    let inner_pair = interp.heap.alloc_cell(Tag::TPair, inner.into(), interp.regs.nil.into(), &mut interp.regs)?;
    interp.heap.alloc_cell(Tag::TPair, tag_sym.into(), inner_pair.into(), &mut interp.regs)
}

/// Prepend every element of (proper list) `list` onto `tail`, in order.
fn append_list_onto(interp: &mut Interpreter, list: CellRef, tail: CellRef) -> MesResult<CellRef> {
    let items = collect_list(&interp.heap, list)?;
    interp.regs.g_stack.push(tail);
    let slot = interp.regs.g_stack.len() - 1;
    for &item in items.iter().rev() {
        let cur_tail = interp.regs.g_stack[slot];
        let cell = interp.heap.alloc_cell(Tag::TPair, item.into(), cur_tail.into(), &mut interp.regs)?;
        interp.regs.g_stack[slot] = cell;
    }
    let result = interp.regs.g_stack[slot];
    interp.regs.g_stack.pop();
    Ok(result)
}

/// Read a proper list's elements without evaluating anything. Used for a
/// macro call's raw argument forms and for the spread tail of `apply`.
fn collect_list(heap: &Heap, mut list: CellRef) -> MesResult<Vec<CellRef>> {
    let mut out = Vec::new();
    while !is_nil(heap, list) {
        if heap.tag(list) != Tag::TPair {
            return Err(MesError::wrong_type("list", "improper list"));
        }
        out.push(heap.car(list));
        list = heap.cdr(list);
    }
    Ok(out)
}

fn is_nil(heap: &Heap, r: CellRef) -> bool {
    heap.tag(r) == Tag::TSpecial && heap.get(r).a == crate::value::special::NIL
}

fn symbol_name(heap: &Heap, sym: CellRef) -> String {
    String::from_utf8_lossy(&heap.bytes_of(sym)).into_owned()
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
    fn self_evaluating_number_evaluates_to_itself() {
        let mut interp = fresh();
        let env = interp.regs.g_env;
        let n = num(&mut interp, 42);
        let result = eval(&mut interp, n, env).unwrap();
        assert_eq!(Value::of(&interp.heap, result), Value::Number(42));
    }

    #[test]
    fn if_selects_consequent_or_alternate() {
        let mut interp = fresh();
        let env = interp.regs.g_env;
        let (t, f) = (interp.regs.t, interp.regs.f);
        let one = num(&mut interp, 1);
        let two = num(&mut interp, 2);
        let if_sym = interp.regs.s_if;

        let expr_true = list(&mut interp, &[if_sym, t, one, two]);
        let result = eval(&mut interp, expr_true, env).unwrap();
        assert_eq!(Value::of(&interp.heap, result), Value::Number(1));

        let expr_false = list(&mut interp, &[if_sym, f, one, two]);
        let result = eval(&mut interp, expr_false, env).unwrap();
        assert_eq!(Value::of(&interp.heap, result), Value::Number(2));
    }

    #[test]
    fn if_with_no_alternate_and_false_test_is_unspecified() {
        let mut interp = fresh();
        let env = interp.regs.g_env;
        let f = interp.regs.f;
        let one = num(&mut interp, 1);
        let expr = list(&mut interp, &[interp.regs.s_if, f, one]);
        let result = eval(&mut interp, expr, env).unwrap();
        assert_eq!(Value::of(&interp.heap, result), Value::Unspecified);
    }

    #[test]
    fn defined_lambda_applies_to_arguments() {
        let mut interp = fresh();
        let env = interp.regs.g_env;
        let name = sym(&mut interp, b"my-add");
        let x = sym(&mut interp, b"x");
        let y = sym(&mut interp, b"y");
        let plus = sym(&mut interp, b"+");

        let formals = list(&mut interp, &[x, y]);
        let body_call = list(&mut interp, &[plus, x, y]);
        let lambda_expr = list(&mut interp, &[interp.regs.s_lambda, formals, body_call]);
        let define_expr = list(&mut interp, &[interp.regs.s_define, name, lambda_expr]);
        eval(&mut interp, define_expr, env).unwrap();

        let three = num(&mut interp, 3);
        let four = num(&mut interp, 4);
        let call_expr = list(&mut interp, &[name, three, four]);
        let result = eval(&mut interp, call_expr, env).unwrap();
        assert_eq!(Value::of(&interp.heap, result), Value::Number(7));
    }

    #[test]
    fn define_with_procedure_shorthand_binds_a_callable() {
        let mut interp = fresh();
        let env = interp.regs.g_env;
        let name = sym(&mut interp, b"square");
        let x = sym(&mut interp, b"x");
        let star = sym(&mut interp, b"*");
        let target = list(&mut interp, &[name, x]);
        let body = list(&mut interp, &[star, x, x]);
        let define_expr = list(&mut interp, &[interp.regs.s_define, target, body]);
        eval(&mut interp, define_expr, env).unwrap();

        let five = num(&mut interp, 5);
        let call_expr = list(&mut interp, &[name, five]);
        let result = eval(&mut interp, call_expr, env).unwrap();
        assert_eq!(Value::of(&interp.heap, result), Value::Number(25));
    }

    #[test]
    fn define_macro_expands_before_application() {
        let mut interp = fresh();
        let env = interp.regs.g_env;
        let name = sym(&mut interp, b"answer");
        let forty_two = num(&mut interp, 42);
        let quoted = list(&mut interp, &[interp.regs.s_quote, forty_two]);
        let target = list(&mut interp, &[name]);
        let define_macro_expr = list(&mut interp, &[interp.regs.s_define_macro, target, quoted]);
        eval(&mut interp, define_macro_expr, env).unwrap();

        let call_expr = list(&mut interp, &[name]);
        let result = eval(&mut interp, call_expr, env).unwrap();
        assert_eq!(Value::of(&interp.heap, result), Value::Number(42));
    }

    #[test]
    fn call_cc_escapes_early_with_given_value() {
        let mut interp = fresh();
        let env = interp.regs.g_env;
        let k = sym(&mut interp, b"k");
        let formals = list(&mut interp, &[k]);
        let ninety_nine = num(&mut interp, 99);
        let call_k = list(&mut interp, &[k, ninety_nine]);
        let one = num(&mut interp, 1);
        let lambda_expr = list(&mut interp, &[interp.regs.s_lambda, formals, call_k, one]);
        let call_cc_expr = list(&mut interp, &[interp.regs.s_call_cc, lambda_expr]);

        let result = eval(&mut interp, call_cc_expr, env).unwrap();
        assert_eq!(Value::of(&interp.heap, result), Value::Number(99));
    }

    #[test]
    fn and_short_circuits_on_false() {
        let mut interp = fresh();
        let env = interp.regs.g_env;
        let f = interp.regs.f;
        let one = num(&mut interp, 1);
        let expr = list(&mut interp, &[interp.regs.s_and, f, one]);
        let result = eval(&mut interp, expr, env).unwrap();
        assert_eq!(result, f);
    }

    #[test]
    fn or_returns_first_truthy_value() {
        let mut interp = fresh();
        let env = interp.regs.g_env;
        let f = interp.regs.f;
        let seven = num(&mut interp, 7);
        let expr = list(&mut interp, &[interp.regs.s_or, f, seven]);
        let result = eval(&mut interp, expr, env).unwrap();
        assert_eq!(Value::of(&interp.heap, result), Value::Number(7));
    }

    #[test]
    fn let_binds_locals_and_evaluates_body() {
        let mut interp = fresh();
        let env = interp.regs.g_env;
        let x = sym(&mut interp, b"x");
        let one = num(&mut interp, 1);
        let binding = list(&mut interp, &[x, one]);
        let bindings = list(&mut interp, &[binding]);
        let plus = sym(&mut interp, b"+");
        let body = list(&mut interp, &[plus, x, x]);
        let let_expr = list(&mut interp, &[interp.regs.s_let, bindings, body]);
        let result = eval(&mut interp, let_expr, env).unwrap();
        assert_eq!(Value::of(&interp.heap, result), Value::Number(2));
    }

    #[test]
    fn letrec_allows_mutual_self_reference() {
        let mut interp = fresh();
        let env = interp.regs.g_env;
        // (letrec ((const5 (lambda () 5))) (const5))
        let const5 = sym(&mut interp, b"const5");
        let five = num(&mut interp, 5);
        let lambda_expr = list(&mut interp, &[interp.regs.s_lambda, interp.regs.nil, five]);
        let binding = list(&mut interp, &[const5, lambda_expr]);
        let bindings = list(&mut interp, &[binding]);
        let call = list(&mut interp, &[const5]);
        let letrec_expr = list(&mut interp, &[interp.regs.s_letrec, bindings, call]);
        let result = eval(&mut interp, letrec_expr, env).unwrap();
        assert_eq!(Value::of(&interp.heap, result), Value::Number(5));
    }

    #[test]
    fn quasiquote_splices_in_unquoted_values() {
        let mut interp = fresh();
        let env = interp.regs.g_env;
        let a = sym(&mut interp, b"a");
        let five = num(&mut interp, 5);
        let define_expr = list(&mut interp, &[interp.regs.s_define, a, five]);
        eval(&mut interp, define_expr, env).unwrap();

        let unq = list(&mut interp, &[interp.regs.s_unquote, a]);
        let one = num(&mut interp, 1);
        let template = list(&mut interp, &[one, unq]);
        let qq_expr = list(&mut interp, &[interp.regs.s_quasiquote, template]);
        let result = eval(&mut interp, qq_expr, env).unwrap();

        assert_eq!(Value::of(&interp.heap, interp.heap.car(result)), Value::Number(1));
        let second = interp.heap.car(interp.heap.cdr(result));
        assert_eq!(Value::of(&interp.heap, second), Value::Number(5));
    }

    #[test]
    fn named_let_tail_recursion_handles_large_counts() {
        let mut interp = fresh();
        let env = interp.regs.g_env;
        // (let loop ((n 100000) (acc 0)) (if (= n 0) acc (loop (- n 1) (+ acc 1))))
        let loop_sym = sym(&mut interp, b"loop");
        let n = sym(&mut interp, b"n");
        let acc = sym(&mut interp, b"acc");
        let n0 = num(&mut interp, 100_000);
        let acc0 = num(&mut interp, 0);
        let binding_n = list(&mut interp, &[n, n0]);
        let binding_acc = list(&mut interp, &[acc, acc0]);
        let bindings = list(&mut interp, &[binding_n, binding_acc]);

        let eq_sym = sym(&mut interp, b"=");
        let zero = num(&mut interp, 0);
        let test = list(&mut interp, &[eq_sym, n, zero]);

        let minus_sym = sym(&mut interp, b"-");
        let plus_sym = sym(&mut interp, b"+");
        let one = num(&mut interp, 1);
        let next_n = list(&mut interp, &[minus_sym, n, one]);
        let next_acc = list(&mut interp, &[plus_sym, acc, one]);
        let recur = list(&mut interp, &[loop_sym, next_n, next_acc]);

        let if_expr = list(&mut interp, &[interp.regs.s_if, test, acc, recur]);
        let let_expr = list(&mut interp, &[interp.regs.s_let, loop_sym, bindings, if_expr]);

        let result = eval(&mut interp, let_expr, env).unwrap();
        assert_eq!(Value::of(&interp.heap, result), Value::Number(100_000));
    }

    #[test]
    fn unbound_variable_is_a_scheme_error() {
        let mut interp = fresh();
        let env = interp.regs.g_env;
        let ghost = sym(&mut interp, b"totally-unbound");
        let err = eval(&mut interp, ghost, env).unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn applying_a_non_procedure_is_a_wrong_type_error() {
        let mut interp = fresh();
        let env = interp.regs.g_env;
        let five = num(&mut interp, 5);
        let expr = list(&mut interp, &[five, five]);
        let err = eval(&mut interp, expr, env).unwrap_err();
        assert!(!err.is_fatal());
    }
}
