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

//! The primitive subroutine surface: every built-in bound directly to a
//! native Rust function rather than defined in Scheme (spec §4.8).
//!
//! Each primitive is a plain `fn(&mut Interpreter, &[CellRef]) -> MesResult<CellRef>`.
//! `install_all` interns each primitive's name, records the function in
//! `PrimitiveTable`, and `define`s a `TFunction` cell (whose `a` word is the
//! table index -- see `heap.rs`'s scan loop, which never traces `TFunction`,
//! so that index has to stay a plain integer, never a `CellRef`) in the
//! global environment. `eval` looks the function back up by that index when
//! it invokes a `TFunction` value.

use crate::cell::{CellRef, Tag};
use crate::error::{MesError, MesResult};
use crate::heap::Heap;
use crate::interpreter::Interpreter;
use crate::value::{special, Value};

pub type NativeFn = fn(&mut Interpreter, &[CellRef]) -> MesResult<CellRef>;

/// The native-side table backing every `TFunction` cell's `a` word.
pub struct PrimitiveTable {
    fns: Vec<NativeFn>,
}

impl PrimitiveTable {
    pub fn new() -> PrimitiveTable {
        PrimitiveTable { fns: Vec::new() }
    }

    pub fn get(&self, index: usize) -> NativeFn {
        self.fns[index]
    }

    fn push(&mut self, f: NativeFn) -> usize {
        self.fns.push(f);
        self.fns.len() - 1
    }
}

impl Default for PrimitiveTable {
    fn default() -> PrimitiveTable {
        PrimitiveTable::new()
    }
}

fn install_one(interp: &mut Interpreter, name: &[u8], f: NativeFn) -> MesResult<()> {
    let index = interp.primitives.push(f);
    let sym = interp.intern(name)?;
    let func = interp.heap.alloc_cell(Tag::TFunction, index as i64, 0, &mut interp.regs)?;
    crate::environment::define(&mut interp.heap, interp.regs.g_env, sym, func, &mut interp.regs)?;
    Ok(())
}

/// Bind every primitive into the global environment. Called once from
/// `Interpreter::new`.
pub fn install_all(interp: &mut Interpreter) -> MesResult<()> {
    for &(name, f) in TABLE {
        install_one(interp, name, f)?;
    }
    Ok(())
}

static TABLE: &[(&[u8], NativeFn)] = &[
    (b"+", prim_add),
    (b"-", prim_sub),
    (b"*", prim_mul),
    (b"/", prim_div),
    (b"modulo", prim_modulo),
    (b"<", prim_num_lt),
    (b">", prim_num_gt),
    (b"=", prim_num_eq),
    (b"logand", prim_logand),
    (b"logior", prim_logior),
    (b"logxor", prim_logxor),
    (b"lognot", prim_lognot),
    (b"ash", prim_ash),
    (b"cons", prim_cons),
    (b"car", prim_car),
    (b"cdr", prim_cdr),
    (b"set-car!", prim_set_car),
    (b"set-cdr!", prim_set_cdr),
    (b"pair?", prim_pair_p),
    (b"null?", prim_null_p),
    (b"not", prim_not),
    (b"symbol?", prim_symbol_p),
    (b"string?", prim_string_p),
    (b"procedure?", prim_procedure_p),
    (b"vector?", prim_vector_p),
    (b"make-vector", prim_make_vector),
    (b"vector", prim_vector),
    (b"vector-length", prim_vector_length),
    (b"vector-ref", prim_vector_ref),
    (b"vector-set!", prim_vector_set),
    (b"vector->list", prim_vector_to_list),
    (b"list->vector", prim_list_to_vector),
    (b"eq?", prim_eq),
    (b"eqv?", prim_eqv),
    (b"equal?", prim_equal),
    (b"cons*", prim_cons_star),
    (b"list", prim_list),
    (b"length", prim_length),
    (b"append", prim_append),
    (b"reverse", prim_reverse),
    (b"map", prim_map),
    (b"for-each", prim_for_each),
    (b"string->symbol", prim_string_to_symbol),
    (b"symbol->string", prim_symbol_to_string),
    (b"string-append", prim_string_append),
    (b"substring", prim_substring),
    (b"string-length", prim_string_length),
    (b"string->list", prim_string_to_list),
    (b"list->string", prim_list_to_string),
    (b"string->number", prim_string_to_number),
    (b"number->string", prim_number_to_string),
    (b"error", prim_error),
    (b"throw", prim_throw),
    (b"catch", prim_catch),
    (b"read-char", prim_read_char),
    (b"peek-char", prim_peek_char),
    (b"write-char", prim_write_char),
    (b"read-byte", prim_read_byte),
    (b"write-byte", prim_write_byte),
    (b"open-input-file", prim_open_input_file),
    (b"open-output-file", prim_open_output_file),
    (b"open-input-string", prim_open_input_string),
    (b"open-output-string", prim_open_output_string),
    (b"get-output-string", prim_get_output_string),
    (b"close-port", prim_close_port),
    (b"current-input-port", prim_current_input_port),
    (b"current-output-port", prim_current_output_port),
    (b"current-error-port", prim_current_error_port),
    (b"getenv", prim_getenv),
    (b"access?", prim_access_p),
    (b"current-time", prim_current_time),
    (b"get-internal-run-time", prim_get_internal_run_time),
];

fn expect_arity(args: &[CellRef], name: &str, min: usize, max: usize) -> MesResult<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{}..{}", min, max)
        };
        return Err(MesError::wrong_arity(name, &expected, args.len()));
    }
    Ok(())
}

fn expect_number(heap: &Heap, r: CellRef) -> MesResult<i64> {
    match Value::of(heap, r) {
        Value::Number(n) => Ok(n),
        v => Err(MesError::wrong_type("number", v.type_name())),
    }
}

fn expect_char(heap: &Heap, r: CellRef) -> MesResult<u8> {
    match Value::of(heap, r) {
        Value::Char(c) => Ok(c),
        v => Err(MesError::wrong_type("char", v.type_name())),
    }
}

fn expect_pair(heap: &Heap, r: CellRef, who: &str) -> MesResult<()> {
    if heap.tag(r) != Tag::TPair {
        return Err(MesError::wrong_type(&format!("{} pair", who), Value::of(heap, r).type_name()));
    }
    Ok(())
}

fn expect_string_bytes(heap: &Heap, r: CellRef) -> MesResult<Vec<u8>> {
    match heap.tag(r) {
        Tag::TString | Tag::TSymbol | Tag::TKeyword => Ok(heap.bytes_of(r)),
        _ => Err(MesError::wrong_type("string", Value::of(heap, r).type_name())),
    }
}

fn bool_cell(interp: &Interpreter, v: bool) -> CellRef {
    if v {
        interp.regs.t
    } else {
        interp.regs.f
    }
}

fn is_nil(heap: &Heap, r: CellRef) -> bool {
    heap.tag(r) == Tag::TSpecial && heap.get(r).a == special::NIL
}

// ---- arithmetic ----

fn prim_add(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    let mut sum = 0i64;
    for &a in args {
        sum = sum.wrapping_add(expect_number(&interp.heap, a)?);
    }
    interp.heap.alloc_cell(Tag::TNumber, 0, sum, &mut interp.regs)
}

fn prim_sub(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    if args.is_empty() {
        return Err(MesError::wrong_arity("-", "at least 1", 0));
    }
    let mut nums = Vec::with_capacity(args.len());
    for &a in args {
        nums.push(expect_number(&interp.heap, a)?);
    }
    let result = if nums.len() == 1 {
        -nums[0]
    } else {
        nums[1..].iter().fold(nums[0], |acc, n| acc.wrapping_sub(*n))
    };
    interp.heap.alloc_cell(Tag::TNumber, 0, result, &mut interp.regs)
}

fn prim_mul(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    let mut product = 1i64;
    for &a in args {
        product = product.wrapping_mul(expect_number(&interp.heap, a)?);
    }
    interp.heap.alloc_cell(Tag::TNumber, 0, product, &mut interp.regs)
}

fn checked_div(a: i64, b: i64) -> MesResult<i64> {
    if b == 0 {
        return Err(MesError::scheme("division-by-zero", a.to_string()));
    }
    Ok(a / b)
}

fn prim_div(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    let mut nums = Vec::with_capacity(args.len());
    for &a in args {
        nums.push(expect_number(&interp.heap, a)?);
    }
    let result = if nums.is_empty() {
        1
    } else if nums.len() == 1 {
        checked_div(1, nums[0])?
    } else {
        let mut acc = nums[0];
        for n in &nums[1..] {
            acc = checked_div(acc, *n)?;
        }
        acc
    };
    interp.heap.alloc_cell(Tag::TNumber, 0, result, &mut interp.regs)
}

fn scheme_modulo(a: i64, b: i64) -> i64 {
    let m = a % b;
    if m != 0 && (m < 0) != (b < 0) {
        m + b
    } else {
        m
    }
}

fn prim_modulo(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "modulo", 2, 2)?;
    let a = expect_number(&interp.heap, args[0])?;
    let b = expect_number(&interp.heap, args[1])?;
    if b == 0 {
        return Err(MesError::scheme("division-by-zero", a.to_string()));
    }
    let result = scheme_modulo(a, b);
    interp.heap.alloc_cell(Tag::TNumber, 0, result, &mut interp.regs)
}

fn numbers_of(heap: &Heap, args: &[CellRef]) -> MesResult<Vec<i64>> {
    args.iter().map(|&a| expect_number(heap, a)).collect()
}

fn prim_num_lt(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    let nums = numbers_of(&interp.heap, args)?;
    Ok(bool_cell(interp, nums.windows(2).all(|w| w[0] < w[1])))
}

fn prim_num_gt(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    let nums = numbers_of(&interp.heap, args)?;
    Ok(bool_cell(interp, nums.windows(2).all(|w| w[0] > w[1])))
}

fn prim_num_eq(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    let nums = numbers_of(&interp.heap, args)?;
    Ok(bool_cell(interp, nums.windows(2).all(|w| w[0] == w[1])))
}

// ---- bitwise ----

fn prim_logand(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    let mut acc = -1i64;
    for &a in args {
        acc &= expect_number(&interp.heap, a)?;
    }
    interp.heap.alloc_cell(Tag::TNumber, 0, acc, &mut interp.regs)
}

fn prim_logior(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    let mut acc = 0i64;
    for &a in args {
        acc |= expect_number(&interp.heap, a)?;
    }
    interp.heap.alloc_cell(Tag::TNumber, 0, acc, &mut interp.regs)
}

fn prim_logxor(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    let mut acc = 0i64;
    for &a in args {
        acc ^= expect_number(&interp.heap, a)?;
    }
    interp.heap.alloc_cell(Tag::TNumber, 0, acc, &mut interp.regs)
}

fn prim_lognot(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "lognot", 1, 1)?;
    let n = expect_number(&interp.heap, args[0])?;
    interp.heap.alloc_cell(Tag::TNumber, 0, !n, &mut interp.regs)
}

fn prim_ash(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "ash", 2, 2)?;
    let n = expect_number(&interp.heap, args[0])?;
    let count = expect_number(&interp.heap, args[1])?;
    let result = if count >= 0 {
        n.wrapping_shl(count.min(63) as u32)
    } else {
        n >> (-count).min(63)
    };
    interp.heap.alloc_cell(Tag::TNumber, 0, result, &mut interp.regs)
}

// ---- pairs and lists ----

fn prim_cons(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "cons", 2, 2)?;
    interp.heap.alloc_cell(Tag::TPair, args[0].into(), args[1].into(), &mut interp.regs)
}

fn prim_car(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "car", 1, 1)?;
    expect_pair(&interp.heap, args[0], "car")?;
    Ok(interp.heap.car(args[0]))
}

fn prim_cdr(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "cdr", 1, 1)?;
    expect_pair(&interp.heap, args[0], "cdr")?;
    Ok(interp.heap.cdr(args[0]))
}

fn prim_set_car(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "set-car!", 2, 2)?;
    expect_pair(&interp.heap, args[0], "set-car!")?;
    interp.heap.set_car(args[0], args[1]);
    Ok(interp.regs.unspecified)
}

fn prim_set_cdr(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "set-cdr!", 2, 2)?;
    expect_pair(&interp.heap, args[0], "set-cdr!")?;
    interp.heap.set_cdr(args[0], args[1]);
    Ok(interp.regs.unspecified)
}

fn prim_pair_p(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "pair?", 1, 1)?;
    Ok(bool_cell(interp, interp.heap.tag(args[0]) == Tag::TPair))
}

fn prim_null_p(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "null?", 1, 1)?;
    Ok(bool_cell(interp, is_nil(&interp.heap, args[0])))
}

fn prim_not(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "not", 1, 1)?;
    Ok(bool_cell(interp, !Value::of(&interp.heap, args[0]).is_truthy()))
}

fn prim_symbol_p(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "symbol?", 1, 1)?;
    Ok(bool_cell(interp, interp.heap.tag(args[0]) == Tag::TSymbol))
}

fn prim_string_p(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "string?", 1, 1)?;
    Ok(bool_cell(interp, interp.heap.tag(args[0]) == Tag::TString))
}

fn prim_procedure_p(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "procedure?", 1, 1)?;
    let tag = interp.heap.tag(args[0]);
    Ok(bool_cell(
        interp,
        matches!(tag, Tag::TClosure | Tag::TFunction | Tag::TContinuation),
    ))
}

fn prim_vector_p(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "vector?", 1, 1)?;
    Ok(bool_cell(interp, interp.heap.tag(args[0]) == Tag::TVector))
}

// ---- vectors ----

fn expect_vector(heap: &Heap, r: CellRef) -> MesResult<()> {
    if heap.tag(r) != Tag::TVector {
        return Err(MesError::wrong_type("vector", Value::of(heap, r).type_name()));
    }
    Ok(())
}

fn vector_index(heap: &Heap, header: CellRef, i: CellRef, who: &str) -> MesResult<usize> {
    let n = expect_number(heap, i)?;
    let len = heap.vector_len(header);
    if n < 0 || n as usize >= len {
        return Err(MesError::scheme("bad-range", format!("{}: index {} out of range for length {}", who, n, len)));
    }
    Ok(n as usize)
}

fn prim_make_vector(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "make-vector", 1, 2)?;
    let len = expect_number(&interp.heap, args[0])?;
    if len < 0 {
        return Err(MesError::wrong_type("non-negative length", "negative number"));
    }
    let fill = if args.len() == 2 { args[1] } else { interp.regs.unspecified };
    interp.heap.alloc_vector(Tag::TVector, len as usize, fill, &mut interp.regs)
}

fn prim_vector(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    let v = interp
        .heap
        .alloc_vector(Tag::TVector, args.len(), interp.regs.nil, &mut interp.regs)?;
    for (i, &item) in args.iter().enumerate() {
        interp.heap.vector_set(v, i, item);
    }
    Ok(v)
}

fn prim_vector_length(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "vector-length", 1, 1)?;
    expect_vector(&interp.heap, args[0])?;
    let len = interp.heap.vector_len(args[0]) as i64;
    interp.heap.alloc_cell(Tag::TNumber, 0, len, &mut interp.regs)
}

fn prim_vector_ref(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "vector-ref", 2, 2)?;
    expect_vector(&interp.heap, args[0])?;
    let i = vector_index(&interp.heap, args[0], args[1], "vector-ref")?;
    Ok(interp.heap.vector_ref(args[0], i))
}

fn prim_vector_set(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "vector-set!", 3, 3)?;
    expect_vector(&interp.heap, args[0])?;
    let i = vector_index(&interp.heap, args[0], args[1], "vector-set!")?;
    interp.heap.vector_set(args[0], i, args[2]);
    Ok(interp.regs.unspecified)
}

fn prim_vector_to_list(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "vector->list", 1, 1)?;
    expect_vector(&interp.heap, args[0])?;
    let len = interp.heap.vector_len(args[0]);
    let items: Vec<CellRef> = (0..len).map(|i| interp.heap.vector_ref(args[0], i)).collect();
    interp.list_of(&items)
}

fn prim_list_to_vector(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "list->vector", 1, 1)?;
    let items = list_elements(&interp.heap, args[0])?;
    let v = interp
        .heap
        .alloc_vector(Tag::TVector, items.len(), interp.regs.nil, &mut interp.regs)?;
    for (i, &item) in items.iter().enumerate() {
        interp.heap.vector_set(v, i, item);
    }
    Ok(v)
}

fn value_eqv(heap: &Heap, a: CellRef, b: CellRef) -> bool {
    if a == b {
        return true;
    }
    match (Value::of(heap, a), Value::of(heap, b)) {
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::Char(x), Value::Char(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        _ => false,
    }
}

fn value_equal(heap: &Heap, a: CellRef, b: CellRef) -> bool {
    if a == b {
        return true;
    }
    match (Value::of(heap, a), Value::of(heap, b)) {
        (Value::Pair(_), Value::Pair(_)) => {
            value_equal(heap, heap.car(a), heap.car(b)) && value_equal(heap, heap.cdr(a), heap.cdr(b))
        }
        (Value::String(_), Value::String(_)) => heap.bytes_of(a) == heap.bytes_of(b),
        (Value::Vector(_), Value::Vector(_)) => {
            let len = heap.vector_len(a);
            len == heap.vector_len(b) && (0..len).all(|i| value_equal(heap, heap.vector_ref(a, i), heap.vector_ref(b, i)))
        }
        _ => value_eqv(heap, a, b),
    }
}

fn prim_eq(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "eq?", 2, 2)?;
    Ok(bool_cell(interp, args[0] == args[1]))
}

fn prim_eqv(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "eqv?", 2, 2)?;
    Ok(bool_cell(interp, value_eqv(&interp.heap, args[0], args[1])))
}

fn prim_equal(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "equal?", 2, 2)?;
    Ok(bool_cell(interp, value_equal(&interp.heap, args[0], args[1])))
}

fn prim_cons_star(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    if args.is_empty() {
        return Ok(interp.regs.nil);
    }
    let last = args[args.len() - 1];
    interp.regs.g_stack.push(last);
    let slot = interp.regs.g_stack.len() - 1;
    for &item in args[..args.len() - 1].iter().rev() {
        let tail = interp.regs.g_stack[slot];
        let cell = interp.heap.alloc_cell(Tag::TPair, item.into(), tail.into(), &mut interp.regs)?;
        interp.regs.g_stack[slot] = cell;
    }
    let result = interp.regs.g_stack[slot];
    interp.regs.g_stack.pop();
    Ok(result)
}

fn prim_list(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    interp.list_of(args)
}

fn prim_length(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "length", 1, 1)?;
    let mut n = 0i64;
    let mut cur = args[0];
    loop {
        if is_nil(&interp.heap, cur) {
            break;
        }
        if interp.heap.tag(cur) != Tag::TPair {
            return Err(MesError::wrong_type("list", "improper list"));
        }
        n += 1;
        cur = interp.heap.cdr(cur);
    }
    interp.heap.alloc_cell(Tag::TNumber, 0, n, &mut interp.regs)
}

/// Collect a proper list's elements. Errors on an improper list.
fn list_elements(heap: &Heap, mut list: CellRef) -> MesResult<Vec<CellRef>> {
    let mut items = Vec::new();
    while !is_nil(heap, list) {
        if heap.tag(list) != Tag::TPair {
            return Err(MesError::wrong_type("list", "improper list"));
        }
        items.push(heap.car(list));
        list = heap.cdr(list);
    }
    Ok(items)
}

fn prim_append(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    if args.is_empty() {
        return Ok(interp.regs.nil);
    }
    let last = args[args.len() - 1];
    let mut items = Vec::new();
    for &list in &args[..args.len() - 1] {
        items.extend(list_elements(&interp.heap, list)?);
    }
    interp.regs.g_stack.push(last);
    let slot = interp.regs.g_stack.len() - 1;
    for &item in items.iter().rev() {
        let tail = interp.regs.g_stack[slot];
        let cell = interp.heap.alloc_cell(Tag::TPair, item.into(), tail.into(), &mut interp.regs)?;
        interp.regs.g_stack[slot] = cell;
    }
    let result = interp.regs.g_stack[slot];
    interp.regs.g_stack.pop();
    Ok(result)
}

fn prim_reverse(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "reverse", 1, 1)?;
    let items = list_elements(&interp.heap, args[0])?;
    interp.regs.g_stack.push(interp.regs.nil);
    let slot = interp.regs.g_stack.len() - 1;
    for &item in &items {
        let tail = interp.regs.g_stack[slot];
        let cell = interp.heap.alloc_cell(Tag::TPair, item.into(), tail.into(), &mut interp.regs)?;
        interp.regs.g_stack[slot] = cell;
    }
    let result = interp.regs.g_stack[slot];
    interp.regs.g_stack.pop();
    Ok(result)
}

/// `(map proc list1 list2 ...)`: apply `proc` to the successive elements of
/// each list, stopping at the shortest, and collect the results in order.
/// `proc` and every input element are pushed onto `g_stack` before the loop
/// starts, and each result is pushed as soon as it is computed, because
/// applying `proc` for one element can itself trigger a collection that
/// would otherwise strand `proc` or a not-yet-consumed input element in a
/// bare `Vec`.
fn prim_map(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "map", 2, usize::MAX)?;
    let mut lists = Vec::with_capacity(args.len() - 1);
    for &list in &args[1..] {
        lists.push(list_elements(&interp.heap, list)?);
    }
    let len = lists.iter().map(|l| l.len()).min().unwrap_or(0);
    let num_lists = lists.len();

    let base = interp.regs.g_stack.len();
    let proc_slot = base;
    interp.regs.g_stack.push(args[0]);
    let inputs_base = base + 1;
    for list in &lists {
        interp.regs.g_stack.extend_from_slice(&list[..len]);
    }

    let results_base = interp.regs.g_stack.len();
    for i in 0..len {
        let proc = interp.regs.g_stack[proc_slot];
        let call_args: Vec<CellRef> = (0..num_lists).map(|l| interp.regs.g_stack[inputs_base + l * len + i]).collect();
        let result = crate::eval::apply_procedure(interp, proc, &call_args)?;
        interp.regs.g_stack.push(result);
    }
    let results = interp.regs.g_stack[results_base..].to_vec();
    interp.regs.g_stack.truncate(base);
    interp.list_of(&results)
}

/// `(for-each proc list1 list2 ...)`: like `map`, but for effect only --
/// the results are discarded and the unspecified value is returned. `proc`
/// and every input element are rooted on `g_stack` the same way `map` roots
/// them, for the same reason.
fn prim_for_each(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "for-each", 2, usize::MAX)?;
    let mut lists = Vec::with_capacity(args.len() - 1);
    for &list in &args[1..] {
        lists.push(list_elements(&interp.heap, list)?);
    }
    let len = lists.iter().map(|l| l.len()).min().unwrap_or(0);
    let num_lists = lists.len();

    let base = interp.regs.g_stack.len();
    let proc_slot = base;
    interp.regs.g_stack.push(args[0]);
    let inputs_base = base + 1;
    for list in &lists {
        interp.regs.g_stack.extend_from_slice(&list[..len]);
    }

    for i in 0..len {
        let proc = interp.regs.g_stack[proc_slot];
        let call_args: Vec<CellRef> = (0..num_lists).map(|l| interp.regs.g_stack[inputs_base + l * len + i]).collect();
        crate::eval::apply_procedure(interp, proc, &call_args)?;
    }
    interp.regs.g_stack.truncate(base);
    Ok(interp.regs.unspecified)
}

// ---- strings and symbols ----

fn prim_string_to_symbol(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "string->symbol", 1, 1)?;
    let bytes = expect_string_bytes(&interp.heap, args[0])?;
    interp.intern(&bytes)
}

fn prim_symbol_to_string(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "symbol->string", 1, 1)?;
    if interp.heap.tag(args[0]) != Tag::TSymbol {
        return Err(MesError::wrong_type("symbol", Value::of(&interp.heap, args[0]).type_name()));
    }
    let bytes = interp.heap.bytes_of(args[0]);
    interp.heap.alloc_bytes(Tag::TString, &bytes, &mut interp.regs)
}

fn prim_string_append(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    let mut out = Vec::new();
    for &a in args {
        out.extend(expect_string_bytes(&interp.heap, a)?);
    }
    interp.heap.alloc_bytes(Tag::TString, &out, &mut interp.regs)
}

fn prim_substring(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "substring", 2, 3)?;
    let bytes = expect_string_bytes(&interp.heap, args[0])?;
    let start = expect_number(&interp.heap, args[1])? as usize;
    let end = if args.len() == 3 {
        expect_number(&interp.heap, args[2])? as usize
    } else {
        bytes.len()
    };
    if start > end || end > bytes.len() {
        return Err(MesError::scheme("out-of-range", format!("{}..{} of {}", start, end, bytes.len())));
    }
    interp.heap.alloc_bytes(Tag::TString, &bytes[start..end], &mut interp.regs)
}

fn prim_string_length(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "string-length", 1, 1)?;
    let bytes = expect_string_bytes(&interp.heap, args[0])?;
    interp.heap.alloc_cell(Tag::TNumber, 0, bytes.len() as i64, &mut interp.regs)
}

fn prim_string_to_list(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "string->list", 1, 1)?;
    let bytes = expect_string_bytes(&interp.heap, args[0])?;
    interp.regs.g_stack.push(interp.regs.nil);
    let slot = interp.regs.g_stack.len() - 1;
    for &b in bytes.iter().rev() {
        let ch = interp.heap.alloc_cell(Tag::TChar, b as i64, 0, &mut interp.regs)?;
        let tail = interp.regs.g_stack[slot];
        let cell = interp.heap.alloc_cell(Tag::TPair, ch.into(), tail.into(), &mut interp.regs)?;
        interp.regs.g_stack[slot] = cell;
    }
    let result = interp.regs.g_stack[slot];
    interp.regs.g_stack.pop();
    Ok(result)
}

fn prim_list_to_string(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "list->string", 1, 1)?;
    let chars = list_elements(&interp.heap, args[0])?;
    let mut bytes = Vec::with_capacity(chars.len());
    for c in chars {
        bytes.push(expect_char(&interp.heap, c)?);
    }
    interp.heap.alloc_bytes(Tag::TString, &bytes, &mut interp.regs)
}

fn prim_string_to_number(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "string->number", 1, 1)?;
    let bytes = expect_string_bytes(&interp.heap, args[0])?;
    match std::str::from_utf8(&bytes).ok().and_then(|s| s.trim().parse::<i64>().ok()) {
        Some(n) => interp.heap.alloc_cell(Tag::TNumber, 0, n, &mut interp.regs),
        None => Ok(interp.regs.f),
    }
}

fn prim_number_to_string(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "number->string", 1, 1)?;
    let n = expect_number(&interp.heap, args[0])?;
    interp.heap.alloc_bytes(Tag::TString, n.to_string().as_bytes(), &mut interp.regs)
}

// ---- errors ----

fn describe(heap: &Heap, r: CellRef) -> String {
    match Value::of(heap, r) {
        Value::Number(n) => n.to_string(),
        Value::String(_) | Value::Symbol(_) => String::from_utf8_lossy(&heap.bytes_of(r)).into_owned(),
        Value::Bool(true) => "#t".to_string(),
        Value::Bool(false) => "#f".to_string(),
        Value::Nil => "()".to_string(),
        Value::Char(c) => (c as char).to_string(),
        v => format!("#<{}>", v.type_name()),
    }
}

fn prim_error(_interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    if args.is_empty() {
        return Err(MesError::wrong_arity("error", "at least 1", 0));
    }
    let key = describe(&_interp.heap, args[0]);
    let irritant = args[1..].iter().map(|&a| describe(&_interp.heap, a)).collect::<Vec<_>>().join(" ");
    Err(MesError::scheme(key, irritant))
}

/// `(throw key irritant...)`: raise a Scheme-level error keyed by `key`
/// (a symbol naming the condition, rather than the human-oriented message
/// `error` expects as its first argument), catchable by a `catch` whose
/// own `key` is `#t` or the same symbol.
fn prim_throw(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    if args.is_empty() {
        return Err(MesError::wrong_arity("throw", "at least 1", 0));
    }
    let key = describe(&interp.heap, args[0]);
    let irritant = args[1..].iter().map(|&a| describe(&interp.heap, a)).collect::<Vec<_>>().join(" ");
    Err(MesError::scheme(key, irritant))
}

/// `key` is `#t` (catch-all) or a symbol whose printed name matches the
/// raised error's key exactly.
fn catch_matches(interp: &Interpreter, key: CellRef, raised_key: &str) -> bool {
    if key == interp.regs.t {
        return true;
    }
    if interp.heap.tag(key) == Tag::TSymbol {
        return interp.heap.bytes_of(key) == raised_key.as_bytes();
    }
    false
}

/// `(catch key thunk handler)`: call the zero-argument `thunk`. If it
/// raises a Scheme-level error whose key matches `key` (spec §4.9/§9's
/// escape continuation, here materialized for the `throw`/`error` error
/// path rather than `call/cc`'s upward-escape path), `handler` is called
/// with the error's key (as a symbol) and irritant (as a string) instead
/// of the error propagating further. A non-matching or non-Scheme error
/// passes through unchanged.
fn prim_catch(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    if args.len() != 3 {
        return Err(MesError::wrong_arity("catch", "3", args.len()));
    }
    // `key` and `handler` must survive both `apply_procedure` calls (either
    // of which can allocate and move the heap), so they ride on `g_stack`
    // the same way `map`/`for-each` root their own `proc` across calls.
    let base = interp.regs.g_stack.len();
    interp.regs.g_stack.push(args[0]);
    interp.regs.g_stack.push(args[2]);
    let key_slot = base;
    let handler_slot = base + 1;

    let result = crate::eval::apply_procedure(interp, args[1], &[]);
    let outcome = match result {
        Ok(value) => Ok(value),
        Err(MesError::Scheme { key: raised_key, irritant }) if catch_matches(interp, interp.regs.g_stack[key_slot], &raised_key) => {
            let key_sym = interp.intern(raised_key.as_bytes())?;
            interp.regs.g_stack.push(key_sym);
            let irritant_str = interp.heap.alloc_bytes(Tag::TString, irritant.as_bytes(), &mut interp.regs)?;
            let key_sym = interp.regs.g_stack[key_slot + 2];
            let handler = interp.regs.g_stack[handler_slot];
            interp.regs.g_stack.truncate(base);
            return crate::eval::apply_procedure(interp, handler, &[key_sym, irritant_str]);
        }
        Err(other) => Err(other),
    };
    interp.regs.g_stack.truncate(base);
    outcome
}

// ---- ports ----

fn port_index_of(interp: &Interpreter, args: &[CellRef], i: usize, default: usize) -> MesResult<usize> {
    if i < args.len() {
        let r = args[i];
        if interp.heap.tag(r) != Tag::TPort {
            return Err(MesError::wrong_type("port", Value::of(&interp.heap, r).type_name()));
        }
        Ok(interp.heap.get(r).a as usize)
    } else {
        Ok(default)
    }
}

fn prim_read_char(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    let idx = port_index_of(interp, args, 0, interp.ports.current_input)?;
    match interp.ports.get_mut(idx)?.read_byte()? {
        Some(b) => interp.heap.alloc_cell(Tag::TChar, b as i64, 0, &mut interp.regs),
        None => Ok(interp.regs.eof),
    }
}

fn prim_peek_char(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    let idx = port_index_of(interp, args, 0, interp.ports.current_input)?;
    match interp.ports.get_mut(idx)?.peek_byte()? {
        Some(b) => interp.heap.alloc_cell(Tag::TChar, b as i64, 0, &mut interp.regs),
        None => Ok(interp.regs.eof),
    }
}

fn prim_write_char(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "write-char", 1, 2)?;
    let ch = expect_char(&interp.heap, args[0])?;
    let idx = port_index_of(interp, args, 1, interp.ports.current_output)?;
    interp.ports.get_mut(idx)?.write_bytes(&[ch])?;
    Ok(interp.regs.unspecified)
}

fn prim_read_byte(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    let idx = port_index_of(interp, args, 0, interp.ports.current_input)?;
    match interp.ports.get_mut(idx)?.read_byte()? {
        Some(b) => interp.heap.alloc_cell(Tag::TNumber, 0, b as i64, &mut interp.regs),
        None => Ok(interp.regs.eof),
    }
}

fn prim_write_byte(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "write-byte", 1, 2)?;
    let b = expect_number(&interp.heap, args[0])?;
    let idx = port_index_of(interp, args, 1, interp.ports.current_output)?;
    interp.ports.get_mut(idx)?.write_bytes(&[b as u8])?;
    Ok(interp.regs.unspecified)
}

fn prim_open_input_file(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "open-input-file", 1, 1)?;
    let bytes = expect_string_bytes(&interp.heap, args[0])?;
    let path = String::from_utf8_lossy(&bytes).into_owned();
    let idx = interp.ports.open_input_file(&path)?;
    let cell = interp.heap.alloc_cell(Tag::TPort, idx as i64, 0, &mut interp.regs)?;
    interp.regs.g_ports.push(cell);
    Ok(cell)
}

fn prim_open_output_file(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "open-output-file", 1, 1)?;
    let bytes = expect_string_bytes(&interp.heap, args[0])?;
    let path = String::from_utf8_lossy(&bytes).into_owned();
    let idx = interp.ports.open_output_file(&path)?;
    let cell = interp.heap.alloc_cell(Tag::TPort, idx as i64, 0, &mut interp.regs)?;
    interp.regs.g_ports.push(cell);
    Ok(cell)
}

fn prim_open_input_string(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "open-input-string", 1, 1)?;
    let bytes = expect_string_bytes(&interp.heap, args[0])?;
    let idx = interp.ports.open_input_string(bytes);
    let cell = interp.heap.alloc_cell(Tag::TPort, idx as i64, 0, &mut interp.regs)?;
    interp.regs.g_ports.push(cell);
    Ok(cell)
}

fn prim_open_output_string(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "open-output-string", 0, 0)?;
    let idx = interp.ports.open_output_string();
    let cell = interp.heap.alloc_cell(Tag::TPort, idx as i64, 0, &mut interp.regs)?;
    interp.regs.g_ports.push(cell);
    Ok(cell)
}

fn prim_get_output_string(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "get-output-string", 1, 1)?;
    let idx = port_index_of(interp, args, 0, interp.ports.current_output)?;
    let bytes = interp.ports.output_string_contents(idx)?;
    interp.heap.alloc_bytes(Tag::TString, &bytes, &mut interp.regs)
}

fn prim_close_port(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "close-port", 1, 1)?;
    let idx = port_index_of(interp, args, 0, interp.ports.current_output)?;
    interp.ports.close(idx)?;
    Ok(interp.regs.unspecified)
}

fn prim_current_input_port(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "current-input-port", 0, 0)?;
    interp
        .heap
        .alloc_cell(Tag::TPort, interp.ports.current_input as i64, 0, &mut interp.regs)
}

fn prim_current_output_port(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "current-output-port", 0, 0)?;
    interp
        .heap
        .alloc_cell(Tag::TPort, interp.ports.current_output as i64, 0, &mut interp.regs)
}

fn prim_current_error_port(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "current-error-port", 0, 0)?;
    interp
        .heap
        .alloc_cell(Tag::TPort, interp.ports.current_error as i64, 0, &mut interp.regs)
}

// ---- host environment ----

fn prim_getenv(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "getenv", 1, 1)?;
    let bytes = expect_string_bytes(&interp.heap, args[0])?;
    let name = String::from_utf8_lossy(&bytes).into_owned();
    match std::env::var(&name) {
        Ok(v) => interp.heap.alloc_bytes(Tag::TString, v.as_bytes(), &mut interp.regs),
        Err(_) => Ok(interp.regs.f),
    }
}

fn prim_access_p(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "access?", 2, 2)?;
    let bytes = expect_string_bytes(&interp.heap, args[0])?;
    let _mode = expect_number(&interp.heap, args[1])?;
    let path = String::from_utf8_lossy(&bytes).into_owned();
    Ok(bool_cell(interp, std::path::Path::new(&path).exists()))
}

fn prim_current_time(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "current-time", 0, 0)?;
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    interp.heap.alloc_cell(Tag::TNumber, 0, secs, &mut interp.regs)
}

fn prim_get_internal_run_time(interp: &mut Interpreter, args: &[CellRef]) -> MesResult<CellRef> {
    expect_arity(args, "get-internal-run-time", 0, 0)?;
    let micros = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0);
    interp.heap.alloc_cell(Tag::TNumber, 0, micros, &mut interp.regs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn fresh() -> Interpreter {
        Interpreter::new(Config {
            arena_cells: 8192,
            ..Config::default()
        })
        .unwrap()
    }

    fn num(interp: &mut Interpreter, n: i64) -> CellRef {
        interp.heap.alloc_cell(Tag::TNumber, 0, n, &mut interp.regs).unwrap()
    }

    #[test]
    fn add_sums_all_arguments() {
        let mut interp = fresh();
        let args = vec![num(&mut interp, 1), num(&mut interp, 2), num(&mut interp, 3)];
        let result = prim_add(&mut interp, &args).unwrap();
        assert_eq!(Value::of(&interp.heap, result), Value::Number(6));
    }

    #[test]
    fn add_with_no_arguments_is_zero() {
        let mut interp = fresh();
        let result = prim_add(&mut interp, &[]).unwrap();
        assert_eq!(Value::of(&interp.heap, result), Value::Number(0));
    }

    #[test]
    fn sub_with_one_argument_negates() {
        let mut interp = fresh();
        let args = vec![num(&mut interp, 5)];
        let result = prim_sub(&mut interp, &args).unwrap();
        assert_eq!(Value::of(&interp.heap, result), Value::Number(-5));
    }

    #[test]
    fn div_by_zero_is_a_scheme_error() {
        let mut interp = fresh();
        let args = vec![num(&mut interp, 1), num(&mut interp, 0)];
        let err = prim_div(&mut interp, &args).unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn modulo_result_takes_divisor_sign() {
        let mut interp = fresh();
        let args = vec![num(&mut interp, -7), num(&mut interp, 2)];
        let result = prim_modulo(&mut interp, &args).unwrap();
        assert_eq!(Value::of(&interp.heap, result), Value::Number(1));
    }

    #[test]
    fn cons_then_car_cdr_round_trip() {
        let mut interp = fresh();
        let a = num(&mut interp, 1);
        let b = num(&mut interp, 2);
        let pair = prim_cons(&mut interp, &[a, b]).unwrap();
        assert_eq!(prim_car(&mut interp, &[pair]).unwrap(), a);
        assert_eq!(prim_cdr(&mut interp, &[pair]).unwrap(), b);
    }

    #[test]
    fn equal_compares_structurally_eq_compares_identity() {
        let mut interp = fresh();
        let a1 = num(&mut interp, 7);
        let a2 = num(&mut interp, 7);
        let pair1 = prim_cons(&mut interp, &[a1, a1]).unwrap();
        let pair2 = prim_cons(&mut interp, &[a2, a2]).unwrap();
        let eq_result = prim_eq(&mut interp, &[pair1, pair2]).unwrap();
        assert_eq!(eq_result, interp.regs.f);
        let equal_result = prim_equal(&mut interp, &[pair1, pair2]).unwrap();
        assert_eq!(equal_result, interp.regs.t);
    }

    #[test]
    fn length_rejects_improper_lists() {
        let mut interp = fresh();
        let a = num(&mut interp, 1);
        let b = num(&mut interp, 2);
        let dotted = prim_cons(&mut interp, &[a, b]).unwrap();
        assert!(prim_length(&mut interp, &[dotted]).is_err());
    }

    #[test]
    fn string_append_concatenates_bytes() {
        let mut interp = fresh();
        let hello = interp.heap.alloc_bytes(Tag::TString, b"hello, ", &mut interp.regs).unwrap();
        let world = interp.heap.alloc_bytes(Tag::TString, b"world", &mut interp.regs).unwrap();
        let result = prim_string_append(&mut interp, &[hello, world]).unwrap();
        assert_eq!(interp.heap.bytes_of(result), b"hello, world");
    }

    #[test]
    fn map_applies_proc_to_each_element() {
        let mut interp = fresh();
        let env = interp.regs.g_env;
        let x = interp.intern(b"x").unwrap();
        let plus = interp.intern(b"+").unwrap();
        let one = num(&mut interp, 1);
        let formals = interp.list_of(&[x]).unwrap();
        let body_call = interp.list_of(&[plus, x, one]).unwrap();
        let body = interp.list_of(&[body_call]).unwrap();
        let formals_body = interp
            .heap
            .alloc_cell(Tag::TPair, formals.into(), body.into(), &mut interp.regs)
            .unwrap();
        let closure = interp
            .heap
            .alloc_cell(Tag::TClosure, formals_body.into(), env.into(), &mut interp.regs)
            .unwrap();

        let n1 = num(&mut interp, 1);
        let n2 = num(&mut interp, 2);
        let n3 = num(&mut interp, 3);
        let list = interp.list_of(&[n1, n2, n3]).unwrap();

        let result = prim_map(&mut interp, &[closure, list]).unwrap();
        let items = list_elements(&interp.heap, result).unwrap();
        let values: Vec<i64> = items
            .iter()
            .map(|&r| match Value::of(&interp.heap, r) {
                Value::Number(n) => n,
                _ => panic!("expected number"),
            })
            .collect();
        assert_eq!(values, vec![2, 3, 4]);
    }

    #[test]
    fn for_each_applies_proc_for_effect_and_returns_unspecified() {
        let mut interp = fresh();
        let env = interp.regs.g_env;

        let port = prim_open_output_string(&mut interp, &[]).unwrap();
        let port_name = interp.intern(b"the-output-port").unwrap();
        crate::environment::define(&mut interp.heap, env, port_name, port, &mut interp.regs).unwrap();

        let x = interp.intern(b"x").unwrap();
        let write_char_sym = interp.intern(b"write-char").unwrap();
        let call = interp.list_of(&[write_char_sym, x, port_name]).unwrap();
        let formals = interp.list_of(&[x]).unwrap();
        let body = interp.list_of(&[call]).unwrap();
        let formals_body = interp
            .heap
            .alloc_cell(Tag::TPair, formals.into(), body.into(), &mut interp.regs)
            .unwrap();
        let closure = interp
            .heap
            .alloc_cell(Tag::TClosure, formals_body.into(), env.into(), &mut interp.regs)
            .unwrap();

        let a = interp.heap.alloc_cell(Tag::TChar, b'a' as i64, 0, &mut interp.regs).unwrap();
        let b = interp.heap.alloc_cell(Tag::TChar, b'b' as i64, 0, &mut interp.regs).unwrap();
        let list = interp.list_of(&[a, b]).unwrap();

        let result = prim_for_each(&mut interp, &[closure, list]).unwrap();
        assert_eq!(Value::of(&interp.heap, result), Value::Unspecified);

        let written = prim_get_output_string(&mut interp, &[port]).unwrap();
        assert_eq!(interp.heap.bytes_of(written), b"ab");
    }

    #[test]
    fn make_vector_fills_and_vector_set_mutates_in_place() {
        let mut interp = fresh();
        let len = num(&mut interp, 3);
        let fill = num(&mut interp, 9);
        let v = prim_make_vector(&mut interp, &[len, fill]).unwrap();
        assert_eq!(Value::of(&interp.heap, prim_vector_length(&mut interp, &[v]).unwrap()), Value::Number(3));
        let one = num(&mut interp, 1);
        assert_eq!(Value::of(&interp.heap, prim_vector_ref(&mut interp, &[v, one]).unwrap()), Value::Number(9));

        let forty_two = num(&mut interp, 42);
        prim_vector_set(&mut interp, &[v, one, forty_two]).unwrap();
        assert_eq!(Value::of(&interp.heap, prim_vector_ref(&mut interp, &[v, one]).unwrap()), Value::Number(42));
    }

    #[test]
    fn vector_list_round_trip() {
        let mut interp = fresh();
        let n1 = num(&mut interp, 1);
        let n2 = num(&mut interp, 2);
        let n3 = num(&mut interp, 3);
        let v = prim_vector(&mut interp, &[n1, n2, n3]).unwrap();
        let list = prim_vector_to_list(&mut interp, &[v]).unwrap();
        let back = prim_list_to_vector(&mut interp, &[list]).unwrap();
        assert_eq!(Value::of(&interp.heap, prim_vector_length(&mut interp, &[back]).unwrap()), Value::Number(3));
        let zero = num(&mut interp, 0);
        assert_eq!(Value::of(&interp.heap, prim_vector_ref(&mut interp, &[back, zero]).unwrap()), Value::Number(1));
    }

    #[test]
    fn vector_ref_out_of_range_is_a_scheme_error() {
        let mut interp = fresh();
        let v = prim_make_vector(&mut interp, &[num(&mut interp, 2)]).unwrap();
        let oob = num(&mut interp, 5);
        let err = prim_vector_ref(&mut interp, &[v, oob]).unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn install_all_binds_every_primitive_name() {
        let mut interp = fresh();
        let plus = interp.intern(b"+").unwrap();
        let found = crate::environment::lookup(&interp.heap, interp.regs.g_env, plus).expect("+ should be bound");
        let func = crate::environment::value_of(&interp.heap, found);
        assert_eq!(interp.heap.tag(func), Tag::TFunction);
    }
}
