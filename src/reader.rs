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

//! The reader: turns a byte stream into cells (spec §4.6).
//!
//! Reading never returns `Err` for a clean end of input; it hands back the
//! EOF singleton instead, matching `Value::Eof` at the top level. Errors here
//! are reserved for malformed syntax (an unterminated string, a stray `)`).

use crate::cell::{CellRef, Tag};
use crate::error::{MesError, MesResult};
use crate::heap::{Heap, Roots};
use crate::port::Port;
use crate::symbols;

/// The handful of pre-interned symbols and singletons the reader needs to
/// expand `'x`, `` `x ``, `,x`, `,@x` and to return booleans/EOF without
/// looking anything up at read time.
pub struct Syntax {
    pub nil: CellRef,
    pub t: CellRef,
    pub f: CellRef,
    pub eof: CellRef,
    pub quote: CellRef,
    pub quasiquote: CellRef,
    pub unquote: CellRef,
    pub unquote_splicing: CellRef,
}

/// The heap, its allocation roots, and the mutable symbol table, bundled so
/// every recursive call to `read_form` can intern new symbol names without
/// threading `g_symbols` through every return value by hand.
pub struct Reader<'a> {
    pub heap: &'a mut Heap,
    pub roots: &'a mut dyn Roots,
    pub g_symbols: CellRef,
}

impl<'a> Reader<'a> {
    fn intern(&mut self, name: &[u8]) -> MesResult<CellRef> {
        let (sym, new_g_symbols) = symbols::intern(self.heap, self.g_symbols, name, self.roots)?;
        self.g_symbols = new_g_symbols;
        Ok(sym)
    }

    fn cons(&mut self, car: CellRef, cdr: CellRef) -> MesResult<CellRef> {
        self.heap.alloc_cell(Tag::TPair, car.into(), cdr.into(), self.roots)
    }
}

const DELIMITERS: &[u8] = b"()\";'`, \t\n\r";

fn is_delimiter(b: u8) -> bool {
    DELIMITERS.contains(&b) || b.is_ascii_whitespace()
}

/// Read one datum from `port`, or return the EOF singleton at a clean end of
/// input.
pub fn read_form(r: &mut Reader, port: &mut Port, syntax: &Syntax) -> MesResult<CellRef> {
    match skip_atmosphere(port)? {
        None => Ok(syntax.eof),
        Some(b) => read_datum(r, port, syntax, b),
    }
}

/// Consume whitespace, `;` line comments, `#| ... |#` block comments, and
/// `#;` datum comments, returning the first byte of the next datum (already
/// consumed from `port`) or `None` at EOF.
fn skip_atmosphere(port: &mut Port) -> MesResult<Option<u8>> {
    loop {
        let b = match port.read_byte()? {
            None => return Ok(None),
            Some(b) => b,
        };
        if b.is_ascii_whitespace() {
            continue;
        }
        if b == b';' {
            while let Some(c) = port.read_byte()? {
                if c == b'\n' {
                    break;
                }
            }
            continue;
        }
        if b == b'#' {
            match port.peek_byte()? {
                Some(b'|') => {
                    port.read_byte()?;
                    skip_block_comment(port)?;
                    continue;
                }
                Some(b'!') => {
                    port.read_byte()?;
                    skip_bang_comment(port)?;
                    continue;
                }
                Some(b';') => {
                    port.read_byte()?;
                    return skip_datum_comment(port);
                }
                _ => return Ok(Some(b)),
            }
        }
        return Ok(Some(b));
    }
}

/// `#;` discards the following datum syntactically. We can't allocate cells
/// for it without a `Reader`, so instead we skip balanced-paren/string/atom
/// structure directly on the byte stream and loop back into
/// `skip_atmosphere` for whatever follows.
fn skip_datum_comment(port: &mut Port) -> MesResult<Option<u8>> {
    skip_raw_datum(port)?;
    skip_atmosphere(port)
}

fn skip_raw_datum(port: &mut Port) -> MesResult<()> {
    let b = match skip_raw_atmosphere(port)? {
        None => return Err(MesError::scheme("bad-syntax", "#; with no following datum")),
        Some(b) => b,
    };
    match b {
        b'(' => {
            loop {
                match skip_raw_atmosphere(port)? {
                    None => return Err(MesError::scheme("bad-syntax", "unterminated list")),
                    Some(c) if c == b')' => return Ok(()),
                    Some(b'.') if matches!(port.peek_byte()?, Some(c) if is_delimiter(c)) => {
                        skip_raw_datum(port)?;
                    }
                    Some(c) => {
                        unread_raw(port, c);
                        skip_raw_datum(port)?;
                    }
                }
            }
        }
        b'\'' | b'`' => skip_raw_datum(port),
        b',' => {
            if let Some(b'@') = port.peek_byte()? {
                port.read_byte()?;
            }
            skip_raw_datum(port)
        }
        b'"' => {
            loop {
                match port.read_byte()? {
                    None => return Err(MesError::scheme("bad-syntax", "unterminated string")),
                    Some(b'\\') => {
                        port.read_byte()?;
                    }
                    Some(b'"') => return Ok(()),
                    Some(_) => {}
                }
            }
        }
        b'#' => {
            if let Some(b'(') = port.peek_byte()? {
                port.read_byte()?;
                loop {
                    match skip_raw_atmosphere(port)? {
                        None => return Err(MesError::scheme("bad-syntax", "unterminated vector")),
                        Some(b')') => return Ok(()),
                        Some(c) => {
                            unread_raw(port, c);
                            skip_raw_datum(port)?;
                        }
                    }
                }
            } else {
                while let Some(c) = port.peek_byte()? {
                    if is_delimiter(c) {
                        break;
                    }
                    port.read_byte()?;
                }
                Ok(())
            }
        }
        _ => {
            while let Some(c) = port.peek_byte()? {
                if is_delimiter(c) {
                    break;
                }
                port.read_byte()?;
            }
            Ok(())
        }
    }
}

fn skip_raw_atmosphere(port: &mut Port) -> MesResult<Option<u8>> {
    loop {
        let b = match port.read_byte()? {
            None => return Ok(None),
            Some(b) => b,
        };
        if b.is_ascii_whitespace() {
            continue;
        }
        if b == b';' {
            while let Some(c) = port.read_byte()? {
                if c == b'\n' {
                    break;
                }
            }
            continue;
        }
        return Ok(Some(b));
    }
}

fn unread_raw(port: &mut Port, b: u8) {
    port.unread_byte(b);
}

fn skip_block_comment(port: &mut Port) -> MesResult<()> {
    let mut depth = 1u32;
    loop {
        match port.read_byte()? {
            None => return Err(MesError::scheme("bad-syntax", "unterminated #| comment")),
            Some(b'|') => {
                if let Some(b'#') = port.peek_byte()? {
                    port.read_byte()?;
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
            }
            Some(b'#') => {
                if let Some(b'|') = port.peek_byte()? {
                    port.read_byte()?;
                    depth += 1;
                }
            }
            Some(_) => {}
        }
    }
}

/// `#!rest ... !#`-style block comment, terminated by a bare `!#`.
fn skip_bang_comment(port: &mut Port) -> MesResult<()> {
    loop {
        match port.read_byte()? {
            None => return Err(MesError::scheme("bad-syntax", "unterminated #! comment")),
            Some(b'!') => {
                if let Some(b'#') = port.peek_byte()? {
                    port.read_byte()?;
                    return Ok(());
                }
            }
            Some(_) => {}
        }
    }
}

fn read_datum(r: &mut Reader, port: &mut Port, syntax: &Syntax, first: u8) -> MesResult<CellRef> {
    match first {
        b'(' => read_list(r, port, syntax, b')'),
        b')' => Err(MesError::scheme("bad-syntax", "unexpected close paren")),
        b'\'' => {
            let inner = read_required(r, port, syntax)?;
            wrap(r, syntax.quote, inner, syntax.nil)
        }
        b'`' => {
            let inner = read_required(r, port, syntax)?;
            wrap(r, syntax.quasiquote, inner, syntax.nil)
        }
        b',' => {
            if let Some(b'@') = port.peek_byte()? {
                port.read_byte()?;
                let inner = read_required(r, port, syntax)?;
                wrap(r, syntax.unquote_splicing, inner, syntax.nil)
            } else {
                let inner = read_required(r, port, syntax)?;
                wrap(r, syntax.unquote, inner, syntax.nil)
            }
        }
        b'"' => read_string(r, port),
        b'#' => read_hash(r, port, syntax),
        _ => read_atom(r, port, first),
    }
}

fn read_required(r: &mut Reader, port: &mut Port, syntax: &Syntax) -> MesResult<CellRef> {
    match skip_atmosphere(port)? {
        None => Err(MesError::scheme("bad-syntax", "unexpected eof")),
        Some(b) => read_datum(r, port, syntax, b),
    }
}

/// Build `(head inner)`, the two-element list reader syntax like `'x` and
/// `` `x `` expands to.
fn wrap(r: &mut Reader, head: CellRef, inner: CellRef, nil: CellRef) -> MesResult<CellRef> {
    let tail = r.cons(inner, nil)?;
    r.cons(head, tail)
}

fn read_list(r: &mut Reader, port: &mut Port, syntax: &Syntax, close: u8) -> MesResult<CellRef> {
    let mut items: Vec<CellRef> = Vec::new();
    let mut tail = syntax.nil;
    loop {
        let b = match skip_atmosphere(port)? {
            None => return Err(MesError::scheme("bad-syntax", "unterminated list")),
            Some(b) => b,
        };
        if b == close {
            break;
        }
        if b == b'.' {
            if let Some(peeked) = port.peek_byte()? {
                if is_delimiter(peeked) {
                    tail = read_required(r, port, syntax)?;
                    loop {
                        match skip_atmosphere(port)? {
                            None => return Err(MesError::scheme("bad-syntax", "unterminated list")),
                            Some(b2) if b2 == close => break,
                            Some(_) => return Err(MesError::scheme("bad-syntax", "malformed dotted list")),
                        }
                    }
                    break;
                }
            }
            items.push(read_datum(r, port, syntax, b)?);
            continue;
        }
        items.push(read_datum(r, port, syntax, b)?);
    }

    let mut result = tail;
    for item in items.into_iter().rev() {
        result = r.cons(item, result)?;
    }
    Ok(result)
}

fn read_string(r: &mut Reader, port: &mut Port) -> MesResult<CellRef> {
    let mut bytes = Vec::new();
    loop {
        match port.read_byte()? {
            None => return Err(MesError::scheme("bad-syntax", "unterminated string literal")),
            Some(b'"') => break,
            Some(b'\\') => match port.read_byte()? {
                None => return Err(MesError::scheme("bad-syntax", "unterminated string literal")),
                Some(b'n') => bytes.push(b'\n'),
                Some(b't') => bytes.push(b'\t'),
                Some(b'r') => bytes.push(b'\r'),
                Some(b'\\') => bytes.push(b'\\'),
                Some(b'"') => bytes.push(b'"'),
                Some(b'\n') => {} // escaped newline: line continuation, contributes no byte
                Some(other) => bytes.push(other),
            },
            Some(b) => bytes.push(b),
        }
    }
    r.heap.alloc_bytes(Tag::TString, &bytes, r.roots)
}

fn read_hash(r: &mut Reader, port: &mut Port, syntax: &Syntax) -> MesResult<CellRef> {
    let b = port
        .read_byte()?
        .ok_or_else(|| MesError::scheme("bad-syntax", "unexpected eof after #"))?;
    match b {
        b't' => Ok(syntax.t),
        b'f' => Ok(syntax.f),
        b'\\' => read_char(r, port),
        b'(' => read_vector(r, port, syntax),
        b'd' => read_radixed_atom(r, port, 10),
        b'x' => read_radixed_atom(r, port, 16),
        b'b' => read_radixed_atom(r, port, 2),
        b'o' => read_radixed_atom(r, port, 8),
        other => Err(MesError::scheme("bad-syntax", format!("unsupported # syntax: #{}", other as char))),
    }
}

fn read_char(r: &mut Reader, port: &mut Port) -> MesResult<CellRef> {
    let first = port
        .read_byte()?
        .ok_or_else(|| MesError::scheme("bad-syntax", "unexpected eof in character literal"))?;
    if !first.is_ascii_alphabetic() {
        return r.heap.alloc_cell(Tag::TChar, first as i64, 0, r.roots);
    }
    let mut name = vec![first];
    while let Some(c) = port.peek_byte()? {
        if is_delimiter(c) {
            break;
        }
        name.push(port.read_byte()?.unwrap());
    }
    if name.len() == 1 {
        return r.heap.alloc_cell(Tag::TChar, name[0] as i64, 0, r.roots);
    }
    let code = match name.as_slice() {
        b"space" => b' ',
        b"newline" | b"linefeed" | b"nl" => b'\n',
        b"tab" => b'\t',
        b"nul" | b"null" => 0,
        b"return" => b'\r',
        b"backspace" => 0x08,
        b"delete" | b"rubout" => 0x7f,
        b"escape" | b"altmode" => 0x1b,
        _ => {
            return Err(MesError::scheme(
                "bad-syntax",
                format!("unknown character name #\\{}", String::from_utf8_lossy(&name)),
            ))
        }
    };
    r.heap.alloc_cell(Tag::TChar, code as i64, 0, r.roots)
}

fn read_vector(r: &mut Reader, port: &mut Port, syntax: &Syntax) -> MesResult<CellRef> {
    let mut items = Vec::new();
    loop {
        match skip_atmosphere(port)? {
            None => return Err(MesError::scheme("bad-syntax", "unterminated vector literal")),
            Some(b')') => break,
            Some(b) => items.push(read_datum(r, port, syntax, b)?),
        }
    }
    let vec_ref = r.heap.alloc_vector(Tag::TVector, items.len(), syntax.nil, r.roots)?;
    for (i, item) in items.into_iter().enumerate() {
        r.heap.vector_set(vec_ref, i, item);
    }
    Ok(vec_ref)
}

fn read_radixed_atom(r: &mut Reader, port: &mut Port, radix: u32) -> MesResult<CellRef> {
    let mut token = Vec::new();
    while let Some(c) = port.peek_byte()? {
        if is_delimiter(c) {
            break;
        }
        token.push(port.read_byte()?.unwrap());
    }
    let text = String::from_utf8_lossy(&token);
    let n = i64::from_str_radix(text.trim_start_matches('+'), radix)
        .map_err(|_| MesError::scheme("bad-syntax", format!("invalid #-radixed number: {}", text)))?;
    r.heap.alloc_cell(Tag::TNumber, 0, n, r.roots)
}

fn read_atom(r: &mut Reader, port: &mut Port, first: u8) -> MesResult<CellRef> {
    let mut token = vec![first];
    while let Some(c) = port.peek_byte()? {
        if is_delimiter(c) {
            break;
        }
        token.push(port.read_byte()?.unwrap());
    }
    if let Some(n) = parse_decimal_number(&token) {
        return r.heap.alloc_cell(Tag::TNumber, 0, n, r.roots);
    }
    r.intern(&token)
}

/// Spec's reader tie-break: a token is a number only if, after an optional
/// leading `+`/`-`, every remaining byte is an ASCII digit and at least one
/// digit is present. A bare `+` or `-` is a symbol.
fn parse_decimal_number(token: &[u8]) -> Option<i64> {
    if token.is_empty() {
        return None;
    }
    let (sign, digits) = match token[0] {
        b'+' => (1i64, &token[1..]),
        b'-' => (-1i64, &token[1..]),
        _ => (1i64, &token[..]),
    };
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse::<i64>().ok().map(|n| sign * n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::PortTable;

    struct NoRoots;
    impl Roots for NoRoots {
        fn for_each_root_mut(&mut self, _f: &mut dyn FnMut(&mut CellRef)) {}
    }

    fn fresh_syntax(heap: &mut Heap, roots: &mut dyn Roots) -> Syntax {
        let nil = heap.alloc_cell(Tag::TSpecial, crate::value::special::NIL, 0, roots).unwrap();
        let t = heap.alloc_cell(Tag::TSpecial, crate::value::special::TRUE, 0, roots).unwrap();
        let f = heap.alloc_cell(Tag::TSpecial, crate::value::special::FALSE, 0, roots).unwrap();
        let eof = heap.alloc_cell(Tag::TSpecial, crate::value::special::EOF, 0, roots).unwrap();
        let (quote, g1) = symbols::intern(heap, nil, b"quote", roots).unwrap();
        let (quasiquote, g2) = symbols::intern(heap, g1, b"quasiquote", roots).unwrap();
        let (unquote, g3) = symbols::intern(heap, g2, b"unquote", roots).unwrap();
        let (unquote_splicing, _g4) = symbols::intern(heap, g3, b"unquote-splicing", roots).unwrap();
        Syntax {
            nil,
            t,
            f,
            eof,
            quote,
            quasiquote,
            unquote,
            unquote_splicing,
        }
    }

    fn read_one(src: &[u8]) -> (Heap, CellRef) {
        let mut heap = Heap::new(256, 1024, 16);
        let mut roots = NoRoots;
        let syntax = fresh_syntax(&mut heap, &mut roots);
        let mut table = PortTable::new();
        let idx = table.open_input_string(src.to_vec());
        let port = table.get_mut(idx).unwrap();

        let g_symbols = syntax.nil;
        let mut reader = Reader {
            heap: &mut heap,
            roots: &mut roots,
            g_symbols,
        };
        let form = read_form(&mut reader, port, &syntax).unwrap();
        (heap, form)
    }

    #[test]
    fn reads_a_decimal_number() {
        let (heap, form) = read_one(b"42");
        assert_eq!(heap.get(form).a, 0);
        assert_eq!(heap.get(form).b, 42);
        assert_eq!(heap.get(form).tag, Tag::TNumber);
    }

    #[test]
    fn reads_a_negative_number() {
        let (heap, form) = read_one(b"-7");
        assert_eq!(heap.get(form).b, -7);
    }

    #[test]
    fn bare_sign_is_a_symbol_not_a_number() {
        let (heap, form) = read_one(b"-");
        assert_eq!(heap.tag(form), Tag::TSymbol);
        assert_eq!(heap.bytes_of(form), b"-");
    }

    #[test]
    fn reads_a_string_with_escapes() {
        let (heap, form) = read_one(b"\"a\\nb\"");
        assert_eq!(heap.tag(form), Tag::TString);
        assert_eq!(heap.bytes_of(form), b"a\nb");
    }

    #[test]
    fn reads_a_proper_list() {
        let (heap, form) = read_one(b"(1 2 3)");
        assert_eq!(heap.tag(form), Tag::TPair);
        assert_eq!(heap.get(heap.car(form)).b, 1);
        let rest = heap.cdr(form);
        assert_eq!(heap.get(heap.car(rest)).b, 2);
    }

    #[test]
    fn reads_a_dotted_pair() {
        let (heap, form) = read_one(b"(1 . 2)");
        assert_eq!(heap.get(heap.car(form)).b, 1);
        assert_eq!(heap.get(heap.cdr(form)).b, 2);
    }

    #[test]
    fn quote_expands_to_a_two_element_list() {
        let (heap, form) = read_one(b"'x");
        assert_eq!(heap.tag(form), Tag::TPair);
        assert_eq!(heap.tag(heap.car(form)), Tag::TSymbol);
        assert_eq!(heap.bytes_of(heap.car(form)), b"quote");
        let inner = heap.car(heap.cdr(form));
        assert_eq!(heap.bytes_of(inner), b"x");
    }

    #[test]
    fn eof_on_empty_input_is_the_eof_singleton() {
        let mut heap = Heap::new(256, 1024, 16);
        let mut roots = NoRoots;
        let syntax = fresh_syntax(&mut heap, &mut roots);
        let mut table = PortTable::new();
        let idx = table.open_input_string(Vec::new());
        let port = table.get_mut(idx).unwrap();
        let g_symbols = syntax.nil;
        let mut reader = Reader {
            heap: &mut heap,
            roots: &mut roots,
            g_symbols,
        };
        let form = read_form(&mut reader, port, &syntax).unwrap();
        assert_eq!(form, syntax.eof);
    }

    #[test]
    fn semicolon_comment_is_skipped() {
        let (heap, form) = read_one(b"; comment\n7");
        assert_eq!(heap.get(form).b, 7);
    }

    #[test]
    fn reads_a_vector_literal() {
        let (heap, form) = read_one(b"#(1 2)");
        assert_eq!(heap.tag(form), Tag::TVector);
        assert_eq!(heap.vector_len(form), 2);
        assert_eq!(heap.get(heap.vector_ref(form, 0)).b, 1);
    }
}
