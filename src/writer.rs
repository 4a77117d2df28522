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

//! Printing Scheme values back out to a port (spec §4.7, §6.1 `write_form`).
//!
//! `write` quotes strings and characters so the output can be read back;
//! `display` prints their contents raw. Everything else prints the same way
//! under both modes.

use crate::cell::{CellRef, Tag};
use crate::error::MesResult;
use crate::heap::Heap;
use crate::port::Port;
use crate::value::special;

pub fn write_form(heap: &Heap, port: &mut Port, r: CellRef, write_mode: bool) -> MesResult<()> {
    if r.is_sentinel() {
        return port.write_bytes(b"()");
    }
    match heap.tag(r) {
        Tag::TSpecial => write_special(heap, port, r),
        Tag::TNumber => port.write_bytes(heap.get(r).b.to_string().as_bytes()),
        Tag::TChar => write_char(port, heap.get(r).a as u8, write_mode),
        Tag::TPair => write_list(heap, port, r, write_mode),
        Tag::TSymbol => port.write_bytes(&heap.bytes_of(r)),
        Tag::TKeyword => {
            port.write_bytes(b":")?;
            port.write_bytes(&heap.bytes_of(r))
        }
        Tag::TString => write_string(port, &heap.bytes_of(r), write_mode),
        Tag::TVector => write_vector(heap, port, r, write_mode),
        Tag::TValues => write_tagged(port, b"#<values>"),
        Tag::TStruct => write_tagged(port, b"#<struct>"),
        Tag::TClosure => write_tagged(port, b"#<procedure>"),
        Tag::TContinuation => write_tagged(port, b"#<continuation>"),
        Tag::TMacro => write_tagged(port, b"#<macro>"),
        Tag::TPort => write_tagged(port, b"#<port>"),
        Tag::TFunction => write_tagged(port, b"#<primitive>"),
        Tag::TRef => write_tagged(port, b"#<ref>"),
        Tag::TVariable => write_form(heap, port, heap.car(r), write_mode),
        Tag::TBytes => write_tagged(port, b"#<bytes>"),
        Tag::TBrokenHeart => write_tagged(port, b"#<broken-heart>"),
    }
}

fn write_tagged(port: &mut Port, s: &[u8]) -> MesResult<()> {
    port.write_bytes(s)
}

fn write_special(heap: &Heap, port: &mut Port, r: CellRef) -> MesResult<()> {
    match heap.get(r).a {
        special::NIL => port.write_bytes(b"()"),
        special::TRUE => port.write_bytes(b"#t"),
        special::FALSE => port.write_bytes(b"#f"),
        special::UNSPECIFIED => Ok(()),
        special::EOF => port.write_bytes(b"#<eof>"),
        _ => port.write_bytes(b"#<special>"),
    }
}

fn write_char(port: &mut Port, byte: u8, write_mode: bool) -> MesResult<()> {
    if !write_mode {
        return port.write_bytes(&[byte]);
    }
    let name: &[u8] = match byte {
        b' ' => b"#\\space",
        b'\n' => b"#\\newline",
        b'\t' => b"#\\tab",
        b'\r' => b"#\\return",
        0 => b"#\\nul",
        0x7f => b"#\\delete",
        0x1b => b"#\\escape",
        _ => {
            port.write_bytes(b"#\\")?;
            return port.write_bytes(&[byte]);
        }
    };
    port.write_bytes(name)
}

fn write_string(port: &mut Port, bytes: &[u8], write_mode: bool) -> MesResult<()> {
    if !write_mode {
        return port.write_bytes(bytes);
    }
    port.write_bytes(b"\"")?;
    for &b in bytes {
        match b {
            b'"' => port.write_bytes(b"\\\"")?,
            b'\\' => port.write_bytes(b"\\\\")?,
            b'\n' => port.write_bytes(b"\\n")?,
            b'\t' => port.write_bytes(b"\\t")?,
            b'\r' => port.write_bytes(b"\\r")?,
            _ => port.write_bytes(&[b])?,
        }
    }
    port.write_bytes(b"\"")
}

fn write_list(heap: &Heap, port: &mut Port, r: CellRef, write_mode: bool) -> MesResult<()> {
    port.write_bytes(b"(")?;
    let mut cur = r;
    let mut first = true;
    loop {
        if !first {
            port.write_bytes(b" ")?;
        }
        first = false;
        write_form(heap, port, heap.car(cur), write_mode)?;
        let next = heap.cdr(cur);
        if next.is_sentinel() || heap.tag(next) == Tag::TSpecial && heap.get(next).a == special::NIL {
            break;
        }
        if heap.tag(next) != Tag::TPair {
            port.write_bytes(b" . ")?;
            write_form(heap, port, next, write_mode)?;
            break;
        }
        cur = next;
    }
    port.write_bytes(b")")
}

fn write_vector(heap: &Heap, port: &mut Port, r: CellRef, write_mode: bool) -> MesResult<()> {
    port.write_bytes(b"#(")?;
    let len = heap.vector_len(r);
    for i in 0..len {
        if i > 0 {
            port.write_bytes(b" ")?;
        }
        write_form(heap, port, heap.vector_ref(r, i), write_mode)?;
    }
    port.write_bytes(b")")
}
