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

//! Interpreter error types.
//!
//! Defines the three error classes from the design's error handling section:
//! fatal collector/boot errors, Scheme-level errors handed to the error
//! continuation, and end-of-input (which is not an error at all and is
//! represented by the EOF singleton, never by `Result::Err`).

use thiserror::Error;

use crate::cell::CellRef;

/// Errors that can escape the interpreter core.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MesError {
    /// Collector inconsistency, arena growth failure, or missing boot file.
    /// Printed as `mes: <message>` to stderr and the process exits 1.
    #[error("mes: {0}")]
    Fatal(String),

    /// A Scheme-level error: type mismatch in a primitive, unbound variable,
    /// division by zero, arity mismatch. Modeled as `(error-key . irritant)`
    /// and routed to the nearest escape continuation.
    #[error("{key}: {irritant}")]
    Scheme { key: String, irritant: String },

    /// Internal unwinding signal used to implement escape-only
    /// `call-with-current-continuation`: invoking a continuation raises this,
    /// and only the `call/cc` frame that minted `id` catches it. It never
    /// reaches Scheme code as a condition and is not a "real" error; a copy
    /// that escapes every matching frame (the continuation was invoked after
    /// its dynamic extent ended) is reported as fatal, since this interpreter
    /// does not support re-entrant continuations.
    #[error("escape to continuation {id}")]
    Escape { id: u64, value: CellRef },
}

impl MesError {
    pub fn fatal<S: Into<String>>(message: S) -> MesError {
        MesError::Fatal(message.into())
    }

    pub fn scheme<K: Into<String>, I: Into<String>>(key: K, irritant: I) -> MesError {
        MesError::Scheme {
            key: key.into(),
            irritant: irritant.into(),
        }
    }

    pub fn unbound_variable(name: &str) -> MesError {
        MesError::scheme("unbound-variable", name)
    }

    pub fn wrong_type(expected: &str, found_desc: &str) -> MesError {
        MesError::scheme("wrong-type-arg", format!("expected {}, got {}", expected, found_desc))
    }

    pub fn wrong_arity(name: &str, expected: &str, got: usize) -> MesError {
        MesError::scheme(
            "wrong-number-of-args",
            format!("{} expects {} argument(s), got {}", name, expected, got),
        )
    }

    pub fn escape(id: u64, value: CellRef) -> MesError {
        MesError::Escape { id, value }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, MesError::Fatal(_))
    }
}

pub type MesResult<T> = Result<T, MesError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_messages_are_prefixed_for_display() {
        let e = MesError::fatal("broken heart in to-space");
        assert_eq!(format!("{}", e), "mes: broken heart in to-space");
        assert!(e.is_fatal());
    }

    #[test]
    fn scheme_errors_carry_key_and_irritant() {
        let e = MesError::unbound_variable("frobnicate");
        assert!(!e.is_fatal());
        match e {
            MesError::Scheme { key, irritant } => {
                assert_eq!(key, "unbound-variable");
                assert_eq!(irritant, "frobnicate");
            }
            _ => panic!("expected Scheme error"),
        }
    }
}
