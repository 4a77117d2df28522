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

//! Environment-variable-driven tuning knobs.
//!
//! The core is otherwise free of knowledge of argument parsing (that is the
//! out-of-scope driver's job, spec §1), but it does consume a handful of
//! environment variables to size the arena and locate the boot script
//! (spec §6.3). This module centralizes their names and defaults the way
//! `fgc::config::GcConfig` centralizes GC tuning knobs.

use std::env;

/// Default cells per semispace, matching `MES_ARENA`'s documented default.
pub const DEFAULT_ARENA_CELLS: usize = 1_000_000;

/// Default root stack depth in cell slots, matching `MES_STACK`'s default.
pub const DEFAULT_STACK_CELLS: usize = 100_000;

/// Hard cap on arena growth absent an explicit `MES_MAX_ARENA`.
pub const DEFAULT_MAX_ARENA_CELLS: usize = 100_000_000;

/// Reserved headroom subtracted from `MES_MAX_ARENA` for the final cap
/// (spec §4.1: "caps to `MAX_ARENA_SIZE - JAM_SIZE`").
pub const DEFAULT_JAM_SIZE: usize = 1 << 14;

pub const DEFAULT_BOOT_FILE: &str = "boot-0.scm";
pub const DEFAULT_PREFIX: &str = ".";

/// Which of the two startup shapes `MES_CORE` selects.
///
/// `BootThenRepl` loads the boot file and then, deliberately, falls through
/// to reading further top-level forms from stdin -- this is the "`MES_CORE`
/// branch that falls through to stdin after processing `--boot`" the design
/// notes call out as plausibly-intentional REPL-after-load behavior. It is
/// retained rather than resolved away, per spec §9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreMode {
    BootThenRepl,
    StdinOnly,
}

/// Tuning parameters read from the process environment at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub arena_cells: usize,
    pub stack_cells: usize,
    pub max_arena_cells: usize,
    pub jam_size: usize,
    pub boot_file: String,
    pub prefix: String,
    pub core_mode: CoreMode,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            arena_cells: DEFAULT_ARENA_CELLS,
            stack_cells: DEFAULT_STACK_CELLS,
            max_arena_cells: DEFAULT_MAX_ARENA_CELLS,
            jam_size: DEFAULT_JAM_SIZE,
            boot_file: DEFAULT_BOOT_FILE.to_string(),
            prefix: DEFAULT_PREFIX.to_string(),
            core_mode: CoreMode::BootThenRepl,
        }
    }
}

impl Config {
    /// Read configuration from the process environment, falling back to
    /// the documented defaults for anything unset or unparsable.
    pub fn from_env() -> Config {
        let mut config = Config::default();

        if let Some(v) = parse_env_usize("MES_ARENA") {
            config.arena_cells = v;
        }
        if let Some(v) = parse_env_usize("MES_STACK") {
            config.stack_cells = v;
        }
        if let Some(v) = parse_env_usize("MES_MAX_ARENA") {
            config.max_arena_cells = v;
        }
        if let Ok(v) = env::var("MES_BOOT") {
            if !v.is_empty() {
                config.boot_file = v;
            }
        }
        if let Ok(v) = env::var("MES_PREFIX") {
            if !v.is_empty() {
                config.prefix = v;
            }
        }
        if let Ok(v) = env::var("MES_CORE") {
            config.core_mode = if v == "stdin" {
                CoreMode::StdinOnly
            } else {
                CoreMode::BootThenRepl
            };
        }

        log::debug!(
            "config: arena_cells={} stack_cells={} max_arena_cells={} boot_file={:?} core_mode={:?}",
            config.arena_cells,
            config.stack_cells,
            config.max_arena_cells,
            config.boot_file,
            config.core_mode
        );

        config
    }
}

fn parse_env_usize(name: &str) -> Option<usize> {
    env::var(name).ok().and_then(|v| v.parse::<usize>().ok())
}
