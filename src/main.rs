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

//! A thin binary front end over `bootscheme`: locate the boot file, build an
//! `Interpreter`, and loop read/expand/eval/write until EOF (spec §6.1's
//! control flow, §1's note that the CLI front end proper -- full `MES_BOOT`
//! discovery, `--help`, REPL ergonomics -- is an out-of-scope collaborator).
//! This exists only to make the core runnable end to end; it does not
//! attempt the host-OS argument contract of spec §6.2/§6.3 beyond reading
//! `MES_BOOT`/a single positional argument for the boot script path.

use std::process::ExitCode;

use bootscheme::config::{Config, CoreMode};
use bootscheme::{read_eval_print_one, Interpreter, MesError};

fn main() -> ExitCode {
    env_logger::init();

    let mut config = Config::from_env();
    if let Some(path) = std::env::args().nth(1) {
        config.boot_file = path;
    }

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", format_for_exit(&e));
            ExitCode::FAILURE
        }
    }
}

/// Fatal errors already render as `mes: <message>` (`MesError`'s `Display`
/// impl); Scheme-level errors that escape all the way to the top get the
/// same `mes:` prefix here so every exit-1 path looks the same on fd 2
/// (spec §6.4: "Error messages go to fd 2").
fn format_for_exit(e: &MesError) -> String {
    if e.is_fatal() {
        e.to_string()
    } else {
        format!("mes: {}", e)
    }
}

fn run(config: Config) -> Result<(), MesError> {
    let boot_file = config.boot_file.clone();
    let core_mode = config.core_mode;
    let mut interp = Interpreter::new(config)?;

    if core_mode == CoreMode::BootThenRepl {
        let boot_port = interp
            .ports
            .open_input_file(&boot_file)
            .map_err(|_| MesError::fatal(format!("{}: boot file not found", boot_file)))?;

        log::info!("booting from {}", boot_file);
        while read_eval_print_one(&mut interp, boot_port)? {}
        interp.ports.close(boot_port).ok();
    }

    // `MES_CORE=stdin` skips the boot file and reads straight from stdin;
    // the default mode falls through to stdin too once the boot file hits
    // EOF (spec §9's "`MES_CORE` branch that falls through to stdin after
    // processing `--boot`" -- retained deliberately, not resolved away).
    let stdin_port = interp.ports.current_input;
    while read_eval_print_one(&mut interp, stdin_port)? {}

    Ok(())
}
