//! Command-line entry point: runs command scripts against disk images.

use std::env;
use std::fmt;
use std::fs;
use std::io;
use std::io::BufRead;
use std::process::exit;
use vdisk::cmd;
use vdisk::cmd::Context;

/// Writes an error to stderr, then exits.
fn error<M: fmt::Display>(msg: M) -> ! {
    eprintln!("vdisk: error: {msg}");
    exit(1);
}

fn main() {
    let mut args = env::args().skip(1);
    let script = args.next();
    if args.next().is_some() {
        error("expected at most one script path");
    }

    // Commands come from the script file when given, from stdin
    // otherwise.
    let lines: Vec<String> = match &script {
        Some(path) => match fs::read_to_string(path) {
            Ok(text) => text.lines().map(str::to_owned).collect(),
            Err(e) => error(format_args!("{path}: {e}")),
        },
        None => io::stdin()
            .lock()
            .lines()
            .map_while(io::Result::ok)
            .collect(),
    };

    let mut ctx = Context::default();
    for line in lines {
        let line = line.trim();
        // Blank lines and comments are framing; they never reach the
        // dispatcher.
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        println!("{}", cmd::dispatch(&mut ctx, line));
    }
}
