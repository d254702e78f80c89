//! kiln with three extra shutdown hooks, for tests that signal a real process.
//!
//! Each hook appends its name to the file named by `KILN_HOOK_LOG`.

use clap::Parser;
use kiln_core::cli::Cli;
use kiln_core::conf::ServerConfig;
use kiln_core::logging::{LogOptions, init_logging};
use kiln_core::shutdown;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

fn main() {
    let mut config = ServerConfig::from_cli(&Cli::parse());
    config.shutdown_timeout = Duration::from_secs(1);
    init_logging(&LogOptions {
        verbose: false,
        quiet: false,
    });

    let log = std::env::var_os("KILN_HOOK_LOG").map(PathBuf::from);
    for name in ["A", "B", "C"] {
        let log = log.clone();
        shutdown::at_shutdown(move || {
            let Some(path) = log else { return };
            let file = std::fs::OpenOptions::new().create(true).append(true).open(&path);
            if let Ok(mut file) = file {
                let _ = writeln!(file, "{name}");
            }
        });
    }

    if let Err(e) = kiln_core::server::run(config) {
        eprintln!("{e:#}");
        std::process::exit(2);
    }
}
