use anyhow::Context;
use clap::Parser;
use kiln_core::cli::Cli;
use kiln_core::conf::ServerConfig;
use kiln_core::logging::{LogOptions, fatal_exit, init_logging};

fn main() {
    let cli = Cli::parse();
    let config = ServerConfig::from_cli(&cli);

    init_logging(&LogOptions {
        verbose: config.verbose,
        quiet: config.quiet,
    });

    if config.dump_config {
        match serde_json::to_string_pretty(&config).context("can not serialize the configuration") {
            Ok(json) => println!("{json}"),
            Err(e) => fatal_exit(&e),
        }
        return;
    }

    tracing::debug!(root = %config.root.display(), mode = ?config.listen_mode, "starting");
    if let Err(e) = kiln_core::server::run(config) {
        fatal_exit(&e);
    }
}
