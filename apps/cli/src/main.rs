//! GrandGuru CLI: crawl job server, crawl worker, and one-shot crawls.
//!
//! Crawls product and documentation sites into a local knowledge base and
//! streams job progress to clients.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::{Cli, Command};

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);

    let runtime = tokio::runtime::Runtime::new()?;
    if let Command::Worker(args) = cli.command {
        // The stdin reader blocks runtime shutdown, so exit directly.
        let code = match runtime.block_on(commands::cmd_worker(args)) {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("Error: {e:?}");
                1
            }
        };
        std::process::exit(code);
    }
    runtime.block_on(commands::run(cli))
}
