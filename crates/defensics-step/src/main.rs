//! defensics-step - run a Defensics fuzz test as a CI build step
//!
//! Exit codes: 0 SUCCESS, 1 FAILURE (or a setup error), 2 ABORTED.

use clap::Parser;

mod commands;

use commands::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.execute().await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}
