use clap::{CommandFactory, Parser};

use switchmux::cli::Cli;
use switchmux::error::MuxError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match switchmux::cmd::dispatch(cli).await {
        Ok(()) => {}
        Err(e @ MuxError::Usage { .. }) => {
            eprintln!("Error: {e}\n");
            let _ = Cli::command().print_help();
            std::process::exit(2);
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
