use anyhow::Result;
use clap::Parser;
use pdf_rasterize::cli::{self, RunStatus};
use tracing::error;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    match cli::dispatch(args) {
        Ok(RunStatus::Clean) => Ok(()),
        Ok(RunStatus::NeedsAttention) => std::process::exit(2),
        Err(err) => {
            error!("{:#}", err);
            eprintln!("error: {:#}", err);
            std::process::exit(1);
        }
    }
}
