use anyhow::Result;
use blockbot_rs_core::cli::Args;
use clap::Parser;

fn main() -> Result<()> {
    let args = Args::parse();
    blockbot_rs_core::run_cli(&args)
}
