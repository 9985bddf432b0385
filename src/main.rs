use anyhow::Result;
use clap::Parser;
use returns_submitter::{cli, util};

fn main() -> Result<()> {
    util::capture_local_offset();
    let args = cli::Args::parse();
    if let Err(err) = cli::dispatch(args) {
        eprintln!("error: {:#}", err);
        std::process::exit(1);
    }
    Ok(())
}
