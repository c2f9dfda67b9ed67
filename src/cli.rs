use clap::{Parser, Subcommand};

const DEFAULT_DATA_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/data");

#[derive(Parser, Debug)]
#[command(name = "fees-backend")]
#[command(about = "CMS fee-schedule ingestion backend", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the import HTTP API.
    Serve(ServeArgs),
    /// Import one local file through the same pipeline (operators, CI).
    Import(ImportArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    /// Backend data directory (sqlite store).
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: String,

    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, default_value_t = 8787)]
    pub port: u16,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ImportArgs {
    /// Backend data directory (sqlite store).
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: String,

    /// Dataset tag: mpfs|gpci|opps|dmepos|dmepen|clfs|zip-crosswalk|self-test.
    #[arg(long)]
    pub data_type: String,

    /// Reference year; dataset-specific default when omitted.
    #[arg(long)]
    pub year: Option<i32>,

    /// Validate and report without writing to the store.
    #[arg(long)]
    pub dry_run: bool,

    /// Path to the .csv/.xlsx/.xls file (not required for self-test).
    pub file: Option<String>,
}
