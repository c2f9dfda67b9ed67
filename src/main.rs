use anyhow::Context;
use clap::Parser;

use fees_backend::cli;
use fees_backend::dataset::Dataset;
use fees_backend::import::{ImportRequest, run_import};
use fees_backend::server;
use fees_backend::storage::StoragePaths;
use fees_backend::store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = cli::Args::parse();

    match args.cmd {
        cli::Command::Serve(cmd) => server::run(cmd).await.context("serve failed"),
        cli::Command::Import(cmd) => import_file(cmd).context("import failed"),
    }
}

fn import_file(cmd: cli::ImportArgs) -> anyhow::Result<()> {
    let dataset = Dataset::parse(&cmd.data_type)
        .with_context(|| format!("unknown dataType {:?}", cmd.data_type))?;

    let (file_name, bytes) = match &cmd.file {
        Some(path) => {
            let bytes =
                std::fs::read(path).with_context(|| format!("read input file {path}"))?;
            let name = std::path::Path::new(path)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("upload.csv")
                .to_string();
            (name, bytes)
        }
        None => (String::new(), Vec::new()),
    };

    let paths = StoragePaths::new(&cmd.data_dir);
    paths.ensure_dirs().context("create data directories")?;
    let mut store = Store::open(&paths.db_path)
        .with_context(|| format!("open store at {}", paths.db_path.display()))?;

    let request = ImportRequest {
        dataset,
        year: cmd.year,
        dry_run: cmd.dry_run,
        file_name,
        bytes,
    };

    match run_import(&mut store, &request) {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(err) => {
            eprintln!("{}: {err}", err.error_code(dataset));
            for row in err.sample_rows() {
                eprintln!("  {row}");
            }
            std::process::exit(1);
        }
    }
}
