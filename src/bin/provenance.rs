use clap::Parser;
use scanlineage::Config;
use scanlineage::db::{migrate, resolve_db_url, Db};
use scanlineage::lineage::{create_provenance, ProvenanceFields};
use std::path::PathBuf;
use anyhow::{Context, Result};

#[derive(Parser, Debug)]
#[command(name = "provenance")]
#[command(about = "Create (or look up) a provenance record and print its id")]
struct Args {
    /// Dataset name
    dataset: String,

    #[arg(long)]
    matlab_version: Option<String>,

    #[arg(long)]
    spm_version: Option<String>,

    #[arg(long)]
    spm_revision: Option<String>,

    /// Function that produced the dataset
    #[arg(long)]
    fn_called: Option<String>,

    #[arg(long)]
    fn_version: Option<String>,

    /// Free-form additional tool information
    #[arg(long)]
    others: Option<String>,

    /// Database URL (defaults to SCANLINEAGE_DB_URL, then config.toml)
    #[arg(long)]
    db_url: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", "info")
    ).init();

    let args = Args::parse();

    let db_url = resolve_db_url(args.db_url.as_deref())?;
    let migrations_dir = Config::load()
        .map(|c| c.migrations_dir().to_path_buf())
        .unwrap_or_else(|_| PathBuf::from("migrations"));
    Db::from_url(Some(&db_url))?
        .session(|conn| migrate::run_migrations(conn, &migrations_dir))
        .context("Failed to apply migrations")?;

    let fields = ProvenanceFields {
        matlab_version: args.matlab_version,
        spm_version: args.spm_version,
        spm_revision: args.spm_revision,
        fn_called: args.fn_called,
        fn_version: args.fn_version,
        others: args.others,
        ..ProvenanceFields::new(args.dataset)
    };

    let provenance_id = create_provenance(&fields, Some(&db_url))?;
    println!("{}", provenance_id);

    Ok(())
}
