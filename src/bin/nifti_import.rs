use clap::Parser;
use scanlineage::Config;
use scanlineage::db::{migrate, resolve_db_url, Db};
use scanlineage::ingest::{import_nifti, parse_scan_date, NiftiContext};
use std::path::PathBuf;
use anyhow::{Context, Result};

#[derive(Parser, Debug)]
#[command(name = "nifti-import")]
#[command(about = "Link every .nii file of a folder to registered repetitions")]
struct Args {
    /// Root of the <session>/<sequence>/<repetition>/<file>.nii tree
    folder: PathBuf,

    /// Participant the files belong to
    participant_id: String,

    /// Scan date (YYYY-MM-DD or DD.MM.YYYY)
    scan_date: String,

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
    let scan_date = parse_scan_date(&args.scan_date)?;

    let db_url = resolve_db_url(args.db_url.as_deref())?;
    let migrations_dir = Config::load()
        .map(|c| c.migrations_dir().to_path_buf())
        .unwrap_or_else(|_| PathBuf::from("migrations"));
    Db::from_url(Some(&db_url))?
        .session(|conn| migrate::run_migrations(conn, &migrations_dir))
        .context("Failed to apply migrations")?;

    let context = NiftiContext::new(args.participant_id, scan_date);
    let summary = import_nifti(&args.folder, &context, Some(&db_url))
        .with_context(|| format!("NIfTI import of {} failed", args.folder.display()))?;

    println!(
        "{} files, {} linked, {} skipped",
        summary.files, summary.linked, summary.skipped
    );
    Ok(())
}
