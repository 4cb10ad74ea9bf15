use clap::Parser;
use scanlineage::Config;
use scanlineage::db::{migrate, resolve_db_url, Db};
use scanlineage::ingest::{parse_scan_date, visit_with_summary, NiftiContext, VisitRequest};
use std::path::PathBuf;
use std::time::Instant;
use anyhow::{Context, Result};

#[derive(Parser, Debug)]
#[command(name = "visit")]
#[command(about = "Ingest an imaging folder under a processing step")]
struct Args {
    /// Name of the processing step
    step_name: String,

    /// Folder to walk
    folder: PathBuf,

    /// Provenance the step belongs to
    provenance_id: i64,

    /// Step whose files are compared against to flag copies
    #[arg(long)]
    previous_step_id: Option<i64>,

    /// Read every DICOM header instead of one per directory
    #[arg(long)]
    no_optimize: bool,

    /// Participant the NIfTI files belong to
    #[arg(long, requires = "scan_date")]
    participant_id: Option<String>,

    /// Scan date of the NIfTI files (YYYY-MM-DD or DD.MM.YYYY)
    #[arg(long, requires = "participant_id")]
    scan_date: Option<String>,

    /// Database URL (defaults to SCANLINEAGE_DB_URL, then config.toml)
    #[arg(long)]
    db_url: Option<String>,

    /// Print the visit summary as JSON instead of the step id
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load().ok();

    let log_level = config
        .as_ref()
        .map(|c| c.ingest.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", log_level)
    ).init();

    let db_url = resolve_db_url(args.db_url.as_deref())?;
    let migrations_dir = config
        .as_ref()
        .map(|c| c.migrations_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("migrations"));
    Db::from_url(Some(&db_url))?
        .session(|conn| migrate::run_migrations(conn, &migrations_dir))
        .context("Failed to apply migrations")?;

    let nifti_context = match (&args.participant_id, &args.scan_date) {
        (Some(participant), Some(date)) => Some(NiftiContext::new(participant.as_str(), parse_scan_date(date)?)),
        _ => None,
    };
    let optimize = !args.no_optimize && config.as_ref().map(|c| c.ingest.optimize).unwrap_or(true);

    let request = VisitRequest::new(args.step_name, args.folder, args.provenance_id)
        .previous_step(args.previous_step_id)
        .optimize(optimize)
        .nifti_context(nifti_context);

    log::info!("Visiting {} as step '{}'", request.folder.display(), request.step_name);
    let start = Instant::now();
    let summary = visit_with_summary(&request, Some(&db_url))
        .with_context(|| format!("Visit of {} failed", request.folder.display()))?;
    log::info!("Visit complete in {:.2?}", start.elapsed());

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", summary.step_id);
    }

    Ok(())
}
