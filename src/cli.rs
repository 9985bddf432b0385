use crate::{
    config::{Config, ReportDefinition},
    dataset::{DatasetGenerator, GeneratedArtifact},
    error::RunError,
    pipeline::{Aborted, Pipeline, RunState, RunSummary},
    report::RunReport,
    submit::{HttpTransport, SubmissionClient},
    util::{compact_stamp, day_stamp, ensure_dir, now, now_rfc3339},
    warehouse,
};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "returns-submitter")]
#[command(about = "Extract return datasets to CSV and submit them to the ingestion API")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./returns-submitter.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Extract every return, then submit every CSV.
    Run {
        /// Restrict to these returns (repeatable).
        #[arg(long)]
        only: Vec<String>,
    },
    /// Extract and write CSVs without submitting them.
    Extract {
        #[arg(long)]
        only: Vec<String>,
    },
    /// Submit an existing CSV using the named return's token.
    Submit {
        #[arg(long)]
        report: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Validate the config and print it with secrets masked.
    Check {},
    /// List ODBC drivers registered on this machine.
    Drivers {},
}

pub fn dispatch(args: Args) -> Result<()> {
    if let Command::Drivers {} = &args.cmd {
        return drivers();
    }

    let cfg_path = resolve_config_path(args.config.as_deref())?;
    let cfg = Config::load(&cfg_path)?;

    match &args.cmd {
        Command::Check {} => check(&cfg, &cfg_path),
        Command::Run { only } => {
            let _guard = init_logging(&args, &cfg, resolve_log_path(&cfg, now()).as_deref())?;
            run(&cfg, only, true).inspect_err(log_unreported)
        }
        Command::Extract { only } => {
            let _guard = init_logging(&args, &cfg, resolve_log_path(&cfg, now()).as_deref())?;
            run(&cfg, only, false).inspect_err(log_unreported)
        }
        Command::Submit { report, file } => {
            let _guard = init_logging(&args, &cfg, resolve_log_path(&cfg, now()).as_deref())?;
            submit_one(&cfg, report, file).inspect_err(log_unreported)
        }
        Command::Drivers {} => drivers(),
    }
}

/// An [`Aborted`] run was already logged where it stopped; anything else is
/// written to the log here, before the file guard drops.
fn log_unreported(err: &anyhow::Error) {
    if err.downcast_ref::<Aborted>().is_none() {
        error!("{err:#}");
    }
}

fn resolve_config_path(user: Option<&Path>) -> Result<PathBuf> {
    if let Some(p) = user {
        return Ok(p.to_path_buf());
    }
    let default = PathBuf::from("returns-submitter.toml");
    if default.exists() {
        Ok(default)
    } else {
        Ok(PathBuf::from("returns-submitter.example.toml"))
    }
}

fn init_logging(
    args: &Args,
    cfg: &Config,
    file_path: Option<&Path>,
) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stdout_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

/// `<log_dir>/<prefix>_<YYYY_MM_DD>.log`; runs on the same day append to one file.
pub fn resolve_log_path(cfg: &Config, started: OffsetDateTime) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }
    Some(PathBuf::from(&cfg.paths.log_dir).join(format!(
        "{}_{}.log",
        cfg.logging.file_prefix,
        day_stamp(started)
    )))
}

fn run(cfg: &Config, only: &[String], submit: bool) -> Result<()> {
    let reports = cfg.selected_reports(only)?;
    let started = now_rfc3339();
    info!("******************* starting process *******************");
    info!(
        "{} returns, warehouse driver={} database={}",
        reports.len(),
        cfg.database.driver,
        cfg.database.database
    );

    ensure_dir(Path::new(&cfg.paths.csv_dir))?;
    ensure_dir(Path::new(&cfg.paths.api_response_dir))?;

    let client = SubmissionClient::new(
        HttpTransport::new(&cfg.api)?,
        cfg.api.url.clone(),
        &cfg.paths.api_response_dir,
    );
    let warehouse = match warehouse::open(&cfg.database) {
        Ok(w) => w,
        Err(e) => {
            let error = RunError::Connect(e);
            error!("{}", error.detail());
            let aborted = Aborted {
                phase: RunState::Init,
                error,
                partial: RunSummary::default(),
            };
            return finish(cfg, &reports, started, Err(aborted));
        }
    };
    let generator = DatasetGenerator::new(warehouse, &cfg.paths.csv_dir);
    let mut pipeline = Pipeline::new(generator, client);

    let result = if submit {
        pipeline.run(&reports)
    } else {
        pipeline.extract(&reports)
    };
    finish(cfg, &reports, started, result)
}

fn finish(
    cfg: &Config,
    reports: &[ReportDefinition],
    started: String,
    result: Result<RunSummary, Aborted>,
) -> Result<()> {
    let report = RunReport::new(started, now_rfc3339(), reports, &result);
    let json = serde_json::to_string_pretty(&report)?;

    if cfg.output.write_run_report {
        let dir = PathBuf::from(&cfg.paths.log_dir);
        ensure_dir(&dir)?;
        let path = dir.join(format!("run_{}.json", compact_stamp(now())));
        std::fs::write(&path, &json)
            .with_context(|| format!("writing run report: {}", path.display()))?;
    }
    if cfg.output.print_summary {
        println!("{json}");
    }

    result?;
    info!("******************* finished process *******************");
    Ok(())
}

fn submit_one(cfg: &Config, report_name: &str, file: &Path) -> Result<()> {
    let report = cfg.report(report_name)?;
    let meta = std::fs::metadata(file).with_context(|| format!("stat {}", file.display()))?;
    let created_at = meta
        .modified()
        .map(OffsetDateTime::from)
        .unwrap_or_else(|_| now());
    let rows = csv::Reader::from_path(file)
        .with_context(|| format!("reading {}", file.display()))?
        .records()
        .count();

    let artifact = GeneratedArtifact {
        report_name: report.name.clone(),
        file_path: file.to_path_buf(),
        created_at,
        rows,
    };
    let client = SubmissionClient::new(
        HttpTransport::new(&cfg.api)?,
        cfg.api.url.clone(),
        &cfg.paths.api_response_dir,
    );
    let outcome = client.submit(&artifact, &report.token)?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

fn check(cfg: &Config, path: &Path) -> Result<()> {
    println!("# {} (valid)", path.display());
    println!("{}", toml::to_string(&cfg.redacted())?);
    if !cfg.database.is_sqlite() && cfg!(not(feature = "odbc")) {
        println!(
            "# warning: driver {:?} needs a build with `--features odbc`",
            cfg.database.driver
        );
    }
    Ok(())
}

fn drivers() -> Result<()> {
    for d in warehouse::drivers()? {
        println!("{d}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn log_file_is_named_by_start_date() {
        let mut cfg = Config::default();
        cfg.paths.log_dir = "logs".into();
        cfg.logging.file_prefix = "FDF_Submission".into();
        let p = resolve_log_path(&cfg, datetime!(2025-11-03 17:45:00 UTC)).unwrap();
        assert_eq!(p, Path::new("logs").join("FDF_Submission_2025_11_03.log"));

        cfg.logging.write_to_file = false;
        assert!(resolve_log_path(&cfg, now()).is_none());
    }

    fn scratch_config(dir: &Path) -> Config {
        let mut cfg = Config::default();
        cfg.api.url = "http://127.0.0.1:9/".into();
        cfg.returns = vec![ReportDefinition {
            name: "Workforce".into(),
            query: "select 1".into(),
            token: "t".into(),
        }];
        cfg.paths.csv_dir = dir.join("csv").display().to_string();
        cfg.paths.api_response_dir = dir.join("resp").display().to_string();
        cfg.paths.log_dir = dir.join("logs").display().to_string();
        cfg.output.print_summary = false;
        cfg
    }

    fn run_reports(cfg: &Config) -> Vec<serde_json::Value> {
        std::fs::read_dir(&cfg.paths.log_dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().is_some_and(|x| x == "json"))
            .map(|p| serde_json::from_str(&std::fs::read_to_string(p).unwrap()).unwrap())
            .collect()
    }

    #[test]
    fn aborted_run_is_recorded_then_returned_as_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let cfg = scratch_config(dir.path());
        let aborted = Aborted {
            phase: RunState::Extracting,
            error: RunError::Extract {
                report: "Workforce".into(),
                source: anyhow!("no such table: workforce"),
            },
            partial: RunSummary::default(),
        };

        let err = finish(&cfg, &cfg.returns, now_rfc3339(), Err(aborted)).unwrap_err();

        assert!(err.downcast_ref::<Aborted>().is_some());
        let reports = run_reports(&cfg);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0]["state"], "ABORTED");
        assert_eq!(reports[0]["aborted_while"], "EXTRACTING");
        assert!(reports[0]["error"].as_str().unwrap().contains("no such table"));
        assert!(!Path::new(&cfg.paths.api_response_dir).exists());
    }

    #[test]
    fn completed_run_is_recorded_and_succeeds() {
        let dir = tempfile::TempDir::new().unwrap();
        let cfg = scratch_config(dir.path());
        finish(&cfg, &cfg.returns, now_rfc3339(), Ok(RunSummary::default())).unwrap();
        let reports = run_reports(&cfg);
        assert_eq!(reports[0]["state"], "DONE");
        assert!(reports[0].get("aborted_while").is_none());
    }

    #[cfg(not(feature = "odbc"))]
    #[test]
    fn unavailable_warehouse_aborts_during_init() {
        let dir = tempfile::TempDir::new().unwrap();
        let cfg = scratch_config(dir.path());
        assert!(!cfg.database.is_sqlite());

        let err = run(&cfg, &[], true).unwrap_err();

        let aborted = err.downcast_ref::<Aborted>().unwrap();
        assert_eq!(aborted.phase, RunState::Init);
        assert!(matches!(aborted.error, RunError::Connect(_)));
        let reports = run_reports(&cfg);
        assert_eq!(reports[0]["aborted_while"], "INIT");
        assert!(reports[0]["returns"][0]["csv"].is_null());
        assert_eq!(std::fs::read_dir(&cfg.paths.csv_dir).unwrap().count(), 0);
    }

    #[test]
    fn parses_repeated_only() {
        let args = Args::try_parse_from([
            "returns-submitter",
            "--config",
            "c.toml",
            "run",
            "--only",
            "A",
            "--only",
            "B",
        ])
        .unwrap();
        match args.cmd {
            Command::Run { only } => assert_eq!(only, ["A", "B"]),
            other => panic!("unexpected {other:?}"),
        }
    }
}
