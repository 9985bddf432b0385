use crate::{
    config::ReportDefinition,
    error::RunError,
    util::{compact_stamp, ensure_dir, now},
    warehouse::{Table, Warehouse},
};
use anyhow::{Context, Result};
use serde::Serialize;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use time::OffsetDateTime;
use tracing::info;

/// A CSV written for one report during one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedArtifact {
    pub report_name: String,
    pub file_path: PathBuf,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub rows: usize,
}

impl GeneratedArtifact {
    /// File name including extension, e.g. `Workforce_20240307090501.csv`.
    pub fn file_name(&self) -> String {
        self.file_path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn file_stem(&self) -> String {
        self.file_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

pub struct DatasetGenerator<W: Warehouse> {
    warehouse: W,
    destination: PathBuf,
}

impl<W: Warehouse> DatasetGenerator<W> {
    pub fn new(warehouse: W, destination: impl Into<PathBuf>) -> Self {
        Self {
            warehouse,
            destination: destination.into(),
        }
    }

    /// Extracts and writes every report in order, appending each to `out` as it
    /// completes. The first failure stops the loop; whatever was appended before
    /// it stays in `out` and on disk.
    pub fn generate_all(
        &self,
        reports: &[ReportDefinition],
        out: &mut Vec<(ReportDefinition, GeneratedArtifact)>,
    ) -> Result<(), RunError> {
        for report in reports {
            let artifact = self.generate(report)?;
            out.push((report.clone(), artifact));
        }
        Ok(())
    }

    pub fn generate(&self, report: &ReportDefinition) -> Result<GeneratedArtifact, RunError> {
        info!("getting {} data from data warehouse", report.name);
        let table = self
            .warehouse
            .execute(&report.query)
            .map_err(|source| RunError::Extract {
                report: report.name.clone(),
                source,
            })?;
        let created_at = now();
        info!(
            "{} loaded: {} columns, {} rows",
            report.name,
            table.columns.len(),
            table.rows.len()
        );

        let path = artifact_path(&self.destination, &report.name, created_at);
        info!("generating CSV {}", path.display());
        write_csv(&path, &table).map_err(|source| RunError::Persist {
            report: report.name.clone(),
            path: path.clone(),
            source,
        })?;
        info!("CSV created");

        Ok(GeneratedArtifact {
            report_name: report.name.clone(),
            file_path: path,
            created_at,
            rows: table.rows.len(),
        })
    }
}

/// `<dir>/<name>_<YYYYMMDDHHMMSS>.csv`, with `_2`, `_3`, ... appended if that
/// file already exists so an earlier artifact is never overwritten.
pub fn artifact_path(dir: &Path, report_name: &str, created_at: OffsetDateTime) -> PathBuf {
    let base = format!("{}_{}", report_name, compact_stamp(created_at));
    let mut path = dir.join(format!("{base}.csv"));
    let mut n = 2u32;
    while path.exists() {
        path = dir.join(format!("{base}_{n}.csv"));
        n += 1;
    }
    path
}

/// Writes header + rows to a temp file beside `path`, then renames it into place.
pub fn write_csv(path: &Path, table: &Table) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    ensure_dir(dir)?;

    let tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("creating temp file in {}", dir.display()))?;
    let mut w = csv::WriterBuilder::new()
        .flexible(false)
        .from_writer(BufWriter::new(tmp));

    w.write_record(&table.columns)?;
    for row in &table.rows {
        w.write_record(row.iter().map(|v| v.as_deref().unwrap_or("")))?;
    }

    let mut buf = w
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flushing CSV: {}", e.error()))?;
    buf.flush()?;
    let tmp = buf
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flushing CSV: {}", e.error()))?;
    tmp.as_file().sync_all()?;
    tmp.persist_noclobber(path)
        .map_err(|e| e.error)
        .with_context(|| format!("persisting {}", path.display()))?;
    Ok(())
}
