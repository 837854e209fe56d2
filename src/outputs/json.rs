//! On-disk run artifacts.
//!
//! # Output Structure
//!
//! Files are named after the run's date window:
//! ```text
//! output_dir/
//! ├── fetch_articles_2025-05-01_to_2025-05-08.json   # normalized articles
//! ├── records_2025-05-01_to_2025-05-08.json          # enriched records
//! └── report_2025-05-01_to_2025-05-08.md             # rendered report
//! ```
//!
//! The articles file can be fed back with `--articles` to skip fetching,
//! the records file with `--records` to re-render without the service.

use crate::models::{Article, DateWindow};
use serde::Serialize;
use serde_json::Value;
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, instrument};

/// Artifact paths of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub articles: PathBuf,
    pub records: PathBuf,
    pub report: PathBuf,
}

impl RunPaths {
    pub fn new(output_dir: impl AsRef<Path>, window: DateWindow) -> Self {
        let dir = output_dir.as_ref();
        let span = format!("{}_to_{}", window.start, window.end);
        Self {
            articles: dir.join(format!("fetch_articles_{span}.json")),
            records: dir.join(format!("records_{span}.json")),
            report: dir.join(format!("report_{span}.md")),
        }
    }
}

/// Serialize `value` as pretty JSON to `path`.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn write_json<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result<(), Box<dyn Error>> {
    let json = serde_json::to_string_pretty(value)?;
    if let Err(e) = fs::write(path, json).await {
        error!(error = %e, "Failed to write JSON");
        return Err(e.into());
    }
    info!("Wrote JSON file");
    Ok(())
}

#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn write_report(report: &str, path: &Path) -> Result<(), Box<dyn Error>> {
    fs::write(path, report).await?;
    info!(bytes = report.len(), "Wrote report");
    Ok(())
}

/// Load articles saved by a previous run.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn read_articles(path: &Path) -> Result<Vec<Article>, Box<dyn Error>> {
    let raw = fs::read_to_string(path).await?;
    let articles: Vec<Article> = serde_json::from_str(&raw)?;
    info!(count = articles.len(), "Loaded saved articles");
    Ok(articles)
}

/// Load saved records as untyped values; the renderer decides what is a
/// record.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn read_record_values(path: &Path) -> Result<Vec<Value>, Box<dyn Error>> {
    let raw = fs::read_to_string(path).await?;
    let values: Vec<Value> = serde_json::from_str(&raw)?;
    Ok(values)
}
