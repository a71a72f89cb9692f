//! CSV export of generated reports

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use arrow::csv::WriterBuilder;
use chrono::Local;
use tracing::{debug, info};

use crate::error::{AnalyticsError, Result};
use crate::reports::Report;

/// Write every non-empty report to `<dir>/<name>_<YYYYmmdd_HHMMSS>.csv`,
/// creating `dir` if needed. Returns the files written.
pub fn save_report(reports: &[Report], dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).map_err(|e| AnalyticsError::io(dir, e))?;

    let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let mut written = Vec::new();
    for report in reports {
        if report.is_empty() {
            debug!("Skipping empty report {}", report.name);
            continue;
        }

        let path = dir.join(format!("{}_{}.csv", report.name, timestamp));
        let file = File::create(&path).map_err(|e| AnalyticsError::io(&path, e))?;
        let mut writer = WriterBuilder::new().with_header(true).build(file);
        writer.write(&report.batch)?;
        written.push(path);
    }

    info!("Saved {} reports to {}", written.len(), dir.display());
    Ok(written)
}
