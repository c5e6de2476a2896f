//! Append-only CSV export of stats snapshots. The header is written exactly
//! once, when the file is first created.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::StatsSnapshot;

const HEADER: &str =
    "captured_at,on_duty_seconds,off_duty_seconds,total_seconds,continuous_on_duty_seconds,within_work_hours";

pub struct StatsExporter {
    path: PathBuf,
}

impl StatsExporter {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn append(&self, snapshot: &StatsSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create export directory {}", parent.display())
            })?;
        }

        let needs_header = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len() == 0,
            Err(_) => true,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open export file {}", self.path.display()))?;

        if needs_header {
            writeln!(file, "{HEADER}")?;
        }
        writeln!(
            file,
            "{},{:.1},{:.1},{:.1},{:.1},{}",
            snapshot.captured_at.to_rfc3339(),
            snapshot.on_duty_seconds,
            snapshot.off_duty_seconds,
            snapshot.total_seconds,
            snapshot.continuous_on_duty_seconds,
            snapshot.within_work_hours,
        )?;
        Ok(())
    }
}
