//! Detail log and summary file of a benchmark run.
//!
//! Both files are `;`-separated. The detail log gets one row per
//! successful measured iteration; the summary sits next to it with
//! `.summary` inserted before the extension.

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::benchmark::stats::{Aggregate, Statistics};
use crate::capability::Direction;
use crate::error::Result;
use crate::migration::MigrationTimings;

const PHASES: [&str; 4] = ["checkpoint", "copy", "restore", "total"];

/// `iteration;timestamp;to_checkpoint;...;back_total`
fn detail_header() -> Vec<String> {
    let mut header = vec!["iteration".to_string(), "timestamp".to_string()];
    for direction in [Direction::SourceToDestination, Direction::DestinationToSource] {
        header.extend(PHASES.iter().map(|p| format!("{}_{}", direction.label(), p)));
    }
    header
}

/// `stats.csv` -> `stats.summary.csv`, `stats` -> `stats.summary`.
pub fn summary_path(log: &Path) -> PathBuf {
    let stem = log
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = match log.extension() {
        Some(ext) => format!("{}.summary.{}", stem, ext.to_string_lossy()),
        None => format!("{}.summary", stem),
    };
    log.with_file_name(name)
}

fn writer(file: File) -> csv::Writer<File> {
    csv::WriterBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .from_writer(file)
}

fn secs(value: f64) -> String {
    format!("{:.4}", value)
}

/// Per-iteration log, truncated when created.
pub struct DetailLog {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl DetailLog {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = writer(File::create(path)?);
        writer.write_record(detail_header())?;
        writer.flush()?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one row and flushes it.
    pub fn append(
        &mut self,
        iteration: usize,
        timestamp: &str,
        to: &MigrationTimings,
        back: &MigrationTimings,
    ) -> Result<()> {
        let mut record = vec![iteration.to_string(), timestamp.to_string()];
        for timings in [to, back] {
            record.extend(
                [timings.checkpoint, timings.copy, timings.restore, timings.total]
                    .into_iter()
                    .map(secs),
            );
        }
        self.writer.write_record(&record)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes the summary file for `stats` next to `log` and returns its path.
pub fn write_summary(log: &Path, stats: &Statistics) -> Result<PathBuf> {
    let path = summary_path(log);
    let mut writer = writer(File::create(&path)?);
    writer.write_record(["name", "min", "avg", "max"])?;

    let rows: [(&str, &Aggregate); 3] = [
        ("to", &stats.to),
        ("back", &stats.back),
        ("summary", &stats.summary),
    ];
    for (name, agg) in rows {
        writer.write_record([name.to_string(), secs(agg.min), secs(agg.avg), secs(agg.max)])?;
    }
    writer.flush()?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn timings(total: f64) -> MigrationTimings {
        MigrationTimings {
            checkpoint: 0.5,
            copy: 0.0,
            restore: 0.25,
            total,
        }
    }

    #[test]
    fn test_summary_path() {
        assert_eq!(summary_path(Path::new("out/stats.csv")), PathBuf::from("out/stats.summary.csv"));
        assert_eq!(summary_path(Path::new("stats")), PathBuf::from("stats.summary"));
    }

    #[test]
    fn test_detail_log_truncates_and_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats.csv");
        std::fs::write(&path, "stale\nrows\n").unwrap();

        let mut log = DetailLog::create(&path).unwrap();
        log.append(1, "2024-01-01T00:00:00+00:00", &timings(1.0), &timings(2.0))
            .unwrap();
        log.append(2, "2024-01-01T00:00:05+00:00", &timings(1.5), &timings(2.5))
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "iteration;timestamp;to_checkpoint;to_copy;to_restore;to_total;\
             back_checkpoint;back_copy;back_restore;back_total"
        );
        assert_eq!(
            lines[1],
            "1;2024-01-01T00:00:00+00:00;0.5000;0.0000;0.2500;1.0000;0.5000;0.0000;0.2500;2.0000"
        );
        assert!(lines[2].starts_with("2;"));
    }

    #[test]
    fn test_write_summary() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("stats.csv");
        let agg = Aggregate {
            min: 1.0,
            avg: 1.5,
            max: 2.0,
        };
        let stats = Statistics {
            iterations: 2,
            warmup: 1,
            succeeded: 2,
            skipped: 0,
            to: agg,
            back: agg,
            summary: agg,
        };

        let path = write_summary(&log, &stats).unwrap();
        assert_eq!(path, dir.path().join("stats.summary.csv"));
        let contents = std::fs::read_to_string(path).unwrap();
        assert_eq!(
            contents,
            "name;min;avg;max\nto;1.0000;1.5000;2.0000\nback;1.0000;1.5000;2.0000\nsummary;1.0000;1.5000;2.0000\n"
        );
    }
}
