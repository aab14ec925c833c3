pub mod columns;
pub mod csv_export;
pub mod excel;
pub mod json;

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::models::Issue;

pub use columns::{columns_for, sanitize_text, Cell, Column};
pub use json::read_json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Excel,
    Json,
}

impl ExportFormat {
    /// `.xlsx` means Excel and `.json` JSON; anything else is CSV.
    pub fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);
        match extension.as_deref() {
            Some("xlsx") => ExportFormat::Excel,
            Some("json") => ExportFormat::Json,
            _ => ExportFormat::Csv,
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportFormat::Csv => write!(f, "csv"),
            ExportFormat::Excel => write!(f, "excel"),
            ExportFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "excel" | "xlsx" => Ok(ExportFormat::Excel),
            "json" => Ok(ExportFormat::Json),
            other => Err(Error::Config(format!(
                "unknown export format '{}', expected csv, excel or json",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExportOptions {
    pub include_comments: bool,
    pub include_body: bool,
}

pub fn render(issues: &[Issue], format: ExportFormat, options: &ExportOptions) -> Result<Vec<u8>> {
    match format {
        ExportFormat::Json => json::render_json(issues),
        ExportFormat::Csv => csv_export::render_csv(issues, &columns_for(issues, options)),
        ExportFormat::Excel => excel::render_excel(issues, &columns_for(issues, options)),
    }
}

/// Writes `issues` to `path`. The target is either the complete file or
/// untouched; returns the number of records written.
pub fn export_issues(
    issues: &[Issue],
    path: &Path,
    format: ExportFormat,
    options: &ExportOptions,
) -> Result<usize> {
    let bytes = render(issues, format, options)?;
    write_atomically(path, &bytes)?;
    tracing::info!(
        "Exported {} issues to {} ({})",
        issues.len(),
        path.display(),
        format
    );
    Ok(issues.len())
}

/// Writes through a temporary file in the target directory, renamed over the
/// target once fully flushed. The temporary file is removed on any failure.
pub fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let failed = |reason: String| Error::ExportWrite {
        path: path.display().to_string(),
        reason,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut file = NamedTempFile::new_in(dir).map_err(|e| failed(e.to_string()))?;
    file.write_all(bytes).map_err(|e| failed(e.to_string()))?;
    file.as_file()
        .sync_all()
        .map_err(|e| failed(e.to_string()))?;
    file.persist(path).map_err(|e| failed(e.error.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::issue::fixtures::{comment, issue, ts};
    use crate::models::IssueState;

    fn sample() -> Vec<Issue> {
        let mut first = issue(1, "Crash on save", IssueState::Closed);
        first.body = "Steps:\n1. open\n2. save".into();
        first.labels = vec!["bug".into(), "product:editor".into()];
        first.closed_at = Some(ts(2025, 1, 3, 0));
        first.milestone = Some("v1".into());
        first.project_fields.status = Some("Done".into());
        first.project_fields.projects = vec!["Roadmap".into()];
        first
            .project_fields
            .extra
            .insert("Estimate".into(), "3".into());
        first.comments = vec![comment("octocat", "confirmed", ts(2025, 1, 2, 0))];
        first.comment_count = 1;

        let mut second = issue(2, "Dark mode", IssueState::Open);
        second.assignees = vec!["hubot".into()];
        vec![first, second]
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ExportFormat::from_path(Path::new("out.XLSX")), ExportFormat::Excel);
        assert_eq!(ExportFormat::from_path(Path::new("out.json")), ExportFormat::Json);
        assert_eq!(ExportFormat::from_path(Path::new("out.txt")), ExportFormat::Csv);
        assert_eq!(ExportFormat::from_path(Path::new("out")), ExportFormat::Csv);
        assert_eq!("xlsx".parse::<ExportFormat>().unwrap(), ExportFormat::Excel);
        assert!("pdf".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_reexport_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let options = ExportOptions {
            include_comments: true,
            include_body: true,
        };

        for format in [ExportFormat::Csv, ExportFormat::Json] {
            let first = dir.path().join(format!("a.{}", format));
            let second = dir.path().join(format!("b.{}", format));
            export_issues(&sample(), &first, format, &options).unwrap();
            export_issues(&sample(), &second, format, &options).unwrap();
            assert_eq!(
                std::fs::read(&first).unwrap(),
                std::fs::read(&second).unwrap()
            );
        }
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issues.json");
        let issues = sample();

        export_issues(&issues, &path, ExportFormat::Json, &ExportOptions::default()).unwrap();
        assert_eq!(read_json(&path).unwrap(), issues);
    }

    #[test]
    fn test_csv_rows_match_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issues.csv");
        let options = ExportOptions {
            include_comments: true,
            include_body: false,
        };
        export_issues(&sample(), &path, ExportFormat::Csv, &options).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert!(headers.iter().any(|h| h == "project:Estimate"));
        assert_eq!(headers.iter().last(), Some("comments"));

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][0], "1");
        assert_eq!(&rows[0][3], "bug, product:editor");
        assert_eq!(&rows[0][7], "2025-01-03T00:00:00Z");
        assert_eq!(&rows[1][7], "");
    }

    #[test]
    fn test_failed_write_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("issues.csv");
        let result = export_issues(&sample(), &path, ExportFormat::Csv, &ExportOptions::default());

        assert!(matches!(result, Err(Error::ExportWrite { .. })));
        assert!(!path.exists());
    }

    #[test]
    fn test_overwrites_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issues.json");
        std::fs::write(&path, b"stale").unwrap();

        export_issues(&sample(), &path, ExportFormat::Json, &ExportOptions::default()).unwrap();
        assert_eq!(read_json(&path).unwrap().len(), 2);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
