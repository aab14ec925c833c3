use async_trait::async_trait;
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::config::{PipelineConfig, RepoId};
use crate::error::{Error, Result, Stage};
use crate::export::{self, ExportFormat, ExportOptions};
use crate::github::{GitHubClient, IssuePaginator, PaginationMode};
use crate::models::{Issue, IssueFilter};
use crate::normalize::{Normalizer, RawRecord, RecordWarning};

#[derive(Debug, Clone)]
pub struct IssueQuery {
    pub repo: RepoId,
    pub filter: IssueFilter,
    pub include_comments: bool,
}

impl IssueQuery {
    pub fn new(repo: RepoId) -> Self {
        Self {
            repo,
            filter: IssueFilter::default(),
            include_comments: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct IssueBatch {
    pub issues: Vec<Issue>,
    pub warnings: Vec<RecordWarning>,
    pub pages: usize,
    pub duplicates: usize,
    pub skipped_pull_requests: usize,
}

/// Anything that can produce normalized issues for a query.
#[async_trait]
pub trait IssueSource: Send + Sync {
    async fn load_issues(&self, query: &IssueQuery) -> Result<IssueBatch>;
}

#[async_trait]
impl<T: IssueSource + ?Sized> IssueSource for Box<T> {
    async fn load_issues(&self, query: &IssueQuery) -> Result<IssueBatch> {
        (**self).load_issues(query).await
    }
}

/// Issues already in memory, typically a previous JSON export.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    issues: Vec<Issue>,
}

impl StaticSource {
    pub fn new(issues: Vec<Issue>) -> Self {
        Self { issues }
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let issues = export::read_json(path).map_err(|e| e.at_stage(Stage::Normalize, 0))?;
        tracing::info!("Loaded {} issues from {}", issues.len(), path.display());
        Ok(Self::new(issues))
    }
}

#[async_trait]
impl IssueSource for StaticSource {
    async fn load_issues(&self, query: &IssueQuery) -> Result<IssueBatch> {
        let issues = self
            .issues
            .iter()
            .filter(|issue| query.filter.matches(issue))
            .cloned()
            .collect();
        Ok(IssueBatch {
            issues,
            ..Default::default()
        })
    }
}

#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub path: PathBuf,
    pub format: ExportFormat,
    pub records: usize,
    pub warnings: usize,
    pub pages: usize,
}

/// Paginator, comment fan-out and normalizer for one repository query.
pub struct IssuePipeline {
    github: Arc<GitHubClient>,
    normalizer: Normalizer,
    config: PipelineConfig,
    mode: PaginationMode,
}

impl IssuePipeline {
    pub fn new(github: GitHubClient, config: PipelineConfig) -> Self {
        Self {
            github: Arc::new(github),
            normalizer: Normalizer::new(),
            config,
            mode: PaginationMode::GraphQl,
        }
    }

    pub fn with_mode(mut self, mode: PaginationMode) -> Self {
        self.mode = mode;
        self
    }

    pub async fn fetch(&self, query: &IssueQuery) -> Result<IssueBatch> {
        tracing::info!("Fetching issues for {} ({:?} mode)", query.repo, self.mode);

        let pb = self.spinner("issues fetched");
        let mut paginator =
            IssuePaginator::new(&self.github, query.repo.clone(), query.filter.clone())
                .page_size(self.config.page_size)
                .include_comments(query.include_comments)
                .mode(self.mode)
                .progress(pb.clone());

        let raw = paginator.collect_all().await?;
        let pages = paginator.pages_fetched();
        pb.finish_with_message(format!("Fetched {} pages", pages));
        tracing::info!("Fetched {} raw records in {} pages", raw.len(), pages);

        let mut records: Vec<RawRecord> = raw.into_iter().map(RawRecord::new).collect();
        if query.include_comments {
            self.fetch_missing_comments(&query.repo, &mut records)
                .await
                .map_err(|e| e.at_stage(Stage::Fetch, records.len()))?;
        }

        let report = self.normalizer.normalize_all(records);
        let mut issues = report.issues;
        issues.retain(|issue| query.filter.matches(issue));

        if !report.warnings.is_empty() {
            tracing::warn!("Skipped {} malformed records", report.warnings.len());
        }
        if !report.comment_warnings.is_empty() {
            tracing::warn!("Dropped {} malformed comments", report.comment_warnings.len());
        }
        if let Some(remaining) = self.github.rate_limiter().remaining().await {
            tracing::debug!("{} API requests left in the current window", remaining);
        }
        tracing::info!("Normalized {} issues", issues.len());

        Ok(IssueBatch {
            issues,
            warnings: report.warnings,
            pages,
            duplicates: report.duplicates,
            skipped_pull_requests: report.skipped_pull_requests,
        })
    }

    pub async fn export(
        &self,
        query: &IssueQuery,
        path: &Path,
        format: ExportFormat,
        options: &ExportOptions,
    ) -> Result<ExportOutcome> {
        let batch = self.fetch(query).await?;
        let records = export::export_issues(&batch.issues, path, format, options)
            .map_err(|e| e.at_stage(Stage::Export, batch.issues.len()))?;

        Ok(ExportOutcome {
            path: path.to_path_buf(),
            format,
            records,
            warnings: batch.warnings.len(),
            pages: batch.pages,
        })
    }

    /// Fetches the full comment list over REST for every issue whose page
    /// carried fewer comments than it reported.
    async fn fetch_missing_comments(&self, repo: &RepoId, records: &mut [RawRecord]) -> Result<()> {
        let targets: Vec<(usize, u64)> = records
            .iter()
            .enumerate()
            .filter(|(_, record)| comments_missing(&record.issue))
            .filter_map(|(index, record)| record.number().map(|n| (index, n)))
            .collect();
        if targets.is_empty() {
            return Ok(());
        }

        tracing::info!("Fetching comments for {} issues", targets.len());
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency_limit.max(1)));
        let pb = self.bar(targets.len() as u64, "comment threads");

        let comment_futures = targets.into_iter().map(|(index, number)| {
            let github = self.github.clone();
            let sem = semaphore.clone();
            let repo = repo.clone();
            let pb = pb.clone();

            async move {
                let result = match sem.acquire().await {
                    Ok(_permit) => github.get_issue_comments(&repo, number).await,
                    Err(e) => Err(Error::GitHubApi(format!("comment fetch cancelled: {}", e))),
                };
                pb.inc(1);
                (index, number, result)
            }
        });

        let results = join_all(comment_futures).await;
        pb.finish_with_message("Fetched comments");

        for (index, number, result) in results {
            match result {
                Ok(comments) => records[index].comments = Some(comments),
                Err(err @ (Error::Authentication(_) | Error::RateLimitExceeded { .. })) => {
                    return Err(err)
                }
                Err(err) => {
                    tracing::warn!("Could not fetch comments for #{}: {}", number, err);
                }
            }
        }
        Ok(())
    }

    fn spinner(&self, message: &str) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {pos} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(message.to_string());
        pb
    }

    fn bar(&self, len: u64, unit: &str) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(&format!(
                    "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {}",
                    unit
                ))
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb
    }
}

#[async_trait]
impl IssueSource for IssuePipeline {
    async fn load_issues(&self, query: &IssueQuery) -> Result<IssueBatch> {
        self.fetch(query).await
    }
}

/// Whether the page reported more comments than it delivered. REST pages
/// only carry a count, so any comment means a follow-up fetch.
fn comments_missing(raw: &Value) -> bool {
    if raw.get("pull_request").is_some_and(|pr| !pr.is_null()) {
        return false;
    }
    match raw.get("comments") {
        Some(Value::Number(count)) => count.as_u64().unwrap_or(0) > 0,
        Some(Value::Object(connection)) => {
            let total = connection
                .get("totalCount")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            let delivered = connection
                .get("nodes")
                .and_then(Value::as_array)
                .map_or(0, Vec::len) as u64;
            total > delivered
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::issue::fixtures::issue;
    use crate::models::{IssueState, StateFilter};
    use serde_json::json;

    #[test]
    fn test_comments_missing() {
        assert!(comments_missing(&json!({"comments": 3})));
        assert!(!comments_missing(&json!({"comments": 0})));
        assert!(!comments_missing(&json!({"comments": 3, "pull_request": {}})));
        assert!(comments_missing(&json!({
            "comments": {"totalCount": 101, "nodes": [{}]}
        })));
        assert!(!comments_missing(&json!({
            "comments": {"totalCount": 1, "nodes": [{}]}
        })));
        assert!(!comments_missing(&json!({"commentCount": {"totalCount": 4}})));
    }

    #[tokio::test]
    async fn test_static_source_applies_filter() {
        let source = StaticSource::new(vec![
            issue(1, "open", IssueState::Open),
            issue(2, "closed", IssueState::Closed),
        ]);
        let mut query = IssueQuery::new("acme/widgets".parse().unwrap());
        query.filter.state = StateFilter::Closed;

        let batch = source.load_issues(&query).await.unwrap();
        assert_eq!(batch.issues.len(), 1);
        assert_eq!(batch.issues[0].number, 2);
    }

    #[test]
    fn test_static_source_reports_bad_file_as_normalize_stage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, b"{not json").unwrap();

        match StaticSource::from_json_file(&path) {
            Err(Error::Stage { stage, processed, .. }) => {
                assert_eq!(stage, Stage::Normalize);
                assert_eq!(processed, 0);
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
