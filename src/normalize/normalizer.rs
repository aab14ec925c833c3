use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::models::raw::{Collection, RawComment, RawIssue, RawProjectItem};
use crate::models::{Comment, Issue, IssueState, ProjectFields};

/// Project fields every board has; they duplicate data already on the issue.
const BUILTIN_PROJECT_FIELDS: &[&str] = &[
    "Title",
    "Assignees",
    "Labels",
    "Linked pull requests",
    "Milestone",
    "Repository",
    "Reviewers",
];

const GHOST_LOGIN: &str = "ghost";

/// One issue as fetched, plus its separately fetched comments if any.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub issue: Value,
    pub comments: Option<Vec<Value>>,
}

impl RawRecord {
    pub fn new(issue: Value) -> Self {
        Self {
            issue,
            comments: None,
        }
    }

    pub fn number(&self) -> Option<u64> {
        self.issue.get("number").and_then(Value::as_u64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordWarning {
    /// Position of the record in the input batch.
    pub index: usize,
    pub number: Option<u64>,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct NormalizeReport {
    pub issues: Vec<Issue>,
    /// One per skipped issue record.
    pub warnings: Vec<RecordWarning>,
    /// Comments dropped from issues that were otherwise kept.
    pub comment_warnings: Vec<RecordWarning>,
    pub duplicates: usize,
    pub skipped_pull_requests: usize,
}

/// Flattens GraphQL or REST issue payloads into [`Issue`] records.
#[derive(Debug, Clone, Default)]
pub struct Normalizer;

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    /// Normalizes one payload. `Ok(None)` means the record is a pull request.
    pub fn normalize_issue(&self, raw: &Value, comments: Option<&[Value]>) -> Result<Option<Issue>> {
        let (issue, comment_warnings) = self.normalize_record(raw, comments)?;
        for warning in comment_warnings {
            tracing::warn!("{}", warning);
        }
        Ok(issue)
    }

    /// Normalizes a batch, skipping malformed records and keeping the last
    /// version of any issue number seen more than once.
    pub fn normalize_all(&self, records: Vec<RawRecord>) -> NormalizeReport {
        let mut report = NormalizeReport::default();
        let mut by_number: BTreeMap<u64, Issue> = BTreeMap::new();

        for (index, record) in records.into_iter().enumerate() {
            match self.normalize_record(&record.issue, record.comments.as_deref()) {
                Ok((Some(issue), comment_warnings)) => {
                    for reason in comment_warnings {
                        tracing::warn!("{}", reason);
                        report.comment_warnings.push(RecordWarning {
                            index,
                            number: Some(issue.number),
                            reason,
                        });
                    }
                    if by_number.insert(issue.number, issue).is_some() {
                        report.duplicates += 1;
                    }
                }
                Ok((None, _)) => report.skipped_pull_requests += 1,
                Err(err) => {
                    tracing::warn!("Skipping record {}: {}", index, err);
                    report.warnings.push(RecordWarning {
                        index,
                        number: record.number(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        if report.duplicates > 0 {
            tracing::debug!("Dropped {} duplicate issue records", report.duplicates);
        }
        report.issues = by_number.into_values().collect();
        report
    }

    fn normalize_record(
        &self,
        raw: &Value,
        comments: Option<&[Value]>,
    ) -> Result<(Option<Issue>, Vec<String>)> {
        if raw.get("pull_request").is_some_and(|pr| !pr.is_null()) {
            return Ok((None, Vec::new()));
        }

        let label = record_label(raw);
        let parsed = RawIssue::deserialize(raw).map_err(|e| malformed(&label, e.to_string()))?;
        let state = IssueState::parse(&parsed.state)
            .ok_or_else(|| malformed(&label, format!("unknown state '{}'", parsed.state)))?;

        let reported_comments = [&parsed.comments, &parsed.comment_count]
            .into_iter()
            .flatten()
            .map(Collection::total)
            .max()
            .unwrap_or(0);

        let mut warnings = Vec::new();
        let mut comment_list: Vec<Comment> = match comments {
            Some(values) => values
                .iter()
                .filter_map(|value| match RawComment::deserialize(value) {
                    Ok(comment) => Some(comment),
                    Err(e) => {
                        warnings.push(format!("{}: skipping malformed comment: {}", label, e));
                        None
                    }
                })
                .map(convert_comment)
                .collect(),
            None => parsed
                .comments
                .map(Collection::into_items)
                .unwrap_or_default()
                .into_iter()
                .map(convert_comment)
                .collect::<Vec<_>>(),
        };
        comment_list.sort_by_key(|c| c.created_at);

        let issue = Issue {
            number: parsed.number,
            title: parsed.title,
            body: parsed.body.unwrap_or_default(),
            state,
            created_at: parsed.created_at,
            closed_at: parsed.closed_at,
            updated_at: parsed.updated_at,
            url: parsed.html_url.or(parsed.url).unwrap_or_default(),
            labels: names(parsed.labels, |l| l.name),
            assignees: names(parsed.assignees, |u| u.login),
            milestone: parsed.milestone.map(|m| m.title),
            project_fields: project_fields(parsed.project_items),
            comment_count: reported_comments.max(comment_list.len() as u64),
            comments: comment_list,
        };

        Ok((Some(issue), warnings))
    }
}

fn record_label(raw: &Value) -> String {
    match raw.get("number").and_then(Value::as_u64) {
        Some(number) => format!("#{}", number),
        None => "<unnumbered>".to_string(),
    }
}

fn malformed(record: &str, reason: String) -> Error {
    Error::MalformedRecord {
        record: record.to_string(),
        reason,
    }
}

fn names<T>(collection: Option<Collection<T>>, name: impl Fn(T) -> String) -> Vec<String> {
    collection
        .map(Collection::into_items)
        .unwrap_or_default()
        .into_iter()
        .map(name)
        .collect()
}

fn convert_comment(raw: RawComment) -> Comment {
    Comment {
        author: raw
            .author
            .map(|a| a.login)
            .unwrap_or_else(|| GHOST_LOGIN.to_string()),
        body: raw.body.unwrap_or_default(),
        created_at: raw.created_at,
    }
}

fn project_fields(items: Option<Collection<RawProjectItem>>) -> ProjectFields {
    let mut fields = ProjectFields::default();

    for item in items.map(Collection::into_items).unwrap_or_default() {
        if let Some(project) = item.project {
            if !fields.projects.contains(&project.title) {
                fields.projects.push(project.title);
            }
        }

        let values = item
            .field_values
            .map(Collection::into_items)
            .unwrap_or_default();
        for value in values {
            let (Some(name), Some(text)) = (value.field_name(), value.value()) else {
                continue;
            };
            if BUILTIN_PROJECT_FIELDS
                .iter()
                .any(|builtin| builtin.eq_ignore_ascii_case(name))
            {
                continue;
            }
            if name.eq_ignore_ascii_case("status") && text.eq_ignore_ascii_case("no status set") {
                continue;
            }
            fields.insert(name, text);
        }
    }

    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::issue::fixtures::ts;
    use serde_json::json;

    fn graphql_issue(number: u64) -> Value {
        json!({
            "number": number,
            "title": format!("Issue {}", number),
            "body": "Steps to reproduce",
            "state": "CLOSED",
            "createdAt": "2025-01-01T00:00:00Z",
            "closedAt": "2025-01-03T00:00:00Z",
            "updatedAt": "2025-01-03T00:00:00Z",
            "url": format!("https://github.com/acme/widgets/issues/{}", number),
            "labels": {"nodes": [{"name": "bug"}, {"name": "product:db"}]},
            "assignees": {"nodes": [{"login": "octocat"}]},
            "milestone": {"title": "v1.0"},
            "projectItems": {"nodes": [{
                "project": {"title": "Roadmap"},
                "fieldValues": {"nodes": [
                    {"text": "Issue title", "field": {"name": "Title"}},
                    {"name": "In Progress", "field": {"name": "Status"}},
                    {"name": "P1", "field": {"name": "Priority"}},
                    {"title": "Sprint 4", "field": {"name": "Sprint"}},
                    {"number": 3.0, "field": {"name": "Estimate"}},
                    {}
                ]}
            }]},
            "comments": {"totalCount": 3, "nodes": [
                {"author": {"login": "b"}, "body": "second", "createdAt": "2025-01-02T00:00:00Z"},
                {"author": null, "body": "first", "createdAt": "2025-01-01T06:00:00Z"}
            ]},
            "commentCount": {"totalCount": 3}
        })
    }

    #[test]
    fn test_graphql_shape() {
        let issue = Normalizer::new()
            .normalize_issue(&graphql_issue(7), None)
            .unwrap()
            .unwrap();

        assert_eq!(issue.number, 7);
        assert_eq!(issue.state, IssueState::Closed);
        assert_eq!(issue.closed_at, Some(ts(2025, 1, 3, 0)));
        assert_eq!(issue.labels, vec!["bug", "product:db"]);
        assert_eq!(issue.assignees, vec!["octocat"]);
        assert_eq!(issue.milestone.as_deref(), Some("v1.0"));

        let fields = &issue.project_fields;
        assert_eq!(fields.projects, vec!["Roadmap"]);
        assert_eq!(fields.status.as_deref(), Some("In Progress"));
        assert_eq!(fields.priority.as_deref(), Some("P1"));
        assert_eq!(fields.iteration.as_deref(), Some("Sprint 4"));
        assert_eq!(fields.extra.get("Estimate").map(String::as_str), Some("3"));
        assert!(!fields.extra.contains_key("Title"));

        assert_eq!(issue.comments.len(), 2);
        assert_eq!(issue.comments[0].author, "ghost");
        assert_eq!(issue.comments[0].body, "first");
        assert_eq!(issue.comment_count, 3);
    }

    #[test]
    fn test_rest_shape_with_fetched_comments() {
        let raw = json!({
            "number": 12,
            "title": "Crash on start",
            "body": null,
            "state": "open",
            "created_at": "2025-02-01T10:00:00Z",
            "url": "https://api.github.com/repos/acme/widgets/issues/12",
            "html_url": "https://github.com/acme/widgets/issues/12",
            "labels": [{"name": "bug"}],
            "assignees": [],
            "comments": 2
        });
        let comments = vec![
            json!({"user": {"login": "a"}, "body": "hi", "created_at": "2025-02-01T12:00:00Z"}),
            json!({"user": {"login": "b"}, "body": "broken"}),
        ];

        let mut report = Normalizer::new().normalize_all(vec![RawRecord {
            issue: raw,
            comments: Some(comments),
        }]);

        assert_eq!(report.issues.len(), 1);
        let issue = report.issues.remove(0);
        assert_eq!(issue.body, "");
        assert_eq!(issue.url, "https://github.com/acme/widgets/issues/12");
        assert_eq!(issue.comments.len(), 1);
        assert_eq!(issue.comment_count, 2);
        assert!(report.warnings.is_empty());
        assert_eq!(report.comment_warnings.len(), 1);
        assert_eq!(report.comment_warnings[0].number, Some(12));
    }

    #[test]
    fn test_rest_payload_with_api_and_web_urls() {
        let raw = json!({
            "url": "https://api.github.com/repos/acme/widgets/issues/12",
            "html_url": "https://github.com/acme/widgets/issues/12",
            "number": 12,
            "title": "Crash on start",
            "state": "open",
            "created_at": "2025-02-01T10:00:00Z",
            "labels": [],
            "comments": 0
        });

        let report = Normalizer::new().normalize_all(vec![RawRecord::new(raw)]);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].url, "https://github.com/acme/widgets/issues/12");
    }

    #[test]
    fn test_api_url_used_when_web_url_missing() {
        let raw = json!({
            "url": "https://api.github.com/repos/acme/widgets/issues/5",
            "number": 5,
            "title": "No web link",
            "state": "open",
            "created_at": "2025-02-01T10:00:00Z"
        });
        let issue = Normalizer::new().normalize_issue(&raw, None).unwrap().unwrap();
        assert_eq!(issue.url, "https://api.github.com/repos/acme/widgets/issues/5");
    }

    #[test]
    fn test_pull_requests_are_skipped() {
        let pr = json!({
            "number": 3,
            "title": "Add feature",
            "state": "open",
            "created_at": "2025-02-01T10:00:00Z",
            "pull_request": {"url": "https://api.github.com/repos/acme/widgets/pulls/3"}
        });
        let report = Normalizer::new().normalize_all(vec![RawRecord::new(pr)]);
        assert!(report.issues.is_empty());
        assert!(report.warnings.is_empty());
        assert_eq!(report.skipped_pull_requests, 1);
    }

    #[test]
    fn test_malformed_records_are_reported_not_fatal() {
        let records = vec![
            RawRecord::new(graphql_issue(1)),
            RawRecord::new(json!({"number": 2, "state": "OPEN"})),
            RawRecord::new(json!({
                "number": 3, "title": "x", "state": "LOCKED",
                "createdAt": "2025-01-01T00:00:00Z"
            })),
            RawRecord::new(json!({
                "number": 4, "title": "x", "state": "OPEN", "createdAt": "yesterday"
            })),
            RawRecord::new(graphql_issue(5)),
        ];

        let report = Normalizer::new().normalize_all(records);
        let numbers: Vec<_> = report.issues.iter().map(|i| i.number).collect();
        assert_eq!(numbers, vec![1, 5]);
        assert_eq!(report.warnings.len(), 3);
        assert_eq!(
            report.warnings.iter().map(|w| w.index).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_duplicates_keep_last_version() {
        let mut updated = graphql_issue(9);
        updated["title"] = json!("Renamed");

        let report = Normalizer::new().normalize_all(vec![
            RawRecord::new(graphql_issue(10)),
            RawRecord::new(graphql_issue(9)),
            RawRecord::new(updated),
        ]);

        assert_eq!(report.duplicates, 1);
        assert_eq!(report.issues.len(), 2);
        assert_eq!(report.issues[0].number, 9);
        assert_eq!(report.issues[0].title, "Renamed");
        assert_eq!(report.issues[1].number, 10);
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let raw = json!({
            "number": 1,
            "title": "Bare",
            "state": "OPEN",
            "createdAt": "2025-01-01T00:00:00Z"
        });
        let issue = Normalizer::new().normalize_issue(&raw, None).unwrap().unwrap();
        assert!(issue.labels.is_empty());
        assert!(issue.comments.is_empty());
        assert!(issue.project_fields.is_empty());
        assert_eq!(issue.comment_count, 0);
        assert_eq!(issue.closed_at, None);
    }
}
