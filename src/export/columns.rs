//! The flat column scheme shared by the CSV and Excel writers.

use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;

use crate::export::ExportOptions;
use crate::models::Issue;

static TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid tag pattern"));
static WHITESPACE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));

const LIST_SEPARATOR: &str = ", ";
const COMMENT_SEPARATOR: &str = " | ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Column {
    Number,
    Title,
    State,
    Labels,
    Assignees,
    Milestone,
    CreatedAt,
    ClosedAt,
    UpdatedAt,
    Url,
    CommentCount,
    ProjectStatus,
    ProjectPriority,
    ProjectIteration,
    Projects,
    /// A project field outside the known keys, by field name.
    ProjectExtra(String),
    Comments,
    Body,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Number(u64),
    Text(String),
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Number(n) => write!(f, "{}", n),
            Cell::Text(s) => f.write_str(s),
        }
    }
}

impl Column {
    pub fn header(&self) -> String {
        let name = match self {
            Column::Number => "number",
            Column::Title => "title",
            Column::State => "state",
            Column::Labels => "labels",
            Column::Assignees => "assignees",
            Column::Milestone => "milestone",
            Column::CreatedAt => "created_at",
            Column::ClosedAt => "closed_at",
            Column::UpdatedAt => "updated_at",
            Column::Url => "url",
            Column::CommentCount => "comment_count",
            Column::ProjectStatus => "project_status",
            Column::ProjectPriority => "project_priority",
            Column::ProjectIteration => "project_iteration",
            Column::Projects => "projects",
            Column::ProjectExtra(field) => return format!("project:{}", field),
            Column::Comments => "comments",
            Column::Body => "body",
        };
        name.to_string()
    }

    pub fn cell(&self, issue: &Issue) -> Cell {
        let fields = &issue.project_fields;
        let text = match self {
            Column::Number => return Cell::Number(issue.number),
            Column::CommentCount => return Cell::Number(issue.comment_count),
            Column::Title => sanitize_text(&issue.title),
            Column::State => issue.state.to_string(),
            Column::Labels => issue.labels.join(LIST_SEPARATOR),
            Column::Assignees => issue.assignees.join(LIST_SEPARATOR),
            Column::Milestone => issue.milestone.clone().unwrap_or_default(),
            Column::CreatedAt => format_timestamp(issue.created_at),
            Column::ClosedAt => issue.closed_at.map(format_timestamp).unwrap_or_default(),
            Column::UpdatedAt => issue.updated_at.map(format_timestamp).unwrap_or_default(),
            Column::Url => issue.url.clone(),
            Column::ProjectStatus => fields.status.clone().unwrap_or_default(),
            Column::ProjectPriority => fields.priority.clone().unwrap_or_default(),
            Column::ProjectIteration => fields.iteration.clone().unwrap_or_default(),
            Column::Projects => fields.projects.join(LIST_SEPARATOR),
            Column::ProjectExtra(name) => fields.extra.get(name).cloned().unwrap_or_default(),
            Column::Comments => issue
                .comments
                .iter()
                .map(|c| format!("{}: {}", c.author, sanitize_text(&c.body)))
                .collect::<Vec<_>>()
                .join(COMMENT_SEPARATOR),
            Column::Body => sanitize_text(&issue.body),
        };
        Cell::Text(text)
    }
}

/// Column layout for a batch: the fixed columns, one column per extra project
/// field seen anywhere in the batch, then the optional text columns.
pub fn columns_for(issues: &[Issue], options: &ExportOptions) -> Vec<Column> {
    let mut columns = vec![
        Column::Number,
        Column::Title,
        Column::State,
        Column::Labels,
        Column::Assignees,
        Column::Milestone,
        Column::CreatedAt,
        Column::ClosedAt,
        Column::UpdatedAt,
        Column::Url,
        Column::CommentCount,
        Column::ProjectStatus,
        Column::ProjectPriority,
        Column::ProjectIteration,
        Column::Projects,
    ];

    let extra: BTreeSet<&String> = issues
        .iter()
        .flat_map(|issue| issue.project_fields.extra.keys())
        .collect();
    columns.extend(extra.into_iter().cloned().map(Column::ProjectExtra));

    if options.include_comments {
        columns.push(Column::Comments);
    }
    if options.include_body {
        columns.push(Column::Body);
    }
    columns
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Strips HTML tags, decodes the common entities and collapses whitespace.
pub fn sanitize_text(text: &str) -> String {
    let stripped = TAG_PATTERN.replace_all(text, " ");
    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    WHITESPACE_PATTERN
        .replace_all(&decoded, " ")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::issue::fixtures::{comment, issue, ts};
    use crate::models::IssueState;

    #[test]
    fn test_sanitize_text() {
        assert_eq!(
            sanitize_text("<p>Fails   on\n\n<b>save</b></p> &amp; exits"),
            "Fails on save & exits"
        );
        assert_eq!(sanitize_text("a &lt;b&gt; c"), "a <b> c");
        assert_eq!(sanitize_text("&amp;lt;"), "&lt;");
        assert_eq!(sanitize_text("   "), "");
    }

    #[test]
    fn test_column_order_with_extra_fields() {
        let mut first = issue(1, "a", IssueState::Open);
        first
            .project_fields
            .extra
            .insert("Team".into(), "Core".into());
        let mut second = issue(2, "b", IssueState::Open);
        second
            .project_fields
            .extra
            .insert("Area".into(), "UI".into());

        let options = ExportOptions {
            include_comments: true,
            include_body: true,
        };
        let headers: Vec<_> = columns_for(&[first, second], &options)
            .iter()
            .map(Column::header)
            .collect();

        let tail = &headers[headers.len() - 5..];
        assert_eq!(
            tail,
            ["projects", "project:Area", "project:Team", "comments", "body"]
        );
        assert_eq!(headers[0], "number");
    }

    #[test]
    fn test_cells() {
        let mut candidate = issue(4, "Login <em>broken</em>", IssueState::Closed);
        candidate.labels = vec!["bug".into(), "ui".into()];
        candidate.closed_at = Some(ts(2025, 1, 2, 3));
        candidate.comments = vec![
            comment("a", "first", ts(2025, 1, 1, 1)),
            comment("b", "<p>second</p>", ts(2025, 1, 1, 2)),
        ];

        assert_eq!(Column::Number.cell(&candidate), Cell::Number(4));
        assert_eq!(Column::Title.cell(&candidate).to_string(), "Login broken");
        assert_eq!(Column::Labels.cell(&candidate).to_string(), "bug, ui");
        assert_eq!(
            Column::ClosedAt.cell(&candidate).to_string(),
            "2025-01-02T03:00:00Z"
        );
        assert_eq!(Column::UpdatedAt.cell(&candidate).to_string(), "");
        assert_eq!(
            Column::Comments.cell(&candidate).to_string(),
            "a: first | b: second"
        );
    }
}
