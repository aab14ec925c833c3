use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

impl IssueState {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "open" => Some(IssueState::Open),
            "closed" => Some(IssueState::Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for IssueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IssueState::Open => write!(f, "open"),
            IssueState::Closed => write!(f, "closed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Comment {
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Projects V2 field values attached to an issue.
///
/// Field schemas are defined per project, so only a handful of common names
/// get their own slot; everything else lands in `extra` keyed by field name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProjectFields {
    #[serde(default)]
    pub projects: Vec<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub iteration: Option<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl ProjectFields {
    /// Records a field value. Known keys are matched case-insensitively and
    /// the first value seen wins when an issue sits on several boards.
    pub fn insert(&mut self, field: &str, value: String) {
        let slot = match field.to_lowercase().as_str() {
            "status" => &mut self.status,
            "priority" => &mut self.priority,
            "iteration" | "sprint" => &mut self.iteration,
            _ => {
                self.extra.entry(field.to_string()).or_insert(value);
                return;
            }
        };
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
            && self.status.is_none()
            && self.priority.is_none()
            && self.iteration.is_none()
            && self.extra.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub state: IssueState,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub assignees: Vec<String>,
    #[serde(default)]
    pub milestone: Option<String>,
    #[serde(default)]
    pub project_fields: ProjectFields,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub comment_count: u64,
}

impl Issue {
    pub fn is_open(&self) -> bool {
        self.state == IssueState::Open
    }

    /// `None` while the issue is open or when GitHub reports no close date.
    pub fn time_to_close(&self) -> Option<Duration> {
        match self.state {
            IssueState::Closed => self.closed_at.map(|closed| closed - self.created_at),
            IssueState::Open => None,
        }
    }

    pub fn time_to_first_comment(&self) -> Option<Duration> {
        self.comments
            .iter()
            .map(|c| c.created_at)
            .min()
            .map(|first| first - self.created_at)
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l.eq_ignore_ascii_case(label))
    }

    /// Title and body joined, the text the heuristics work on.
    pub fn text(&self) -> String {
        if self.body.is_empty() {
            self.title.clone()
        } else {
            format!("{}\n{}", self.title, self.body)
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_time_to_close() {
        let mut closed = issue(1, "closed", IssueState::Closed);
        closed.closed_at = Some(ts(2025, 1, 4, 0));
        assert_eq!(closed.time_to_close(), Some(Duration::days(3)));

        let mut open = issue(2, "open", IssueState::Open);
        // A reopened issue keeps its stale close date upstream.
        open.closed_at = Some(ts(2025, 1, 2, 0));
        assert_eq!(open.time_to_close(), None);
    }

    #[test]
    fn test_time_to_first_comment_uses_earliest() {
        let mut issue = issue(1, "t", IssueState::Open);
        assert_eq!(issue.time_to_first_comment(), None);

        issue.comments = vec![
            comment("b", "later", ts(2025, 1, 1, 9)),
            comment("a", "first", ts(2025, 1, 1, 2)),
        ];
        assert_eq!(issue.time_to_first_comment(), Some(Duration::hours(2)));
    }

    #[test]
    fn test_project_fields_insert() {
        let mut fields = ProjectFields::default();
        fields.insert("Status", "In Progress".into());
        fields.insert("status", "Done".into());
        fields.insert("Sprint", "Sprint 4".into());
        fields.insert("Customer", "Initech".into());

        assert_eq!(fields.status.as_deref(), Some("In Progress"));
        assert_eq!(fields.iteration.as_deref(), Some("Sprint 4"));
        assert_eq!(fields.extra.get("Customer").map(String::as_str), Some("Initech"));
        assert!(!fields.is_empty());
    }

    #[test]
    fn test_state_parse() {
        assert_eq!(IssueState::parse("OPEN"), Some(IssueState::Open));
        assert_eq!(IssueState::parse("closed"), Some(IssueState::Closed));
        assert_eq!(IssueState::parse("merged"), None);
    }
}
