//! Issue payloads as GitHub returns them.
//!
//! GraphQL and REST disagree on casing and on how collections nest
//! (`labels { nodes [...] }` versus `labels: [...]`, `comments` as a
//! connection versus a plain count), so these structs accept both.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// A collection field in any of the shapes GitHub uses.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged, bound(deserialize = "T: Deserialize<'de>"))]
pub enum Collection<T> {
    List(Vec<T>),
    Connection {
        #[serde(default)]
        nodes: Vec<Option<T>>,
        #[serde(default, rename = "totalCount")]
        total_count: Option<u64>,
    },
    Count(u64),
}

impl<T> Collection<T> {
    pub fn into_items(self) -> Vec<T> {
        match self {
            Collection::List(items) => items,
            Collection::Connection { nodes, .. } => nodes.into_iter().flatten().collect(),
            Collection::Count(_) => Vec::new(),
        }
    }

    /// Total reported upstream, which may exceed the items present.
    pub fn total(&self) -> u64 {
        match self {
            Collection::List(items) => items.len() as u64,
            Collection::Connection { nodes, total_count } => {
                total_count.unwrap_or(nodes.len() as u64)
            }
            Collection::Count(n) => *n,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawIssue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub state: String,
    #[serde(alias = "created_at")]
    pub created_at: DateTime<Utc>,
    #[serde(default, alias = "closed_at")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "updated_at")]
    pub updated_at: Option<DateTime<Utc>>,
    /// The web page in GraphQL payloads, the API resource in REST ones.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, rename = "html_url")]
    pub html_url: Option<String>,
    #[serde(default)]
    pub labels: Option<Collection<RawLabel>>,
    #[serde(default)]
    pub assignees: Option<Collection<RawUser>>,
    #[serde(default)]
    pub milestone: Option<RawMilestone>,
    #[serde(default)]
    pub project_items: Option<Collection<RawProjectItem>>,
    #[serde(default)]
    pub comments: Option<Collection<RawComment>>,
    /// `commentCount: comments { totalCount }`, present even when comment
    /// bodies were not requested.
    #[serde(default)]
    pub comment_count: Option<Collection<RawComment>>,
    #[serde(default, alias = "pull_request")]
    pub pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawLabel {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawUser {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMilestone {
    pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawComment {
    #[serde(default, alias = "user")]
    pub author: Option<RawUser>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(alias = "created_at")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawProjectItem {
    #[serde(default)]
    pub project: Option<RawProject>,
    #[serde(default)]
    pub field_values: Option<Collection<RawFieldValue>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawProject {
    pub title: String,
}

/// One `ProjectV2ItemFieldValue`. Only the member matching the field type is
/// present; unsupported types arrive as an empty object.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFieldValue {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub number: Option<f64>,
    #[serde(default)]
    pub field: Option<RawFieldName>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFieldName {
    pub name: String,
}

impl RawFieldValue {
    pub fn field_name(&self) -> Option<&str> {
        self.field.as_ref().map(|f| f.name.as_str())
    }

    pub fn value(&self) -> Option<String> {
        self.name
            .clone()
            .or_else(|| self.text.clone())
            .or_else(|| self.title.clone())
            .or_else(|| self.date.clone())
            .or_else(|| self.number.map(format_number))
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}
