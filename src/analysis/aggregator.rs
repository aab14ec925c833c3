use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::analysis::text::tokenize;
use crate::models::{Issue, TimePeriod, TimeWindow};

pub const DEFAULT_PRODUCT_PREFIX: &str = "product:";
const UNKNOWN_GROUP: &str = "unknown";
const TRENDING_THEME_COUNT: usize = 10;

/// How issues are bucketed for grouped counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupKey {
    /// One bucket per label; an issue counts once for each label it carries.
    Label,
    /// The value after the first label starting with the prefix.
    LabelPrefix(String),
    /// A Projects V2 field, by field name.
    ProjectField(String),
    State,
}

/// Counts per group. Issues without a value for the key land in `unknown`;
/// a group only appears when at least one issue falls into it.
pub fn group_counts(issues: &[Issue], key: &GroupKey) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for issue in issues {
        let groups = match key {
            GroupKey::Label => issue.labels.clone(),
            GroupKey::LabelPrefix(prefix) => vec![label_suffix(issue, prefix)
                .unwrap_or_else(|| UNKNOWN_GROUP.to_string())],
            GroupKey::ProjectField(name) => vec![project_field(issue, name)
                .unwrap_or_else(|| UNKNOWN_GROUP.to_string())],
            GroupKey::State => vec![issue.state.to_string()],
        };
        for group in groups {
            *counts.entry(group).or_insert(0) += 1;
        }
    }
    counts
}

fn label_suffix(issue: &Issue, prefix: &str) -> Option<String> {
    issue.labels.iter().find_map(|label| {
        let label = label.trim();
        let head = label.get(..prefix.len())?;
        head.eq_ignore_ascii_case(prefix)
            .then(|| label[prefix.len()..].trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

fn project_field(issue: &Issue, name: &str) -> Option<String> {
    let fields = &issue.project_fields;
    match name.to_lowercase().as_str() {
        "status" => fields.status.clone(),
        "priority" => fields.priority.clone(),
        "iteration" | "sprint" => fields.iteration.clone(),
        _ => fields
            .extra
            .iter()
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone()),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WindowCounts {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub opened: usize,
    pub closed: usize,
}

pub fn window_counts(issues: &[Issue], window: TimeWindow) -> WindowCounts {
    let opened = issues
        .iter()
        .filter(|issue| window.contains(issue.created_at))
        .count();
    let closed = issues
        .iter()
        .filter(|issue| !issue.is_open())
        .filter_map(|issue| issue.closed_at)
        .filter(|at| window.contains(*at))
        .count();

    WindowCounts {
        start: window.start,
        end: window.end,
        opened,
        closed,
    }
}

#[derive(Debug, Clone)]
pub struct SummaryOptions {
    pub by_product: bool,
    pub by_tag: bool,
    pub time_period: Option<TimePeriod>,
    pub product_prefix: String,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            by_product: false,
            by_tag: false,
            time_period: None,
            product_prefix: DEFAULT_PRODUCT_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Theme {
    pub word: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IssueSummary {
    pub total_issues: usize,
    pub open_issues: usize,
    pub closed_issues: usize,
    /// The period token, or `all time` when unfiltered.
    pub time_period: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub by_product: Option<BTreeMap<String, usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub by_tag: Option<BTreeMap<String, usize>>,
    pub trending_themes: Vec<Theme>,
}

pub fn summarize(issues: &[Issue], options: &SummaryOptions, now: DateTime<Utc>) -> IssueSummary {
    let selected: Vec<Issue> = match options.time_period {
        Some(period) => {
            let start = now - period.duration();
            issues
                .iter()
                .filter(|issue| issue.created_at >= start)
                .cloned()
                .collect()
        }
        None => issues.to_vec(),
    };

    let open_issues = selected.iter().filter(|issue| issue.is_open()).count();

    IssueSummary {
        total_issues: selected.len(),
        open_issues,
        closed_issues: selected.len() - open_issues,
        time_period: options
            .time_period
            .map(|p| p.token().to_string())
            .unwrap_or_else(|| "all time".to_string()),
        by_product: options.by_product.then(|| {
            group_counts(&selected, &GroupKey::LabelPrefix(options.product_prefix.clone()))
        }),
        by_tag: options
            .by_tag
            .then(|| group_counts(&selected, &GroupKey::Label)),
        trending_themes: trending_themes(&selected, TRENDING_THEME_COUNT),
    }
}

/// Most frequent title words longer than two characters. Ties are broken
/// alphabetically.
pub fn trending_themes(issues: &[Issue], limit: usize) -> Vec<Theme> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for issue in issues {
        for word in tokenize(&issue.title) {
            if word.chars().count() > 2 {
                *counts.entry(word).or_insert(0) += 1;
            }
        }
    }

    let mut themes: Vec<Theme> = counts
        .into_iter()
        .map(|(word, count)| Theme { word, count })
        .collect();
    themes.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.word.cmp(&b.word)));
    themes.truncate(limit);
    themes
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DurationStats {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
}

impl DurationStats {
    pub fn from_values(mut values: Vec<f64>) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        values.sort_by(|a, b| a.total_cmp(b));

        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;
        let median = if count % 2 == 0 {
            (values[count / 2 - 1] + values[count / 2]) / 2.0
        } else {
            values[count / 2]
        };

        Some(Self {
            count,
            mean,
            median,
            min: values[0],
            max: values[count - 1],
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IssueTiming {
    pub number: u64,
    pub time_to_close_days: Option<f64>,
    pub time_to_first_comment_hours: Option<f64>,
}

impl IssueTiming {
    pub fn of(issue: &Issue) -> Self {
        Self {
            number: issue.number,
            time_to_close_days: issue
                .time_to_close()
                .map(|d| d.num_seconds() as f64 / 86_400.0),
            time_to_first_comment_hours: issue
                .time_to_first_comment()
                .map(|d| d.num_seconds() as f64 / 3_600.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IssueMetrics {
    /// Issues created per `YYYY-MM`.
    pub monthly_issue_counts: BTreeMap<String, usize>,
    /// In days.
    pub time_to_close: Option<DurationStats>,
    /// In hours.
    pub time_to_first_comment: Option<DurationStats>,
    pub with_comments: usize,
    pub without_comments: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<WindowCounts>,
    pub issues: Vec<IssueTiming>,
}

pub fn metrics(issues: &[Issue], window: Option<TimeWindow>) -> IssueMetrics {
    let mut monthly_issue_counts = BTreeMap::new();
    for issue in issues {
        *monthly_issue_counts
            .entry(issue.created_at.format("%Y-%m").to_string())
            .or_insert(0) += 1;
    }

    let timings: Vec<IssueTiming> = issues.iter().map(IssueTiming::of).collect();
    let with_comments = issues.iter().filter(|i| i.comment_count > 0).count();

    IssueMetrics {
        monthly_issue_counts,
        time_to_close: DurationStats::from_values(
            timings.iter().filter_map(|t| t.time_to_close_days).collect(),
        ),
        time_to_first_comment: DurationStats::from_values(
            timings
                .iter()
                .filter_map(|t| t.time_to_first_comment_hours)
                .collect(),
        ),
        with_comments,
        without_comments: issues.len() - with_comments,
        window: window.map(|w| window_counts(issues, w)),
        issues: timings,
    }
}
