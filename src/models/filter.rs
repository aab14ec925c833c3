use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::models::issue::{Issue, IssueState};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StateFilter {
    Open,
    Closed,
    #[default]
    All,
}

impl StateFilter {
    pub fn matches(&self, state: IssueState) -> bool {
        match self {
            StateFilter::All => true,
            StateFilter::Open => state == IssueState::Open,
            StateFilter::Closed => state == IssueState::Closed,
        }
    }

    /// Values for the GraphQL `states` argument.
    pub fn graphql_states(&self) -> Option<Vec<&'static str>> {
        match self {
            StateFilter::Open => Some(vec!["OPEN"]),
            StateFilter::Closed => Some(vec!["CLOSED"]),
            StateFilter::All => None,
        }
    }

    pub fn rest_value(&self) -> &'static str {
        match self {
            StateFilter::Open => "open",
            StateFilter::Closed => "closed",
            StateFilter::All => "all",
        }
    }
}

impl FromStr for StateFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "open" => Ok(StateFilter::Open),
            "closed" => Ok(StateFilter::Closed),
            "all" => Ok(StateFilter::All),
            other => Err(Error::Config(format!(
                "invalid state '{}', expected open, closed or all",
                other
            ))),
        }
    }
}

/// Criteria applied to an issue query.
///
/// `state`, `labels`, `assignee`, `creator`, `mentioned` and `milestone` are
/// pushed to GitHub. An issue matches the label filter when it carries any of
/// the listed labels, which is how the GraphQL `labels` argument behaves.
/// The creation-date range is checked locally because the API only filters
/// on update time; `since` is still forwarded as a lower bound since
/// anything created after it was also updated after it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueFilter {
    #[serde(default)]
    pub state: StateFilter,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub creator: Option<String>,
    #[serde(default)]
    pub mentioned: Option<String>,
    #[serde(default)]
    pub milestone: Option<String>,
}

impl IssueFilter {
    pub fn matches(&self, issue: &Issue) -> bool {
        if !self.state.matches(issue.state) {
            return false;
        }
        if let Some(since) = self.since {
            if issue.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if issue.created_at >= until {
                return false;
            }
        }
        if !self.labels.is_empty() && !self.labels.iter().any(|l| issue.has_label(l)) {
            return false;
        }
        if let Some(ref assignee) = self.assignee {
            if !issue.assignees.iter().any(|a| a.eq_ignore_ascii_case(assignee)) {
                return false;
            }
        }
        true
    }
}

/// Accepts RFC 3339 timestamps or bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_date(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| Error::Config(format!("invalid date format: {}", s)))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| Error::Config(format!("invalid date: {}", s)))?;
    Ok(Utc.from_utc_datetime(&midnight))
}

/// Relative reporting period token: `1w`, `1m`, `3m` or `1y`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TimePeriod {
    #[serde(rename = "1w")]
    Week,
    #[serde(rename = "1m")]
    Month,
    #[serde(rename = "3m")]
    Quarter,
    #[serde(rename = "1y")]
    Year,
}

impl TimePeriod {
    pub fn duration(&self) -> Duration {
        match self {
            TimePeriod::Week => Duration::weeks(1),
            TimePeriod::Month => Duration::days(30),
            TimePeriod::Quarter => Duration::days(90),
            TimePeriod::Year => Duration::days(365),
        }
    }

    pub fn window_ending(&self, end: DateTime<Utc>) -> TimeWindow {
        TimeWindow {
            start: end - self.duration(),
            end,
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            TimePeriod::Week => "1w",
            TimePeriod::Month => "1m",
            TimePeriod::Quarter => "3m",
            TimePeriod::Year => "1y",
        }
    }
}

impl FromStr for TimePeriod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1w" => Ok(TimePeriod::Week),
            "1m" => Ok(TimePeriod::Month),
            "3m" => Ok(TimePeriod::Quarter),
            "1y" => Ok(TimePeriod::Year),
            other => Err(Error::Config(format!(
                "invalid time period '{}', expected 1w, 1m, 3m or 1y",
                other
            ))),
        }
    }
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}
