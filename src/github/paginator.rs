use futures::stream::{self, Stream};
use indicatif::ProgressBar;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::config::RepoId;
use crate::error::{Error, Result, Stage};
use crate::github::client::GitHubClient;
use crate::models::IssueFilter;

/// Follows `rel="next"` links until a REST listing is exhausted.
pub struct Paginator<'a> {
    client: &'a GitHubClient,
}

impl<'a> Paginator<'a> {
    pub fn new(client: &'a GitHubClient) -> Self {
        Self { client }
    }

    pub async fn fetch_all<T: DeserializeOwned>(
        &self,
        base_url: &str,
        per_page: u32,
    ) -> Result<Vec<T>> {
        let mut all_items = Vec::new();
        let mut next = Some(with_page_params(base_url, per_page));

        while let Some(url) = next {
            tracing::debug!("Fetching: {}", url);
            let page = self.client.get_page::<T>(&url).await?;
            all_items.extend(page.items);
            next = page.next_url.filter(|n| *n != url);
        }

        Ok(all_items)
    }
}

fn with_page_params(base_url: &str, per_page: u32) -> String {
    let separator = if base_url.contains('?') { "&" } else { "?" };
    format!("{}{}per_page={}&page=1", base_url, separator, per_page)
}

pub const ISSUES_QUERY: &str = r#"
query Issues(
  $owner: String!, $name: String!, $first: Int!, $cursor: String,
  $states: [IssueState!], $labels: [String!], $filterBy: IssueFilters,
  $withComments: Boolean!
) {
  repository(owner: $owner, name: $name) {
    issues(first: $first, after: $cursor, states: $states, labels: $labels,
           filterBy: $filterBy, orderBy: {field: CREATED_AT, direction: ASC}) {
      pageInfo { hasNextPage endCursor }
      nodes {
        number
        title
        body
        state
        createdAt
        closedAt
        updatedAt
        url
        labels(first: 50) { nodes { name } }
        assignees(first: 20) { nodes { login } }
        milestone { title }
        projectItems(first: 10) {
          nodes {
            project { title }
            fieldValues(first: 30) {
              nodes {
                ... on ProjectV2ItemFieldSingleSelectValue { name field { ... on ProjectV2FieldCommon { name } } }
                ... on ProjectV2ItemFieldTextValue { text field { ... on ProjectV2FieldCommon { name } } }
                ... on ProjectV2ItemFieldNumberValue { number field { ... on ProjectV2FieldCommon { name } } }
                ... on ProjectV2ItemFieldDateValue { date field { ... on ProjectV2FieldCommon { name } } }
                ... on ProjectV2ItemFieldIterationValue { title field { ... on ProjectV2FieldCommon { name } } }
              }
            }
          }
        }
        comments(first: 100) @include(if: $withComments) {
          totalCount
          nodes { author { login } body createdAt }
        }
        commentCount: comments { totalCount }
      }
    }
  }
}
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaginationMode {
    #[default]
    GraphQl,
    Rest,
}

/// Where the next request starts. The cursor only moves once a page has been
/// received and decoded, so a failed request is retried from the same place.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PageCursor {
    Start,
    After(String),
    Done,
}

#[derive(Deserialize)]
struct IssuesQueryData {
    repository: Option<IssuesRepository>,
}

#[derive(Deserialize)]
struct IssuesRepository {
    issues: IssueConnection,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueConnection {
    page_info: PageInfo,
    #[serde(default)]
    nodes: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

/// Walks every issue page of a repository, yielding raw JSON records.
pub struct IssuePaginator<'a> {
    client: &'a GitHubClient,
    repo: RepoId,
    filter: IssueFilter,
    include_comments: bool,
    page_size: u32,
    mode: PaginationMode,
    cursor: PageCursor,
    pages: usize,
    progress: Option<ProgressBar>,
}

impl<'a> IssuePaginator<'a> {
    pub fn new(client: &'a GitHubClient, repo: RepoId, filter: IssueFilter) -> Self {
        Self {
            client,
            repo,
            filter,
            include_comments: false,
            page_size: 100,
            mode: PaginationMode::GraphQl,
            cursor: PageCursor::Start,
            pages: 0,
            progress: None,
        }
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, 100);
        self
    }

    pub fn include_comments(mut self, include: bool) -> Self {
        self.include_comments = include;
        self
    }

    pub fn mode(mut self, mode: PaginationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages
    }

    pub fn is_done(&self) -> bool {
        self.cursor == PageCursor::Done
    }

    /// Fetches the next page, or `None` once the listing is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Value>>> {
        let after = match &self.cursor {
            PageCursor::Done => return Ok(None),
            PageCursor::Start => None,
            PageCursor::After(cursor) => Some(cursor.clone()),
        };

        let (items, next) = match self.mode {
            PaginationMode::GraphQl => self.fetch_graphql_page(after).await?,
            PaginationMode::Rest => self.fetch_rest_page(after).await?,
        };

        self.pages += 1;
        self.cursor = match next {
            Some(next) => PageCursor::After(next),
            None => PageCursor::Done,
        };
        if let Some(ref progress) = self.progress {
            progress.inc(items.len() as u64);
        }
        tracing::debug!(
            "Fetched page {} of {} ({} records)",
            self.pages,
            self.repo,
            items.len()
        );

        Ok(Some(items))
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Vec<Value>>> + 'a {
        stream::try_unfold(self, |mut paginator| async move {
            let page = paginator.next_page().await?;
            Ok::<_, Error>(page.map(|page| (page, paginator)))
        })
    }

    /// Drains every page. A failure is tagged with the number of records
    /// received before it.
    pub async fn collect_all(&mut self) -> Result<Vec<Value>> {
        let mut records = Vec::new();
        loop {
            match self.next_page().await {
                Ok(Some(page)) => records.extend(page),
                Ok(None) => return Ok(records),
                Err(err) => return Err(err.at_stage(Stage::Fetch, records.len())),
            }
        }
    }

    async fn fetch_graphql_page(
        &self,
        after: Option<String>,
    ) -> Result<(Vec<Value>, Option<String>)> {
        let variables = self.graphql_variables(after);
        let data: IssuesQueryData = self.client.graphql(ISSUES_QUERY, &variables).await?;
        let repository = data
            .repository
            .ok_or_else(|| Error::RepoNotFound(self.repo.to_string()))?;

        let connection = repository.issues;
        let next = if connection.page_info.has_next_page {
            connection.page_info.end_cursor
        } else {
            None
        };
        Ok((connection.nodes, next))
    }

    async fn fetch_rest_page(&self, after: Option<String>) -> Result<(Vec<Value>, Option<String>)> {
        let url = match after {
            Some(url) => url,
            None => self.rest_first_url()?,
        };
        let page = self.client.get_page::<Value>(&url).await?;
        let next = page.next_url.filter(|n| *n != url);
        Ok((page.items, next))
    }

    fn graphql_variables(&self, after: Option<String>) -> Value {
        let mut filter_by = Map::new();
        if let Some(since) = self.filter.since {
            filter_by.insert("since".into(), json!(since.to_rfc3339()));
        }
        if let Some(ref assignee) = self.filter.assignee {
            filter_by.insert("assignee".into(), json!(assignee));
        }
        if let Some(ref creator) = self.filter.creator {
            filter_by.insert("createdBy".into(), json!(creator));
        }
        if let Some(ref mentioned) = self.filter.mentioned {
            filter_by.insert("mentioned".into(), json!(mentioned));
        }
        if let Some(ref milestone) = self.filter.milestone {
            filter_by.insert("milestone".into(), json!(milestone));
        }

        json!({
            "owner": self.repo.owner,
            "name": self.repo.name,
            "first": self.page_size,
            "cursor": after,
            "states": self.filter.state.graphql_states(),
            "labels": (!self.filter.labels.is_empty()).then(|| &self.filter.labels),
            "filterBy": (!filter_by.is_empty()).then_some(Value::Object(filter_by)),
            "withComments": self.include_comments,
        })
    }

    /// REST `labels` requires every label, so only a single label is pushed
    /// upstream; wider label sets are filtered after normalization.
    fn rest_first_url(&self) -> Result<String> {
        let base = format!(
            "{}/repos/{}/{}/issues",
            self.client.api_url(),
            self.repo.owner,
            self.repo.name
        );
        let mut params: Vec<(&str, String)> = vec![
            ("state", self.filter.state.rest_value().to_string()),
            ("sort", "created".to_string()),
            ("direction", "asc".to_string()),
            ("per_page", self.page_size.to_string()),
            ("page", "1".to_string()),
        ];
        if let Some(since) = self.filter.since {
            params.push(("since", since.to_rfc3339()));
        }
        if let Some(ref assignee) = self.filter.assignee {
            params.push(("assignee", assignee.clone()));
        }
        if let Some(ref creator) = self.filter.creator {
            params.push(("creator", creator.clone()));
        }
        if let Some(ref mentioned) = self.filter.mentioned {
            params.push(("mentioned", mentioned.clone()));
        }
        if let Some(ref milestone) = self.filter.milestone {
            params.push(("milestone", milestone.clone()));
        }
        if let [label] = self.filter.labels.as_slice() {
            params.push(("labels", label.clone()));
        }

        Url::parse_with_params(&base, &params)
            .map(String::from)
            .map_err(|e| Error::Config(format!("invalid API URL {}: {}", base, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StateFilter;
    use crate::models::issue::fixtures::ts;

    fn client() -> GitHubClient {
        GitHubClient::with_endpoints("test-token", "https://ghe.example.com/api/v3", "unused")
            .unwrap()
    }

    #[test]
    fn test_graphql_variables() {
        let client = client();
        let filter = IssueFilter {
            state: StateFilter::Open,
            labels: vec!["bug".into()],
            since: Some(ts(2025, 1, 1, 0)),
            creator: Some("octocat".into()),
            ..Default::default()
        };
        let paginator = IssuePaginator::new(&client, "acme/widgets".parse().unwrap(), filter)
            .page_size(25)
            .include_comments(true);

        let vars = paginator.graphql_variables(Some("Y3Vyc29y".into()));
        assert_eq!(vars["owner"], "acme");
        assert_eq!(vars["first"], 25);
        assert_eq!(vars["cursor"], "Y3Vyc29y");
        assert_eq!(vars["states"], json!(["OPEN"]));
        assert_eq!(vars["labels"], json!(["bug"]));
        assert_eq!(vars["filterBy"]["createdBy"], "octocat");
        assert_eq!(vars["withComments"], true);

        let unfiltered = IssuePaginator::new(&client, "acme/widgets".parse().unwrap(), IssueFilter::default());
        let vars = unfiltered.graphql_variables(None);
        assert!(vars["cursor"].is_null());
        assert!(vars["states"].is_null());
        assert!(vars["labels"].is_null());
        assert!(vars["filterBy"].is_null());
    }

    #[test]
    fn test_rest_first_url() {
        let client = client();
        let filter = IssueFilter {
            state: StateFilter::Closed,
            labels: vec!["bug".into(), "ui".into()],
            assignee: Some("hubot".into()),
            ..Default::default()
        };
        let paginator = IssuePaginator::new(&client, "acme/widgets".parse().unwrap(), filter)
            .page_size(500)
            .mode(PaginationMode::Rest);

        let url = paginator.rest_first_url().unwrap();
        assert!(url.starts_with("https://ghe.example.com/api/v3/repos/acme/widgets/issues?"));
        assert!(url.contains("state=closed"));
        assert!(url.contains("per_page=100"));
        assert!(url.contains("assignee=hubot"));
        assert!(!url.contains("labels="));
    }

    #[test]
    fn test_page_params() {
        assert_eq!(
            with_page_params("https://x/issues/1/comments", 100),
            "https://x/issues/1/comments?per_page=100&page=1"
        );
        assert_eq!(with_page_params("https://x/a?b=1", 5), "https://x/a?b=1&per_page=5&page=1");
    }
}
