use reqwest::header::{self, HeaderMap};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::{graphql_url_for, Config, RepoId, DEFAULT_API_URL};
use crate::error::{Error, Result};
use crate::github::paginator::Paginator;
use crate::github::rate_limiter::{is_rate_limit_response, retry_after_secs, RateLimiter};
use crate::github::retry::RetryPolicy;

pub struct GitHubClient {
    client: Client,
    rate_limiter: RateLimiter,
    retry_policy: RetryPolicy,
    api_url: String,
    graphql_url: String,
}

/// One page of a REST listing plus the `rel="next"` link, if any.
#[derive(Debug)]
pub struct RestPage<T> {
    pub items: Vec<T>,
    pub next_url: Option<String>,
}

#[derive(Deserialize)]
struct GraphQLResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQLError>,
}

#[derive(Deserialize)]
struct GraphQLError {
    message: String,
    #[serde(default, rename = "type")]
    error_type: Option<String>,
}

impl GraphQLError {
    fn is_rate_limit(&self) -> bool {
        self.error_type.as_deref() == Some("RATE_LIMITED")
            || self.message.to_lowercase().contains("rate limit")
    }
}

impl<T> GraphQLResponse<T> {
    fn into_result(self) -> Result<T> {
        if self.errors.iter().any(GraphQLError::is_rate_limit) {
            return Err(Error::RateLimited {
                retry_after_secs: None,
            });
        }

        match self.data {
            Some(data) => {
                // Partial data is still useful, e.g. when the token cannot read
                // project boards but can read issues.
                for error in &self.errors {
                    tracing::warn!("GraphQL returned a partial error: {}", error.message);
                }
                Ok(data)
            }
            None => {
                let messages: Vec<_> = self.errors.iter().map(|e| e.message.as_str()).collect();
                if let Some(missing) = self
                    .errors
                    .iter()
                    .find(|e| e.error_type.as_deref() == Some("NOT_FOUND"))
                {
                    return Err(Error::RepoNotFound(missing.message.clone()));
                }
                if messages.is_empty() {
                    Err(Error::GitHubApi("GraphQL response carried no data".to_string()))
                } else {
                    Err(Error::GitHubApi(messages.join("; ")))
                }
            }
        }
    }
}

impl GitHubClient {
    pub fn new(token: &str) -> Result<Self> {
        Self::with_endpoints(token, DEFAULT_API_URL, &graphql_url_for(DEFAULT_API_URL))
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let client = Self::with_endpoints(
            config.require_token()?,
            &config.api_url,
            &config.graphql_url,
        )?;
        Ok(client.with_retry_policy(RetryPolicy::new(
            config.max_retries,
            config.max_retry_wait,
        )))
    }

    pub fn with_endpoints(token: &str, api_url: &str, graphql_url: &str) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        let mut auth = header::HeaderValue::from_str(&format!("Bearer {}", token))?;
        auth.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, auth);
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            header::HeaderValue::from_static("2022-11-28"),
        );
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_static("ghissues/0.1"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            rate_limiter: RateLimiter::new(),
            retry_policy: RetryPolicy::default(),
            api_url: api_url.trim_end_matches('/').to_string(),
            graphql_url: graphql_url.to_string(),
        })
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub async fn graphql<T: DeserializeOwned>(&self, query: &str, variables: &Value) -> Result<T> {
        let body = json!({ "query": query, "variables": variables });
        let body = &body;
        let graphql_url = self.graphql_url.as_str();

        self.retry_policy
            .execute(move || async move {
                let (_, bytes) = self.attempt(Method::POST, graphql_url, Some(body)).await?;
                let response: GraphQLResponse<T> = serde_json::from_slice(&bytes)
                    .map_err(|e| Error::ParseError(format!("invalid GraphQL response: {}", e)))?;
                response.into_result()
            })
            .await
    }

    pub async fn get_page<T: DeserializeOwned>(&self, url: &str) -> Result<RestPage<T>> {
        self.retry_policy
            .execute(move || async move {
                let (headers, bytes) = self.attempt(Method::GET, url, None).await?;
                let items: Vec<T> = serde_json::from_slice(&bytes)
                    .map_err(|e| Error::ParseError(format!("invalid response from {}: {}", url, e)))?;
                Ok(RestPage {
                    items,
                    next_url: next_link(&headers),
                })
            })
            .await
    }

    pub async fn get_issue_comments(&self, repo: &RepoId, number: u64) -> Result<Vec<Value>> {
        let url = format!(
            "{}/repos/{}/{}/issues/{}/comments",
            self.api_url, repo.owner, repo.name, number
        );
        let paginator = Paginator::new(self);
        tracing::debug!("Fetching comments for {}#{}", repo, number);
        paginator.fetch_all(&url, 100).await
    }

    /// A single request with no retry. Failures are classified so the retry
    /// policy can tell rate limiting and flaky networks from fatal errors.
    async fn attempt(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<(HeaderMap, Vec<u8>)> {
        if let Some(delay) = self.rate_limiter.pending_delay().await {
            return Err(Error::RateLimited {
                retry_after_secs: Some(delay.as_secs() + 1),
            });
        }

        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(classify_send_error)?;
        self.rate_limiter.update_from_headers(response.headers()).await;

        let status = response.status();
        let headers = response.headers().clone();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &headers, &body, url));
        }

        let bytes = response.bytes().await.map_err(classify_send_error)?;
        Ok((headers, bytes.to_vec()))
    }
}

fn classify_send_error(err: reqwest::Error) -> Error {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        Error::TransientNetwork(err.to_string())
    } else {
        Error::Network(err)
    }
}

fn classify_status(status: StatusCode, headers: &HeaderMap, body: &str, url: &str) -> Error {
    if is_rate_limit_response(status, headers, body) {
        return Error::RateLimited {
            retry_after_secs: retry_after_secs(headers),
        };
    }

    match status {
        StatusCode::UNAUTHORIZED => {
            Error::Authentication(format!("GitHub rejected the token ({})", status))
        }
        StatusCode::FORBIDDEN => {
            Error::Authentication(format!("access forbidden: {}", excerpt(body)))
        }
        StatusCode::NOT_FOUND => Error::RepoNotFound(url.to_string()),
        s if s.is_server_error() => {
            Error::TransientNetwork(format!("{} returned {}", url, s))
        }
        s => Error::GitHubApi(format!("{} - {}", s, excerpt(body))),
    }
}

fn excerpt(body: &str) -> String {
    body.chars().take(200).collect()
}

/// Extracts the `rel="next"` target from a `Link` header.
pub fn next_link(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(header::LINK)?.to_str().ok()?;
    link.split(',')
        .find(|part| part.contains("rel=\"next\""))
        .and_then(|part| {
            let start = part.find('<')? + 1;
            let end = part.find('>')?;
            (end > start).then(|| part[start..end].to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_next_link() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::LINK,
            HeaderValue::from_static(
                "<https://api.github.com/repositories/1/issues?page=2>; rel=\"next\", \
                 <https://api.github.com/repositories/1/issues?page=5>; rel=\"last\"",
            ),
        );
        assert_eq!(
            next_link(&headers).as_deref(),
            Some("https://api.github.com/repositories/1/issues?page=2")
        );

        headers.insert(
            header::LINK,
            HeaderValue::from_static("<https://api.github.com/x?page=1>; rel=\"prev\""),
        );
        assert_eq!(next_link(&headers), None);
    }

    #[test]
    fn test_classify_status() {
        let empty = HeaderMap::new();
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, &empty, "", "u"),
            Error::Authentication(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, &empty, "no access", "u"),
            Error::Authentication(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, &empty, "", "u"),
            Error::RateLimited { .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, &empty, "", "u"),
            Error::TransientNetwork(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, &empty, "bad", "u"),
            Error::GitHubApi(_)
        ));
    }

    #[test]
    fn test_graphql_errors() {
        let limited: GraphQLResponse<Value> = serde_json::from_value(json!({
            "data": null,
            "errors": [{"type": "RATE_LIMITED", "message": "API rate limit exceeded"}]
        }))
        .unwrap();
        assert!(matches!(limited.into_result(), Err(Error::RateLimited { .. })));

        let missing: GraphQLResponse<Value> = serde_json::from_value(json!({
            "errors": [{"type": "NOT_FOUND", "message": "Could not resolve to a Repository"}]
        }))
        .unwrap();
        assert!(matches!(missing.into_result(), Err(Error::RepoNotFound(_))));

        let partial: GraphQLResponse<Value> = serde_json::from_value(json!({
            "data": {"repository": {}},
            "errors": [{"type": "INSUFFICIENT_SCOPES", "message": "read:project required"}]
        }))
        .unwrap();
        assert!(partial.into_result().is_ok());
    }
}
