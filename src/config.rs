use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 5;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_MAX_RETRY_WAIT_SECS: u64 = 300;

static REPO_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+$").expect("valid repo pattern"));

#[derive(Clone)]
pub struct Config {
    pub github_token: Option<String>,
    pub default_repo: Option<String>,
    pub api_url: String,
    pub graphql_url: String,
    pub page_size: u32,
    pub concurrency_limit: usize,
    pub max_retries: u32,
    pub max_retry_wait: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let github_token = env::var("GH_TOKEN")
            .or_else(|_| env::var("GITHUB_TOKEN"))
            .ok()
            .filter(|t| !t.trim().is_empty());

        let default_repo = env::var("GH_REPO").ok().filter(|r| !r.is_empty());

        let api_url = env::var("GHES_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());

        let page_size: u32 = env_number("PAGE_SIZE")?.unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size == 0 || page_size > 100 {
            return Err(Error::Config(format!(
                "PAGE_SIZE must be between 1 and 100, got {}",
                page_size
            )));
        }

        let concurrency_limit = env_number("CONCURRENCY_LIMIT")?
            .unwrap_or(DEFAULT_CONCURRENCY_LIMIT)
            .max(1);

        let max_retries = env_number("MAX_RETRIES")?.unwrap_or(DEFAULT_MAX_RETRIES);

        let max_retry_wait = env_number("MAX_RETRY_WAIT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_MAX_RETRY_WAIT_SECS));

        Ok(Self {
            github_token,
            default_repo,
            graphql_url: graphql_url_for(&api_url),
            api_url,
            page_size,
            concurrency_limit,
            max_retries,
            max_retry_wait,
        })
    }

    /// Point both endpoints at a REST base URL, deriving the GraphQL one.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self.graphql_url = graphql_url_for(&self.api_url);
        self
    }

    pub fn require_token(&self) -> Result<&str> {
        self.github_token.as_deref().ok_or_else(|| {
            Error::Authentication(
                "no GitHub token supplied (use --token or set GH_TOKEN)".to_string(),
            )
        })
    }

    pub fn resolve_repo(&self, explicit: Option<&str>) -> Result<RepoId> {
        explicit
            .or(self.default_repo.as_deref())
            .ok_or_else(|| Error::Config("no repository given (use --repo or set GH_REPO)".into()))?
            .parse()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            github_token: None,
            default_repo: None,
            api_url: DEFAULT_API_URL.to_string(),
            graphql_url: graphql_url_for(DEFAULT_API_URL),
            page_size: DEFAULT_PAGE_SIZE,
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            max_retries: DEFAULT_MAX_RETRIES,
            max_retry_wait: Duration::from_secs(DEFAULT_MAX_RETRY_WAIT_SECS),
        }
    }
}

// The token must never reach the logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("github_token", &self.github_token.as_ref().map(|_| "<redacted>"))
            .field("default_repo", &self.default_repo)
            .field("api_url", &self.api_url)
            .field("graphql_url", &self.graphql_url)
            .field("page_size", &self.page_size)
            .field("concurrency_limit", &self.concurrency_limit)
            .field("max_retries", &self.max_retries)
            .field("max_retry_wait", &self.max_retry_wait)
            .finish()
    }
}

fn env_number<T: FromStr>(name: &str) -> Result<Option<T>> {
    parse_var(name, env::var(name).ok())
}

/// Parses an optional numeric setting. Unset or blank means the default;
/// anything unparseable is a configuration error.
fn parse_var<T: FromStr>(name: &str, value: Option<String>) -> Result<Option<T>> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|_| {
            Error::Config(format!("{} must be a non-negative integer, got '{}'", name, raw))
        }),
    }
}

/// GitHub Enterprise serves GraphQL at `/api/graphql` next to `/api/v3`.
pub fn graphql_url_for(api_url: &str) -> String {
    let base = api_url.trim_end_matches('/');
    match base.strip_suffix("/api/v3") {
        Some(host) => format!("{}/api/graphql", host),
        None => format!("{}/graphql", base),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoId {
    pub owner: String,
    pub name: String,
}

impl FromStr for RepoId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if !REPO_PATTERN.is_match(s) {
            return Err(Error::InvalidRepository(s.to_string()));
        }
        let (owner, name) = s
            .split_once('/')
            .ok_or_else(|| Error::InvalidRepository(s.to_string()))?;
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub page_size: u32,
    pub concurrency_limit: usize,
    pub show_progress: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            show_progress: false,
        }
    }
}

impl From<&Config> for PipelineConfig {
    fn from(config: &Config) -> Self {
        Self {
            page_size: config.page_size,
            concurrency_limit: config.concurrency_limit,
            show_progress: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_repo_id() {
        let repo: RepoId = "rust-lang/rust".parse().unwrap();
        assert_eq!(repo.owner, "rust-lang");
        assert_eq!(repo.name, "rust");
        assert_eq!(repo.to_string(), "rust-lang/rust");

        assert!("no-slash".parse::<RepoId>().is_err());
        assert!("a/b/c".parse::<RepoId>().is_err());
        assert!("owner/".parse::<RepoId>().is_err());
        assert!("own er/repo".parse::<RepoId>().is_err());
    }

    #[test]
    fn test_graphql_url_derivation() {
        assert_eq!(
            graphql_url_for("https://api.github.com"),
            "https://api.github.com/graphql"
        );
        assert_eq!(
            graphql_url_for("https://github.example.com/api/v3/"),
            "https://github.example.com/api/graphql"
        );
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = Config {
            github_token: Some("ghp_supersecret".to_string()),
            ..Default::default()
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("ghp_supersecret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_numeric_settings_reject_garbage() {
        assert_eq!(parse_var::<u32>("PAGE_SIZE", None).unwrap(), None);
        assert_eq!(parse_var::<u32>("PAGE_SIZE", Some(" ".into())).unwrap(), None);
        assert_eq!(parse_var::<u32>("PAGE_SIZE", Some("50".into())).unwrap(), Some(50));

        let err = parse_var::<u32>("PAGE_SIZE", Some("abc".into())).unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("PAGE_SIZE")));
        assert!(parse_var::<usize>("CONCURRENCY_LIMIT", Some("-2".into())).is_err());
        assert!(parse_var::<u32>("MAX_RETRIES", Some("three".into())).is_err());
    }

    #[test]
    fn test_resolve_repo_falls_back_to_default() {
        let config = Config {
            default_repo: Some("acme/widgets".to_string()),
            ..Default::default()
        };
        assert_eq!(config.resolve_repo(None).unwrap().to_string(), "acme/widgets");
        assert_eq!(
            config.resolve_repo(Some("acme/gadgets")).unwrap().name,
            "gadgets"
        );
        assert!(Config::default().resolve_repo(None).is_err());
    }
}
