use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("GitHub API error: {0}")]
    GitHubApi(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limited, retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Rate limit exceeded after {attempts} attempts")]
    RateLimitExceeded { attempts: u32 },

    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Malformed record {record}: {reason}")]
    MalformedRecord { record: String, reason: String },

    #[error("Failed to write export to {path}: {reason}")]
    ExportWrite { path: String, reason: String },

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid repository identifier: {0} (expected owner/repo)")]
    InvalidRepository(String),

    #[error("Repository not found: {0}")]
    RepoNotFound(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("{stage} failed after {processed} records: {source}")]
    Stage {
        stage: Stage,
        processed: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Excel error: {0}")]
    Excel(#[from] rust_xlsxwriter::XlsxError),

    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Normalize,
    Export,
    Analyze,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Fetch => write!(f, "fetch"),
            Stage::Normalize => write!(f, "normalize"),
            Stage::Export => write!(f, "export"),
            Stage::Analyze => write!(f, "analyze"),
        }
    }
}

impl Error {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RateLimited { .. } | Error::TransientNetwork(_))
    }

    pub fn at_stage(self, stage: Stage, processed: usize) -> Self {
        match self {
            Error::Stage { .. } => self,
            other => Error::Stage {
                stage,
                processed,
                source: Box::new(other),
            },
        }
    }

    /// The underlying error with any stage wrapper removed.
    pub fn root(&self) -> &Error {
        match self {
            Error::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Process exit code for a run that ended with this error.
    pub fn exit_code(&self) -> u8 {
        match self.root() {
            Error::Authentication(_) => 2,
            Error::RateLimitExceeded { .. } => 3,
            Error::ExportWrite { .. } | Error::Io(_) | Error::Csv(_) | Error::Excel(_) => 4,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_wrapping_keeps_root() {
        let err = Error::RateLimitExceeded { attempts: 4 }.at_stage(Stage::Fetch, 120);
        assert!(matches!(err.root(), Error::RateLimitExceeded { attempts: 4 }));
        assert_eq!(err.exit_code(), 3);
        assert_eq!(
            err.to_string(),
            "fetch failed after 120 records: Rate limit exceeded after 4 attempts"
        );

        // A second wrap does not hide the original stage.
        let rewrapped = err.at_stage(Stage::Export, 0);
        assert!(matches!(
            rewrapped,
            Error::Stage {
                stage: Stage::Fetch,
                ..
            }
        ));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::Authentication("bad".into()).exit_code(), 2);
        assert_eq!(
            Error::ExportWrite {
                path: "x".into(),
                reason: "y".into()
            }
            .exit_code(),
            4
        );
        assert_eq!(Error::Config("x".into()).exit_code(), 1);
    }

    #[test]
    fn test_retryable() {
        assert!(Error::RateLimited {
            retry_after_secs: None
        }
        .is_retryable());
        assert!(Error::TransientNetwork("reset".into()).is_retryable());
        assert!(!Error::RateLimitExceeded { attempts: 1 }.is_retryable());
        assert!(!Error::Authentication("bad".into()).is_retryable());
    }
}
