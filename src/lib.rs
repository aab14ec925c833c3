pub mod analysis;
pub mod config;
pub mod error;
pub mod export;
pub mod github;
pub mod models;
pub mod normalize;
pub mod tools;

pub use analysis::{IssuePipeline, IssueQuery, IssueSource, StaticSource};
pub use config::{Config, PipelineConfig, RepoId};
pub use error::{Error, Result, Stage};
pub use export::{ExportFormat, ExportOptions};
pub use github::GitHubClient;
pub use normalize::Normalizer;
