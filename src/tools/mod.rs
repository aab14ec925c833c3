//! Named tools for an external orchestration host.
//!
//! The host sees a name, a description and a JSON-schema parameter block
//! per tool. Calls come back through [`ToolDispatcher::call`], which always
//! answers with a `{"status": ...}` envelope instead of failing.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::analysis::similarity::DEFAULT_SIMILARITY_THRESHOLD;
use crate::analysis::{
    metrics, summarize, CsmAdvisor, IssueBatch, IssueQuery, IssueSource, SimilarityAdvisor,
    SummaryOptions, TagSuggester,
};
use crate::config::RepoId;
use crate::error::{Error, Result, Stage};
use crate::models::{Issue, TimePeriod};

pub const SUMMARIZE: &str = "github_issues_summarize";
pub const METRICS: &str = "github_issues_metrics";
pub const DETECT_SIMILAR: &str = "github_issues_detect_similar";
pub const SUGGEST_TAGS: &str = "github_issues_suggest_tags";
pub const CSM_INTELLIGENCE: &str = "github_issues_csm_intelligence";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

pub trait ToolHost {
    fn register(&mut self, tool: ToolDescriptor) -> Result<()>;
}

/// A host that just records what was registered, for listing and tests.
#[derive(Debug, Default)]
pub struct ToolManifest {
    tools: Vec<ToolDescriptor>,
}

impl ToolManifest {
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }
}

impl ToolHost for ToolManifest {
    fn register(&mut self, tool: ToolDescriptor) -> Result<()> {
        if self.tools.iter().any(|t| t.name == tool.name) {
            return Err(Error::Config(format!("tool {} registered twice", tool.name)));
        }
        self.tools.push(tool);
        Ok(())
    }
}

fn repo_property() -> Value {
    json!({
        "type": "string",
        "description": "GitHub repository in format 'owner/repo'; defaults to GH_REPO"
    })
}

fn schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

pub fn tool_descriptors() -> Vec<ToolDescriptor> {
    let tool = |name: &str, description: &str, parameters: Value| ToolDescriptor {
        name: name.to_string(),
        description: description.to_string(),
        parameters,
    };

    vec![
        tool(
            SUMMARIZE,
            "Summarize GitHub issues by product, tag, or time period",
            schema(
                json!({
                    "repo": repo_property(),
                    "by_product": {"type": "boolean", "description": "Group by product label", "default": false},
                    "by_tag": {"type": "boolean", "description": "Group by label", "default": false},
                    "time_period": {
                        "type": "string",
                        "description": "Only issues created in the last period",
                        "enum": ["1w", "1m", "3m", "1y"]
                    }
                }),
                &[],
            ),
        ),
        tool(
            METRICS,
            "Analyze metrics like issue counts, time-to-close, and PM responsiveness",
            schema(json!({ "repo": repo_property() }), &[]),
        ),
        tool(
            DETECT_SIMILAR,
            "Detect similar or duplicate issues",
            schema(
                json!({
                    "repo": repo_property(),
                    "threshold": {
                        "type": "number",
                        "description": "Similarity threshold (0.0 to 1.0)",
                        "minimum": 0.0,
                        "maximum": 1.0,
                        "default": DEFAULT_SIMILARITY_THRESHOLD
                    }
                }),
                &[],
            ),
        ),
        tool(
            SUGGEST_TAGS,
            "Suggest tags based on issue content",
            schema(
                json!({
                    "repo": repo_property(),
                    "issue_number": {
                        "type": "integer",
                        "description": "Issue to analyze; omit to analyze every issue"
                    }
                }),
                &[],
            ),
        ),
        tool(
            CSM_INTELLIGENCE,
            "Provide CSM intelligence for new issues",
            schema(
                json!({
                    "issue_title": {"type": "string", "description": "Title of the new issue"},
                    "issue_body": {"type": "string", "description": "Body content of the new issue"},
                    "repo": repo_property()
                }),
                &["issue_title"],
            ),
        ),
    ]
}

/// Registers every tool with the host, returning how many were registered.
pub fn register_tools(host: &mut dyn ToolHost) -> Result<usize> {
    let descriptors = tool_descriptors();
    let count = descriptors.len();
    for descriptor in descriptors {
        host.register(descriptor)?;
    }
    tracing::info!("Registered {} GitHub issue tools", count);
    Ok(count)
}

#[derive(Debug, Deserialize)]
struct SummarizeArgs {
    repo: Option<String>,
    #[serde(default)]
    by_product: bool,
    #[serde(default)]
    by_tag: bool,
    time_period: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepoArgs {
    repo: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetectSimilarArgs {
    repo: Option<String>,
    #[serde(default = "default_threshold")]
    threshold: f64,
}

fn default_threshold() -> f64 {
    DEFAULT_SIMILARITY_THRESHOLD
}

#[derive(Debug, Deserialize)]
struct SuggestTagsArgs {
    repo: Option<String>,
    issue_number: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct CsmArgs {
    issue_title: String,
    #[serde(default)]
    issue_body: String,
    repo: Option<String>,
}

/// Routes tool calls to the analysis components over an [`IssueSource`].
pub struct ToolDispatcher<S> {
    source: S,
    default_repo: Option<String>,
    similarity: SimilarityAdvisor,
    tags: TagSuggester,
    csm: CsmAdvisor,
}

impl<S: IssueSource> ToolDispatcher<S> {
    pub fn new(source: S, default_repo: Option<String>) -> Self {
        Self {
            source,
            default_repo,
            similarity: SimilarityAdvisor::default(),
            tags: TagSuggester::default(),
            csm: CsmAdvisor::default(),
        }
    }

    pub async fn call(&self, name: &str, args: Value) -> Value {
        tracing::debug!("Tool call: {}", name);
        match self.dispatch(name, args).await {
            Ok(data) => json!({ "status": "success", "data": data }),
            Err(err) => {
                tracing::warn!("Tool {} failed: {}", name, err);
                json!({ "status": "error", "message": err.to_string() })
            }
        }
    }

    async fn dispatch(&self, name: &str, args: Value) -> Result<Value> {
        match name {
            SUMMARIZE => {
                let args: SummarizeArgs = parse_args(name, args)?;
                let options = SummaryOptions {
                    by_product: args.by_product,
                    by_tag: args.by_tag,
                    time_period: args
                        .time_period
                        .as_deref()
                        .map(str::parse::<TimePeriod>)
                        .transpose()?,
                    ..Default::default()
                };
                let batch = self.load(args.repo.as_deref(), false).await?;
                Ok(serde_json::to_value(summarize(&batch.issues, &options, Utc::now()))?)
            }
            METRICS => {
                let args: RepoArgs = parse_args(name, args)?;
                let batch = self.load(args.repo.as_deref(), true).await?;
                Ok(serde_json::to_value(metrics(&batch.issues, None))?)
            }
            DETECT_SIMILAR => {
                let args: DetectSimilarArgs = parse_args(name, args)?;
                let batch = self.load(args.repo.as_deref(), false).await?;
                let groups = self
                    .similarity
                    .detect_groups(&batch.issues, args.threshold)
                    .map_err(|e| e.at_stage(Stage::Analyze, batch.issues.len()))?;
                Ok(serde_json::to_value(groups)?)
            }
            SUGGEST_TAGS => {
                let args: SuggestTagsArgs = parse_args(name, args)?;
                let batch = self.load(args.repo.as_deref(), false).await?;
                self.suggest_tags(&batch, args.issue_number)
            }
            CSM_INTELLIGENCE => {
                let args: CsmArgs = parse_args(name, args)?;
                let batch = self.load(args.repo.as_deref(), false).await?;
                let guidance = self
                    .csm
                    .advise(&args.issue_title, &args.issue_body, &batch.issues)
                    .map_err(|e| e.at_stage(Stage::Analyze, batch.issues.len()))?;
                Ok(serde_json::to_value(guidance)?)
            }
            other => Err(Error::UnknownTool(other.to_string())),
        }
    }

    fn suggest_tags(&self, batch: &IssueBatch, issue_number: Option<u64>) -> Result<Value> {
        let tags_for = |issue: &Issue| -> Vec<String> {
            self.tags
                .suggest_for_issue(issue)
                .into_iter()
                .map(|s| s.tag)
                .collect()
        };

        match issue_number {
            Some(number) => {
                let issue = batch
                    .issues
                    .iter()
                    .find(|i| i.number == number)
                    .ok_or_else(|| Error::Config(format!("issue #{} not found", number)))?;
                Ok(json!({
                    "issue_number": number,
                    "suggested_tags": tags_for(issue),
                }))
            }
            None => {
                let suggestions: Vec<Value> = batch
                    .issues
                    .iter()
                    .filter_map(|issue| {
                        let tags = tags_for(issue);
                        (!tags.is_empty()).then(|| {
                            json!({
                                "number": issue.number,
                                "title": issue.title,
                                "suggested_tags": tags,
                            })
                        })
                    })
                    .collect();
                Ok(json!({ "issue_number": "all", "suggestions": suggestions }))
            }
        }
    }

    async fn load(&self, repo: Option<&str>, include_comments: bool) -> Result<IssueBatch> {
        let repo: RepoId = repo
            .or(self.default_repo.as_deref())
            .ok_or_else(|| Error::Config("no repository given and GH_REPO is not set".into()))?
            .parse()?;
        let query = IssueQuery {
            include_comments,
            ..IssueQuery::new(repo)
        };
        self.source.load_issues(&query).await
    }
}

fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args)
        .map_err(|e| Error::Config(format!("invalid arguments for {}: {}", tool, e)))
}
