use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use ghissues::analysis::similarity::DEFAULT_SIMILARITY_THRESHOLD;
use ghissues::analysis::{
    metrics, summarize, CsmAdvisor, IssueSource, SimilarityAdvisor, SummaryOptions, TagSuggester,
};
use ghissues::github::PaginationMode;
use ghissues::models::{parse_date, IssueFilter, StateFilter, TimePeriod};
use ghissues::tools::{register_tools, ToolDispatcher, ToolManifest};
use ghissues::{
    Config, Error, ExportFormat, ExportOptions, GitHubClient, IssuePipeline, IssueQuery,
    PipelineConfig, RepoId, StaticSource,
};

#[derive(Parser, Debug)]
#[command(name = "ghissues")]
#[command(version)]
#[command(about = "Export GitHub issues to CSV, Excel or JSON and analyze them")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch issues and write them to a file
    Export {
        #[command(flatten)]
        source: SourceArgs,

        /// Output file; the extension picks the format unless --format is given
        #[arg(short, long)]
        output: PathBuf,

        /// Output format (csv, excel, json)
        #[arg(short, long)]
        format: Option<ExportFormat>,

        /// Add a column with every comment on the issue
        #[arg(long)]
        include_comments: bool,

        /// Add a column with the sanitized issue body
        #[arg(long)]
        include_body: bool,
    },

    /// Counts by state, product and tag plus trending words
    Summarize {
        #[command(flatten)]
        source: SourceArgs,

        #[arg(long)]
        by_product: bool,

        #[arg(long)]
        by_tag: bool,

        /// Only count issues created in the last 1w, 1m, 3m or 1y
        #[arg(long)]
        period: Option<TimePeriod>,
    },

    /// Monthly counts, time to close and time to first comment
    Metrics {
        #[command(flatten)]
        source: SourceArgs,

        /// Also report opened/closed counts for the last 1w, 1m, 3m or 1y
        #[arg(long)]
        period: Option<TimePeriod>,
    },

    /// Issues resembling a title, or groups of near-duplicates
    Similar {
        #[command(flatten)]
        source: SourceArgs,

        /// Compare against this title instead of grouping the whole set
        #[arg(long)]
        title: Option<String>,

        #[arg(long, default_value = "")]
        body: String,

        #[arg(long, default_value_t = DEFAULT_SIMILARITY_THRESHOLD)]
        threshold: f64,

        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Suggest labels for one issue, a draft, or every issue
    SuggestTags {
        #[command(flatten)]
        source: SourceArgs,

        /// Issue number to suggest tags for
        #[arg(long, conflicts_with = "title")]
        issue: Option<u64>,

        /// Draft title to suggest tags for
        #[arg(long)]
        title: Option<String>,

        #[arg(long, default_value = "")]
        body: String,
    },

    /// Triage guidance for a customer report
    Csm {
        #[command(flatten)]
        source: SourceArgs,

        #[arg(long)]
        title: String,

        #[arg(long, default_value = "")]
        body: String,
    },

    /// Tool descriptors and calls for an orchestration host
    Tools {
        #[command(subcommand)]
        command: ToolsCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ToolsCommand {
    /// Print the tool descriptors as JSON
    List,

    /// Invoke a tool with JSON arguments
    Call {
        name: String,

        #[arg(long, default_value = "{}")]
        args: String,

        #[command(flatten)]
        source: SourceArgs,
    },
}

#[derive(Args, Debug, Clone)]
struct SourceArgs {
    /// Repository in owner/repo form (defaults to GH_REPO)
    #[arg(short, long)]
    repo: Option<String>,

    /// GitHub token (defaults to GH_TOKEN or GITHUB_TOKEN)
    #[arg(long, hide_env_values = true, env = "GH_TOKEN")]
    token: Option<String>,

    /// Read issues from a JSON export instead of calling GitHub
    #[arg(long)]
    from: Option<PathBuf>,

    /// Page through the REST API instead of GraphQL
    #[arg(long)]
    rest: bool,

    /// Hide progress bars
    #[arg(short, long)]
    quiet: bool,

    #[command(flatten)]
    filter: FilterArgs,
}

#[derive(Args, Debug, Clone)]
struct FilterArgs {
    /// open, closed or all
    #[arg(long, default_value = "all")]
    state: StateFilter,

    /// Keep issues carrying any of these labels (repeatable)
    #[arg(short, long = "label")]
    labels: Vec<String>,

    /// Created on or after this date (YYYY-MM-DD or RFC 3339)
    #[arg(long)]
    since: Option<String>,

    /// Created before this date
    #[arg(long)]
    until: Option<String>,

    #[arg(long)]
    assignee: Option<String>,

    #[arg(long)]
    creator: Option<String>,

    #[arg(long)]
    mentioned: Option<String>,

    /// Milestone number, `*` for any or `none`
    #[arg(long)]
    milestone: Option<String>,
}

impl FilterArgs {
    fn to_filter(&self) -> ghissues::Result<IssueFilter> {
        Ok(IssueFilter {
            state: self.state,
            labels: self.labels.clone(),
            since: self.since.as_deref().map(parse_date).transpose()?,
            until: self.until.as_deref().map(parse_date).transpose()?,
            assignee: self.assignee.clone(),
            creator: self.creator.clone(),
            mentioned: self.mentioned.clone(),
            milestone: self.milestone.clone(),
        })
    }
}

/// Placeholder identity for issues read back from a file.
fn offline_repo() -> RepoId {
    RepoId {
        owner: "local".to_string(),
        name: "export".to_string(),
    }
}

struct Session {
    source: Box<dyn IssueSource>,
    repo: RepoId,
}

impl Session {
    fn open(args: &SourceArgs, mut config: Config) -> anyhow::Result<Self> {
        if let Some(ref token) = args.token {
            config.github_token = Some(token.clone());
        }

        if let Some(ref path) = args.from {
            let repo = config
                .resolve_repo(args.repo.as_deref())
                .unwrap_or_else(|_| offline_repo());
            let source = StaticSource::from_json_file(path)?;
            return Ok(Self {
                source: Box::new(source),
                repo,
            });
        }

        let repo = config.resolve_repo(args.repo.as_deref())?;
        let github = GitHubClient::from_config(&config)?;
        let pipeline_config = PipelineConfig {
            show_progress: !args.quiet,
            ..PipelineConfig::from(&config)
        };
        let mode = if args.rest {
            PaginationMode::Rest
        } else {
            PaginationMode::GraphQl
        };
        let pipeline = IssuePipeline::new(github, pipeline_config).with_mode(mode);

        Ok(Self {
            source: Box::new(pipeline),
            repo,
        })
    }

    async fn load(
        &self,
        args: &SourceArgs,
        include_comments: bool,
    ) -> anyhow::Result<Vec<ghissues::models::Issue>> {
        let query = IssueQuery {
            filter: args.filter.to_filter()?,
            include_comments,
            ..IssueQuery::new(self.repo.clone())
        };
        let batch = self.source.load_issues(&query).await?;
        if !batch.warnings.is_empty() {
            tracing::warn!("{} records could not be normalized", batch.warnings.len());
        }
        Ok(batch.issues)
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    tracing::debug!("Configuration: {:?}", config);

    match cli.command {
        Command::Export {
            source,
            output,
            format,
            include_comments,
            include_body,
        } => {
            let session = Session::open(&source, config)?;
            let format = format.unwrap_or_else(|| ExportFormat::from_path(&output));
            let issues = session.load(&source, include_comments).await?;

            let options = ExportOptions {
                include_comments,
                include_body,
            };
            let written = ghissues::export::export_issues(&issues, &output, format, &options)
                .map_err(|e| e.at_stage(ghissues::Stage::Export, issues.len()))?;
            println!(
                "Exported {} issues from {} to {} ({})",
                written,
                session.repo,
                output.display(),
                format
            );
        }

        Command::Summarize {
            source,
            by_product,
            by_tag,
            period,
        } => {
            let session = Session::open(&source, config)?;
            let issues = session.load(&source, false).await?;
            let options = SummaryOptions {
                by_product,
                by_tag,
                time_period: period,
                ..Default::default()
            };
            print_json(&summarize(&issues, &options, Utc::now()))?;
        }

        Command::Metrics { source, period } => {
            let session = Session::open(&source, config)?;
            let issues = session.load(&source, true).await?;
            let window = period.map(|p| p.window_ending(Utc::now()));
            print_json(&metrics(&issues, window))?;
        }

        Command::Similar {
            source,
            title,
            body,
            threshold,
            limit,
        } => {
            let session = Session::open(&source, config)?;
            let issues = session.load(&source, false).await?;
            let advisor = SimilarityAdvisor::default();
            match title {
                Some(title) => {
                    print_json(&advisor.find_similar(&title, &body, &issues, threshold, limit)?)?
                }
                None => print_json(&advisor.detect_groups(&issues, threshold)?)?,
            }
        }

        Command::SuggestTags {
            source,
            issue,
            title,
            body,
        } => {
            let suggester = TagSuggester::default();
            if let Some(title) = title {
                return print_json(&suggester.suggest(&title, &body));
            }

            let session = Session::open(&source, config)?;
            let issues = session.load(&source, false).await?;
            match issue {
                Some(number) => {
                    let issue = issues
                        .iter()
                        .find(|i| i.number == number)
                        .with_context(|| format!("issue #{} not found in {}", number, session.repo))?;
                    print_json(&suggester.suggest_for_issue(issue))?;
                }
                None => {
                    let all: Vec<_> = issues
                        .iter()
                        .map(|i| (i.number, suggester.suggest_for_issue(i)))
                        .filter(|(_, tags)| !tags.is_empty())
                        .collect();
                    print_json(&all)?;
                }
            }
        }

        Command::Csm {
            source,
            title,
            body,
        } => {
            let session = Session::open(&source, config)?;
            let issues = session.load(&source, false).await?;
            print_json(&CsmAdvisor::default().advise(&title, &body, &issues)?)?;
        }

        Command::Tools { command } => match command {
            ToolsCommand::List => {
                let mut manifest = ToolManifest::default();
                register_tools(&mut manifest)?;
                print_json(&manifest.tools())?;
            }
            ToolsCommand::Call { name, args, source } => {
                let args: serde_json::Value =
                    serde_json::from_str(&args).context("--args must be a JSON object")?;
                let session = Session::open(&source, config)?;
                let dispatcher = ToolDispatcher::new(session.source, Some(session.repo.to_string()));
                print_json(&dispatcher.call(&name, args).await)?;
            }
        },
    }

    Ok(())
}

fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<Error>())
        .map_or(1, Error::exit_code)
}

fn init_tracing() -> anyhow::Result<()> {
    // Logs go to stderr so JSON on stdout stays clean.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("ghissues=info".parse()?)
                .add_directive("reqwest=warn".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = init_tracing() {
        eprintln!("failed to set up logging: {:#}", err);
        return ExitCode::FAILURE;
    }
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{:#}", err);
            ExitCode::from(exit_code(&err))
        }
    }
}
