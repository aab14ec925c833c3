pub mod advisor;
pub mod aggregator;
pub mod pipeline;
pub mod similarity;
pub mod tagging;
pub mod text;

pub use advisor::{CsmAdvisor, CsmGuidance, CsmStatus};
pub use aggregator::{
    group_counts, metrics, summarize, window_counts, GroupKey, IssueMetrics, IssueSummary,
    SummaryOptions, WindowCounts,
};
pub use pipeline::{
    ExportOutcome, IssueBatch, IssuePipeline, IssueQuery, IssueSource, StaticSource,
};
pub use similarity::{
    SimilarGroup, SimilarMatch, SimilarityAdvisor, SimilarityScorer, TokenJaccard,
};
pub use tagging::{TagRule, TagSuggester, TagSuggestion};
