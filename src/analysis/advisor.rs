use serde::{Deserialize, Serialize};

use crate::analysis::similarity::{validate_threshold, SimilarMatch, SimilarityAdvisor};
use crate::analysis::tagging::TagSuggester;
use crate::analysis::text::words;
use crate::error::Result;
use crate::models::{Issue, IssueState};

pub const DEFAULT_CSM_THRESHOLD: f64 = 0.3;
const DEFAULT_CSM_LIMIT: usize = 5;
/// Reports shorter than this rarely carry enough detail to act on.
const MIN_DESCRIPTION_WORDS: usize = 20;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CsmStatus {
    New,
    KnownOpen,
    KnownResolved,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CsmGuidance {
    pub similar_issues: Vec<SimilarMatch>,
    pub status: CsmStatus,
    pub recommended_tags: Vec<String>,
    pub next_steps: Vec<String>,
}

/// Triage guidance for an incoming customer report.
#[derive(Clone)]
pub struct CsmAdvisor {
    similarity: SimilarityAdvisor,
    tags: TagSuggester,
    threshold: f64,
    limit: usize,
}

impl Default for CsmAdvisor {
    fn default() -> Self {
        Self::new(SimilarityAdvisor::default(), TagSuggester::default())
    }
}

impl CsmAdvisor {
    pub fn new(similarity: SimilarityAdvisor, tags: TagSuggester) -> Self {
        Self {
            similarity,
            tags,
            threshold: DEFAULT_CSM_THRESHOLD,
            limit: DEFAULT_CSM_LIMIT,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Result<Self> {
        self.threshold = validate_threshold(threshold)?;
        Ok(self)
    }

    pub fn advise(&self, title: &str, body: &str, corpus: &[Issue]) -> Result<CsmGuidance> {
        let similar_issues =
            self.similarity
                .find_similar(title, body, corpus, self.threshold, self.limit)?;

        let status = match similar_issues.first() {
            None => CsmStatus::New,
            Some(top) if top.state == IssueState::Open => CsmStatus::KnownOpen,
            Some(_) => CsmStatus::KnownResolved,
        };

        let recommended_tags: Vec<String> = self
            .tags
            .suggest(title, body)
            .into_iter()
            .map(|s| s.tag)
            .collect();

        let next_steps = next_steps(status, similar_issues.first(), &recommended_tags, body);

        tracing::debug!(
            "CSM guidance: {:?} with {} similar issues",
            status,
            similar_issues.len()
        );

        Ok(CsmGuidance {
            similar_issues,
            status,
            recommended_tags,
            next_steps,
        })
    }
}

fn next_steps(
    status: CsmStatus,
    top: Option<&SimilarMatch>,
    tags: &[String],
    body: &str,
) -> Vec<String> {
    let mut steps = Vec::new();

    match (status, top) {
        (CsmStatus::KnownOpen, Some(top)) => {
            steps.push(format!("Link the report to #{} and add the customer impact", top.number));
            steps.push("Follow up with the assignee on the timeline".to_string());
        }
        (CsmStatus::KnownResolved, Some(top)) => {
            steps.push(format!("Check whether the fix for #{} covers this report", top.number));
            steps.push(format!("Reopen #{} if the problem persists", top.number));
        }
        _ => {
            steps.push("Create a new issue".to_string());
            steps.push("Assign to PM for triage".to_string());
        }
    }

    if words(body).len() < MIN_DESCRIPTION_WORDS {
        steps.push("Request more information".to_string());
    }
    if tags.iter().any(|t| t == "bug") {
        steps.push("Ask for reproduction steps and version details".to_string());
    }
    if tags.iter().any(|t| t == "security") {
        steps.push("Escalate to the security team".to_string());
    }

    steps
}
