use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::analysis::text::token_set;
use crate::error::{Error, Result};
use crate::models::{Issue, IssueState};

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.7;
const DUPLICATE_THRESHOLD: f64 = 0.9;

/// Scores how alike two texts are, from 0 (nothing shared) to 1.
pub trait SimilarityScorer: Send + Sync {
    fn score(&self, query: &str, candidate: &str) -> f64;

    fn name(&self) -> &str;
}

/// Jaccard index of the two token sets.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenJaccard;

impl SimilarityScorer for TokenJaccard {
    fn score(&self, query: &str, candidate: &str) -> f64 {
        let query = token_set(query);
        let candidate = token_set(candidate);
        let union = query.union(&candidate).count();
        if union == 0 {
            return 0.0;
        }
        query.intersection(&candidate).count() as f64 / union as f64
    }

    fn name(&self) -> &str {
        "token-jaccard"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarMatch {
    pub number: u64,
    pub title: String,
    pub url: String,
    pub state: IssueState,
    pub score: f64,
}

impl SimilarMatch {
    fn new(issue: &Issue, score: f64) -> Self {
        Self {
            number: issue.number,
            title: issue.title.clone(),
            url: issue.url.clone(),
            state: issue.state,
            score,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupMember {
    pub number: u64,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarGroup {
    pub group_id: usize,
    pub issues: Vec<GroupMember>,
    /// Highest pairwise score inside the group.
    pub similarity_score: f64,
    pub recommendation: String,
}

pub fn validate_threshold(threshold: f64) -> Result<f64> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(Error::Config(format!(
            "similarity threshold must be between 0.0 and 1.0, got {}",
            threshold
        )))
    }
}

#[derive(Clone)]
pub struct SimilarityAdvisor {
    scorer: Arc<dyn SimilarityScorer>,
}

impl Default for SimilarityAdvisor {
    fn default() -> Self {
        Self::new(TokenJaccard)
    }
}

impl SimilarityAdvisor {
    pub fn new(scorer: impl SimilarityScorer + 'static) -> Self {
        Self {
            scorer: Arc::new(scorer),
        }
    }

    pub fn scorer_name(&self) -> &str {
        self.scorer.name()
    }

    /// Corpus issues scoring at least `threshold` against the query text,
    /// best first; equal scores are ordered by issue number.
    pub fn find_similar(
        &self,
        title: &str,
        body: &str,
        corpus: &[Issue],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<SimilarMatch>> {
        let threshold = validate_threshold(threshold)?;
        let query = join_text(title, body);

        let mut matches: Vec<SimilarMatch> = corpus
            .iter()
            .map(|issue| (issue, self.scorer.score(&query, &issue.text())))
            .filter(|(_, score)| *score > 0.0 && *score >= threshold)
            .map(|(issue, score)| SimilarMatch::new(issue, score))
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.number.cmp(&b.number))
        });
        matches.truncate(limit);
        Ok(matches)
    }

    /// Clusters issues connected by pairwise scores at or above `threshold`.
    pub fn detect_groups(&self, corpus: &[Issue], threshold: f64) -> Result<Vec<SimilarGroup>> {
        let threshold = validate_threshold(threshold)?;
        let texts: Vec<String> = corpus.iter().map(Issue::text).collect();

        let mut sets = DisjointSets::new(corpus.len());
        let mut best_score = vec![0.0f64; corpus.len()];
        for i in 0..corpus.len() {
            for j in (i + 1)..corpus.len() {
                let score = self.scorer.score(&texts[i], &texts[j]);
                if score > 0.0 && score >= threshold {
                    sets.union(i, j);
                    best_score[i] = best_score[i].max(score);
                    best_score[j] = best_score[j].max(score);
                }
            }
        }

        let mut clusters: HashMap<usize, Vec<usize>> = HashMap::new();
        for index in 0..corpus.len() {
            clusters.entry(sets.find(index)).or_default().push(index);
        }

        let mut members: Vec<Vec<usize>> = clusters
            .into_values()
            .filter(|members| members.len() > 1)
            .collect();
        members.iter_mut().for_each(|m| m.sort_by_key(|&i| corpus[i].number));
        members.sort_by_key(|m| corpus[m[0]].number);

        Ok(members
            .into_iter()
            .enumerate()
            .map(|(position, indices)| {
                let score = indices
                    .iter()
                    .map(|&i| best_score[i])
                    .fold(0.0, f64::max);
                SimilarGroup {
                    group_id: position + 1,
                    issues: indices
                        .iter()
                        .map(|&i| GroupMember {
                            number: corpus[i].number,
                            title: corpus[i].title.clone(),
                        })
                        .collect(),
                    similarity_score: score,
                    recommendation: recommendation(score).to_string(),
                }
            })
            .collect())
    }
}

fn join_text(title: &str, body: &str) -> String {
    if body.is_empty() {
        title.to_string()
    } else {
        format!("{}\n{}", title, body)
    }
}

fn recommendation(score: f64) -> &'static str {
    if score >= DUPLICATE_THRESHOLD {
        "Likely duplicates; close all but one and link them"
    } else {
        "Consider merging these issues"
    }
}

struct DisjointSets {
    parent: Vec<usize>,
}

impl DisjointSets {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, mut node: usize) -> usize {
        while self.parent[node] != node {
            self.parent[node] = self.parent[self.parent[node]];
            node = self.parent[node];
        }
        node
    }

    fn union(&mut self, a: usize, b: usize) {
        let (root_a, root_b) = (self.find(a), self.find(b));
        if root_a != root_b {
            self.parent[root_b.max(root_a)] = root_a.min(root_b);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::issue::fixtures::issue;

    fn corpus() -> Vec<Issue> {
        let mut crash = issue(1, "App crashes when saving large files", IssueState::Open);
        crash.body = "Saving a 2GB file makes the editor exit".into();
        let mut crash_again = issue(4, "App crashes when saving large files", IssueState::Closed);
        crash_again.body = "Saving a 2GB file makes the editor exit".into();
        let dark = issue(2, "Add dark mode", IssueState::Open);
        let docs = issue(3, "Document the CLI flags", IssueState::Open);
        vec![crash, dark, docs, crash_again]
    }

    #[test]
    fn test_identical_text_scores_one() {
        let scorer = TokenJaccard;
        assert_eq!(scorer.score("Dark mode please", "dark MODE please!"), 1.0);
        assert_eq!(scorer.score("", ""), 0.0);
        assert_eq!(scorer.score("alpha", "beta"), 0.0);
    }

    #[test]
    fn test_identical_query_is_top_match() {
        let advisor = SimilarityAdvisor::default();
        let matches = advisor
            .find_similar(
                "App crashes when saving large files",
                "Saving a 2GB file makes the editor exit",
                &corpus(),
                0.1,
                10,
            )
            .unwrap();

        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].number, 1);
        assert_eq!(matches[0].score, 1.0);
        assert_eq!(matches[1].number, 4);
    }

    #[test]
    fn test_threshold_excludes_and_validates() {
        let advisor = SimilarityAdvisor::default();
        let matches = advisor
            .find_similar("dark mode", "", &corpus(), 0.9, 10)
            .unwrap();
        assert!(matches.is_empty());

        assert!(advisor.find_similar("x", "", &corpus(), 1.5, 10).is_err());
        assert!(advisor.detect_groups(&corpus(), -0.1).is_err());
    }

    #[test]
    fn test_detect_groups() {
        let groups = SimilarityAdvisor::default()
            .detect_groups(&corpus(), DEFAULT_SIMILARITY_THRESHOLD)
            .unwrap();

        assert_eq!(groups.len(), 1);
        let numbers: Vec<_> = groups[0].issues.iter().map(|m| m.number).collect();
        assert_eq!(numbers, vec![1, 4]);
        assert_eq!(groups[0].group_id, 1);
        assert_eq!(groups[0].similarity_score, 1.0);
        assert!(groups[0].recommendation.starts_with("Likely duplicates"));
    }

    struct Constant(f64);

    impl SimilarityScorer for Constant {
        fn score(&self, _query: &str, _candidate: &str) -> f64 {
            self.0
        }

        fn name(&self) -> &str {
            "constant"
        }
    }

    #[test]
    fn test_pluggable_scorer_ties_by_number() {
        let advisor = SimilarityAdvisor::new(Constant(0.75));
        assert_eq!(advisor.scorer_name(), "constant");

        let matches = advisor.find_similar("q", "", &corpus(), 0.5, 3).unwrap();
        let numbers: Vec<_> = matches.iter().map(|m| m.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);

        let groups = advisor.detect_groups(&corpus(), 0.5).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].issues.len(), 4);
        assert_eq!(groups[0].recommendation, "Consider merging these issues");
    }
}
