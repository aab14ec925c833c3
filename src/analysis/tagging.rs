use serde::{Deserialize, Serialize};

use crate::analysis::text::words;
use crate::models::Issue;

pub const DEFAULT_MAX_TAGS: usize = 3;

/// A tag and the phrases that suggest it. A trailing `*` on a pattern's last
/// word matches any word with that prefix (`crash*` matches `crashes`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TagRule {
    pub tag: String,
    pub patterns: Vec<String>,
}

impl TagRule {
    pub fn new(tag: &str, patterns: &[&str]) -> Self {
        Self {
            tag: tag.to_string(),
            patterns: patterns.iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    fn hits(&self, text: &[String]) -> usize {
        self.patterns
            .iter()
            .map(|pattern| count_phrase(pattern, text))
            .sum()
    }
}

fn count_phrase(pattern: &str, text: &[String]) -> usize {
    let phrase: Vec<&str> = pattern.split_whitespace().collect();
    if phrase.is_empty() || phrase.len() > text.len() {
        return 0;
    }
    text.windows(phrase.len())
        .filter(|window| {
            window
                .iter()
                .zip(&phrase)
                .all(|(word, expected)| match expected.strip_suffix('*') {
                    Some(prefix) => word.starts_with(prefix),
                    None => word == expected,
                })
        })
        .count()
}

/// The fixed vocabulary, in tie-break order.
pub fn default_rules() -> Vec<TagRule> {
    vec![
        TagRule::new(
            "bug",
            &["bug*", "crash*", "error*", "fail*", "broken", "exception*", "regression", "not working", "stack trace"],
        ),
        TagRule::new(
            "enhancement",
            &["feature*", "enhancement*", "add support", "would be nice", "improve*", "suggestion*", "allow"],
        ),
        TagRule::new(
            "documentation",
            &["doc", "docs", "document*", "readme", "typo*", "guide", "tutorial*"],
        ),
        TagRule::new(
            "question",
            &["question*", "how do", "how to", "how can", "is it possible", "clarif*", "help"],
        ),
        TagRule::new(
            "performance",
            &["slow*", "performance", "latency", "memory", "cpu", "timeout*", "speed*"],
        ),
        TagRule::new(
            "security",
            &["security", "vulnerab*", "cve", "xss", "injection", "permission*", "credential*"],
        ),
        TagRule::new(
            "ui",
            &["ui", "button*", "layout*", "css", "display*", "screen*", "dark mode", "icon*"],
        ),
        TagRule::new(
            "installation",
            &["install*", "setup", "set up", "dependenc*", "pip", "upgrad*"],
        ),
        TagRule::new(
            "api",
            &["api", "apis", "endpoint*", "graphql", "rest api", "webhook*", "status code"],
        ),
        TagRule::new(
            "data",
            &["data", "database*", "csv", "export*", "import*", "migration*", "sql"],
        ),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TagSuggestion {
    pub tag: String,
    pub hits: usize,
}

#[derive(Debug, Clone)]
pub struct TagSuggester {
    rules: Vec<TagRule>,
    max_tags: usize,
}

impl Default for TagSuggester {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl TagSuggester {
    pub fn new(rules: Vec<TagRule>) -> Self {
        Self {
            rules,
            max_tags: DEFAULT_MAX_TAGS,
        }
    }

    pub fn with_max_tags(mut self, max_tags: usize) -> Self {
        self.max_tags = max_tags;
        self
    }

    pub fn vocabulary(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.tag.as_str()).collect()
    }

    /// Tags whose patterns occur in the text, most hits first. Equal hit
    /// counts keep vocabulary order.
    pub fn suggest(&self, title: &str, body: &str) -> Vec<TagSuggestion> {
        let mut suggestions = self.ranked(title, body);
        suggestions.truncate(self.max_tags);
        suggestions
    }

    /// As [`suggest`](Self::suggest), leaving out labels the issue already has.
    pub fn suggest_for_issue(&self, issue: &Issue) -> Vec<TagSuggestion> {
        let mut suggestions: Vec<_> = self
            .ranked(&issue.title, &issue.body)
            .into_iter()
            .filter(|s| !issue.has_label(&s.tag))
            .collect();
        suggestions.truncate(self.max_tags);
        suggestions
    }

    fn ranked(&self, title: &str, body: &str) -> Vec<TagSuggestion> {
        let mut text = words(title);
        text.extend(words(body));

        let mut suggestions: Vec<TagSuggestion> = self
            .rules
            .iter()
            .map(|rule| TagSuggestion {
                tag: rule.tag.clone(),
                hits: rule.hits(&text),
            })
            .filter(|s| s.hits > 0)
            .collect();
        // Stable sort keeps vocabulary order among equal counts.
        suggestions.sort_by(|a, b| b.hits.cmp(&a.hits));
        suggestions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::issue::fixtures::issue;
    use crate::models::IssueState;

    fn tags(suggestions: &[TagSuggestion]) -> Vec<&str> {
        suggestions.iter().map(|s| s.tag.as_str()).collect()
    }

    #[test]
    fn test_phrase_and_prefix_matching() {
        let text = words("The app crashed. How to restart after crashes?");
        assert_eq!(count_phrase("crash*", &text), 2);
        assert_eq!(count_phrase("how to", &text), 1);
        assert_eq!(count_phrase("rest api", &text), 0);
        assert_eq!(count_phrase("crash", &text), 0);
    }

    #[test]
    fn test_ranked_by_hits() {
        let suggester = TagSuggester::default();
        let suggestions = suggester.suggest(
            "Export to CSV fails",
            "The CSV export throws an error for large data sets",
        );
        assert_eq!(tags(&suggestions), vec!["data", "bug"]);
        assert_eq!(suggestions[0].hits, 5);
        assert_eq!(suggestions[1].hits, 2);
    }

    #[test]
    fn test_ties_follow_vocabulary_order() {
        let suggester = TagSuggester::default();
        let suggestions = suggester.suggest("Slow dark mode", "docs crash");
        assert_eq!(
            tags(&suggestions),
            vec!["bug", "documentation", "performance"]
        );

        let all = suggester.with_max_tags(10).suggest("Slow dark mode", "docs crash");
        assert_eq!(
            tags(&all),
            vec!["bug", "documentation", "performance", "ui"]
        );
    }

    #[test]
    fn test_existing_labels_excluded() {
        let mut candidate = issue(1, "Crash on install", IssueState::Open);
        candidate.labels = vec!["Bug".into()];
        let suggestions = TagSuggester::default().suggest_for_issue(&candidate);
        assert_eq!(tags(&suggestions), vec!["installation"]);
    }

    #[test]
    fn test_no_match_is_empty() {
        assert!(TagSuggester::default().suggest("Hello", "world").is_empty());
        assert_eq!(TagSuggester::default().vocabulary()[0], "bug");
    }
}
