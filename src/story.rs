//! Commit-history summaries rendered as markdown.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::Serialize;
use tracing::debug;

use crate::commit::conventional_type_of;
use crate::config::{Config, GroupBy};
use crate::error::Result;
use crate::git::short_sha;
use crate::inspector::{CommitSummary, RepositoryInspector};

/// Range keyword meaning "since the most recent tag"
pub const LAST_RELEASE: &str = "last-release";

#[derive(Debug, Clone, Serialize)]
pub struct Story {
    /// Human readable description of the range
    pub range_label: String,
    /// Newest first
    pub commits: Vec<CommitSummary>,
    pub group_by: GroupBy,
    /// Commits per conventional type; untyped commits count as `other`
    pub type_counts: BTreeMap<String, usize>,
}

impl Story {
    pub fn new(range_label: impl Into<String>, commits: Vec<CommitSummary>, group_by: GroupBy) -> Self {
        let mut type_counts = BTreeMap::new();
        for commit in &commits {
            let ty = conventional_type_of(&commit.subject)
                .map(|t| t.as_str())
                .unwrap_or("other");
            *type_counts.entry(ty.to_string()).or_insert(0) += 1;
        }

        Self {
            range_label: range_label.into(),
            commits,
            group_by,
            type_counts,
        }
    }

    pub fn authors(&self) -> Vec<&str> {
        let mut authors: Vec<&str> = self.commits.iter().map(|c| c.author.as_str()).collect();
        authors.sort_unstable();
        authors.dedup();
        authors
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Story: {}", self.range_label);
        out.push('\n');

        if self.commits.is_empty() {
            out.push_str("No commits in this range.\n");
            return out;
        }

        let newest = self.commits.first().map(|c| c.date.format("%Y-%m-%d").to_string());
        let oldest = self.commits.last().map(|c| c.date.format("%Y-%m-%d").to_string());
        let authors = self.authors();
        let _ = writeln!(
            out,
            "{} commit{} by {} author{} between {} and {}.",
            self.commits.len(),
            plural(self.commits.len()),
            authors.len(),
            plural(authors.len()),
            oldest.unwrap_or_default(),
            newest.unwrap_or_default()
        );
        out.push('\n');

        let counts: Vec<String> = self
            .type_counts
            .iter()
            .map(|(ty, n)| format!("{} {}", ty, n))
            .collect();
        let _ = writeln!(out, "**By type:** {}", counts.join(", "));

        for (heading, commits) in self.groups() {
            out.push('\n');
            let _ = writeln!(out, "## {}", heading);
            out.push('\n');
            for commit in commits {
                match self.group_by {
                    GroupBy::Author => {
                        let _ = writeln!(
                            out,
                            "- `{}` {} ({})",
                            short_sha(&commit.sha),
                            commit.subject,
                            commit.date.format("%Y-%m-%d")
                        );
                    }
                    _ => {
                        let _ = writeln!(
                            out,
                            "- `{}` {} ({})",
                            short_sha(&commit.sha),
                            commit.subject,
                            commit.author
                        );
                    }
                }
            }
        }

        out
    }

    /// Commits split into headed sections, preserving newest-first order
    /// within each section
    fn groups(&self) -> Vec<(String, Vec<&CommitSummary>)> {
        let mut groups: Vec<(String, Vec<&CommitSummary>)> = Vec::new();

        match self.group_by {
            GroupBy::None => groups.push(("Commits".to_string(), self.commits.iter().collect())),
            GroupBy::Date => {
                for commit in &self.commits {
                    let day = commit.date.format("%Y-%m-%d").to_string();
                    match groups.last_mut() {
                        Some((heading, list)) if *heading == day => list.push(commit),
                        _ => groups.push((day, vec![commit])),
                    }
                }
            }
            GroupBy::Author => {
                for commit in &self.commits {
                    match groups.iter_mut().find(|(author, _)| *author == commit.author) {
                        Some((_, list)) => list.push(commit),
                        None => groups.push((commit.author.clone(), vec![commit])),
                    }
                }
                // Most active first, ties by name
                groups.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(&b.0)));
            }
        }

        groups
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

pub struct StoryBuilder<'a> {
    inspector: &'a RepositoryInspector,
    default_range: String,
    max_commits: usize,
    group_by: GroupBy,
}

impl<'a> StoryBuilder<'a> {
    pub fn new(inspector: &'a RepositoryInspector, config: &Config) -> Self {
        Self {
            inspector,
            default_range: config.story.default_range.clone(),
            max_commits: config.story.max_commits,
            group_by: config.story.group_by,
        }
    }

    pub fn max_commits(mut self, max: usize) -> Self {
        self.max_commits = max;
        self
    }

    pub fn group_by(mut self, group_by: GroupBy) -> Self {
        self.group_by = group_by;
        self
    }

    /// Collect the story for `range`, or the configured default range
    pub async fn build(&self, range: Option<&str>) -> Result<Story> {
        let (rev_range, label) = self.resolve_range(range).await?;
        debug!("Building story for {:?}", rev_range);

        let commits = self
            .inspector
            .log(rev_range.as_deref(), self.max_commits)
            .await?;

        Ok(Story::new(label, commits, self.group_by))
    }

    /// Turn `last-release` into `<tag>..HEAD`, falling back to the whole
    /// history when there are no tags
    async fn resolve_range(&self, explicit: Option<&str>) -> Result<(Option<String>, String)> {
        let range = explicit.unwrap_or(&self.default_range);
        if range != LAST_RELEASE {
            return Ok((Some(range.to_string()), range.to_string()));
        }

        match self.inspector.latest_tag().await? {
            Some(tag) => Ok((Some(format!("{}..HEAD", tag)), format!("since {}", tag))),
            None => Ok((None, "all history".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn commit(sha: &str, author: &str, date: &str, subject: &str) -> CommitSummary {
        CommitSummary {
            sha: sha.to_string(),
            author: author.to_string(),
            date: DateTime::parse_from_rfc3339(date).unwrap(),
            subject: subject.to_string(),
        }
    }

    fn sample() -> Vec<CommitSummary> {
        vec![
            commit("aaaaaaaaaaaa", "Ada", "2025-03-02T10:00:00+00:00", "feat: add sync report"),
            commit("bbbbbbbbbbbb", "Lin", "2025-03-02T09:00:00+00:00", "fix(sync): restore head"),
            commit("cccccccccccc", "Ada", "2025-03-01T18:00:00+00:00", "Tweak readme"),
        ]
    }

    #[test]
    fn test_type_counts() {
        let story = Story::new("since v1.0.0", sample(), GroupBy::Date);
        assert_eq!(story.type_counts.get("feat"), Some(&1));
        assert_eq!(story.type_counts.get("fix"), Some(&1));
        assert_eq!(story.type_counts.get("other"), Some(&1));
        assert_eq!(story.authors(), vec!["Ada", "Lin"]);
    }

    #[test]
    fn test_markdown_grouped_by_date() {
        let markdown = Story::new("since v1.0.0", sample(), GroupBy::Date).to_markdown();

        assert!(markdown.starts_with("# Story: since v1.0.0\n"));
        assert!(markdown.contains("3 commits by 2 authors between 2025-03-01 and 2025-03-02."));
        assert!(markdown.contains("**By type:** feat 1, fix 1, other 1"));

        let day2 = markdown.find("## 2025-03-02").unwrap();
        let day1 = markdown.find("## 2025-03-01").unwrap();
        assert!(day2 < day1);
        assert!(markdown.contains("- `aaaaaaa` feat: add sync report (Ada)"));
    }

    #[test]
    fn test_markdown_grouped_by_author() {
        let markdown = Story::new("all history", sample(), GroupBy::Author).to_markdown();
        let ada = markdown.find("## Ada").unwrap();
        let lin = markdown.find("## Lin").unwrap();
        assert!(ada < lin);
        assert!(markdown.contains("- `ccccccc` Tweak readme (2025-03-01)"));
    }

    #[test]
    fn test_markdown_flat() {
        let markdown = Story::new("all history", sample(), GroupBy::None).to_markdown();
        assert_eq!(markdown.matches("## ").count(), 1);
        assert!(markdown.contains("## Commits"));
    }

    #[test]
    fn test_empty_story() {
        let markdown = Story::new("all history", Vec::new(), GroupBy::Date).to_markdown();
        assert!(markdown.contains("No commits in this range."));
    }
}
