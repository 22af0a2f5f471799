//! Commit message generation.
//!
//! A configured AI summarizer is consulted first; its reply is advisory and
//! always passes through the same local invariants (subject length, trailing
//! punctuation, conventional type enum). When no summarizer is configured, it
//! times out, fails or replies with something unusable, the heuristic path
//! produces a deterministic message from the change set alone.

pub mod emoji;
pub mod heuristics;

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::ai::{Summarizer, Summary};
use crate::config::{Config, EmojiStyle};
use crate::inspector::ChangeSet;

/// Longest subject we ever emit, in characters
pub const MAX_SUBJECT_CHARS: usize = 72;

/// Cap on the diff handed to a provider
const MAX_PROMPT_DIFF_CHARS: usize = 12_000;

/// The fixed conventional-commit vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConventionalType {
    Feat,
    Fix,
    Docs,
    Style,
    Refactor,
    Test,
    Chore,
    Perf,
}

impl ConventionalType {
    pub const ALL: [ConventionalType; 8] = [
        ConventionalType::Feat,
        ConventionalType::Fix,
        ConventionalType::Docs,
        ConventionalType::Style,
        ConventionalType::Refactor,
        ConventionalType::Test,
        ConventionalType::Chore,
        ConventionalType::Perf,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConventionalType::Feat => "feat",
            ConventionalType::Fix => "fix",
            ConventionalType::Docs => "docs",
            ConventionalType::Style => "style",
            ConventionalType::Refactor => "refactor",
            ConventionalType::Test => "test",
            ConventionalType::Chore => "chore",
            ConventionalType::Perf => "perf",
        }
    }
}

impl FromStr for ConventionalType {
    type Err = String;

    /// Accepts the canonical names plus the common long forms models like to
    /// produce ("feature", "bugfix", "tests", ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "feat" | "feature" => Ok(ConventionalType::Feat),
            "fix" | "bugfix" | "hotfix" => Ok(ConventionalType::Fix),
            "docs" | "doc" | "documentation" => Ok(ConventionalType::Docs),
            "style" => Ok(ConventionalType::Style),
            "refactor" | "refactoring" => Ok(ConventionalType::Refactor),
            "test" | "tests" => Ok(ConventionalType::Test),
            "chore" => Ok(ConventionalType::Chore),
            "perf" | "performance" => Ok(ConventionalType::Perf),
            other => Err(format!("unknown commit type '{}'", other)),
        }
    }
}

impl fmt::Display for ConventionalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commit type: one of the fixed enum, or a free-form type kept verbatim when
/// conventional commits are not enforced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CommitType {
    Conventional(ConventionalType),
    Other(String),
}

impl CommitType {
    pub fn as_str(&self) -> &str {
        match self {
            CommitType::Conventional(ty) => ty.as_str(),
            CommitType::Other(ty) => ty,
        }
    }

    pub fn conventional(&self) -> Option<ConventionalType> {
        match self {
            CommitType::Conventional(ty) => Some(*ty),
            CommitType::Other(_) => None,
        }
    }
}

impl fmt::Display for CommitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured commit message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitMessage {
    #[serde(rename = "type")]
    pub commit_type: CommitType,
    pub scope: Option<String>,
    /// Non-empty, at most 72 characters, no trailing punctuation
    pub subject: String,
    pub body: Option<String>,
    pub emoji: Option<String>,
    /// Whether the header carries the `type(scope):` prefix
    pub conventional: bool,
}

impl CommitMessage {
    /// First line of the commit
    pub fn header(&self) -> String {
        let mut header = String::new();
        if let Some(emoji) = &self.emoji {
            header.push_str(emoji);
            header.push(' ');
        }
        if self.conventional {
            header.push_str(self.commit_type.as_str());
            if let Some(scope) = &self.scope {
                header.push('(');
                header.push_str(scope);
                header.push(')');
            }
            header.push_str(": ");
        }
        header.push_str(&self.subject);
        header
    }
}

impl fmt::Display for CommitMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.header())?;
        if let Some(body) = &self.body {
            write!(f, "\n\n{}", body)?;
        }
        Ok(())
    }
}

/// Turns a change set into a commit message
pub struct CommitMessageGenerator {
    summarizer: Option<Box<dyn Summarizer>>,
    timeout: Duration,
}

impl CommitMessageGenerator {
    pub fn new(summarizer: Option<Box<dyn Summarizer>>, timeout: Duration) -> Self {
        Self {
            summarizer,
            timeout,
        }
    }

    /// Generator that never calls out to a provider
    pub fn heuristic() -> Self {
        Self::new(None, Duration::ZERO)
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(crate::ai::from_config(config), config.ai_timeout())
    }

    pub fn has_ai(&self) -> bool {
        self.summarizer.is_some()
    }

    /// Generate a message. Never fails: provider trouble degrades to the
    /// heuristic message.
    pub async fn generate(
        &self,
        changes: &ChangeSet,
        style: EmojiStyle,
        conventional: bool,
    ) -> CommitMessage {
        if let Some(summarizer) = &self.summarizer {
            let diff = truncate_chars(&changes.diff, MAX_PROMPT_DIFF_CHARS);
            match timeout(self.timeout, summarizer.summarize(&diff, &changes.files)).await {
                Ok(Ok(summary)) => match adopt_summary(summary, changes, style, conventional) {
                    Some(message) => {
                        debug!("Using {} commit message", summarizer.name());
                        return message;
                    }
                    None => info!(
                        "{} returned an unusable message, using heuristic message",
                        summarizer.name()
                    ),
                },
                Ok(Err(e)) => info!("{}, using heuristic message", e),
                Err(_) => info!(
                    "{} did not answer within {}s, using heuristic message",
                    summarizer.name(),
                    self.timeout.as_secs()
                ),
            }
        }

        Self::generate_heuristic(changes, style, conventional)
    }

    /// Deterministic message built from paths, counts and diff tokens only
    pub fn generate_heuristic(
        changes: &ChangeSet,
        style: EmojiStyle,
        conventional: bool,
    ) -> CommitMessage {
        let ty = heuristics::classify(changes);
        let subject = sanitize_subject(&heuristics::template_subject(changes, ty))
            .unwrap_or_else(|| "update files".to_string());

        let commit_type = CommitType::Conventional(ty);
        CommitMessage {
            emoji: emoji::for_style(style, &commit_type),
            commit_type,
            scope: heuristics::scope(changes, ty),
            subject,
            body: heuristics::template_body(changes),
            conventional,
        }
    }
}

/// Apply local invariants to a provider summary; `None` when it is unusable
fn adopt_summary(
    summary: Summary,
    changes: &ChangeSet,
    style: EmojiStyle,
    conventional: bool,
) -> Option<CommitMessage> {
    let header = parse_header(&summary.subject)?;
    let subject = sanitize_subject(&header.subject)?;

    let commit_type = match header.commit_type.as_deref().map(str::parse::<ConventionalType>) {
        Some(Ok(ty)) => CommitType::Conventional(ty),
        Some(Err(_)) if !conventional => {
            CommitType::Other(header.commit_type.unwrap_or_default().to_lowercase())
        }
        // Provider types outside the enum are not trusted when enforcing it
        _ => CommitType::Conventional(heuristics::classify(changes)),
    };

    let body = summary
        .body
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty());

    Some(CommitMessage {
        emoji: emoji::for_style(style, &commit_type),
        commit_type,
        scope: header.scope.filter(|s| !s.trim().is_empty()),
        subject,
        body,
        conventional,
    })
}

struct ParsedHeader {
    commit_type: Option<String>,
    scope: Option<String>,
    subject: String,
}

fn header_regex() -> Option<&'static Regex> {
    static HEADER: OnceLock<Option<Regex>> = OnceLock::new();
    HEADER
        .get_or_init(|| {
            Regex::new(r"^(?P<type>[A-Za-z]+)(?:\((?P<scope>[^)]*)\))?!?:\s*(?P<subject>.*)$").ok()
        })
        .as_ref()
}

/// Split `type(scope): subject`, tolerating a leading emoji or `:shortcode:`
fn parse_header(line: &str) -> Option<ParsedHeader> {
    let line = strip_leading_emoji(line.trim());
    if line.is_empty() {
        return None;
    }

    if let Some(caps) = header_regex().and_then(|re| re.captures(line)) {
        return Some(ParsedHeader {
            commit_type: caps.name("type").map(|m| m.as_str().to_string()),
            scope: caps.name("scope").map(|m| m.as_str().trim().to_string()),
            subject: caps.name("subject").map(|m| m.as_str().to_string())?,
        });
    }

    Some(ParsedHeader {
        commit_type: None,
        scope: None,
        subject: line.to_string(),
    })
}

/// Conventional type of an existing commit subject, if it has one
pub fn conventional_type_of(subject: &str) -> Option<ConventionalType> {
    parse_header(subject)?.commit_type?.parse().ok()
}

fn strip_leading_emoji(line: &str) -> &str {
    let mut rest = line;
    if let Some(after) = rest.strip_prefix(':') {
        if let Some(end) = after.find(':') {
            let code = &after[..end];
            if !code.is_empty() && code.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                rest = &after[end + 1..];
            }
        }
    }
    rest.trim_start_matches(|c: char| !c.is_ascii() && !c.is_alphanumeric())
        .trim_start()
}

/// Enforce the subject invariants: one line, collapsed whitespace, at most
/// 72 characters, no trailing punctuation, non-empty
pub fn sanitize_subject(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = strip_wrapping_quotes(line);
    let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut subject = if collapsed.chars().count() > MAX_SUBJECT_CHARS {
        let cut: String = collapsed.chars().take(MAX_SUBJECT_CHARS).collect();
        // Prefer a word boundary when one is reasonably close
        match cut.rfind(' ') {
            Some(pos) if cut[..pos].chars().count() >= MAX_SUBJECT_CHARS / 2 => cut[..pos].to_string(),
            _ => cut,
        }
    } else {
        collapsed
    };

    while let Some(last) = subject.chars().last() {
        let strip = match opener_for(last) {
            // Closers stay only when they close something
            Some(open) => !is_balanced(&subject, open, last),
            None => last.is_whitespace() || is_punctuation(last),
        };
        if !strip {
            break;
        }
        subject.pop();
    }

    if subject.is_empty() {
        None
    } else {
        Some(subject)
    }
}

/// Drop quotes that wrap the whole line, and a lone leading quote
fn strip_wrapping_quotes(mut line: &str) -> &str {
    loop {
        let Some(first) = line.chars().next() else {
            return line;
        };
        if !matches!(first, '"' | '\'' | '`' | '“' | '‘') {
            return line;
        }
        let close = match first {
            '“' => '”',
            '‘' => '’',
            other => other,
        };
        let inner = &line[first.len_utf8()..];
        if let Some(stripped) = inner.strip_suffix(close) {
            line = stripped.trim();
        } else if !inner.contains(close) {
            line = inner.trim();
        } else {
            return line;
        }
    }
}

fn opener_for(close: char) -> Option<char> {
    Some(match close {
        ')' => '(',
        ']' => '[',
        '}' => '{',
        '"' => '"',
        '\'' => '\'',
        '`' => '`',
        '”' => '“',
        '’' => '‘',
        '»' => '«',
        '）' => '（',
        '」' => '「',
        '』' => '『',
        '】' => '【',
        _ => return None,
    })
}

fn is_balanced(text: &str, open: char, close: char) -> bool {
    if open == close {
        text.matches(close).count() % 2 == 0
    } else {
        text.matches(open).count() >= text.matches(close).count()
    }
}

fn is_punctuation(c: char) -> bool {
    if c.is_ascii() {
        return c.is_ascii_punctuation();
    }
    static UNICODE_PUNCT: OnceLock<Option<Regex>> = OnceLock::new();
    let mut buf = [0u8; 4];
    UNICODE_PUNCT
        .get_or_init(|| Regex::new(r"^\p{P}$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(c.encode_utf8(&mut buf)))
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}\n[diff truncated]", &text[..idx]),
        None => text.to_string(),
    }
}
