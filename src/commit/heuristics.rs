//! Path and diff based classification used when no AI provider answers.

use std::sync::OnceLock;

use regex::Regex;

use super::ConventionalType;
use crate::inspector::{ChangeKind, ChangeSet, FileChange};

/// Files listed in a generated body before collapsing the rest
const MAX_BODY_FILES: usize = 10;

/// Directories that say nothing a type prefix doesn't already say
const NOISE_SCOPES: &[&str] = &["src", "lib", "test", "tests", "doc", "docs"];

const BUILD_FILES: &[&str] = &[
    "Cargo.toml",
    "Cargo.lock",
    "package.json",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "go.mod",
    "go.sum",
    "requirements.txt",
    "pyproject.toml",
    "setup.py",
    "setup.cfg",
    "Pipfile",
    "Pipfile.lock",
    "Gemfile",
    "Gemfile.lock",
    "Makefile",
    "Dockerfile",
    "docker-compose.yml",
    "build.gradle",
    "pom.xml",
    ".gitignore",
    ".gitattributes",
    ".editorconfig",
];

fn fix_regex() -> Option<&'static Regex> {
    static FIX: OnceLock<Option<Regex>> = OnceLock::new();
    FIX.get_or_init(|| Regex::new(r"(?i)\b(fix(es|ed)?|bugs?|bugfix|crash(es)?|regression)\b").ok())
        .as_ref()
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

pub fn is_test_path(path: &str) -> bool {
    let lower = path.to_lowercase();
    let name = file_name(&lower);
    lower.split('/').any(|c| matches!(c, "test" | "tests" | "__tests__" | "spec" | "specs"))
        || name.starts_with("test_")
        || name.contains("_test.")
        || name.contains(".test.")
        || name.contains(".spec.")
        || name.contains("_spec.")
}

pub fn is_doc_path(path: &str) -> bool {
    let lower = path.to_lowercase();
    let name = file_name(&lower);
    lower.split('/').any(|c| matches!(c, "doc" | "docs"))
        || name.ends_with(".md")
        || name.ends_with(".rst")
        || name.ends_with(".adoc")
        || name.starts_with("readme")
        || name.starts_with("changelog")
        || name.starts_with("license")
}

pub fn is_build_path(path: &str) -> bool {
    let name = file_name(path);
    BUILD_FILES.contains(&name)
        || path.starts_with(".github/")
        || path.starts_with(".circleci/")
        || path.starts_with(".gitlab-ci")
        || name.ends_with(".toml")
        || name.ends_with(".ini")
}

/// Added lines of the diff, excluding file headers
fn added_lines(diff: &str) -> impl Iterator<Item = &str> {
    diff.lines()
        .filter(|l| l.starts_with('+') && !l.starts_with("+++"))
        .map(|l| &l[1..])
}

/// Pick a conventional type from paths, counts and added-line tokens
pub fn classify(changes: &ChangeSet) -> ConventionalType {
    let files = &changes.files;
    if files.is_empty() {
        return ConventionalType::Chore;
    }

    if files.iter().all(|f| is_test_path(&f.path)) {
        return ConventionalType::Test;
    }
    if files.iter().all(|f| is_doc_path(&f.path)) {
        return ConventionalType::Docs;
    }
    if files.iter().all(|f| is_build_path(&f.path)) {
        return ConventionalType::Chore;
    }

    if let Some(fix) = fix_regex() {
        if added_lines(&changes.diff).any(|l| fix.is_match(l)) {
            return ConventionalType::Fix;
        }
    }

    let insertions = changes.insertions();
    let deletions = changes.deletions();
    let has_added = files.iter().any(|f| f.kind == ChangeKind::Added);

    if has_added && insertions >= deletions {
        ConventionalType::Feat
    } else if deletions > insertions {
        ConventionalType::Refactor
    } else {
        ConventionalType::Chore
    }
}

/// Top-level directory shared by every file, if any
pub fn common_dir(changes: &ChangeSet) -> Option<&str> {
    let mut dirs = changes.files.iter().map(|f| f.path.split_once('/').map(|(dir, _)| dir));
    let first = dirs.next()??;
    if first.is_empty() {
        return None;
    }
    dirs.all(|d| d == Some(first)).then_some(first)
}

pub fn scope(changes: &ChangeSet, _ty: ConventionalType) -> Option<String> {
    common_dir(changes)
        .filter(|dir| !NOISE_SCOPES.contains(&dir.to_lowercase().as_str()))
        .map(str::to_string)
}

fn verb(file: &FileChange, ty: ConventionalType) -> &'static str {
    match file.kind {
        ChangeKind::Added => "add",
        ChangeKind::Deleted => "remove",
        ChangeKind::Renamed => "rename",
        ChangeKind::Modified => match ty {
            ConventionalType::Fix => "fix",
            ConventionalType::Refactor => "refactor",
            _ => "update",
        },
    }
}

/// Subject built from the file count and the common directory
pub fn template_subject(changes: &ChangeSet, ty: ConventionalType) -> String {
    match changes.files.as_slice() {
        [] => "update files".to_string(),
        [file] => {
            let target = if file.path.chars().count() <= 50 {
                file.path.as_str()
            } else {
                file_name(&file.path)
            };
            format!("{} {}", verb(file, ty), target)
        }
        files => {
            let verb = if files.iter().all(|f| f.kind == ChangeKind::Added) {
                "add"
            } else if files.iter().all(|f| f.kind == ChangeKind::Deleted) {
                "remove"
            } else {
                match ty {
                    ConventionalType::Fix => "fix",
                    ConventionalType::Refactor => "refactor",
                    _ => "update",
                }
            };
            match common_dir(changes) {
                Some(dir) => format!("{} {} files in {}", verb, files.len(), dir),
                None => format!("{} {} files", verb, files.len()),
            }
        }
    }
}

/// Body listing the changed files; `None` for single-file changes
pub fn template_body(changes: &ChangeSet) -> Option<String> {
    if changes.files.len() < 2 {
        return None;
    }

    let mut lines: Vec<String> = changes
        .files
        .iter()
        .take(MAX_BODY_FILES)
        .map(|f| {
            let mut line = format!("- {} {}", f.kind, f.path);
            if let Some(old) = &f.old_path {
                line.push_str(&format!(" (from {})", old));
            }
            if !f.hunk_summary.is_empty() {
                line.push_str(&format!(" [{}]", f.hunk_summary));
            }
            line
        })
        .collect();

    let hidden = changes.files.len().saturating_sub(MAX_BODY_FILES);
    if hidden > 0 {
        lines.push(format!("- and {} more", hidden));
    }

    Some(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(path: &str, kind: ChangeKind, ins: u32, del: u32) -> FileChange {
        FileChange::new(path, kind).with_stats(ins, del)
    }

    fn set(files: Vec<FileChange>, diff: &str) -> ChangeSet {
        ChangeSet::new(files, diff)
    }

    #[test]
    fn test_path_predicates() {
        assert!(is_test_path("tests/sync_all.rs"));
        assert!(is_test_path("src/parser_test.go"));
        assert!(is_test_path("web/app.spec.ts"));
        assert!(!is_test_path("src/latest.rs"));

        assert!(is_doc_path("README.md"));
        assert!(is_doc_path("docs/guide/intro.txt"));
        assert!(!is_doc_path("src/docstring.rs"));

        assert!(is_build_path("Cargo.toml"));
        assert!(is_build_path(".github/workflows/ci.yml"));
        assert!(!is_build_path("src/main.rs"));
    }

    #[test]
    fn test_classify_tests_docs_chore() {
        let tests = set(vec![change("tests/a.rs", ChangeKind::Added, 10, 0)], "");
        assert_eq!(classify(&tests), ConventionalType::Test);

        let docs = set(
            vec![
                change("README.md", ChangeKind::Modified, 3, 1),
                change("docs/usage.md", ChangeKind::Added, 30, 0),
            ],
            "",
        );
        assert_eq!(classify(&docs), ConventionalType::Docs);

        let build = set(
            vec![
                change("Cargo.toml", ChangeKind::Modified, 1, 1),
                change("Cargo.lock", ChangeKind::Modified, 40, 12),
            ],
            "",
        );
        assert_eq!(classify(&build), ConventionalType::Chore);
    }

    #[test]
    fn test_classify_fix_from_added_lines_only() {
        let fix = set(
            vec![change("src/parser.rs", ChangeKind::Modified, 2, 1)],
            "+++ b/src/parser.rs\n-    old()\n+    // guard against the crash on empty input\n",
        );
        assert_eq!(classify(&fix), ConventionalType::Fix);

        let removed_mention = set(
            vec![change("src/parser.rs", ChangeKind::Modified, 1, 1)],
            "-    // bug here\n+    ok()\n",
        );
        assert_ne!(classify(&removed_mention), ConventionalType::Fix);
    }

    #[test]
    fn test_classify_feat_refactor_default() {
        let feat = set(
            vec![
                change("src/sync.rs", ChangeKind::Added, 200, 0),
                change("src/lib.rs", ChangeKind::Modified, 1, 0),
            ],
            "+pub mod sync;\n",
        );
        assert_eq!(classify(&feat), ConventionalType::Feat);

        let refactor = set(
            vec![change("src/old.rs", ChangeKind::Modified, 5, 80)],
            "+fn simpler() {}\n",
        );
        assert_eq!(classify(&refactor), ConventionalType::Refactor);

        let chore = set(
            vec![change("src/main.rs", ChangeKind::Modified, 5, 5)],
            "+let y = 2;\n",
        );
        assert_eq!(classify(&chore), ConventionalType::Chore);
    }

    #[test]
    fn test_scope_is_shared_top_dir() {
        let web = set(
            vec![
                change("web/app.ts", ChangeKind::Modified, 1, 1),
                change("web/index.html", ChangeKind::Modified, 1, 1),
            ],
            "",
        );
        assert_eq!(scope(&web, ConventionalType::Chore).as_deref(), Some("web"));

        let mixed = set(
            vec![
                change("web/app.ts", ChangeKind::Modified, 1, 1),
                change("api/server.rs", ChangeKind::Modified, 1, 1),
            ],
            "",
        );
        assert_eq!(scope(&mixed, ConventionalType::Chore), None);

        let root_file = set(vec![change("main.rs", ChangeKind::Modified, 1, 1)], "");
        assert_eq!(scope(&root_file, ConventionalType::Chore), None);

        let src = set(vec![change("src/main.rs", ChangeKind::Modified, 1, 1)], "");
        assert_eq!(scope(&src, ConventionalType::Chore), None);
    }

    #[test]
    fn test_template_subject() {
        let single = set(vec![change("src/lock.rs", ChangeKind::Added, 50, 0)], "");
        assert_eq!(template_subject(&single, ConventionalType::Feat), "add src/lock.rs");

        let many = set(
            vec![
                change("src/a.rs", ChangeKind::Modified, 1, 1),
                change("src/b.rs", ChangeKind::Modified, 1, 1),
                change("src/c.rs", ChangeKind::Deleted, 0, 9),
            ],
            "",
        );
        assert_eq!(template_subject(&many, ConventionalType::Chore), "update 3 files in src");

        let spread = set(
            vec![
                change("a.rs", ChangeKind::Deleted, 0, 1),
                change("b/c.rs", ChangeKind::Deleted, 0, 1),
            ],
            "",
        );
        assert_eq!(template_subject(&spread, ConventionalType::Refactor), "remove 2 files");
    }

    #[test]
    fn test_template_body_caps_file_list() {
        let files = (0..13)
            .map(|i| change(&format!("src/f{}.rs", i), ChangeKind::Modified, 1, 0))
            .collect();
        let body = template_body(&set(files, "")).unwrap();
        let lines: Vec<&str> = body.lines().collect();

        assert_eq!(lines.len(), MAX_BODY_FILES + 1);
        assert_eq!(lines[0], "- modified src/f0.rs [+1 -0]");
        assert_eq!(lines[MAX_BODY_FILES], "- and 3 more");

        let single = set(vec![change("src/f.rs", ChangeKind::Modified, 1, 0)], "");
        assert!(template_body(&single).is_none());
    }
}
