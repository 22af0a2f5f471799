use crate::config::EmojiStyle;

use super::{CommitType, ConventionalType};

/// Used for types outside the conventional set
pub const NEUTRAL: &str = "🔨";

pub fn gitmoji(ty: ConventionalType) -> &'static str {
    match ty {
        ConventionalType::Feat => "✨",
        ConventionalType::Fix => "🐛",
        ConventionalType::Docs => "📝",
        ConventionalType::Style => "💄",
        ConventionalType::Refactor => "♻️",
        ConventionalType::Test => "✅",
        ConventionalType::Chore => "🔧",
        ConventionalType::Perf => "⚡️",
    }
}

pub fn for_style(style: EmojiStyle, ty: &CommitType) -> Option<String> {
    match style {
        EmojiStyle::None => None,
        EmojiStyle::Gitmoji => Some(
            ty.conventional()
                .map(gitmoji)
                .unwrap_or(NEUTRAL)
                .to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_type_has_distinct_emoji() {
        let mut seen = std::collections::HashSet::new();
        for ty in ConventionalType::ALL {
            assert!(seen.insert(gitmoji(ty)), "duplicate emoji for {}", ty);
        }
        assert!(!seen.contains(NEUTRAL));
    }

    #[test]
    fn test_style_none_suppresses_emoji() {
        let ty = CommitType::Conventional(ConventionalType::Feat);
        assert_eq!(for_style(EmojiStyle::None, &ty), None);
        assert_eq!(for_style(EmojiStyle::Gitmoji, &ty).as_deref(), Some("✨"));
    }

    #[test]
    fn test_unknown_type_gets_neutral_emoji() {
        let ty = CommitType::Other("wip".to_string());
        assert_eq!(for_style(EmojiStyle::Gitmoji, &ty).as_deref(), Some(NEUTRAL));
    }
}
