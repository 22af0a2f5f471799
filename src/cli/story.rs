//! `git-story`: summarize commit history as markdown.

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, ValueEnum};

use super::GlobalArgs;
use crate::config::GroupBy;
use crate::story::StoryBuilder;

#[derive(Parser, Debug)]
#[command(name = "git-story")]
#[command(about = "Summarize commit history as a markdown story")]
#[command(version)]
pub struct Cli {
    /// Revision range such as `v1.0..HEAD`, or `last-release`
    range: Option<String>,

    /// Maximum number of commits to include
    #[arg(long)]
    max: Option<usize>,

    /// How commits are grouped
    #[arg(long, value_enum)]
    group_by: Option<GroupByArg>,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum GroupByArg {
    Date,
    Author,
    None,
}

impl From<GroupByArg> for GroupBy {
    fn from(arg: GroupByArg) -> Self {
        match arg {
            GroupByArg::Date => GroupBy::Date,
            GroupByArg::Author => GroupBy::Author,
            GroupByArg::None => GroupBy::None,
        }
    }
}

pub async fn main() -> ExitCode {
    let cli = Cli::parse();
    super::finish(run(cli).await)
}

pub async fn run(cli: Cli) -> Result<ExitCode> {
    let config = cli.global.setup()?;
    let inspector = super::open_repository(&config).await?;

    let mut builder = StoryBuilder::new(&inspector, &config);
    if let Some(max) = cli.max {
        builder = builder.max_commits(max);
    }
    if let Some(group_by) = cli.group_by {
        builder = builder.group_by(group_by.into());
    }

    let story = builder.build(cli.range.as_deref()).await?;
    print!("{}", story.to_markdown());

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_range_and_grouping() {
        let cli = Cli::try_parse_from(["git-story", "v1.0..HEAD", "--max", "10", "--group-by", "author"])
            .unwrap();
        assert_eq!(cli.range.as_deref(), Some("v1.0..HEAD"));
        assert_eq!(cli.max, Some(10));
        assert_eq!(cli.group_by.map(GroupBy::from), Some(GroupBy::Author));
    }

    #[test]
    fn test_rejects_unknown_grouping() {
        assert!(Cli::try_parse_from(["git-story", "--group-by", "weekday"]).is_err());
    }
}
