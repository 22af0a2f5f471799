use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    git_quick::cli::story::main().await
}
