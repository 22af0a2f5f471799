use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    git_quick::cli::sync::main().await
}
