use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    git_quick::cli::time::main().await
}
