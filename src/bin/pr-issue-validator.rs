use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use herald::ci::{github::DEFAULT_API_URL, validate_pull_request, GitHubClient, RepoRef};

#[derive(Parser, Debug)]
#[command(name = "pr-issue-validator")]
#[command(about = "Verify that a pull request links an existing issue", long_about = None)]
struct Cli {
    /// Repository as owner/name
    #[arg(long, env = "GITHUB_REPOSITORY")]
    repo: RepoRef,

    /// Pull request number
    #[arg(long, env = "PR_NUMBER")]
    pr: u64,

    #[arg(long, env = "PR_TITLE", default_value = "")]
    title: String,

    #[arg(long, env = "PR_BODY", default_value = "")]
    body: String,

    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: String,

    #[arg(long, env = "GITHUB_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let client = GitHubClient::new(cli.api_url, cli.token);
    let outcome = validate_pull_request(&client, &cli.repo, cli.pr, &cli.title, &cli.body).await?;

    tracing::info!(repo = %cli.repo, pr = cli.pr, ?outcome, "PR issue validation finished");
    std::process::exit(outcome.exit_code());
}
