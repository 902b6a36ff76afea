//! Runs context-window optimisations from JSON requests.
//!
//! Reads one or more `{session_id, messages, requirement}` objects from a file
//! or stdin and prints one `{result, stats}` object per request.

use anyhow::{Context, Result};
use clap::Parser;
use context_window::{
    config::{Config, DEFAULT_CONFIG_PATH},
    logging, BudgetRequirement, CandidateMessage, ContextWindowManager,
};
use serde::Deserialize;
use std::io::Read;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "context-window")]
#[command(about = "Fit scored conversation history into a token budget", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file; environment variables prefixed CONTEXT_WINDOW__ override it
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Request file; stdin when omitted
    request: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct Request {
    session_id: String,
    #[serde(default)]
    messages: Vec<CandidateMessage>,
    requirement: BudgetRequirement,
}

fn read_input(path: Option<&PathBuf>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read requests from {}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read requests from stdin")?;
            Ok(buf)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::from_file(&cli.config).context("failed to load configuration")?;
    logging::init(&config.logging)?;

    let manager = ContextWindowManager::from_config(&config)?;
    let sweeper = manager.spawn_sweeper();

    let raw = read_input(cli.request.as_ref())?;
    for request in serde_json::Deserializer::from_str(&raw).into_iter::<Request>() {
        let request = request.context("request is not valid JSON")?;

        info!(
            "Managing {} candidate(s) for session {} (target {} tokens)",
            request.messages.len(),
            request.session_id,
            request.requirement.target_tokens
        );

        let result = manager.manage(&request.session_id, request.messages, &request.requirement);
        let output = serde_json::json!({
            "result": result,
            "stats": manager.stats(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    }

    sweeper.abort();
    Ok(())
}
