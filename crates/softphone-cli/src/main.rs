use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use softphone_cli::demo::{print_report, run_demo};
use softphone_cli::logging::init_logging;
use softphone_cli::{CliConfig, HttpTokenSource, TokenSource};
use softphone_core::{HangUpPolicy, IncomingCallPolicy};
use tracing::{debug, error};

#[derive(Parser)]
#[command(name = "softphone")]
#[command(about = "Softphone call-session tools")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to <config dir>/softphone/config.toml)
    #[arg(long, global = true, env = "SOFTPHONE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset
    #[arg(long, global = true, env = "SOFTPHONE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch an access token from the token service
    Token {
        /// Token endpoint
        #[arg(long, env = "SOFTPHONE_TOKEN_URL")]
        url: Option<String>,
        /// Print the raw JSON payload
        #[arg(long)]
        json: bool,
    },
    /// Ask the service to place a test call to this softphone
    TestCall {
        /// Test call endpoint
        #[arg(long, env = "SOFTPHONE_TEST_CALL_URL")]
        url: Option<String>,
    },
    /// Run a scripted call session against the in-memory provider
    Demo {
        /// Second incoming call handling
        #[arg(long, value_enum)]
        incoming_policy: Option<IncomingPolicyArg>,
        /// Release the call as soon as the hang-up is sent
        #[arg(long)]
        optimistic_hang_up: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum IncomingPolicyArg {
    Reject,
    Queue,
    Replace,
}

impl From<IncomingPolicyArg> for IncomingCallPolicy {
    fn from(arg: IncomingPolicyArg) -> Self {
        match arg {
            IncomingPolicyArg::Reject => IncomingCallPolicy::Reject,
            IncomingPolicyArg::Queue => IncomingCallPolicy::Queue,
            IncomingPolicyArg::Replace => IncomingCallPolicy::Replace,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("{} {:#}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = CliConfig::load_or_default(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    init_logging(&config.log_level, cli.verbose)?;
    debug!(?config, "Configuration loaded");

    match cli.command {
        Commands::Token { url, json } => fetch_token(&config, url, json).await,
        Commands::TestCall { url } => test_call(&config, url).await,
        Commands::Demo {
            incoming_policy,
            optimistic_hang_up,
        } => {
            let mut coordinator = config.coordinator.clone();
            if let Some(policy) = incoming_policy {
                coordinator = coordinator.with_incoming_policy(policy.into());
            }
            if optimistic_hang_up {
                coordinator = coordinator.with_hang_up_policy(HangUpPolicy::Optimistic);
            }
            let report = run_demo(coordinator).await?;
            print_report(&report);
            Ok(())
        }
    }
}

async fn fetch_token(config: &CliConfig, url: Option<String>, json: bool) -> Result<()> {
    let url = url
        .or_else(|| config.token_url.clone())
        .context("No token URL: pass --url or set token_url in the config file")?;
    let source = HttpTokenSource::new(url, config.request_timeout())?;
    let token = source
        .fetch_token()
        .await
        .with_context(|| format!("Failed to fetch token from {}", source.token_url()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&token)?);
        return Ok(());
    }
    println!("{} {}", "User:".bold(), token.user_id);
    match token.expires_on {
        Some(expiry) => println!("{} {}", "Expires:".bold(), expiry.to_rfc3339()),
        None => println!("{} {}", "Expires:".bold(), "unknown".dimmed()),
    }
    println!("{} {}", "Token:".bold(), token.token);
    Ok(())
}

async fn test_call(config: &CliConfig, url: Option<String>) -> Result<()> {
    let url = url
        .or_else(|| config.test_call_url.clone())
        .context("No test call URL: pass --url or set test_call_url in the config file")?;
    let token_url = config.token_url.clone().unwrap_or_default();
    let source = HttpTokenSource::new(token_url, config.request_timeout())?.with_test_call_url(url);
    let reply = source
        .trigger_test_call()
        .await
        .context("Failed to request a test call")?;
    println!("{} {}", "✓".green(), reply.trim());
    Ok(())
}
