//! HTTP Double - CLI Entry Point
//!
//! Validates rule files and dry-runs single requests against them.

use anyhow::{Context, Result};
use clap::Parser;
use http_double::{Dispatcher, DoubleConfig, Method, Request};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "http-double",
    about = "Programmable HTTP test double - validate rule files and dry-run requests",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "http-double.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print the sample configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// Request to dispatch, e.g. "GET /api/users?page=1"
    #[arg(short, long, value_name = "METHOD TARGET")]
    request: Option<String>,

    /// Request header as "Name: value" (repeatable)
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    headers: Vec<String>,

    /// Request body
    #[arg(short, long)]
    data: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Print sample config if requested
    if args.print_config {
        println!("{}", include_str!("../demos/default-config.yaml"));
        return Ok(());
    }

    // Load configuration
    let config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        DoubleConfig::from_file(&args.config)?
    } else if args.validate || args.request.is_some() {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration (no rules)");
        DoubleConfig::default()
    };

    // Validate only
    if args.validate {
        println!(
            "Configuration is valid ({} rules defined)",
            config.rules.len()
        );
        return Ok(());
    }

    let dispatcher = Dispatcher::from_config(config)?;

    let Some(line) = args.request else {
        println!(
            "{} rules loaded (initial state {}); pass --request to dispatch one",
            dispatcher.rules_len(),
            dispatcher.settings().initial_state
        );
        return Ok(());
    };

    // Dispatch one request; faults and body errors exit non-zero
    let request = build_request(&line, &args.headers, args.data)?;
    let response = dispatcher
        .dispatch(request)
        .with_context(|| format!("Request '{}' failed", line.trim()))?;

    println!("{}", response.status);
    for (name, value) in &response.headers {
        println!("{}: {}", name, value);
    }
    println!();
    println!("{}", response.text());

    Ok(())
}

fn build_request(line: &str, headers: &[String], data: Option<String>) -> Result<Request> {
    let (method, target) = line
        .trim()
        .split_once(char::is_whitespace)
        .context("request must look like \"METHOD /path\"")?;
    let method: Method = method.parse().map_err(anyhow::Error::msg)?;

    let mut request = Request::new(method, target.trim());
    for header in headers {
        let (name, value) = header
            .split_once(':')
            .with_context(|| format!("header '{}' must look like \"Name: value\"", header))?;
        request = request.header(name.trim(), value.trim());
    }
    if let Some(data) = data {
        request = request.body(data.into_bytes());
    }
    Ok(request)
}
