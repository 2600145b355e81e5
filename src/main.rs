//! zentinel-rewrite CLI tool.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use zentinel_rewrite::{RequestContext, Result, RewriteEngine, TerminalAction};

#[derive(Parser)]
#[command(name = "zentinel-rewrite")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check if a ruleset parses and compiles correctly
    Check {
        /// Path to rules file
        #[arg(short, long)]
        rules: PathBuf,
    },

    /// Run one request through the rules and print the outcome
    Test {
        /// Path to rules file
        #[arg(short, long)]
        rules: PathBuf,

        /// Decoded request path
        #[arg(short, long)]
        path: String,

        /// Query string, without the leading '?'
        #[arg(short, long)]
        query: Option<String>,

        /// Request host name
        #[arg(long, default_value = "localhost")]
        host: String,

        /// Request method
        #[arg(short, long, default_value = "GET")]
        method: String,

        /// Request headers (format: "Name: Value")
        #[arg(short = 'H', long)]
        header: Vec<String>,

        /// Document root for -f/-d/-s condition tests
        #[arg(long)]
        document_root: Option<PathBuf>,

        /// Context path prepended to relative redirect targets
        #[arg(long)]
        context_path: Option<String>,
    },

    /// Print the compiled rules in directive form
    Dump {
        /// Path to rules file
        #[arg(short, long)]
        rules: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Check { rules } => check_rules(&rules),
        Commands::Test {
            rules,
            path,
            query,
            host,
            method,
            header,
            document_root,
            context_path,
        } => test_request(
            &rules,
            &path,
            query.as_deref(),
            &host,
            &method,
            &header,
            document_root,
            context_path,
        ),
        Commands::Dump { rules } => dump_rules(&rules),
    }
}

fn check_rules(path: &PathBuf) -> Result<()> {
    info!("Checking rules from {:?}", path);

    let engine = RewriteEngine::from_file(path)?;
    let ruleset = engine.ruleset();

    println!(
        "Successfully compiled {} rules and {} maps",
        ruleset.rule_count(),
        ruleset.map_count()
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn test_request(
    rules_path: &PathBuf,
    path: &str,
    query: Option<&str>,
    host: &str,
    method: &str,
    headers: &[String],
    document_root: Option<PathBuf>,
    context_path: Option<String>,
) -> Result<()> {
    info!("Testing request against rules from {:?}", rules_path);

    let mut engine = RewriteEngine::from_file(rules_path)?;
    if let Some(context_path) = context_path {
        engine.set_context_path(context_path);
    }

    let mut ctx = RequestContext::new(path);
    ctx.method = method.to_string();
    ctx.server_name = host.to_string();
    ctx.query_string = query.map(str::to_string);
    ctx.document_root = document_root;
    for header in headers {
        if let Some((name, value)) = header.split_once(':') {
            ctx = ctx.with_header(name.trim(), value.trim());
        }
    }

    let outcome = engine.rewrite(path, host, query, &ctx);

    match &outcome.terminal {
        Some(TerminalAction::Forbidden) => println!("FORBIDDEN (403)"),
        Some(TerminalAction::Gone) => println!("GONE (410)"),
        Some(TerminalAction::Redirect { target, status }) => {
            println!("REDIRECT ({status})");
            println!("  Location: {target}");
        }
        None if outcome.rewritten => {
            println!("REWRITTEN");
            println!("  Path: {}", outcome.path);
            if let Some(ref query) = outcome.query {
                println!("  Query: {query}");
            }
            if let Some(ref host) = outcome.host {
                println!("  Host: {host}");
            }
        }
        None => {
            println!("UNCHANGED");
            println!("  Path: {}", outcome.path);
        }
    }

    for cookie in &outcome.effects.cookies {
        println!("  Cookie: {}={}", cookie.name, cookie.value);
    }
    for (name, value) in &outcome.effects.attributes {
        println!("  Attribute: {name}={value}");
    }
    if let Some(ref content_type) = outcome.effects.content_type {
        println!("  Content-Type: {content_type}");
    }
    if outcome.effects.pipeline_skip {
        println!("  Pipeline: skip remaining handlers");
    }

    Ok(())
}

fn dump_rules(path: &PathBuf) -> Result<()> {
    info!("Dumping rules from {:?}", path);

    let engine = RewriteEngine::from_file(path)?;
    let ruleset = engine.ruleset();

    println!("Total rules: {}", ruleset.rule_count());
    for rule in ruleset.rules() {
        println!();
        println!("{rule}");
    }

    Ok(())
}
