use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use forum_qa_mcp::cache::SqliteCache;
use forum_qa_mcp::config::Config;
use forum_qa_mcp::docs::DocsConnector;
use forum_qa_mcp::index::Indexer;
use forum_qa_mcp::mcp::McpServer;
use forum_qa_mcp::mcp::handlers::RequestHandler;
use forum_qa_mcp::slack::SlackClient;

#[derive(Parser)]
#[command(name = "forum-qa-mcp")]
#[command(about = "Answer questions from Slack forum channels over MCP", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (TOML, YAML or JSON)
    #[arg(long, env = "FORUM_QA_CONFIG")]
    config: Option<String>,

    /// Directory holding the SQLite index
    #[arg(long, env = "DATA_PATH")]
    data_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve MCP on stdio and keep the index in sync (default)
    Serve,
    /// Run one sync and print the report
    Sync {
        /// Sync every part even if it is still fresh
        #[arg(long)]
        force: bool,
    },
    /// Print the usage summary
    Stats {
        #[arg(long, default_value = "30")]
        days: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    let cli = Cli::parse();

    // Default index location; cache.data_path from the config wins
    let default_data_path = cli.data_path.clone().unwrap_or_else(|| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(".forum-qa-mcp")
    });
    let default_data_path = default_data_path.to_string_lossy();
    let command = cli.command.unwrap_or(Commands::Serve);

    let config = match command {
        Commands::Stats { .. } => Config::load_settings(cli.config.as_deref(), &default_data_path)?,
        _ => Config::load(cli.config.as_deref(), &default_data_path)?,
    };

    // One shared database for every MCP instance on this machine
    std::fs::create_dir_all(&config.cache.data_path).with_context(|| {
        format!("Failed to create data directory {}", config.cache.data_path)
    })?;
    let cache = Arc::new(SqliteCache::new(config.db_path()).await?);

    match command {
        Commands::Stats { days } => {
            let summary = cache.analytics_summary(days.clamp(1, 365)).await?;
            let stats = serde_json::json!({
                "index": {
                    "messages": cache.message_count().await?,
                    "docs": cache.doc_count().await?,
                },
                "analytics": summary,
            });
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Commands::Sync { force } => {
            let indexer = build_indexer(&config, cache)?;
            let report = indexer.sync_all(force).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Serve => serve(config, cache).await,
    }
}

fn build_indexer(config: &Config, cache: Arc<SqliteCache>) -> Result<Arc<Indexer>> {
    let slack_client = Arc::new(SlackClient::new(config)?);
    let mut indexer = Indexer::new(cache.clone(), slack_client, config.clone());
    if !config.docs.sources.is_empty() {
        indexer = indexer.with_docs(Arc::new(DocsConnector::new(config, cache)?));
    }
    Ok(Arc::new(indexer))
}

async fn serve(config: Config, cache: Arc<SqliteCache>) -> Result<()> {
    let indexer = build_indexer(&config, cache.clone())?;
    let sync_task = indexer.clone().spawn_background();
    info!(
        prefix = %config.forum.channel_prefix,
        interval_minutes = config.index.sync_interval_minutes,
        "Background sync started"
    );

    let handler = RequestHandler::new(cache, indexer, Arc::new(config));
    let mcp_server = McpServer::new(handler);

    tokio::select! {
        result = mcp_server.run() => {
            if let Err(e) = result {
                error!("MCP server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, shutting down");
        }
    }

    sync_task.abort();
    Ok(())
}

fn init_logging() {
    // RUST_LOG allows per-module filters; LOG_LEVEL sets one global level
    let filter = if let Ok(rust_log) = std::env::var("RUST_LOG") {
        tracing_subscriber::EnvFilter::try_new(rust_log)
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    } else if let Ok(log_level) = std::env::var("LOG_LEVEL") {
        let level_str = match log_level.to_lowercase().as_str() {
            "trace" => "trace",
            "debug" => "debug",
            "info" => "info",
            "warn" | "warning" => "warn",
            "error" => "error",
            _ => "warn",
        };
        tracing_subscriber::EnvFilter::new(level_str)
    } else {
        tracing_subscriber::EnvFilter::new("warn")
    };

    // stdout carries the protocol
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.compact().with_target(false).init();
    }
}
