use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlsage_agents::{Turn, to_sql_markdown};
use sqlsage_common::{CollectionSelector, ConversationMessage};
use sqlsage_config::{AppConfig, ConfigLoader};
use sqlsage_gateway::bootstrap;
use sqlsage_sandbox::SandboxOverrides;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "sqlsage",
    version,
    about = "SqlSage - natural-language questions to SQL"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, global = true, env = "SQLSAGE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Directory holding config.yml / config.toml
    #[arg(long, global = true, env = "SQLSAGE_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Ask one question and print the generated answer
    Ask {
        question: String,

        /// Collection to scope retrieval to; omit for all collections
        #[arg(long)]
        collection: Option<String>,
    },

    /// Run one statement through the sandbox and print the JSON result
    Exec {
        sql: String,

        #[arg(long)]
        max_rows: Option<usize>,

        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Query a running gateway for its status
    Status,

    /// Create the config directory with a starter config.yml
    Init,
}

fn init_tracing(cli_level: Option<&str>, config: &AppConfig) {
    let level = cli_level
        .or(config.log_level.as_deref())
        .unwrap_or("info")
        .to_string();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config_loader = match &cli.config_dir {
        Some(dir) => ConfigLoader::with_dir(dir),
        None => ConfigLoader::new(),
    };
    let config = config_loader
        .load()
        .with_context(|| format!("loading config from {}", config_loader.config_dir().display()))?;

    init_tracing(cli.log_level.as_deref(), &config);
    tracing::debug!("using config dir {}", config_loader.config_dir().display());

    match cli.command {
        Commands::Serve { host, port } => {
            let mut config = config;
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }

            let server = sqlsage_gateway::GatewayServer::new(config);
            server.run().await?;
        }
        Commands::Ask {
            question,
            collection,
        } => {
            let search = bootstrap::build_search_client(&config)
                .context("no search service configured (search.url or SUPABASE_URL)")?;
            let orchestrator = bootstrap::build_orchestrator(&config, search)
                .context("SQL assistant not available; check llm, embeddings and agents config")?;

            let turn = Turn::new(
                vec![ConversationMessage::user(question)],
                CollectionSelector::from_option(collection.as_deref()),
            )?;
            let output = orchestrator.answer(&turn).await?;

            println!("{}", output.content);
            if !output.sql.is_empty() {
                println!("\n--- extracted statements ({}) ---", output.sql.len());
                println!("{}", to_sql_markdown(&output.sql));
            }
        }
        Commands::Exec {
            sql,
            max_rows,
            timeout_ms,
        } => {
            let (database, sandbox) = bootstrap::build_sandbox(&config)
                .context("no usable target database (set database.path in config)")?;

            let overrides = SandboxOverrides {
                timeout_ms,
                max_rows,
                allowed_statements: None,
            };
            let result = sandbox.run(&sql, Some(&overrides)).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            database.drain();

            if !result.success {
                std::process::exit(1);
            }
        }
        Commands::Status => {
            let client = reqwest::Client::new();
            let mut request = client.get(format!(
                "http://{}:{}/api/status",
                config.gateway.host, config.gateway.port
            ));

            if let Some(api_key) = &config.gateway.api_key {
                request = request.bearer_auth(api_key);
            }

            let resp = request.send().await.map_err(|_| {
                anyhow::anyhow!(
                    "Gateway is not running at {}:{}",
                    config.gateway.host,
                    config.gateway.port
                )
            })?;

            if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
                anyhow::bail!("Unauthorized. Please check gateway.api_key in config.yml.");
            }

            let body = resp.json::<serde_json::Value>().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Commands::Init => {
            println!("SqlSage setup");
            match config_loader.init()? {
                Some(path) => println!("Wrote starter config to {}", path.display()),
                None => println!(
                    "Config already present in {}",
                    config_loader.config_dir().display()
                ),
            }
            println!("Edit it to point at your providers, search service and database.");
        }
    }

    Ok(())
}
