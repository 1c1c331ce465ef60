//! Mailflow server and workflow validation CLI.
//!
//! Run with: cargo run --bin mailflow -- [OPTIONS] <COMMAND>

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use mailflow_engine::{
    config::Config,
    metrics,
    server::Server,
    store::create_store,
    template::{FileTemplateLoader, TemplateLoader},
    transport::{HttpMessenger, MailgunTransport},
    workflow::{parse_steps, Collaborators, Engine, EventState, StepExecutor},
};

#[derive(Parser)]
#[command(author, version, about = "Email and messenger workflow engine", long_about = None)]
struct Cli {
    /// Log level used when RUST_LOG is not set (debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Listen address, overrides SERVER_ADDR
        #[arg(short, long)]
        addr: Option<String>,
    },

    /// Check a workflow definition (.json or .yaml) without running it
    Validate {
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();

    match cli.command {
        Commands::Serve { addr } => serve(addr).await,
        Commands::Validate { file } => validate(&file),
    }
}

async fn serve(addr: Option<String>) -> Result<()> {
    // Load configuration
    let mut config = Config::load()?;
    if let Some(addr) = addr {
        config.server.addr = addr;
    }
    info!("Loaded configuration: {:?}", config);

    metrics::register_metrics();

    // Initialize store
    let contacts = create_store(&config.database).await?;
    contacts.init().await?;

    let templates: Arc<dyn TemplateLoader> = Arc::new(FileTemplateLoader::new(config.templates.dir.clone()));
    let collaborators = Collaborators {
        transport: Arc::new(MailgunTransport::new(&config.mailgun)?),
        messenger: Arc::new(HttpMessenger::new(
            &config.messenger.backend_url,
            Duration::from_secs(config.messenger.timeout_secs),
        )?),
        contacts: contacts.clone(),
        templates: templates.clone(),
    };

    // Initialize engine
    let executor = Arc::new(StepExecutor::new(
        collaborators,
        Arc::new(EventState::new()),
        config.execution.clone(),
    ));
    let engine = Arc::new(Engine::new(executor));
    engine.clone().start().await;

    // Start server
    let app = Server::new(engine, contacts, templates).build_router();
    let listener = tokio::net::TcpListener::bind(&config.server.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.addr))?;
    info!("Server running on http://{}", config.server.addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn validate(file: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;

    // YAML is a superset of JSON, so one parser covers both.
    let value: serde_json::Value = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse {}", file.display()))?;
    let steps = parse_steps(value)?;

    println!("{}: {} top-level step(s) OK", file.display(), steps.len());
    for (idx, step) in steps.iter().enumerate() {
        println!("  [{}] {}", idx, step.type_name());
    }
    Ok(())
}
