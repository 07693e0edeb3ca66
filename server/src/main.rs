//! Structa server binary.
//!
//! Wires the orchestration core to an axum HTTP surface: open the
//! database, recover interrupted jobs, start the dispatch loop, serve
//! until ctrl-c.

mod routes;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use structa::config::{load_config, OrchestratorConfig};
use structa::db::{default_db_path, Database};
use structa::processor::ProcessorRegistry;
use structa::Orchestrator;

#[derive(Parser, Debug)]
#[command(name = "structa-server", about = "Document pipeline orchestrator")]
struct Args {
    /// JSON config file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database file. Overrides the config value.
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Listen address.
    #[arg(short, long, default_value = "127.0.0.1:3000")]
    listen: SocketAddr,

    /// AI worker base URL. Overrides the config value.
    #[arg(short, long)]
    worker_url: Option<String>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,structa=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    // Route `log` records from the db layer into tracing.
    let _ = tracing_log::LogTracer::init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => OrchestratorConfig::default(),
    };
    if let Some(url) = args.worker_url {
        config.worker_base_url = url;
    }
    if let Some(path) = args.database {
        config.database_path = Some(path);
    }

    let db_path = config
        .database_path
        .clone()
        .unwrap_or_else(default_db_path);
    let db = Database::open(&db_path)?;

    let registry = ProcessorRegistry::http(&config.worker_base_url);
    let orchestrator = Arc::new(Orchestrator::new(db, config, registry));

    let requeued = orchestrator.recover_interrupted()?;
    if requeued > 0 {
        tracing::info!(requeued, "recovered interrupted jobs");
    }

    let dispatch = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            if let Err(err) = orchestrator.run().await {
                tracing::error!(error = %err, "dispatcher exited with error");
            }
        })
    };

    let app = routes::router(Arc::clone(&orchestrator));
    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    tracing::info!(listen = %args.listen, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    orchestrator.shutdown();
    let _ = dispatch.await;
    Ok(())
}
