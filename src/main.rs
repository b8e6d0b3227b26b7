//! Tool Factory IPC server - main entry point.
//!
//! Opens the SQLite store, builds the built-in tool registry and serves it
//! over the TCP IPC transport until Ctrl-C.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tool_factory::bus::EventBus;
use tool_factory::ipc::IpcServer;
use tool_factory::store::SqliteStore;
use tool_factory::{build_registry, Config, ToolDeps};

#[derive(Debug, Parser)]
#[command(name = "tool-factory-server", version, about = "Serve the tool registry over IPC")]
struct Args {
    /// Listen address (overrides TOOL_FACTORY_LISTEN_ADDR).
    #[arg(long)]
    listen: Option<String>,

    /// SQLite database path (overrides TOOL_FACTORY_DB_PATH).
    #[arg(long)]
    db: Option<PathBuf>,

    /// Root directory for file previews (overrides TOOL_FACTORY_FILES_ROOT).
    #[arg(long)]
    files_root: Option<PathBuf>,

    /// Emit JSON logs.
    #[arg(long, env = "TOOL_FACTORY_LOG_JSON")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let mut config = Config::from_env();
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(db) = args.db {
        config.database.path = db;
    }
    if args.files_root.is_some() {
        config.database.files_root = args.files_root;
    }
    if args.json_logs {
        config.observability.json_logs = true;
    }

    tool_factory::observability::init_tracing_with(&config.observability);

    let store = SqliteStore::open(&config.database.path)?;
    let bus = Arc::new(EventBus::new());
    let deps = Arc::new(ToolDeps::from_store(store, &config, bus)?);
    let auth_required = config.auth.shared_token.is_some();
    let registry = Arc::new(build_registry(deps)?);

    let addr: SocketAddr = config.server.listen_addr.parse()?;
    tracing::info!(
        %addr,
        db = %config.database.path.display(),
        tools = registry.len(),
        auth_required,
        "tool-factory server starting"
    );

    let server = IpcServer::new(registry, addr, config.ipc.clone());
    let shutdown = server.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received");
            shutdown.cancel();
        }
    });

    server.serve().await?;
    Ok(())
}
