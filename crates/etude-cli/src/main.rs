use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use etude_core::logging::{init_logging_json, init_logging_with_level};
use etude_core::syscalls::ignore_sigpipe;
use etude_core::{ResourcePool, Server, ServerConfig};
use etude_store::{Accounts, MemoryStore, create_schema};
use tracing::info;

mod site;

#[derive(Parser)]
#[command(name = "etude")]
#[command(about = "Edge-triggered static HTTP/1.1 server with a small account demo site")]
#[command(version)]
struct Cli {
    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to bind
    #[arg(short, long)]
    port: Option<u16>,

    /// Number of worker threads
    #[arg(short, long)]
    workers: Option<usize>,

    /// Directory static documents are served from
    #[arg(long)]
    doc_root: Option<PathBuf>,

    /// Maximum simultaneously open connections
    #[arg(long)]
    max_connections: Option<usize>,

    /// Maximum connections waiting for a worker
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Number of pooled store sessions
    #[arg(long)]
    pool_size: Option<usize>,

    /// Pin workers to CPU cores
    #[arg(long)]
    pin_workers: bool,

    /// Default log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn apply(self, mut config: ServerConfig) -> ServerConfig {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(doc_root) = self.doc_root {
            config.doc_root = doc_root;
        }
        if let Some(max) = self.max_connections {
            config.max_connections = max;
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity;
        }
        if let Some(size) = self.pool_size {
            config.pool_size = size;
        }
        config.pin_workers |= self.pin_workers;
        config
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.json {
        init_logging_json(&cli.log_level);
    } else {
        init_logging_with_level(&cli.log_level);
    }

    ignore_sigpipe().context("failed to ignore SIGPIPE")?;

    let config = cli.apply(ServerConfig::from_env()?);

    let store = MemoryStore::new();
    create_schema(&store);
    let accounts = Arc::new(Accounts::load(&mut store.connect())?);
    let pool = ResourcePool::connect(config.pool_size, || {
        Ok::<_, anyhow::Error>(store.connect())
    })?;

    let router = site::routes(accounts);
    let server = Server::bind(config, router, pool).context("failed to start server")?;

    let handle = server.handle();
    ctrlc::set_handler(move || {
        info!("shutdown requested");
        let _ = handle.shutdown();
    })
    .context("failed to install Ctrl-C handler")?;

    server.run()?;
    Ok(())
}
