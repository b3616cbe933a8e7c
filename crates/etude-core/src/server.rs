use std::net::SocketAddr;
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::conn::ConnectionSettings;
use crate::dispatcher::Dispatcher;
use crate::error::EtudeResult;
use crate::metrics::{MetricsSnapshot, ServerMetrics};
use crate::pool::ResourcePool;
use crate::reactor::Reactor;
use crate::router::Router;
use crate::slab::ConnectionSlab;
use crate::syscalls::{self, EventFd, Epoll};
use crate::worker::WorkerPool;

/// State shared by the reactor, the workers and any `ServerHandle`.
pub struct ServerContext {
    /// The readiness registration. Workers re-arm connections through it.
    pub registry: Epoll,
    pub metrics: ServerMetrics,
    pub stop: AtomicBool,
    /// Pulls the reactor out of its untimed wait.
    pub waker: EventFd,
    /// Connections a worker could not re-arm; the reactor closes them.
    orphans: Mutex<Vec<u64>>,
}

impl ServerContext {
    pub fn new() -> EtudeResult<Self> {
        Ok(Self {
            registry: Epoll::new()?,
            metrics: ServerMetrics::new(),
            stop: AtomicBool::new(false),
            waker: EventFd::new()?,
            orphans: Mutex::new(Vec::new()),
        })
    }

    /// Queue a connection token for the reactor to close and wake it.
    pub fn orphan(&self, token: u64) {
        self.orphans.lock().push(token);
        if let Err(e) = self.waker.notify() {
            warn!(token, error = %e, "waker notify failed");
        }
    }

    pub fn take_orphans(&self) -> Vec<u64> {
        std::mem::take(&mut *self.orphans.lock())
    }
}

/// A bound, not yet running server.
///
/// ```ignore
/// let server = Server::bind(config, router, pool)?;
/// let handle = server.handle();
/// ctrlc::set_handler(move || { let _ = handle.shutdown(); })?;
/// server.run()?;
/// ```
pub struct Server<R> {
    config: ServerConfig,
    listener: OwnedFd,
    local_addr: SocketAddr,
    ctx: Arc<ServerContext>,
    router: Arc<Router<R>>,
    pool: Arc<ResourcePool<R>>,
}

impl<R: Send + 'static> Server<R> {
    /// Validate `config` and start listening. Nothing is accepted until `run`.
    pub fn bind(config: ServerConfig, router: Router<R>, pool: ResourcePool<R>) -> EtudeResult<Self> {
        config.validate()?;
        if !config.doc_root.is_dir() {
            warn!(doc_root = %config.doc_root.display(), "document root is not a directory");
        }

        let addr = config.bind_addr()?;
        let listener = syscalls::create_listen_socket(&addr, config.backlog)?;
        let local_addr = syscalls::local_addr(listener.as_raw_fd())?;

        Ok(Self {
            config,
            listener,
            local_addr,
            ctx: Arc::new(ServerContext::new()?),
            router: Arc::new(router),
            pool: Arc::new(pool),
        })
    }

    /// The bound address; useful when binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            ctx: self.ctx.clone(),
        }
    }

    /// Serve until shutdown is requested, then stop the workers and close
    /// every open connection.
    pub fn run(self) -> EtudeResult<()> {
        let settings = Arc::new(ConnectionSettings::from_config(&self.config));
        let slab = ConnectionSlab::new(self.config.max_connections, settings);
        let dispatcher = Arc::new(Dispatcher::new(self.config.queue_capacity));
        let mut reactor = Reactor::new(
            self.listener,
            self.ctx.clone(),
            slab,
            dispatcher.clone(),
            self.config.max_events,
        )?;

        let workers = WorkerPool::spawn(
            self.config.workers,
            self.config.pin_workers,
            self.ctx.clone(),
            dispatcher.clone(),
            self.router,
            self.pool,
        )?;

        info!(
            addr = %self.local_addr,
            workers = workers.len(),
            doc_root = %self.config.doc_root.display(),
            "etude listening"
        );

        let served = reactor.run();

        self.ctx.stop.store(true, Ordering::Release);
        dispatcher.close();
        let joined = workers.join();
        reactor.close_all();

        let snapshot = self.ctx.metrics.snapshot();
        info!(
            responses = snapshot.responses,
            bytes_written = snapshot.bytes_written,
            refused = snapshot.refused,
            dropped = snapshot.dropped,
            "etude shut down"
        );
        served.and(joined)
    }
}

/// Cloneable control handle for a running server.
#[derive(Clone)]
pub struct ServerHandle {
    ctx: Arc<ServerContext>,
}

impl ServerHandle {
    /// Ask the server to stop. Returns immediately; `Server::run` returns
    /// once workers have finished their current connection.
    pub fn shutdown(&self) -> EtudeResult<()> {
        self.ctx.stop.store(true, Ordering::Release);
        self.ctx.waker.notify()?;
        Ok(())
    }

    pub fn is_stopped(&self) -> bool {
        self.ctx.stop.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }
}
