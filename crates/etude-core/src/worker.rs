use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::conn::Connection;
use crate::dispatcher::Dispatcher;
use crate::error::{EtudeError, EtudeResult};
use crate::http::HttpStatus;
use crate::pool::ResourcePool;
use crate::router::Router;
use crate::server::ServerContext;
use crate::slab::Slot;
use crate::syscalls::Interest;

/// A connection whose socket has been drained, waiting for a worker.
pub struct Ready {
    pub token: u64,
    pub slot: Slot,
}

/// Everything a worker thread holds on to.
pub struct Worker<R> {
    id: usize,
    ctx: Arc<ServerContext>,
    dispatcher: Arc<Dispatcher<Ready>>,
    router: Arc<Router<R>>,
    pool: Arc<ResourcePool<R>>,
}

impl<R> Worker<R> {
    pub fn new(
        id: usize,
        ctx: Arc<ServerContext>,
        dispatcher: Arc<Dispatcher<Ready>>,
        router: Arc<Router<R>>,
        pool: Arc<ResourcePool<R>>,
    ) -> Self {
        Self {
            id,
            ctx,
            dispatcher,
            router,
            pool,
        }
    }

    /// Pop and process connections until the dispatcher closes or the stop
    /// flag is raised.
    pub fn run(&self) {
        debug!(worker = self.id, "worker entering loop");
        while !self.ctx.stop.load(Ordering::Acquire) {
            let Some(ready) = self.dispatcher.pop() else {
                break;
            };
            self.handle(ready);
        }
        debug!(worker = self.id, "worker exiting");
    }

    fn handle(&self, ready: Ready) {
        let (fd, interest) = {
            let mut conn = ready.slot.lock();
            let Some(fd) = conn.raw_fd() else {
                return;
            };
            let interest = process_guarded(&mut conn, |conn| conn.process(&self.router, &self.pool));
            (fd, interest)
        };
        if interest == Interest::Write {
            self.ctx.metrics.response_queued();
        }

        // The slot lock is released first: the re-armed event may be
        // delivered to the reactor immediately.
        if let Err(e) = self.ctx.registry.rearm(fd, ready.token, interest) {
            warn!(worker = self.id, fd, error = %e, "re-arm failed, handing back for close");
            self.ctx.orphan(ready.token);
        }
    }
}

/// Run one processing step. A panic is answered with a 500 so the
/// connection still gets re-armed.
fn process_guarded(
    conn: &mut Connection,
    step: impl FnOnce(&mut Connection) -> Interest,
) -> Interest {
    match panic::catch_unwind(AssertUnwindSafe(|| step(&mut *conn))) {
        Ok(interest) => interest,
        Err(_) => {
            warn!(peer = ?conn.peer(), "request processing panicked");
            conn.respond_error(HttpStatus::InternalFault);
            Interest::Write
        }
    }
}

/// The fixed set of worker threads.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` named workers, optionally pinned to cores round-robin.
    pub fn spawn<R: Send + 'static>(
        count: usize,
        pin: bool,
        ctx: Arc<ServerContext>,
        dispatcher: Arc<Dispatcher<Ready>>,
        router: Arc<Router<R>>,
        pool: Arc<ResourcePool<R>>,
    ) -> EtudeResult<Self> {
        let core_ids = if pin {
            core_affinity::get_core_ids().unwrap_or_default()
        } else {
            Vec::new()
        };

        let mut handles = Vec::with_capacity(count);
        for i in 0..count {
            let core_id = (!core_ids.is_empty()).then(|| core_ids[i % core_ids.len()]);
            let worker = Worker::new(
                i,
                ctx.clone(),
                dispatcher.clone(),
                router.clone(),
                pool.clone(),
            );

            let handle = thread::Builder::new()
                .name(format!("etude-worker-{}", i))
                .spawn(move || {
                    if let Some(id) = core_id {
                        if core_affinity::set_for_current(id) {
                            debug!(worker = i, core = id.id, "worker pinned");
                        } else {
                            warn!(worker = i, core = id.id, "failed to pin worker");
                        }
                    }
                    worker.run();
                })?;
            handles.push(handle);
        }

        info!(workers = count, pinned = pin, "worker pool started");
        Ok(Self { handles })
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker. Reports the first worker that panicked.
    pub fn join(self) -> EtudeResult<()> {
        let mut result = Ok(());
        for handle in self.handles {
            let name = handle.thread().name().unwrap_or("etude-worker").to_string();
            if handle.join().is_err() && result.is_ok() {
                result = Err(EtudeError::WorkerPanic(name));
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::conn::ConnectionSettings;

    #[test]
    fn a_panicking_step_queues_a_server_error() {
        let settings = Arc::new(ConnectionSettings::from_config(&ServerConfig::default()));
        let mut conn = Connection::new(settings);

        let interest = process_guarded(&mut conn, |_| panic!("resolver bug"));
        assert_eq!(interest, Interest::Write);
        assert!(conn.pending() > 0);

        let interest = process_guarded(&mut conn, |_| Interest::Read);
        assert_eq!(interest, Interest::Read);
    }
}
