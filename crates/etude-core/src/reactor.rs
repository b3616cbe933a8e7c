use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use tracing::{debug, error, info, warn};

use crate::conn::FlushOutcome;
use crate::dispatcher::Dispatcher;
use crate::error::EtudeResult;
use crate::http::BUSY_RESPONSE;
use crate::server::ServerContext;
use crate::slab::{ConnectionSlab, LISTENER_TOKEN, WAKER_TOKEN};
use crate::syscalls::{
    Interest, Readiness, accept_connection, epoll_event, write_nonblocking,
};
use crate::worker::Ready;

/// The single I/O thread.
///
/// It owns the listening socket and the slot arena, and is the only place a
/// connection is accepted, drained, flushed or closed. Parsing and request
/// handling happen on workers.
pub struct Reactor {
    listener: OwnedFd,
    ctx: Arc<ServerContext>,
    slab: ConnectionSlab,
    dispatcher: Arc<Dispatcher<Ready>>,
    events: Vec<epoll_event>,
}

impl Reactor {
    /// Register the listener (edge-triggered, not one-shot) and the waker.
    pub fn new(
        listener: OwnedFd,
        ctx: Arc<ServerContext>,
        slab: ConnectionSlab,
        dispatcher: Arc<Dispatcher<Ready>>,
        max_events: usize,
    ) -> EtudeResult<Self> {
        ctx.registry.add_listener(listener.as_raw_fd(), LISTENER_TOKEN)?;
        ctx.registry.add_listener(ctx.waker.as_raw_fd(), WAKER_TOKEN)?;
        Ok(Self {
            listener,
            ctx,
            slab,
            dispatcher,
            events: vec![epoll_event { events: 0, u64: 0 }; max_events.max(1)],
        })
    }

    /// Wait for readiness and act on it until the stop flag is raised.
    pub fn run(&mut self) -> EtudeResult<()> {
        info!(listen_fd = self.listener.as_raw_fd(), "reactor running");
        while !self.ctx.stop.load(Ordering::Acquire) {
            let n = self.ctx.registry.wait(&mut self.events, -1)?;
            for i in 0..n {
                let event = self.events[i];
                let token = event.u64;
                match token {
                    LISTENER_TOKEN => self.accept_all(),
                    WAKER_TOKEN => {
                        self.ctx.waker.drain();
                        self.close_orphans();
                    }
                    _ => self.on_connection(token, Readiness::from_event(&event)),
                }
            }
        }
        info!(open = self.slab.len(), "reactor stopping");
        Ok(())
    }

    fn accept_all(&mut self) {
        loop {
            let (fd, peer) = match accept_connection(self.listener.as_raw_fd()) {
                Ok(Some(accepted)) => accepted,
                Ok(None) => return,
                Err(e) => {
                    error!(error = %e, "accept failed");
                    return;
                }
            };

            let Some((token, slot)) = self.slab.allocate() else {
                self.refuse(fd);
                continue;
            };

            let raw = fd.as_raw_fd();
            let mut conn = slot.lock();
            conn.open(fd, peer);
            if let Err(e) = self.ctx.registry.add(raw, token, Interest::Read) {
                warn!(fd = raw, error = %e, "registration failed");
                conn.close();
                drop(conn);
                self.slab.release(token);
                continue;
            }
            drop(conn);

            self.ctx.metrics.connection_opened();
            debug!(fd = raw, token, peer = ?peer, "connection accepted");
        }
    }

    /// Tell a client over the connection ceiling to go away, then close it.
    fn refuse(&self, fd: OwnedFd) {
        if let Err(e) = write_nonblocking(fd.as_raw_fd(), BUSY_RESPONSE) {
            debug!(error = %e, "busy response failed");
        }
        self.ctx.metrics.refused();
        warn!(
            max_connections = self.slab.capacity(),
            "connection ceiling reached, refusing client"
        );
    }

    fn on_connection(&mut self, token: u64, readiness: Readiness) {
        // Stale events for a slot that has since been reused are dropped.
        let Some(slot) = self.slab.get(token).cloned() else {
            return;
        };

        if readiness.is_hangup() {
            self.close(token);
            return;
        }

        if readiness.is_readable() {
            if let Err(e) = slot.lock().drain() {
                debug!(token, error = %e, "read side closed");
                self.close(token);
                return;
            }
            if self.dispatcher.enqueue(Ready { token, slot }).is_err() {
                warn!(
                    token,
                    capacity = self.dispatcher.capacity(),
                    "dispatcher full, dropping connection"
                );
                self.ctx.metrics.dropped();
                self.close(token);
            }
            return;
        }

        if readiness.is_writable() {
            let (flushed, fd) = {
                let mut conn = slot.lock();
                (conn.flush(), conn.raw_fd())
            };
            let next = match flushed {
                Ok((outcome, written)) => {
                    self.ctx.metrics.wrote(written);
                    match outcome {
                        FlushOutcome::NeedsRearmForWrite => Interest::Write,
                        FlushOutcome::CompleteKeepAlive => Interest::Read,
                        FlushOutcome::CompleteClose => {
                            self.close(token);
                            return;
                        }
                    }
                }
                Err(e) => {
                    debug!(token, error = %e, "write failed");
                    self.close(token);
                    return;
                }
            };
            if let Some(fd) = fd {
                self.rearm(fd, token, next);
            }
        }
    }

    fn rearm(&mut self, fd: RawFd, token: u64, interest: Interest) {
        if let Err(e) = self.ctx.registry.rearm(fd, token, interest) {
            warn!(fd, error = %e, "re-arm failed");
            self.close(token);
        }
    }

    /// Deregister, release the socket and mapping, and free the slot.
    fn close(&mut self, token: u64) {
        let Some(slot) = self.slab.get(token).cloned() else {
            return;
        };
        {
            let mut conn = slot.lock();
            if let Some(fd) = conn.raw_fd() {
                if let Err(e) = self.ctx.registry.delete(fd) {
                    debug!(fd, error = %e, "deregister failed");
                }
            }
            conn.close();
        }
        self.slab.release(token);
        self.ctx.metrics.connection_closed();
        debug!(token, "connection closed");
    }

    fn close_orphans(&mut self) {
        for token in self.ctx.take_orphans() {
            self.close(token);
        }
    }

    /// Close every open connection. Call only once workers have stopped.
    pub fn close_all(&mut self) {
        for token in self.slab.tokens() {
            self.close(token);
        }
    }
}
