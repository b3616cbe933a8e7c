//! A small HTTP/1.1 server engine: one edge-triggered, one-shot epoll
//! reactor thread, a bounded dispatcher, a fixed worker pool and a generic
//! pool of leasable resources. Linux only.

pub mod config;
pub mod conn;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod pool;
pub mod reactor;
pub mod resolve;
pub mod router;
pub mod server;
pub mod slab;
pub mod syscalls;
pub mod worker;

// Re-exports for users
pub use config::ServerConfig;
pub use error::{EtudeError, EtudeResult};
pub use http::{HttpStatus, Method, Request};
pub use metrics::MetricsSnapshot;
pub use pool::{Lease, ResourcePool};
pub use router::{HandlerError, HandlerResult, Route, Router};
pub use server::{Server, ServerHandle};
