//! Persistent-store collaborator for the etude server.
//!
//! The server never inspects a schema; it only leases a [`Session`] from its
//! resource pool and hands it to route handlers. Statements carry their
//! values as bound parameters, so request fields never end up in command text.

pub mod accounts;
pub mod builder;
pub mod error;
pub mod memory;
pub mod value;

pub use accounts::{Accounts, Message, RegisterOutcome, create_schema};
pub use builder::{Statement, StatementKind};
pub use error::{StoreError, StoreResult};
pub use memory::{MemorySession, MemoryStore};
pub use value::{Row, Value};

/// A synchronous handle onto the backing store.
///
/// `query` returns rows; `execute` returns the number of affected rows.
pub trait Session: Send {
    fn query(&mut self, stmt: &Statement) -> StoreResult<Vec<Row>>;

    fn execute(&mut self, stmt: &Statement) -> StoreResult<u64>;
}

impl<S: Session + ?Sized> Session for Box<S> {
    fn query(&mut self, stmt: &Statement) -> StoreResult<Vec<Row>> {
        (**self).query(stmt)
    }

    fn execute(&mut self, stmt: &Statement) -> StoreResult<u64> {
        (**self).execute(stmt)
    }
}
