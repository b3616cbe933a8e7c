//! Account and message directory.
//!
//! Logins are answered from an in-process username/password cache that is
//! filled once from the `user` table and kept current by `register`. The
//! cache has its own lock; sessions are only needed for writes and for
//! listing messages.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::Session;
use crate::builder::Statement;
use crate::error::{StoreError, StoreResult};
use crate::memory::MemoryStore;

const USER_TABLE: &str = "user";
const INFO_TABLE: &str = "info";

/// Declare the `user(username unique, passwd)` and `info(user, content)` tables.
pub fn create_schema(store: &MemoryStore) {
    store.create_table(USER_TABLE, &["username", "passwd"], &["username"]);
    store.create_table(INFO_TABLE, &["user", "content"], &[]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Created,
    Taken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub user: String,
    pub content: String,
}

#[derive(Debug, Default)]
pub struct Accounts {
    cache: RwLock<HashMap<String, String>>,
}

impl Accounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill the cache from every row of the `user` table.
    pub fn load(session: &mut dyn Session) -> StoreResult<Self> {
        let rows = session.query(&Statement::select(USER_TABLE).columns(&["username", "passwd"]))?;
        let mut cache = HashMap::with_capacity(rows.len());
        for row in rows {
            let (Some(name), Some(passwd)) = (row.get_str("username")?, row.get_str("passwd")?)
            else {
                continue;
            };
            cache.insert(name.to_string(), passwd.to_string());
        }
        info!(users = cache.len(), "account cache loaded");
        Ok(Self {
            cache: RwLock::new(cache),
        })
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }

    /// Insert a new user. A name already in the cache or rejected by the
    /// store's unique constraint is `Taken`.
    pub fn register(
        &self,
        session: &mut dyn Session,
        name: &str,
        passwd: &str,
    ) -> StoreResult<RegisterOutcome> {
        if name.is_empty() || self.cache.read().contains_key(name) {
            return Ok(RegisterOutcome::Taken);
        }

        let insert = Statement::insert(USER_TABLE)
            .value("username", name)
            .value("passwd", passwd);
        match session.execute(&insert) {
            Ok(_) => {}
            Err(StoreError::Duplicate { .. }) => return Ok(RegisterOutcome::Taken),
            Err(e) => return Err(e),
        }

        self.cache.write().insert(name.to_string(), passwd.to_string());
        debug!(user = name, "registered");
        Ok(RegisterOutcome::Created)
    }

    /// Check credentials against the cache.
    pub fn login(&self, name: &str, passwd: &str) -> bool {
        self.cache
            .read()
            .get(name)
            .is_some_and(|stored| stored == passwd)
    }

    pub fn post_message(
        &self,
        session: &mut dyn Session,
        author: &str,
        content: &str,
    ) -> StoreResult<()> {
        let insert = Statement::insert(INFO_TABLE)
            .value("user", author)
            .value("content", content);
        session.execute(&insert)?;
        Ok(())
    }

    /// Every message, oldest first.
    pub fn messages(&self, session: &mut dyn Session) -> StoreResult<Vec<Message>> {
        session
            .query(&Statement::select(INFO_TABLE).columns(&["user", "content"]))?
            .into_iter()
            .map(|row| {
                Ok(Message {
                    user: row.get_str("user")?.unwrap_or_default().to_string(),
                    content: row.get_str("content")?.unwrap_or_default().to_string(),
                })
            })
            .collect()
    }
}
