//! In-memory backend: schema-declared tables behind one reader/writer lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use crate::builder::{Statement, StatementKind};
use crate::error::{StoreError, StoreResult};
use crate::value::{Row, Value};
use crate::Session;

struct Table {
    columns: Arc<[String]>,
    unique: Vec<usize>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    fn column_index(&self, table: &str, column: &str) -> StoreResult<usize> {
        self.columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| StoreError::UnknownColumn {
                table: table.to_string(),
                column: column.to_string(),
            })
    }
}

#[derive(Default)]
struct Inner {
    tables: RwLock<HashMap<String, Table>>,
    sessions: AtomicUsize,
}

/// A shared in-memory database. Cloning shares the same tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a table. Re-declaring an existing table keeps its rows.
    pub fn create_table(&self, name: &str, columns: &[&str], unique: &[&str]) {
        let mut tables = self.inner.tables.write();
        if tables.contains_key(name) {
            return;
        }
        let columns: Arc<[String]> = columns.iter().map(|c| c.to_string()).collect();
        let unique = unique
            .iter()
            .filter_map(|u| columns.iter().position(|c| c == u))
            .collect();
        tables.insert(
            name.to_string(),
            Table {
                columns,
                unique,
                rows: Vec::new(),
            },
        );
    }

    /// Open a session, the pooled handle workers lease.
    pub fn connect(&self) -> MemorySession {
        let id = self.inner.sessions.fetch_add(1, Ordering::Relaxed);
        MemorySession {
            store: self.clone(),
            id,
        }
    }

    /// Number of rows in `table`.
    pub fn count(&self, table: &str) -> StoreResult<usize> {
        let tables = self.inner.tables.read();
        tables
            .get(table)
            .map(|t| t.rows.len())
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))
    }

    fn insert(&self, stmt: &Statement) -> StoreResult<u64> {
        let mut tables = self.inner.tables.write();
        let table = tables
            .get_mut(stmt.table())
            .ok_or_else(|| StoreError::UnknownTable(stmt.table().to_string()))?;

        let mut row = vec![Value::Null; table.columns.len()];
        let mut bound = vec![false; table.columns.len()];
        for (column, value) in stmt.assignments() {
            let index = table.column_index(stmt.table(), column)?;
            if bound[index] {
                return Err(StoreError::Arity(format!("{} bound twice", column)));
            }
            bound[index] = true;
            row[index] = value.clone();
        }
        if !bound.contains(&true) {
            return Err(StoreError::Arity("insert binds no values".to_string()));
        }

        for &index in &table.unique {
            if row[index] != Value::Null && table.rows.iter().any(|r| r[index] == row[index]) {
                return Err(StoreError::Duplicate {
                    table: stmt.table().to_string(),
                    column: table.columns[index].clone(),
                });
            }
        }

        table.rows.push(row);
        Ok(1)
    }

    fn select(&self, stmt: &Statement) -> StoreResult<Vec<Row>> {
        let tables = self.inner.tables.read();
        let table = tables
            .get(stmt.table())
            .ok_or_else(|| StoreError::UnknownTable(stmt.table().to_string()))?;

        let projection: Vec<usize> = if stmt.column_names().is_empty() {
            (0..table.columns.len()).collect()
        } else {
            stmt.column_names()
                .iter()
                .map(|c| table.column_index(stmt.table(), c))
                .collect::<StoreResult<_>>()?
        };
        let columns: Arc<[String]> = projection
            .iter()
            .map(|&i| table.columns[i].clone())
            .collect();
        let filters = stmt
            .filters()
            .iter()
            .map(|(c, v)| table.column_index(stmt.table(), c).map(|i| (i, v)))
            .collect::<StoreResult<Vec<_>>>()?;

        let rows = table
            .rows
            .iter()
            .filter(|row| filters.iter().all(|(i, v)| &row[*i] == *v))
            .take(stmt.limit_value().unwrap_or(usize::MAX))
            .map(|row| {
                let values = projection.iter().map(|&i| row[i].clone()).collect();
                Row::new(columns.clone(), values)
            })
            .collect();
        Ok(rows)
    }
}

/// One handle onto a [`MemoryStore`].
pub struct MemorySession {
    store: MemoryStore,
    id: usize,
}

impl MemorySession {
    pub fn id(&self) -> usize {
        self.id
    }
}

impl Session for MemorySession {
    fn query(&mut self, stmt: &Statement) -> StoreResult<Vec<Row>> {
        debug!(session = self.id, sql = %stmt.to_sql(), params = stmt.params().len(), "query");
        match stmt.kind() {
            StatementKind::Select => self.store.select(stmt),
            StatementKind::Insert => self.store.insert(stmt).map(|_| Vec::new()),
        }
    }

    fn execute(&mut self, stmt: &Statement) -> StoreResult<u64> {
        debug!(session = self.id, sql = %stmt.to_sql(), params = stmt.params().len(), "execute");
        match stmt.kind() {
            StatementKind::Insert => self.store.insert(stmt),
            StatementKind::Select => self.store.select(stmt).map(|rows| rows.len() as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.create_table("user", &["username", "passwd"], &["username"]);
        store
    }

    #[test]
    fn insert_then_select() {
        let store = store();
        let mut session = store.connect();
        let insert = Statement::insert("user").value("username", "ann").value("passwd", "a");
        assert_eq!(session.execute(&insert).unwrap(), 1);
        session
            .execute(&Statement::insert("user").value("username", "bo").value("passwd", "b"))
            .unwrap();

        let rows = session
            .query(&Statement::select("user").columns(&["passwd"]).filter("username", "bo"))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].columns(), ["passwd".to_string()]);
        assert_eq!(rows[0].get_str("passwd").unwrap(), Some("b"));

        let all = session.query(&Statement::select("user").limit(1)).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(store.count("user").unwrap(), 2);
    }

    #[test]
    fn unique_columns_reject_duplicates() {
        let store = store();
        let mut session = store.connect();
        let insert = Statement::insert("user").value("username", "ann");
        session.execute(&insert).unwrap();
        assert!(matches!(
            session.execute(&insert),
            Err(StoreError::Duplicate { .. })
        ));
    }

    #[test]
    fn schema_errors() {
        let store = store();
        let mut session = store.connect();
        assert!(matches!(
            session.execute(&Statement::insert("nope").value("a", 1)),
            Err(StoreError::UnknownTable(_))
        ));
        assert!(matches!(
            session.execute(&Statement::insert("user").value("email", "x")),
            Err(StoreError::UnknownColumn { .. })
        ));
        assert!(matches!(
            session.execute(&Statement::insert("user")),
            Err(StoreError::Arity(_))
        ));
        assert!(matches!(
            session.query(&Statement::select("user").filter("email", "x")),
            Err(StoreError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn sessions_share_tables() {
        let store = store();
        let mut a = store.connect();
        let mut b = store.connect();
        assert_ne!(a.id(), b.id());
        a.execute(&Statement::insert("user").value("username", "ann")).unwrap();
        assert_eq!(b.query(&Statement::select("user")).unwrap().len(), 1);
    }
}
