//! Values bound to statements and read back from rows.

use std::fmt;
use std::sync::Arc;

use crate::error::{StoreError, StoreResult};

/// A value that can be used as a statement parameter or read from a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Null,
    Int(i64),
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// A row returned from a query: shared column names plus owned values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn get(&self, index: usize) -> StoreResult<&Value> {
        self.values.get(index).ok_or_else(|| {
            StoreError::TypeMismatch(format!("column index {} out of range", index))
        })
    }

    pub fn get_by_name(&self, name: &str) -> StoreResult<&Value> {
        let index = self
            .columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| StoreError::TypeMismatch(format!("column '{}' not found", name)))?;
        self.get(index)
    }

    /// A text column; `None` for NULL.
    pub fn get_str(&self, name: &str) -> StoreResult<Option<&str>> {
        match self.get_by_name(name)? {
            Value::Null => Ok(None),
            Value::Text(s) => Ok(Some(s)),
            Value::Int(_) => Err(StoreError::TypeMismatch(format!("'{}' is not text", name))),
        }
    }

    /// An integer column; `None` for NULL.
    pub fn get_i64(&self, name: &str) -> StoreResult<Option<i64>> {
        match self.get_by_name(name)? {
            Value::Null => Ok(None),
            Value::Int(v) => Ok(Some(*v)),
            Value::Text(s) => s
                .parse()
                .map(Some)
                .map_err(|_| StoreError::TypeMismatch(format!("'{}' is not an integer", name))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> Row {
        let columns: Arc<[String]> = vec!["name".to_string(), "age".to_string(), "note".to_string()].into();
        Row::new(columns, vec!["ada".into(), Value::Int(36), Value::Null])
    }

    #[test]
    fn typed_getters() {
        let row = row();
        assert_eq!(row.get_str("name").unwrap(), Some("ada"));
        assert_eq!(row.get_i64("age").unwrap(), Some(36));
        assert_eq!(row.get_str("note").unwrap(), None);
        assert!(matches!(row.get_str("age"), Err(StoreError::TypeMismatch(_))));
        assert!(row.get_by_name("missing").is_err());
    }

    #[test]
    fn optional_values_become_null() {
        assert_eq!(Value::from(None::<&str>), Value::Null);
        assert_eq!(Value::from(Some(3)), Value::Int(3));
        assert_eq!(Value::Int(3).to_string(), "3");
    }
}
