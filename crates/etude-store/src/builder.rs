use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Insert,
    Select,
}

/// A command with its values bound as parameters.
///
/// Values never become part of the command text: `to_sql` renders numbered
/// placeholders and the values travel separately in `params`.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    kind: StatementKind,
    table: String,
    columns: Vec<String>,
    values: Vec<Value>,
    filters: Vec<(String, Value)>,
    limit: Option<usize>,
}

impl Statement {
    fn new(kind: StatementKind, table: &str) -> Self {
        Self {
            kind,
            table: table.to_string(),
            columns: Vec::new(),
            values: Vec::new(),
            filters: Vec::new(),
            limit: None,
        }
    }

    /// `INSERT INTO table (...) VALUES (...)`, built with [`value`](Self::value).
    pub fn insert(table: &str) -> Self {
        Self::new(StatementKind::Insert, table)
    }

    /// `SELECT ... FROM table`; every column unless [`columns`](Self::columns) narrows it.
    pub fn select(table: &str) -> Self {
        Self::new(StatementKind::Select, table)
    }

    /// Bind a column value for an insert.
    pub fn value(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.columns.push(column.to_string());
        self.values.push(value.into());
        self
    }

    /// Columns to return from a select.
    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Equality filter, combined with AND.
    pub fn filter(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push((column.to_string(), value.into()));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    /// Column/value pairs bound by an insert.
    pub fn assignments(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(String::as_str).zip(self.values.iter())
    }

    pub fn filters(&self) -> &[(String, Value)] {
        &self.filters
    }

    pub fn limit_value(&self) -> Option<usize> {
        self.limit
    }

    /// Every bound value, in placeholder order.
    pub fn params(&self) -> Vec<&Value> {
        self.values
            .iter()
            .chain(self.filters.iter().map(|(_, v)| v))
            .collect()
    }

    /// Command text with `$n` placeholders.
    pub fn to_sql(&self) -> String {
        let mut next = 1;
        let mut placeholder = || {
            let p = format!("${}", next);
            next += 1;
            p
        };

        let mut sql = match self.kind {
            StatementKind::Insert => {
                let slots: Vec<String> = self.values.iter().map(|_| placeholder()).collect();
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    self.table,
                    self.columns.join(", "),
                    slots.join(", ")
                )
            }
            StatementKind::Select => {
                let columns = if self.columns.is_empty() {
                    "*".to_string()
                } else {
                    self.columns.join(", ")
                };
                format!("SELECT {} FROM {}", columns, self.table)
            }
        };

        if !self.filters.is_empty() {
            let clauses: Vec<String> = self
                .filters
                .iter()
                .map(|(column, _)| format!("{} = {}", column, placeholder()))
                .collect();
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_uses_placeholders() {
        let stmt = Statement::insert("user")
            .value("username", "alice")
            .value("passwd", "pw");
        assert_eq!(stmt.to_sql(), "INSERT INTO user (username, passwd) VALUES ($1, $2)");
        assert_eq!(stmt.params(), vec![&Value::from("alice"), &Value::from("pw")]);
    }

    #[test]
    fn select_with_filters_and_limit() {
        let stmt = Statement::select("user")
            .columns(&["username", "passwd"])
            .filter("username", "bob")
            .limit(1);
        assert_eq!(
            stmt.to_sql(),
            "SELECT username, passwd FROM user WHERE username = $1 LIMIT 1"
        );
        assert_eq!(stmt.params().len(), 1);
    }

    #[test]
    fn hostile_values_stay_out_of_the_text() {
        let hostile = "x'); DROP TABLE user; --";
        let stmt = Statement::insert("info").value("user", hostile).value("content", "hi");
        assert!(!stmt.to_sql().contains("DROP"));
        assert_eq!(stmt.params()[0], &Value::from(hostile));
    }
}
