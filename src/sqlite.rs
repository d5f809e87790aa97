use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{ffi, Connection, ToSql};
use serde::Deserialize;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use crate::error::{SqlError, SqlResult};
use crate::handle::{Cursor, Statement, StatementHandle};

/// Core value types for SQLite operations
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Boolean(bool),
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Blob(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(r) => Value::Real(r),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Real(r) => ToSqlOutput::Borrowed(ValueRef::Real(*r)),
            Value::Text(t) => ToSqlOutput::Borrowed(ValueRef::Text(t.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            // SQLite has no boolean storage class
            Value::Boolean(b) => ToSqlOutput::Borrowed(ValueRef::Integer(i64::from(*b))),
        })
    }
}

/// Parameter bindings for SQL queries
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Params {
    pub values: HashMap<String, Value>,
}

impl Params {
    /// Create a new Params object
    pub fn new() -> Self {
        Self::default()
    }
    /// Add a named value. `name` may omit the `:` prefix.
    pub fn with_value(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.values.insert(name.to_string(), value.into());
        self
    }
}

/// SQL Query with typed parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub statement: String,
    pub params: Params,
}

impl SqlQuery {
    pub fn new(statement: &str) -> Self {
        Self {
            statement: statement.to_string(),
            params: Params::new(),
        }
    }
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }
}

/// SQLite connection configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Path to the SQLite database file, `:memory:` for a private in-memory database
    pub db_path: String,
    /// How long to wait on a locked database before giving up
    pub busy_timeout_ms: Option<u64>,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            db_path: ":memory:".to_string(),
            busy_timeout_ms: None,
        }
    }
}

impl SqliteConfig {
    /// Create a new SQLite config for the given path
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    pub fn with_busy_timeout(mut self, millis: u64) -> Self {
        self.busy_timeout_ms = Some(millis);
        self
    }

    /// Open a connection as configured
    pub fn open(&self) -> SqlResult<Rc<Connection>> {
        let conn = if self.db_path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(&self.db_path)?
        };
        if let Some(millis) = self.busy_timeout_ms {
            conn.busy_timeout(Duration::from_millis(millis))?;
        }
        Ok(Rc::new(conn))
    }
}

/// A validated SQL command bound to a connection.
///
/// Every run prepares the command afresh, so one `SqliteStatement` can be
/// queried several times while earlier cursors are still being read.
#[derive(Debug)]
pub struct SqliteStatement {
    conn: Rc<Connection>,
    query: SqlQuery,
    closed: Cell<bool>,
}

impl SqliteStatement {
    /// Checks that the SQL compiles and that every parameter name exists.
    pub fn prepare(conn: &Rc<Connection>, query: SqlQuery) -> SqlResult<Rc<Self>> {
        let statement = Self {
            conn: Rc::clone(conn),
            query,
            closed: Cell::new(false),
        };
        statement.bound()?;
        Ok(Rc::new(statement))
    }

    pub fn sql(&self) -> &str {
        &self.query.statement
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Run the command, returning the number of changed rows
    pub fn execute(&self) -> SqlResult<usize> {
        self.ensure_open()?;
        let mut stmt = self.bound()?;
        Ok(stmt.raw_execute()?)
    }

    /// Run the command and read every row into a new cursor
    pub fn query(self: &Rc<Self>) -> SqlResult<Rc<SqliteCursor>> {
        self.ensure_open()?;
        let mut stmt = self.bound()?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let column_count = columns.len();

        let mut rows = stmt.raw_query();
        let mut buffered = VecDeque::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(column_count);
            for idx in 0..column_count {
                values.push(Value::from(row.get_ref(idx)?));
            }
            buffered.push_back(values);
        }

        Ok(Rc::new(SqliteCursor {
            statement: Rc::clone(self),
            columns,
            row_count: buffered.len(),
            rows: RefCell::new(buffered),
            closed: Cell::new(false),
        }))
    }

    fn ensure_open(&self) -> SqlResult<()> {
        if self.closed.get() {
            return Err(SqlError::Closed("statement"));
        }
        Ok(())
    }

    fn bound(&self) -> SqlResult<rusqlite::Statement<'_>> {
        let mut stmt = self.conn.prepare(&self.query.statement)?;
        for (name, value) in &self.query.params.values {
            let name = if name.starts_with([':', '@', '$']) {
                name.clone()
            } else {
                format!(":{}", name)
            };
            let idx = stmt
                .parameter_index(&name)?
                .ok_or_else(|| rusqlite::Error::InvalidParameterName(name.clone()))?;
            stmt.raw_bind_parameter(idx, value)?;
        }
        Ok(stmt)
    }
}

impl Statement for SqliteStatement {
    fn close(&self) -> rusqlite::Result<()> {
        self.closed.set(true);
        Ok(())
    }
}

/// Rows produced by one run of a [`SqliteStatement`]
#[derive(Debug)]
pub struct SqliteCursor {
    statement: Rc<SqliteStatement>,
    columns: Vec<String>,
    row_count: usize,
    rows: RefCell<VecDeque<Vec<Value>>>,
    closed: Cell<bool>,
}

impl SqliteCursor {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of rows the query produced
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    pub fn next_row(&self) -> SqlResult<Option<Vec<Value>>> {
        if self.closed.get() {
            return Err(SqlError::Closed("cursor"));
        }
        Ok(self.rows.borrow_mut().pop_front())
    }
}

impl Cursor for SqliteCursor {
    fn statement(&self) -> rusqlite::Result<Option<StatementHandle>> {
        if self.closed.get() {
            return Err(rusqlite::Error::SqliteFailure(
                ffi::Error::new(ffi::SQLITE_MISUSE),
                Some("cursor is closed".to_string()),
            ));
        }
        let statement: StatementHandle = self.statement.clone();
        Ok(Some(statement))
    }

    fn close(&self) -> rusqlite::Result<()> {
        self.closed.set(true);
        self.rows.borrow_mut().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> Rc<Connection> {
        let conn = SqliteConfig::default().open().unwrap();
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, active INTEGER);
             INSERT INTO users (name, active) VALUES ('ann', 1), ('bob', 0);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_query_reads_all_rows() {
        let conn = users();
        let st = SqliteStatement::prepare(&conn, SqlQuery::new("SELECT id, name FROM users ORDER BY id")).unwrap();
        let cursor = st.query().unwrap();
        assert_eq!(cursor.columns(), ["id", "name"]);
        assert_eq!(cursor.row_count(), 2);
        assert_eq!(
            cursor.next_row().unwrap(),
            Some(vec![Value::Integer(1), Value::Text("ann".into())])
        );
        assert!(cursor.next_row().unwrap().is_some());
        assert_eq!(cursor.next_row().unwrap(), None);
    }

    #[test]
    fn test_named_params_with_and_without_prefix() {
        let conn = users();
        let query = SqlQuery::new("SELECT name FROM users WHERE active = :active AND id > $min")
            .with_params(Params::new().with_value("active", true).with_value("$min", 0));
        let cursor = SqliteStatement::prepare(&conn, query).unwrap().query().unwrap();
        assert_eq!(cursor.next_row().unwrap(), Some(vec![Value::Text("ann".into())]));
    }

    #[test]
    fn test_unknown_param_fails_at_prepare() {
        let conn = users();
        let query = SqlQuery::new("SELECT * FROM users").with_params(Params::new().with_value("nope", 1));
        let err = SqliteStatement::prepare(&conn, query).unwrap_err();
        assert!(matches!(err, SqlError::Sqlite(rusqlite::Error::InvalidParameterName(_))));
    }

    #[test]
    fn test_closed_statement_refuses_to_run() {
        let conn = users();
        let st = SqliteStatement::prepare(&conn, SqlQuery::new("DELETE FROM users")).unwrap();
        Statement::close(&*st).unwrap();
        assert!(matches!(st.execute(), Err(SqlError::Closed("statement"))));
        assert!(matches!(st.query(), Err(SqlError::Closed("statement"))));
    }

    #[test]
    fn test_cursor_reports_owner_until_closed() {
        let conn = users();
        let st = SqliteStatement::prepare(&conn, SqlQuery::new("SELECT 1")).unwrap();
        let cursor = st.query().unwrap();
        let owner = cursor.statement().unwrap().unwrap();
        assert!(std::ptr::eq(
            Rc::as_ptr(&owner) as *const (),
            Rc::as_ptr(&st) as *const ()
        ));

        Cursor::close(&*cursor).unwrap();
        assert!(cursor.statement().is_err());
        assert!(matches!(cursor.next_row(), Err(SqlError::Closed("cursor"))));
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: SqliteConfig = serde_json::from_str(r#"{"busy_timeout_ms": 250}"#).unwrap();
        assert_eq!(config, SqliteConfig::default().with_busy_timeout(250));
    }
}
