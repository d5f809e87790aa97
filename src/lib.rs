//! Bulk cleanup of SQLite statements and cursors for the Runar ecosystem.
//!
//! # Intention
//!
//! - Track every statement and cursor opened during a unit of work.
//! - Release all of them with a single `close()` call, best-effort.
//! - Surface handler failures through one domain error type.
//!
//! # Architectural Boundaries
//!
//! - Only resource bookkeeping and the thin SQLite adapter belong here.
//! - No query building, pooling or transaction management.
//!
//! ```rust
//! use rust_sql_closeable::sqlite::{SqlQuery, SqliteConfig, SqliteStatement};
//! use rust_sql_closeable::CloseableHandler;
//!
//! let conn = SqliteConfig::default().open()?;
//! let count = CloseableHandler::scope(|handler| {
//!     let st = handler.add_statement(Some(SqliteStatement::prepare(
//!         &conn,
//!         SqlQuery::new("SELECT 1 UNION ALL SELECT 2"),
//!     )?))?;
//!     let cursor = handler.add_cursor(Some(st.query()?))?;
//!     Ok::<_, rust_sql_closeable::SqlError>(cursor.row_count())
//! })?;
//! assert_eq!(count, 2);
//! # Ok::<(), rust_sql_closeable::SqlError>(())
//! ```

pub mod error;
pub mod handle;
pub mod handler;
pub mod sqlite;

pub use error::{SqlError, SqlHandlerError, SqlResult};
pub use handle::{handle_id, Cursor, CursorHandle, HandleId, Statement, StatementHandle};
pub use handler::{CloseableHandler, LeakReport};
