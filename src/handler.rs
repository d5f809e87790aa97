//! Registry of the statements and cursors opened during a unit of work.
//!
//! Register every handle as it is opened, then release all of them with a
//! single [`CloseableHandler::close`]. Prefer [`CloseableHandler::scope`],
//! which closes on every exit path. Dropping a handler that still tracks
//! resources is reported as a leak and cleaned up, but that is only a
//! diagnostic fallback.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::error::{SqlError, SqlHandlerError, SqlResult};
use crate::handle::{handle_id, Cursor, CursorHandle, HandleId, Statement, StatementHandle};

/// What was still registered when an unclosed handler was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeakReport {
    pub cursors: usize,
    pub statements: usize,
}

type LeakHook = Box<dyn Fn(&LeakReport)>;

#[derive(Default)]
pub struct CloseableHandler {
    cursors: HashMap<HandleId, CursorHandle>,
    statements: HashMap<HandleId, StatementHandle>,
    leak_hook: Option<LeakHook>,
    // set while running inside `run`/`scope`, where drop is an expected exit path
    scoped: bool,
}

impl CloseableHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a new handler. Same as [`CloseableHandler::new`].
    pub fn service() -> Self {
        Self::new()
    }

    /// Called with the leaked counts when the handler is dropped unclosed.
    pub fn with_leak_hook(mut self, hook: impl Fn(&LeakReport) + 'static) -> Self {
        self.leak_hook = Some(Box::new(hook));
        self
    }

    /// Runs `f` against a fresh handler and closes it afterwards, whether
    /// `f` returns `Ok`, returns `Err` or panics.
    pub fn scope<T, E, F>(f: F) -> Result<T, E>
    where
        F: FnOnce(&mut CloseableHandler) -> Result<T, E>,
    {
        Self::new().run(f)
    }

    /// Like [`CloseableHandler::scope`], for an already configured handler.
    pub fn run<T, E, F>(mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut CloseableHandler) -> Result<T, E>,
    {
        self.scoped = true;
        let result = f(&mut self);
        self.close();
        result
    }

    /// Registers a cursor to be closed by [`CloseableHandler::close`] and
    /// hands it back.
    pub fn add_cursor<C: Cursor + 'static>(&mut self, cursor: Option<Rc<C>>) -> SqlResult<Rc<C>> {
        let cursor = cursor.ok_or(SqlError::InvalidArgument("cursor"))?;
        self.track_cursor(cursor.clone());
        Ok(cursor)
    }

    /// Same as [`CloseableHandler::add_cursor`] for an already type-erased handle.
    pub fn add_cursor_handle(&mut self, cursor: Option<CursorHandle>) -> SqlResult<CursorHandle> {
        let cursor = cursor.ok_or(SqlError::InvalidArgument("cursor"))?;
        self.track_cursor(cursor.clone());
        Ok(cursor)
    }

    /// Registers a cursor and, when `register_statement` is set, the
    /// statement that produced it.
    ///
    /// A failing statement lookup is returned as [`SqlError::Handler`]; the
    /// cursor itself stays registered.
    pub fn add_cursor_with_statement<C: Cursor + 'static>(
        &mut self,
        cursor: Option<Rc<C>>,
        register_statement: bool,
    ) -> SqlResult<Rc<C>> {
        let cursor = self.add_cursor(cursor)?;
        if register_statement {
            self.track_owner(&*cursor)?;
        }
        Ok(cursor)
    }

    /// Same as [`CloseableHandler::add_cursor_with_statement`] for an already
    /// type-erased handle.
    pub fn add_cursor_handle_with_statement(
        &mut self,
        cursor: Option<CursorHandle>,
        register_statement: bool,
    ) -> SqlResult<CursorHandle> {
        let cursor = self.add_cursor_handle(cursor)?;
        if register_statement {
            self.track_owner(&*cursor)?;
        }
        Ok(cursor)
    }

    /// Registers a statement to be closed by [`CloseableHandler::close`] and
    /// hands it back.
    pub fn add_statement<S: Statement + 'static>(&mut self, statement: Option<Rc<S>>) -> SqlResult<Rc<S>> {
        let statement = statement.ok_or(SqlError::InvalidArgument("statement"))?;
        self.track_statement(statement.clone());
        Ok(statement)
    }

    /// Same as [`CloseableHandler::add_statement`] for an already type-erased
    /// handle, such as the one returned by [`Cursor::statement`].
    pub fn add_statement_handle(&mut self, statement: Option<StatementHandle>) -> SqlResult<StatementHandle> {
        let statement = statement.ok_or(SqlError::InvalidArgument("statement"))?;
        self.track_statement(statement.clone());
        Ok(statement)
    }

    /// Stops tracking the cursor; closing it becomes the caller's job.
    pub fn ignore_cursor<C: Cursor + ?Sized>(&mut self, cursor: Option<&Rc<C>>) {
        if let Some(cursor) = cursor {
            self.cursors.remove(&handle_id(cursor));
        }
    }

    /// Stops tracking the statement; closing it becomes the caller's job.
    pub fn ignore_statement<S: Statement + ?Sized>(&mut self, statement: Option<&Rc<S>>) {
        if let Some(statement) = statement {
            self.statements.remove(&handle_id(statement));
        }
    }

    pub fn is_cursor_tracked<C: Cursor + ?Sized>(&self, cursor: &Rc<C>) -> bool {
        self.cursors.contains_key(&handle_id(cursor))
    }

    pub fn is_statement_tracked<S: Statement + ?Sized>(&self, statement: &Rc<S>) -> bool {
        self.statements.contains_key(&handle_id(statement))
    }

    pub fn cursor_count(&self) -> usize {
        self.cursors.len()
    }

    pub fn statement_count(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty() && self.statements.is_empty()
    }

    fn track_cursor(&mut self, cursor: CursorHandle) {
        self.cursors.entry(handle_id(&cursor)).or_insert(cursor);
    }

    fn track_statement(&mut self, statement: StatementHandle) {
        self.statements.entry(handle_id(&statement)).or_insert(statement);
    }

    fn track_owner(&mut self, cursor: &dyn Cursor) -> SqlResult<()> {
        let owner = cursor.statement().map_err(|err| {
            SqlHandlerError::with_message_and_cause(
                "unable to retrieve the statement that produced the cursor",
                err,
            )
        })?;
        if let Some(statement) = owner {
            self.track_statement(statement);
        }
        Ok(())
    }

    /// Closes every tracked cursor, then every tracked statement, and
    /// forgets all of them.
    ///
    /// Close failures are logged and dropped; one failing handle never
    /// stops the others from being closed.
    pub fn close(&mut self) {
        for (_, cursor) in self.cursors.drain() {
            if let Err(err) = cursor.close() {
                debug!(error = %err, "ignoring failure while closing cursor");
            }
        }

        for (_, statement) in self.statements.drain() {
            if let Err(err) = statement.close() {
                debug!(error = %err, "ignoring failure while closing statement");
            }
        }
    }
}

impl fmt::Debug for CloseableHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseableHandler")
            .field("cursors", &self.cursors.len())
            .field("statements", &self.statements.len())
            .field("scoped", &self.scoped)
            .finish()
    }
}

impl Drop for CloseableHandler {
    fn drop(&mut self) {
        if self.is_empty() {
            return;
        }

        if !self.scoped {
            let report = LeakReport {
                cursors: self.cursors.len(),
                statements: self.statements.len(),
            };
            warn!(
                cursors = report.cursors,
                statements = report.statements,
                "resources leaked, close() was never called"
            );
            if let Some(hook) = &self.leak_hook {
                hook(&report);
            }
        }

        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug, Default)]
    struct CountingStatement {
        closes: Cell<usize>,
    }

    impl Statement for CountingStatement {
        fn close(&self) -> rusqlite::Result<()> {
            self.closes.set(self.closes.get() + 1);
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct CountingCursor {
        closes: Cell<usize>,
    }

    impl Cursor for CountingCursor {
        fn statement(&self) -> rusqlite::Result<Option<StatementHandle>> {
            Ok(None)
        }

        fn close(&self) -> rusqlite::Result<()> {
            self.closes.set(self.closes.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn test_add_returns_same_handle() {
        let mut handler = CloseableHandler::new();
        let st = Rc::new(CountingStatement::default());
        let returned = handler.add_statement(Some(st.clone())).unwrap();
        assert!(Rc::ptr_eq(&st, &returned));
        assert!(handler.is_statement_tracked(&st));
        handler.close();
    }

    #[test]
    fn test_none_is_rejected_without_mutation() {
        let mut handler = CloseableHandler::new();
        let err = handler.add_cursor::<CountingCursor>(None).unwrap_err();
        assert!(matches!(err, SqlError::InvalidArgument("cursor")));
        let err = handler.add_statement::<CountingStatement>(None).unwrap_err();
        assert!(matches!(err, SqlError::InvalidArgument("statement")));
        let err = handler
            .add_cursor_with_statement::<CountingCursor>(None, true)
            .unwrap_err();
        assert!(matches!(err, SqlError::InvalidArgument("cursor")));
        assert!(handler.is_empty());
    }

    #[test]
    fn test_close_empty_handler() {
        let mut handler = CloseableHandler::new();
        handler.close();
        handler.close();
        assert!(handler.is_empty());
    }

    #[test]
    fn test_cursor_closed_once() {
        let cursor = Rc::new(CountingCursor::default());
        let mut handler = CloseableHandler::new();
        handler.add_cursor(Some(cursor.clone())).unwrap();
        handler.add_cursor(Some(cursor.clone())).unwrap();
        assert_eq!(handler.cursor_count(), 1);
        handler.close();
        assert_eq!(cursor.closes.get(), 1);
        assert_eq!(handler.cursor_count(), 0);
    }

    #[test]
    fn test_debug_shows_counts() {
        let mut handler = CloseableHandler::new();
        handler
            .add_statement(Some(Rc::new(CountingStatement::default())))
            .unwrap();
        let rendered = format!("{:?}", handler);
        assert!(rendered.contains("statements: 1"));
        handler.close();
    }
}
