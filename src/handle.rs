//! Contract the handler expects from the database layer.
//!
//! Handles are shared (`Rc`) so the caller keeps using a cursor or
//! statement after registering it. The handler never looks inside a handle;
//! it only closes it and, for cursors, asks for the owning statement.

use std::rc::Rc;

/// Shared handle over a prepared or executed command
pub type StatementHandle = Rc<dyn Statement>;

/// Shared handle over the rows of a query
pub type CursorHandle = Rc<dyn Cursor>;

pub trait Statement {
    /// Release the statement. Closing twice must be harmless.
    fn close(&self) -> rusqlite::Result<()>;
}

pub trait Cursor {
    /// The statement that produced this cursor, if the driver knows it.
    fn statement(&self) -> rusqlite::Result<Option<StatementHandle>>;

    /// Release the cursor. Closing twice must be harmless.
    fn close(&self) -> rusqlite::Result<()>;
}

/// Identity of a shared handle: the address of its allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(usize);

/// Two clones of the same `Rc`, or an `Rc<T>` and the `Rc<dyn Trait>` it was
/// coerced into, share one id.
pub fn handle_id<T: ?Sized>(handle: &Rc<T>) -> HandleId {
    HandleId(Rc::as_ptr(handle) as *const () as usize)
}
