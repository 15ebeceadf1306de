//! The ordered key-value contract the index is built over.
//!
//! The index consumes a small surface: tables addressed by a [`TableId`],
//! each a map from bytes to bytes sorted byte-lexicographically, with point
//! get/set/delete, ascending range cursors, and serializable transactions.
//! Anything providing this contract can back the index; the crate ships
//! [`Memory`], an in-memory implementation used by the test-suite and by
//! embedders who do not need durability.

use std::io;

use thiserror::Error;

mod mem;

pub use mem::{MemCursor, MemTx, Memory};

/// Address of a table within the store.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TableId(pub u8);

/// Failure of the underlying store. The surrounding operation is aborted;
/// the caller may retry it on a fresh transaction.
#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o: {0}")]
    Io(#[from] io::Error),
    #[error("transaction conflict")]
    Conflict,
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Handle on a store. Cheap to clone where the implementation allows it.
pub trait Kv {
    type Tx: Tx;

    /// Begin a serializable read/write transaction.
    fn begin(&self) -> Result<Self::Tx>;

    /// Wipe every table. For tests.
    fn clear(&self) -> Result<()>;

    /// Force committed state to stable storage.
    fn checkpoint(&self) -> Result<()>;
}

/// A serializable transaction.
///
/// Reads observe the transaction's own prior writes. Dropping a transaction
/// without [`Tx::commit`] discards its writes. Cursors borrow the transaction
/// and cannot outlive it; writing requires exclusive access, so no cursor can
/// be live across a write.
pub trait Tx {
    type Cursor<'a>: Cursor
    where
        Self: 'a;

    fn get(&self, table: TableId, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn set(&mut self, table: TableId, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove `key`, reporting whether it was present.
    fn delete(&mut self, table: TableId, key: &[u8]) -> Result<bool>;

    /// Open an ascending cursor positioned at the first key `>= from`
    /// (`> from` when `inclusive` is false).
    fn cursor(&self, table: TableId, from: &[u8], inclusive: bool) -> Result<Self::Cursor<'_>>;

    fn commit(self) -> Result<()>;
}

/// An ascending range cursor. [`Cursor::next`] yields the entry under the
/// cursor and advances past it.
pub trait Cursor {
    fn next(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>>;
}
