use thiserror::Error;

use crate::id::{Id, ID_LEN};
use crate::kv;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Top-level error of the public surface.
///
/// "Absent" is not represented here: lookups that find nothing return
/// `Option`/empty collections. Everything else is either a caller mistake
/// ([`InvalidInput`]), a violated storage invariant ([`Corruption`]), or a
/// failure of the underlying store ([`kv::Error`]).
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    InvalidInput(#[from] InvalidInput),
    #[error(transparent)]
    Corruption(#[from] Corruption),
    #[error("kv: {0}")]
    Kv(#[from] kv::Error),
}

/// A malformed argument. The store is left untouched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidInput {
    #[error("query has no present terms")]
    EmptyQuery,
    #[error("blobs must be non-empty")]
    EmptyBlob,
    #[error("blob of {len} bytes exceeds the configured maximum of {max}")]
    BlobTooLarge { len: usize, max: usize },
    #[error("expected a {ID_LEN}-byte id, got {len} bytes")]
    BadIdLength { len: usize },
}

/// An on-disk invariant did not hold.
///
/// Any of these aborts the surrounding transaction; none of them are
/// recoverable from within this crate.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Corruption {
    /// A decrement found no count row to decrement.
    #[error("count underflow for {id} in {table}")]
    CounterUnderflow { table: &'static str, id: Id },
    /// A count row decoded to zero. Zero-valued rows are never written;
    /// the row is removed instead.
    #[error("zero count row for {id} in {table}")]
    ZeroCountRow { table: &'static str, id: Id },
    /// A count row with a width other than 4 bytes.
    #[error("malformed count row for {id} in {table}: {len} bytes")]
    BadCount { table: &'static str, id: Id, len: usize },
    /// A count row disagreeing with the postings it counts.
    #[error("count row for {id} in {table} holds {stored} but {counted} postings exist")]
    CountMismatch {
        table: &'static str,
        id: Id,
        stored: u32,
        counted: u32,
    },
    /// A posting key with a width other than 32 bytes.
    #[error("malformed posting key of {len} bytes")]
    BadPostingKey { len: usize },
    /// A posting present in one direction but missing its mirror entry.
    #[error("posting ({tag}, {object}) is missing its mirror entry")]
    AsymmetricPosting { tag: Id, object: Id },
    #[error("unreadable format marker of {len} bytes")]
    BadFormatMarker { len: usize },
    #[error("unsupported on-disk format version {found} (supported: {supported})")]
    UnsupportedFormat { found: u32, supported: u32 },
}
