//! An embeddable, persistent tag index.
//!
//! The index stores opaque byte blobs ("objects"), each bearing an unordered
//! set of opaque byte blobs ("tags"), and answers conjunctive queries of the
//! form *every tag in `all`, no tag in `none`*, paginated and bounded, in
//! ascending id order. Everything lives in an ordered key-value store
//! behind the [`kv::Kv`] contract; posting lists are intersected by
//! coordinated range cursors and are never materialised in memory.
//!
//! ```
//! use tagdex::{Find, TagIndex};
//!
//! # fn main() -> Result<(), tagdex::Error> {
//! let index = TagIndex::memory()?;
//!
//! let mut tx = index.begin()?;
//! tx.add("report.pdf", ["finance", "2026"])?;
//! tx.add("notes.txt", ["2026"])?;
//! tx.commit()?;
//!
//! let tx = index.begin()?;
//! let hits = tx.find(&Find::all(["2026"]).without(["finance"]))?;
//! assert_eq!(tx.resolve(hits[0])?.as_deref(), Some(b"notes.txt".as_ref()));
//! # Ok(())
//! # }
//! ```

mod error;
mod id;
mod index;
pub mod kv;
mod scan;
pub mod schema;

pub use crate::{
    error::{Corruption, Error, InvalidInput, Result},
    id::{Datum, ID_LEN, Id},
    index::{Find, MutTx, TagIndex},
};

/// [`TagIndex`] options.
#[derive(Clone, Copy, Debug)]
pub struct Options {
    /// The largest blob (object or tag) the index accepts, in bytes.
    ///
    /// Blobs are stored whole in the identity table; anything larger should
    /// be referenced by a caller-side digest instead.
    ///
    /// Default: 64 KiB
    pub max_blob_len: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_blob_len: 64 * 1024,
        }
    }
}
