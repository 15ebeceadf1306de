//! Persisted table layout.
//!
//! Six tables over the KV, all with fixed-width keys so that concatenation is
//! unambiguous and "all postings of T" is a plain prefix range:
//!
//! ```text
//! TAG_TO_OBJECT   key [tag_id:16][object_id:16]   value (empty)
//! OBJECT_TO_TAG   key [object_id:16][tag_id:16]   value (empty)
//! ID_TO_BLOB      key [id:16]                     value blob
//! TAG_COUNT       key [tag_id:16]                 value u32 BE
//! OBJECT_COUNT    key [object_id:16]              value u32 BE
//! META            key "format"                    value u32 BE
//! ```
//!
//! Count rows are removed when they reach zero; a missing row means zero.

use crate::id::{Id, ID_LEN};
use crate::kv::TableId;

/// Forward posting map: all objects bearing a given tag.
pub const TAG_TO_OBJECT: TableId = TableId(0);
/// Reverse posting map: all tags borne by a given object.
pub const OBJECT_TO_TAG: TableId = TableId(1);
/// Identity store: id back to the blob it was digested from.
pub const ID_TO_BLOB: TableId = TableId(2);
/// Per-tag posting cardinality.
pub const TAG_COUNT: TableId = TableId(3);
/// Per-object posting cardinality.
pub const OBJECT_COUNT: TableId = TableId(4);
/// Format marker and other singletons.
pub const META: TableId = TableId(5);

pub const POSTING_KEY_LEN: usize = 2 * ID_LEN;

pub const FORMAT_KEY: &[u8] = b"format";
pub const FORMAT_VERSION: u32 = 1;

pub fn table_name(table: TableId) -> &'static str {
    match table {
        TAG_TO_OBJECT => "tag_to_object",
        OBJECT_TO_TAG => "object_to_tag",
        ID_TO_BLOB => "id_to_blob",
        TAG_COUNT => "tag_count",
        OBJECT_COUNT => "object_count",
        META => "meta",
        TableId(_) => "unknown",
    }
}

/// Concatenate a posting key. `lead` is the id the range scan groups by.
pub fn posting_key(lead: Id, trail: Id) -> [u8; POSTING_KEY_LEN] {
    let mut key = [0; POSTING_KEY_LEN];
    key[..ID_LEN].copy_from_slice(lead.as_bytes());
    key[ID_LEN..].copy_from_slice(trail.as_bytes());
    key
}

/// The trailing id of a posting key, or `None` if the key has the wrong width.
pub fn posting_trail(key: &[u8]) -> Option<Id> {
    if key.len() != POSTING_KEY_LEN {
        return None;
    }
    Id::from_slice(&key[ID_LEN..]).ok()
}

pub fn encode_u32(n: u32) -> [u8; 4] {
    n.to_be_bytes()
}

/// Decode a big-endian u32 row, or `None` if the value has the wrong width.
pub fn read_u32(value: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = value.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}
