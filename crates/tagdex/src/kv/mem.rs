//! In-memory implementation of the KV contract.
//!
//! Transactions are serializable by construction: `begin` takes the
//! store-wide lock and the guard lives inside the returned [`MemTx`], so at
//! most one transaction is in flight at a time. Writes accumulate in
//! per-table insert/delete overlays which are merged into the committed
//! tables on commit and simply dropped on rollback. This keeps rollback free
//! and leaves the committed state untouched until the commit point.
//!
//! Two overlay invariants, mirrored by `set` and `delete`: a key is never in
//! both the insert and the delete overlay of a table, and every key in a
//! delete overlay exists in the committed table.

use std::collections::{BTreeMap, BTreeSet, btree_map};
use std::iter::Peekable;
use std::mem;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

use super::{Cursor, Kv, Result, TableId, Tx};

type Bytes = Box<[u8]>;
type Table = BTreeMap<Bytes, Bytes>;

#[derive(Default, Debug)]
struct Committed {
    tables: BTreeMap<TableId, Table>,
}

/// An in-memory store. Clones share the same tables.
#[derive(Clone, Default, Debug)]
pub struct Memory {
    inner: Arc<Mutex<Committed>>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Kv for Memory {
    type Tx = MemTx;

    fn begin(&self) -> Result<MemTx> {
        Ok(MemTx {
            committed: self.inner.lock_arc(),
            inserts: BTreeMap::new(),
            deletes: BTreeMap::new(),
        })
    }

    fn clear(&self) -> Result<()> {
        self.inner.lock().tables.clear();
        Ok(())
    }

    fn checkpoint(&self) -> Result<()> {
        // Nothing more stable than memory to flush to.
        Ok(())
    }
}

pub struct MemTx {
    committed: ArcMutexGuard<RawMutex, Committed>,
    inserts: BTreeMap<TableId, Table>,
    deletes: BTreeMap<TableId, BTreeSet<Bytes>>,
}

impl Tx for MemTx {
    type Cursor<'a>
        = MemCursor<'a>
    where
        Self: 'a;

    fn get(&self, table: TableId, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if self.deletes.get(&table).is_some_and(|d| d.contains(key)) {
            return Ok(None);
        }
        if let Some(value) = self.inserts.get(&table).and_then(|t| t.get(key)) {
            return Ok(Some(value.to_vec()));
        }
        Ok(self
            .committed
            .tables
            .get(&table)
            .and_then(|t| t.get(key))
            .map(|value| value.to_vec()))
    }

    fn set(&mut self, table: TableId, key: &[u8], value: &[u8]) -> Result<()> {
        if let Some(deleted) = self.deletes.get_mut(&table) {
            deleted.remove(key);
        }
        self.inserts
            .entry(table)
            .or_default()
            .insert(key.into(), value.into());
        Ok(())
    }

    fn delete(&mut self, table: TableId, key: &[u8]) -> Result<bool> {
        let mut present = false;
        if let Some(inserted) = self.inserts.get_mut(&table) {
            present |= inserted.remove(key).is_some();
        }
        if self.committed.tables.get(&table).is_some_and(|t| t.contains_key(key)) {
            present |= self.deletes.entry(table).or_default().insert(key.into());
        }
        Ok(present)
    }

    fn cursor(&self, table: TableId, from: &[u8], inclusive: bool) -> Result<MemCursor<'_>> {
        let start: Bound<&[u8]> = if inclusive {
            Bound::Included(from)
        } else {
            Bound::Excluded(from)
        };
        Ok(MemCursor {
            committed: self
                .committed
                .tables
                .get(&table)
                .map(|t| t.range::<[u8], _>((start, Bound::Unbounded)).peekable()),
            inserted: self
                .inserts
                .get(&table)
                .map(|t| t.range::<[u8], _>((start, Bound::Unbounded)).peekable()),
            deleted: self.deletes.get(&table),
        })
    }

    fn commit(mut self) -> Result<()> {
        let committed = &mut *self.committed;
        for (table, deleted) in &self.deletes {
            if let Some(t) = committed.tables.get_mut(table) {
                for key in deleted {
                    t.remove(key);
                }
            }
        }
        for (table, inserted) in mem::take(&mut self.inserts) {
            committed.tables.entry(table).or_default().extend(inserted);
        }
        Ok(())
    }
}

/// Merge of the committed range and the insert overlay, ascending by key,
/// skipping keys in the delete overlay. On a shared key the overlay value
/// wins (it is the more recent write).
pub struct MemCursor<'a> {
    committed: Option<Peekable<btree_map::Range<'a, Bytes, Bytes>>>,
    inserted: Option<Peekable<btree_map::Range<'a, Bytes, Bytes>>>,
    deleted: Option<&'a BTreeSet<Bytes>>,
}

impl<'a> MemCursor<'a> {
    /// The next committed entry not shadowed by the delete overlay. The
    /// returned borrows are of the table, not the cursor, so the caller can
    /// still advance afterwards.
    fn peek_committed(&mut self) -> Option<(&'a Bytes, &'a Bytes)> {
        let iter = self.committed.as_mut()?;
        while let Some(&(key, value)) = iter.peek() {
            if self.deleted.is_some_and(|d| d.contains(key.as_ref())) {
                iter.next();
                continue;
            }
            return Some((key, value));
        }
        None
    }
}

impl Cursor for MemCursor<'_> {
    fn next(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let inserted = self.inserted.as_mut().and_then(|it| it.peek().copied());
        let committed = self.peek_committed();

        let advance = |iter: &mut Option<Peekable<btree_map::Range<'_, Bytes, Bytes>>>| {
            if let Some(it) = iter.as_mut() {
                it.next();
            }
        };

        let (key, value) = match (inserted, committed) {
            (None, None) => return Ok(None),
            (Some(ins), None) => {
                advance(&mut self.inserted);
                ins
            }
            (None, Some(com)) => {
                advance(&mut self.committed);
                com
            }
            (Some(ins), Some(com)) => {
                if ins.0 <= com.0 {
                    if ins.0 == com.0 {
                        advance(&mut self.committed);
                    }
                    advance(&mut self.inserted);
                    ins
                } else {
                    advance(&mut self.committed);
                    com
                }
            }
        };
        Ok(Some((key.to_vec(), value.to_vec())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const T: TableId = TableId(0);

    fn drain(mut cursor: MemCursor<'_>) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut out = Vec::new();
        while let Some(entry) = cursor.next().unwrap() {
            out.push(entry);
        }
        out
    }

    fn pairs(entries: &[(&[u8], &[u8])]) -> Vec<(Vec<u8>, Vec<u8>)> {
        entries.iter().map(|(k, v)| (k.to_vec(), v.to_vec())).collect()
    }

    #[test]
    fn reads_observe_own_writes() {
        let kv = Memory::new();
        let mut tx = kv.begin().unwrap();
        assert_eq!(tx.get(T, b"k").unwrap(), None);
        tx.set(T, b"k", b"v").unwrap();
        assert_eq!(tx.get(T, b"k").unwrap(), Some(b"v".to_vec()));
        tx.delete(T, b"k").unwrap();
        assert_eq!(tx.get(T, b"k").unwrap(), None);
    }

    #[test]
    fn drop_discards_commit_persists() {
        let kv = Memory::new();

        let mut tx = kv.begin().unwrap();
        tx.set(T, b"k", b"v").unwrap();
        drop(tx);
        assert_eq!(kv.begin().unwrap().get(T, b"k").unwrap(), None);

        let mut tx = kv.begin().unwrap();
        tx.set(T, b"k", b"v").unwrap();
        tx.commit().unwrap();
        assert_eq!(kv.begin().unwrap().get(T, b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn delete_reports_presence() {
        let kv = Memory::new();
        let mut tx = kv.begin().unwrap();
        tx.set(T, b"a", b"").unwrap();
        tx.commit().unwrap();

        let mut tx = kv.begin().unwrap();
        assert!(tx.delete(T, b"a").unwrap());
        assert!(!tx.delete(T, b"a").unwrap(), "second delete finds nothing");
        assert!(!tx.delete(T, b"b").unwrap());

        tx.set(T, b"b", b"").unwrap();
        assert!(tx.delete(T, b"b").unwrap(), "uncommitted insert is present");
    }

    #[test]
    fn delete_masks_committed_copy_under_overlay() {
        let kv = Memory::new();
        let mut tx = kv.begin().unwrap();
        tx.set(T, b"k", b"old").unwrap();
        tx.commit().unwrap();

        let mut tx = kv.begin().unwrap();
        tx.set(T, b"k", b"new").unwrap();
        assert!(tx.delete(T, b"k").unwrap());
        assert_eq!(tx.get(T, b"k").unwrap(), None);
        tx.commit().unwrap();

        assert_eq!(kv.begin().unwrap().get(T, b"k").unwrap(), None);
    }

    #[test]
    fn cursor_merges_in_key_order() {
        let kv = Memory::new();
        let mut tx = kv.begin().unwrap();
        tx.set(T, b"b", b"1").unwrap();
        tx.set(T, b"d", b"2").unwrap();
        tx.commit().unwrap();

        let mut tx = kv.begin().unwrap();
        tx.set(T, b"a", b"3").unwrap();
        tx.set(T, b"c", b"4").unwrap();
        let got = drain(tx.cursor(T, b"", true).unwrap());
        assert_eq!(
            got,
            pairs(&[(b"a", b"3"), (b"b", b"1"), (b"c", b"4"), (b"d", b"2")])
        );
    }

    #[test]
    fn cursor_skips_deleted_and_prefers_overlay() {
        let kv = Memory::new();
        let mut tx = kv.begin().unwrap();
        tx.set(T, b"a", b"old").unwrap();
        tx.set(T, b"b", b"gone").unwrap();
        tx.set(T, b"c", b"kept").unwrap();
        tx.commit().unwrap();

        let mut tx = kv.begin().unwrap();
        tx.set(T, b"a", b"new").unwrap();
        tx.delete(T, b"b").unwrap();
        let got = drain(tx.cursor(T, b"", true).unwrap());
        assert_eq!(got, pairs(&[(b"a", b"new"), (b"c", b"kept")]));
    }

    #[test]
    fn cursor_start_bounds() {
        let kv = Memory::new();
        let mut tx = kv.begin().unwrap();
        for key in [b"a", b"b", b"c"] {
            tx.set(T, key, b"").unwrap();
        }
        tx.commit().unwrap();

        let tx = kv.begin().unwrap();
        let from_b = drain(tx.cursor(T, b"b", true).unwrap());
        assert_eq!(from_b, pairs(&[(b"b", b""), (b"c", b"")]));
        let after_b = drain(tx.cursor(T, b"b", false).unwrap());
        assert_eq!(after_b, pairs(&[(b"c", b"")]));
    }

    #[test]
    fn clear_wipes_all_tables() {
        let kv = Memory::new();
        let mut tx = kv.begin().unwrap();
        tx.set(TableId(0), b"a", b"").unwrap();
        tx.set(TableId(1), b"b", b"").unwrap();
        tx.commit().unwrap();

        kv.clear().unwrap();
        let tx = kv.begin().unwrap();
        assert_eq!(tx.get(TableId(0), b"a").unwrap(), None);
        assert_eq!(tx.get(TableId(1), b"b").unwrap(), None);
    }
}
