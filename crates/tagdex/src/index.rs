//! The index handle and its transaction façade.
//!
//! All mutation paths funnel through `unlink` and the two counter helpers
//! `bump` / `cut`; counter upkeep is the main source of invariant bugs, so
//! there is exactly one place that increments and one that decrements, and
//! the decrement insists on finding a row.

use log::{debug, trace};

use crate::error::{Corruption, InvalidInput, Result};
use crate::id::{Datum, Id};
use crate::kv::{Cursor, Kv, Memory, TableId, Tx};
use crate::scan;
use crate::schema::{
    FORMAT_KEY, FORMAT_VERSION, ID_TO_BLOB, META, OBJECT_COUNT, OBJECT_TO_TAG, TAG_COUNT,
    TAG_TO_OBJECT, encode_u32, posting_key, posting_trail, read_u32, table_name,
};
use crate::Options;

/// Read a count row. `None` means zero (count rows are removed at zero, so a
/// stored zero is corruption, as is any width other than 4).
pub(crate) fn load_count<T: Tx>(tx: &T, table: TableId, id: Id) -> Result<Option<u32>> {
    let Some(value) = tx.get(table, id.as_bytes())? else {
        return Ok(None);
    };
    let count = read_u32(&value).ok_or(Corruption::BadCount {
        table: table_name(table),
        id,
        len: value.len(),
    })?;
    if count == 0 {
        return Err(Corruption::ZeroCountRow {
            table: table_name(table),
            id,
        }
        .into());
    }
    Ok(Some(count))
}

/// An embeddable tag index over a KV store.
///
/// The handle itself holds no state beyond the store and the options; all
/// reads and writes go through a [`MutTx`] obtained from [`TagIndex::begin`].
#[derive(Debug)]
pub struct TagIndex<K: Kv> {
    kv: K,
    opts: Options,
}

impl TagIndex<Memory> {
    /// An index over a fresh in-memory store. For tests and examples.
    pub fn memory() -> Result<Self> {
        Self::open(Memory::new(), Options::default())
    }
}

impl<K: Kv> TagIndex<K> {
    /// Open an index over `kv`, writing the format marker on first use and
    /// refusing stores written by an incompatible version.
    pub fn open(kv: K, opts: Options) -> Result<Self> {
        let mut tx = kv.begin()?;
        match tx.get(META, FORMAT_KEY)? {
            None => {
                debug!("initialising store at format version {FORMAT_VERSION}");
                tx.set(META, FORMAT_KEY, &encode_u32(FORMAT_VERSION))?;
                tx.commit()?;
            }
            Some(value) => {
                let found = read_u32(&value).ok_or(Corruption::BadFormatMarker {
                    len: value.len(),
                })?;
                if found != FORMAT_VERSION {
                    return Err(Corruption::UnsupportedFormat {
                        found,
                        supported: FORMAT_VERSION,
                    }
                    .into());
                }
                trace!("opened store at format version {found}");
            }
        }
        Ok(Self { kv, opts })
    }

    pub fn begin(&self) -> Result<MutTx<K::Tx>> {
        Ok(MutTx {
            tx: self.kv.begin()?,
            opts: self.opts,
        })
    }

    pub fn kv(&self) -> &K {
        &self.kv
    }

    /// Wipe the store, format marker included. For tests.
    pub fn clear(&self) -> Result<()> {
        Ok(self.kv.clear()?)
    }

    /// Force committed state to stable storage.
    pub fn checkpoint(&self) -> Result<()> {
        Ok(self.kv.checkpoint()?)
    }
}

/// A conjunctive query: objects bearing every term in `all` and none of the
/// terms in `none`, in ascending id order, `limit` at a time, resuming
/// after `after`.
#[derive(Clone, Debug)]
pub struct Find<'a> {
    pub all: Vec<Datum<'a>>,
    pub none: Vec<Datum<'a>>,
    pub after: Option<Id>,
    pub limit: usize,
}

impl Default for Find<'_> {
    fn default() -> Self {
        Self {
            all: Vec::new(),
            none: Vec::new(),
            after: None,
            limit: usize::MAX,
        }
    }
}

impl<'a> Find<'a> {
    pub fn all<I>(terms: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Datum<'a>>,
    {
        Self {
            all: terms.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn without<I>(mut self, terms: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Datum<'a>>,
    {
        self.none = terms.into_iter().map(Into::into).collect();
        self
    }

    pub fn after(mut self, id: Id) -> Self {
        self.after = Some(id);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// A read/write transaction on the index.
///
/// Mutations and queries made through one `MutTx` observe each other; the
/// store observes none of them until [`MutTx::commit`]. Dropping the
/// transaction without committing discards its writes.
pub struct MutTx<T: Tx> {
    tx: T,
    opts: Options,
}

impl<T: Tx> MutTx<T> {
    /// Associate `object` with every tag in `tags`.
    ///
    /// Already-present pairs are left untouched, each tag independently, so
    /// re-adding any subset of an object's tags is a no-op. Raw blobs are
    /// recorded in the identity table the first time they contribute a
    /// posting. Returns the object's id.
    pub fn add<'a>(
        &mut self,
        object: impl Into<Datum<'a>>,
        tags: impl IntoIterator<Item = impl Into<Datum<'a>>>,
    ) -> Result<Id> {
        let object = object.into();
        let tags: Vec<Datum<'a>> = tags.into_iter().map(Into::into).collect();
        if tags.is_empty() {
            // An object exists only while it has postings; record nothing.
            return self.query_id(object);
        }
        let object_id = self.intern(object)?;
        let mut added = 0;
        for tag in tags {
            let tag_id = self.query_id(tag)?;
            if self.tx.get(TAG_TO_OBJECT, &posting_key(tag_id, object_id))?.is_some() {
                continue;
            }
            self.tx.set(TAG_TO_OBJECT, &posting_key(tag_id, object_id), &[])?;
            self.tx.set(OBJECT_TO_TAG, &posting_key(object_id, tag_id), &[])?;
            if let Datum::Raw(blob) = tag {
                self.ensure_identity(tag_id, blob)?;
            }
            self.bump(TAG_COUNT, tag_id, 1)?;
            added += 1;
        }
        if added > 0 {
            self.bump(OBJECT_COUNT, object_id, added)?;
        }
        trace!("add {object_id}: {added} new postings");
        Ok(object_id)
    }

    /// Remove `object` and every posting it appears in. Returns `false`
    /// when the object has no postings (nothing to do).
    pub fn remove<'a>(&mut self, object: impl Into<Datum<'a>>) -> Result<bool> {
        let object_id = self.query_id(object.into())?;
        let Some(stored) = load_count(&self.tx, OBJECT_COUNT, object_id)? else {
            return Ok(false);
        };
        let tags = self.tags_of_id(object_id)?;
        if stored != tags.len() as u32 {
            return Err(Corruption::CountMismatch {
                table: table_name(OBJECT_COUNT),
                id: object_id,
                stored,
                counted: tags.len() as u32,
            }
            .into());
        }
        for &tag_id in &tags {
            self.unlink(object_id, tag_id)?;
        }
        self.tx.delete(OBJECT_COUNT, object_id.as_bytes())?;
        self.drop_identity_if_unused(object_id)?;
        trace!("remove {object_id}: {} postings dropped", tags.len());
        Ok(true)
    }

    /// Remove the listed tags from `object`, ignoring ones it does not
    /// bear. The object itself is removed when its last posting goes.
    /// Returns the number of postings removed.
    pub fn remove_tags<'a>(
        &mut self,
        object: impl Into<Datum<'a>>,
        tags: impl IntoIterator<Item = impl Into<Datum<'a>>>,
    ) -> Result<u32> {
        let object_id = self.query_id(object.into())?;
        if load_count(&self.tx, OBJECT_COUNT, object_id)?.is_none() {
            return Ok(0);
        }
        let mut removed = 0;
        for tag in tags {
            let tag_id = self.query_id(tag.into())?;
            if self.tx.get(TAG_TO_OBJECT, &posting_key(tag_id, object_id))?.is_none() {
                continue;
            }
            self.unlink(object_id, tag_id)?;
            removed += 1;
        }
        if removed > 0 && self.cut(OBJECT_COUNT, object_id, removed)? == 0 {
            self.drop_identity_if_unused(object_id)?;
        }
        Ok(removed)
    }

    pub fn has_tag<'a>(
        &self,
        object: impl Into<Datum<'a>>,
        tag: impl Into<Datum<'a>>,
    ) -> Result<bool> {
        let object_id = self.query_id(object.into())?;
        let tag_id = self.query_id(tag.into())?;
        Ok(self.tx.get(TAG_TO_OBJECT, &posting_key(tag_id, object_id))?.is_some())
    }

    /// All tags borne by `object`, in ascending id order.
    pub fn tags_of<'a>(&self, object: impl Into<Datum<'a>>) -> Result<Vec<Id>> {
        let object_id = self.query_id(object.into())?;
        self.tags_of_id(object_id)
    }

    /// The blob an id was digested from, while anything still references it.
    pub fn resolve(&self, id: Id) -> Result<Option<Vec<u8>>> {
        Ok(self.tx.get(ID_TO_BLOB, id.as_bytes())?)
    }

    /// How many objects bear `tag`. Zero for tags never recorded.
    pub fn tag_count<'a>(&self, tag: impl Into<Datum<'a>>) -> Result<u32> {
        let tag_id = self.query_id(tag.into())?;
        Ok(load_count(&self.tx, TAG_COUNT, tag_id)?.unwrap_or(0))
    }

    /// Run a conjunctive query. See [`Find`].
    pub fn find(&self, query: &Find<'_>) -> Result<Vec<Id>> {
        if query.all.is_empty() {
            return Err(InvalidInput::EmptyQuery.into());
        }
        let present: Vec<Id> = query
            .all
            .iter()
            .map(|&term| self.query_id(term))
            .collect::<Result<_>>()?;
        let absent: Vec<Id> = query
            .none
            .iter()
            .map(|&term| self.query_id(term))
            .collect::<Result<_>>()?;
        match scan::plan(&self.tx, &present, &absent, query.after, query.limit)? {
            Some(plan) => scan::execute(&self.tx, &plan),
            None => Ok(Vec::new()),
        }
    }

    pub fn commit(self) -> Result<()> {
        trace!("commit");
        Ok(self.tx.commit()?)
    }

    /// Resolve a datum to its id without touching the identity table.
    fn query_id(&self, datum: Datum<'_>) -> Result<Id> {
        match datum {
            Datum::Raw(blob) => {
                self.check_blob(blob)?;
                Ok(Id::of(blob))
            }
            Datum::Id(id) => Ok(id),
        }
    }

    /// Resolve a datum to its id, recording raw blobs in the identity table.
    fn intern(&mut self, datum: Datum<'_>) -> Result<Id> {
        let id = self.query_id(datum)?;
        if let Datum::Raw(blob) = datum {
            self.ensure_identity(id, blob)?;
        }
        Ok(id)
    }

    fn check_blob(&self, blob: &[u8]) -> Result<()> {
        if blob.is_empty() {
            return Err(InvalidInput::EmptyBlob.into());
        }
        if blob.len() > self.opts.max_blob_len {
            return Err(InvalidInput::BlobTooLarge {
                len: blob.len(),
                max: self.opts.max_blob_len,
            }
            .into());
        }
        Ok(())
    }

    fn ensure_identity(&mut self, id: Id, blob: &[u8]) -> Result<()> {
        if self.tx.get(ID_TO_BLOB, id.as_bytes())?.is_none() {
            self.tx.set(ID_TO_BLOB, id.as_bytes(), blob)?;
        }
        Ok(())
    }

    /// Drop the identity row of `id` once it is referenced in neither role.
    fn drop_identity_if_unused(&mut self, id: Id) -> Result<()> {
        if load_count(&self.tx, TAG_COUNT, id)?.is_none()
            && load_count(&self.tx, OBJECT_COUNT, id)?.is_none()
        {
            self.tx.delete(ID_TO_BLOB, id.as_bytes())?;
        }
        Ok(())
    }

    /// Delete the posting pair (tag, object) from both maps and keep the
    /// tag's bookkeeping straight. Callers must have seen the posting; a
    /// missing entry in either direction is a symmetry violation.
    fn unlink(&mut self, object_id: Id, tag_id: Id) -> Result<()> {
        let asymmetric = Corruption::AsymmetricPosting {
            tag: tag_id,
            object: object_id,
        };
        if !self.tx.delete(TAG_TO_OBJECT, &posting_key(tag_id, object_id))? {
            return Err(asymmetric.into());
        }
        if !self.tx.delete(OBJECT_TO_TAG, &posting_key(object_id, tag_id))? {
            return Err(asymmetric.into());
        }
        if self.cut(TAG_COUNT, tag_id, 1)? == 0 {
            self.drop_identity_if_unused(tag_id)?;
        }
        Ok(())
    }

    fn tags_of_id(&self, object_id: Id) -> Result<Vec<Id>> {
        let mut cur = self
            .tx
            .cursor(OBJECT_TO_TAG, &posting_key(object_id, Id::MIN), true)?;
        let mut out = Vec::new();
        while let Some((key, _)) = cur.next()? {
            if !key.starts_with(object_id.as_bytes()) {
                break;
            }
            out.push(posting_trail(&key).ok_or(Corruption::BadPostingKey { len: key.len() })?);
        }
        Ok(out)
    }

    fn bump(&mut self, table: TableId, id: Id, by: u32) -> Result<()> {
        let current = load_count(&self.tx, table, id)?.unwrap_or(0);
        self.tx.set(table, id.as_bytes(), &encode_u32(current + by))?;
        Ok(())
    }

    /// Decrement a count row by `by`, removing it at zero and returning what
    /// remains. Decrementing a row that is absent, or by more than it holds,
    /// is corruption and aborts the transaction.
    fn cut(&mut self, table: TableId, id: Id, by: u32) -> Result<u32> {
        let underflow = Corruption::CounterUnderflow {
            table: table_name(table),
            id,
        };
        let Some(current) = load_count(&self.tx, table, id)? else {
            return Err(underflow.into());
        };
        if by > current {
            return Err(underflow.into());
        }
        let remaining = current - by;
        if remaining == 0 {
            self.tx.delete(table, id.as_bytes())?;
        } else {
            self.tx.set(table, id.as_bytes(), &encode_u32(remaining))?;
        }
        Ok(remaining)
    }
}
