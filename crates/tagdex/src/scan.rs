//! Query planning and posting-list scans.
//!
//! Both scans walk `TAG_TO_OBJECT` through KV cursors and never materialise a
//! posting list. The multi-cursor intersection is written as an explicit
//! state machine over a small cursor array; the rotating pair indices, the
//! frontier, and the reseat-on-mismatch step are the design, so they are
//! spelled out rather than hidden behind iterator adapters.

use itertools::Itertools;
use log::trace;

use crate::error::{Corruption, Result};
use crate::id::Id;
use crate::index::load_count;
use crate::kv::{self, Cursor, Tx};
use crate::schema::{TAG_COUNT, TAG_TO_OBJECT, posting_key, posting_trail};

/// A planned conjunctive query. Built by [`plan`]; `present` is sorted by
/// ascending cardinality so the rarest tag drives the scan, `absent` by
/// descending cardinality so the most common absent tag rejects first.
pub(crate) struct Plan {
    present: Vec<Id>,
    absent: Vec<Id>,
    after: Option<Id>,
    limit: usize,
}

/// Order the query terms by their stored cardinalities.
///
/// Returns `None` when some present tag has no count row: such a tag has no
/// postings at all, so the intersection is empty and no cursor needs to be
/// opened. Absent tags without postings cannot reject anything and are
/// dropped from the filter.
pub(crate) fn plan<T: Tx>(
    tx: &T,
    present: &[Id],
    absent: &[Id],
    after: Option<Id>,
    limit: usize,
) -> Result<Option<Plan>> {
    let mut ranked = Vec::with_capacity(present.len());
    for &tag in present {
        let Some(count) = load_count(tx, TAG_COUNT, tag)? else {
            trace!("present tag {tag} has no postings; empty result");
            return Ok(None);
        };
        ranked.push((count, tag));
    }
    let present = ranked
        .into_iter()
        .sorted_unstable()
        .dedup()
        .map(|(_, tag)| tag)
        .collect();

    let mut ranked = Vec::with_capacity(absent.len());
    for &tag in absent {
        if let Some(count) = load_count(tx, TAG_COUNT, tag)? {
            ranked.push((count, tag));
        }
    }
    let absent = ranked
        .into_iter()
        .sorted_unstable_by(|a, b| b.cmp(a))
        .dedup()
        .map(|(_, tag)| tag)
        .collect();

    Ok(Some(Plan {
        present,
        absent,
        after,
        limit,
    }))
}

pub(crate) fn execute<T: Tx>(tx: &T, plan: &Plan) -> Result<Vec<Id>> {
    debug_assert!(!plan.present.is_empty());
    if plan.limit == 0 {
        return Ok(Vec::new());
    }
    trace!(
        "scanning {} present / {} absent terms, after={:?}",
        plan.present.len(),
        plan.absent.len(),
        plan.after,
    );
    if plan.present.len() == 1 {
        scan_single(tx, plan)
    } else {
        scan_intersect(tx, plan)
    }
}

/// A cursor pinned to the posting list of one tag.
///
/// While live, the entry under it always carries the tag as its leading id;
/// `pos` is the trailing object id of that entry. A step that leaves the
/// tag's prefix kills the cursor, which ends the scan that owns it.
struct PostingCursor<C> {
    tag: Id,
    cur: C,
    pos: Id,
}

impl<C: kv::Cursor> PostingCursor<C> {
    /// Step to the next posting of the same tag. `false` means the posting
    /// list is exhausted and the cursor is dead.
    fn advance(&mut self) -> Result<bool> {
        match position(self.tag, self.cur.next()?)? {
            Some(pos) => {
                self.pos = pos;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Position a cursor on the first posting of `tag` with object id `>= from`
/// (`> from` when `inclusive` is false). `None` when the posting list has no
/// entry in that range.
fn open_posting<'a, T: Tx>(
    tx: &'a T,
    tag: Id,
    from: Id,
    inclusive: bool,
) -> Result<Option<PostingCursor<T::Cursor<'a>>>> {
    let mut cur = tx.cursor(TAG_TO_OBJECT, &posting_key(tag, from), inclusive)?;
    let Some(pos) = position(tag, cur.next()?)? else {
        return Ok(None);
    };
    Ok(Some(PostingCursor { tag, cur, pos }))
}

/// The trailing object id of `entry`, or `None` when the entry is missing or
/// no longer carries `tag` as its leading id.
fn position(tag: Id, entry: Option<(Vec<u8>, Vec<u8>)>) -> Result<Option<Id>> {
    let Some((key, _)) = entry else {
        return Ok(None);
    };
    if !key.starts_with(tag.as_bytes()) {
        return Ok(None);
    }
    let pos = posting_trail(&key).ok_or(Corruption::BadPostingKey { len: key.len() })?;
    Ok(Some(pos))
}

fn start(after: Option<Id>) -> (Id, bool) {
    match after {
        Some(id) => (id, false),
        None => (Id::MIN, true),
    }
}

/// Does the absent-tag filter admit `object`? First hit rejects.
fn admits<T: Tx>(tx: &T, absent: &[Id], object: Id) -> Result<bool> {
    for &tag in absent {
        if tx.get(TAG_TO_OBJECT, &posting_key(tag, object))?.is_some() {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Direct walk of a single posting list.
fn scan_single<T: Tx>(tx: &T, plan: &Plan) -> Result<Vec<Id>> {
    let tag = plan.present[0];
    let mut out = Vec::new();
    let (from, inclusive) = start(plan.after);
    let Some(mut cur) = open_posting(tx, tag, from, inclusive)? else {
        return Ok(out);
    };
    loop {
        if admits(tx, &plan.absent, cur.pos)? {
            out.push(cur.pos);
            if out.len() == plan.limit {
                return Ok(out);
            }
        }
        if !cur.advance()? {
            return Ok(out);
        }
    }
}

/// Cursor-coordinated intersection of `k >= 2` posting lists.
///
/// One cursor per present tag; the primary `c_0` sits on the rarest tag.
/// Cursors other than the primary are opened lazily, at the frontier (the
/// largest object id any open cursor has reached), the first time the
/// rotating pair indices refer to them. Each iteration either emits a match
/// and steps the primary, or strictly advances some cursor toward the
/// frontier, so the scan terminates once any cursor leaves its posting list.
fn scan_intersect<T: Tx>(tx: &T, plan: &Plan) -> Result<Vec<Id>> {
    let k = plan.present.len();
    let mut out = Vec::new();

    let (from, inclusive) = start(plan.after);
    let mut cursors: Vec<PostingCursor<T::Cursor<'_>>> = Vec::with_capacity(k);
    match open_posting(tx, plan.present[0], from, inclusive)? {
        Some(primary) => cursors.push(primary),
        None => return Ok(out),
    }

    // The rotating pair: each round compares cursor i2 against cursor i1.
    let (mut i1, mut i2) = (0, 1);
    loop {
        // Match check: every cursor parked on the same object id.
        if cursors.len() == k {
            let object = cursors[0].pos;
            if cursors.iter().all(|c| c.pos == object) {
                if admits(tx, &plan.absent, object)? {
                    out.push(object);
                    if out.len() == plan.limit {
                        return Ok(out);
                    }
                }
                if !cursors[0].advance()? {
                    return Ok(out);
                }
                (i1, i2) = (0, 1);
                continue;
            }
        }

        // Cursors are opened in rotation order, so an unopened slot is
        // always the next one.
        for i in [i1, i2] {
            debug_assert!(i <= cursors.len());
            if i == cursors.len() {
                let frontier = cursors.iter().map(|c| c.pos).max().expect("primary is open");
                match open_posting(tx, plan.present[i], frontier, true)? {
                    Some(cur) => cursors.push(cur),
                    None => return Ok(out),
                }
            }
        }

        // Catch i2 up to i1.
        let target = cursors[i1].pos;
        while cursors[i2].pos < target {
            if !cursors[i2].advance()? {
                return Ok(out);
            }
        }

        if cursors[i2].pos == target {
            // Pair agrees; rotate to check the next pair.
            i1 = (i1 + 1) % k;
            i2 = (i2 + 1) % k;
        } else {
            // i2 overshot: it established a new frontier. Reseat the
            // primary there and start a fresh round of checks.
            let frontier = cursors[i2].pos;
            while cursors[0].pos < frontier {
                if !cursors[0].advance()? {
                    return Ok(out);
                }
            }
            (i1, i2) = (0, 1);
        }
    }
}
