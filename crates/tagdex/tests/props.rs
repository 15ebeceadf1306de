//! Model-based properties: arbitrary operation sequences against a
//! reference model, then a full audit of the persisted tables.

use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use tagdex::{
    Find, Id, TagIndex,
    kv::{Cursor as _, Kv as _, Memory, TableId, Tx as _},
    schema,
};

const OBJECTS: usize = 8;
const TAGS: usize = 8;

#[derive(Debug, Clone)]
enum Op {
    Add(usize, Vec<usize>),
    Remove(usize),
    RemoveTags(usize, Vec<usize>),
}

fn op() -> impl Strategy<Value = Op> {
    let tags = || proptest::collection::vec(0..TAGS, 0..5);
    prop_oneof![
        3 => (0..OBJECTS, tags()).prop_map(|(o, ts)| Op::Add(o, ts)),
        1 => (0..OBJECTS).prop_map(Op::Remove),
        2 => (0..OBJECTS, tags()).prop_map(|(o, ts)| Op::RemoveTags(o, ts)),
    ]
}

fn object(o: usize) -> String {
    format!("object-{o}")
}

fn tag(t: usize) -> String {
    format!("tag-{t}")
}

/// What the store should hold: object index -> borne tag indices.
type Model = BTreeMap<usize, BTreeSet<usize>>;

fn apply(index: &TagIndex<Memory>, model: &mut Model, op: &Op) {
    // One committed transaction per operation, like an embedder would issue.
    let mut tx = index.begin().unwrap();
    match op {
        Op::Add(o, ts) => {
            let names: Vec<String> = ts.iter().map(|&t| tag(t)).collect();
            tx.add(object(*o).as_str(), names.iter().map(String::as_str))
                .unwrap();
            if !ts.is_empty() {
                model.entry(*o).or_default().extend(ts.iter().copied());
            }
        }
        Op::Remove(o) => {
            let existed = tx.remove(object(*o).as_str()).unwrap();
            assert_eq!(existed, model.remove(o).is_some());
        }
        Op::RemoveTags(o, ts) => {
            let names: Vec<String> = ts.iter().map(|&t| tag(t)).collect();
            let removed = tx
                .remove_tags(object(*o).as_str(), names.iter().map(String::as_str))
                .unwrap();
            let mut expect = 0;
            if let Some(borne) = model.get_mut(o) {
                for &t in ts.iter().collect::<BTreeSet<_>>() {
                    if borne.remove(&t) {
                        expect += 1;
                    }
                }
                if borne.is_empty() {
                    model.remove(o);
                }
            }
            assert_eq!(removed, expect);
        }
    }
    tx.commit().unwrap();
}

type Entries = Vec<(Vec<u8>, Vec<u8>)>;

fn dump(index: &TagIndex<Memory>, table: TableId) -> Entries {
    let tx = index.kv().begin().unwrap();
    let mut cur = tx.cursor(table, &[], true).unwrap();
    let mut out = Vec::new();
    while let Some(entry) = cur.next().unwrap() {
        out.push(entry);
    }
    out
}

fn dump_data_tables(index: &TagIndex<Memory>) -> Vec<Entries> {
    [
        schema::TAG_TO_OBJECT,
        schema::OBJECT_TO_TAG,
        schema::ID_TO_BLOB,
        schema::TAG_COUNT,
        schema::OBJECT_COUNT,
    ]
    .iter()
    .map(|&t| dump(index, t))
    .collect()
}

/// Reconstruct all five data tables from the model: posting symmetry, count
/// accuracy, and identity rows for exactly the ids still referenced. Sorted,
/// so the result is directly comparable with [`dump_data_tables`].
fn expected_tables(model: &Model) -> Vec<Entries> {
    let mut forward = Vec::new();
    let mut reverse = Vec::new();
    let mut identity: BTreeMap<Id, Vec<u8>> = BTreeMap::new();
    let mut tag_counts: BTreeMap<Id, u32> = BTreeMap::new();
    let mut object_counts: BTreeMap<Id, u32> = BTreeMap::new();

    for (&o, borne) in model {
        let object_blob = object(o).into_bytes();
        let object_id = Id::of(&object_blob);
        identity.insert(object_id, object_blob);
        object_counts.insert(object_id, borne.len() as u32);
        for &t in borne {
            let tag_blob = tag(t).into_bytes();
            let tag_id = Id::of(&tag_blob);
            identity.insert(tag_id, tag_blob);
            *tag_counts.entry(tag_id).or_default() += 1;
            forward.push((schema::posting_key(tag_id, object_id).to_vec(), Vec::new()));
            reverse.push((schema::posting_key(object_id, tag_id).to_vec(), Vec::new()));
        }
    }
    forward.sort_unstable();
    reverse.sort_unstable();

    let counts = |rows: BTreeMap<Id, u32>| {
        rows.into_iter()
            .map(|(id, n)| (id.as_bytes().to_vec(), schema::encode_u32(n).to_vec()))
            .collect::<Entries>()
    };
    vec![
        forward,
        reverse,
        identity
            .into_iter()
            .map(|(id, blob)| (id.as_bytes().to_vec(), blob))
            .collect(),
        counts(tag_counts),
        counts(object_counts),
    ]
}

/// A spread of conjunctive queries agrees with the model, both in one shot
/// and when paged.
fn check_queries(index: &TagIndex<Memory>, model: &Model) {
    let tx = index.begin().unwrap();
    for t1 in 0..TAGS {
        let t2 = (t1 + 3) % TAGS;
        let t3 = (t1 + 5) % TAGS;
        let (n1, n2, n3) = (tag(t1), tag(t2), tag(t3));

        let expect: Vec<Id> = {
            let mut ids: Vec<Id> = model
                .iter()
                .filter(|(_, borne)| {
                    borne.contains(&t1) && borne.contains(&t2) && !borne.contains(&t3)
                })
                .map(|(&o, _)| Id::of(object(o).as_bytes()))
                .collect();
            ids.sort_unstable();
            ids
        };
        let query = Find::all([n1.as_str(), n2.as_str()]).without([n3.as_str()]);
        assert_eq!(tx.find(&query).unwrap(), expect);

        // Pages must concatenate to the full answer, in order, no seams.
        let mut paged = Vec::new();
        let mut after = None;
        loop {
            let mut page = query.clone().limit(3);
            if let Some(last) = after {
                page = page.after(last);
            }
            let batch = tx.find(&page).unwrap();
            if batch.is_empty() {
                break;
            }
            assert!(batch.len() <= 3);
            after = batch.last().copied();
            paged.extend(batch);
        }
        assert_eq!(paged, expect);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn any_operation_sequence_upholds_the_invariants(
        ops in proptest::collection::vec(op(), 1..40),
    ) {
        let index = TagIndex::memory().unwrap();
        let mut model = Model::new();
        for op in &ops {
            apply(&index, &mut model, op);
        }
        prop_assert_eq!(dump_data_tables(&index), expected_tables(&model));
        check_queries(&index, &model);
    }

    // Replaying any add sequence must leave the tables byte-identical.
    #[test]
    fn adds_are_idempotent(
        adds in proptest::collection::vec((0..OBJECTS, proptest::collection::vec(0..TAGS, 1..5)), 1..10),
    ) {
        let index = TagIndex::memory().unwrap();
        let run = |index: &TagIndex<Memory>| {
            let mut tx = index.begin().unwrap();
            for (o, ts) in &adds {
                let names: Vec<String> = ts.iter().map(|&t| tag(t)).collect();
                tx.add(object(*o).as_str(), names.iter().map(String::as_str)).unwrap();
            }
            tx.commit().unwrap();
        };
        run(&index);
        let snapshot = dump_data_tables(&index);
        run(&index);
        prop_assert_eq!(dump_data_tables(&index), snapshot);
    }
}
