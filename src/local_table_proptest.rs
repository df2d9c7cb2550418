#![cfg(test)]

// Property tests for LocalTable kept inside the crate so they can reach the
// resize internals through the public counters only.

use crate::config::ResizePolicy;
use crate::local_table::{LocalTable, Put};
use crate::TableBuilder;
use core::ops::ControlFlow;
use hashbrown::HashMap;
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::collections::BTreeSet;

// Pool-indexed operations to improve shrinking: indices shrink to earlier keys,
// pool length shrinks, and op lists shrink in length.
#[derive(Clone, Debug)]
enum OpI {
    Put(usize, i32),
    Delete(usize),
    Get(usize),
    Exists(Vec<u8>),
    Mutate(usize, i32),
    Iterate,
    RemoveBelow(i32),
    Rehash,
    Clear,
}

fn arb_scenario() -> impl Strategy<Value = (Vec<Vec<u8>>, Vec<OpI>)> {
    proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..6), 1..=12).prop_flat_map(
        |pool| {
            let idxs: Vec<usize> = (0..pool.len()).collect();
            let idx = proptest::sample::select(idxs);
            let exists_pool = proptest::sample::select(pool.clone());
            let op = prop_oneof![
                6 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::Put(i, v)),
                4 => idx.clone().prop_map(OpI::Delete),
                3 => idx.clone().prop_map(OpI::Get),
                2 => prop_oneof![
                    exists_pool,
                    proptest::collection::vec(any::<u8>(), 0..6)
                ]
                .prop_map(OpI::Exists),
                2 => (idx.clone(), any::<i32>()).prop_map(|(i, d)| OpI::Mutate(i, d)),
                1 => Just(OpI::Iterate),
                1 => any::<i32>().prop_map(OpI::RemoveBelow),
                1 => Just(OpI::Rehash),
                1 => Just(OpI::Clear),
            ];
            proptest::collection::vec(op, 1..80).prop_map(move |ops| (pool.clone(), ops))
        },
    )
}

fn load(t: &LocalTable<'_, i32>) -> f32 {
    t.len() as f32 / t.bucket_count() as f32
}

// Drive `sut` and a hashbrown model through `ops`, checking parity after each op.
fn run_against_model(
    mut sut: LocalTable<'_, i32>,
    pool: &[Vec<u8>],
    ops: Vec<OpI>,
) -> Result<(), TestCaseError> {
    let mut model: HashMap<Vec<u8>, i32> = HashMap::new();
    let auto = sut.resize_policy() == ResizePolicy::Auto;

    for op in ops {
        match op {
            OpI::Put(i, v) => {
                let k = &pool[i];
                let put = sut.put(k, v).map_err(|e| TestCaseError::fail(e.to_string()))?;
                match model.insert(k.clone(), v) {
                    None => prop_assert_eq!(put, Put::Inserted),
                    Some(old) => prop_assert_eq!(put, Put::Replaced { previous: Some(old) }),
                }
                prop_assert!(load(&sut) <= sut.thresholds().high, "load above high after insert");
            }
            OpI::Delete(i) => {
                let k = &pool[i];
                let had = model.remove(k);
                prop_assert_eq!(sut.delete(k), had);
                if auto && had.is_some() && !sut.is_empty() {
                    prop_assert!(load(&sut) >= sut.thresholds().low, "load below low after delete");
                }
            }
            OpI::Get(i) => {
                let k = &pool[i];
                prop_assert_eq!(sut.get(k), model.get(k));
            }
            OpI::Exists(k) => {
                prop_assert_eq!(sut.exists(&k), model.contains_key(&k));
            }
            OpI::Mutate(i, d) => {
                let k = &pool[i];
                if let Some(v) = sut.get_mut(k) {
                    *v = v.saturating_add(d);
                }
                if let Some(mv) = model.get_mut(k) {
                    *mv = mv.saturating_add(d);
                }
            }
            OpI::Iterate => {
                let s_keys: BTreeSet<Vec<u8>> = sut
                    .iter()
                    .filter_map(|(k, _)| k.as_bytes().map(<[u8]>::to_vec))
                    .collect();
                let m_keys: BTreeSet<Vec<u8>> = model.keys().cloned().collect();
                prop_assert_eq!(s_keys.len(), sut.len(), "iter yields each entry once");
                prop_assert_eq!(s_keys, m_keys);
                let visited = sut.foreach(|_, _| ControlFlow::<()>::Continue(()));
                prop_assert_eq!(visited, ControlFlow::Continue(sut.len()));
            }
            OpI::RemoveBelow(limit) => {
                let expected = model.values().filter(|v| **v < limit).count();
                model.retain(|_, v| *v >= limit);
                prop_assert_eq!(sut.foreach_remove(|_, v| *v < limit), expected);
            }
            OpI::Rehash => {
                let before = sut.bucket_count();
                let changed = sut.rehash();
                prop_assert_eq!(changed, before != sut.bucket_count());
                prop_assert!(!sut.rehash(), "rehash is idempotent");
            }
            OpI::Clear => {
                model.clear();
                sut.clear();
            }
        }

        prop_assert_eq!(sut.len(), model.len());
        prop_assert_eq!(sut.is_empty(), model.is_empty());
        prop_assert!(sut.bucket_count().is_power_of_two());
    }
    Ok(())
}

// Property: State-machine equivalence against hashbrown::HashMap.
// Invariants exercised across random operation sequences:
// - `put` reports insertion vs replacement and hands back the model's old value.
// - `get`/`exists`/`delete` parity, including zero-length keys.
// - `iter`/`foreach` visit each live entry exactly once.
// - `foreach_remove` removes exactly the accepted entries and keeps `len` honest.
// - Load factor stays within the thresholds after resizing inserts and deletes.
// - `rehash` reports whether it changed anything and is idempotent.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario()) {
        let sut = TableBuilder::new()
            .resize_policy(ResizePolicy::Auto)
            .build_local()
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        run_against_model(sut, &pool, ops)?;
    }
}

// Property: Same state-machine invariants under the default resize policy,
// starting from a single bucket.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_default_policy((pool, ops) in arb_scenario()) {
        let sut = TableBuilder::new()
            .initial_size(1)
            .build_local()
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        run_against_model(sut, &pool, ops)?;
    }
}

// Property: Same state-machine invariants under worst-case collision
// behavior (constant hash). Every key shares one chain, which stresses
// equality probing and unlinking from the middle of a chain.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_with_collisions((pool, ops) in arb_scenario()) {
        let sut = TableBuilder::new()
            .resize_policy(ResizePolicy::Auto)
            .hash_fn(|_| 0)
            .build_local()
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert!(sut.is_empty());
        run_against_model(sut, &pool, ops)?;
    }
}
