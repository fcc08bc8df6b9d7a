use differential_core::lattice::{close_under_join, Lattice, PartialOrder, Product};
use differential_core::{LatticeInternTable, TimeIndex};

use itertools::Itertools;

type Time = Product<u64, u64>;

#[test]
fn interning_is_deterministic() {
    let mut table = LatticeInternTable::<Time>::new();
    let mut indices = Vec::new();
    for outer in 0..4u64 {
        for inner in 0..4u64 {
            indices.push(table.intern(Product::new(outer, inner)));
        }
    }
    // interning everything again, in a different order, yields the same indices.
    for outer in (0..4u64).rev() {
        for inner in 0..4u64 {
            let index = table.intern(Product::new(outer, inner));
            assert_eq!(index, indices[(outer * 4 + inner) as usize]);
        }
    }
    assert_eq!(table.len(), 17); // sixteen distinct times plus the minimum
}

#[test]
fn redirection_reaches_a_fixed_point() {
    let mut table = LatticeInternTable::<Time>::new();
    for outer in 0..5u64 {
        for inner in 0..5u64 {
            table.intern(Product::new(outer, inner));
        }
    }
    table
        .update_reachability(&[Product::new(3, 0), Product::new(0, 3)])
        .unwrap();
    for index in 0..table.len() {
        let target = table.update_time(index);
        assert_eq!(table.update_time(target), target);
    }
}

#[test]
fn advancement_merges_toward_stable_indices() {
    let mut table = LatticeInternTable::<Time>::new();
    let t12 = table.intern(Product::new(1, 2));
    let t14 = table.intern(Product::new(1, 4));
    // only times with an inner component of five or more can still arrive:
    // (1,2) and (1,4) both advance to (1,5) and merge, preferring the older index.
    table.update_reachability(&[Product::new(0, 5)]).unwrap();
    assert_eq!(table.update_time(t14), t12);
    assert_eq!(table.update_time(t12), t12);
    // the advanced value dominates the originals it stands for.
    assert!(table.time(t12).less_equal(&Product::new(1, 5)));
    assert!(table.time(t14).less_equal(&Product::new(1, 5)));
}

#[test]
fn dominating_frontier_collapses_everything() {
    let mut table = LatticeInternTable::<Time>::new();
    for outer in 0..4u64 {
        table.intern(Product::new(outer, 3 - outer));
    }
    // a frontier above every interned time leaves one equivalence class,
    // represented by the smallest interned time: the minimum at index zero.
    table.update_reachability(&[Product::new(10, 10)]).unwrap();
    for index in 0..table.len() {
        assert_eq!(table.update_time(index), 0);
    }
}

#[test]
fn empty_frontier_is_rejected() {
    let mut table = LatticeInternTable::<Time>::new();
    table.intern(Product::new(1, 1));
    assert!(table.update_reachability(&[]).is_err());
}

#[test]
fn interesting_times_match_the_join_closure() {
    let mut table = LatticeInternTable::<Time>::new();
    let truth: Vec<TimeIndex> = [(2, 0), (0, 2), (1, 1)]
        .iter()
        .map(|&(outer, inner)| table.intern(Product::new(outer, inner)))
        .collect();
    let delta: Vec<TimeIndex> = [(1, 2), (3, 0)]
        .iter()
        .map(|&(outer, inner)| table.intern(Product::new(outer, inner)))
        .collect();

    let mut list = Vec::new();
    table.interesting_times(&mut list, &truth, &delta);

    // no duplicates, and sorted by the total order.
    assert!(list.iter().all_unique());
    let times: Vec<Time> = list.iter().map(|&index| table.time(index).clone()).collect();
    let mut sorted = times.clone();
    sorted.sort();
    assert_eq!(times, sorted);

    // the closure computed directly over times: each delta, its joins with
    // non-prior truths, closed under pairwise join.
    let mut expected = Vec::new();
    for &(outer, inner) in [(1, 2), (3, 0)].iter() {
        let delta_time = Product::new(outer, inner);
        if !expected.contains(&delta_time) {
            expected.push(delta_time.clone());
        }
        for &(truth_outer, truth_inner) in [(2, 0), (0, 2), (1, 1)].iter() {
            let truth_time = Product::new(truth_outer, truth_inner);
            if !truth_time.less_than(&delta_time) {
                let join = truth_time.join(&delta_time);
                if !expected.contains(&join) {
                    expected.push(join);
                }
            }
        }
    }
    close_under_join(&mut expected);
    expected.sort();

    let mut observed = times;
    observed.sort();
    assert_eq!(observed, expected);
}

#[test]
fn interned_joins_are_reusable() {
    let mut table = LatticeInternTable::<Time>::new();
    let delta = vec![table.intern(Product::new(0, 1))];
    let truth = vec![table.intern(Product::new(1, 0))];
    let mut list = Vec::new();
    table.interesting_times(&mut list, &truth, &delta);
    // the join (1,1) was interned during the computation.
    let join = table.intern(Product::new(1, 1));
    assert!(list.contains(&join));
}
