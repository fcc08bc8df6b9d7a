use differential_core::channels::{VecNotify, VecOutput};
use differential_core::lattice::Product;
use differential_core::operators::{AggregateLogic, JoinLogic, ReduceLogic};
use differential_core::{BinaryStatefulOperator, Data, Fault, Lattice, OperatorConfig, Weighted};

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

type Record = (String, u64);
type JoinResult = (String, u64, u64);

fn join_operator<T: Data + Lattice>(
    config: OperatorConfig,
) -> BinaryStatefulOperator<String, u64, u64, Record, Record, T, JoinResult, impl ReduceLogic<String, u64, u64, JoinResult>>
{
    BinaryStatefulOperator::new(
        |record: &Record| record.0.clone(),
        |record: &Record| record.1,
        |record: &Record| record.0.clone(),
        |record: &Record| record.1,
        JoinLogic::new(|key: &String, left: &u64, right: &u64| (key.clone(), *left, *right)),
        config,
    )
}

#[test]
fn join_emits_once_and_retracts_incrementally() {
    let mut operator = join_operator(OperatorConfig::default());
    let mut output = VecOutput::new();
    let mut notify = VecNotify::new();

    operator.on_recv1([(Weighted::new(("a".to_owned(), 10), 1), 1u64)], &mut notify);
    operator.on_recv2([(Weighted::new(("a".to_owned(), 20), 1), 1u64)], &mut notify);
    operator.on_done(&1, &mut output).unwrap();
    assert_eq!(
        output.sent,
        vec![(1, Weighted::new(("a".to_owned(), 10, 20), 1))]
    );

    // a later retraction on input 1 produces exactly one retraction at the
    // later time, and nothing is re-emitted at the earlier one.
    operator.on_recv1([(Weighted::new(("a".to_owned(), 10), -1), 2u64)], &mut notify);
    operator.on_done(&2, &mut output).unwrap();
    assert_eq!(
        output.sent[1..],
        [(2, Weighted::new(("a".to_owned(), 10, 20), -1))]
    );
}

#[test]
fn incomparable_times_join_at_their_upper_bound() {
    let mut operator = join_operator(OperatorConfig::default());
    let mut output = VecOutput::new();
    let mut notify = VecNotify::new();

    operator.on_recv1(
        [(Weighted::new(("a".to_owned(), 10), 1), Product::new(1u64, 0u64))],
        &mut notify,
    );
    operator.on_recv2(
        [(Weighted::new(("a".to_owned(), 20), 1), Product::new(0u64, 1u64))],
        &mut notify,
    );

    let mut times = notify.requested.clone();
    times.sort();
    for time in times.iter() {
        operator.on_done(time, &mut output).unwrap();
    }

    // neither input time sees the other; the match appears exactly at the join.
    assert_eq!(
        output.sent,
        vec![(Product::new(1, 1), Weighted::new(("a".to_owned(), 10, 20), 1))]
    );
}

#[test]
fn aggregate_tracks_the_minimum_multiplicity() {
    let config = OperatorConfig {
        identity_value1: true,
        identity_value2: true,
        maintain_output_trace: false,
        ..OperatorConfig::default()
    };
    let mut operator = BinaryStatefulOperator::new(
        |record: &String| record.clone(),
        |record: &String| record.clone(),
        |record: &String| record.clone(),
        |record: &String| record.clone(),
        AggregateLogic::new(|left, right| std::cmp::min(left, right), |key: &String| key.clone()),
        config,
    );
    let mut output = VecOutput::new();
    let mut notify = VecNotify::new();

    operator.on_recv1([(Weighted::new("x".to_owned(), 2), 1u64)], &mut notify);
    operator.on_recv2([(Weighted::new("x".to_owned(), 3), 1u64)], &mut notify);
    operator.on_done(&1, &mut output).unwrap();
    assert_eq!(output.sent, vec![(1, Weighted::new("x".to_owned(), 2))]);

    // dropping the right multiplicity below the left shifts the minimum by one.
    operator.on_recv2([(Weighted::new("x".to_owned(), -2), 2u64)], &mut notify);
    operator.on_done(&2, &mut output).unwrap();
    assert_eq!(output.sent[1..], [(2, Weighted::new("x".to_owned(), -1))]);
}

#[test]
fn batched_and_eager_delivery_agree() {
    // the same records, once through buffered delivery and once applied
    // eagerly as an immutable input, accumulate to the same output.
    let eager_config = OperatorConfig {
        input1_immutable: true,
        input2_immutable: true,
        ..OperatorConfig::default()
    };

    let records1 = vec![
        (Weighted::new(("a".to_owned(), 10), 1), Product::new(1u64, 0u64)),
        (Weighted::new(("b".to_owned(), 11), 1), Product::new(0u64, 1u64)),
    ];
    let records2 = vec![
        (Weighted::new(("a".to_owned(), 20), 1), Product::new(0u64, 1u64)),
        (Weighted::new(("b".to_owned(), 21), 2), Product::new(1u64, 0u64)),
    ];

    let mut accumulated = Vec::new();
    for config in [OperatorConfig::default(), eager_config] {
        let mut operator = join_operator(config);
        let mut output = VecOutput::new();
        let mut notify = VecNotify::new();
        operator.on_recv1(records1.clone(), &mut notify);
        operator.on_recv2(records2.clone(), &mut notify);
        let mut times = notify.requested.clone();
        times.sort();
        for time in times.iter() {
            operator.on_done(time, &mut output).unwrap();
        }
        accumulated.push(accumulate(
            output.sent.iter().map(|(_, record)| record.clone()),
        ));
    }
    assert_eq!(accumulated[0], accumulated[1]);
    assert!(!accumulated[0].is_empty());
}

fn accumulate<R: Ord + Clone + std::hash::Hash + Eq>(
    records: impl Iterator<Item = Weighted<R>>,
) -> HashMap<R, i64> {
    let mut net = HashMap::new();
    for record in records {
        *net.entry(record.record).or_insert(0) += record.weight;
    }
    net.retain(|_, weight| *weight != 0);
    net
}

#[test]
fn incremental_output_matches_full_recomputation() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let keys = ["k0", "k1", "k2"];

    let mut operator = join_operator(OperatorConfig::default());
    let mut output = VecOutput::new();
    let mut notify = VecNotify::new();

    let mut input1: Vec<(Record, i64)> = Vec::new();
    let mut input2: Vec<(Record, i64)> = Vec::new();

    for time in 1..=5u64 {
        for _ in 0..12 {
            let record = (
                keys[rng.gen_range(0..keys.len())].to_owned(),
                rng.gen_range(0..3u64),
            );
            let weight = if rng.gen_bool(0.25) { -1 } else { 1 };
            if rng.gen_bool(0.5) {
                input1.push((record.clone(), weight));
                operator.on_recv1([(Weighted::new(record, weight), time)], &mut notify);
            } else {
                input2.push((record.clone(), weight));
                operator.on_recv2([(Weighted::new(record, weight), time)], &mut notify);
            }
        }
        operator.on_done(&time, &mut output).unwrap();
    }

    // reduce once over the fully accumulated inputs.
    let lefts = accumulate(input1.into_iter().map(|(r, w)| Weighted::new(r, w)));
    let rights = accumulate(input2.into_iter().map(|(r, w)| Weighted::new(r, w)));
    let mut expected = HashMap::new();
    for ((key, left), weight1) in lefts.iter() {
        for ((key2, right), weight2) in rights.iter() {
            if key == key2 {
                *expected
                    .entry((key.clone(), *left, *right))
                    .or_insert(0i64) += weight1 * weight2;
            }
        }
    }
    expected.retain(|_, weight| *weight != 0);

    let observed = accumulate(output.sent.iter().map(|(_, record)| record.clone()));
    assert_eq!(observed, expected);
}

struct Poisoned;

impl ReduceLogic<String, u64, u64, String> for Poisoned {
    fn reduce(
        &mut self,
        key: &String,
        _input1: &[Weighted<u64>],
        _input2: &[Weighted<u64>],
        output: &mut Vec<Weighted<String>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if key == "poison" {
            return Err("poisoned key".into());
        }
        output.push(Weighted::new(key.clone(), 1));
        Ok(())
    }
}

#[test]
fn reduce_failures_surface_and_spare_the_rest() {
    let mut operator = BinaryStatefulOperator::new(
        |record: &Record| record.0.clone(),
        |record: &Record| record.1,
        |record: &Record| record.0.clone(),
        |record: &Record| record.1,
        Poisoned,
        OperatorConfig::default(),
    );
    let mut output = VecOutput::new();
    let mut notify = VecNotify::new();

    operator.on_recv1([(Weighted::new(("poison".to_owned(), 1), 1), 1u64)], &mut notify);
    let fault = operator.on_done(&1, &mut output).unwrap_err();
    assert!(matches!(fault, Fault::Reduce(_)));

    // the instance stays usable for other keys.
    operator.on_recv1([(Weighted::new(("fine".to_owned(), 1), 1), 2u64)], &mut notify);
    operator.on_done(&2, &mut output).unwrap();
    assert_eq!(output.sent, vec![(2, Weighted::new("fine".to_owned(), 1))]);
}

#[test]
fn frontier_advancement_preserves_incremental_output() {
    let mut operator = join_operator(OperatorConfig::default());
    let mut output = VecOutput::new();
    let mut notify = VecNotify::new();

    operator.on_recv1([(Weighted::new(("a".to_owned(), 10), 1), 1u64)], &mut notify);
    operator.on_recv2([(Weighted::new(("a".to_owned(), 20), 1), 1u64)], &mut notify);
    operator.on_done(&1, &mut output).unwrap();

    // only times at or beyond 2 can still arrive; the historical times
    // collapse into one equivalence class.
    operator.update_reachability(&[2]).unwrap();

    operator.on_recv1([(Weighted::new(("a".to_owned(), 10), -1), 3u64)], &mut notify);
    operator.on_done(&3, &mut output).unwrap();

    assert_eq!(
        output.sent,
        vec![
            (1, Weighted::new(("a".to_owned(), 10, 20), 1)),
            (3, Weighted::new(("a".to_owned(), 10, 20), -1)),
        ]
    );
}

#[test]
fn compute_with_nothing_pending_is_idempotent() {
    let mut operator = join_operator(OperatorConfig::default());
    let mut output = VecOutput::new();
    operator.compute(&mut output).unwrap();
    operator.on_done(&1, &mut output).unwrap();
    assert!(output.sent.is_empty());
    assert_eq!(output.flushes, 1);
}
