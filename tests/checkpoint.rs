use differential_core::channels::{VecNotify, VecOutput};
use differential_core::operators::{JoinLogic, OperatorCodecs, ReduceLogic};
use differential_core::{BinaryStatefulOperator, OperatorConfig, Weighted};

type Record = (String, u64);
type JoinResult = (String, u64, u64);
type Codecs = OperatorCodecs<String, u64, u64, Record, Record, u64, JoinResult>;

fn join_operator(
    config: OperatorConfig,
) -> BinaryStatefulOperator<String, u64, u64, Record, Record, u64, JoinResult, impl ReduceLogic<String, u64, u64, JoinResult>>
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
fn restore_is_invisible_to_subsequent_output() {
    let codecs = Codecs::bincode();
    let mut original = join_operator(OperatorConfig::default());
    let mut notify = VecNotify::new();
    let mut output = VecOutput::new();

    original.on_recv1([(Weighted::new(("a".to_owned(), 10), 1), 1u64)], &mut notify);
    original.on_recv2([(Weighted::new(("a".to_owned(), 20), 1), 1u64)], &mut notify);
    original.on_recv2([(Weighted::new(("b".to_owned(), 21), 1), 1u64)], &mut notify);
    original.on_done(&1, &mut output).unwrap();

    let mut bytes = Vec::new();
    original.checkpoint(&mut bytes, &codecs).unwrap();

    let mut restored = join_operator(OperatorConfig::default());
    restored.restore(&mut &bytes[..], &codecs).unwrap();

    // identical subsequent input produces identical subsequent output.
    let mut tail_original = VecOutput::new();
    let mut tail_restored = VecOutput::new();
    for (operator, tail) in [
        (&mut original, &mut tail_original),
        (&mut restored, &mut tail_restored),
    ] {
        operator.on_recv1([(Weighted::new(("a".to_owned(), 10), -1), 2u64)], &mut notify);
        operator.on_recv2([(Weighted::new(("b".to_owned(), 22), 1), 2u64)], &mut notify);
        operator.on_recv1([(Weighted::new(("b".to_owned(), 12), 1), 2u64)], &mut notify);
        operator.on_done(&2, tail).unwrap();
    }
    assert_eq!(tail_original.sent, tail_restored.sent);
    assert!(!tail_original.sent.is_empty());
}

#[test]
fn parked_records_survive_a_restore() {
    let codecs = Codecs::bincode();
    let mut original = join_operator(OperatorConfig::default());
    let mut notify = VecNotify::new();
    let mut output = VecOutput::new();

    original.on_recv1([(Weighted::new(("a".to_owned(), 10), 1), 1u64)], &mut notify);
    original.on_recv2([(Weighted::new(("a".to_owned(), 20), 1), 1u64)], &mut notify);
    // checkpoint while both records still await the completion of time 1.
    let mut bytes = Vec::new();
    original.checkpoint(&mut bytes, &codecs).unwrap();

    let mut restored = join_operator(OperatorConfig::default());
    restored.restore(&mut &bytes[..], &codecs).unwrap();
    restored.on_done(&1, &mut output).unwrap();

    assert_eq!(
        output.sent,
        vec![(1, Weighted::new(("a".to_owned(), 10, 20), 1))]
    );
}

#[test]
fn enqueued_keys_survive_a_restore() {
    let codecs = Codecs::bincode();
    let eager = OperatorConfig {
        input1_immutable: true,
        input2_immutable: true,
        ..OperatorConfig::default()
    };
    let mut original = join_operator(eager);
    let mut notify = VecNotify::new();

    // eager delivery applies records immediately and enqueues their key.
    original.on_recv1([(Weighted::new(("a".to_owned(), 10), 1), 1u64)], &mut notify);
    original.on_recv2([(Weighted::new(("a".to_owned(), 20), 1), 1u64)], &mut notify);

    let mut bytes = Vec::new();
    original.checkpoint(&mut bytes, &codecs).unwrap();

    let mut restored = join_operator(eager);
    restored.restore(&mut &bytes[..], &codecs).unwrap();

    let mut output = VecOutput::new();
    restored.on_done(&1, &mut output).unwrap();
    assert_eq!(
        output.sent,
        vec![(1, Weighted::new(("a".to_owned(), 10, 20), 1))]
    );
}

#[test]
fn truncated_checkpoints_fail_to_restore() {
    let codecs = Codecs::bincode();
    let mut original = join_operator(OperatorConfig::default());
    let mut notify = VecNotify::new();
    let mut output = VecOutput::new();

    original.on_recv1([(Weighted::new(("a".to_owned(), 10), 1), 1u64)], &mut notify);
    original.on_recv2([(Weighted::new(("a".to_owned(), 20), 1), 1u64)], &mut notify);
    original.on_done(&1, &mut output).unwrap();

    let mut bytes = Vec::new();
    original.checkpoint(&mut bytes, &codecs).unwrap();

    for length in [0, 1, bytes.len() / 2, bytes.len() - 1] {
        let mut restored = join_operator(OperatorConfig::default());
        assert!(
            restored.restore(&mut &bytes[..length], &codecs).is_err(),
            "restore accepted a checkpoint truncated to {} bytes",
            length
        );
    }
}

#[test]
fn shut_down_instances_checkpoint_only_the_flag() {
    let codecs = Codecs::bincode();
    let mut original = join_operator(OperatorConfig::default());
    let mut notify = VecNotify::new();
    original.on_recv1([(Weighted::new(("a".to_owned(), 10), 1), 1u64)], &mut notify);
    original.on_shutdown();

    let mut bytes = Vec::new();
    original.checkpoint(&mut bytes, &codecs).unwrap();
    assert_eq!(bytes.len(), 1);

    let mut restored = join_operator(OperatorConfig::default());
    restored.restore(&mut &bytes[..], &codecs).unwrap();
}
