use std::collections::{HashMap, HashSet};

use gridq::item_key::{
    AffinityKey, AffinityKeyed, QueueHeaderKey, QueueId, QueueItemKey, QueueKeyError, Sequence,
};

#[gridq::test]
fn new_derives_affinity_from_queue_id() {
    let key = QueueItemKey::new("orders", 7).unwrap();
    assert_eq!(key.queue_id().as_str(), "orders");
    assert_eq!(key.sequence().as_i64(), 7);
    assert_eq!(key.affinity_key().as_str(), "orders");
}

#[gridq::test]
fn empty_queue_id_is_rejected() {
    assert_eq!(
        QueueItemKey::new("", 0).unwrap_err(),
        QueueKeyError::InvalidIdentity
    );
    assert_eq!(QueueId::new("").unwrap_err(), QueueKeyError::InvalidIdentity);
}

#[gridq::test]
fn negative_sequence_is_rejected() {
    let err = QueueItemKey::new("q1", -1).unwrap_err();
    assert!(
        matches!(err, QueueKeyError::InvalidSequence { sequence: -1, .. }),
        "unexpected error: {err:?}"
    );
    assert!(Sequence::new(i64::MIN).is_err());
}

#[gridq::test]
fn sequence_bounds() {
    assert_eq!(Sequence::new(0).unwrap(), Sequence::ZERO);
    assert_eq!(Sequence::new(i64::MAX).unwrap(), Sequence::MAX);
    assert_eq!(Sequence::MAX.next(), None);
    assert_eq!(Sequence::ZERO.next().map(Sequence::get), Some(1));
    assert_eq!(
        Sequence::from_stored(i64::MAX as u64).unwrap(),
        Sequence::MAX
    );
}

#[gridq::test]
fn stored_sequence_above_i64_max_reports_raw_value() {
    let err = Sequence::from_stored(u64::MAX).unwrap_err();
    assert_eq!(
        err,
        QueueKeyError::SequenceOutOfRange { sequence: u64::MAX }
    );
    assert!(err.to_string().contains("18446744073709551615"), "{err}");

    let just_over = i64::MAX as u64 + 1;
    assert_eq!(
        Sequence::from_stored(just_over).unwrap_err(),
        QueueKeyError::SequenceOutOfRange { sequence: just_over }
    );
}

#[gridq::test]
fn equality_covers_queue_and_sequence() {
    let a = QueueItemKey::new("q1", 1).unwrap();
    let b = QueueItemKey::new("q1", 1).unwrap();
    let c = QueueItemKey::new("q1", 2).unwrap();
    let d = QueueItemKey::new("q2", 1).unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_ne!(a, d);

    let set: HashSet<QueueItemKey> = [a.clone(), b, c.clone(), d.clone()].into_iter().collect();
    assert_eq!(set.len(), 3);

    let mut by_key = HashMap::new();
    by_key.insert(a.clone(), "first");
    assert_eq!(by_key.get(&QueueItemKey::new("q1", 1).unwrap()), Some(&"first"));
}

#[gridq::test]
fn ordering_within_a_queue_follows_sequence() {
    let mut keys: Vec<QueueItemKey> = [5, 0, 3, 1]
        .into_iter()
        .map(|s| QueueItemKey::new("jobs", s).unwrap())
        .collect();
    keys.sort_by(|a, b| a.partial_cmp(b).expect("same queue"));
    let seqs: Vec<i64> = keys.iter().map(|k| k.sequence().as_i64()).collect();
    assert_eq!(seqs, vec![0, 1, 3, 5]);
}

#[gridq::test]
fn keys_of_different_queues_are_incomparable() {
    let a = QueueItemKey::new("a", 0).unwrap();
    let b = QueueItemKey::new("b", 1).unwrap();
    assert_eq!(a.partial_cmp(&b), None);
    assert!(!(a < b));
    assert!(!(a > b));
}

#[gridq::test]
fn all_keys_of_a_queue_share_the_header_token() {
    let queue_id = QueueId::new("orders").unwrap();
    let header = QueueHeaderKey::new(&queue_id);
    for seq in 0..10 {
        let key = QueueItemKey::new("orders", seq).unwrap();
        assert_eq!(key.affinity_key(), header.affinity_key());
        assert_eq!(key.header_key(), header);
    }
    assert_eq!(header.affinity_key(), &AffinityKey::for_queue(&queue_id));
}

#[gridq::test]
fn verify_affinity_rejects_another_queues_token() {
    let key = QueueItemKey::new("q1", 0).unwrap();
    let other = AffinityKey::for_queue(&QueueId::new("q2").unwrap());
    match key.verify_affinity(&other) {
        Err(QueueKeyError::RoutingMismatch {
            queue_id,
            expected,
            got,
        }) => {
            assert_eq!(queue_id, "q1");
            assert_eq!(expected, "q2");
            assert_eq!(got, "q1");
        }
        other => panic!("expected RoutingMismatch, got {other:?}"),
    }
    assert!(key.verify_affinity(key.affinity_key()).is_ok());
}

#[gridq::test]
fn json_round_trip_keeps_all_fields() {
    let key = QueueItemKey::new("orders", 42).unwrap();
    let json = serde_json::to_string(&key).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["queue_id"], "orders");
    assert_eq!(value["sequence"], 42);
    assert_eq!(value["affinity_key"], "orders");

    let back: QueueItemKey = serde_json::from_str(&json).unwrap();
    assert_eq!(back, key);
    assert_eq!(back.affinity_key(), key.affinity_key());
}

#[gridq::test]
fn json_with_tampered_token_is_rejected() {
    let json = r#"{"queue_id":"orders","sequence":1,"affinity_key":"payments"}"#;
    let err = serde_json::from_str::<QueueItemKey>(json).unwrap_err();
    assert!(
        err.to_string().contains("affinity mismatch"),
        "unexpected error: {err}"
    );
}

#[gridq::test]
fn json_with_invalid_fields_is_rejected() {
    assert!(
        serde_json::from_str::<QueueItemKey>(r#"{"queue_id":"","sequence":0,"affinity_key":""}"#)
            .is_err()
    );
    assert!(
        serde_json::from_str::<QueueItemKey>(
            r#"{"queue_id":"q","sequence":-4,"affinity_key":"q"}"#
        )
        .is_err()
    );
}

#[gridq::test]
fn display_and_debug() {
    let key = QueueItemKey::new("orders", 3).unwrap();
    assert_eq!(key.to_string(), "orders#3");
    let dbg = format!("{key:?}");
    assert!(dbg.contains("orders") && dbg.contains('3'));
}

#[gridq::test]
fn keys_are_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<QueueItemKey>();
    assert_send_sync::<QueueHeaderKey>();
}
