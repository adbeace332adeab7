use gridq::header::QueueHeader;
use gridq::item_key::{QueueId, QueueItemKey, QueueKeyError, Sequence};

fn header(capacity: u64) -> QueueHeader {
    QueueHeader::new(&QueueId::new("q").unwrap(), capacity, 0)
}

#[gridq::test]
fn new_header_is_empty() {
    let h = header(0);
    assert_eq!((h.head, h.tail, h.len), (0, 0, 0));
    assert_eq!(h.affinity_key, "q");
    assert!(!h.is_bounded());
    assert!(!h.is_full());
}

#[gridq::test]
fn issue_next_advances_tail() {
    let mut h = header(0);
    assert_eq!(h.issue_next().unwrap(), Sequence::ZERO);
    assert_eq!(h.issue_next().unwrap().get(), 1);
    assert_eq!(h.tail, 2);
    assert_eq!(h.len, 0, "issuing alone does not count an item");
}

#[gridq::test]
fn issue_next_stops_at_the_end_of_the_sequence_space() {
    let mut h = header(0);
    h.tail = Sequence::MAX.get();
    assert!(matches!(
        h.issue_next(),
        Err(QueueKeyError::InvalidSequence { .. })
    ));
    assert_eq!(h.tail, Sequence::MAX.get());
}

#[gridq::test]
fn bounded_header_reports_full() {
    let mut h = header(2);
    for _ in 0..2 {
        h.issue_next().unwrap();
        h.record_insert();
    }
    assert!(h.is_full());
    h.record_poll(Sequence::ZERO);
    assert!(!h.is_full());
}

#[gridq::test]
fn check_key_rejects_unissued_and_foreign_keys() {
    let mut h = header(0);
    h.issue_next().unwrap();

    assert!(h.check_key(&QueueItemKey::new("q", 0).unwrap()).is_ok());
    assert!(matches!(
        h.check_key(&QueueItemKey::new("q", 1).unwrap()),
        Err(QueueKeyError::InvalidSequence { sequence: 1, .. })
    ));
    assert!(matches!(
        h.check_key(&QueueItemKey::new("other", 0).unwrap()),
        Err(QueueKeyError::RoutingMismatch { .. })
    ));
}

#[gridq::test]
fn out_of_order_removal_keeps_head_until_drained() {
    let mut h = header(0);
    for _ in 0..3 {
        h.issue_next().unwrap();
        h.record_insert();
    }
    h.record_remove(Sequence::new(1).unwrap());
    assert_eq!((h.head, h.len), (0, 2));
    h.record_remove(Sequence::ZERO);
    assert_eq!((h.head, h.len), (1, 1));
    h.record_poll(Sequence::new(2).unwrap());
    assert_eq!((h.head, h.tail, h.len), (3, 3, 0));
}

#[gridq::test]
fn clear_jumps_head_to_tail() {
    let mut h = header(0);
    for _ in 0..4 {
        h.issue_next().unwrap();
        h.record_insert();
    }
    h.record_clear();
    assert_eq!((h.head, h.tail, h.len), (4, 4, 0));
}

#[gridq::test]
fn revived_tombstone_continues_after_old_tail() {
    let mut h = header(2);
    for _ in 0..2 {
        h.issue_next().unwrap();
        h.record_insert();
    }
    h.mark_removed();
    assert!(h.removed);
    assert_eq!((h.head, h.tail, h.len), (2, 2, 0));

    h.revive(5, 99);
    assert!(!h.removed);
    assert_eq!((h.capacity, h.created_at_ms), (5, 99));
    assert_eq!(h.issue_next().unwrap().get(), 2);

    // keys issued before removal stay below head and are never live again
    let stale = QueueItemKey::new("q", 0).unwrap();
    assert!(h.check_key(&stale).is_ok());
    assert!(stale.sequence().get() < h.head);
}
