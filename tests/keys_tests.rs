use gridq::cache::CacheKey;
use gridq::item_key::{QueueHeaderKey, QueueId, QueueItemKey};
use gridq::keys::{
    HEADER_PREFIX, ITEM_PREFIX, parse_queue_header_key, parse_queue_item_key, prefix_end,
    queue_header_key, queue_item_key, queue_items_prefix,
};

#[gridq::test]
fn header_key_layout() {
    let key = queue_header_key("orders");
    assert_eq!(key[0], HEADER_PREFIX);
    assert_eq!(&key[1..5], &6u32.to_be_bytes());
    assert_eq!(&key[5..], b"orders");
    assert_eq!(parse_queue_header_key(&key), Some("orders".to_string()));
}

#[gridq::test]
fn item_key_layout_and_parse() {
    let key = queue_item_key("orders", 258);
    assert_eq!(key[0], ITEM_PREFIX);
    assert!(key.starts_with(&queue_items_prefix("orders")));
    assert_eq!(&key[key.len() - 8..], &258u64.to_be_bytes());

    let parsed = parse_queue_item_key(&key).expect("parse");
    assert_eq!(parsed.queue_id, "orders");
    assert_eq!(parsed.sequence, 258);
}

#[gridq::test]
fn item_keys_sort_by_sequence() {
    let mut keys: Vec<Vec<u8>> = [300u64, 2, 256, 0, 1]
        .into_iter()
        .map(|s| queue_item_key("q", s))
        .collect();
    keys.sort();
    let seqs: Vec<u64> = keys
        .iter()
        .map(|k| parse_queue_item_key(k).unwrap().sequence)
        .collect();
    assert_eq!(seqs, vec![0, 1, 2, 256, 300]);
}

#[gridq::test]
fn queue_prefixes_do_not_overlap() {
    // "ab" is a byte prefix of "abc"; the length prefix keeps their ranges apart
    let short = queue_items_prefix("ab");
    let long_item = queue_item_key("abc", 0);
    assert!(!long_item.starts_with(&short));
    assert!(!queue_header_key("abc").starts_with(&queue_header_key("ab")));
}

#[gridq::test]
fn parsers_reject_malformed_keys() {
    assert_eq!(parse_queue_item_key(&[]), None);
    assert_eq!(parse_queue_item_key(&queue_header_key("q")), None);
    assert_eq!(parse_queue_header_key(&queue_item_key("q", 1)), None);

    let mut truncated = queue_item_key("q", 1);
    truncated.pop();
    assert_eq!(parse_queue_item_key(&truncated), None);

    let mut bad_len = queue_header_key("q");
    bad_len[4] = 9;
    assert_eq!(parse_queue_header_key(&bad_len), None);

    let mut trailing = queue_header_key("q");
    trailing.push(0);
    assert_eq!(parse_queue_header_key(&trailing), None);
}

#[gridq::test]
fn prefix_end_bounds_the_prefix() {
    let prefix = queue_items_prefix("q");
    let end = prefix_end(&prefix).unwrap();
    assert!(queue_item_key("q", u64::MAX) < end);
    assert!(queue_item_key("q", 0) >= prefix);
    assert_eq!(prefix_end(&[0x01, 0xFF]), Some(vec![0x02]));
    assert_eq!(prefix_end(&[0xFF, 0xFF]), None);
}

#[gridq::test]
fn cache_keys_map_to_store_keys() {
    let queue_id = QueueId::new("orders").unwrap();
    assert_eq!(
        QueueHeaderKey::new(&queue_id).store_key(),
        queue_header_key("orders")
    );
    assert_eq!(
        QueueItemKey::new("orders", 9).unwrap().store_key(),
        queue_item_key("orders", 9)
    );
}
