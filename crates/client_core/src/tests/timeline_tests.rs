use super::*;
use chrono::{TimeZone, Utc};
use shared::domain::{MessageId, RoomId, UserId};

fn message(id: i64) -> MessagePayload {
    MessagePayload {
        message_id: MessageId(id),
        room_id: RoomId(1),
        sender_id: UserId(5),
        sender_fullname: Some("Alice Example".to_string()),
        kind: Default::default(),
        content: format!("message {id}"),
        attachments: Vec::new(),
        read_by: Vec::new(),
        // Timestamps track ids so ordering assertions can reason in ids.
        created_at: Utc.timestamp_opt(1_700_000_000 + id, 0).unwrap(),
    }
}

fn page_newest_first(ids: &[i64]) -> Vec<MessagePayload> {
    ids.iter().copied().map(message).collect()
}

fn ids(timeline: &RoomTimeline) -> Vec<i64> {
    timeline.messages().iter().map(|m| m.message_id.0).collect()
}

fn assert_chronological(timeline: &RoomTimeline) {
    let stamps: Vec<_> = timeline.messages().iter().map(|m| m.created_at).collect();
    for pair in stamps.windows(2) {
        assert!(pair[0] <= pair[1], "timeline out of order: {stamps:?}");
    }
}

#[test]
fn initial_page_is_reversed_to_chronological_order() {
    let mut timeline = RoomTimeline::new();
    let added = timeline.ingest_page(page_newest_first(&[10, 9, 8, 7, 6, 5, 4, 3, 2, 1]), 10);

    assert_eq!(added, 10);
    assert_eq!(ids(&timeline), vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    assert!(timeline.has_more(), "full page implies more history");
}

#[test]
fn short_initial_page_exhausts_pagination() {
    let mut timeline = RoomTimeline::new();
    timeline.ingest_page(page_newest_first(&[3, 2, 1]), 10);

    assert_eq!(ids(&timeline), vec![1, 2, 3]);
    assert!(!timeline.has_more());
}

#[test]
fn live_arrival_appends_and_duplicate_is_noop() {
    let mut timeline = RoomTimeline::new();
    timeline.ingest_page(page_newest_first(&[10, 9, 8, 7, 6, 5, 4, 3, 2, 1]), 10);

    assert!(timeline.merge_live(message(11)));
    assert_eq!(timeline.len(), 11);
    assert_eq!(ids(&timeline).last(), Some(&11));

    assert!(!timeline.merge_live(message(11)), "duplicate id must be absorbed");
    assert_eq!(timeline.len(), 11);
}

#[test]
fn merge_is_idempotent_regardless_of_payload_equality() {
    let mut timeline = RoomTimeline::new();
    assert!(timeline.merge_live(message(7)));

    // Same id with a different body still counts as the same message.
    let mut variant = message(7);
    variant.content = "edited elsewhere".to_string();
    assert!(!timeline.merge_live(variant));
    assert_eq!(timeline.messages()[0].content, "message 7");
}

#[test]
fn load_older_prepends_and_recomputes_flag() {
    let mut timeline = RoomTimeline::new();
    timeline.ingest_page(page_newest_first(&[10, 9, 8, 7, 6, 5, 4, 3, 2, 1]), 10);
    timeline.merge_live(message(11));

    // Server returns newest-first: [0, -1, -2].
    let added = timeline.ingest_page(page_newest_first(&[0, -1, -2]), 10);

    assert_eq!(added, 3);
    assert_eq!(
        ids(&timeline),
        vec![-2, -1, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]
    );
    assert!(!timeline.has_more(), "3 < page size 10 means exhausted");
}

#[test]
fn prepending_never_disturbs_existing_entries() {
    let mut timeline = RoomTimeline::new();
    timeline.ingest_page(page_newest_first(&[10, 9, 8, 7, 6, 5, 4, 3, 2, 1]), 10);
    let tail_before = ids(&timeline);

    timeline.ingest_page(page_newest_first(&[0, -1, -2]), 10);

    let after = ids(&timeline);
    assert_eq!(&after[3..], tail_before.as_slice());
}

#[test]
fn live_arrival_during_history_fetch_commutes() {
    let mut timeline = RoomTimeline::new();

    // Live stream wins the race: the newest messages land before the
    // initial page does, and the page overlaps them at the boundary.
    assert!(timeline.merge_live(message(10)));
    assert!(timeline.merge_live(message(11)));

    let added = timeline.ingest_page(page_newest_first(&[10, 9, 8, 7, 6, 5, 4, 3, 2, 1]), 10);

    assert_eq!(added, 9, "overlapping message must not be re-added");
    assert_eq!(ids(&timeline), (1..=11).collect::<Vec<_>>());
    assert_chronological(&timeline);
}

#[test]
fn order_invariant_holds_across_mixed_operations() {
    let mut timeline = RoomTimeline::new();
    timeline.ingest_page(page_newest_first(&[10, 9, 8, 7, 6, 5, 4, 3, 2, 1]), 10);
    timeline.merge_live(message(11));
    timeline.ingest_page(page_newest_first(&[0, -1, -2]), 10);
    timeline.merge_live(message(12));
    timeline.merge_live(message(11));

    assert_chronological(&timeline);
    let mut unique = ids(&timeline);
    unique.dedup();
    assert_eq!(unique.len(), timeline.len(), "no duplicate ids");
}

#[test]
fn oldest_id_is_the_pagination_cursor() {
    let mut timeline = RoomTimeline::new();
    assert_eq!(timeline.oldest_id(), None);

    timeline.ingest_page(page_newest_first(&[5, 4, 3]), 10);
    assert_eq!(timeline.oldest_id(), Some(MessageId(3)));
}

#[test]
fn reset_empties_and_rearms_pagination() {
    let mut timeline = RoomTimeline::new();
    timeline.ingest_page(page_newest_first(&[2, 1]), 10);
    assert!(!timeline.has_more());

    timeline.reset();

    assert!(timeline.is_empty());
    assert!(timeline.has_more());
}

#[test]
fn mark_read_adds_reader_once() {
    let mut timeline = RoomTimeline::new();
    timeline.merge_live(message(1));

    assert!(timeline.mark_read(MessageId(1), UserId(42)));
    assert!(!timeline.mark_read(MessageId(1), UserId(42)));
    assert!(!timeline.mark_read(MessageId(99), UserId(42)));
    assert_eq!(timeline.messages()[0].read_by, vec![UserId(42)]);
}
