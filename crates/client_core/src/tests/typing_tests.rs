use super::*;
use shared::domain::Role;

fn typing_user(id: i64) -> TypingUser {
    TypingUser {
        user_id: UserId(id),
        fullname: format!("User {id}"),
        role: Role::Student,
    }
}

#[test]
fn note_start_is_idempotent_on_membership() {
    let mut roster = TypingRoster::default();

    let (_, newly_added) = roster.note_start(typing_user(1));
    assert!(newly_added);

    let (_, newly_added) = roster.note_start(typing_user(1));
    assert!(!newly_added);
    assert_eq!(roster.users().len(), 1);
}

#[test]
fn note_stop_is_idempotent() {
    let mut roster = TypingRoster::default();
    roster.note_start(typing_user(1));

    assert!(roster.note_stop(UserId(1)));
    assert!(!roster.note_stop(UserId(1)));
    assert!(!roster.note_stop(UserId(2)));
    assert!(roster.is_empty());
}

#[test]
fn refreshed_start_invalidates_older_expiry() {
    let mut roster = TypingRoster::default();
    let (first, _) = roster.note_start(typing_user(1));
    let (second, _) = roster.note_start(typing_user(1));

    assert!(!roster.expire(UserId(1), first), "stale timer must not evict");
    assert!(roster.contains(UserId(1)));

    assert!(roster.expire(UserId(1), second));
    assert!(!roster.contains(UserId(1)));
}

#[test]
fn expire_after_explicit_stop_is_noop() {
    let mut roster = TypingRoster::default();
    let (generation, _) = roster.note_start(typing_user(1));
    roster.note_stop(UserId(1));

    assert!(!roster.expire(UserId(1), generation));
}

#[test]
fn clear_drops_all_entries() {
    let mut roster = TypingRoster::default();
    roster.note_start(typing_user(1));
    roster.note_start(typing_user(2));

    roster.clear();

    assert!(roster.is_empty());
}

#[test]
fn keystroke_burst_collapses_to_single_start() {
    let mut debouncer = TypingDebouncer::default();
    let room = RoomId(7);

    let presses: Vec<KeyPress> = (0..5).map(|_| debouncer.key_pressed(room)).collect();

    assert!(presses[0].emit_start);
    assert!(presses[1..].iter().all(|p| !p.emit_start));
}

#[test]
fn only_the_latest_press_fires_the_stop() {
    let mut debouncer = TypingDebouncer::default();
    let room = RoomId(7);

    let first = debouncer.key_pressed(room);
    let second = debouncer.key_pressed(room);
    let third = debouncer.key_pressed(room);

    assert_eq!(debouncer.idle_elapsed(first.generation), None);
    assert_eq!(debouncer.idle_elapsed(second.generation), None);
    assert_eq!(debouncer.idle_elapsed(third.generation), Some(room));
    // The stop already fired; replaying the same timer is inert.
    assert_eq!(debouncer.idle_elapsed(third.generation), None);
}

#[test]
fn explicit_stop_emits_once_and_disarms_timer() {
    let mut debouncer = TypingDebouncer::default();
    let room = RoomId(7);

    assert!(!debouncer.explicit_stop(room), "no burst active yet");

    let press = debouncer.key_pressed(room);
    assert!(debouncer.explicit_stop(room));
    assert!(!debouncer.explicit_stop(room));
    assert_eq!(debouncer.idle_elapsed(press.generation), None);
}

#[test]
fn reset_cancels_pending_stop_without_emitting() {
    let mut debouncer = TypingDebouncer::default();
    let room = RoomId(7);

    let press = debouncer.key_pressed(room);
    debouncer.reset();

    assert_eq!(debouncer.idle_elapsed(press.generation), None);
    // A new burst after the reset behaves like the first one.
    assert!(debouncer.key_pressed(room).emit_start);
}
