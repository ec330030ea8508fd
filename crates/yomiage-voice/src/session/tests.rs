//! Session state machine and queue discipline tests.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use yomiage_store::{DictionaryStore, PreferenceStore};
use yomiage_types::{ChannelId, GuildId, UserId, UserPreference};

use super::{SessionManager, SessionSettings, SpeakOutcome};
use crate::error::VoiceError;
use crate::testing::{FakeConnection, FakeGateway, FakeSynthesizer};

const GUILD: GuildId = GuildId(100);
const CHANNEL: ChannelId = ChannelId(200);
const ALICE: UserId = UserId(1);
const BOB: UserId = UserId(2);
const OTHER_GUILD: GuildId = GuildId(999);
const OTHER_CHANNEL: ChannelId = ChannelId(998);

struct Harness {
    manager: SessionManager,
    gateway: Arc<FakeGateway>,
    synth: Arc<FakeSynthesizer>,
    _dir: tempfile::TempDir,
}

fn harness(gateway: Arc<FakeGateway>) -> Harness {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let preferences = Arc::new(PreferenceStore::load(dir.path().join("prefs.json")));
    let dictionary = Arc::new(DictionaryStore::load(dir.path().join("dict.json")));
    let synth = FakeSynthesizer::new();
    let settings = SessionSettings {
        defaults: UserPreference::new(1, 1.0),
        join_phrase: "join".to_string(),
        leave_phrase: "leave".to_string(),
        ..SessionSettings::default()
    };
    let manager = SessionManager::new(
        gateway.clone(),
        synth.clone(),
        preferences,
        dictionary,
        settings,
    );
    Harness {
        manager,
        gateway,
        synth,
        _dir: dir,
    }
}

async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("operation should finish in time")
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

async fn joined(h: &Harness) -> Arc<FakeConnection> {
    h.manager
        .join(GUILD, CHANNEL, ALICE)
        .await
        .expect("join should succeed");
    h.gateway.last_connection().expect("gateway should connect")
}

// ── lifecycle ────────────────────────────────────────────────────────

#[tokio::test]
async fn join_connects_and_announces_with_default_voice() {
    let h = harness(FakeGateway::auto_finishing());
    let conn = joined(&h).await;

    assert!(h.manager.is_reading(GUILD));
    assert_eq!(h.manager.session_channel(GUILD), Some(CHANNEL));
    assert_eq!((conn.guild, conn.channel), (GUILD, CHANNEL));

    within(conn.wait_for_tracks(1)).await;
    assert_eq!(conn.played_texts(), vec!["join"]);

    let requests = h.synth.requests();
    assert_eq!(requests[0].speaker_id, 1);
    assert_eq!(requests[0].speed, 1.0);
}

#[tokio::test]
async fn second_join_reports_already_connected() {
    let h = harness(FakeGateway::auto_finishing());
    joined(&h).await;

    let err = h
        .manager
        .join(GUILD, ChannelId(999), BOB)
        .await
        .expect_err("second join should fail");
    assert!(matches!(err, VoiceError::AlreadyConnected));
    assert_eq!(h.gateway.connect_count(), 1);
    assert_eq!(h.manager.session_channel(GUILD), Some(CHANNEL));
}

#[tokio::test]
async fn failed_connect_leaves_guild_disconnected() {
    let h = harness(FakeGateway::new());
    h.gateway.set_fail_connect(true);

    let err = h
        .manager
        .join(GUILD, CHANNEL, ALICE)
        .await
        .expect_err("join should fail");
    assert!(matches!(err, VoiceError::Transport(_)));
    assert!(h.manager.session(GUILD).is_none());
    assert!(!h.manager.is_reading(GUILD));
}

#[tokio::test]
async fn leave_without_session_reports_not_connected() {
    let h = harness(FakeGateway::new());
    let err = h
        .manager
        .leave(GUILD, ALICE)
        .await
        .expect_err("leave should fail");
    assert!(matches!(err, VoiceError::NotConnected));
}

#[tokio::test]
async fn join_bye_join_creates_a_fresh_session() {
    let h = harness(FakeGateway::auto_finishing());
    let first = joined(&h).await;

    within(h.manager.leave(GUILD, ALICE))
        .await
        .expect("leave should succeed");
    assert!(h.manager.session(GUILD).is_none());
    assert!(first.is_disconnected());
    assert_eq!(first.played_texts(), vec!["join", "leave"]);

    let second = joined(&h).await;
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(h.manager.is_reading(GUILD));
    assert_eq!(h.gateway.connect_count(), 2);
    within(second.wait_for_tracks(1)).await;
    assert_eq!(second.played_texts(), vec!["join"]);
}

#[tokio::test]
async fn leave_plays_already_queued_messages_before_farewell() {
    let h = harness(FakeGateway::auto_finishing());
    let conn = joined(&h).await;
    h.manager.speak(GUILD, BOB, "still queued");

    within(h.manager.leave(GUILD, ALICE))
        .await
        .expect("leave should succeed");
    assert_eq!(conn.played_texts(), vec!["join", "still queued", "leave"]);
    assert_eq!(h.manager.speak(GUILD, BOB, "late"), SpeakOutcome::Ignored);
}

#[tokio::test]
async fn other_guild_can_join_while_one_guild_is_leaving() {
    let h = harness(FakeGateway::new());
    let conn = joined(&h).await;
    within(conn.wait_for_tracks(1)).await;
    h.manager.speak(GUILD, BOB, "queued");

    let leave = h.manager.leave(GUILD, ALICE);
    tokio::pin!(leave);
    tokio::select! {
        _ = &mut leave => panic!("leave should wait for queued playback"),
        _ = settle() => {}
    }

    within(h.manager.join(OTHER_GUILD, OTHER_CHANNEL, BOB))
        .await
        .expect("join in another guild should not wait");
    assert!(h.manager.is_reading(OTHER_GUILD));
    assert!(h.manager.session(GUILD).is_some());
    assert!(!h.manager.is_reading(GUILD));

    for count in 2..=3 {
        conn.finish_current();
        within(conn.wait_for_tracks(count)).await;
    }
    conn.finish_current();
    within(leave).await.expect("leave should succeed");
    assert_eq!(conn.played_texts(), vec!["join", "queued", "leave"]);
    assert!(h.manager.session(GUILD).is_none());
}

#[tokio::test]
async fn skip_still_works_while_leaving() {
    let h = harness(FakeGateway::new());
    let conn = joined(&h).await;
    within(conn.wait_for_tracks(1)).await;
    h.manager.speak(GUILD, BOB, "long queued message");

    let leave = h.manager.leave(GUILD, ALICE);
    tokio::pin!(leave);
    tokio::select! {
        _ = &mut leave => panic!("leave should wait for queued playback"),
        _ = settle() => {}
    }
    assert_eq!(h.manager.speak(GUILD, BOB, "too late"), SpeakOutcome::Ignored);

    h.manager.skip(GUILD).expect("join phrase should be skippable");
    within(conn.wait_for_tracks(2)).await;
    h.manager.skip(GUILD).expect("queued message should be skippable");
    within(conn.wait_for_tracks(3)).await;
    conn.finish_current();

    within(leave).await.expect("leave should succeed");
    assert_eq!(conn.played_texts(), vec!["join", "long queued message", "leave"]);
    assert_eq!(conn.stop_count(), 2);
    assert!(conn.is_disconnected());
    assert!(matches!(h.manager.skip(GUILD), Err(VoiceError::NothingPlaying)));
}

#[tokio::test]
async fn lost_connection_drops_session_and_stops_playback() {
    let h = harness(FakeGateway::new());
    let conn = joined(&h).await;
    within(conn.wait_for_tracks(1)).await;

    assert!(conn.drop_connection());
    within(async {
        while h.manager.session(GUILD).is_some() {
            settle().await;
        }
    })
    .await;

    assert_eq!(conn.stop_count(), 1);
    assert_eq!(conn.active_count(), 0);
    assert_eq!(h.manager.speak(GUILD, ALICE, "after"), SpeakOutcome::Ignored);
}

#[tokio::test]
async fn late_loss_report_from_old_connection_keeps_new_session() {
    let h = harness(FakeGateway::auto_finishing());
    let first = joined(&h).await;
    within(h.manager.leave(GUILD, ALICE))
        .await
        .expect("leave should succeed");
    let second = joined(&h).await;

    first.drop_connection();
    settle().await;

    assert!(h.manager.is_reading(GUILD));
    assert!(!second.is_disconnected());
    assert_eq!(h.manager.speak(GUILD, BOB, "still here"), SpeakOutcome::Queued);
}

#[tokio::test]
async fn relocate_updates_session_channel() {
    let h = harness(FakeGateway::auto_finishing());
    joined(&h).await;

    h.manager.relocate(GUILD, ChannelId(300));
    assert_eq!(h.manager.session_channel(GUILD), Some(ChannelId(300)));
}

// ── speak ────────────────────────────────────────────────────────────

#[tokio::test]
async fn speak_without_session_is_ignored() {
    let h = harness(FakeGateway::new());
    assert_eq!(h.manager.speak(GUILD, ALICE, "hello"), SpeakOutcome::Ignored);
    assert!(h.synth.requests().is_empty());
}

#[tokio::test]
async fn blank_text_is_ignored() {
    let h = harness(FakeGateway::auto_finishing());
    joined(&h).await;
    assert_eq!(h.manager.speak(GUILD, ALICE, "   "), SpeakOutcome::Ignored);

    h.manager
        .dictionary()
        .add("消える", "")
        .expect("add should succeed");
    assert_eq!(h.manager.speak(GUILD, ALICE, "消える"), SpeakOutcome::Ignored);
}

#[tokio::test]
async fn dictionary_is_applied_before_synthesis() {
    let h = harness(FakeGateway::auto_finishing());
    h.manager
        .dictionary()
        .add("foo", "bar")
        .expect("add should succeed");
    let conn = joined(&h).await;

    assert_eq!(
        h.manager.speak(GUILD, ALICE, "foo baz foo"),
        SpeakOutcome::Queued
    );
    within(conn.wait_for_tracks(2)).await;

    let texts: Vec<String> = h.synth.requests().into_iter().map(|r| r.text).collect();
    assert_eq!(texts, vec!["join", "bar baz bar"]);
}

#[tokio::test]
async fn stored_preference_voices_the_message() {
    let h = harness(FakeGateway::auto_finishing());
    h.manager
        .preferences()
        .set(BOB, UserPreference::new(3, 1.5))
        .expect("set should succeed");
    let conn = joined(&h).await;

    h.manager.speak(GUILD, BOB, "bob speaks");
    h.manager.speak(GUILD, ALICE, "alice speaks");
    within(conn.wait_for_tracks(3)).await;

    let requests = h.synth.requests();
    assert_eq!((requests[1].speaker_id, requests[1].speed), (3, 1.5));
    assert_eq!((requests[2].speaker_id, requests[2].speed), (1, 1.0));
}

#[tokio::test]
async fn synthesis_failure_drops_request_and_keeps_reading() {
    let h = harness(FakeGateway::auto_finishing());
    h.synth.fail_on("boom");
    let conn = joined(&h).await;

    h.manager.speak(GUILD, ALICE, "boom");
    h.manager.speak(GUILD, ALICE, "after");
    within(conn.wait_for_tracks(2)).await;

    assert_eq!(conn.played_texts(), vec!["join", "after"]);
    assert!(h.manager.is_reading(GUILD));
    assert_eq!(h.synth.requests().len(), 3);
}

#[tokio::test]
async fn successful_playback_completes_exactly_once() {
    let h = harness(FakeGateway::new());
    let conn = joined(&h).await;
    within(conn.wait_for_tracks(1)).await;

    let track = conn.tracks().remove(0);
    assert!(!track.signal.is_complete());
    assert!(conn.finish_current());
    assert!(track.signal.is_complete());
    assert!(!track.signal.complete());
}

// ── queue discipline ─────────────────────────────────────────────────

#[tokio::test]
async fn messages_play_in_order_one_at_a_time() {
    let h = harness(FakeGateway::new());
    let conn = joined(&h).await;
    within(conn.wait_for_tracks(1)).await;

    h.manager.speak(GUILD, ALICE, "A");
    h.manager.speak(GUILD, BOB, "B");
    settle().await;
    assert_eq!(conn.track_count(), 1, "nothing may start while join plays");

    conn.finish_current();
    within(conn.wait_for_tracks(2)).await;
    settle().await;
    assert_eq!(conn.track_count(), 2, "B must wait for A");

    conn.finish_current();
    within(conn.wait_for_tracks(3)).await;
    conn.finish_current();

    assert_eq!(conn.played_texts(), vec!["join", "A", "B"]);
    assert_eq!(conn.max_concurrent(), 1);
}

#[tokio::test]
async fn burst_of_messages_never_overlaps() {
    let h = Arc::new(harness(FakeGateway::auto_finishing()));
    let conn = joined(&h).await;

    let mut tasks = Vec::new();
    for i in 0..20 {
        let h = Arc::clone(&h);
        tasks.push(tokio::spawn(async move {
            h.manager.speak(GUILD, UserId(i), &format!("m{i}"));
        }));
    }
    for task in tasks {
        task.await.expect("speak task should not panic");
    }

    within(conn.wait_for_tracks(21)).await;
    assert_eq!(conn.max_concurrent(), 1);
}

// ── skip ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn skip_with_nothing_playing_reports_nothing_playing() {
    let h = harness(FakeGateway::auto_finishing());
    assert!(matches!(h.manager.skip(GUILD), Err(VoiceError::NothingPlaying)));

    let conn = joined(&h).await;
    within(conn.wait_for_tracks(1)).await;
    settle().await;

    assert!(matches!(h.manager.skip(GUILD), Err(VoiceError::NothingPlaying)));
    assert_eq!(conn.stop_count(), 0);
    assert!(h.manager.is_reading(GUILD));
}

#[tokio::test]
async fn skip_stops_current_and_next_starts() {
    let h = harness(FakeGateway::new());
    let conn = joined(&h).await;
    within(conn.wait_for_tracks(1)).await;

    h.manager.speak(GUILD, ALICE, "long message");
    h.manager.speak(GUILD, BOB, "next");

    h.manager.skip(GUILD).expect("join phrase should be skippable");
    within(conn.wait_for_tracks(2)).await;
    h.manager.skip(GUILD).expect("long message should be skippable");
    within(conn.wait_for_tracks(3)).await;

    assert_eq!(conn.played_texts(), vec!["join", "long message", "next"]);
    assert_eq!(conn.stop_count(), 2);
    assert_eq!(conn.max_concurrent(), 1);
}

#[tokio::test(start_paused = true)]
async fn skip_while_track_is_starting_stops_it_once_started() {
    let gateway = FakeGateway::new();
    gateway.set_start_delay(Duration::from_secs(1));
    let h = harness(gateway);
    let conn = joined(&h).await;
    settle().await;
    assert_eq!(conn.track_count(), 0, "join phrase should still be starting");

    h.manager.skip(GUILD).expect("a starting track should be skippable");
    conn.wait_for_tracks(1).await;
    settle().await;

    assert_eq!(conn.stop_count(), 1);
    assert_eq!(conn.active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn stalled_playback_is_stopped_after_limit() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let gateway = FakeGateway::new();
    let manager = SessionManager::new(
        gateway.clone(),
        FakeSynthesizer::new(),
        Arc::new(PreferenceStore::load(dir.path().join("p.json"))),
        Arc::new(DictionaryStore::load(dir.path().join("d.json"))),
        SessionSettings {
            max_playback: Duration::from_secs(10),
            ..SessionSettings::default()
        },
    );
    manager
        .join(GUILD, CHANNEL, ALICE)
        .await
        .expect("join should succeed");
    let conn = gateway.last_connection().expect("should connect");
    manager.speak(GUILD, ALICE, "second");

    conn.wait_for_tracks(1).await;
    tokio::time::sleep(Duration::from_secs(11)).await;
    conn.wait_for_tracks(2).await;

    assert_eq!(conn.stop_count(), 1);
}

// ── auto-join flag ───────────────────────────────────────────────────

#[tokio::test]
async fn toggle_auto_join_flips_flag() {
    let h = harness(FakeGateway::new());
    assert!(h.manager.auto_join());
    assert!(!h.manager.toggle_auto_join());
    assert!(!h.manager.auto_join());
    assert!(h.manager.toggle_auto_join());
}

// ── dictionary cache ─────────────────────────────────────────────────

#[tokio::test]
async fn compiled_dictionary_is_reused_until_it_changes() {
    let h = harness(FakeGateway::auto_finishing());
    h.manager
        .dictionary()
        .add("foo", "bar")
        .expect("add should succeed");

    let first = h.manager.preparer();
    assert!(Arc::ptr_eq(&first, &h.manager.preparer()));
    assert_eq!(first.apply("foo"), "bar");

    h.manager
        .dictionary()
        .add("bar", "baz")
        .expect("add should succeed");
    let rebuilt = h.manager.preparer();
    assert!(!Arc::ptr_eq(&first, &rebuilt));
    assert_eq!(rebuilt.apply("foo"), "baz");
}
