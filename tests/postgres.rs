//! Runs the postgres store against a real database. Needs
//! `DATABASE_URL`; run with `cargo test --test postgres -- --ignored`.
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use playcount::models::{PlayEvent, PlaySource};
use playcount::store::{DedupKey, PgStore, PlayStore};

async fn connect() -> PgStore {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let store = PgStore::connect(&url, 4, StdDuration::from_secs(5))
        .await
        .expect("error connecting to DATABASE_URL");
    store.migrate().await.expect("error running migrations");
    store
}

// fresh ids so runs against the same database don't see each other
fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

fn event(track_id: &str, session_id: &str, counted: bool, played_at: DateTime<Utc>) -> PlayEvent {
    PlayEvent {
        id: Uuid::new_v4(),
        track_id: track_id.to_string(),
        user_id: None,
        session_id: session_id.to_string(),
        listen_duration_seconds: 60,
        completed_full: counted,
        source: PlaySource::Playlist,
        ip_hash: "0".repeat(64),
        counted_as_play: counted,
        played_at,
    }
}

#[async_std::test]
#[ignore = "requires DATABASE_URL"]
async fn increment_creates_then_adds() {
    let store = connect().await;
    let track = unique("track");
    assert_eq!(store.track_plays(&track).await.unwrap(), 0);

    store.increment_track_plays(&track).await.unwrap();
    store.increment_track_plays(&track).await.unwrap();
    assert_eq!(store.track_plays(&track).await.unwrap(), 2);

    let tasks = (0..20)
        .map(|_| {
            let store = store.clone();
            let track = track.clone();
            async_std::task::spawn(async move { store.increment_track_plays(&track).await })
        })
        .collect::<Vec<_>>();
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(store.track_plays(&track).await.unwrap(), 22);
}

#[async_std::test]
#[ignore = "requires DATABASE_URL"]
async fn reconcile_sets_plays_to_counted_events() {
    let store = connect().await;
    let track = unique("track");
    let now = Utc::now();
    store.append(&event(&track, "s1", true, now)).await.unwrap();
    store.append(&event(&track, "s2", true, now)).await.unwrap();
    store.append(&event(&track, "s3", false, now)).await.unwrap();
    for _ in 0..5 {
        store.increment_track_plays(&track).await.unwrap();
    }

    assert_eq!(store.reconcile_track_plays(&track).await.unwrap(), (5, 2));
    assert_eq!(store.reconcile_track_plays(&track).await.unwrap(), (2, 2));
    assert!(store.known_track_ids().await.unwrap().contains(&track));

    // a track with no aggregate row yet gets one
    let fresh = unique("track");
    store.append(&event(&fresh, "s1", true, now)).await.unwrap();
    assert_eq!(store.reconcile_track_plays(&fresh).await.unwrap(), (0, 1));
}

#[async_std::test]
#[ignore = "requires DATABASE_URL"]
async fn counted_play_lookup_respects_the_window() {
    let store = connect().await;
    let track = unique("track");
    let session = unique("session");
    let played = Utc::now() - Duration::minutes(30);
    store.append(&event(&track, &session, true, played)).await.unwrap();
    store.append(&event(&track, "other", false, played)).await.unwrap();

    let key = DedupKey::Session(&session);
    let as_of = played + Duration::minutes(10);
    assert!(store
        .counted_play_exists(&track, key, as_of - Duration::hours(1), as_of)
        .await
        .unwrap());
    // the boundary instant is inside the window
    assert!(store
        .counted_play_exists(&track, key, played, as_of)
        .await
        .unwrap());
    assert!(!store
        .counted_play_exists(&track, key, played + Duration::seconds(1), as_of)
        .await
        .unwrap());
    assert!(!store
        .counted_play_exists(&track, key, played - Duration::hours(1), played)
        .await
        .unwrap());
    assert!(!store
        .counted_play_exists(&track, DedupKey::Session("other"), played, as_of)
        .await
        .unwrap());
}

#[async_std::test]
#[ignore = "requires DATABASE_URL"]
async fn artist_rollups_follow_registration() {
    let store = connect().await;
    let artist = unique("artist");
    let (t1, t2) = (unique("track"), unique("track"));
    store.register_track(&t1, Some(&artist)).await.unwrap();
    store.register_track(&t2, Some(&artist)).await.unwrap();
    let now = Utc::now();
    store.append(&event(&t1, "s1", true, now)).await.unwrap();
    store.append(&event(&t1, "s2", true, now)).await.unwrap();
    store.append(&event(&t2, "s1", true, now)).await.unwrap();
    store.append(&event(&t2, "s4", false, now)).await.unwrap();

    let rollups = store.artist_rollups(&artist).await.unwrap();
    assert_eq!(rollups.len(), 2);
    assert_eq!(rollups[0].track_id, t1);
    assert_eq!(rollups[0].plays, 2);
    assert_eq!(store.artist_unique_listeners(&artist).await.unwrap(), 2);

    let sources = store.source_counts(&t1).await.unwrap();
    assert_eq!(sources, vec![(PlaySource::Playlist, 2)]);
}
