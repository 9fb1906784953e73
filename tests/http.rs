use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use serde_json::{json, Value};
use tide::http::{Method, Request, Response, Url};

use playcount::clock::ManualClock;
use playcount::crypto::IpHasher;
use playcount::ingest::{PlayEngine, PlayRules};
use playcount::service::{build_app, Context};
use playcount::store::{MemoryStore, PlayStore};

struct App {
    server: tide::Server<Context>,
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
}

impl App {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let engine = PlayEngine::new(
            store.clone(),
            PlayRules::default(),
            IpHasher::new(b"an-http-test-key-that-is-32-bytes"),
            clock.clone(),
        );
        Self {
            server: build_app(Arc::new(engine)),
            store,
            clock,
        }
    }

    async fn send(&self, req: Request) -> (u16, Value) {
        let mut res: Response = self.server.respond(req).await.unwrap();
        let status = u16::from(res.status());
        let body: Value = res.body_json().await.unwrap();
        (status, body)
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let url = Url::parse(&format!("http://localhost{}", path)).unwrap();
        self.send(Request::new(Method::Get, url)).await
    }

    async fn post(&self, path: &str) -> (u16, Value) {
        let url = Url::parse(&format!("http://localhost{}", path)).unwrap();
        self.send(Request::new(Method::Post, url)).await
    }

    async fn put_artist(&self, track: &str, body: Value) -> (u16, Value) {
        let url = Url::parse(&format!("http://localhost/api/plays/track/{}/artist", track)).unwrap();
        let mut req = Request::new(Method::Put, url);
        req.set_body(body);
        self.send(req).await
    }

    async fn record(&self, body: Value, ip: &str, user: Option<&str>) -> (u16, Value) {
        let url = Url::parse("http://localhost/api/plays/record").unwrap();
        let mut req = Request::new(Method::Post, url);
        req.insert_header("x-forwarded-for", ip);
        if let Some(user) = user {
            req.insert_header("x-user-id", user);
        }
        req.set_body(body);
        // each play lands a little after the one before it
        let res = self.send(req).await;
        self.clock.advance(Duration::seconds(1));
        res
    }
}

fn play(track: &str, session: &str, secs: i64) -> Value {
    json!({
        "trackId": track,
        "sessionId": session,
        "listenDurationSeconds": secs,
        "completedFull": secs >= 180,
        "source": "search",
    })
}

#[async_std::test]
async fn status_reports_ok() {
    let app = App::new();
    let (status, body) = app.get("/api/status").await;
    assert_eq!(status, 200);
    assert_eq!(body["ok"], "ok");
}

#[async_std::test]
async fn first_engaged_listen_is_counted() {
    let app = App::new();
    let (status, body) = app.record(play("t1", "s1", 45), "1.1.1.1", None).await;
    assert_eq!(status, 200);
    assert_eq!(body["counted"], true);
    assert_eq!(body["reason"], Value::Null);
    assert!(body["eventId"].is_string());
    assert!(body.get("aggregatePending").is_none());
    assert_eq!(app.store.track_plays("t1").await.unwrap(), 1);
}

#[async_std::test]
async fn short_listen_is_logged_but_not_counted() {
    let app = App::new();
    let (status, body) = app.record(play("t1", "s1", 10), "1.1.1.1", None).await;
    assert_eq!(status, 200);
    assert_eq!(body["counted"], false);
    assert_eq!(body["reason"], "Listen duration below 30 seconds minimum");
    assert_eq!(app.store.events().await.len(), 1);
    assert_eq!(app.store.track_plays("t1").await.unwrap(), 0);
}

#[async_std::test]
async fn repeat_from_same_user_is_a_duplicate() {
    let app = App::new();
    let (_, first) = app.record(play("t1", "s1", 60), "1.1.1.1", Some("u1")).await;
    assert_eq!(first["counted"], true);

    // new session and network, same signed-in user
    let (status, second) = app.record(play("t1", "s2", 60), "2.2.2.2", Some("u1")).await;
    assert_eq!(status, 200);
    assert_eq!(second["counted"], false);
    assert_eq!(second["reason"], "Duplicate play within 1 hour for this user");
    assert_eq!(app.store.track_plays("t1").await.unwrap(), 1);

    // nothing in common with the first listener
    let (_, third) = app.record(play("t1", "s3", 45), "4.4.4.4", Some("u2")).await;
    assert_eq!(third["counted"], true);
    assert_eq!(third["reason"], Value::Null);
    assert_eq!(app.store.track_plays("t1").await.unwrap(), 2);
}

#[async_std::test]
async fn same_network_is_a_duplicate_across_sessions() {
    let app = App::new();
    let (_, first) = app.record(play("t1", "s1", 60), "3.3.3.3", None).await;
    assert_eq!(first["counted"], true);
    let (_, second) = app.record(play("t1", "s2", 60), "3.3.3.3", None).await;
    assert_eq!(second["counted"], false);
    assert_eq!(
        second["reason"],
        "Duplicate play within 1 hour from this network address"
    );

    // a different track isn't affected
    let (_, other) = app.record(play("t2", "s2", 60), "3.3.3.3", None).await;
    assert_eq!(other["counted"], true);
}

#[async_std::test]
async fn counted_again_once_the_window_passes() {
    let app = App::new();
    let (_, first) = app.record(play("t1", "s1", 60), "1.1.1.1", None).await;
    assert_eq!(first["counted"], true);
    app.clock.advance(Duration::hours(1));
    let (_, again) = app.record(play("t1", "s1", 60), "1.1.1.1", None).await;
    assert_eq!(again["counted"], true);
    assert_eq!(app.store.track_plays("t1").await.unwrap(), 2);
}

#[async_std::test]
async fn malformed_plays_are_rejected_without_a_trace() {
    let app = App::new();
    let (status, body) = app.record(play("t1", "s1", -5), "1.1.1.1", None).await;
    assert_eq!(status, 400);
    assert!(body["error"].is_string());

    let (status, _) = app.record(play("", "s1", 60), "1.1.1.1", None).await;
    assert_eq!(status, 400);

    let mut bad_source = play("t1", "s1", 60);
    bad_source["source"] = json!("radio");
    let (status, _) = app.record(bad_source, "1.1.1.1", None).await;
    assert_eq!(status, 400);

    let (status, _) = app.record(json!({ "trackId": "t1" }), "1.1.1.1", None).await;
    assert_eq!(status, 400);

    assert!(app.store.events().await.is_empty());
}

#[async_std::test]
async fn failed_increment_leaves_the_aggregate_pending() {
    let app = App::new();
    app.store.fail_increments(true);
    let (status, body) = app.record(play("t1", "s1", 60), "1.1.1.1", None).await;
    assert_eq!(status, 200);
    assert_eq!(body["counted"], true);
    assert_eq!(body["aggregatePending"], true);
    assert_eq!(app.store.track_plays("t1").await.unwrap(), 0);

    app.store.fail_increments(false);
    let (status, report) = app.post("/api/plays/track/t1/reconcile").await;
    assert_eq!(status, 200);
    assert_eq!(report["before"], 0);
    assert_eq!(report["after"], 1);
    assert_eq!(app.store.track_plays("t1").await.unwrap(), 1);
}

#[async_std::test]
async fn failed_append_is_a_server_error() {
    let app = App::new();
    app.store.fail_appends(true);
    let (status, body) = app.record(play("t1", "s1", 60), "1.1.1.1", None).await;
    assert_eq!(status, 500);
    assert_eq!(body["error"], "internal store error");
    assert_eq!(app.store.track_plays("t1").await.unwrap(), 0);
}

#[async_std::test]
async fn stats_endpoints_roll_up_the_log() {
    let app = App::new();
    app.put_artist("t1", json!({ "artistId": "ar1" })).await;
    app.put_artist("t2", json!({ "artistId": "ar1" })).await;
    app.record(play("t1", "s1", 200), "1.1.1.1", None).await;
    app.record(play("t1", "s2", 40), "2.2.2.2", None).await;
    app.record(play("t1", "s3", 5), "3.3.3.3", None).await;
    app.record(play("t2", "s1", 60), "1.1.1.1", None).await;

    let (status, stats) = app.get("/api/plays/track/t1/stats?period=1d").await;
    assert_eq!(status, 200);
    assert_eq!(stats["totalPlays"], 2);
    assert_eq!(stats["uniqueListeners"], 2);
    assert_eq!(stats["completionRate"], 0.5);
    assert_eq!(stats["period"], "1d");

    let (status, sources) = app.get("/api/plays/track/t1/sources").await;
    assert_eq!(status, 200);
    assert_eq!(sources["sources"]["search"], 2);
    assert_eq!(sources["sources"]["direct"], 0);

    let (status, top) = app.get("/api/plays/top-tracks?period=7d&limit=1").await;
    assert_eq!(status, 200);
    assert_eq!(top["tracks"].as_array().unwrap().len(), 1);
    assert_eq!(top["tracks"][0]["trackId"], "t1");

    let (status, overview) = app.get("/api/plays/artist/ar1/overview").await;
    assert_eq!(status, 200);
    assert_eq!(overview["totalPlays"], 3);
    assert_eq!(overview["totalTracks"], 2);

    let (status, _) = app.get("/api/plays/track/t1/stats?period=soon").await;
    assert_eq!(status, 400);
}

#[async_std::test]
async fn artist_overview_builds_from_registered_tracks() {
    let app = App::new();
    let (status, body) = app.put_artist("t1", json!({ "artistId": "ar1" })).await;
    assert_eq!(status, 200);
    assert_eq!(body["trackId"], "t1");
    assert_eq!(body["artistId"], "ar1");
    app.put_artist("t2", json!({ "artistId": "ar1" })).await;
    app.put_artist("t3", json!({ "artistId": "ar2" })).await;

    app.record(play("t1", "s1", 200), "1.1.1.1", None).await;
    app.record(play("t1", "s2", 60), "2.2.2.2", None).await;
    app.record(play("t2", "s1", 60), "1.1.1.1", None).await;
    app.record(play("t3", "s9", 60), "9.9.9.9", None).await;

    let (status, overview) = app.get("/api/plays/artist/ar1/overview").await;
    assert_eq!(status, 200);
    assert_eq!(overview["totalPlays"], 3);
    assert_eq!(overview["uniqueListeners"], 2);
    assert_eq!(overview["totalTracks"], 2);
    assert_eq!(overview["topTracks"][0]["trackId"], "t1");

    let (status, _) = app.put_artist("t1", json!({ "artistId": " " })).await;
    assert_eq!(status, 400);
    let (status, _) = app.put_artist("t1", json!({})).await;
    assert_eq!(status, 400);
}
