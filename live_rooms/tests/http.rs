use axum::http::{Request, StatusCode};
use hyper::Body;
use live_rooms::api::{build_router, AppState};
use live_rooms::config::{Config, RoomSettings};
use room_api::{CreateRoom, EndStream, Identity, MessageType, RoomSpec, SendMessage};
use serde_json::Value;
use std::net::{SocketAddr, TcpListener};
use tokio::task::JoinHandle;
use tower::ServiceExt;

fn config(data_dir: &std::path::Path, bind: String) -> Config {
    Config {
        bind,
        data_dir: data_dir.to_path_buf(),
        logging_enabled: false,
        rooms: RoomSettings::default(),
    }
}

async fn spawn_server() -> (SocketAddr, JoinHandle<()>, AppState, tempfile::TempDir) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let state = AppState::new(config(tmp.path(), addr.to_string())).await.unwrap();
    let app = build_router(state.clone());
    let server = tokio::spawn(async move {
        axum::Server::from_tcp(listener)
            .unwrap()
            .serve(app.into_make_service())
            .await
            .unwrap();
    });
    (addr, server, state, tmp)
}

fn ident(uid: &str) -> Identity {
    Identity {
        uid: uid.into(),
        display_name: uid.to_uppercase(),
        username: uid.into(),
        avatar: None,
    }
}

/// Two rooms: "jazz" (live, three messages, one deleted) and "chess" (ended).
async fn seed(state: &AppState) {
    let engine = &state.engine;
    let (a, _a_rx) = engine.connect();
    let (b, _b_rx) = engine.connect();
    engine
        .create_room(
            a.conn(),
            CreateRoom {
                room: RoomSpec {
                    id: Some("jazz".into()),
                    title: "Jazz Night".into(),
                    description: Some("smooth tunes".into()),
                    category: Some("music".into()),
                    max_participants: None,
                },
                user: ident("a"),
            },
        )
        .await
        .unwrap();
    for text in ["Hi all", "welcome", "oh hi"] {
        engine
            .send_message(
                a.conn(),
                SendMessage {
                    room_id: "jazz".into(),
                    text: text.into(),
                    user: ident("a"),
                    kind: MessageType::Text,
                },
            )
            .unwrap();
    }
    engine.outbox().flush().await;
    let newest = engine
        .query(|s| s.list_recent_messages("jazz", 1))
        .await
        .unwrap();
    engine
        .delete_message(
            a.conn(),
            room_api::DeleteMessage {
                room_id: "jazz".into(),
                message_id: newest[0].id.clone(),
                user: ident("a"),
            },
        )
        .await
        .unwrap();

    engine
        .create_room(
            b.conn(),
            CreateRoom {
                room: RoomSpec {
                    id: Some("chess".into()),
                    title: "Chess".into(),
                    category: Some("games".into()),
                    ..Default::default()
                },
                user: ident("b"),
            },
        )
        .await
        .unwrap();
    engine
        .end_stream(
            b.conn(),
            EndStream {
                room_id: "chess".into(),
                user: None,
            },
        )
        .unwrap();
    engine.outbox().flush().await;
}

#[tokio::test]
async fn health_via_router() {
    let tmp = tempfile::tempdir().unwrap();
    let state = AppState::new(config(tmp.path(), "127.0.0.1:0".into()))
        .await
        .unwrap();
    let resp = build_router(state)
        .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
    assert_eq!(&body[..], b"ok");
}

#[tokio::test]
async fn rooms_listing_and_lookup() {
    let (addr, server, state, _tmp) = spawn_server().await;
    seed(&state).await;
    let client = reqwest::Client::new();
    let base = format!("http://{}", addr);

    let page: Value = client
        .get(format!("{base}/api/rooms"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page["total"], 2);
    assert_eq!(page["page"], 1);

    let live: Value = client
        .get(format!("{base}/api/rooms?status=live"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(live["total"], 1);
    assert_eq!(live["rooms"][0]["id"], "jazz");

    let found: Value = client
        .get(format!("{base}/api/rooms?search=SMOOTH&category=music"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(found["rooms"][0]["title"], "Jazz Night");

    let resp = client
        .get(format!("{base}/api/rooms?status=bogus"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

    let far: Value = client
        .get(format!("{base}/api/rooms?page={}", usize::MAX))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(far["rooms"].as_array().unwrap().is_empty());
    assert_eq!(far["total"], 2);

    let room: Value = client
        .get(format!("{base}/api/rooms/jazz"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(room["currentParticipants"], 1);
    assert_eq!(room["admin"]["uid"], "a");

    let resp = client
        .get(format!("{base}/api/rooms/nope"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "ROOM_NOT_FOUND");

    let cats: Vec<String> = client
        .get(format!("{base}/api/categories"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cats, vec!["games", "music"]);

    server.abort();
}

#[tokio::test]
async fn history_search_and_stats() {
    let (addr, server, state, _tmp) = spawn_server().await;
    seed(&state).await;
    let client = reqwest::Client::new();
    let base = format!("http://{}", addr);

    let first: Value = client
        .get(format!("{base}/api/rooms/jazz/messages?limit=2"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let msgs = first["messages"].as_array().unwrap();
    assert_eq!(msgs.len(), 2);
    assert_eq!(first["hasMore"], true);
    assert_eq!(msgs[0]["isDeleted"], true);

    let hits: Value = client
        .get(format!("{base}/api/rooms/jazz/messages/search?q=HI"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let hits = hits["messages"].as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["text"], "Hi all");

    let resp = client
        .get(format!("{base}/api/rooms/jazz/messages/search"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

    let stats: Value = client
        .get(format!("{base}/api/rooms/jazz/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["totalMessages"], 3);
    assert_eq!(stats["visibleMessages"], 2);
    assert_eq!(stats["status"], "live");

    let ended: Value = client
        .get(format!("{base}/api/rooms/chess/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ended["status"], "ended");
    assert!(ended["endedAt"].is_i64());

    server.abort();
}
