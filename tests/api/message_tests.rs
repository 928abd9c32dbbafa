//! REST message path: history, send, edit, delete and receipts

use axum::http::StatusCode;
use fake::{faker::lorem::en::Sentence, Fake};
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::common::{drain_frames, events_named, TestApp};
use chat_relay::domain::{CallLog, DeliveryStatus};

const CHAT: i64 = 100;
const ALICE: i64 = 1;
const BOB: i64 = 2;
const MALLORY: i64 = 3;

fn app_with_chat() -> TestApp {
    let app = TestApp::new();
    app.store.add_chat(CHAT, &[ALICE, BOB]);
    app
}

async fn send(app: &TestApp, user_id: i64, content: &str) -> serde_json::Value {
    let token = app.token_for(user_id);
    let (status, body) = app
        .request(
            "POST",
            &format!("/api/v1/chats/{CHAT}/messages"),
            Some(&token),
            Some(json!({ "content": content })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    body
}

#[tokio::test]
async fn send_persists_and_returns_string_ids() {
    let app = app_with_chat();
    let content: String = Sentence(3..8).fake();

    let body = send(&app, ALICE, &content).await;

    assert_eq!(body["content"], content.as_str());
    assert_eq!(body["chatId"], CHAT.to_string());
    assert_eq!(body["senderId"], ALICE.to_string());
    assert_eq!(body["type"], "text");
    assert!(body["id"].is_string());
    assert_eq!(app.store.message_count(), 1);

    let id: i64 = body["id"].as_str().unwrap().parse().unwrap();
    let record = app.store.delivery(id, BOB).unwrap();
    assert_eq!(record.status, DeliveryStatus::Sent);
    assert!(app.store.delivery(id, ALICE).is_none());
}

#[tokio::test]
async fn send_fans_out_to_every_member_connection() {
    let app = app_with_chat();
    let (_, mut alice_rx) = app.connect(ALICE).await;
    let (_, mut bob_rx) = app.connect(BOB).await;
    drain_frames(&mut alice_rx);
    drain_frames(&mut bob_rx);

    let body = send(&app, ALICE, "hello bob").await;

    for rx in [&mut alice_rx, &mut bob_rx] {
        let frames = drain_frames(rx);
        let new: Vec<_> = events_named(&frames, "message:new").collect();
        assert_eq!(new.len(), 1);
        assert_eq!(new[0]["data"]["id"], body["id"]);
        assert_eq!(new[0]["data"]["content"], "hello bob");
    }
}

#[tokio::test]
async fn non_member_cannot_send_or_read_history() {
    let app = app_with_chat();
    let token = app.token_for(MALLORY);

    let (status, _) = app
        .request(
            "POST",
            &format!("/api/v1/chats/{CHAT}/messages"),
            Some(&token),
            Some(json!({ "content": "let me in" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .request("GET", &format!("/api/v1/chats/{CHAT}/messages"), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(app.store.message_count(), 0);
}

#[tokio::test]
async fn empty_text_message_is_rejected() {
    let app = app_with_chat();
    let token = app.token_for(ALICE);

    let (status, _) = app
        .request(
            "POST",
            &format!("/api/v1/chats/{CHAT}/messages"),
            Some(&token),
            Some(json!({ "content": "   " })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.store.message_count(), 0);
}

#[tokio::test]
async fn malformed_chat_id_is_a_bad_request() {
    let app = app_with_chat();
    let token = app.token_for(ALICE);

    let (status, _) = app
        .request("GET", "/api/v1/chats/not-a-number/messages", Some(&token), None)
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn history_is_newest_first_with_viewer_status() {
    let app = app_with_chat();
    let first = send(&app, ALICE, "first").await;
    let second = send(&app, ALICE, "second").await;

    let (status, page) = app
        .request(
            "GET",
            &format!("/api/v1/chats/{CHAT}/messages"),
            Some(&app.token_for(BOB)),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    let page = page.as_array().unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0]["id"], second["id"]);
    assert_eq!(page[1]["id"], first["id"]);
    assert_eq!(page[0]["status"], "sent");
}

#[tokio::test]
async fn history_pages_backwards_from_cursor() {
    let app = app_with_chat();
    let first = send(&app, ALICE, "one").await;
    let second = send(&app, ALICE, "two").await;
    send(&app, ALICE, "three").await;

    let (_, page) = app
        .request(
            "GET",
            &format!(
                "/api/v1/chats/{CHAT}/messages?before={}&limit=1",
                second["id"].as_str().unwrap()
            ),
            Some(&app.token_for(BOB)),
            None,
        )
        .await;

    let page = page.as_array().unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0]["id"], first["id"]);
}

#[tokio::test]
async fn receipts_only_move_forward() {
    let app = app_with_chat();
    let message = send(&app, ALICE, "did you get this").await;
    let uri = format!("/api/v1/messages/{}/receipts", message["id"].as_str().unwrap());
    let bob = app.token_for(BOB);

    let (status, body) = app
        .request("POST", &uri, Some(&bob), Some(json!({ "status": "read" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "read");
    assert_eq!(body["changed"], true);
    assert!(body["deliveredAt"].is_string());
    assert!(body["readAt"].is_string());

    let (status, body) = app
        .request("POST", &uri, Some(&bob), Some(json!({ "status": "delivered" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "read");
    assert_eq!(body["changed"], false);
}

#[tokio::test]
async fn receipt_is_broadcast_to_the_chat() {
    let app = app_with_chat();
    let message = send(&app, ALICE, "ping").await;
    let (_, mut alice_rx) = app.connect(ALICE).await;
    drain_frames(&mut alice_rx);

    let uri = format!("/api/v1/messages/{}/receipts", message["id"].as_str().unwrap());
    app.request("POST", &uri, Some(&app.token_for(BOB)), Some(json!({ "status": "delivered" })))
        .await;
    // A repeated report changes nothing and is not rebroadcast.
    app.request("POST", &uri, Some(&app.token_for(BOB)), Some(json!({ "status": "delivered" })))
        .await;

    let frames = drain_frames(&mut alice_rx);
    let delivered: Vec<_> = events_named(&frames, "message:delivered").collect();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0]["data"]["userId"], BOB.to_string());
    assert_eq!(delivered[0]["data"]["messageId"], message["id"]);
}

#[tokio::test]
async fn sender_cannot_acknowledge_own_message() {
    let app = app_with_chat();
    let message = send(&app, ALICE, "note to self").await;
    let uri = format!("/api/v1/messages/{}/receipts", message["id"].as_str().unwrap());

    let (status, _) = app
        .request("POST", &uri, Some(&app.token_for(ALICE)), Some(json!({ "status": "read" })))
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn reporting_sent_is_rejected() {
    let app = app_with_chat();
    let message = send(&app, ALICE, "hi").await;
    let uri = format!("/api/v1/messages/{}/receipts", message["id"].as_str().unwrap());

    let (status, _) = app
        .request("POST", &uri, Some(&app.token_for(BOB)), Some(json!({ "status": "sent" })))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn only_the_author_can_edit_or_delete() {
    let app = app_with_chat();
    let message = send(&app, ALICE, "typo hre").await;
    let uri = format!("/api/v1/messages/{}", message["id"].as_str().unwrap());

    let (status, _) = app
        .request("PATCH", &uri, Some(&app.token_for(BOB)), Some(json!({ "content": "hijacked" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .request("PATCH", &uri, Some(&app.token_for(ALICE)), Some(json!({ "content": "typo here" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"], "typo here");
    assert!(body["editedAt"].is_string());

    let (status, _) = app
        .request("DELETE", &uri, Some(&app.token_for(ALICE)), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, page) = app
        .request(
            "GET",
            &format!("/api/v1/chats/{CHAT}/messages"),
            Some(&app.token_for(BOB)),
            None,
        )
        .await;
    assert_eq!(page[0]["content"], "");
    assert!(page[0]["deletedAt"].is_string());
}

#[tokio::test]
async fn call_history_is_visible_to_members() {
    let app = app_with_chat();
    app.store.add_call_log(CallLog {
        id: 900,
        chat_id: CHAT,
        caller_id: ALICE,
        callee_id: BOB,
        video: true,
        duration_secs: 42,
        ended_at: chrono::Utc::now(),
    });

    let (status, body) = app
        .request(
            "GET",
            &format!("/api/v1/chats/{CHAT}/calls"),
            Some(&app.token_for(BOB)),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["durationSecs"], 42);
    assert_eq!(body[0]["callerId"], ALICE.to_string());

    let (status, _) = app
        .request(
            "GET",
            &format!("/api/v1/chats/{CHAT}/calls"),
            Some(&app.token_for(MALLORY)),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
