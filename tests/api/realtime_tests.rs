//! Presence, typing and call relay through the gateway

use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::common::{drain_frames, events_named, TestApp};
use chat_relay::application::services::{OfferOutcome, SignalKind};
use chat_relay::domain::{CallSignalPayload, UnavailableReason};

const CHAT: i64 = 200;
const ALICE: i64 = 1;
const BOB: i64 = 2;
const CAROL: i64 = 3;

fn app_with_chat() -> TestApp {
    let app = TestApp::new();
    app.store.add_chat(CHAT, &[ALICE, BOB, CAROL]);
    app
}

fn signal(peer_id: i64) -> CallSignalPayload {
    CallSignalPayload {
        chat_id: CHAT,
        peer_id,
        ..Default::default()
    }
}

#[tokio::test]
async fn presence_changes_only_on_first_and_last_connection() {
    let app = app_with_chat();
    let (_, mut bob_rx) = app.connect(BOB).await;
    drain_frames(&mut bob_rx);

    let (first, _first_rx) = app.connect(ALICE).await;
    let (second, _second_rx) = app.connect(ALICE).await;
    let frames = drain_frames(&mut bob_rx);
    let online: Vec<_> = events_named(&frames, "presence:changed").collect();
    assert_eq!(online.len(), 1);
    assert_eq!(online[0]["data"]["userId"], ALICE.to_string());
    assert_eq!(online[0]["data"]["isOnline"], true);

    app.disconnect(first).await;
    assert!(events_named(&drain_frames(&mut bob_rx), "presence:changed")
        .next()
        .is_none());

    app.disconnect(second).await;
    let frames = drain_frames(&mut bob_rx);
    let offline: Vec<_> = events_named(&frames, "presence:changed").collect();
    assert_eq!(offline.len(), 1);
    assert_eq!(offline[0]["data"]["isOnline"], false);
    assert!(offline[0]["data"]["lastSeenAt"].is_string());
}

#[tokio::test]
async fn presence_endpoint_reflects_live_connections() {
    let app = app_with_chat();
    let token = app.token_for(BOB);
    let uri = format!("/api/v1/users/{ALICE}/presence");

    let (conn, _rx) = app.connect(ALICE).await;
    let (status, body) = app.request("GET", &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isOnline"], true);

    app.disconnect(conn).await;
    let (_, body) = app.request("GET", &uri, Some(&token), None).await;
    assert_eq!(body["isOnline"], false);
    assert!(body["lastSeenAt"].is_string());
}

#[tokio::test]
async fn presence_of_unknown_user_is_not_found() {
    let app = app_with_chat();

    let (status, _) = app
        .request("GET", "/api/v1/users/999/presence", Some(&app.token_for(BOB)), None)
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn typing_skips_the_typist_and_stops_on_disconnect() {
    let app = app_with_chat();
    let (alice, mut alice_rx) = app.connect(ALICE).await;
    let (_, mut bob_rx) = app.connect(BOB).await;
    drain_frames(&mut alice_rx);
    drain_frames(&mut bob_rx);

    app.state.typing.start(CHAT, ALICE);

    let frames = drain_frames(&mut bob_rx);
    let started: Vec<_> = events_named(&frames, "typing:start").collect();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0]["data"]["userId"], ALICE.to_string());
    assert!(started[0]["data"]["expiresInMs"].is_u64());
    assert!(events_named(&drain_frames(&mut alice_rx), "typing:start")
        .next()
        .is_none());

    app.disconnect(alice).await;
    let frames = drain_frames(&mut bob_rx);
    assert_eq!(events_named(&frames, "typing:stop").count(), 1);
    assert!(!app.state.typing.is_typing(CHAT, ALICE));
}

#[tokio::test]
async fn offer_to_offline_callee_is_unavailable() {
    let app = app_with_chat();
    let (alice, _rx) = app.connect(ALICE).await;

    let outcome = app.state.calls.offer(alice, ALICE, signal(BOB)).await.unwrap();

    assert_eq!(outcome, OfferOutcome::Unavailable(UnavailableReason::Offline));
    assert!(app.state.calls.active_session(CHAT, ALICE).is_none());
}

#[tokio::test]
async fn call_signals_reach_only_the_peer() {
    let app = app_with_chat();
    let (alice, mut alice_rx) = app.connect(ALICE).await;
    let (_, mut bob_rx) = app.connect(BOB).await;
    let (_, mut carol_rx) = app.connect(CAROL).await;
    for rx in [&mut alice_rx, &mut bob_rx, &mut carol_rx] {
        drain_frames(rx);
    }

    let offer = CallSignalPayload {
        offer: Some(json!({ "type": "offer", "sdp": "v=0" })),
        video: Some(true),
        ..signal(BOB)
    };
    let outcome = app.state.calls.offer(alice, ALICE, offer).await.unwrap();
    assert_eq!(outcome, OfferOutcome::Relayed);

    let frames = drain_frames(&mut bob_rx);
    let offers: Vec<_> = events_named(&frames, "call:offer").collect();
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0]["data"]["peerId"], ALICE.to_string());
    assert_eq!(offers[0]["data"]["offer"]["sdp"], "v=0");
    assert!(drain_frames(&mut carol_rx).is_empty());

    let answer = CallSignalPayload {
        answer: Some(json!({ "type": "answer", "sdp": "v=0" })),
        ..signal(ALICE)
    };
    app.state
        .calls
        .relay(SignalKind::Answer, BOB, answer)
        .await
        .unwrap();
    let frames = drain_frames(&mut alice_rx);
    assert_eq!(events_named(&frames, "call:answer").count(), 1);
    assert!(app.state.calls.active_session(CHAT, ALICE).unwrap().answered_at.is_some());
}

#[tokio::test]
async fn ending_a_call_records_it_when_duration_is_given() {
    let app = app_with_chat();
    let (alice, _alice_rx) = app.connect(ALICE).await;
    let (_, mut bob_rx) = app.connect(BOB).await;
    app.state.calls.offer(alice, ALICE, signal(BOB)).await.unwrap();
    drain_frames(&mut bob_rx);

    let end = CallSignalPayload {
        duration_secs: Some(65),
        ..signal(BOB)
    };
    app.state.calls.relay(SignalKind::End, ALICE, end).await.unwrap();

    assert_eq!(events_named(&drain_frames(&mut bob_rx), "call:end").count(), 1);
    assert!(app.state.calls.active_session(CHAT, ALICE).is_none());

    let (status, body) = app
        .request(
            "GET",
            &format!("/api/v1/chats/{CHAT}/calls"),
            Some(&app.token_for(BOB)),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["durationSecs"], 65);
}

#[tokio::test]
async fn busy_callee_is_reported_to_third_caller() {
    let app = app_with_chat();
    let (alice, _alice_rx) = app.connect(ALICE).await;
    let (_, _bob_rx) = app.connect(BOB).await;
    let (carol, _carol_rx) = app.connect(CAROL).await;
    app.state.calls.offer(alice, ALICE, signal(BOB)).await.unwrap();

    let outcome = app.state.calls.offer(carol, CAROL, signal(BOB)).await.unwrap();

    assert_eq!(outcome, OfferOutcome::Unavailable(UnavailableReason::Busy));
}

#[tokio::test]
async fn caller_disconnect_ends_the_call_for_the_peer() {
    let app = app_with_chat();
    let (alice, _alice_rx) = app.connect(ALICE).await;
    let (_, mut bob_rx) = app.connect(BOB).await;
    app.state.calls.offer(alice, ALICE, signal(BOB)).await.unwrap();
    drain_frames(&mut bob_rx);

    app.disconnect(alice).await;

    let frames = drain_frames(&mut bob_rx);
    let ended: Vec<_> = events_named(&frames, "call:end").collect();
    assert_eq!(ended.len(), 1);
    assert_eq!(ended[0]["data"]["reason"], "disconnected");
    assert!(app.state.calls.active_session(CHAT, ALICE).is_none());
}

#[tokio::test]
async fn second_call_in_a_group_chat_leaves_the_first_intact() {
    const DAVE: i64 = 4;
    const ERIN: i64 = 5;
    let app = TestApp::new();
    app.store.add_chat(CHAT, &[ALICE, BOB, CAROL, DAVE, ERIN]);
    let (alice, _a) = app.connect(ALICE).await;
    let (_, _b) = app.connect(BOB).await;
    let (carol, _c) = app.connect(CAROL).await;
    let (_, _d) = app.connect(DAVE).await;
    let (erin, mut erin_rx) = app.connect(ERIN).await;

    app.state.calls.offer(alice, ALICE, signal(BOB)).await.unwrap();
    let outcome = app.state.calls.offer(carol, CAROL, signal(DAVE)).await.unwrap();
    assert_eq!(outcome, OfferOutcome::Relayed);

    drain_frames(&mut erin_rx);
    let outcome = app.state.calls.offer(erin, ERIN, signal(BOB)).await.unwrap();
    assert_eq!(outcome, OfferOutcome::Unavailable(UnavailableReason::Busy));
    let frames = drain_frames(&mut erin_rx);
    let unavailable: Vec<_> = events_named(&frames, "call:unavailable").collect();
    assert_eq!(unavailable[0]["data"]["reason"], "busy");

    let end = CallSignalPayload {
        duration_secs: Some(30),
        ..signal(BOB)
    };
    app.state.calls.relay(SignalKind::End, ALICE, end).await.unwrap();

    let (_, body) = app
        .request(
            "GET",
            &format!("/api/v1/chats/{CHAT}/calls"),
            Some(&app.token_for(ALICE)),
            None,
        )
        .await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["callerId"], ALICE.to_string());
    assert_eq!(body[0]["durationSecs"], 30);
    assert!(app.state.calls.active_session(CHAT, CAROL).is_some());
}
