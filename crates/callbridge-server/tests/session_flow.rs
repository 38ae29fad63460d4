mod common;

use common::{expect_close, recv_json, send_json, spawn_app, MockBackend, ScriptedLlm};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use tokio_tungstenite::tungstenite::{self, protocol::Message};

#[tokio::test]
async fn offer_becomes_invite_on_the_call_path() {
    let mut backend = MockBackend::start().await;
    let app = spawn_app(&backend.endpoint(), ScriptedLlm::default()).await;

    let mut web = app.connect_web().await;
    let mut peer = backend.accept().await;
    assert_eq!(peer.path, "/call/webrtc");
    app.wait_for_backend().await;

    send_json(&mut web, json!({"event": "offer", "sdp": "v=0\r\no=- 1 1 IN IP4 0.0.0.0"})).await;

    let invite = peer.recv_json().await;
    assert_eq!(invite["command"], "invite");
    assert_eq!(invite["option"]["offer"], "v=0\r\no=- 1 1 IN IP4 0.0.0.0");
    assert_eq!(invite["option"]["caller"], "frontend");
    assert_eq!(invite["option"]["callee"], "rust");
    assert_eq!(invite["option"]["asr"]["provider"], "tencent");
    assert_eq!(invite["option"]["asr"]["appId"], "1300");
    assert_eq!(invite["option"]["asr"]["modelType"], "zh");
    assert_eq!(invite["option"]["tts"]["speaker"], "101001");
}

#[tokio::test]
async fn malformed_and_empty_messages_do_not_end_the_session() {
    let mut backend = MockBackend::start().await;
    let app = spawn_app(&backend.endpoint(), ScriptedLlm::default()).await;

    let mut web = app.connect_web().await;
    let mut peer = backend.accept().await;
    app.wait_for_backend().await;

    web.send(Message::Text("not json".into())).await.unwrap();
    send_json(&mut web, json!({"event": "offer", "sdp": ""})).await;
    send_json(&mut web, json!({"event": "candidate", "candidate": null})).await;
    send_json(
        &mut web,
        json!({"event": "candidate", "candidate": {"candidate": "candidate:1 1 udp 1 10.0.0.2 5000 typ host", "sdpMid": "0"}}),
    )
    .await;

    let candidate = peer.recv_json().await;
    assert_eq!(candidate["command"], "candidate");
    assert_eq!(
        candidate["candidates"],
        json!(["candidate:1 1 udp 1 10.0.0.2 5000 typ host"])
    );
}

#[tokio::test]
async fn final_transcript_is_spoken_sentence_by_sentence() {
    let mut backend = MockBackend::start().await;
    let llm = ScriptedLlm::new(&["Sure.", "Turning off the lights now."]);
    let app = spawn_app(&backend.endpoint(), llm).await;

    let mut web = app.connect_web().await;
    let mut peer = backend.accept().await;
    app.wait_for_backend().await;

    peer.send_json(json!({"event": "asrDelta", "text": "turn off"}))
        .await;
    peer.send_json(json!({"event": "asrFinal", "text": "turn off the lights"}))
        .await;

    let first = peer.recv_json().await;
    let second = peer.recv_json().await;
    for tts in [&first, &second] {
        assert_eq!(tts["command"], "tts");
        assert_eq!(tts["autoHangup"], false);
        assert_eq!(tts["streaming"], false);
        assert_eq!(tts["endOfStream"], true);
        assert!(tts.get("option").is_none());
        assert!(!tts["playId"].as_str().unwrap().is_empty());
    }
    assert_eq!(first["text"], "Sure.");
    assert_eq!(second["text"], "Turning off the lights now.");
    assert_ne!(first["playId"], second["playId"]);

    // Backend events reach the web client unchanged, ahead of the reply.
    assert_eq!(
        recv_json(&mut web).await,
        json!({"event": "asrDelta", "text": "turn off"})
    );
    assert_eq!(
        recv_json(&mut web).await,
        json!({"event": "asrFinal", "text": "turn off the lights"})
    );
    assert_eq!(
        recv_json(&mut web).await,
        json!({"event": "LLMResult", "text": "Sure. Turning off the lights now."})
    );

    assert_eq!(
        app.llm.prompts.lock().unwrap().as_slice(),
        ["turn off the lights".to_string()]
    );
}

#[tokio::test]
async fn overlapping_final_transcripts_are_answered_in_order() {
    let mut backend = MockBackend::start().await;
    let llm = ScriptedLlm::new(&["{prompt} first.", "{prompt} second."])
        .with_delay(Duration::from_millis(100));
    let app = spawn_app(&backend.endpoint(), llm).await;

    let mut web = app.connect_web().await;
    let mut peer = backend.accept().await;
    app.wait_for_backend().await;

    // Both arrive while the first turn is still streaming.
    peer.send_json(json!({"event": "asrFinal", "text": "one"})).await;
    peer.send_json(json!({"event": "asrFinal", "text": "two"})).await;

    let mut spoken = Vec::new();
    for _ in 0..4 {
        let tts = peer.recv_json().await;
        assert_eq!(tts["command"], "tts");
        spoken.push(tts["text"].as_str().unwrap().to_string());
    }
    assert_eq!(
        spoken,
        ["one first.", "one second.", "two first.", "two second."]
    );

    assert_eq!(recv_json(&mut web).await["text"], "one");
    assert_eq!(recv_json(&mut web).await["text"], "two");
    assert_eq!(
        recv_json(&mut web).await,
        json!({"event": "LLMResult", "text": "one first. one second."})
    );
    assert_eq!(
        recv_json(&mut web).await,
        json!({"event": "LLMResult", "text": "two first. two second."})
    );
    assert_eq!(
        app.llm.prompts.lock().unwrap().as_slice(),
        ["one".to_string(), "two".to_string()]
    );
}

#[tokio::test]
async fn backend_events_reach_the_web_client_with_every_field() {
    let mut backend = MockBackend::start().await;
    let app = spawn_app(&backend.endpoint(), ScriptedLlm::new(&["Hello."])).await;

    let mut web = app.connect_web().await;
    let mut peer = backend.accept().await;
    app.wait_for_backend().await;

    let track = json!({"event": "trackStart", "trackId": "t-1", "playId": "p-9"});
    peer.send_json(track.clone()).await;
    peer.send_json(json!({"event": "asrFinal", "text": null})).await;

    assert_eq!(recv_json(&mut web).await, track);
    assert_eq!(
        recv_json(&mut web).await,
        json!({"event": "asrFinal", "text": null})
    );
    assert!(app.llm.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn empty_final_transcript_is_mirrored_but_not_answered() {
    let mut backend = MockBackend::start().await;
    let app = spawn_app(&backend.endpoint(), ScriptedLlm::new(&["Hello."])).await;

    let mut web = app.connect_web().await;
    let mut peer = backend.accept().await;
    app.wait_for_backend().await;

    peer.send_json(json!({"event": "asrFinal", "text": ""})).await;
    peer.send_json(json!({"event": "speaking"})).await;

    assert_eq!(recv_json(&mut web).await["event"], "asrFinal");
    assert_eq!(recv_json(&mut web).await["event"], "speaking");
    assert!(app.llm.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn backend_hangup_closes_the_session() {
    let mut backend = MockBackend::start().await;
    let app = spawn_app(&backend.endpoint(), ScriptedLlm::default()).await;

    let mut web = app.connect_web().await;
    let mut peer = backend.accept().await;
    app.wait_for_backend().await;

    peer.send_json(json!({"event": "hangup", "reason": "bye", "initiator": "callee"}))
        .await;

    assert_eq!(
        recv_json(&mut web).await,
        json!({"event": "hangup", "reason": "bye", "initiator": "callee"})
    );
    assert_eq!(expect_close(&mut web).await.as_deref(), Some("backend hangup"));

    // The backend socket is closed too.
    let ended = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match peer.ws.next().await {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "backend socket stayed open");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(app.registry.is_empty().await);
}

#[tokio::test]
async fn backend_hangup_with_null_fields_still_closes_the_session() {
    let mut backend = MockBackend::start().await;
    let app = spawn_app(&backend.endpoint(), ScriptedLlm::default()).await;

    let mut web = app.connect_web().await;
    let mut peer = backend.accept().await;
    app.wait_for_backend().await;

    peer.send_json(json!({"event": "hangup", "reason": "caller ended", "initiator": null}))
        .await;

    assert_eq!(
        recv_json(&mut web).await,
        json!({"event": "hangup", "reason": "caller ended", "initiator": null})
    );
    assert_eq!(expect_close(&mut web).await.as_deref(), Some("backend hangup"));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(app.registry.is_empty().await);
}

#[tokio::test]
async fn web_hangup_is_forwarded_and_session_stays_open() {
    let mut backend = MockBackend::start().await;
    let app = spawn_app(&backend.endpoint(), ScriptedLlm::default()).await;

    let mut web = app.connect_web().await;
    let mut peer = backend.accept().await;
    app.wait_for_backend().await;

    send_json(&mut web, json!({"event": "hangup", "reason": "user left"})).await;
    assert_eq!(
        peer.recv_json().await,
        json!({"command": "hangup", "reason": "user left"})
    );

    peer.send_json(json!({"event": "close", "reason": "media stopped"}))
        .await;
    assert_eq!(recv_json(&mut web).await["event"], "close");
    assert_eq!(app.registry.len().await, 1);
}

#[tokio::test]
async fn web_disconnect_tears_down_backend_leg() {
    let mut backend = MockBackend::start().await;
    let app = spawn_app(&backend.endpoint(), ScriptedLlm::default()).await;

    let mut web = app.connect_web().await;
    let mut peer = backend.accept().await;
    app.wait_for_backend().await;

    web.close(None).await.unwrap();

    let ended = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match peer.ws.next().await {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "backend socket stayed open");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(app.registry.is_empty().await);
}

#[tokio::test]
async fn new_client_replaces_the_old_one() {
    let mut backend = MockBackend::start().await;
    let app = spawn_app(&backend.endpoint(), ScriptedLlm::default()).await;

    let mut first = app.connect_web().await;
    let _first_peer = backend.accept().await;
    app.wait_for_backend().await;
    let first_id = app.registry.get(&app.slot()).await.unwrap().id();

    let mut second = app.connect_web().await;
    assert_eq!(
        expect_close(&mut first).await.as_deref(),
        Some("replaced by a newer session")
    );

    let mut second_peer = backend.accept().await;
    app.wait_for_backend().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let current = app.registry.get(&app.slot()).await.unwrap();
    assert_ne!(current.id(), first_id);
    assert_eq!(app.registry.len().await, 1);

    send_json(&mut second, json!({"event": "offer", "sdp": "v=0"})).await;
    assert_eq!(second_peer.recv_json().await["command"], "invite");
}

#[tokio::test]
async fn unknown_credentials_are_rejected_before_upgrade() {
    let backend = MockBackend::start().await;
    let app = spawn_app(&backend.endpoint(), ScriptedLlm::default()).await;

    let err = tokio_tungstenite::connect_async(app.setup_url("pk_missing", app.robot_id))
        .await
        .unwrap_err();
    match err {
        tungstenite::Error::Http(response) => assert_eq!(response.status(), 400),
        other => panic!("expected http rejection, got {other:?}"),
    }

    let err = tokio_tungstenite::connect_async(app.setup_url(common::API_KEY, 9_999))
        .await
        .unwrap_err();
    assert!(matches!(err, tungstenite::Error::Http(ref r) if r.status() == 400));
    assert!(app.registry.is_empty().await);
}

#[tokio::test]
async fn commands_are_dropped_while_backend_is_unreachable() {
    // Nothing listens on the endpoint, so the link keeps retrying.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let app = spawn_app(&endpoint, ScriptedLlm::default()).await;
    let mut web = app.connect_web().await;

    send_json(&mut web, json!({"event": "offer", "sdp": "v=0"})).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // The session is still up and the web socket still open.
    assert_eq!(app.registry.len().await, 1);
    web.send(Message::Ping(Vec::new().into())).await.unwrap();
}
