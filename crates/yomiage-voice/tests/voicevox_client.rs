//! VOICEVOX client against an in-process mock engine.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use yomiage_types::{SpeechRequest, UserPreference};
use yomiage_voice::synthesis::MAX_SYNTHESIS_TEXT_BYTES;
use yomiage_voice::{SynthesisCause, SynthesisStage, Synthesizer, VoicevoxClient};

#[derive(Clone, Copy)]
enum Mode {
    Healthy,
    QueryFails,
    SynthesisFails,
    QueryNotObject,
    Stalled,
}

#[derive(Clone)]
struct Engine {
    mode: Mode,
    /// (query params, body) of every `/synthesis` call.
    synth_calls: Arc<Mutex<Vec<(HashMap<String, String>, Value)>>>,
    query_calls: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

async fn audio_query(
    State(engine): State<Engine>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, StatusCode> {
    engine.query_calls.lock().unwrap().push(params);
    match engine.mode {
        Mode::QueryFails => Err(StatusCode::INTERNAL_SERVER_ERROR),
        Mode::QueryNotObject => Ok(Json(json!(["not", "an", "object"]))),
        Mode::Stalled => {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Json(json!({})))
        }
        _ => Ok(Json(json!({ "speedScale": 1.0, "pitchScale": 0.0, "accent_phrases": [] }))),
    }
}

async fn synthesis(
    State(engine): State<Engine>,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Result<Vec<u8>, StatusCode> {
    engine.synth_calls.lock().unwrap().push((params, body));
    match engine.mode {
        Mode::SynthesisFails => Err(StatusCode::INTERNAL_SERVER_ERROR),
        _ => Ok(b"RIFF....WAVEfmt ".to_vec()),
    }
}

async fn speakers() -> Json<Value> {
    Json(json!([
        {
            "name": "四国めたん",
            "speaker_uuid": "7ffcb7ce",
            "styles": [
                { "name": "ノーマル", "id": 2 },
                { "name": "あまあま", "id": 0 }
            ],
            "version": "0.14.0"
        },
        {
            "name": "ずんだもん",
            "speaker_uuid": "388f246b",
            "styles": [{ "name": "ノーマル", "id": 3 }],
            "version": "0.14.0"
        }
    ]))
}

async fn spawn_engine(mode: Mode) -> (SocketAddr, Engine) {
    let engine = Engine {
        mode,
        synth_calls: Arc::new(Mutex::new(Vec::new())),
        query_calls: Arc::new(Mutex::new(Vec::new())),
    };
    let app = Router::new()
        .route("/audio_query", post(audio_query))
        .route("/synthesis", post(synthesis))
        .route("/speakers", get(speakers))
        .with_state(engine.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, engine)
}

fn client(addr: SocketAddr, timeout: Duration) -> VoicevoxClient {
    VoicevoxClient::new(format!("http://{}/", addr), timeout)
}

fn request(text: &str) -> SpeechRequest {
    SpeechRequest::new(text, UserPreference::new(3, 1.5))
}

#[tokio::test]
async fn synthesize_runs_both_phases_and_patches_speed() {
    let (addr, engine) = spawn_engine(Mode::Healthy).await;
    let client = client(addr, Duration::from_secs(5));

    let audio = client
        .synthesize(&request("こんにちは"))
        .await
        .expect("synthesis should succeed");
    assert_eq!(audio, b"RIFF....WAVEfmt ");

    let queries = engine.query_calls.lock().unwrap().clone();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0]["text"], "こんにちは");
    assert_eq!(queries[0]["speaker"], "3");

    let calls = engine.synth_calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    let (params, body) = &calls[0];
    assert_eq!(params["speaker"], "3");
    assert_eq!(body["speedScale"], 1.5);
    assert_eq!(body["pitchScale"], 0.0);
}

#[tokio::test]
async fn audio_query_error_status_is_reported_with_stage() {
    let (addr, engine) = spawn_engine(Mode::QueryFails).await;
    let client = client(addr, Duration::from_secs(5));

    let err = client
        .synthesize(&request("失敗"))
        .await
        .expect_err("synthesis should fail");
    assert_eq!(err.stage, SynthesisStage::AudioQuery);
    assert!(matches!(
        err.cause,
        SynthesisCause::Status(StatusCode::INTERNAL_SERVER_ERROR)
    ));
    assert!(engine.synth_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn synthesis_error_status_is_reported_with_stage() {
    let (addr, _engine) = spawn_engine(Mode::SynthesisFails).await;
    let client = client(addr, Duration::from_secs(5));

    let err = client
        .synthesize(&request("失敗"))
        .await
        .expect_err("synthesis should fail");
    assert_eq!(err.stage, SynthesisStage::Synthesis);
    assert!(matches!(err.cause, SynthesisCause::Status(_)));
}

#[tokio::test]
async fn non_object_query_is_malformed() {
    let (addr, engine) = spawn_engine(Mode::QueryNotObject).await;
    let client = client(addr, Duration::from_secs(5));

    let err = client
        .synthesize(&request("text"))
        .await
        .expect_err("synthesis should fail");
    assert_eq!(err.stage, SynthesisStage::AudioQuery);
    assert!(matches!(err.cause, SynthesisCause::Malformed(_)));
    assert!(engine.synth_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn stalled_engine_times_out() {
    let (addr, _engine) = spawn_engine(Mode::Stalled).await;
    let client = client(addr, Duration::from_millis(200));

    let err = client
        .synthesize(&request("待って"))
        .await
        .expect_err("synthesis should time out");
    assert_eq!(err.stage, SynthesisStage::AudioQuery);
    assert!(matches!(err.cause, SynthesisCause::Timeout(_)));
}

#[tokio::test]
async fn oversized_text_is_rejected_before_any_request() {
    let (addr, engine) = spawn_engine(Mode::Healthy).await;
    let client = client(addr, Duration::from_secs(5));

    let text = "あ".repeat(MAX_SYNTHESIS_TEXT_BYTES);
    let err = client
        .synthesize(&request(&text))
        .await
        .expect_err("oversized text should be rejected");
    assert!(matches!(err.cause, SynthesisCause::TextTooLong { .. }));
    assert!(engine.query_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unreachable_engine_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(addr, Duration::from_secs(5))
        .synthesize(&request("誰もいない"))
        .await
        .expect_err("synthesis should fail");
    assert_eq!(err.stage, SynthesisStage::AudioQuery);
    assert!(matches!(err.cause, SynthesisCause::Transport(_)));
}

#[tokio::test]
async fn speakers_lists_names_and_styles() {
    let (addr, _engine) = spawn_engine(Mode::Healthy).await;
    let client = client(addr, Duration::from_secs(5));

    let speakers = client.speakers().await.expect("speakers should load");
    assert_eq!(speakers.len(), 2);
    assert_eq!(speakers[0].name, "四国めたん");
    assert_eq!(speakers[0].styles.len(), 2);
    assert_eq!(speakers[0].styles[1].name, "あまあま");
    assert_eq!(speakers[0].styles[1].id, 0);
    assert_eq!(speakers[1].styles[0].id, 3);
}
