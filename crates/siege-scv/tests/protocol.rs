//! Core protocol scenarios against an in-process SCV.

mod common;

use std::io::Write;

use axum::http::{Method, StatusCode};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};

use common::{b64, json_request, send, send_json, setup, setup_with};
use siege_core::now_secs;

fn payload(i: usize) -> Vec<u8> {
    (0..1024).map(|j| ((i * 31 + j * 7) % 251) as u8).collect()
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

#[tokio::test]
async fn roundtrip_frames_and_checkpoint() {
    let scv = setup().await;
    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(scv.create_stream().await);
    }

    let (status, listed) = send_json(
        &scv.router,
        json_request(
            Method::GET,
            &format!("/targets/streams/{}", scv.target),
            scv.manager(),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let mut listed: Vec<String> = serde_json::from_value(listed["streams"].clone()).unwrap();
    listed.sort();
    ids.sort();
    assert_eq!(listed, ids);

    let token = scv.activate_token().await;
    let start = scv.core_start(&token).await;
    let stream_id = start["stream_id"].as_str().unwrap().to_string();
    assert_eq!(start["target_id"], json!(scv.target.to_string()));
    assert_eq!(start["options"]["steps_per_frame"], json!(50_000));
    assert_eq!(start["files"]["system.xml"], json!(b64("<system/>")));
    assert_eq!(start["files"]["integrator.xml"], json!(b64("<integrator/>")));

    let mut expected = Vec::new();
    for i in 0..25 {
        let data = payload(i);
        expected.extend_from_slice(&data);
        let body = json!({ "files": { "frames.xtc.b64": b64(&data) } });
        let (status, reply) = scv.frame(&token, &body).await;
        assert_eq!(status, StatusCode::OK, "{reply}");
        assert_eq!(reply["accepted"], json!(true));
    }

    let info = scv.info(&stream_id).await;
    assert_eq!(info["frames"], json!(0));
    assert_eq!(info["active"]["buffer_frames"], json!(25));
    assert_eq!(info["active"]["donor"], json!("donor-1"));

    let checkpoint = json!({ "files": { "state.xml.gz.b64": b64(gzip(b"<state step=\"25\"/>")) } });
    let (status, reply) = send_json(
        &scv.router,
        json_request(Method::PUT, "/core/checkpoint", Some(&token), Some(checkpoint)),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{reply}");
    assert_eq!(reply["frames"], json!(25));

    let info = scv.info(&stream_id).await;
    assert_eq!(info["frames"], json!(25));
    assert_eq!(info["active"]["buffer_frames"], json!(0));
    assert_eq!(info["active"]["total_frames"], json!(25));

    let (status, body) = send(
        &scv.router,
        json_request(
            Method::GET,
            &format!("/streams/download/{stream_id}/frames.xtc"),
            scv.manager(),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, expected);

    let (_, sync) = send_json(
        &scv.router,
        json_request(Method::GET, &format!("/streams/sync/{stream_id}"), scv.manager(), None),
    )
    .await;
    assert_eq!(sync["partitions"], json!([25]));
    assert_eq!(sync["checkpoint_files"], json!(["state.xml"]));
    assert_eq!(sync["frame_files"], json!(["frames.xtc"]));

    // A restarted core resumes from the checkpoint, not from the frames.
    let resumed = scv.core_start(&token).await;
    assert_eq!(resumed["files"]["state.xml"], json!(b64("<state step=\"25\"/>")));
    assert!(resumed["files"].get("frames.xtc").is_none());
}

#[tokio::test]
async fn repeated_frame_is_ignored() {
    let scv = setup().await;
    let stream_id = scv.create_stream().await;
    let token = scv.activate_token().await;

    let body = json!({ "files": { "frames.xtc.b64": b64(payload(1)) } });
    let (_, first) = scv.frame(&token, &body).await;
    let (status, second) = scv.frame(&token, &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["accepted"], json!(true));
    assert_eq!(second["accepted"], json!(false));

    let info = scv.info(&stream_id).await;
    assert_eq!(info["active"]["buffer_frames"], json!(1));

    let other = json!({ "files": { "frames.xtc.b64": b64(payload(2)) }, "frames": 3 });
    scv.frame(&token, &other).await;
    let info = scv.info(&stream_id).await;
    assert_eq!(info["active"]["buffer_frames"], json!(4));
}

#[tokio::test]
async fn empty_checkpoint_is_a_noop() {
    let scv = setup().await;
    let stream_id = scv.create_stream().await;
    let token = scv.activate_token().await;

    let (status, reply) = send_json(
        &scv.router,
        json_request(Method::PUT, "/core/checkpoint", Some(&token), Some(json!({ "files": {} }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["frames"], json!(0));
    let (_, sync) = send_json(
        &scv.router,
        json_request(Method::GET, &format!("/streams/sync/{stream_id}"), scv.manager(), None),
    )
    .await;
    assert_eq!(sync["partitions"], json!([]));
}

#[tokio::test]
async fn heartbeat_expiry_requeues_stream() {
    let scv = setup_with(|config| config.heartbeat_increment_seconds = 5).await;
    let stream_id = scv.create_stream().await;
    let token = scv.activate_token().await;
    assert!(!scv.info(&stream_id).await["active"].is_null());

    let requeued = scv.service.sweep_heartbeats(now_secs() + 6.0).await.unwrap();
    assert_eq!(requeued, 1);

    let info = scv.info(&stream_id).await;
    assert!(info["active"].is_null());
    assert_eq!(info["status"], json!("OK"));

    // The old token is dead and the stream can be handed out again.
    let (status, _) = send_json(
        &scv.router,
        json_request(Method::POST, "/core/heartbeat", Some(&token), None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let again = scv.activate_token().await;
    assert_eq!(scv.core_start(&again).await["stream_id"], json!(stream_id));
}

#[tokio::test]
async fn heartbeat_extends_lease() {
    let scv = setup_with(|config| config.heartbeat_increment_seconds = 5).await;
    let stream_id = scv.create_stream().await;
    let token = scv.activate_token().await;

    let (status, reply) = send_json(
        &scv.router,
        json_request(Method::POST, "/core/heartbeat", Some(&token), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let expiry = reply["expiry"].as_f64().unwrap();
    assert!(expiry > now_secs() + 4.0);

    assert_eq!(scv.service.sweep_heartbeats(now_secs() + 1.0).await.unwrap(), 0);
    assert!(!scv.info(&stream_id).await["active"].is_null());
}

#[tokio::test]
async fn core_stop_with_error_requeues_and_logs() {
    let scv = setup().await;
    let stream_id = scv.create_stream().await;
    let token = scv.activate_token().await;
    scv.frame(&token, &json!({ "files": { "frames.xtc.b64": b64(payload(0)) } }))
        .await;

    let (status, _) = send_json(
        &scv.router,
        json_request(
            Method::PUT,
            "/core/stop",
            Some(&token),
            Some(json!({ "error": b64("NaN detected") })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let info = scv.info(&stream_id).await;
    assert!(info["active"].is_null());
    assert_eq!(info["error_count"], json!(1));
    assert_eq!(info["frames"], json!(0));

    let log = std::fs::read_to_string(
        scv.service
            .files()
            .stream_dir(&stream_id.parse().unwrap())
            .join("error_log.txt"),
    )
    .unwrap();
    assert!(log.contains("NaN detected"));

    // Uncommitted frames were dropped with the buffer.
    let (status, _) = send(
        &scv.router,
        json_request(
            Method::GET,
            &format!("/streams/download/{stream_id}/frames.xtc"),
            scv.manager(),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    scv.activate_token().await;
}

#[tokio::test]
async fn core_calls_require_a_live_token() {
    let scv = setup().await;
    scv.create_stream().await;

    let (status, reply) = send_json(&scv.router, json_request(Method::GET, "/core/start", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(reply["error"].is_string());

    let unknown = siege_core::BearerToken::generate();
    let (status, _) = send_json(
        &scv.router,
        json_request(Method::GET, "/core/start", Some(unknown.as_str()), None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let token = scv.activate_token().await;
    let (status, reply) = send_json(
        &scv.router,
        json_request(Method::PUT, "/core/frame", Some(&token), Some(json!({ "bogus": 1 }))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(reply["error"].as_str().unwrap().contains("bad frame body"));
}

#[tokio::test]
async fn busy_stream_is_rejected() {
    let scv = setup().await;
    let stream_id = scv.create_stream().await;
    let token = scv.activate_token().await;

    let _held = scv.service.locks().try_lock(&stream_id).unwrap().unwrap();
    let (status, reply) = send_json(
        &scv.router,
        json_request(Method::POST, "/core/heartbeat", Some(&token), None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(reply["error"].as_str().unwrap().contains("busy"));
}

#[tokio::test]
async fn scruffy_recovers_abandoned_lock() {
    let scv = setup().await;
    let stream_id = scv.create_stream().await;
    let token = scv.activate_token().await;
    scv.frame(&token, &json!({ "files": { "frames.xtc.b64": b64(payload(0)) } }))
        .await;

    let now = now_secs();
    assert!(scv.service.locks().acquire(&stream_id, now - 10.0).unwrap());
    assert_eq!(scv.service.scruffy(now).await.unwrap(), 1);

    assert!(!scv.service.locks().is_locked(&stream_id).unwrap());
    let info = scv.info(&stream_id).await;
    assert!(info["active"].is_null());
    let id = stream_id.parse().unwrap();
    assert!(!scv.service.files().has_buffer(&id).await);
    scv.activate_token().await;
}

#[tokio::test]
async fn scruffy_removes_half_created_stream() {
    let scv = setup().await;
    let orphan = siege_core::StreamId::generate(common::SCV_NAME);
    scv.service
        .files()
        .create(&orphan, &Default::default())
        .await
        .unwrap();
    let now = now_secs();
    scv.service.locks().acquire(&orphan.to_string(), now - 10.0).unwrap();

    assert_eq!(scv.service.scruffy(now).await.unwrap(), 1);
    assert!(!scv.service.files().stream_dir(&orphan).exists());
}

#[tokio::test]
async fn activation_skips_locked_streams() {
    let scv = setup().await;
    let first = scv.create_stream().await;
    let second = scv.create_stream().await;

    let _held = scv.service.locks().try_lock(&first).unwrap().unwrap();
    let token = scv.activate_token().await;
    assert_eq!(scv.core_start(&token).await["stream_id"], json!(second));

    let (status, reply) = scv.activate().await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply["error"], json!("no streams available"));
}

#[tokio::test]
async fn activation_requires_scv_password() {
    let scv = setup().await;
    scv.create_stream().await;
    let body = json!({ "target_id": scv.target.to_string(), "engine": "openmm" });
    let (status, _) = send_json(
        &scv.router,
        json_request(Method::POST, "/streams/activate", Some("wrong"), Some(body)),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn queue_prefers_most_frames() {
    let scv = setup().await;
    let a = scv.create_stream().await;
    let b = scv.create_stream().await;

    // Commit frames on whichever stream comes out first, then requeue it.
    let token = scv.activate_token().await;
    let started: Value = scv.core_start(&token).await;
    let worked = started["stream_id"].as_str().unwrap().to_string();
    scv.frame(&token, &json!({ "files": { "frames.xtc.b64": b64(payload(0)) }, "frames": 4 }))
        .await;
    send(
        &scv.router,
        json_request(Method::PUT, "/core/checkpoint", Some(&token), Some(json!({ "files": {} }))),
    )
    .await;
    send(&scv.router, json_request(Method::PUT, "/core/stop", Some(&token), None)).await;

    let next = scv.activate_token().await;
    assert_eq!(scv.core_start(&next).await["stream_id"], json!(worked));
    assert!(worked == a || worked == b);
}

#[tokio::test]
async fn failed_frame_write_requeues_stream_and_drops_buffer() {
    let scv = setup().await;
    let stream_id = scv.create_stream().await;
    let token = scv.activate_token().await;
    let id: siege_core::StreamId = stream_id.parse().unwrap();

    // A directory where the second file should go makes its append fail
    // after the first file has been written.
    let blocker = scv
        .service
        .files()
        .stream_dir(&id)
        .join("buffer_files")
        .join("b.xtc");
    std::fs::create_dir_all(&blocker).unwrap();

    let body = json!({ "files": { "a.xtc.b64": b64(payload(0)), "b.xtc.b64": b64(payload(1)) } });
    let (status, _) = scv.frame(&token, &body).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    assert!(!scv.service.locks().is_locked(&stream_id).unwrap());
    assert!(!scv.service.files().has_buffer(&id).await);
    let info = scv.info(&stream_id).await;
    assert!(info["active"].is_null());
    assert_eq!(info["frames"], json!(0));

    // The old token is gone and a retry cannot append to a half-written buffer.
    let (status, _) = scv.frame(&token, &body).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let next = scv.activate_token().await;
    assert_eq!(scv.core_start(&next).await["stream_id"], json!(stream_id));
    let (status, reply) = scv.frame(&next, &body).await;
    assert_eq!(status, StatusCode::OK, "{reply}");
    assert_eq!(scv.info(&stream_id).await["active"]["buffer_frames"], json!(1));
}

#[tokio::test]
async fn failed_checkpoint_follows_disk_and_requeues() {
    let scv = setup().await;
    let stream_id = scv.create_stream().await;
    let token = scv.activate_token().await;
    let id: siege_core::StreamId = stream_id.parse().unwrap();

    let (status, _) = scv
        .frame(&token, &json!({ "files": { "frames.xtc.b64": b64(payload(0)) }, "frames": 3 }))
        .await;
    assert_eq!(status, StatusCode::OK);

    // Frameset 3 is already on disk but the index never recorded it.
    std::fs::create_dir_all(scv.service.files().stream_dir(&id).join("3")).unwrap();

    let (status, _) = send(
        &scv.router,
        json_request(Method::PUT, "/core/checkpoint", Some(&token), Some(json!({ "files": {} }))),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    assert!(!scv.service.locks().is_locked(&stream_id).unwrap());
    assert!(!scv.service.files().has_buffer(&id).await);
    let info = scv.info(&stream_id).await;
    assert!(info["active"].is_null());
    assert_eq!(info["frames"], json!(3));
    scv.activate_token().await;
}
