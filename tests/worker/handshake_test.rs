//! Readiness negotiation with fresh workers.

#[path = "../support/mod.rs"]
mod support;

use std::time::Duration;

use opfs_sql::worker::protocol::OperationKind;
use opfs_sql::worker::{handshake, ChannelTransport, Host, ThreadHost, TransportState};
use opfs_sql::{Error, TransportError};
use serde_json::json;
use support::{ScriptedHost, Startup};

async fn transport_for(host: &dyn Host) -> ChannelTransport {
    let channel = host.spawn().await.unwrap();
    ChannelTransport::new(channel, Duration::from_secs(5))
}

#[tokio::test]
async fn test_ready_signal_completes_handshake() {
    let host = ScriptedHost::new();
    let transport = transport_for(&host).await;
    assert_eq!(transport.state(), TransportState::Uninitialized);

    handshake::start(&transport, Duration::from_secs(5)).await.unwrap();
    assert_eq!(transport.state(), TransportState::Ready);

    // The start signal carries no correlation ID.
    assert_eq!(host.received(), vec![json!({"type": "start"})]);
}

#[tokio::test]
async fn test_handshake_runs_once() {
    let host = ScriptedHost::new();
    let transport = transport_for(&host).await;

    handshake::start(&transport, Duration::from_secs(5)).await.unwrap();
    let err = handshake::start(&transport, Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(transport.state(), TransportState::Ready);
}

#[tokio::test]
async fn test_startup_failure_is_reported() {
    let host = ScriptedHost::new().startup(Startup::Fail("engine failed to load".to_string()));
    let transport = transport_for(&host).await;

    let err = handshake::start(&transport, Duration::from_secs(5))
        .await
        .unwrap_err();
    match err {
        Error::Transport(TransportError::StartupFailed(message)) => {
            assert!(message.contains("engine failed to load"));
        }
        other => panic!("expected startup failure, got {other:?}"),
    }
    assert_ne!(transport.state(), TransportState::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_silent_worker_times_out() {
    let host = ScriptedHost::new().startup(Startup::Silent);
    let transport = transport_for(&host).await;

    let err = handshake::start(&transport, Duration::from_millis(250))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(d) if d == Duration::from_millis(250)));

    let err = transport
        .send(OperationKind::Exec, json!({"sql": "SELECT 1"}))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transport(TransportError::NotReady)));
}

#[tokio::test]
async fn test_worker_exit_during_handshake() {
    let host = ScriptedHost::new().startup(Startup::Exit);
    let transport = transport_for(&host).await;

    let err = handshake::start(&transport, Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transport(TransportError::WorkerExited)));
}

#[tokio::test]
async fn test_thread_worker_handshake_and_open() {
    let dir = tempfile::tempdir().unwrap();
    let host = ThreadHost::new(dir.path());
    let transport = transport_for(&host).await;

    handshake::start(&transport, Duration::from_secs(10)).await.unwrap();
    let opened = transport
        .send(OperationKind::Open, json!({"filename": "handshake.db", "vfs": "opfs"}))
        .await
        .unwrap();
    assert_eq!(opened["filename"], "handshake.db");
    assert_eq!(opened["persistent"], true);

    let err = transport
        .send(OperationKind::Open, json!({"filename": "other.db", "vfs": "memory"}))
        .await
        .unwrap_err();
    assert_eq!(err.engine_info().unwrap().operation.as_deref(), Some("open"));

    transport.close();
}
