use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use shareget_core::{
    resolve_endpoints, HttpTransport, RunConfig, RunController, ShareError, Transport,
};
use shareget_types::{RunEvent, Settings};

const PHOTO: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00binary\r\n\r\npayload";

async fn info() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain")],
        r#"{"total": 2, "device": "phone"}"#,
    )
}

async fn first_file() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_DISPOSITION,
            r#"attachment; filename="IMG:0001.png""#,
        )],
        PHOTO.to_vec(),
    )
}

async fn second_file() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_DISPOSITION, r#"attachment; filename="notes.txt""#)],
        "hello from the share".to_string(),
    )
}

async fn truncated_file() -> impl IntoResponse {
    let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
        Ok(Bytes::from_static(b"first half")),
        Err(std::io::Error::other("sender went away")),
    ];
    (
        [(header::CONTENT_DISPOSITION, r#"attachment; filename="cut.bin""#)],
        // Pause before failing so the headers and first chunk reach the client
        Body::from_stream(futures::stream::iter(chunks).then(|chunk| async move {
            if chunk.is_err() {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            chunk
        })),
    )
}

async fn start_server() -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let app = Router::new()
        .route("/share/info", get(info))
        .route("/share/0", get(first_file))
        .route("/share/1", get(second_file))
        .route("/broken/0", get(truncated_file));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, handle)
}

async fn wait_for_end(rx: &mut broadcast::Receiver<RunEvent>) -> Vec<RunEvent> {
    let mut events = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let done = event.is_terminal();
                    events.push(event);
                    if done {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
    .await
    .expect("run finished in time");
    events
}

#[tokio::test]
async fn test_run_over_http() {
    let (addr, _handle) = start_server().await;
    let dir = tempfile::tempdir().unwrap();

    let settings = Settings::default();
    let transport = HttpTransport::new(&settings).unwrap();
    let (event_tx, _) = broadcast::channel(64);
    let controller = RunController::new(Arc::new(transport), RunConfig::from(&settings), event_tx);

    // The dead endpoint refuses connections; the live one wins the race
    let endpoints = resolve_endpoints(&[
        "http://127.0.0.1:9/share/".to_string(),
        format!("http://{}/share", addr),
    ])
    .unwrap();
    controller.set_endpoints(endpoints);

    let mut rx = controller.subscribe();
    controller.start_run(dir.path()).await.unwrap();
    let events = wait_for_end(&mut rx).await;

    assert!(matches!(
        events.last(),
        Some(RunEvent::Completed { received: 2, .. })
    ));
    assert_eq!(std::fs::read(dir.path().join("IMG0001.png")).unwrap(), PHOTO);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("notes.txt")).unwrap(),
        "hello from the share"
    );
    assert_eq!(controller.in_flight(), 0);
}

#[tokio::test]
async fn test_missing_manifest_times_out() {
    let (addr, _handle) = start_server().await;
    let dir = tempfile::tempdir().unwrap();

    let settings = Settings {
        idle_abort_secs: 1,
        ..Settings::default()
    };
    let transport = HttpTransport::new(&settings).unwrap();
    let (event_tx, _) = broadcast::channel(64);
    let controller = RunController::new(Arc::new(transport), RunConfig::from(&settings), event_tx);

    // No route at this prefix: the manifest request gets a 404
    controller.set_endpoints(resolve_endpoints(&[format!("http://{}/other/", addr)]).unwrap());

    let mut rx = controller.subscribe();
    controller.start_run(dir.path()).await.unwrap();
    let events = wait_for_end(&mut rx).await;

    assert!(events
        .iter()
        .any(|e| matches!(e, RunEvent::ManifestRejected { reason, .. } if reason.contains("404"))));
    assert!(matches!(events.last(), Some(RunEvent::TimedOut { .. })));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_truncated_body_is_a_transport_error() {
    let (addr, _handle) = start_server().await;
    let transport = HttpTransport::new(&Settings::default()).unwrap();

    let err = transport
        .get(&format!("http://{}/broken/0", addr))
        .await
        .unwrap_err();
    assert!(matches!(err, ShareError::Transport(ref msg) if msg.contains("cut short")), "{err}");

    // Refused connections never got an exchange going
    let err = transport.get("http://127.0.0.1:9/share/0").await.unwrap_err();
    assert!(matches!(err, ShareError::Network(_)), "{err}");
}
