//! MJPEG viewer endpoint
//!
//! `GET /stream` attaches a frame subscriber and streams
//! `multipart/x-mixed-replace` until the camera stops or the client goes
//! away. Status codes follow the camera state: 500 while ABORT, 404 while
//! STOP.

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::{BufMut, Bytes, BytesMut};
use futures::StreamExt;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::error::{IpcamError, Result};
use crate::registry::FrameStream;
use crate::supervisor::Supervisor;
use crate::types::{CameraState, Frame, MJPEG_MIME};

/// Shared state for the stream handlers
struct StreamState {
    supervisor: Arc<Supervisor>,
    extended_header: bool,
}

/// Build the HTTP routes
pub fn router(supervisor: Arc<Supervisor>, extended_header: bool) -> Router {
    let state = Arc::new(StreamState {
        supervisor,
        extended_header,
    });

    Router::new()
        .route("/stream", get(stream).head(head_stream))
        .with_state(state)
}

/// Bind the listener for the MJPEG endpoint
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| IpcamError::config(format!("Failed to bind HTTP endpoint {}: {}", addr, e)))?;
    info!("MJPEG stream available at http://{}/stream", listener.local_addr()?);
    Ok(listener)
}

/// Serve until `shutdown` resolves
///
/// Open streams keep the server alive until the camera stops and their
/// subscribers receive end-of-stream.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| IpcamError::config(format!("HTTP server error: {}", e)))?;

    info!("MJPEG endpoint stopped");
    Ok(())
}

fn refuse(state: CameraState) -> Option<StatusCode> {
    match state {
        CameraState::Abort => Some(StatusCode::INTERNAL_SERVER_ERROR),
        CameraState::Stop => Some(StatusCode::NOT_FOUND),
        CameraState::Alive => None,
    }
}

/// `HEAD /stream`: same status as `GET`, no body
async fn head_stream(State(state): State<Arc<StreamState>>) -> Response {
    if let Some(status) = refuse(state.supervisor.state()) {
        return status.into_response();
    }

    (
        [
            (header::CONTENT_TYPE, "multipart/x-mixed-replace;"),
            (header::CONNECTION, "close"),
        ],
        (),
    )
        .into_response()
}

/// `GET /stream`
async fn stream(State(state): State<Arc<StreamState>>) -> Response {
    if let Some(status) = refuse(state.supervisor.state()) {
        return status.into_response();
    }

    // The camera may have stopped since the state check
    let frames = match state.supervisor.subscribe_frames() {
        Ok(frames) => frames,
        Err(e) => {
            debug!("Viewer refused: {}", e);
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    let boundary = uuid::Uuid::new_v4().simple().to_string();
    info!("Viewer attached as {}", frames.id());

    let body = multipart_body(frames, boundary.clone(), state.extended_header);
    (
        [
            (
                header::CONTENT_TYPE,
                format!("multipart/x-mixed-replace; boundary={}", boundary),
            ),
            (header::CONNECTION, "close".to_string()),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
        body,
    )
        .into_response()
}

/// Turn a frame subscription into a multipart body
///
/// The subscription travels with the body, so it is detached when hyper
/// drops the body on disconnect.
fn multipart_body(frames: FrameStream, boundary: String, extended: bool) -> Body {
    let preamble = futures::stream::once(async { Ok::<_, Infallible>(Bytes::from_static(b"\r\n")) });

    let parts = futures::stream::unfold((frames, 0u64), move |(mut frames, count)| {
        let boundary = boundary.clone();
        async move {
            let frame = frames.next().await?;
            let part = encode_part(&boundary, &frame, count, extended);
            Some((Ok::<_, Infallible>(part), (frames, count + 1)))
        }
    });

    Body::from_stream(preamble.chain(parts))
}

/// One multipart section: boundary, headers, JPEG payload
pub fn encode_part(boundary: &str, frame: &Frame, count: u64, extended: bool) -> Bytes {
    let mut head = format!(
        "--{}\r\nContent-Type: {}\r\nContent-Length: {}\r\n",
        boundary,
        MJPEG_MIME,
        frame.data.len()
    );
    if extended {
        head.push_str(&format!(
            "X-Frame-Number: {}\r\nX-Timestamp: {}\r\n",
            count, frame.timestamp_ms
        ));
    }
    head.push_str("\r\n");

    let mut buf = BytesMut::with_capacity(head.len() + frame.data.len() + 2);
    buf.put_slice(head.as_bytes());
    buf.put_slice(&frame.data);
    buf.put_slice(b"\r\n");
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_layout() {
        let frame = Frame {
            sequence: 9,
            data: Bytes::from_static(b"JPEG"),
            timestamp_ms: 1_700_000_000_000,
        };
        let part = encode_part("b0", &frame, 3, false);
        assert_eq!(
            &part[..],
            b"--b0\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\nJPEG\r\n"
        );
    }

    #[test]
    fn test_extended_header() {
        let frame = Frame {
            sequence: 9,
            data: Bytes::from_static(b"JPEG"),
            timestamp_ms: 1_700_000_000_000,
        };
        let part = encode_part("b0", &frame, 3, true);
        let text = String::from_utf8_lossy(&part);
        assert!(text.contains("X-Frame-Number: 3\r\n"));
        assert!(text.contains("X-Timestamp: 1700000000000\r\n"));
    }
}
