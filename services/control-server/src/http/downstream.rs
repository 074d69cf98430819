use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::Json;
use control_core::{multiplex, Chunk, MultiplexItem, NamedSource};
use control_protocol::{DownstreamRequest, State as ControllerState};
use futures::{Stream, StreamExt};

use crate::error::ApiError;
use crate::state::AppState;

/// Default aggregate idle window before a heartbeat is injected.
const CHUNKING_TIMEOUT: Duration = Duration::from_secs(20);

/// One framed element: either a JSON-encoded data chunk or an idle tick.
enum Piece {
    Data(String),
    Idle,
}

/// Wraps a lazy sequence of [`Piece`]s as the chunked JSON array wire
/// format: `[`, data chunks separated by `,`, idle
/// ticks rendered as a single insignificant space, closing `]`. Streamed
/// directly into the response body — nothing is buffered up front.
fn frame_response<S>(pieces: S) -> Response
where
    S: Stream<Item = Piece> + Send + 'static,
{
    let body_stream = async_stream::stream! {
        yield Ok::<_, std::io::Error>(Bytes::from_static(b"["));
        let mut wrote_first = false;
        tokio::pin!(pieces);
        while let Some(piece) = pieces.next().await {
            match piece {
                Piece::Data(encoded) => {
                    if wrote_first {
                        yield Ok(Bytes::from_static(b","));
                    }
                    wrote_first = true;
                    yield Ok(Bytes::from(encoded));
                }
                Piece::Idle => yield Ok(Bytes::from_static(b" ")),
            }
        }
        yield Ok(Bytes::from_static(b"]"));
    };

    // Transfer-Encoding is left to hyper: it switches to chunked framing on
    // its own once it sees a body with no known length.
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from_stream(body_stream))
        .expect("static headers are always valid")
}

/// `POST /downstream/<cname>` — one controller's raw chunk stream, framed
/// without a `name` tag (unlike the fleet form, there is only one source).
pub async fn downstream_one(
    State(state): State<AppState>,
    Path(cname): Path<String>,
    Json(query): Json<ControllerState>,
) -> Result<Response, ApiError> {
    let dispatcher = state.dispatcher(&cname)?;
    let chunks = dispatcher.downstream(query).await?;

    let pieces = async_stream::stream! {
        tokio::pin!(chunks);
        while let Some(item) = chunks.next().await {
            match item {
                Ok(Chunk::Data(value)) => yield Piece::Data(value.to_string()),
                Ok(Chunk::Idle) => yield Piece::Idle,
                Err(err) => {
                    tracing::error!(controller = %cname, error = %err, "downstream terminated early");
                    break;
                }
            }
        }
    };

    Ok(frame_response(pieces))
}

/// `POST /downstream` — every named controller's stream, interleaved by
/// [`control_core::multiplex`] and tagged `{"name":…, "data":…}`.
pub async fn downstream_fleet(
    State(state): State<AppState>,
    Json(body): Json<DownstreamRequest>,
) -> Result<Response, ApiError> {
    let mut sources = Vec::with_capacity(body.controllers.len());
    for entry in body.controllers {
        let dispatcher = state.dispatcher(&entry.name)?;
        let stream = dispatcher.downstream(entry.query).await?;
        sources.push(NamedSource {
            name: entry.name,
            stream,
        });
    }

    let merged = multiplex(sources, CHUNKING_TIMEOUT);
    let pieces = async_stream::stream! {
        tokio::pin!(merged);
        while let Some(item) = merged.next().await {
            match item {
                Ok(MultiplexItem::Chunk { source, chunk }) => {
                    let encoded = serde_json::json!({ "name": source, "data": chunk }).to_string();
                    yield Piece::Data(encoded);
                }
                Ok(MultiplexItem::Idle) => yield Piece::Idle,
                Err(err) => {
                    tracing::error!(error = %err, "multiplexed downstream terminated early");
                    break;
                }
            }
        }
    };

    Ok(frame_response(pieces))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use control_core::{register_builtin_controllers, ControllerEntryConfig, ControllerRegistry};

    async fn test_state() -> AppState {
        let mut registry = ControllerRegistry::new();
        register_builtin_controllers(&mut registry);
        let entries = vec![
            ControllerEntryConfig {
                name: "a".into(),
                baseclass: "relay_board".into(),
                enabled: true,
                config: serde_json::Value::Null,
            },
            ControllerEntryConfig {
                name: "b".into(),
                baseclass: "relay_board".into(),
                enabled: true,
                config: serde_json::Value::Null,
            },
        ];
        AppState::bootstrap(&registry, &entries).await.unwrap()
    }

    #[tokio::test]
    async fn empty_single_stream_frames_as_empty_array() {
        let state = test_state().await;
        let response = downstream_one(State(state.clone()), Path("a".into()), Json(ControllerState::new()))
            .await
            .unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"[]");
        state.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_controller_downstream_is_not_found() {
        let state = test_state().await;
        let err = downstream_one(State(state.clone()), Path("nope".into()), Json(ControllerState::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::UnknownController));
        state.shutdown().await;
    }
}
