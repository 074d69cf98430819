use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

use crate::controller::Chunk;
use crate::error::ControllerError;

/// One named chunk source feeding the multiplexer — typically one
/// controller's `downstream` stream, tagged with its controller name.
pub struct NamedSource<S> {
    pub name: String,
    pub stream: S,
}

/// An item produced by [`multiplex`]: either a chunk tagged with the source
/// it came from, or an idle heartbeat meaning no source produced anything
/// within the idle window, so a quiet source never reads as a dead one.
#[derive(Debug, Clone, PartialEq)]
pub enum MultiplexItem {
    Chunk { source: String, chunk: serde_json::Value },
    Idle,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum MultiplexError {
    #[error("source {source}: {inner}")]
    Source { source: String, inner: ControllerError },
}

enum Relay {
    Item(String, Result<Chunk, ControllerError>),
    Done(String),
}

/// Merges several lazy chunk streams into one interleaved sequence: chunks
/// are emitted as soon as any source produces one, and an `Idle` marker is
/// emitted whenever `idle_timeout` elapses with nothing new from any
/// source. Ends once every source has ended.
///
/// Each source runs as its own task so a slow or stalled source never
/// blocks the others.
pub fn multiplex<S>(
    sources: Vec<NamedSource<S>>,
    idle_timeout: Duration,
) -> impl Stream<Item = Result<MultiplexItem, MultiplexError>>
where
    S: Stream<Item = Result<Chunk, ControllerError>> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel(256);
    let mut remaining = sources.len();

    for source in sources {
        let tx = tx.clone();
        tokio::spawn(async move {
            let NamedSource { name, stream } = source;
            tokio::pin!(stream);
            while let Some(item) = stream.next().await {
                if tx.send(Relay::Item(name.clone(), item)).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(Relay::Done(name)).await;
        });
    }
    drop(tx);

    async_stream::stream! {
        if remaining == 0 {
            return;
        }
        loop {
            match tokio::time::timeout(idle_timeout, rx.recv()).await {
                Ok(Some(Relay::Item(source, Ok(Chunk::Data(value))))) => {
                    yield Ok(MultiplexItem::Chunk { source, chunk: value });
                }
                Ok(Some(Relay::Item(_source, Ok(Chunk::Idle)))) => {
                    yield Ok(MultiplexItem::Idle);
                }
                Ok(Some(Relay::Item(source, Err(inner)))) => {
                    yield Err(MultiplexError::Source { source, inner });
                }
                Ok(Some(Relay::Done(_name))) => {
                    remaining -= 1;
                    if remaining == 0 {
                        break;
                    }
                }
                Ok(None) => break,
                Err(_elapsed) => {
                    yield Ok(MultiplexItem::Idle);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn data(v: serde_json::Value) -> Result<Chunk, ControllerError> {
        Ok(Chunk::Data(v))
    }

    #[tokio::test]
    async fn interleaves_chunks_from_multiple_sources() {
        let a = NamedSource {
            name: "a".into(),
            stream: stream::iter(vec![data(serde_json::json!(1)), data(serde_json::json!(2))]),
        };
        let b = NamedSource {
            name: "b".into(),
            stream: stream::iter(vec![data(serde_json::json!("x"))]),
        };

        let merged = multiplex(vec![a, b], Duration::from_millis(200));
        tokio::pin!(merged);

        let mut names = Vec::new();
        while let Some(item) = merged.next().await {
            if let MultiplexItem::Chunk { source, .. } = item.unwrap() {
                names.push(source);
            }
        }
        names.sort();
        assert_eq!(names, vec!["a", "a", "b"]);
    }

    #[tokio::test]
    async fn idle_timeout_yields_heartbeats_between_late_chunks() {
        let slow = NamedSource {
            name: "slow".into(),
            stream: async_stream::stream! {
                tokio::time::sleep(Duration::from_millis(60)).await;
                yield data(serde_json::json!("late"));
            },
        };

        let merged = multiplex(vec![slow], Duration::from_millis(10));
        tokio::pin!(merged);

        let mut saw_idle = false;
        let mut saw_chunk = false;
        while let Some(item) = merged.next().await {
            match item.unwrap() {
                MultiplexItem::Idle => saw_idle = true,
                MultiplexItem::Chunk { .. } => saw_chunk = true,
            }
        }
        assert!(saw_idle, "expected at least one idle heartbeat");
        assert!(saw_chunk, "expected the late chunk to still arrive");
    }

    #[tokio::test]
    async fn ends_once_every_source_has_ended() {
        let a = NamedSource {
            name: "a".into(),
            stream: stream::iter(Vec::<Result<Chunk, ControllerError>>::new()),
        };
        let merged = multiplex(vec![a], Duration::from_millis(50));
        tokio::pin!(merged);
        assert!(merged.next().await.is_none());
    }
}
