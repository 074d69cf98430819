use std::time::Duration;

use control_protocol::State;
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::controller::{Chunk, Controller};
use crate::error::{ControllerError, DispatchError};

/// Default time a caller waits for a one-shot `get_state`/`set_state` reply
/// before reporting `UpstreamUnavailable`.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time a `downstream` caller waits for the *next* chunk before
/// reporting `UpstreamUnavailable`. Distinct from, and much larger than,
/// [`DEFAULT_REPLY_TIMEOUT`]: a controller's `downstream` is explicitly
/// allowed to pace chunks however it likes (`Controller::downstream`'s doc
/// only says producers "may" emit idle markers, never that they must on any
/// particular cadence), and the spec's actual liveness heartbeat is the
/// multiplexer's much shorter `chunking_timeout` layered in front of this.
/// This timeout exists purely as a backstop against a wedged owner task,
/// not as a liveness mechanism in its own right.
pub const DEFAULT_STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(3600);

const REQUEST_CHANNEL_CAPACITY: usize = 64;
const STREAM_CHANNEL_CAPACITY: usize = 32;

/// A tagged unit of work submitted to a dispatcher's owner task. `reply`
/// is a one-shot or streaming sink unique to the caller — no fan-out, no
/// cross-talk.
enum DispatchTask {
    GetState {
        reply: oneshot::Sender<State>,
    },
    SetState {
        partial: State,
        reply: oneshot::Sender<Result<State, ControllerError>>,
    },
    MuteSetState {
        partial: State,
    },
    Downstream {
        query: State,
        reply: mpsc::Sender<StreamEvent>,
    },
    Shutdown,
}

/// One item delivered on a streaming reply sink. `End` is the designated
/// end-of-stream sentinel, distinct from any legal chunk.
enum StreamEvent {
    Chunk(Chunk),
    Error(ControllerError),
    End,
}

/// Wraps one controller with a dedicated owner task so that many concurrent
/// callers can share it safely without serialising unrelated callers behind
/// one another's streams.
///
/// There is exactly one request channel per dispatcher, shared by every
/// caller. `tokio::sync::mpsc::Sender::send` is already safe to call
/// concurrently from clones of the same sender — sends are atomic with
/// respect to each other — so no additional mutex is needed around the
/// write side here; see DESIGN.md.
pub struct Dispatcher {
    name: String,
    tx: mpsc::Sender<DispatchTask>,
    inner: Mutex<Inner>,
    reply_timeout: Duration,
    stream_idle_timeout: Duration,
}

struct Inner {
    rx: Option<mpsc::Receiver<DispatchTask>>,
    controller: Option<Box<dyn Controller>>,
    handle: Option<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn new(controller: Box<dyn Controller>) -> Self {
        let name = controller.name().to_owned();
        let (tx, rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        Self {
            name,
            tx,
            inner: Mutex::new(Inner {
                rx: Some(rx),
                controller: Some(controller),
                handle: None,
            }),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            stream_idle_timeout: DEFAULT_STREAM_IDLE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_stream_idle_timeout(mut self, timeout: Duration) -> Self {
        self.stream_idle_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Launches the owner task. Idempotent; required before any other call.
    pub async fn start(&self) {
        let mut inner = self.inner.lock().await;
        if inner.handle.is_some() {
            return;
        }
        let rx = inner.rx.take().expect("rx taken without a handle present");
        let controller = inner
            .controller
            .take()
            .expect("controller taken without a handle present");
        let name = self.name.clone();
        inner.handle = Some(tokio::spawn(owner_loop(name, controller, rx)));
    }

    async fn submit(&self, task: DispatchTask) -> Result<(), DispatchError> {
        self.tx
            .send(task)
            .await
            .map_err(|_| DispatchError::UpstreamUnavailable)
    }

    pub async fn get_state(&self) -> Result<State, DispatchError> {
        let (reply, reply_rx) = oneshot::channel();
        self.submit(DispatchTask::GetState { reply }).await?;
        tokio::time::timeout(self.reply_timeout, reply_rx)
            .await
            .map_err(|_| DispatchError::UpstreamUnavailable)?
            .map_err(|_| DispatchError::UpstreamUnavailable)
    }

    pub async fn set_state(&self, partial: State) -> Result<State, DispatchError> {
        let (reply, reply_rx) = oneshot::channel();
        self.submit(DispatchTask::SetState { partial, reply }).await?;
        let result = tokio::time::timeout(self.reply_timeout, reply_rx)
            .await
            .map_err(|_| DispatchError::UpstreamUnavailable)?
            .map_err(|_| DispatchError::UpstreamUnavailable)?;
        result.map_err(DispatchError::Device)
    }

    /// Fire-and-forget `set_state`, used by the scheduler for deferred
    /// actions.
    pub async fn mute_set_state(&self, partial: State) -> Result<(), DispatchError> {
        self.submit(DispatchTask::MuteSetState { partial }).await
    }

    /// Submits a `Downstream` task and returns a stream of chunks, ending
    /// when the owner forwards the end-of-stream sentinel.
    pub async fn downstream(
        &self,
        query: State,
    ) -> Result<impl Stream<Item = Result<Chunk, DispatchError>> + Send, DispatchError> {
        let (reply, mut reply_rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        self.submit(DispatchTask::Downstream { query, reply }).await?;
        let timeout = self.stream_idle_timeout;

        Ok(async_stream::stream! {
            loop {
                match tokio::time::timeout(timeout, reply_rx.recv()).await {
                    Ok(Some(StreamEvent::Chunk(chunk))) => yield Ok(chunk),
                    Ok(Some(StreamEvent::Error(err))) => {
                        yield Err(DispatchError::Device(err));
                    }
                    Ok(Some(StreamEvent::End)) | Ok(None) => break,
                    Err(_elapsed) => {
                        yield Err(DispatchError::UpstreamUnavailable);
                        break;
                    }
                }
            }
        })
    }

    /// Submits `Shutdown` and joins the owner. Safe to call multiple times.
    pub async fn stop(&self) {
        let _ = self.tx.send(DispatchTask::Shutdown).await;
        let mut inner = self.inner.lock().await;
        if let Some(handle) = inner.handle.take() {
            let _ = handle.await;
        }
    }
}

/// The owner loop: receive, execute against the wrapped controller, reply.
/// Controller errors are caught and forwarded as an error variant; the
/// worker keeps running.
async fn owner_loop(name: String, mut controller: Box<dyn Controller>, mut rx: mpsc::Receiver<DispatchTask>) {
    tracing::info!(controller = %name, "dispatcher worker starting");

    while let Some(task) = rx.recv().await {
        match task {
            DispatchTask::GetState { reply } => {
                let _ = reply.send(controller.get_state());
            }
            DispatchTask::SetState { partial, reply } => {
                let _ = reply.send(controller.set_state(&partial));
            }
            DispatchTask::MuteSetState { partial } => {
                if let Err(err) = controller.set_state(&partial) {
                    tracing::error!(controller = %name, error = %err, "mute_set_state failed");
                }
            }
            DispatchTask::Downstream { query, reply } => {
                let stream = controller.downstream(query);
                tokio::pin!(stream);
                loop {
                    match stream.next().await {
                        Some(Ok(chunk)) => {
                            if reply.send(StreamEvent::Chunk(chunk)).await.is_err() {
                                tracing::debug!(controller = %name, "downstream consumer gone, stopping early");
                                break;
                            }
                        }
                        Some(Err(err)) => {
                            let _ = reply.send(StreamEvent::Error(err)).await;
                            break;
                        }
                        None => {
                            let _ = reply.send(StreamEvent::End).await;
                            break;
                        }
                    }
                }
            }
            DispatchTask::Shutdown => break,
        }
    }

    tracing::info!(controller = %name, "dispatcher worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ChunkStream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingRelay {
        name: String,
        relay1: String,
        sets: Arc<AtomicUsize>,
    }

    impl Controller for CountingRelay {
        fn name(&self) -> &str {
            &self.name
        }
        fn baseclass(&self) -> &str {
            "relay_board"
        }
        fn get_state(&self) -> State {
            let mut state = State::new();
            state.insert("relay1".into(), serde_json::json!(self.relay1));
            state
        }
        fn set_state(&mut self, partial: &State) -> Result<State, ControllerError> {
            self.sets.fetch_add(1, Ordering::SeqCst);
            if let Some(v) = partial.get("relay1").and_then(|v| v.as_str()) {
                self.relay1 = v.to_owned();
            }
            Ok(self.get_state())
        }
        fn downstream(&mut self, _query: State) -> ChunkStream {
            let values = vec![Chunk::Data(serde_json::json!({"n": 1})), Chunk::Idle, Chunk::Data(serde_json::json!({"n": 2}))];
            Box::pin(futures::stream::iter(values.into_iter().map(Ok)))
        }
    }

    #[tokio::test]
    async fn get_state_roundtrips_through_the_owner() {
        let sets = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::new(Box::new(CountingRelay {
            name: "rb".into(),
            relay1: "open".into(),
            sets,
        }));
        dispatcher.start().await;

        let state = dispatcher.get_state().await.unwrap();
        assert_eq!(state.get("relay1").unwrap(), "open");

        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn concurrent_set_state_calls_all_observe_serialized_execution() {
        let sets = Arc::new(AtomicUsize::new(0));
        let dispatcher = Arc::new(Dispatcher::new(Box::new(CountingRelay {
            name: "rb".into(),
            relay1: "open".into(),
            sets: sets.clone(),
        })));
        dispatcher.start().await;

        let mut handles = Vec::new();
        for i in 0..20 {
            let dispatcher = dispatcher.clone();
            handles.push(tokio::spawn(async move {
                let mut partial = State::new();
                partial.insert("relay1".into(), serde_json::json!(format!("state-{i}")));
                dispatcher.set_state(partial).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(sets.load(Ordering::SeqCst), 20);
        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn mute_set_state_discards_the_result() {
        let sets = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::new(Box::new(CountingRelay {
            name: "rb".into(),
            relay1: "open".into(),
            sets: sets.clone(),
        }));
        dispatcher.start().await;

        let mut partial = State::new();
        partial.insert("relay1".into(), serde_json::json!("closed"));
        dispatcher.mute_set_state(partial).await.unwrap();

        // give the owner a turn to process the fire-and-forget task
        let state = dispatcher.get_state().await.unwrap();
        assert_eq!(state.get("relay1").unwrap(), "closed");
        assert_eq!(sets.load(Ordering::SeqCst), 1);

        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn downstream_yields_chunks_then_ends() {
        let dispatcher = Dispatcher::new(Box::new(CountingRelay {
            name: "rb".into(),
            relay1: "open".into(),
            sets: Arc::new(AtomicUsize::new(0)),
        }));
        dispatcher.start().await;

        let stream = dispatcher.downstream(State::new()).await.unwrap();
        tokio::pin!(stream);
        let mut chunks = Vec::new();
        while let Some(item) = stream.next().await {
            chunks.push(item.unwrap());
        }

        assert_eq!(
            chunks,
            vec![
                Chunk::Data(serde_json::json!({"n": 1})),
                Chunk::Idle,
                Chunk::Data(serde_json::json!({"n": 2})),
            ]
        );

        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn calls_after_stop_surface_upstream_unavailable() {
        let dispatcher = Dispatcher::new(Box::new(CountingRelay {
            name: "rb".into(),
            relay1: "open".into(),
            sets: Arc::new(AtomicUsize::new(0)),
        }));
        dispatcher.start().await;
        dispatcher.stop().await;

        let result = dispatcher.get_state().await;
        assert!(matches!(result, Err(DispatchError::UpstreamUnavailable)));
    }
}
