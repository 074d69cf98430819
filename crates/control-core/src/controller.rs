use std::pin::Pin;

use control_protocol::State;
use futures::Stream;

use crate::error::ControllerError;

/// A single produced item on a controller's downstream sequence. The `Idle`
/// variant is the "I am alive but have nothing yet" marker — kept as its
/// own variant rather than an `Option<Value>` or JSON
/// `null` so it can never collide with a legitimate empty chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    Data(serde_json::Value),
    Idle,
}

/// A lazy, cancellable sequence of downstream chunks. Dropping the stream
/// before it ends must release any resources the controller holds for it;
/// this falls out for free as long as implementations don't detach
/// background work that outlives the stream's own `Drop`.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk, ControllerError>> + Send>>;

/// The abstract capability a device exposes.
///
/// Controllers are **not** thread-safe: all concurrency protection is the
/// dispatcher's job. A controller is owned exclusively by the single
/// dispatcher task that wraps it, so `&mut self` on `set_state` is safe
/// without internal locking.
pub trait Controller: Send + 'static {
    /// Unique name within the process, assigned at construction.
    fn name(&self) -> &str;

    /// Human-readable type identifier, derived from the implementation's
    /// class name in snake_case.
    fn baseclass(&self) -> &str;

    /// Pure read of current device-visible state. Must not block on
    /// external I/O longer than O(ms).
    fn get_state(&self) -> State;

    /// Applies `partial` with merge semantics and returns the new full
    /// state. Must leave the device in a well-defined state (fully applied
    /// or unchanged) on failure. Idempotent when `partial` is empty.
    fn set_state(&mut self, partial: &State) -> Result<State, ControllerError>;

    /// Produces a finite or infinite lazy sequence of chunks. The default
    /// implementation is an empty sequence, so controllers with nothing to
    /// stream don't need to implement this.
    fn downstream(&mut self, _query: State) -> ChunkStream {
        Box::pin(futures::stream::empty())
    }
}
