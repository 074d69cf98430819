use thiserror::Error;

/// Error a [`crate::controller::Controller`] implementation can raise from
/// `set_state` or while producing a `downstream` chunk. Corresponds to
/// set_state or while producing a downstream chunk.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ControllerError(pub String);

impl ControllerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Error surfaced to a caller of [`crate::dispatcher::Dispatcher`].
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// The controller raised a `DeviceError` while executing the request.
    #[error("device error: {0}")]
    Device(#[from] ControllerError),
    /// The owner did not reply within the caller's timeout, or has exited.
    /// The caller should treat this the same as a timeout.
    #[error("upstream unavailable")]
    UpstreamUnavailable,
}

/// Error raised while validating a deferred-schedule request. Corresponds
/// validating repeat clauses and at lists.
#[derive(Debug, Clone, Error)]
pub enum SchedulerError {
    #[error("repeat.times must be >= 0, got {0}")]
    NegativeTimes(i64),
    #[error("repeat.interval must be > 0, got {0}")]
    NonPositiveInterval(f64),
    #[error("invalid time specification: {0}")]
    InvalidTimeSpec(String),
    #[error("at list must not be empty")]
    EmptyAtList,
}

/// Error raised when resolving a controller by name against the registry.
#[derive(Debug, Clone, Error)]
#[error("No such controller or not enabled")]
pub struct UnknownController;
