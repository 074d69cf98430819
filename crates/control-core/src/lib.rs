//! control-core: the shared-controller dispatcher (C2), deferred-action
//! scheduler (C3) and streaming multiplexer (C4) that sit between an HTTP
//! surface and a fleet of [`controller::Controller`] implementations (C1).

pub mod controller;
pub mod demo;
pub mod dispatcher;
pub mod error;
pub mod multiplex;
pub mod registry;
pub mod scheduler;

pub use controller::{Chunk, ChunkStream, Controller};
pub use dispatcher::Dispatcher;
pub use error::{ControllerError, DispatchError, SchedulerError, UnknownController};
pub use multiplex::{multiplex, MultiplexError, MultiplexItem, NamedSource};
pub use registry::{
    register_builtin_controllers, BuildError, ConfigError, ControllerEntryConfig, ControllerFactory,
    ControllerRegistry, FleetConfig,
};
pub use scheduler::{Action, ActionFuture, Repeat, Scheduler, TaskDescription, TaskId};
