use std::collections::HashMap;
use std::sync::Arc;

use control_core::{ControllerEntryConfig, ControllerRegistry, Dispatcher, Scheduler, UnknownController};

use crate::error::ApiError;

/// One fleet member: its running dispatcher plus the `baseclass` tag
/// reported by `GET /controllers`.
pub struct ManagedController {
    pub dispatcher: Arc<Dispatcher>,
    pub baseclass: String,
}

/// Shared application state handed to every handler via `axum::State`.
/// Cheap to clone — every field is already reference-counted.
#[derive(Clone)]
pub struct AppState {
    pub controllers: Arc<HashMap<String, ManagedController>>,
    pub scheduler: Arc<Scheduler>,
}

impl AppState {
    /// Builds and starts one dispatcher per enabled entry in `config`,
    /// resolving each against `registry`'s explicit registration map.
    pub async fn bootstrap(
        registry: &ControllerRegistry,
        entries: &[ControllerEntryConfig],
    ) -> Result<Self, control_core::BuildError> {
        let mut controllers = HashMap::new();
        for entry in entries.iter().filter(|e| e.enabled) {
            let controller = registry.build(entry)?;
            let dispatcher = Arc::new(Dispatcher::new(controller));
            dispatcher.start().await;
            controllers.insert(
                entry.name.clone(),
                ManagedController {
                    dispatcher,
                    baseclass: entry.baseclass.clone(),
                },
            );
        }
        Ok(Self {
            controllers: Arc::new(controllers),
            scheduler: Arc::new(Scheduler::start()),
        })
    }

    pub fn dispatcher(&self, name: &str) -> Result<Arc<Dispatcher>, ApiError> {
        self.controllers
            .get(name)
            .map(|managed| managed.dispatcher.clone())
            .ok_or(UnknownController)
            .map_err(ApiError::from)
    }

    /// Stops every dispatcher and the scheduler, in reverse startup order.
    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
        for managed in self.controllers.values() {
            managed.dispatcher.stop().await;
        }
    }
}
