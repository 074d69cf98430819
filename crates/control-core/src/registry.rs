use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::controller::Controller;
use crate::error::UnknownController;

/// Builds one controller instance from its name and a JSON configuration
/// blob. Registered per `baseclass` ahead of time — see
/// [`register_builtin_controllers`] — since Rust has no dynamic
/// dotted-path import to build a controller from a class name at runtime.
pub type ControllerFactory =
    Arc<dyn Fn(&str, &serde_json::Value) -> Result<Box<dyn Controller>, String> + Send + Sync>;

/// Maps a `baseclass` name (e.g. `"relay_board"`) to the factory that
/// builds it. Populated once at startup, read thereafter — no interior
/// mutability needed once construction is complete.
#[derive(Clone, Default)]
pub struct ControllerRegistry {
    factories: HashMap<String, ControllerFactory>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, baseclass: impl Into<String>, factory: ControllerFactory) {
        self.factories.insert(baseclass.into(), factory);
    }

    pub fn known_baseclasses(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Instantiates the controller named `entry.name` of class
    /// `entry.baseclass`, passing through `entry.config` verbatim.
    pub fn build(&self, entry: &ControllerEntryConfig) -> Result<Box<dyn Controller>, BuildError> {
        let factory = self
            .factories
            .get(&entry.baseclass)
            .ok_or(BuildError::UnknownBaseclass(entry.baseclass.clone()))?;
        factory(&entry.name, &entry.config).map_err(BuildError::Construction)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BuildError {
    #[error("unknown controller baseclass {0:?}")]
    UnknownBaseclass(String),
    #[error("failed to construct controller: {0}")]
    Construction(String),
}

impl From<BuildError> for UnknownController {
    fn from(_: BuildError) -> Self {
        UnknownController
    }
}

/// One controller's entry in the fleet configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerEntryConfig {
    pub name: String,
    pub baseclass: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub config: serde_json::Value,
}

fn default_enabled() -> bool {
    true
}

/// Top-level shape of the fleet configuration file: a flat list of
/// controllers, each independently enableable.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct FleetConfig {
    pub controllers: Vec<ControllerEntryConfig>,
}

impl FleetConfig {
    pub fn load_from_path(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&raw).map_err(ConfigError::Parse)
    }

    /// Only the entries with `enabled: true`, in file order.
    pub fn enabled_controllers(&self) -> impl Iterator<Item = &ControllerEntryConfig> {
        self.controllers.iter().filter(|c| c.enabled)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config file: {0}")]
    Io(#[source] std::io::Error),
    #[error("could not parse config file: {0}")]
    Parse(#[source] serde_json::Error),
}

/// Registers the controllers shipped with this crate as demonstration and
/// test fixtures standing in for a real hardware-backed fleet.
pub fn register_builtin_controllers(registry: &mut ControllerRegistry) {
    registry.register(
        "relay_board",
        Arc::new(|name, config| Ok(Box::new(crate::demo::relay_board::RelayBoard::new(name, config)))),
    );
    registry.register(
        "host_power",
        Arc::new(|name, _config| Ok(Box::new(crate::demo::host_power::HostPower::new(name)))),
    );
}
