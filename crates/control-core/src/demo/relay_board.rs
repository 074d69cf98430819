use control_protocol::State;

use crate::controller::Controller;
use crate::error::ControllerError;

const RELAYS: [&str; 3] = ["relay1", "relay2", "relay3"];
const OPEN: &str = "open";
const CLOSED: &str = "closed";

/// In-memory stand-in for a GPIO-backed relay board: three independently
/// switchable relays, each `"open"` or `"closed"`. Used as the fixture for
/// a single relay toggle and for exercising multi-controller `downstream`
/// aggregation.
pub struct RelayBoard {
    name: String,
    relays: [String; 3],
}

impl RelayBoard {
    pub fn new(name: &str, _config: &serde_json::Value) -> Self {
        Self {
            name: name.to_owned(),
            relays: [OPEN.to_owned(), OPEN.to_owned(), OPEN.to_owned()],
        }
    }
}

impl Controller for RelayBoard {
    fn name(&self) -> &str {
        &self.name
    }

    fn baseclass(&self) -> &str {
        "relay_board"
    }

    fn get_state(&self) -> State {
        let mut state = State::new();
        for (relay, value) in RELAYS.iter().zip(&self.relays) {
            state.insert((*relay).to_owned(), serde_json::json!(value));
        }
        state
    }

    fn set_state(&mut self, partial: &State) -> Result<State, ControllerError> {
        // Validate every field before applying any of them, so a later
        // invalid relay can't leave an earlier one half-applied.
        let mut updates: Vec<(usize, &str)> = Vec::new();
        for (i, relay) in RELAYS.iter().enumerate() {
            let Some(value) = partial.get(*relay) else {
                continue;
            };
            let Some(value) = value.as_str() else {
                return Err(ControllerError::new(format!("{relay} must be a string")));
            };
            if value != OPEN && value != CLOSED {
                return Err(ControllerError::new(format!(
                    "{relay} must be {OPEN:?} or {CLOSED:?}, got {value:?}"
                )));
            }
            updates.push((i, value));
        }
        for (i, value) in updates {
            self.relays[i] = value.to_owned();
        }
        Ok(self.get_state())
    }
}
