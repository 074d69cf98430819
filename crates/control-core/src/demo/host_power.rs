use control_protocol::State;

use crate::controller::Controller;
use crate::error::ControllerError;

const ON: &str = "on";
const REBOOTING: &str = "rebooting";
const SHUTTING_DOWN: &str = "shutting down";

/// Stand-in for the host-power controller: a single `power` field that
/// transitions between `"on"`, `"rebooting"` and `"shutting down"`. The
/// original shelled out to `reboot`/`shutdown`; this demo fixture only logs
/// the transition, since actually rebooting the host is out of scope here.
pub struct HostPower {
    name: String,
    power: String,
}

impl HostPower {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            power: ON.to_owned(),
        }
    }
}

impl Controller for HostPower {
    fn name(&self) -> &str {
        &self.name
    }

    fn baseclass(&self) -> &str {
        "host_power"
    }

    fn get_state(&self) -> State {
        let mut state = State::new();
        state.insert("power".into(), serde_json::json!(self.power));
        state
    }

    fn set_state(&mut self, partial: &State) -> Result<State, ControllerError> {
        if let Some(value) = partial.get("power") {
            let value = value
                .as_str()
                .ok_or_else(|| ControllerError::new("power must be a string"))?;
            if ![ON, REBOOTING, SHUTTING_DOWN].contains(&value) {
                return Err(ControllerError::new(format!(
                    "power must be one of {ON:?}, {REBOOTING:?}, {SHUTTING_DOWN:?}, got {value:?}"
                )));
            }
            tracing::info!(controller = %self.name, from = %self.power, to = %value, "host power transition");
            self.power = value.to_owned();
        }
        Ok(self.get_state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_on() {
        let power = HostPower::new("hp");
        assert_eq!(power.get_state().get("power").unwrap(), ON);
    }

    #[test]
    fn transitions_to_a_valid_state() {
        let mut power = HostPower::new("hp");
        let mut partial = State::new();
        partial.insert("power".into(), serde_json::json!(REBOOTING));
        let state = power.set_state(&partial).unwrap();
        assert_eq!(state.get("power").unwrap(), REBOOTING);
    }

    #[test]
    fn rejects_unknown_power_state() {
        let mut power = HostPower::new("hp");
        let mut partial = State::new();
        partial.insert("power".into(), serde_json::json!("sleeping"));
        assert!(power.set_state(&partial).is_err());
    }
}
