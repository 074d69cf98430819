//! control-protocol: wire types for the controller control-plane HTTP surface.
//!
//! Mirrors the shape of the frozen JSON HTTP contract. Unlike a
//! device-to-device wire protocol, these types are only ever exchanged
//! between an HTTP client and this process, so there is no discriminated
//! `kind` tag — each endpoint has its own request/response shape.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// State tree
// ---------------------------------------------------------------------------

/// A recursive key/value tree: strings map to scalars, nested trees, or
/// lists of trees. `serde_json::Value` already has exactly this shape, so
/// the state tree is represented directly as a JSON object.
pub type State = serde_json::Map<String, serde_json::Value>;

/// Applies `partial` onto `base` with merge semantics: keys present in
/// `partial` replace their prior value wholesale; keys absent from
/// `partial` are left untouched. `SetState({})` is a no-op.
pub fn merge_state(base: &mut State, partial: &State) {
    for (key, value) in partial {
        base.insert(key.clone(), value.clone());
    }
}

// ---------------------------------------------------------------------------
// Controllers / get_state / set_state
// ---------------------------------------------------------------------------

/// One entry in the fleet-wide `controllers` array used by several endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerStateEntry {
    pub name: String,
    pub state: State,
}

/// Body of `POST /set_state` and response of `GET /get_state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllersEnvelope {
    pub controllers: Vec<ControllerStateEntry>,
}

// ---------------------------------------------------------------------------
// Deferred scheduling
// ---------------------------------------------------------------------------

/// `at` accepts either a single time spec or a list of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AtSpec {
    Single(String),
    Many(Vec<String>),
}

impl AtSpec {
    pub fn into_specs(self) -> Vec<String> {
        match self {
            AtSpec::Single(s) => vec![s],
            AtSpec::Many(v) => v,
        }
    }
}

/// One `repeat` clause. `times` absent means "forever"; present means a
/// finite number of additional executions after the previous tail.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RepeatSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub times: Option<i64>,
    pub interval: f64,
}

/// Body of `POST /set_state_deferred` (whole-fleet form).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetStateDeferredRequest {
    pub controllers: Vec<ControllerStateEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<AtSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<Vec<RepeatSpec>>,
}

/// Body of `POST /set_state_deferred/<cname>` (single-controller form).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetStateDeferredSingleRequest {
    pub state: State,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<AtSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<Vec<RepeatSpec>>,
}

/// One entry of `GET /list_deferred[/<cname>]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredEntry {
    pub controller: String,
    pub state: State,
    pub at: Vec<String>,
}

// ---------------------------------------------------------------------------
// Downstream / streaming
// ---------------------------------------------------------------------------

/// One `(name, query)` pair in the fleet-wide downstream request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownstreamQueryEntry {
    pub name: String,
    pub query: State,
}

/// Body of `POST /downstream`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownstreamRequest {
    pub controllers: Vec<DownstreamQueryEntry>,
}

/// One envelope emitted on the merged stream for the fleet-wide form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamEnvelope {
    pub name: String,
    pub data: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Frozen HTTP error envelope. Matches the literal `{"error": "..."}` shape
/// used throughout the HTTP surface for every error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpErrorEnvelope {
    pub error: String,
}

impl HttpErrorEnvelope {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Time format
// ---------------------------------------------------------------------------

/// `YYYY/MM/DD HH:MM:SS`, the only accepted `at` time spec.
pub const TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(pairs: &[(&str, serde_json::Value)]) -> State {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    #[test]
    fn merge_state_replaces_present_keys_and_leaves_others() {
        let mut base = obj(&[
            ("relay1", serde_json::json!("open")),
            ("relay2", serde_json::json!("open")),
        ]);
        let partial = obj(&[("relay1", serde_json::json!("closed"))]);

        merge_state(&mut base, &partial);

        assert_eq!(base.get("relay1").unwrap(), "closed");
        assert_eq!(base.get("relay2").unwrap(), "open");
    }

    #[test]
    fn merge_state_empty_partial_is_noop() {
        let mut base = obj(&[("relay1", serde_json::json!("open"))]);
        let before = base.clone();

        merge_state(&mut base, &State::new());

        assert_eq!(base, before);
    }

    #[test]
    fn at_spec_single_and_many_normalize_to_a_vec() {
        let single: AtSpec = serde_json::from_str(r#""2099/01/01 12:00:00""#).unwrap();
        assert_eq!(single.into_specs(), vec!["2099/01/01 12:00:00".to_owned()]);

        let many: AtSpec = serde_json::from_str(r#"["2099/01/01 12:00:00", "2099/01/01 12:00:05"]"#).unwrap();
        assert_eq!(
            many.into_specs(),
            vec![
                "2099/01/01 12:00:00".to_owned(),
                "2099/01/01 12:00:05".to_owned(),
            ]
        );
    }
}
