use std::collections::HashMap;

use axum::extract::State;
use axum::Json;

use crate::state::AppState;

/// `GET /controllers` — `{name: baseclass, …}` for every enabled controller.
pub async fn list_controllers(State(state): State<AppState>) -> Json<HashMap<String, String>> {
    let map = state
        .controllers
        .iter()
        .map(|(name, managed)| (name.clone(), managed.baseclass.clone()))
        .collect();
    Json(map)
}
