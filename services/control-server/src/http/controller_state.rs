use axum::extract::{Path, State};
use axum::Json;
use control_protocol::{ControllerStateEntry, ControllersEnvelope, State as ControllerState};
use futures::future::try_join_all;

use crate::error::ApiError;
use crate::state::AppState;

/// `GET /get_state` — every enabled controller's current state.
pub async fn get_fleet_state(State(state): State<AppState>) -> Result<Json<ControllersEnvelope>, ApiError> {
    let futures = state.controllers.iter().map(|(name, managed)| {
        let name = name.clone();
        let dispatcher = managed.dispatcher.clone();
        async move {
            let controller_state = dispatcher.get_state().await?;
            Ok::<_, ApiError>(ControllerStateEntry {
                name,
                state: controller_state,
            })
        }
    });
    let controllers = try_join_all(futures).await?;
    Ok(Json(ControllersEnvelope { controllers }))
}

/// `GET /get_state/<cname>` — one controller's current state, or 404.
pub async fn get_one_state(
    State(state): State<AppState>,
    Path(cname): Path<String>,
) -> Result<Json<ControllerState>, ApiError> {
    let dispatcher = state.dispatcher(&cname)?;
    let controller_state = dispatcher.get_state().await?;
    Ok(Json(controller_state))
}

/// `POST /set_state` — apply a partial state to each named controller.
pub async fn set_fleet_state(
    State(state): State<AppState>,
    Json(body): Json<ControllersEnvelope>,
) -> Result<Json<ControllersEnvelope>, ApiError> {
    let futures = body.controllers.into_iter().map(|entry| {
        let state = state.clone();
        async move {
            let dispatcher = state.dispatcher(&entry.name)?;
            let new_state = dispatcher.set_state(entry.state).await?;
            Ok::<_, ApiError>(ControllerStateEntry {
                name: entry.name,
                state: new_state,
            })
        }
    });
    let controllers = try_join_all(futures).await?;
    Ok(Json(ControllersEnvelope { controllers }))
}

/// `POST /set_state/<cname>` — apply a partial state to one controller.
pub async fn set_one_state(
    State(state): State<AppState>,
    Path(cname): Path<String>,
    Json(partial): Json<ControllerState>,
) -> Result<Json<ControllerState>, ApiError> {
    let dispatcher = state.dispatcher(&cname)?;
    let new_state = dispatcher.set_state(partial).await?;
    Ok(Json(new_state))
}
