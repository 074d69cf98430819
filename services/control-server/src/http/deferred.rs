use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{Local, TimeZone};
use control_protocol::{
    ControllerStateEntry, DeferredEntry, SetStateDeferredRequest, SetStateDeferredSingleRequest, State as ControllerState,
    TIME_FORMAT,
};

use crate::error::ApiError;
use crate::schedule_spec::expand_schedule;
use crate::state::AppState;

/// Schedules one independent `mute_set_state` task per `(controller, partial)`
/// pair, all sharing the same normalized `due`/`repeat`. Flattening this way
/// — rather than one combined task touching every controller — means both
/// the per-controller and whole-fleet wire forms reduce to the same uniform
/// shape, with no special aggregate case to get wrong.
async fn schedule_all(
    state: &AppState,
    entries: Vec<(String, ControllerState)>,
    at: Option<control_protocol::AtSpec>,
    repeat: Option<Vec<control_protocol::RepeatSpec>>,
) -> Result<(), ApiError> {
    let (due, forever) = expand_schedule(at, repeat)?;

    for (name, partial) in entries {
        let dispatcher = state.dispatcher(&name)?;
        let metadata = serde_json::json!({ "controller": name, "state": partial });
        let action: control_core::Action = std::sync::Arc::new(move || {
            let dispatcher = dispatcher.clone();
            let partial = partial.clone();
            Box::pin(async move { dispatcher.mute_set_state(partial).await.map_err(|err| err.to_string()) })
        });
        state
            .scheduler
            .schedule(format!("deferred:{name}"), due.clone(), forever, metadata, action)
            .await
            .map_err(ApiError::from)?;
    }
    Ok(())
}

/// `POST /set_state_deferred` — whole-fleet deferred schedule.
pub async fn set_fleet_deferred(
    State(state): State<AppState>,
    Json(body): Json<SetStateDeferredRequest>,
) -> Result<StatusCode, ApiError> {
    let entries = body
        .controllers
        .into_iter()
        .map(|ControllerStateEntry { name, state }| (name, state))
        .collect();
    schedule_all(&state, entries, body.at, body.repeat).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /set_state_deferred/<cname>` — single-controller deferred schedule.
pub async fn set_one_deferred(
    State(state): State<AppState>,
    Path(cname): Path<String>,
    Json(body): Json<SetStateDeferredSingleRequest>,
) -> Result<StatusCode, ApiError> {
    schedule_all(&state, vec![(cname, body.state)], body.at, body.repeat).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn to_entries(tasks: Vec<control_core::TaskDescription>) -> Vec<DeferredEntry> {
    tasks
        .into_iter()
        .filter_map(|task| {
            let controller = task.metadata.get("controller")?.as_str()?.to_owned();
            let partial = task.metadata.get("state")?.as_object()?.clone();
            let at = task
                .due
                .iter()
                .map(|instant| Local.from_utc_datetime(&instant.naive_utc()).format(TIME_FORMAT).to_string())
                .collect();
            Some(DeferredEntry {
                controller,
                state: partial,
                at,
            })
        })
        .collect()
}

/// `GET /list_deferred` — every pending deferred task, across controllers.
pub async fn list_fleet_deferred(State(state): State<AppState>) -> Json<Vec<DeferredEntry>> {
    Json(to_entries(state.scheduler.list().await))
}

/// `GET /list_deferred/<cname>` — pending deferred tasks for one controller.
pub async fn list_one_deferred(State(state): State<AppState>, Path(cname): Path<String>) -> Json<Vec<DeferredEntry>> {
    let entries = to_entries(state.scheduler.list().await)
        .into_iter()
        .filter(|entry| entry.controller == cname)
        .collect();
    Json(entries)
}

/// `GET /cancel_deferred` — drop every pending deferred task.
pub async fn cancel_deferred(State(state): State<AppState>) -> StatusCode {
    state.scheduler.cancel_all().await;
    StatusCode::NO_CONTENT
}
