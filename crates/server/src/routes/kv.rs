//! CRUD handlers over the store.
//!
//! Multi-key requests put comma-separated keys in the path: `GET /a,b` reads
//! both, `DELETE /a,b` deletes both and reports each outcome.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use store::Entry;

use crate::errors::ApiError;
use crate::routes::AppState;

fn split_keys(raw: &str) -> Vec<String> {
    raw.split(',').map(|k| k.trim().to_string()).collect()
}

fn non_empty_keys(raw: &str) -> Result<Vec<String>, ApiError> {
    let keys: Vec<String> = split_keys(raw).into_iter().filter(|k| !k.is_empty()).collect();
    if keys.is_empty() {
        return Err(ApiError::bad_request("all keys are empty"));
    }
    Ok(keys)
}

fn parse_entry(payload: Result<Json<Entry>, JsonRejection>) -> Result<Entry, ApiError> {
    let Json(entry) = payload?;
    if entry.key.trim().is_empty() {
        return Err(ApiError::bad_request("key must not be empty"));
    }
    Ok(entry)
}

pub async fn list_all(State(state): State<AppState>) -> Json<Vec<Entry>> {
    let entries = state.store.read_all().await;
    Json(entries.into_iter().map(|(key, value)| Entry { key, value }).collect())
}

pub async fn read_keys(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Response, ApiError> {
    let keys = non_empty_keys(&raw)?;
    if let [key] = keys.as_slice() {
        let value = state.store.read(key).await?;
        return Ok(Json(Entry::new(key.clone(), value)).into_response());
    }

    let found = state.store.read_many(&keys).await;
    // keep request order; missing keys come back as null
    let entries: Vec<Entry> = keys
        .iter()
        .map(|k| Entry::new(k.clone(), found.get(k).cloned().flatten().unwrap_or(Value::Null)))
        .collect();
    Ok(Json(entries).into_response())
}

pub async fn create(
    State(state): State<AppState>,
    payload: Result<Json<Entry>, JsonRejection>,
) -> Result<(StatusCode, Json<Entry>), ApiError> {
    let entry = parse_entry(payload)?;
    let created = state.store.create(entry.key, entry.value).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update(
    State(state): State<AppState>,
    payload: Result<Json<Entry>, JsonRejection>,
) -> Result<Json<Entry>, ApiError> {
    let entry = parse_entry(payload)?;
    let updated = state.store.update(entry.key, entry.value).await?;
    Ok(Json(updated))
}

pub async fn delete_keys(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Response, ApiError> {
    let keys = non_empty_keys(&raw)?;
    if let [key] = keys.as_slice() {
        state.store.delete(key).await?;
        return Ok(Json(json!({"key": key, "value": {"deleted": true}})).into_response());
    }

    let outcomes = state.store.delete_many(&keys).await;
    let deleted = outcomes.values().filter(|o| o.is_deleted()).count();
    let status = match deleted {
        0 => StatusCode::NOT_FOUND,
        n if n == outcomes.len() => StatusCode::OK,
        _ => StatusCode::MULTI_STATUS,
    };
    let body: Vec<Value> = outcomes
        .iter()
        .map(|(key, outcome)| json!({"key": key, "value": outcome}))
        .collect();
    Ok((status, Json(body)).into_response())
}
