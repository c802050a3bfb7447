//! REST back-channel for mutating the sensor registry.
//!
//! External actuators drive the fleet through two endpoints. Both are
//! snapshot → transform → replace compositions over the registry, so
//! subscribers polling concurrently only ever see fully-swapped lists.

use crate::config::Config;
use crate::error::Result;
use crate::registry::{SensorRecord, SensorRegistry, SensorState};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use log::info;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StateAction {
    On,
    Off,
}

#[derive(Debug, Deserialize)]
pub struct ChangeStateRequest {
    pub action: StateAction,
    pub sensor_type: String,
    pub sensor_name: String,
    pub temperature: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FleetAction {
    Add,
    Remove,
}

#[derive(Debug, Deserialize)]
pub struct AddSensorRequest {
    pub action: FleetAction,
    pub sensor_type: String,
    pub sensor_name: String,
    pub state: SensorState,
    pub temperature: f64,
}

/// Set the matching record's state. Temperature is applied only when
/// switching ON; an OFF keeps the last reading.
async fn change_state(
    State(registry): State<Arc<SensorRegistry>>,
    Json(req): Json<ChangeStateRequest>,
) -> (StatusCode, Json<Value>) {
    let mut records = registry.snapshot();
    let Some(record) = records
        .iter_mut()
        .find(|r| r.kind == req.sensor_type && r.name == req.sensor_name)
    else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"ok": false, "error": "sensor not found"})),
        );
    };

    match req.action {
        StateAction::On => {
            record.state = SensorState::On;
            record.temperature = req.temperature;
        }
        StateAction::Off => {
            record.state = SensorState::Off;
        }
    }
    info!(
        "[Backchannel] {}/{} set to {}",
        record.kind, record.name, record.state
    );

    registry.replace(records);
    (StatusCode::OK, Json(json!({"ok": true})))
}

/// Append a new record or remove one by (type, name).
async fn add_sensor(
    State(registry): State<Arc<SensorRegistry>>,
    Json(req): Json<AddSensorRequest>,
) -> (StatusCode, Json<Value>) {
    let mut records = registry.snapshot();
    match req.action {
        FleetAction::Add => {
            if records
                .iter()
                .any(|r| r.kind == req.sensor_type && r.name == req.sensor_name)
            {
                return (
                    StatusCode::CONFLICT,
                    Json(json!({"ok": false, "error": "sensor already exists"})),
                );
            }
            info!(
                "[Backchannel] adding {}/{} state={}",
                req.sensor_type, req.sensor_name, req.state
            );
            records.push(SensorRecord::new(
                req.sensor_type,
                req.sensor_name,
                req.state,
                req.temperature,
            ));
        }
        FleetAction::Remove => {
            let before = records.len();
            records.retain(|r| !(r.kind == req.sensor_type && r.name == req.sensor_name));
            if records.len() == before {
                return (
                    StatusCode::NOT_FOUND,
                    Json(json!({"ok": false, "error": "sensor not found"})),
                );
            }
            info!(
                "[Backchannel] removed {}/{}",
                req.sensor_type, req.sensor_name
            );
        }
    }

    registry.replace(records);
    (StatusCode::OK, Json(json!({"ok": true})))
}

pub fn router(registry: Arc<SensorRegistry>) -> Router {
    Router::new()
        .route("/change-state", post(change_state))
        .route("/add-sensor", post(add_sensor))
        .with_state(registry)
}

/// Serve the back-channel until `shutdown` is cancelled.
pub async fn run_backchannel(
    config: Arc<Config>,
    registry: Arc<SensorRegistry>,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.http_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("[Backchannel] REST back-channel listening on http://{addr}");

    axum::serve(listener, router(registry))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}
