use crate::model::{CommandMessage, DeviceSummary, ImageRecord};
use crate::mqtt::CommandPublisher;
use crate::store::{ImageStore, PresenceStore};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub images: Arc<dyn ImageStore>,
    pub presence: Arc<dyn PresenceStore>,
    pub commands: CommandPublisher,
}

#[derive(Debug, Deserialize)]
pub struct ImageQuery {
    device_id: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/devices", get(list_devices))
        .route("/api/v1/devices/:device_id", get(get_device))
        .route("/api/v1/devices/:device_id/commands", post(post_command))
        .route("/api/v1/images", get(list_images))
        .with_state(state)
}

/// Device list with each device's most recent image, resolved by a read-time
/// join rather than a stored pointer.
pub async fn device_summaries(
    presence: &dyn PresenceStore,
    images: &dyn ImageStore,
) -> crate::errors::Result<Vec<DeviceSummary>> {
    let mut summaries = Vec::new();
    for device in presence.list().await? {
        let last_image = images.latest_for_device(&device.device_id).await?;
        summaries.push(DeviceSummary {
            device_id: device.device_id,
            status: device.status,
            last_seen: device.last_seen,
            active_params: device.active_params,
            last_image,
        });
    }
    Ok(summaries)
}

async fn list_devices(State(state): State<AppState>) -> Result<Json<Vec<DeviceSummary>>, AppError> {
    let summaries = device_summaries(state.presence.as_ref(), state.images.as_ref()).await?;
    Ok(Json(summaries))
}

async fn get_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Response, AppError> {
    match state.presence.get(&device_id).await? {
        Some(device) => {
            let last_image = state.images.latest_for_device(&device.device_id).await?;
            let summary = DeviceSummary {
                device_id: device.device_id,
                status: device.status,
                last_seen: device.last_seen,
                active_params: device.active_params,
                last_image,
            };
            Ok(Json(summary).into_response())
        }
        None => Ok((StatusCode::NOT_FOUND, "unknown device").into_response()),
    }
}

async fn list_images(
    State(state): State<AppState>,
    Query(params): Query<ImageQuery>,
) -> Result<Json<Vec<ImageRecord>>, AppError> {
    let limit = params.limit.unwrap_or(100).min(1000);
    let offset = params.offset.unwrap_or(0);

    let records = state
        .images
        .list_recent(params.device_id.as_deref(), limit, offset)
        .await?;

    Ok(Json(records))
}

async fn post_command(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(command): Json<CommandMessage>,
) -> Result<StatusCode, AppError> {
    state.commands.publish(&device_id, &command).await?;
    Ok(StatusCode::ACCEPTED)
}

struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("API error: {}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Internal server error: {}", self.0),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
