use std::sync::Arc;

use axum::{
  extract::{rejection::JsonRejection, State},
  response::{IntoResponse, Response},
  routing::{get, post},
  Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::metadata::MediaDescriptor;
use crate::pipeline::Pipeline;
use crate::{Error, Result};

#[derive(Clone)]
pub struct AppState {
  pipeline: Arc<Pipeline>,
}

impl AppState {
  pub fn new(pipeline: Pipeline) -> Self {
    Self {
      pipeline: Arc::new(pipeline),
    }
  }
}

pub fn router(state: AppState) -> Router {
  Router::new()
    .route("/health", get(health))
    .route("/api/download/info", post(info))
    .route("/api/download", post(download))
    .with_state(state)
}

// fields are optional so that missing ones are reported by our own
// validation instead of a generic deserialization error
#[derive(Deserialize)]
struct InfoRequest {
  #[serde(default)]
  url: Option<String>,
}

#[derive(Deserialize)]
struct DownloadRequest {
  #[serde(default)]
  url: Option<String>,
  // format id
  #[serde(default)]
  quality: Option<String>,
  // container extension
  #[serde(default)]
  format: Option<String>,
}

fn parse<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T> {
  payload.map(|Json(body)| body).map_err(|rejection| {
    warn!("rejected request body: {}", rejection);
    Error::Validation("Invalid request body")
  })
}

async fn health() -> impl IntoResponse {
  Json(json!({ "ok": true }))
}

#[axum::debug_handler]
async fn info(
  State(state): State<AppState>,
  payload: Result<Json<InfoRequest>, JsonRejection>,
) -> Result<Json<MediaDescriptor>> {
  let request = parse(payload)?;
  let url = request.url.unwrap_or_default();

  let descriptor = state.pipeline.describe(&url).await?;
  Ok(Json(descriptor))
}

#[axum::debug_handler]
async fn download(
  State(state): State<AppState>,
  payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> Result<Response> {
  let request = parse(payload)?;

  state
    .pipeline
    .fetch(
      request.url.as_deref().unwrap_or_default(),
      request.quality.as_deref().unwrap_or_default(),
      request.format.as_deref().unwrap_or_default(),
    )
    .await
}
