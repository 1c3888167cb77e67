//! REST API handlers

use axum::{
    body::{self, Body},
    extract::{rejection::FormRejection, ConnectInfo, Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use vivarium_core::{CoreError, FirmwareOffer, NodeId};

use crate::state::{AppState, ServiceError};

/// Header carrying the firmware version tag a monitor currently runs
pub const FIRMWARE_VERSION_HEADER: &str = "x-fwver";

/// Banner returned from the root path
pub const SERVER_BANNER: &str = "Vivarium stats server version 1.3";

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServiceError::Core(CoreError::Validation(_)) | ServiceError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::Core(CoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            ServiceError::Core(_) | ServiceError::Task(_) => {
                warn!(error = %self, "Request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(ApiError::new(self.to_string()))).into_response()
    }
}

fn not_found(what: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(ApiError::new(format!("{what} not found")))).into_response()
}

/// Server banner
pub async fn homepage() -> impl IntoResponse {
    SERVER_BANNER
}

/// Accept a telemetry push from a monitor
pub async fn collect(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<&'static str, ServiceError> {
    let source_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());

    let bytes = body::to_bytes(request.into_body(), state.config.daemon.max_body_bytes)
        .await
        .map_err(|e| ServiceError::BadRequest(format!("unreadable body: {e}")))?;
    let payload: Map<String, Value> = serde_json::from_slice(&bytes)
        .map_err(|e| ServiceError::BadRequest(format!("body is not a JSON object: {e}")))?;

    let entry_id = state
        .run(move |core| core.ingestion().ingest(&payload, source_ip.as_deref()))
        .await?;
    debug!(entry_id, "Collected stats");
    Ok("Success")
}

/// List all firmware names
pub async fn firmware_list(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<String>>, ServiceError> {
    let names = state.run(|core| core.firmware().list_names()).await?;
    Ok(Json(names))
}

/// Firmware metadata, or the image itself when the monitor sends its
/// current version tag
pub async fn firmware(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ServiceError> {
    let Some(tag) = headers.get(FIRMWARE_VERSION_HEADER) else {
        let lookup = name.clone();
        let metadata = state.run(move |core| core.firmware().metadata(&lookup)).await?;
        return Ok(match metadata {
            Some(metadata) => Json(metadata).into_response(),
            None => not_found(&format!("firmware '{name}'")),
        });
    };

    let tag = tag
        .to_str()
        .map_err(|_| ServiceError::BadRequest("version header is not ASCII".to_string()))?
        .to_string();
    let lookup = name.clone();
    let offer = state.run(move |core| core.firmware().negotiate(&lookup, &tag)).await?;

    Ok(match offer {
        FirmwareOffer::NotFound => not_found(&format!("firmware '{name}'")),
        FirmwareOffer::NotModified => StatusCode::NOT_MODIFIED.into_response(),
        FirmwareOffer::Download { file_name, blob } => {
            info!(firmware = %name, file = %file_name, "Sending updated firmware file");
            (
                [
                    (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{file_name}\""),
                    ),
                ],
                Body::from(blob),
            )
                .into_response()
        }
    })
}

/// List all known nodes
pub async fn node_list(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ServiceError> {
    let nodes = state.run(|core| core.nodes().list()).await?;
    Ok(Json(nodes))
}

/// Rename request, accepted as form body or query string
#[derive(Debug, Default, Deserialize)]
pub struct RenameRequest {
    name: Option<String>,
}

/// Assign a name to a node
pub async fn name_node(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<RenameRequest>,
    form: Result<Form<RenameRequest>, FormRejection>,
) -> Result<impl IntoResponse, ServiceError> {
    let name = form
        .ok()
        .and_then(|Form(form)| form.name)
        .or(query.name)
        .ok_or_else(|| ServiceError::BadRequest("'name' is required".to_string()))?;

    let node = state
        .run(move |core| core.nodes().rename(NodeId(id), &name))
        .await?;
    Ok(Json(node))
}
