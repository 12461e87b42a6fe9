//! Axum Handlers for the REST API
//!
//! This module contains the logic for starting runs, polling their status and
//! streaming their narration. It uses `utoipa` doc comments to generate
//! OpenAPI documentation.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{
        IntoResponse, Json, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::{Stream, StreamExt};
use rabbit_hole_core::{Personality, RabbitHoleInput, journey::DEFAULT_MAX_HOPS};
use std::{convert::Infallible, sync::Arc};
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    models::{CreateRunPayload, ErrorResponse, PersonalityInfo, RunCreated, RunView},
    runs::LiveEvent,
    state::AppState,
};

pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Unauthorized(message) => {
                (StatusCode::UNAUTHORIZED, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl From<rabbit_hole_core::Error> for ApiError {
    fn from(err: rabbit_hole_core::Error) -> Self {
        match err {
            rabbit_hole_core::Error::InvalidInput(message) => Self::BadRequest(message),
            other => Self::InternalServerError(other.into()),
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

fn not_found(id: Uuid) -> ApiError {
    ApiError::NotFound(format!("Run with id '{}' not found", id))
}

/// Start a new rabbit hole run.
#[utoipa::path(
    post,
    path = "/runs",
    request_body = CreateRunPayload,
    responses(
        (status = 202, description = "Run accepted and started", body = RunCreated),
        (status = 400, description = "Bad request", body = ErrorResponse)
    )
)]
pub async fn create_run(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateRunPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let personality = payload
        .personality
        .as_deref()
        .map(str::parse::<Personality>)
        .transpose()?
        .unwrap_or_default();
    let max_hops = payload.max_hops.unwrap_or(DEFAULT_MAX_HOPS);
    if max_hops == 0 {
        return Err(ApiError::BadRequest(
            "maxHops must be greater than zero".to_string(),
        ));
    }

    let input = RabbitHoleInput::new(payload.start_topic, max_hops, personality);
    input.validate()?;

    let entry = state.runs.start(input).await;
    info!(run_id = %entry.id, %personality, max_hops, "Run accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(RunCreated {
            run_id: entry.id,
            narration_stream: entry.narration_stream(),
            access_token: entry.access_token().to_string(),
        }),
    ))
}

/// Get the status, live progress and (once finished) the output of a run.
#[utoipa::path(
    get,
    path = "/runs/{id}",
    responses(
        (status = 200, description = "Run status", body = RunView),
        (status = 404, description = "Run not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Run ID")
    )
)]
pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<RunView>, ApiError> {
    let entry = state.runs.get(id).await.ok_or_else(|| not_found(id))?;
    Ok(Json(RunView::from_entry(&entry).await))
}

fn to_sse(event: LiveEvent) -> Result<Event, Infallible> {
    Ok(match event {
        LiveEvent::Fragment(fragment) => Event::default().event("fragment").data(fragment),
        LiveEvent::End => Event::default().event("end").data(""),
        LiveEvent::Aborted(reason) => Event::default().event("error").data(reason),
    })
}

/// Stream a run's narration as server-sent events.
///
/// Fragments already produced are replayed first; the stream closes after an
/// `end` (or `error`) event.
#[utoipa::path(
    get,
    path = "/runs/{id}/narrative",
    responses(
        (status = 200, description = "Narration fragments", content_type = "text/event-stream", body = String),
        (status = 401, description = "Missing or wrong access token", body = ErrorResponse),
        (status = 404, description = "Run not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Run ID"),
        ("Authorization" = String, Header, description = "Bearer token returned when the run was created")
    )
)]
pub async fn stream_narrative(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let entry = state.runs.get(id).await.ok_or_else(|| not_found(id))?;
    let token = bearer_token(&headers)
        .ok_or_else(|| ApiError::Unauthorized("Bearer token is required".to_string()))?;
    if !entry.authorize(token) {
        return Err(ApiError::Unauthorized(
            "Token is not valid for this run".to_string(),
        ));
    }

    let events = entry.subscribe_narration().await.into_stream().map(to_sse);
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// List the personalities a run can use.
#[utoipa::path(
    get,
    path = "/personalities",
    responses(
        (status = 200, description = "Available personalities", body = [PersonalityInfo])
    )
)]
pub async fn list_personalities() -> Json<Vec<PersonalityInfo>> {
    Json(
        Personality::ALL
            .iter()
            .map(|p| PersonalityInfo {
                key: p.key().to_string(),
                label: p.label().to_string(),
            })
            .collect(),
    )
}
