//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API, the narration event stream, and OpenAPI
//! documentation.

use crate::{
    handlers,
    models::{
        CreateRunPayload, ErrorResponse, PersonalityInfo, RunCreated, RunError, RunStatus, RunView,
    },
    state::AppState,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::create_run,
        handlers::get_run,
        handlers::stream_narrative,
        handlers::list_personalities,
    ),
    components(
        schemas(CreateRunPayload, RunCreated, RunView, RunStatus, RunError, PersonalityInfo, ErrorResponse)
    ),
    tags(
        (name = "Rabbit Hole API", description = "Start curiosity walks, follow their progress and stream their narration")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/runs", post(handlers::create_run))
        .route("/runs/{id}", get(handlers::get_run))
        .route("/runs/{id}/narrative", get(handlers::stream_narrative))
        .route("/personalities", get(handlers::list_personalities))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
