//! API Models
//!
//! Request and response bodies for the REST API, annotated for OpenAPI
//! generation with `utoipa`.

use crate::runs::{RunEntry, RunState};
use chrono::{DateTime, Utc};
use rabbit_hole_core::{RabbitHoleResult, progress::ProgressSnapshot};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Deserialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateRunPayload {
    #[schema(example = "Space Travel")]
    pub start_topic: String,
    #[schema(example = 4)]
    pub max_hops: Option<usize>,
    #[schema(example = "chaos-goblin")]
    pub personality: Option<String>,
}

/// Returned when a run is accepted: where to watch it and the credential
/// scoped to its narration stream.
#[derive(Serialize, Deserialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RunCreated {
    #[schema(value_type = String, format = Uuid)]
    pub run_id: Uuid,
    #[schema(example = "/runs/6f1c.../narrative")]
    pub narration_stream: String,
    pub access_token: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct RunError {
    #[schema(example = "malformed_response")]
    pub kind: String,
    pub message: String,
}

#[derive(Serialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RunView {
    #[schema(value_type = String, format = Uuid)]
    pub run_id: Uuid,
    #[schema(value_type = String, example = "running")]
    pub state: RunStatus,
    pub created_at: DateTime<Utc>,
    #[schema(value_type = Object)]
    pub progress: ProgressSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub output: Option<RabbitHoleResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
}

impl RunView {
    pub async fn from_entry(entry: &RunEntry) -> Self {
        let (state, output, error) = match entry.state().await {
            RunState::Running => (RunStatus::Running, None, None),
            RunState::Completed(result) => (RunStatus::Completed, Some(result), None),
            RunState::Failed { kind, message } => {
                (RunStatus::Failed, None, Some(RunError { kind, message }))
            }
        };
        Self {
            run_id: entry.id,
            state,
            created_at: entry.created_at,
            progress: entry.progress(),
            output,
            error,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, PartialEq)]
pub struct PersonalityInfo {
    #[schema(example = "curious-generalist")]
    pub key: String,
    #[schema(example = "Curious Generalist")]
    pub label: String,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}
