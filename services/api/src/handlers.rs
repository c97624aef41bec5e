use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use panelist_core::error::EngineError;
use panelist_core::session::{SessionEngine, StartedSession, TurnRequest};
use panelist_core::types::{EvaluationReport, SessionSnapshot, TurnOutcome};
use panelist_core::vision::FrameAnalysis;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub type Engine = Arc<SessionEngine>;

/// Wraps engine errors so each maps onto one HTTP status.
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
            EngineError::InvalidSessionState(_) => StatusCode::CONFLICT,
            // Not ready is indistinguishable from absent for the client;
            // it retries on its polling schedule either way.
            EngineError::ReportNotReady => StatusCode::NOT_FOUND,
            EngineError::ReportFailed(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub candidate_id: Uuid,
    pub job_id: Uuid,
    /// Overrides the candidate's stored resume when present.
    pub resume_text: Option<String>,
}

pub async fn start_interview(
    State(engine): State<Engine>,
    Json(req): Json<StartRequest>,
) -> Result<Json<StartedSession>, ApiError> {
    let started = engine
        .start_session(req.candidate_id, req.job_id, req.resume_text)
        .await?;
    Ok(Json(started))
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: Uuid,
    pub answer: Option<String>,
    /// Cumulative per-emotion counts from the client's capture loop.
    pub emotion_counts: Option<HashMap<String, u64>>,
    pub answer_time: Option<u32>,
    pub total_time: Option<u32>,
    pub turn_token: Option<String>,
}

pub async fn chat(
    State(engine): State<Engine>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<TurnOutcome>, ApiError> {
    let outcome = engine
        .advance_turn(
            req.session_id,
            TurnRequest {
                answer: req.answer,
                vision_counts: req.emotion_counts,
                answer_time: req.answer_time,
                total_time: req.total_time,
                turn_token: req.turn_token,
            },
        )
        .await?;
    Ok(Json(outcome))
}

pub async fn get_session(
    State(engine): State<Engine>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    Ok(Json(engine.session_snapshot(id).await?))
}

pub async fn end_session(
    State(engine): State<Engine>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    engine.end_session(id).await?;
    Ok(Json(serde_json::json!({ "ok": true, "session_id": id })))
}

#[derive(Debug, Deserialize)]
pub struct VisionRequest {
    pub session_id: Uuid,
    pub image_b64: String,
    /// The client may piggyback its current tally on a frame submission.
    pub emotion_counts: Option<HashMap<String, u64>>,
}

pub async fn analyze_vision(
    State(engine): State<Engine>,
    Json(req): Json<VisionRequest>,
) -> Result<Json<FrameAnalysis>, ApiError> {
    if let Some(counts) = req.emotion_counts {
        engine.ingest_emotions(req.session_id, counts)?;
    }
    let analysis = engine.classify_frame(req.session_id, &req.image_b64).await?;
    Ok(Json(analysis))
}

pub async fn get_report(
    State(engine): State<Engine>,
    Path(id): Path<Uuid>,
) -> Result<Json<EvaluationReport>, ApiError> {
    Ok(Json(engine.get_report(id).await?))
}
