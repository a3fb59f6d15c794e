//! Axum route handlers mapping HTTP requests onto
//! [`SessionOrchestrator`] operations.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;

use crate::orchestrator::{CreateSessionInput, SessionOrchestrator};
use crate::types::{FeedbackSubmission, OrchestratorError, SessionCode, UserId};

use super::types::{
    ActingUserRequest, ConfigureRequest, CreateSessionRequest, ErrorResponse, FeedbackResponse,
    JoinRequest, SessionResponse, SubmitFeedbackRequest,
};

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

fn error_response(e: OrchestratorError) -> (StatusCode, Json<ErrorResponse>) {
    let (status, code) = match &e {
        OrchestratorError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        OrchestratorError::ParticipantNotFound { .. } => {
            (StatusCode::NOT_FOUND, "PARTICIPANT_NOT_FOUND")
        }
        OrchestratorError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
        OrchestratorError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
        OrchestratorError::InvalidState(_) => (StatusCode::CONFLICT, "INVALID_STATE"),
        OrchestratorError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION"),
        OrchestratorError::Transient(_) => (StatusCode::SERVICE_UNAVAILABLE, "TRANSIENT"),
        OrchestratorError::Fatal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "FATAL"),
    };
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
            code: code.to_string(),
        }),
    )
}

pub async fn create_session(
    State(orchestrator): State<Arc<SessionOrchestrator>>,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<SessionResponse> {
    let session = orchestrator
        .create(CreateSessionInput {
            title: req.title,
            creator: UserId(req.creator_user_id),
            creator_name: req.creator_user_name,
            config: req.config,
        })
        .await
        .map_err(error_response)?;
    Ok(Json(SessionResponse::from(&session)))
}

pub async fn join_session(
    State(orchestrator): State<Arc<SessionOrchestrator>>,
    Path(code): Path<String>,
    Json(req): Json<JoinRequest>,
) -> ApiResult<SessionResponse> {
    let code = SessionCode::from_raw(code);
    let session = orchestrator
        .join(&code, req.role, UserId(req.user_id), req.user_name)
        .await
        .map_err(error_response)?;
    Ok(Json(SessionResponse::from(&session)))
}

pub async fn configure_session(
    State(orchestrator): State<Arc<SessionOrchestrator>>,
    Path(code): Path<String>,
    Json(req): Json<ConfigureRequest>,
) -> ApiResult<SessionResponse> {
    let code = SessionCode::from_raw(code);
    let session = orchestrator
        .configure(&code, &UserId(req.user_id), req.config)
        .await
        .map_err(error_response)?;
    Ok(Json(SessionResponse::from(&session)))
}

pub async fn start_session(
    State(orchestrator): State<Arc<SessionOrchestrator>>,
    Path(code): Path<String>,
    Json(req): Json<ActingUserRequest>,
) -> ApiResult<SessionResponse> {
    let code = SessionCode::from_raw(code);
    let session = orchestrator
        .start(&code, &UserId(req.user_id))
        .await
        .map_err(error_response)?;
    Ok(Json(SessionResponse::from(&session)))
}

pub async fn skip_phase(
    State(orchestrator): State<Arc<SessionOrchestrator>>,
    Path(code): Path<String>,
    Json(req): Json<ActingUserRequest>,
) -> ApiResult<SessionResponse> {
    let code = SessionCode::from_raw(code);
    let session = orchestrator
        .skip_phase(&code, &UserId(req.user_id), req.acting_as_admin)
        .await
        .map_err(error_response)?;
    Ok(Json(SessionResponse::from(&session)))
}

pub async fn leave_session(
    State(orchestrator): State<Arc<SessionOrchestrator>>,
    Path(code): Path<String>,
    Json(req): Json<ActingUserRequest>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    let code = SessionCode::from_raw(code);
    orchestrator
        .leave(&code, &UserId(req.user_id))
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn new_case(
    State(orchestrator): State<Arc<SessionOrchestrator>>,
    Path(code): Path<String>,
    Json(req): Json<ActingUserRequest>,
) -> ApiResult<SessionResponse> {
    let code = SessionCode::from_raw(code);
    let session = orchestrator
        .new_case(&code, &UserId(req.user_id))
        .await
        .map_err(error_response)?;
    Ok(Json(SessionResponse::from(&session)))
}

pub async fn change_role(
    State(orchestrator): State<Arc<SessionOrchestrator>>,
    Path(code): Path<String>,
    Json(req): Json<ActingUserRequest>,
) -> ApiResult<SessionResponse> {
    let code = SessionCode::from_raw(code);
    let session = orchestrator
        .change_role(&code, &UserId(req.user_id))
        .await
        .map_err(error_response)?;
    Ok(Json(SessionResponse::from(&session)))
}

pub async fn submit_feedback(
    State(orchestrator): State<Arc<SessionOrchestrator>>,
    Json(req): Json<SubmitFeedbackRequest>,
) -> ApiResult<FeedbackResponse> {
    let code = SessionCode::from_raw(req.code);
    let feedback = orchestrator
        .submit_feedback(
            &code,
            &UserId(req.user_id),
            FeedbackSubmission {
                comment: req.comment,
                criteria_scores: req.criteria_scores,
            },
        )
        .await
        .map_err(error_response)?;
    Ok(Json(FeedbackResponse {
        id: feedback.id.0.to_string(),
        overall_performance: feedback.overall_performance(),
    }))
}
