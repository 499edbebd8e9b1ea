//! Session and speech endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use cadence_core::{SessionState, SpeechRequest};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: Uuid,
    pub state: SessionState,
}

#[derive(Debug, Deserialize)]
pub struct SpeakRequest {
    #[serde(default)]
    pub text: String,
}

/// What a speak request did to the session
#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeakAction {
    Started,
    Stopped,
    Ignored,
}

#[derive(Debug, Serialize)]
pub struct SpeakResponse {
    pub action: SpeakAction,
    pub state: SessionState,
}

#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub state: SessionState,
}

#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub prompt: String,
}

#[derive(Debug, Serialize)]
pub struct RespondResponse {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub sessions: usize,
    pub credentials: usize,
    pub credentials_remaining: usize,
}

pub async fn create_session(
    State(state): State<AppState>,
) -> (StatusCode, Json<SessionResponse>) {
    let (id, session) = state.create_session().await;
    info!("Created session {}", id);
    (
        StatusCode::CREATED,
        Json(SessionResponse {
            id,
            state: session.state(),
        }),
    )
}

/// Toggle speech: start speaking `text`, or stop if already speaking.
pub async fn speak(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SpeakRequest>,
) -> Result<(StatusCode, Json<SpeakResponse>), ApiError> {
    let session = state
        .session(&id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("Session not found: {}", id)))?;

    // Stopping needs no text, so check it only when idle.
    if req.text.trim().is_empty() && session.state() == SessionState::Idle {
        return Err(ApiError::bad_request("text must not be empty"));
    }

    let action = match session.request_speech() {
        SpeechRequest::Begin(ticket) => {
            info!("Session {}: speaking {} chars", id, req.text.chars().count());
            let orchestrator = state.orchestrator.clone();
            let session = session.clone();
            tokio::spawn(async move {
                let outcome = orchestrator.feed(&req.text, &session, ticket).await;
                debug!("Session {}: utterance ended ({:?})", id, outcome);
            });
            SpeakAction::Started
        }
        SpeechRequest::Stopped => SpeakAction::Stopped,
        SpeechRequest::Ignored => SpeakAction::Ignored,
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(SpeakResponse {
            action,
            state: session.state(),
        }),
    ))
}

pub async fn stop(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<StateResponse>, ApiError> {
    let session = state
        .session(&id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("Session not found: {}", id)))?;

    session.stop();
    Ok(Json(StateResponse {
        state: session.state(),
    }))
}

/// Stream `loading` / `speaking` / `idle` transitions as server-sent events.
pub async fn events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let session = state
        .session(&id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("Session not found: {}", id)))?;

    let stream = WatchStream::new(session.subscribe())
        .map(|state| Ok(Event::default().event("state").data(state.to_string())));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let session = state
        .remove_session(&id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("Session not found: {}", id)))?;

    session.stop();
    info!("Deleted session {}", id);
    Ok(StatusCode::NO_CONTENT)
}

/// Produce a full text answer; degrades to the apology message.
pub async fn respond(
    State(state): State<AppState>,
    Json(req): Json<RespondRequest>,
) -> Result<Json<RespondResponse>, ApiError> {
    if req.prompt.trim().is_empty() {
        return Err(ApiError::bad_request("prompt must not be empty"));
    }

    let text = state.generator.generate(&req.prompt).await;
    Ok(Json(RespondResponse { text }))
}

/// Report pool capacity; unavailable once every credential is spent.
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let pool = state.orchestrator.client().pool();
    pool.current()?;

    Ok(Json(HealthResponse {
        status: "ok",
        sessions: state.sessions.read().await.len(),
        credentials: pool.len(),
        credentials_remaining: pool.len().saturating_sub(pool.position()),
    }))
}
