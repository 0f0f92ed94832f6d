//! HTTP surface: HTML pages, the MJPEG live view and the JSON API.

mod api;
mod pages;

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::rejection::{FormRejection, JsonRejection};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures::stream::{self, BoxStream, StreamExt};
use rollcall_store::{CourseDraftError, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tower_sessions::{Expiry, Session, SessionManagerLayer};

use crate::engine::{EngineError, EngineHandle, SharedState};

const ROLE_KEY: &str = "role";
const COURSE_KEY: &str = "course_code";
const SESSION_START_KEY: &str = "session_start";

/// Delay before asking the engine again when it had no frame.
const FRAME_RETRY: Duration = Duration::from_millis(100);

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub shared: SharedState,
    /// `None` when the models could not be loaded; camera routes then fail soft.
    pub engine: Option<EngineHandle>,
    pub admin_password: Arc<str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Professor,
}

pub fn router(state: AppState, session_hours: i64) -> Router {
    let sessions = SessionManagerLayer::new(tower_sessions::MemoryStore::default())
        .with_secure(false)
        .with_expiry(Expiry::OnInactivity(time::Duration::hours(session_hours)));

    Router::new()
        .route("/", get(pages::gateway))
        .route("/static/style.css", get(pages::stylesheet))
        .route("/admin/login", post(pages::admin_login))
        .route("/admin", get(pages::admin))
        .route("/admin/register", get(pages::register))
        .route("/course/login", post(pages::course_login))
        .route("/course", get(pages::course))
        .route("/attendance", get(pages::attendance))
        .route("/video_feed", get(video_feed))
        .route("/logout", get(pages::logout))
        .route("/api/admin/courses", get(api::list_courses).post(api::create_course))
        .route(
            "/api/admin/courses/{code}",
            delete(api::delete_course).put(api::update_course),
        )
        .route("/api/admin/students", get(api::list_students))
        .route("/api/admin/students/{student_id}", delete(api::delete_student))
        .route("/api/capture_face", post(api::capture_face))
        .route("/api/course", get(api::course_info))
        .route("/api/course/export", get(api::export_course))
        .route("/api/recognized_students", get(api::recognized_students))
        .route("/api/mark_attendance", post(api::mark_attendance))
        .route("/api/session_stats", get(api::session_stats))
        .layer(sessions)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error returned by JSON handlers, rendered as `{success: false, message}`.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("Camera not initialized")]
    CameraUnavailable,
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("session: {0}")]
    Session(#[from] tower_sessions::session::Error),
}

impl From<CourseDraftError> for ApiError {
    fn from(e: CourseDraftError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self::BadRequest(e.body_text())
    }
}

impl From<FormRejection> for ApiError {
    fn from(e: FormRejection) -> Self {
        Self::BadRequest(e.body_text())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Engine(EngineError::NoFaceDetected) => StatusCode::BAD_REQUEST,
            Self::Store(StoreError::Conflict { .. }) => StatusCode::CONFLICT,
            Self::CameraUnavailable | Self::Engine(_) | Self::Store(_) | Self::Session(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Engine(EngineError::NoFaceDetected) => {
                "No face detected. Please position your face in the frame.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }
        let body = Json(serde_json::json!({
            "success": false,
            "message": self.message(),
        }));
        (status, body).into_response()
    }
}

pub(crate) async fn current_role(session: &Session) -> Result<Option<Role>, ApiError> {
    Ok(session.get::<Role>(ROLE_KEY).await?)
}

pub(crate) async fn require_admin(session: &Session) -> Result<(), ApiError> {
    match current_role(session).await? {
        Some(Role::Admin) => Ok(()),
        _ => Err(ApiError::Unauthorized("Administrator login required")),
    }
}

/// The logged-in professor's course code.
pub(crate) async fn require_professor(session: &Session) -> Result<String, ApiError> {
    if current_role(session).await? != Some(Role::Professor) {
        return Err(ApiError::Unauthorized("Course login required"));
    }
    session
        .get::<String>(COURSE_KEY)
        .await?
        .ok_or(ApiError::Unauthorized("Course login required"))
}

async fn video_feed(State(state): State<AppState>) -> Response {
    (
        [(header::CONTENT_TYPE, "multipart/x-mixed-replace; boundary=frame")],
        Body::from_stream(mjpeg_stream(state.engine)),
    )
        .into_response()
}

/// Endless JPEG parts pulled from the engine; one empty part if there is no engine.
fn mjpeg_stream(engine: Option<EngineHandle>) -> BoxStream<'static, Result<Bytes, Infallible>> {
    match engine {
        None => stream::once(async { Ok(mjpeg_part(&[])) }).boxed(),
        Some(engine) => stream::unfold(engine, |engine| async move {
            loop {
                if let Some(jpeg) = engine.frame().await {
                    return Some((Ok(mjpeg_part(&jpeg)), engine));
                }
                tokio::time::sleep(FRAME_RETRY).await;
            }
        })
        .boxed(),
    }
}

fn mjpeg_part(jpeg: &[u8]) -> Bytes {
    let mut part = Vec::with_capacity(jpeg.len() + 48);
    part.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}
