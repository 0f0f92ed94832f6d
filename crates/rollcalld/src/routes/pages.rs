//! HTML pages and the login/logout flows.

use axum::extract::rejection::FormRejection;
use axum::extract::State;
use axum::http::header;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::{Form, Json};
use chrono::Utc;
use rollcall_store::password;
use serde::Deserialize;
use serde_json::json;
use tower_sessions::Session;

use super::{current_role, ApiError, AppState, Role, COURSE_KEY, ROLE_KEY, SESSION_START_KEY};
use crate::engine::CameraMode;
use crate::lock;

const GATEWAY_HTML: &str = include_str!("../../assets/index.html");
const ADMIN_HTML: &str = include_str!("../../assets/admin.html");
const REGISTER_HTML: &str = include_str!("../../assets/register.html");
const COURSE_HTML: &str = include_str!("../../assets/course.html");
const ATTENDANCE_HTML: &str = include_str!("../../assets/attendance.html");
const STYLESHEET: &str = include_str!("../../assets/style.css");

pub(super) async fn gateway() -> Html<&'static str> {
    Html(GATEWAY_HTML)
}

pub(super) async fn stylesheet() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/css")], STYLESHEET)
}

#[derive(Deserialize)]
pub(super) struct AdminLogin {
    #[serde(default)]
    password: String,
}

pub(super) async fn admin_login(
    State(state): State<AppState>,
    session: Session,
    body: Result<Form<AdminLogin>, FormRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Form(form) = body?;
    if !password::constant_time_eq(form.password.as_bytes(), state.admin_password.as_bytes()) {
        tracing::warn!("rejected administrator login");
        return Err(ApiError::Unauthorized("Invalid password"));
    }

    session.cycle_id().await?;
    session.insert(ROLE_KEY, Role::Admin).await?;
    session.insert(SESSION_START_KEY, Utc::now()).await?;
    tracing::info!("administrator logged in");
    Ok(Json(json!({ "success": true, "redirect": "/admin" })))
}

#[derive(Deserialize)]
pub(super) struct CourseLogin {
    #[serde(default)]
    course_code: String,
    #[serde(default)]
    password: String,
}

pub(super) async fn course_login(
    State(state): State<AppState>,
    session: Session,
    body: Result<Form<CourseLogin>, FormRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Form(form) = body?;
    let code = form.course_code.trim();
    let password = form.password.trim();
    if code.is_empty() || password.is_empty() {
        return Err(ApiError::BadRequest(
            "Course code and password are required".to_string(),
        ));
    }

    let course = state.shared.store.get_course(code).await?;
    let Some(course) = course.filter(|c| c.check_password(password)) else {
        tracing::warn!(course = code, "rejected course login");
        return Err(ApiError::Unauthorized("Invalid course code or password"));
    };

    session.cycle_id().await?;
    session.insert(ROLE_KEY, Role::Professor).await?;
    session.insert(COURSE_KEY, &course.code).await?;
    session.insert(SESSION_START_KEY, Utc::now()).await?;
    tracing::info!(course = %course.code, "course logged in");
    Ok(Json(json!({ "success": true, "redirect": "/course" })))
}

/// Serve `html` if the session holds `role`, otherwise send the visitor to the gateway.
async fn page_for(session: &Session, role: Role, html: &'static str) -> Result<Html<&'static str>, Response> {
    match current_role(session).await {
        Ok(Some(r)) if r == role => Ok(Html(html)),
        Ok(_) => Err(Redirect::to("/").into_response()),
        Err(e) => Err(e.into_response()),
    }
}

pub(super) async fn admin(session: Session) -> Result<Html<&'static str>, Response> {
    page_for(&session, Role::Admin, ADMIN_HTML).await
}

pub(super) async fn register(
    State(state): State<AppState>,
    session: Session,
) -> Result<Html<&'static str>, Response> {
    let page = page_for(&session, Role::Admin, REGISTER_HTML).await?;
    restart_camera(&state, CameraMode::Registration).await;
    Ok(page)
}

pub(super) async fn course(session: Session) -> Result<Html<&'static str>, Response> {
    page_for(&session, Role::Professor, COURSE_HTML).await
}

pub(super) async fn attendance(
    State(state): State<AppState>,
    session: Session,
) -> Result<Html<&'static str>, Response> {
    let page = page_for(&session, Role::Professor, ATTENDANCE_HTML).await?;
    lock(&state.shared.session).reset();
    restart_camera(&state, CameraMode::Attendance).await;
    Ok(page)
}

/// Stop and start the camera in `mode`. Failures are logged; the page still loads
/// and the live view shows nothing.
async fn restart_camera(state: &AppState, mode: CameraMode) {
    let Some(engine) = &state.engine else {
        tracing::warn!("camera not initialized; live view unavailable");
        return;
    };
    if let Err(e) = engine.stop().await {
        tracing::warn!(error = %e, "camera stop failed");
    }
    if let Err(e) = engine.start(mode).await {
        tracing::error!(error = %e, ?mode, "camera start failed");
    }
}

pub(super) async fn logout(State(state): State<AppState>, session: Session) -> Response {
    if let Some(engine) = &state.engine {
        if let Err(e) = engine.stop().await {
            tracing::warn!(error = %e, "camera stop failed");
        }
    }
    lock(&state.shared.session).reset();
    if let Err(e) = session.flush().await {
        return ApiError::from(e).into_response();
    }
    Redirect::to("/").into_response()
}
