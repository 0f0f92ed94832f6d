//! JSON API used by the pages.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use rollcall_store::{export, Course, CourseDraft, StudentListing};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_sessions::Session;

use super::{require_admin, require_professor, ApiError, AppState};
use crate::lock;
use crate::session::SessionStats;

type ApiResult = Result<Json<Value>, ApiError>;

pub(super) async fn list_courses(State(state): State<AppState>, session: Session) -> ApiResult {
    require_admin(&session).await?;
    let courses = state.shared.store.list_courses().await?;
    Ok(Json(json!({ "success": true, "courses": courses })))
}

pub(super) async fn create_course(
    State(state): State<AppState>,
    session: Session,
    body: Result<Json<CourseDraft>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    require_admin(&session).await?;
    let Json(draft) = body?;
    let course = draft.into_course()?;
    state.shared.store.insert_course(course.clone()).await?;
    tracing::info!(course = %course.code, "course created");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "course": course })),
    ))
}

pub(super) async fn update_course(
    State(state): State<AppState>,
    session: Session,
    Path(code): Path<String>,
    body: Result<Json<CourseDraft>, JsonRejection>,
) -> ApiResult {
    require_admin(&session).await?;
    let Json(draft) = body?;
    let store = &state.shared.store;
    let current = store
        .get_course(&code)
        .await?
        .ok_or(ApiError::NotFound("course"))?;
    let course = draft.into_replacement(&current)?;
    if !store.replace_course(course.clone()).await? {
        return Err(ApiError::NotFound("course"));
    }
    tracing::info!(course = %course.code, "course updated");
    Ok(Json(json!({ "success": true, "course": course })))
}

pub(super) async fn delete_course(
    State(state): State<AppState>,
    session: Session,
    Path(code): Path<String>,
) -> ApiResult {
    require_admin(&session).await?;
    if !state.shared.store.delete_course(&code).await? {
        return Err(ApiError::NotFound("course"));
    }
    tracing::info!(course = %code, "course deleted");
    Ok(Json(json!({ "success": true })))
}

pub(super) async fn list_students(State(state): State<AppState>, session: Session) -> ApiResult {
    require_admin(&session).await?;
    let students: Vec<StudentListing> = state
        .shared
        .store
        .list_students()
        .await?
        .iter()
        .map(StudentListing::from)
        .collect();
    Ok(Json(json!({ "success": true, "students": students })))
}

pub(super) async fn delete_student(
    State(state): State<AppState>,
    session: Session,
    Path(student_id): Path<String>,
) -> ApiResult {
    require_admin(&session).await?;
    if !state.shared.store.delete_student(&student_id).await? {
        return Err(ApiError::NotFound("student"));
    }
    lock(&state.shared.cache).invalidate();
    tracing::info!(student_id = %student_id, "student deleted");
    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize)]
pub(super) struct CaptureRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    student_id: String,
}

pub(super) async fn capture_face(
    State(state): State<AppState>,
    session: Session,
    body: Result<Json<CaptureRequest>, JsonRejection>,
) -> ApiResult {
    require_admin(&session).await?;
    let Json(req) = body?;
    let name = req.name.trim();
    let student_id = req.student_id.trim();
    if name.is_empty() || student_id.is_empty() {
        return Err(ApiError::BadRequest(
            "Name and student ID are required".to_string(),
        ));
    }

    let engine = state.engine.as_ref().ok_or(ApiError::CameraUnavailable)?;
    let embedding = engine.capture().await?;
    state
        .shared
        .store
        .put_student(student_id.to_string(), name.to_string(), embedding)
        .await?;
    lock(&state.shared.cache).invalidate();

    tracing::info!(student_id, "student registered");
    Ok(Json(json!({
        "success": true,
        "message": format!("Successfully registered {name}!"),
    })))
}

/// The logged-in professor's course; 404 if it was deleted meanwhile.
async fn professor_course(state: &AppState, session: &Session) -> Result<Course, ApiError> {
    let code = require_professor(session).await?;
    state
        .shared
        .store
        .get_course(&code)
        .await?
        .ok_or(ApiError::NotFound("course"))
}

pub(super) async fn course_info(State(state): State<AppState>, session: Session) -> ApiResult {
    let course = professor_course(&state, &session).await?;
    let records = state.shared.store.course_attendance(&course.code).await?;
    let stats = export::course_stats(&course, &records);
    Ok(Json(json!({ "success": true, "course": course, "stats": stats })))
}

#[derive(Deserialize)]
pub(super) struct ExportQuery {
    view: Option<String>,
}

pub(super) async fn export_course(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let course = professor_course(&state, &session).await?;
    let records = state.shared.store.course_attendance(&course.code).await?;

    let mut csv = Vec::new();
    let filename = match query.view.as_deref() {
        Some("summary") => {
            export::write_summary_csv(&mut csv, &course, &records)?;
            format!("{}_attendance_summary.csv", course.code)
        }
        None | Some("records") => {
            export::write_records_csv(&mut csv, &records)?;
            format!("{}_attendance.csv", course.code)
        }
        Some(other) => {
            return Err(ApiError::BadRequest(format!("unknown export view {other:?}")));
        }
    };

    tracing::info!(course = %course.code, rows = records.len(), %filename, "attendance exported");
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        csv,
    )
        .into_response())
}

pub(super) async fn recognized_students(State(state): State<AppState>, session: Session) -> ApiResult {
    require_professor(&session).await?;
    if state.engine.is_none() {
        return Ok(Json(json!({ "success": true, "students": [] })));
    }
    let students = lock(&state.shared.session).recognized_students();
    Ok(Json(json!({ "success": true, "students": students })))
}

pub(super) async fn mark_attendance(State(state): State<AppState>, session: Session) -> ApiResult {
    let course = professor_course(&state, &session).await?;
    if state.engine.is_none() {
        return Err(ApiError::CameraUnavailable);
    }
    let outcome =
        crate::session::mark_attendance(&state.shared.session, state.shared.store.as_ref(), &course)
            .await;
    Ok(Json(json!({
        "success": true,
        "marked_count": outcome.marked_count,
        "students": outcome.students,
    })))
}

pub(super) async fn session_stats(State(state): State<AppState>, session: Session) -> ApiResult {
    require_professor(&session).await?;
    let stats = match state.engine {
        Some(_) => lock(&state.shared.session).stats(),
        None => SessionStats {
            total_recognized: 0,
            total_marked: 0,
        },
    };
    Ok(Json(json!({
        "success": true,
        "total_recognized": stats.total_recognized,
        "total_marked": stats.total_marked,
    })))
}
