//! The HTTP interface consumed by the mobile client.
//!
//! Every route except registration requires the `x-user-id` header set by the authenticating
//! gateway in front of this service. Success bodies look like
//! `{"status": 200, "message": "...", "data": ...}`; failures carry a stable `kind` instead of
//! `data`.

use crate::catalog::Catalog;
use crate::config::Settings;
use crate::db::{self, DbPool};
use crate::error::{AttendanceError, ConflictKind};
use crate::manager::TotalsAdjustment;
use crate::models::{Occurrence, Status, User, parse_date, validate_course_code};
use crate::reconcile;
use crate::semester::Registration;
use crate::timetable::{GvizTimetable, TimetableSource};
use anyhow::Context;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRef, FromRequestParts, Query, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router, async_trait};
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Header carrying the identity resolved by the upstream gateway.
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub timetable: Arc<dyn TimetableSource>,
    pub catalog: Arc<Catalog>,
}

impl AppState {
    /// Opens the ledger, loads the catalog and points the timetable at the configured sheet.
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let pool = db::create_pool(&settings.database.url, settings.database.pool_size)
            .context("failed to open the attendance database")?;

        let catalog = Catalog::from_path(&settings.catalog.path).with_context(|| {
            format!("failed to read course catalog {}", settings.catalog.path)
        })?;
        if catalog.is_empty() {
            warn!(path = %settings.catalog.path, "course catalog is empty");
        }

        let timetable = GvizTimetable::new(
            &settings.timetable.base_url,
            &settings.timetable.sheet_id,
            settings.timetable.timeout(),
        )?;

        Ok(Self {
            pool,
            timetable: Arc::new(timetable),
            catalog: Arc::new(catalog),
        })
    }
}

impl FromRef<AppState> for DbPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/lectures", get(get_schedule))
        .route("/lectures/extra", post(add_extra_class))
        .route("/attendance/log", post(create_log))
        .route("/attendance/log/status", patch(update_status))
        .route("/attendance/adjust", patch(adjust_totals))
        .route("/attendance/report", get(get_report))
        .route("/user/register", post(register))
        .route("/user/me", get(get_me).delete(delete_me))
        .route("/user/semester", patch(change_semester))
        .route("/user/semester/reset", post(reset_semester))
        .route("/user/course/unenroll", post(unenroll));

    Router::new()
        .nest("/api", api)
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves the API on `settings.server.bind` until Ctrl-C.
pub async fn serve(settings: &Settings) -> anyhow::Result<()> {
    let state = AppState::from_settings(settings)?;
    let listener = TcpListener::bind(&settings.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", settings.server.bind))?;

    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutting down");
        })
        .await?;
    Ok(())
}

impl IntoResponse for AttendanceError {
    fn into_response(self) -> Response {
        let status = match &self {
            AttendanceError::Validation(_)
            | AttendanceError::TerminalStateViolation { .. }
            | AttendanceError::NoCoursesForSelection { .. } => StatusCode::BAD_REQUEST,
            AttendanceError::Conflict {
                kind: ConflictKind::Overlap,
                ..
            } => StatusCode::BAD_REQUEST,
            AttendanceError::Conflict { .. } => StatusCode::CONFLICT,
            AttendanceError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AttendanceError::Forbidden { .. } => StatusCode::FORBIDDEN,
            AttendanceError::NotFound { .. }
            | AttendanceError::CourseNotEnrolled { .. }
            | AttendanceError::LogNotFound { .. } => StatusCode::NOT_FOUND,
            AttendanceError::SourceUnavailable(_) => StatusCode::BAD_GATEWAY,
            AttendanceError::SourceData(_)
            | AttendanceError::CounterUnderflow { .. }
            | AttendanceError::Store(_)
            | AttendanceError::Pool(_)
            | AttendanceError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!(kind = self.kind(), error = %self, "request failed");
        }

        let body = json!({
            "status": status.as_u16(),
            "kind": self.kind(),
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for AttendanceError {
    fn from(rejection: JsonRejection) -> Self {
        AttendanceError::validation(format!("Validation failed: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for AttendanceError {
    fn from(rejection: QueryRejection) -> Self {
        AttendanceError::validation(format!("Invalid query: {}", rejection.body_text()))
    }
}

#[derive(Debug, Serialize)]
struct Envelope<T> {
    status: u16,
    message: &'static str,
    data: T,
}

fn respond<T: Serialize>(status: StatusCode, message: &'static str, data: T) -> Response {
    let body = Envelope {
        status: status.as_u16(),
        message,
        data,
    };
    (status, Json(body)).into_response()
}

type ApiResult = Result<Response, AttendanceError>;

/// The authenticated caller, loaded from the store for the forwarded user id.
pub struct Caller(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    DbPool: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AttendanceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| AttendanceError::Unauthenticated("Unauthenticated".into()))?
            .to_string();

        let pool = DbPool::from_ref(state);
        let user = db::with_manager(&pool, move |manager| Ok(manager.find_user(&user_id)?)).await?;

        user.map(Caller)
            .ok_or_else(|| AttendanceError::Unauthenticated("User Not Found".into()))
    }
}

fn parse_status(raw: &str) -> Result<Status, AttendanceError> {
    raw.parse()
        .map_err(|e: crate::models::ParseStatusError| AttendanceError::validation(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct ScheduleQuery {
    date: Option<String>,
}

async fn get_schedule(
    State(state): State<AppState>,
    Caller(user): Caller,
    query: Result<Query<ScheduleQuery>, QueryRejection>,
) -> ApiResult {
    let Query(query) = query?;
    let date = match query.date.as_deref() {
        Some(raw) => parse_date(raw)?,
        None => Local::now().date_naive(),
    };

    let day = reconcile::reconcile_day(state.timetable.as_ref(), &state.pool, &user, date).await?;
    Ok(respond(
        StatusCode::OK,
        "Lecture schedule fetched successfully!",
        day,
    ))
}

#[derive(Debug, Deserialize)]
struct LectureRequest {
    course_code: String,
    lecture_date: String,
    start_time: String,
    end_time: String,
    status: Option<String>,
}

impl LectureRequest {
    fn occurrence(&self) -> Result<Occurrence, AttendanceError> {
        Occurrence::parse(
            &self.course_code,
            &self.lecture_date,
            &self.start_time,
            &self.end_time,
        )
    }
}

async fn add_extra_class(
    State(state): State<AppState>,
    Caller(user): Caller,
    payload: Result<Json<LectureRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = payload?;
    let occurrence = request.occurrence()?;
    let status = request
        .status
        .as_deref()
        .map(parse_status)
        .transpose()?
        .unwrap_or(Status::Present);

    let log = db::with_manager(&state.pool, move |manager| {
        manager.add_extra_class(&user, &occurrence, status)
    })
    .await?;

    Ok(respond(
        StatusCode::CREATED,
        "Extra class added successfully!",
        log,
    ))
}

async fn create_log(
    State(state): State<AppState>,
    Caller(user): Caller,
    payload: Result<Json<LectureRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = payload?;
    let occurrence = request.occurrence()?;
    let status = parse_status(
        request
            .status
            .as_deref()
            .ok_or_else(|| AttendanceError::validation("Status is required"))?,
    )?;

    let logs = db::with_manager(&state.pool, move |manager| {
        manager.create_log(&user, &occurrence, status)
    })
    .await?;

    Ok(respond(
        StatusCode::CREATED,
        "Attendance logged successfully!",
        logs,
    ))
}

#[derive(Debug, Deserialize)]
struct StatusRequest {
    log_id: String,
    status: String,
}

async fn update_status(
    State(state): State<AppState>,
    Caller(user): Caller,
    payload: Result<Json<StatusRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = payload?;
    if request.log_id.trim().is_empty() {
        return Err(AttendanceError::validation("Log ID is required"));
    }
    let status = parse_status(&request.status)?;

    let log = db::with_manager(&state.pool, move |manager| {
        manager.update_status(&user, request.log_id.trim(), status)
    })
    .await?;

    Ok(respond(
        StatusCode::OK,
        "Attendance status updated successfully!",
        log,
    ))
}

#[derive(Debug, Deserialize)]
struct AdjustRequest {
    course_code: String,
    present_total: Option<i32>,
    absent_total: Option<i32>,
    medical_total: Option<i32>,
    total_classes: Option<i32>,
}

async fn adjust_totals(
    State(state): State<AppState>,
    Caller(user): Caller,
    payload: Result<Json<AdjustRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = payload?;
    let adjustment = TotalsAdjustment {
        course_code: validate_course_code(&request.course_code)?,
        present_total: request.present_total,
        absent_total: request.absent_total,
        medical_total: request.medical_total,
        total_lectures: request.total_classes,
    };

    let report = db::with_manager(&state.pool, move |manager| {
        manager.adjust_totals(&user, &adjustment)
    })
    .await?;

    Ok(respond(
        StatusCode::OK,
        "Attendance totals adjusted successfully!",
        report,
    ))
}

#[derive(Debug, Deserialize)]
struct ReportQuery {
    course_code: Option<String>,
}

async fn get_report(
    State(state): State<AppState>,
    Caller(user): Caller,
    query: Result<Query<ReportQuery>, QueryRejection>,
) -> ApiResult {
    let Query(query) = query?;
    let course_code = query
        .course_code
        .as_deref()
        .map(validate_course_code)
        .transpose()?;

    let mut reports = db::with_manager(&state.pool, move |manager| {
        manager.report(&user, course_code.as_deref())
    })
    .await?;

    let message = "Attendance report retrieved successfully!";
    if query.course_code.is_some() {
        Ok(respond(StatusCode::OK, message, reports.pop()))
    } else {
        Ok(respond(StatusCode::OK, message, reports))
    }
}

async fn register(
    State(state): State<AppState>,
    payload: Result<Json<Registration>, JsonRejection>,
) -> ApiResult {
    let Json(registration) = payload?;
    registration.validate()?;

    let catalog = Arc::clone(&state.catalog);
    let user = db::with_manager(&state.pool, move |manager| {
        manager.register(&catalog, &registration)
    })
    .await?;

    Ok(respond(
        StatusCode::CREATED,
        "User registered successfully!",
        user,
    ))
}

async fn get_me(Caller(user): Caller) -> ApiResult {
    Ok(respond(
        StatusCode::OK,
        "User data retrieved successfully!",
        user,
    ))
}

async fn delete_me(State(state): State<AppState>, Caller(user): Caller) -> ApiResult {
    db::with_manager(&state.pool, move |manager| manager.delete_user(&user)).await?;
    Ok(respond(
        StatusCode::OK,
        "User data deleted successfully!",
        json!({}),
    ))
}

#[derive(Debug, Deserialize)]
struct SemesterRequest {
    new_semester: i32,
}

async fn change_semester(
    State(state): State<AppState>,
    Caller(user): Caller,
    payload: Result<Json<SemesterRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = payload?;
    crate::models::validate_semester(request.new_semester)?;

    let catalog = Arc::clone(&state.catalog);
    let user = db::with_manager(&state.pool, move |manager| {
        manager.change_semester(&catalog, &user, request.new_semester)
    })
    .await?;

    Ok(respond(
        StatusCode::OK,
        "Semester updated successfully!",
        user,
    ))
}

async fn reset_semester(State(state): State<AppState>, Caller(user): Caller) -> ApiResult {
    let catalog = Arc::clone(&state.catalog);
    let summary = db::with_manager(&state.pool, move |manager| {
        manager.reset_semester(&catalog, &user)
    })
    .await?;

    Ok(respond(
        StatusCode::OK,
        "Semester data reset successfully!",
        summary,
    ))
}

#[derive(Debug, Deserialize)]
struct UnenrollRequest {
    course_code: String,
}

async fn unenroll(
    State(state): State<AppState>,
    Caller(user): Caller,
    payload: Result<Json<UnenrollRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = payload?;
    let course_code = validate_course_code(&request.course_code)?;

    let summary = db::with_manager(&state.pool, move |manager| {
        manager.unenroll(&user, &course_code)
    })
    .await?;

    Ok(respond(
        StatusCode::OK,
        "Unenrolled from course successfully!",
        summary,
    ))
}

async fn not_found() -> AttendanceError {
    AttendanceError::not_found("route")
}
