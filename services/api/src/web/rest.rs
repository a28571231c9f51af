//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::auth::{
    self, AuthResponse, LoginRequest, SignupRequest,
};
use crate::web::middleware::AuthenticatedUser;
use crate::web::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    Extension,
};
use chrono::{DateTime, Utc};
use course_core::domain::{LessonWithProgress, ProductWithLessons, ViewStatus};
use course_core::ports::PortError;
use course_core::stats::ProductStats;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};
use utoipa::{OpenApi, ToSchema};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        list_products_handler,
        list_product_lessons_handler,
        list_product_stats_handler,
        update_lesson_progress_handler,
        health_handler,
        auth::signup_handler,
        auth::login_handler,
        auth::logout_handler,
    ),
    components(
        schemas(
            ProductLessonsResponse,
            LessonSummaryResponse,
            LessonDetailResponse,
            ProductStatsResponse,
            ProgressUpdateRequest,
            SignupRequest,
            LoginRequest,
            AuthResponse,
        )
    ),
    tags(
        (name = "Course Progress API", description = "Products, lessons and viewing progress.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// Sentinel reported as `viewed_time` when the user has no viewing record.
pub const NO_VIEWED_TIME: i32 = -1;

/// A lesson inside the products listing. Missing progress reads as not viewed.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LessonSummaryResponse {
    pub id: i64,
    pub title: String,
    pub viewed_time: i32,
    pub status: String,
}

impl From<LessonWithProgress> for LessonSummaryResponse {
    fn from(lesson: LessonWithProgress) -> Self {
        let (viewed_time, status) = match lesson.progress {
            Some(p) => (p.viewed_time, p.status),
            None => (NO_VIEWED_TIME, ViewStatus::NotViewed),
        };
        Self {
            id: lesson.id,
            title: lesson.title,
            viewed_time,
            status: status.as_str().to_string(),
        }
    }
}

/// A lesson in the per-product listing. Missing progress leaves status and
/// last_viewed null.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LessonDetailResponse {
    pub id: i64,
    pub title: String,
    pub viewed_time: i32,
    pub status: Option<String>,
    pub last_viewed: Option<DateTime<Utc>>,
}

impl From<LessonWithProgress> for LessonDetailResponse {
    fn from(lesson: LessonWithProgress) -> Self {
        Self {
            id: lesson.id,
            title: lesson.title,
            viewed_time: lesson.progress.map_or(NO_VIEWED_TIME, |p| p.viewed_time),
            status: lesson.progress.map(|p| p.status.as_str().to_string()),
            last_viewed: lesson.progress.map(|p| p.last_viewed),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProductLessonsResponse {
    pub id: i64,
    pub name: String,
    /// Username of the product owner.
    pub owner: String,
    pub lessons: Vec<LessonSummaryResponse>,
}

impl From<ProductWithLessons> for ProductLessonsResponse {
    fn from(product: ProductWithLessons) -> Self {
        Self {
            id: product.id,
            name: product.name,
            owner: product.owner_username,
            lessons: product.lessons.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProductStatsResponse {
    pub id: i64,
    pub name: String,
    pub total_views: i64,
    pub total_views_time: i64,
    pub total_students: i64,
    pub acquisition_percentage: f64,
}

impl From<ProductStats> for ProductStatsResponse {
    fn from(stats: ProductStats) -> Self {
        Self {
            id: stats.product_id,
            name: stats.name,
            total_views: stats.total_views,
            total_views_time: stats.total_views_time,
            total_students: stats.total_students,
            acquisition_percentage: stats.acquisition_percentage,
        }
    }
}

/// New accumulated watch time for a lesson, in seconds.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProgressUpdateRequest {
    pub viewed_time: i32,
}

//=========================================================================================
// Error Mapping
//=========================================================================================

/// Maps a port failure to an HTTP status and a client-safe message.
pub fn port_error_response(context: &str, e: PortError) -> (StatusCode, String) {
    let (status, message) = match &e {
        PortError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
        PortError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
        PortError::InvalidInput(m) => (StatusCode::BAD_REQUEST, m.clone()),
        PortError::InvalidLessonState(m) => (StatusCode::UNPROCESSABLE_ENTITY, m.clone()),
        PortError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
        PortError::Unexpected(_) => (StatusCode::INTERNAL_SERVER_ERROR, context.to_string()),
    };
    if status.is_server_error() {
        error!("{}: {:?}", context, e);
    } else {
        warn!("{}: {}", context, e);
    }
    (status, message)
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// List the products the user has access to, each with its lessons and the
/// user's progress on them.
#[utoipa::path(
    get,
    path = "/api/v1/products",
    responses(
        (status = 200, description = "Accessible products", body = Vec<ProductLessonsResponse>),
        (status = 401, description = "Not logged in"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn list_products_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<ProductLessonsResponse>>, (StatusCode, String)> {
    let products = app_state
        .db
        .list_products_for_user(user_id)
        .await
        .map_err(|e| port_error_response("Failed to list products", e))?;

    Ok(Json(products.into_iter().map(Into::into).collect()))
}

/// List the lessons of one product. Empty if the product does not exist or
/// the user has no access to it.
#[utoipa::path(
    get,
    path = "/api/v1/products/{product_id}/lessons",
    params(
        ("product_id" = i64, Path, description = "Numeric product identifier.")
    ),
    responses(
        (status = 200, description = "Lessons with the user's progress", body = Vec<LessonDetailResponse>),
        (status = 401, description = "Not logged in"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn list_product_lessons_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    Path(product_id): Path<i64>,
) -> Result<Json<Vec<LessonDetailResponse>>, (StatusCode, String)> {
    let lessons = app_state
        .db
        .list_lessons_for_product(user_id, product_id)
        .await
        .map_err(|e| port_error_response("Failed to list lessons", e))?;

    Ok(Json(lessons.into_iter().map(Into::into).collect()))
}

/// Per-product view counts, watch time, students and acquisition rate.
#[utoipa::path(
    get,
    path = "/api/v1/product-stats",
    responses(
        (status = 200, description = "Statistics for every product", body = Vec<ProductStatsResponse>),
        (status = 401, description = "Not logged in"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn list_product_stats_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Vec<ProductStatsResponse>>, (StatusCode, String)> {
    let stats = app_state
        .db
        .list_product_stats()
        .await
        .map_err(|e| port_error_response("Failed to compute product statistics", e))?;

    Ok(Json(stats.into_iter().map(Into::into).collect()))
}

/// Record the user's accumulated watch time on a lesson.
///
/// The lesson becomes `viewed` once 80% of its runtime has been watched and
/// stays viewed afterwards.
#[utoipa::path(
    put,
    path = "/api/v1/lessons/{lesson_id}/progress",
    params(
        ("lesson_id" = i64, Path, description = "Numeric lesson identifier.")
    ),
    request_body = ProgressUpdateRequest,
    responses(
        (status = 200, description = "Progress stored", body = LessonDetailResponse),
        (status = 400, description = "Negative watch time"),
        (status = 401, description = "Not logged in"),
        (status = 404, description = "Lesson missing or not accessible"),
        (status = 422, description = "Lesson has an invalid runtime"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn update_lesson_progress_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    Path(lesson_id): Path<i64>,
    Json(req): Json<ProgressUpdateRequest>,
) -> Result<Json<LessonDetailResponse>, (StatusCode, String)> {
    let db = &app_state.db;

    // 1. Only lessons reachable through an access grant can be tracked
    let allowed = db
        .user_can_access_lesson(user_id, lesson_id)
        .await
        .map_err(|e| port_error_response("Failed to check lesson access", e))?;
    if !allowed {
        return Err((
            StatusCode::NOT_FOUND,
            format!("Lesson {} not found", lesson_id),
        ));
    }

    // 2. Store the new time; the completion rule runs inside the write
    let view = db
        .record_lesson_progress(user_id, lesson_id, req.viewed_time)
        .await
        .map_err(|e| port_error_response("Failed to record lesson progress", e))?;
    let lesson = db
        .get_lesson(lesson_id)
        .await
        .map_err(|e| port_error_response("Failed to load lesson", e))?;

    Ok(Json(
        LessonWithProgress {
            id: lesson.id,
            title: lesson.title,
            progress: Some(view.progress()),
        }
        .into(),
    ))
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up"))
)]
pub async fn health_handler() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use course_core::domain::LessonProgress;

    fn lesson(progress: Option<LessonProgress>) -> LessonWithProgress {
        LessonWithProgress {
            id: 3,
            title: "Traits".to_string(),
            progress,
        }
    }

    #[test]
    fn summary_defaults_to_not_viewed() {
        let summary = LessonSummaryResponse::from(lesson(None));
        assert_eq!(summary.viewed_time, -1);
        assert_eq!(summary.status, "not_viewed");
    }

    #[test]
    fn detail_defaults_to_null_status() {
        let detail = LessonDetailResponse::from(lesson(None));
        assert_eq!(detail.viewed_time, -1);
        assert_eq!(detail.status, None);
        assert_eq!(detail.last_viewed, None);
    }

    #[test]
    fn detail_carries_recorded_progress() {
        let last_viewed = Utc::now();
        let detail = LessonDetailResponse::from(lesson(Some(LessonProgress {
            viewed_time: 480,
            status: ViewStatus::Viewed,
            last_viewed,
        })));
        assert_eq!(detail.viewed_time, 480);
        assert_eq!(detail.status.as_deref(), Some("viewed"));
        assert_eq!(detail.last_viewed, Some(last_viewed));
    }

    #[test]
    fn port_errors_map_to_statuses() {
        let cases = [
            (PortError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (PortError::Conflict("x".into()), StatusCode::CONFLICT),
            (PortError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (PortError::InvalidLessonState("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (PortError::Unauthorized, StatusCode::UNAUTHORIZED),
            (PortError::Unexpected("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(port_error_response("ctx", err).0, expected);
        }
    }

    #[test]
    fn unexpected_errors_do_not_leak_details() {
        let (_, message) = port_error_response("Failed to list", PortError::Unexpected("secret".into()));
        assert_eq!(message, "Failed to list");
    }
}
