//! crates/course_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific storage implementations.

use crate::catalog::{LessonError, NewLesson, NewPermission};
use crate::domain::{
    AccessGrant, Lesson, LessonView, LessonWithProgress, Permission, Product, ProductLesson,
    ProductWithLessons, User, UserCredentials,
};
use crate::progress::ProgressError;
use crate::stats::ProductStats;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., the database).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid lesson state: {0}")]
    InvalidLessonState(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

impl From<ProgressError> for PortError {
    fn from(e: ProgressError) -> Self {
        match e {
            ProgressError::InvalidLessonState { .. } => PortError::InvalidLessonState(e.to_string()),
            ProgressError::NegativeViewedTime(_) => PortError::InvalidInput(e.to_string()),
        }
    }
}

impl From<LessonError> for PortError {
    fn from(e: LessonError) -> Self {
        PortError::InvalidInput(e.to_string())
    }
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- User Management ---

    /// Fails with `Conflict` when the username is taken.
    async fn create_user(&self, username: &str, hashed_password: &str) -> PortResult<User>;

    async fn get_or_create_user(&self, username: &str, hashed_password: &str) -> PortResult<User>;

    async fn get_user_by_username(&self, username: &str) -> PortResult<UserCredentials>;

    // --- Auth Methods ---
    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: i64,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    /// Resolves a live session to its user id. Expired sessions are `Unauthorized`.
    async fn validate_auth_session(&self, session_id: &str) -> PortResult<i64>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;

    // --- Catalog Management ---
    async fn get_or_create_permission(&self, permission: &NewPermission) -> PortResult<Permission>;

    /// Lessons are matched by title.
    async fn get_or_create_lesson(&self, lesson: &NewLesson) -> PortResult<Lesson>;

    async fn get_lesson(&self, lesson_id: i64) -> PortResult<Lesson>;

    /// Products are matched by name; an existing product keeps its owner.
    async fn get_or_create_product(&self, name: &str, owner_id: i64) -> PortResult<Product>;

    async fn add_lesson_to_product(&self, product_id: i64, lesson_id: i64) -> PortResult<ProductLesson>;

    async fn get_product_lessons(&self, product_id: i64) -> PortResult<Vec<Lesson>>;

    /// Creates the grant if missing; an existing grant keeps its permission.
    async fn grant_access(
        &self,
        product_id: i64,
        user_id: i64,
        permission_id: Option<i64>,
    ) -> PortResult<AccessGrant>;

    // --- Viewing Progress ---

    /// Returns the user's record for the lesson, creating an empty one if needed.
    async fn ensure_lesson_view(&self, user_id: i64, lesson_id: i64) -> PortResult<LessonView>;

    /// True when the user holds a grant to any product containing the lesson.
    async fn user_can_access_lesson(&self, user_id: i64, lesson_id: i64) -> PortResult<bool>;

    /// Stores a new watch time and applies the completion rule atomically with
    /// the write. Fails with `InvalidLessonState` if the lesson runtime is not positive.
    async fn record_lesson_progress(
        &self,
        user_id: i64,
        lesson_id: i64,
        viewed_time: i32,
    ) -> PortResult<LessonView>;

    // --- Listings and Statistics ---

    /// Products the user holds a grant for, with lessons and the user's own progress.
    async fn list_products_for_user(&self, user_id: i64) -> PortResult<Vec<ProductWithLessons>>;

    /// Lessons of one product, empty unless the user holds a grant for it.
    async fn list_lessons_for_product(
        &self,
        user_id: i64,
        product_id: i64,
    ) -> PortResult<Vec<LessonWithProgress>>;

    async fn list_product_stats(&self) -> PortResult<Vec<ProductStats>>;
}
