//! crates/course_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

//=========================================================================================
// Users and Authentication
//=========================================================================================

// Represents a user - used throughout app
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub username: String,
}

// Only used internally for login/signup - contains sensitive data
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user_id: i64,
    pub username: String,
    pub hashed_password: String,
}

// Represents a browser login session (auth cookie)
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub id: String,
    pub user_id: i64,
    pub expires_at: DateTime<Utc>,
}

//=========================================================================================
// Catalog: Products, Lessons, Permissions
//=========================================================================================

/// A sellable bundle of lessons, owned by exactly one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub owner_id: i64,
}

/// A named bundle of view/edit/delete flags attached to an access grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    pub id: i64,
    pub name: String,
    pub view: bool,
    pub edit: bool,
    pub delete: bool,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.view, self.edit, self.delete)
    }
}

/// Grants one user access to one product. Unique per (product, user).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductAccess {
    pub id: i64,
    pub product_id: i64,
    pub user_id: i64,
    /// Cleared when the referenced permission is deleted.
    pub permission_id: Option<i64>,
}

/// Outcome of a get-or-create grant: the stored grant and whether this call made it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGrant {
    pub access: ProductAccess,
    pub created: bool,
}

/// A single video lesson. `runtime` is in seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lesson {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub video: String,
    pub runtime: i32,
}

/// Membership of a lesson in a product. Unique per (product, lesson).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductLesson {
    pub id: i64,
    pub product_id: i64,
    pub lesson_id: i64,
}

//=========================================================================================
// Viewing Progress
//=========================================================================================

/// Whether a user has watched enough of a lesson for it to count as viewed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ViewStatus {
    #[default]
    NotViewed,
    Viewed,
}

impl ViewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewStatus::NotViewed => "not_viewed",
            ViewStatus::Viewed => "viewed",
        }
    }
}

impl fmt::Display for ViewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown view status '{0}'")]
pub struct UnknownViewStatus(pub String);

impl FromStr for ViewStatus {
    type Err = UnknownViewStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_viewed" => Ok(ViewStatus::NotViewed),
            "viewed" => Ok(ViewStatus::Viewed),
            other => Err(UnknownViewStatus(other.to_string())),
        }
    }
}

/// The per-(user, lesson) viewing record. At most one exists for each pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonView {
    pub user_id: i64,
    pub lesson_id: i64,
    pub viewed_time: i32,
    pub status: ViewStatus,
    pub last_viewed: DateTime<Utc>,
}

impl LessonView {
    /// A freshly created record: nothing watched yet.
    pub fn new(user_id: i64, lesson_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            lesson_id,
            viewed_time: 0,
            status: ViewStatus::NotViewed,
            last_viewed: now,
        }
    }

    pub fn progress(&self) -> LessonProgress {
        LessonProgress {
            viewed_time: self.viewed_time,
            status: self.status,
            last_viewed: self.last_viewed,
        }
    }
}

//=========================================================================================
// Read Models (query results)
//=========================================================================================

/// The requesting user's own progress on a lesson, as attached to listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LessonProgress {
    pub viewed_time: i32,
    pub status: ViewStatus,
    pub last_viewed: DateTime<Utc>,
}

/// A lesson as listed for a particular user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonWithProgress {
    pub id: i64,
    pub title: String,
    /// `None` when the user has no viewing record for this lesson.
    pub progress: Option<LessonProgress>,
}

/// A product visible to a user, together with its lessons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductWithLessons {
    pub id: i64,
    pub name: String,
    pub owner_username: String,
    pub lessons: Vec<LessonWithProgress>,
}
