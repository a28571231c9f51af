//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use course_core::catalog::{NewLesson, NewPermission};
use course_core::domain::{
    AccessGrant, Lesson, LessonProgress, LessonView, LessonWithProgress, Permission, Product, ProductAccess,
    ProductLesson, ProductWithLessons, User, UserCredentials, ViewStatus,
};
use course_core::ports::{DatabaseService, PortError, PortResult};
use course_core::stats::{ProductStats, ViewTotals};
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use tracing::{debug, warn};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

//=========================================================================================
// Error Mapping
//=========================================================================================

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn not_found_or_unexpected(e: sqlx::Error, what: impl FnOnce() -> String) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound(what()),
        _ => unexpected(e),
    }
}

fn conflict_or_unexpected(e: sqlx::Error, what: impl FnOnce() -> String) -> PortError {
    match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => PortError::Conflict(what()),
        _ => unexpected(e),
    }
}

fn parse_status(raw: &str) -> PortResult<ViewStatus> {
    raw.parse::<ViewStatus>()
        .map_err(|e| PortError::Unexpected(e.to_string()))
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    id: i64,
    username: String,
}
impl UserRecord {
    fn to_domain(self) -> User {
        User {
            id: self.id,
            username: self.username,
        }
    }
}

#[derive(FromRow)]
struct CredentialsRecord {
    id: i64,
    username: String,
    hashed_password: String,
}
impl CredentialsRecord {
    fn to_domain(self) -> UserCredentials {
        UserCredentials {
            user_id: self.id,
            username: self.username,
            hashed_password: self.hashed_password,
        }
    }
}

#[derive(FromRow)]
struct PermissionRecord {
    id: i64,
    name: String,
    can_view: bool,
    can_edit: bool,
    can_delete: bool,
}
impl PermissionRecord {
    fn to_domain(self) -> Permission {
        Permission {
            id: self.id,
            name: self.name,
            view: self.can_view,
            edit: self.can_edit,
            delete: self.can_delete,
        }
    }
}

#[derive(FromRow)]
struct ProductRecord {
    id: i64,
    name: String,
    owner_id: i64,
}
impl ProductRecord {
    fn to_domain(self) -> Product {
        Product {
            id: self.id,
            name: self.name,
            owner_id: self.owner_id,
        }
    }
}

#[derive(FromRow)]
struct LessonRecord {
    id: i64,
    title: String,
    description: String,
    video: String,
    runtime: i32,
}
impl LessonRecord {
    fn to_domain(self) -> Lesson {
        Lesson {
            id: self.id,
            title: self.title,
            description: self.description,
            video: self.video,
            runtime: self.runtime,
        }
    }
}

#[derive(FromRow)]
struct ProductLessonRecord {
    id: i64,
    product_id: i64,
    lesson_id: i64,
}

#[derive(FromRow)]
struct ProductAccessRecord {
    id: i64,
    product_id: i64,
    user_id: i64,
    permission_id: Option<i64>,
}

#[derive(FromRow)]
struct LessonViewRecord {
    user_id: i64,
    lesson_id: i64,
    viewed_time: i32,
    status: String,
    last_viewed: DateTime<Utc>,
}
impl LessonViewRecord {
    fn to_domain(self) -> PortResult<LessonView> {
        Ok(LessonView {
            user_id: self.user_id,
            lesson_id: self.lesson_id,
            viewed_time: self.viewed_time,
            status: parse_status(&self.status)?,
            last_viewed: self.last_viewed,
        })
    }
}

/// A lesson row LEFT JOINed with the requesting user's viewing record.
#[derive(FromRow)]
struct LessonProgressRecord {
    product_id: i64,
    id: i64,
    title: String,
    viewed_time: Option<i32>,
    status: Option<String>,
    last_viewed: Option<DateTime<Utc>>,
}
impl LessonProgressRecord {
    fn to_domain(self) -> PortResult<LessonWithProgress> {
        let progress = match (self.viewed_time, self.status, self.last_viewed) {
            (Some(viewed_time), Some(status), Some(last_viewed)) => Some(LessonProgress {
                viewed_time,
                status: parse_status(&status)?,
                last_viewed,
            }),
            _ => None,
        };
        Ok(LessonWithProgress {
            id: self.id,
            title: self.title,
            progress,
        })
    }
}

#[derive(FromRow)]
struct ProductHeaderRecord {
    id: i64,
    name: String,
    owner_username: String,
}

#[derive(FromRow)]
struct ProductStatsRecord {
    id: i64,
    name: String,
    total_views: i64,
    total_views_time: i64,
    total_students: i64,
    total_users: i64,
}
impl ProductStatsRecord {
    fn to_domain(self) -> ProductStats {
        ProductStats::from_counts(
            self.id,
            self.name,
            ViewTotals {
                total_views: self.total_views,
                total_views_time: self.total_views_time,
            },
            self.total_students,
            self.total_users,
        )
    }
}

//=========================================================================================
// SQL
//=========================================================================================

const LESSON_VIEW_COLUMNS: &str = "user_id, lesson_id, viewed_time, status, last_viewed";

// $1 = requesting user. Only the user's own record is joined, so at most one per lesson.
const LESSONS_WITH_PROGRESS_SQL: &str = "
    SELECT pl.product_id, l.id, l.title, lv.viewed_time, lv.status, lv.last_viewed
    FROM product_lessons pl
    JOIN lessons l ON l.id = pl.lesson_id
    LEFT JOIN lesson_views lv ON lv.lesson_id = l.id AND lv.user_id = $1";

// Views and grants are aggregated in separate subqueries so they never multiply each other.
const PRODUCT_STATS_SQL: &str = "
    SELECT p.id,
           p.name,
           COALESCE(v.total_views, 0)::BIGINT AS total_views,
           COALESCE(v.total_views_time, 0)::BIGINT AS total_views_time,
           COALESCE(a.total_students, 0)::BIGINT AS total_students,
           (SELECT COUNT(*) FROM users)::BIGINT AS total_users
    FROM products p
    LEFT JOIN (
        SELECT pl.product_id,
               COUNT(*) AS total_views,
               SUM(lv.viewed_time) AS total_views_time
        FROM product_lessons pl
        JOIN lesson_views lv ON lv.lesson_id = pl.lesson_id
        WHERE lv.status = 'viewed'
        GROUP BY pl.product_id
    ) v ON v.product_id = p.id
    LEFT JOIN (
        SELECT product_id, COUNT(DISTINCT user_id) AS total_students
        FROM product_access
        GROUP BY product_id
    ) a ON a.product_id = p.id
    ORDER BY p.id";

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn create_user(&self, username: &str, hashed_password: &str) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            "INSERT INTO users (username, hashed_password) VALUES ($1, $2) RETURNING id, username",
        )
        .bind(username)
        .bind(hashed_password)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| conflict_or_unexpected(e, || format!("Username '{}' is taken", username)))?;
        Ok(record.to_domain())
    }

    async fn get_or_create_user(&self, username: &str, hashed_password: &str) -> PortResult<User> {
        sqlx::query(
            "INSERT INTO users (username, hashed_password) VALUES ($1, $2) ON CONFLICT (username) DO NOTHING",
        )
        .bind(username)
        .bind(hashed_password)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT id, username FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| not_found_or_unexpected(e, || format!("User {} not found", username)))?;
        Ok(record.to_domain())
    }

    async fn get_user_by_username(&self, username: &str) -> PortResult<UserCredentials> {
        let record = sqlx::query_as::<_, CredentialsRecord>(
            "SELECT id, username, hashed_password FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| not_found_or_unexpected(e, || format!("User {} not found", username)))?;
        Ok(record.to_domain())
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: i64,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<i64> {
        let user_id = sqlx::query_scalar::<_, i64>(
            "SELECT user_id FROM auth_sessions WHERE id = $1 AND expires_at > now()",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        user_id.ok_or(PortError::Unauthorized)
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn get_or_create_permission(&self, permission: &NewPermission) -> PortResult<Permission> {
        sqlx::query(
            "INSERT INTO permissions (name, can_view, can_edit, can_delete) VALUES ($1, $2, $3, $4)
             ON CONFLICT (name) DO NOTHING",
        )
        .bind(&permission.name)
        .bind(permission.view)
        .bind(permission.edit)
        .bind(permission.delete)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        let record = sqlx::query_as::<_, PermissionRecord>(
            "SELECT id, name, can_view, can_edit, can_delete FROM permissions WHERE name = $1",
        )
        .bind(&permission.name)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn get_or_create_lesson(&self, lesson: &NewLesson) -> PortResult<Lesson> {
        lesson.validate()?;

        sqlx::query(
            "INSERT INTO lessons (title, description, video, runtime) VALUES ($1, $2, $3, $4)
             ON CONFLICT (title) DO NOTHING",
        )
        .bind(&lesson.title)
        .bind(&lesson.description)
        .bind(&lesson.video)
        .bind(lesson.runtime)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        let record = sqlx::query_as::<_, LessonRecord>(
            "SELECT id, title, description, video, runtime FROM lessons WHERE title = $1",
        )
        .bind(&lesson.title)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn get_lesson(&self, lesson_id: i64) -> PortResult<Lesson> {
        let record = sqlx::query_as::<_, LessonRecord>(
            "SELECT id, title, description, video, runtime FROM lessons WHERE id = $1",
        )
        .bind(lesson_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| not_found_or_unexpected(e, || format!("Lesson {} not found", lesson_id)))?;
        Ok(record.to_domain())
    }

    async fn get_or_create_product(&self, name: &str, owner_id: i64) -> PortResult<Product> {
        sqlx::query("INSERT INTO products (name, owner_id) VALUES ($1, $2) ON CONFLICT (name) DO NOTHING")
            .bind(name)
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;

        let record = sqlx::query_as::<_, ProductRecord>(
            "SELECT id, name, owner_id FROM products WHERE name = $1",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn add_lesson_to_product(&self, product_id: i64, lesson_id: i64) -> PortResult<ProductLesson> {
        sqlx::query(
            "INSERT INTO product_lessons (product_id, lesson_id) VALUES ($1, $2)
             ON CONFLICT (product_id, lesson_id) DO NOTHING",
        )
        .bind(product_id)
        .bind(lesson_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        let record = sqlx::query_as::<_, ProductLessonRecord>(
            "SELECT id, product_id, lesson_id FROM product_lessons WHERE product_id = $1 AND lesson_id = $2",
        )
        .bind(product_id)
        .bind(lesson_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(ProductLesson {
            id: record.id,
            product_id: record.product_id,
            lesson_id: record.lesson_id,
        })
    }

    async fn get_product_lessons(&self, product_id: i64) -> PortResult<Vec<Lesson>> {
        let records = sqlx::query_as::<_, LessonRecord>(
            "SELECT l.id, l.title, l.description, l.video, l.runtime
             FROM lessons l JOIN product_lessons pl ON pl.lesson_id = l.id
             WHERE pl.product_id = $1 ORDER BY l.id",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn grant_access(
        &self,
        product_id: i64,
        user_id: i64,
        permission_id: Option<i64>,
    ) -> PortResult<AccessGrant> {
        let inserted = sqlx::query(
            "INSERT INTO product_access (product_id, user_id, permission_id) VALUES ($1, $2, $3)
             ON CONFLICT (product_id, user_id) DO NOTHING",
        )
        .bind(product_id)
        .bind(user_id)
        .bind(permission_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?
        .rows_affected();

        let record = sqlx::query_as::<_, ProductAccessRecord>(
            "SELECT id, product_id, user_id, permission_id FROM product_access
             WHERE product_id = $1 AND user_id = $2",
        )
        .bind(product_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(AccessGrant {
            access: ProductAccess {
                id: record.id,
                product_id: record.product_id,
                user_id: record.user_id,
                permission_id: record.permission_id,
            },
            created: inserted == 1,
        })
    }

    async fn ensure_lesson_view(&self, user_id: i64, lesson_id: i64) -> PortResult<LessonView> {
        sqlx::query(
            "INSERT INTO lesson_views (lesson_id, user_id) VALUES ($1, $2)
             ON CONFLICT (user_id, lesson_id) DO NOTHING",
        )
        .bind(lesson_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        let record = sqlx::query_as::<_, LessonViewRecord>(&format!(
            "SELECT {LESSON_VIEW_COLUMNS} FROM lesson_views WHERE user_id = $1 AND lesson_id = $2"
        ))
        .bind(user_id)
        .bind(lesson_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        record.to_domain()
    }

    async fn user_can_access_lesson(&self, user_id: i64, lesson_id: i64) -> PortResult<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (
                SELECT 1 FROM product_lessons pl
                JOIN product_access pa ON pa.product_id = pl.product_id
                WHERE pl.lesson_id = $1 AND pa.user_id = $2
            )",
        )
        .bind(lesson_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)
    }

    async fn record_lesson_progress(
        &self,
        user_id: i64,
        lesson_id: i64,
        viewed_time: i32,
    ) -> PortResult<LessonView> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        // 1. Read the lesson runtime as of this transaction
        let runtime = sqlx::query_scalar::<_, i32>("SELECT runtime FROM lessons WHERE id = $1 FOR SHARE")
            .bind(lesson_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| not_found_or_unexpected(e, || format!("Lesson {} not found", lesson_id)))?;

        // 2. Make sure the viewing record exists, then lock it
        sqlx::query(
            "INSERT INTO lesson_views (lesson_id, user_id) VALUES ($1, $2)
             ON CONFLICT (user_id, lesson_id) DO NOTHING",
        )
        .bind(lesson_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        let mut view = sqlx::query_as::<_, LessonViewRecord>(&format!(
            "SELECT {LESSON_VIEW_COLUMNS} FROM lesson_views
             WHERE user_id = $1 AND lesson_id = $2 FOR UPDATE"
        ))
        .bind(user_id)
        .bind(lesson_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(unexpected)?
        .to_domain()?;

        // 3. Apply the completion rule; the transaction rolls back on drop if rejected
        if let Err(e) = view.record_watch(viewed_time, runtime, Utc::now()) {
            warn!(user_id, lesson_id, viewed_time, runtime, "Rejected progress update: {}", e);
            return Err(e.into());
        }

        // 4. Persist and commit
        sqlx::query(
            "UPDATE lesson_views SET viewed_time = $1, status = $2, last_viewed = $3
             WHERE user_id = $4 AND lesson_id = $5",
        )
        .bind(view.viewed_time)
        .bind(view.status.as_str())
        .bind(view.last_viewed)
        .bind(user_id)
        .bind(lesson_id)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        debug!(user_id, lesson_id, status = %view.status, "Lesson progress recorded");
        Ok(view)
    }

    async fn list_products_for_user(&self, user_id: i64) -> PortResult<Vec<ProductWithLessons>> {
        let headers = sqlx::query_as::<_, ProductHeaderRecord>(
            "SELECT p.id, p.name, u.username AS owner_username
             FROM products p
             JOIN users u ON u.id = p.owner_id
             WHERE EXISTS (
                SELECT 1 FROM product_access pa WHERE pa.product_id = p.id AND pa.user_id = $1
             )
             ORDER BY p.id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        if headers.is_empty() {
            return Ok(Vec::new());
        }

        let product_ids: Vec<i64> = headers.iter().map(|h| h.id).collect();
        let rows = sqlx::query_as::<_, LessonProgressRecord>(&format!(
            "{LESSONS_WITH_PROGRESS_SQL} WHERE pl.product_id = ANY($2) ORDER BY pl.product_id, l.id"
        ))
        .bind(user_id)
        .bind(&product_ids[..])
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        let mut lessons_by_product: HashMap<i64, Vec<LessonWithProgress>> = HashMap::new();
        for row in rows {
            let product_id = row.product_id;
            lessons_by_product
                .entry(product_id)
                .or_default()
                .push(row.to_domain()?);
        }

        Ok(headers
            .into_iter()
            .map(|h| ProductWithLessons {
                lessons: lessons_by_product.remove(&h.id).unwrap_or_default(),
                id: h.id,
                name: h.name,
                owner_username: h.owner_username,
            })
            .collect())
    }

    async fn list_lessons_for_product(
        &self,
        user_id: i64,
        product_id: i64,
    ) -> PortResult<Vec<LessonWithProgress>> {
        let rows = sqlx::query_as::<_, LessonProgressRecord>(&format!(
            "{LESSONS_WITH_PROGRESS_SQL}
             WHERE pl.product_id = $2
               AND EXISTS (
                   SELECT 1 FROM product_access pa WHERE pa.product_id = $2 AND pa.user_id = $1
               )
             ORDER BY l.id"
        ))
        .bind(user_id)
        .bind(product_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        rows.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn list_product_stats(&self) -> PortResult<Vec<ProductStats>> {
        let records = sqlx::query_as::<_, ProductStatsRecord>(PRODUCT_STATS_SQL)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }
}
