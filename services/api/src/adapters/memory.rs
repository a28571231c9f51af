//! services/api/src/adapters/memory.rs
//!
//! An in-memory implementation of the `DatabaseService` port. It mirrors the
//! uniqueness rules of the Postgres schema and backs the HTTP tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use course_core::catalog::{NewLesson, NewPermission};
use course_core::domain::{
    AccessGrant, AuthSession, Lesson, LessonView, LessonWithProgress, Permission, Product, ProductAccess,
    ProductLesson, ProductWithLessons, User, UserCredentials,
};
use course_core::ports::{DatabaseService, PortError, PortResult};
use course_core::stats::{ProductStats, ViewTotals};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

//=========================================================================================
// Storage Layout
//=========================================================================================

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    users: BTreeMap<i64, UserCredentials>,
    auth_sessions: HashMap<String, AuthSession>,
    permissions: BTreeMap<i64, Permission>,
    products: BTreeMap<i64, Product>,
    lessons: BTreeMap<i64, Lesson>,
    product_access: Vec<ProductAccess>,
    product_lessons: Vec<ProductLesson>,
    /// Keyed by (user_id, lesson_id).
    lesson_views: HashMap<(i64, i64), LessonView>,
}

impl MemoryState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn has_grant(&self, user_id: i64, product_id: i64) -> bool {
        self.product_access
            .iter()
            .any(|a| a.user_id == user_id && a.product_id == product_id)
    }

    fn lesson_ids_of(&self, product_id: i64) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .product_lessons
            .iter()
            .filter(|pl| pl.product_id == product_id)
            .map(|pl| pl.lesson_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn lessons_with_progress(&self, user_id: i64, product_id: i64) -> Vec<LessonWithProgress> {
        self.lesson_ids_of(product_id)
            .into_iter()
            .filter_map(|lesson_id| self.lessons.get(&lesson_id))
            .map(|lesson| LessonWithProgress {
                id: lesson.id,
                title: lesson.title.clone(),
                progress: self
                    .lesson_views
                    .get(&(user_id, lesson.id))
                    .map(LessonView::progress),
            })
            .collect()
    }

    fn insert_lesson(&mut self, lesson: NewLesson) -> Lesson {
        let id = self.allocate_id();
        let lesson = Lesson {
            id,
            title: lesson.title,
            description: lesson.description,
            video: lesson.video,
            runtime: lesson.runtime,
        };
        self.lessons.insert(id, lesson.clone());
        lesson
    }

    fn ensure_view(&mut self, user_id: i64, lesson_id: i64) -> PortResult<&mut LessonView> {
        if !self.users.contains_key(&user_id) {
            return Err(PortError::NotFound(format!("User {} not found", user_id)));
        }
        if !self.lessons.contains_key(&lesson_id) {
            return Err(PortError::NotFound(format!("Lesson {} not found", lesson_id)));
        }
        Ok(self
            .lesson_views
            .entry((user_id, lesson_id))
            .or_insert_with(|| LessonView::new(user_id, lesson_id, Utc::now())))
    }
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A thread-safe, process-local store implementing `DatabaseService`.
#[derive(Clone, Default)]
pub struct InMemoryDb {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> PortResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|e| PortError::Unexpected(e.to_string()))
    }

    /// Inserts a lesson without validation. Lets tests reproduce rows that
    /// predate the runtime check.
    pub fn insert_lesson_unchecked(&self, lesson: NewLesson) -> PortResult<Lesson> {
        Ok(self.lock()?.insert_lesson(lesson))
    }
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for InMemoryDb {
    async fn create_user(&self, username: &str, hashed_password: &str) -> PortResult<User> {
        let mut state = self.lock()?;
        if state.users.values().any(|u| u.username == username) {
            return Err(PortError::Conflict(format!("Username '{}' is taken", username)));
        }
        let id = state.allocate_id();
        state.users.insert(
            id,
            UserCredentials {
                user_id: id,
                username: username.to_string(),
                hashed_password: hashed_password.to_string(),
            },
        );
        Ok(User {
            id,
            username: username.to_string(),
        })
    }

    async fn get_or_create_user(&self, username: &str, hashed_password: &str) -> PortResult<User> {
        match self.create_user(username, hashed_password).await {
            Err(PortError::Conflict(_)) => {
                let creds = self.get_user_by_username(username).await?;
                Ok(User {
                    id: creds.user_id,
                    username: creds.username,
                })
            }
            other => other,
        }
    }

    async fn get_user_by_username(&self, username: &str) -> PortResult<UserCredentials> {
        let state = self.lock()?;
        state
            .users
            .values()
            .find(|u| u.username == username)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", username)))
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: i64,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        let mut state = self.lock()?;
        if !state.users.contains_key(&user_id) {
            return Err(PortError::NotFound(format!("User {} not found", user_id)));
        }
        state.auth_sessions.insert(
            session_id.to_string(),
            AuthSession {
                id: session_id.to_string(),
                user_id,
                expires_at,
            },
        );
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<i64> {
        let state = self.lock()?;
        match state.auth_sessions.get(session_id) {
            Some(session) if session.expires_at > Utc::now() => Ok(session.user_id),
            _ => Err(PortError::Unauthorized),
        }
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        self.lock()?.auth_sessions.remove(session_id);
        Ok(())
    }

    async fn get_or_create_permission(&self, permission: &NewPermission) -> PortResult<Permission> {
        let mut state = self.lock()?;
        if let Some(existing) = state.permissions.values().find(|p| p.name == permission.name) {
            return Ok(existing.clone());
        }
        let id = state.allocate_id();
        let created = Permission {
            id,
            name: permission.name.clone(),
            view: permission.view,
            edit: permission.edit,
            delete: permission.delete,
        };
        state.permissions.insert(id, created.clone());
        Ok(created)
    }

    async fn get_or_create_lesson(&self, lesson: &NewLesson) -> PortResult<Lesson> {
        lesson.validate()?;
        let mut state = self.lock()?;
        if let Some(existing) = state.lessons.values().find(|l| l.title == lesson.title) {
            return Ok(existing.clone());
        }
        Ok(state.insert_lesson(lesson.clone()))
    }

    async fn get_lesson(&self, lesson_id: i64) -> PortResult<Lesson> {
        self.lock()?
            .lessons
            .get(&lesson_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Lesson {} not found", lesson_id)))
    }

    async fn get_or_create_product(&self, name: &str, owner_id: i64) -> PortResult<Product> {
        let mut state = self.lock()?;
        if let Some(existing) = state.products.values().find(|p| p.name == name) {
            return Ok(existing.clone());
        }
        if !state.users.contains_key(&owner_id) {
            return Err(PortError::NotFound(format!("User {} not found", owner_id)));
        }
        let id = state.allocate_id();
        let product = Product {
            id,
            name: name.to_string(),
            owner_id,
        };
        state.products.insert(id, product.clone());
        Ok(product)
    }

    async fn add_lesson_to_product(&self, product_id: i64, lesson_id: i64) -> PortResult<ProductLesson> {
        let mut state = self.lock()?;
        if let Some(existing) = state
            .product_lessons
            .iter()
            .find(|pl| pl.product_id == product_id && pl.lesson_id == lesson_id)
        {
            return Ok(existing.clone());
        }
        if !state.products.contains_key(&product_id) {
            return Err(PortError::NotFound(format!("Product {} not found", product_id)));
        }
        if !state.lessons.contains_key(&lesson_id) {
            return Err(PortError::NotFound(format!("Lesson {} not found", lesson_id)));
        }
        let id = state.allocate_id();
        let link = ProductLesson {
            id,
            product_id,
            lesson_id,
        };
        state.product_lessons.push(link.clone());
        Ok(link)
    }

    async fn get_product_lessons(&self, product_id: i64) -> PortResult<Vec<Lesson>> {
        let state = self.lock()?;
        Ok(state
            .lesson_ids_of(product_id)
            .into_iter()
            .filter_map(|id| state.lessons.get(&id).cloned())
            .collect())
    }

    async fn grant_access(
        &self,
        product_id: i64,
        user_id: i64,
        permission_id: Option<i64>,
    ) -> PortResult<AccessGrant> {
        let mut state = self.lock()?;
        if let Some(existing) = state
            .product_access
            .iter()
            .find(|a| a.product_id == product_id && a.user_id == user_id)
        {
            return Ok(AccessGrant {
                access: existing.clone(),
                created: false,
            });
        }
        if !state.products.contains_key(&product_id) {
            return Err(PortError::NotFound(format!("Product {} not found", product_id)));
        }
        if !state.users.contains_key(&user_id) {
            return Err(PortError::NotFound(format!("User {} not found", user_id)));
        }
        let id = state.allocate_id();
        let grant = ProductAccess {
            id,
            product_id,
            user_id,
            permission_id,
        };
        state.product_access.push(grant.clone());
        Ok(AccessGrant {
            access: grant,
            created: true,
        })
    }

    async fn ensure_lesson_view(&self, user_id: i64, lesson_id: i64) -> PortResult<LessonView> {
        let mut state = self.lock()?;
        Ok(state.ensure_view(user_id, lesson_id)?.clone())
    }

    async fn user_can_access_lesson(&self, user_id: i64, lesson_id: i64) -> PortResult<bool> {
        let state = self.lock()?;
        Ok(state
            .product_lessons
            .iter()
            .filter(|pl| pl.lesson_id == lesson_id)
            .any(|pl| state.has_grant(user_id, pl.product_id)))
    }

    async fn record_lesson_progress(
        &self,
        user_id: i64,
        lesson_id: i64,
        viewed_time: i32,
    ) -> PortResult<LessonView> {
        // The lock is held for the whole read/compute/write.
        let mut state = self.lock()?;
        let runtime = state
            .lessons
            .get(&lesson_id)
            .map(|l| l.runtime)
            .ok_or_else(|| PortError::NotFound(format!("Lesson {} not found", lesson_id)))?;

        let mut candidate = match state.lesson_views.get(&(user_id, lesson_id)) {
            Some(existing) => existing.clone(),
            None => {
                if !state.users.contains_key(&user_id) {
                    return Err(PortError::NotFound(format!("User {} not found", user_id)));
                }
                LessonView::new(user_id, lesson_id, Utc::now())
            }
        };
        candidate.record_watch(viewed_time, runtime, Utc::now())?;

        state
            .lesson_views
            .insert((user_id, lesson_id), candidate.clone());
        Ok(candidate)
    }

    async fn list_products_for_user(&self, user_id: i64) -> PortResult<Vec<ProductWithLessons>> {
        let state = self.lock()?;
        state
            .products
            .values()
            .filter(|p| state.has_grant(user_id, p.id))
            .map(|p| {
                let owner = state.users.get(&p.owner_id).ok_or_else(|| {
                    PortError::Unexpected(format!("Product {} has no owner", p.id))
                })?;
                Ok(ProductWithLessons {
                    id: p.id,
                    name: p.name.clone(),
                    owner_username: owner.username.clone(),
                    lessons: state.lessons_with_progress(user_id, p.id),
                })
            })
            .collect()
    }

    async fn list_lessons_for_product(
        &self,
        user_id: i64,
        product_id: i64,
    ) -> PortResult<Vec<LessonWithProgress>> {
        let state = self.lock()?;
        if !state.has_grant(user_id, product_id) {
            return Ok(Vec::new());
        }
        Ok(state.lessons_with_progress(user_id, product_id))
    }

    async fn list_product_stats(&self) -> PortResult<Vec<ProductStats>> {
        let state = self.lock()?;
        let total_users = state.users.len() as i64;

        Ok(state
            .products
            .values()
            .map(|p| {
                let lesson_ids: HashSet<i64> = state.lesson_ids_of(p.id).into_iter().collect();
                let totals = ViewTotals::tally(
                    state
                        .lesson_views
                        .values()
                        .filter(|v| lesson_ids.contains(&v.lesson_id)),
                );
                let total_students = state
                    .product_access
                    .iter()
                    .filter(|a| a.product_id == p.id)
                    .map(|a| a.user_id)
                    .collect::<HashSet<_>>()
                    .len() as i64;
                ProductStats::from_counts(p.id, p.name.clone(), totals, total_students, total_users)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_lesson(title: &str) -> NewLesson {
        NewLesson {
            title: title.to_string(),
            description: String::new(),
            video: "https://example.com/intro.mp4".to_string(),
            runtime: 120,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_lesson_creation_keeps_titles_unique() {
        let db = InMemoryDb::new();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let db = db.clone();
                tokio::spawn(async move { db.get_or_create_lesson(&new_lesson("Intro")).await })
            })
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap().unwrap().id);
        }
        assert_eq!(ids.len(), 1);
        assert_eq!(db.lock().unwrap().lessons.len(), 1);
    }

    #[tokio::test]
    async fn existing_grants_are_reported_as_such() {
        let db = InMemoryDb::new();
        let owner = db.create_user("owner", "hash").await.unwrap();
        let student = db.create_user("student", "hash").await.unwrap();
        let product = db.get_or_create_product("Course", owner.id).await.unwrap();

        let first = db.grant_access(product.id, student.id, None).await.unwrap();
        let second = db.grant_access(product.id, student.id, None).await.unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.access.id, second.access.id);
    }
}
