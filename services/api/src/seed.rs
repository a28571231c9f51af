//! services/api/src/seed.rs
//!
//! Fills a store with demo users, permissions, lessons and products.
//! Every step is get-or-create, so running it twice is harmless.

use course_core::catalog::{NewLesson, NewPermission};
use course_core::domain::{Lesson, Permission, Product, User};
use course_core::ports::{DatabaseService, PortResult};
use rand::seq::IndexedRandom;
use rand::Rng;
use tracing::info;

/// Knobs for a seeding run.
#[derive(Debug, Clone)]
pub struct SeedPlan {
    pub users: usize,
    pub lessons: usize,
    pub products: usize,
    /// Already hashed; shared by every demo user.
    pub password_hash: String,
}

/// What a seeding run produced.
#[derive(Debug, Clone)]
pub struct SeedSummary {
    pub users: Vec<User>,
    pub permissions: Vec<Permission>,
    pub lessons: Vec<Lesson>,
    pub products: Vec<Product>,
    /// Grants created by this run; existing ones are not counted.
    pub grants: usize,
}

pub const DEMO_PASSWORD: &str = "password123";

const MIN_RUNTIME_SECS: i32 = 300;
const MAX_RUNTIME_SECS: i32 = 3600;
const MIN_LESSONS_PER_PRODUCT: usize = 3;

pub async fn seed<R: Rng + Send>(
    db: &dyn DatabaseService,
    plan: &SeedPlan,
    rng: &mut R,
) -> PortResult<SeedSummary> {
    let users = create_users(db, plan).await?;
    let permissions = create_permissions(db).await?;
    let lessons = create_lessons(db, plan.lessons, rng).await?;
    let products = create_products(db, &users, &lessons, plan.products, rng).await?;
    let grants = assign_product_access(db, &users, &products, &permissions, rng).await?;

    info!(
        users = users.len(),
        lessons = lessons.len(),
        products = products.len(),
        grants,
        "Database population complete"
    );
    Ok(SeedSummary {
        users,
        permissions,
        lessons,
        products,
        grants,
    })
}

async fn create_users(db: &dyn DatabaseService, plan: &SeedPlan) -> PortResult<Vec<User>> {
    let mut users = Vec::with_capacity(plan.users);
    for i in 1..=plan.users {
        let user = db
            .get_or_create_user(&format!("user{}", i), &plan.password_hash)
            .await?;
        info!(username = %user.username, "User ready");
        users.push(user);
    }
    Ok(users)
}

async fn create_permissions(db: &dyn DatabaseService) -> PortResult<Vec<Permission>> {
    let levels = [
        ("View Only", true, false, false),
        ("Editor", true, true, false),
        ("Admin", true, true, true),
    ];
    let mut permissions = Vec::with_capacity(levels.len());
    for (name, view, edit, delete) in levels {
        let permission = NewPermission {
            name: name.to_string(),
            view,
            edit,
            delete,
        };
        let permission = db.get_or_create_permission(&permission).await?;
        info!(name = %permission.name, flags = %permission, "Permission ready");
        permissions.push(permission);
    }
    Ok(permissions)
}

async fn create_lessons<R: Rng + Send>(
    db: &dyn DatabaseService,
    count: usize,
    rng: &mut R,
) -> PortResult<Vec<Lesson>> {
    let mut lessons = Vec::with_capacity(count);
    for i in 1..=count {
        let lesson = NewLesson {
            title: format!("Lesson {}", i),
            description: format!("This is a detailed description for lesson {}.", i),
            video: format!("https://example.com/videos/lesson{}.mp4", i),
            runtime: rng.random_range(MIN_RUNTIME_SECS..=MAX_RUNTIME_SECS),
        };
        lessons.push(db.get_or_create_lesson(&lesson).await?);
    }
    Ok(lessons)
}

async fn create_products<R: Rng + Send>(
    db: &dyn DatabaseService,
    users: &[User],
    lessons: &[Lesson],
    count: usize,
    rng: &mut R,
) -> PortResult<Vec<Product>> {
    let mut products = Vec::with_capacity(count);
    if users.is_empty() {
        return Ok(products);
    }

    for i in 1..=count {
        let owner_id = users.choose(rng).map(|u| u.id).unwrap_or(users[0].id);
        let product = db
            .get_or_create_product(&format!("Product {}", i), owner_id)
            .await?;

        let min = MIN_LESSONS_PER_PRODUCT.min(lessons.len());
        let how_many = rng.random_range(min..=lessons.len());
        let selected: Vec<i64> = lessons.choose_multiple(rng, how_many).map(|l| l.id).collect();
        for lesson_id in selected {
            db.add_lesson_to_product(product.id, lesson_id).await?;
        }
        info!(product = %product.name, "Product ready");
        products.push(product);
    }
    Ok(products)
}

/// Creates an empty viewing record for every lesson of the product.
async fn create_lesson_views(db: &dyn DatabaseService, user_id: i64, product_id: i64) -> PortResult<()> {
    for lesson in db.get_product_lessons(product_id).await? {
        db.ensure_lesson_view(user_id, lesson.id).await?;
    }
    Ok(())
}

async fn assign_product_access<R: Rng + Send>(
    db: &dyn DatabaseService,
    users: &[User],
    products: &[Product],
    permissions: &[Permission],
    rng: &mut R,
) -> PortResult<usize> {
    let mut grants = 0;
    for product in products {
        create_lesson_views(db, product.owner_id, product.id).await?;

        let candidates: Vec<&User> = users.iter().filter(|u| u.id != product.owner_id).collect();
        if candidates.is_empty() {
            continue;
        }
        let how_many = rng.random_range(1..=candidates.len());
        let chosen: Vec<i64> = candidates.choose_multiple(rng, how_many).map(|u| u.id).collect();

        for user_id in chosen {
            let permission_id = permissions.choose(rng).map(|p| p.id);
            let grant = db.grant_access(product.id, user_id, permission_id).await?;
            create_lesson_views(db, user_id, product.id).await?;
            if grant.created {
                grants += 1;
            }
        }
    }
    Ok(grants)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryDb;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn plan() -> SeedPlan {
        SeedPlan {
            users: 5,
            lessons: 10,
            products: 3,
            password_hash: "not-a-real-hash".to_string(),
        }
    }

    #[tokio::test]
    async fn seeds_the_demo_catalog() {
        let db = InMemoryDb::new();
        let mut rng = StdRng::seed_from_u64(7);
        let summary = seed(&db, &plan(), &mut rng).await.unwrap();

        assert_eq!(summary.users.len(), 5);
        assert_eq!(summary.permissions.len(), 3);
        assert_eq!(summary.lessons.len(), 10);
        assert_eq!(summary.products.len(), 3);
        assert!(summary.grants >= 3);

        for lesson in &summary.lessons {
            assert!((MIN_RUNTIME_SECS..=MAX_RUNTIME_SECS).contains(&lesson.runtime));
        }
        for product in &summary.products {
            let lessons = db.get_product_lessons(product.id).await.unwrap();
            assert!(lessons.len() >= MIN_LESSONS_PER_PRODUCT);
        }
    }

    #[tokio::test]
    async fn owners_are_not_granted_their_own_products() {
        let db = InMemoryDb::new();
        let mut rng = StdRng::seed_from_u64(11);
        let summary = seed(&db, &plan(), &mut rng).await.unwrap();

        for product in &summary.products {
            let owner_products = db.list_products_for_user(product.owner_id).await.unwrap();
            assert!(owner_products.iter().all(|p| p.id != product.id));
        }
    }

    #[tokio::test]
    async fn running_twice_does_not_duplicate() {
        let db = InMemoryDb::new();
        let mut rng = StdRng::seed_from_u64(3);
        let first = seed(&db, &plan(), &mut rng).await.unwrap();
        let second = seed(&db, &plan(), &mut rng).await.unwrap();

        let first_users: Vec<i64> = first.users.iter().map(|u| u.id).collect();
        let second_users: Vec<i64> = second.users.iter().map(|u| u.id).collect();
        assert_eq!(first_users, second_users);
        let first_ids: Vec<i64> = first.products.iter().map(|p| p.id).collect();
        let second_ids: Vec<i64> = second.products.iter().map(|p| p.id).collect();
        assert_eq!(first_ids, second_ids);
        assert_eq!(db.list_product_stats().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn rerun_counts_only_new_grants() {
        let db = InMemoryDb::new();
        let first = seed(&db, &plan(), &mut StdRng::seed_from_u64(5)).await.unwrap();
        let second = seed(&db, &plan(), &mut StdRng::seed_from_u64(5)).await.unwrap();

        assert!(first.grants >= 3);
        assert_eq!(second.grants, 0);
    }
}
