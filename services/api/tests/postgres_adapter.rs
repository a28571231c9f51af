//! Runs the Postgres adapter against a throwaway database per test.
//! `sqlx::test` reads `DATABASE_URL` and applies the service migrations.

use api_lib::adapters::db::DbAdapter;
use course_core::catalog::NewLesson;
use course_core::domain::{Lesson, Product, User, ViewStatus};
use course_core::ports::{DatabaseService, PortError};
use sqlx::PgPool;

fn lesson(title: &str, runtime: i32) -> NewLesson {
    NewLesson {
        title: title.to_string(),
        description: format!("About {}", title),
        video: format!("https://example.com/videos/{}.mp4", title.to_lowercase()),
        runtime,
    }
}

/// Same layout as the HTTP fixture: ten users, user1 owns both products,
/// user2..user4 hold grants to "Rust Basics".
struct Catalog {
    users: Vec<User>,
    product: Product,
    empty_product: Product,
    lesson_a: Lesson,
    lesson_b: Lesson,
}

async fn seed_catalog(db: &DbAdapter) -> Catalog {
    let mut users = Vec::new();
    for i in 1..=10 {
        users.push(db.create_user(&format!("user{}", i), "hash").await.unwrap());
    }
    let owner = users[0].id;
    let product = db.get_or_create_product("Rust Basics", owner).await.unwrap();
    let empty_product = db.get_or_create_product("Empty Course", owner).await.unwrap();

    let lesson_a = db.get_or_create_lesson(&lesson("Ownership", 360)).await.unwrap();
    let lesson_b = db.get_or_create_lesson(&lesson("Borrowing", 600)).await.unwrap();
    db.add_lesson_to_product(product.id, lesson_a.id).await.unwrap();
    db.add_lesson_to_product(product.id, lesson_b.id).await.unwrap();

    for user in &users[1..4] {
        db.grant_access(product.id, user.id, None).await.unwrap();
    }

    Catalog {
        users,
        product,
        empty_product,
        lesson_a,
        lesson_b,
    }
}

async fn view_rows(pool: &PgPool, user_id: i64, lesson_id: i64) -> i64 {
    sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM lesson_views WHERE user_id = $1 AND lesson_id = $2",
    )
    .bind(user_id)
    .bind(lesson_id)
    .fetch_one(pool)
    .await
    .unwrap()
}

//=========================================================================================
// Statistics
//=========================================================================================

#[sqlx::test(migrations = "./migrations")]
async fn stats_count_viewed_records_and_grants(pool: PgPool) {
    let db = DbAdapter::new(pool);
    let catalog = seed_catalog(&db).await;

    // Two viewed records (300/360 and 500/600), one still below the threshold
    db.record_lesson_progress(catalog.users[1].id, catalog.lesson_a.id, 300).await.unwrap();
    db.record_lesson_progress(catalog.users[2].id, catalog.lesson_b.id, 500).await.unwrap();
    db.record_lesson_progress(catalog.users[3].id, catalog.lesson_a.id, 100).await.unwrap();

    let stats = db.list_product_stats().await.unwrap();
    assert_eq!(stats.len(), 2);

    let main = stats.iter().find(|s| s.product_id == catalog.product.id).unwrap();
    assert_eq!(main.total_views, 2);
    assert_eq!(main.total_views_time, 800);
    assert_eq!(main.total_students, 3);
    assert!((main.acquisition_percentage - 0.3).abs() < 1e-9);

    let empty = stats.iter().find(|s| s.product_id == catalog.empty_product.id).unwrap();
    assert_eq!(empty.total_views, 0);
    assert_eq!(empty.total_views_time, 0);
    assert_eq!(empty.total_students, 0);
    assert_eq!(empty.acquisition_percentage, 0.0);
}

#[sqlx::test(migrations = "./migrations")]
async fn stats_are_ordered_by_product_id(pool: PgPool) {
    let db = DbAdapter::new(pool);
    let catalog = seed_catalog(&db).await;

    let ids: Vec<i64> = db
        .list_product_stats()
        .await
        .unwrap()
        .iter()
        .map(|s| s.product_id)
        .collect();
    assert_eq!(ids, vec![catalog.product.id, catalog.empty_product.id]);
}

//=========================================================================================
// Listings
//=========================================================================================

#[sqlx::test(migrations = "./migrations")]
async fn owners_without_a_grant_see_nothing(pool: PgPool) {
    let db = DbAdapter::new(pool);
    let catalog = seed_catalog(&db).await;

    let owned = db.list_products_for_user(catalog.users[0].id).await.unwrap();
    assert!(owned.is_empty());
}

#[sqlx::test(migrations = "./migrations")]
async fn granted_users_see_their_own_progress(pool: PgPool) {
    let db = DbAdapter::new(pool);
    let catalog = seed_catalog(&db).await;
    let student = catalog.users[1].id;
    db.record_lesson_progress(student, catalog.lesson_a.id, 300).await.unwrap();
    db.record_lesson_progress(catalog.users[2].id, catalog.lesson_b.id, 500).await.unwrap();

    let products = db.list_products_for_user(student).await.unwrap();
    assert_eq!(products.len(), 1);
    assert_eq!(products[0].owner_username, "user1");

    let lessons = &products[0].lessons;
    assert_eq!(lessons.len(), 2);
    let a = lessons.iter().find(|l| l.id == catalog.lesson_a.id).unwrap();
    let a_progress = a.progress.unwrap();
    assert_eq!(a_progress.viewed_time, 300);
    assert_eq!(a_progress.status, ViewStatus::Viewed);

    // Another user's record on lesson B does not leak into this listing
    let b = lessons.iter().find(|l| l.id == catalog.lesson_b.id).unwrap();
    assert_eq!(b.progress, None);
}

#[sqlx::test(migrations = "./migrations")]
async fn product_lessons_are_empty_without_a_grant(pool: PgPool) {
    let db = DbAdapter::new(pool);
    let catalog = seed_catalog(&db).await;

    let lessons = db
        .list_lessons_for_product(catalog.users[4].id, catalog.product.id)
        .await
        .unwrap();
    assert!(lessons.is_empty());

    let granted = db
        .list_lessons_for_product(catalog.users[1].id, catalog.product.id)
        .await
        .unwrap();
    assert_eq!(granted.len(), 2);
}

#[sqlx::test(migrations = "./migrations")]
async fn repeated_grants_are_not_recreated(pool: PgPool) {
    let db = DbAdapter::new(pool);
    let catalog = seed_catalog(&db).await;

    let again = db
        .grant_access(catalog.product.id, catalog.users[1].id, None)
        .await
        .unwrap();
    assert!(!again.created);
    let fresh = db
        .grant_access(catalog.product.id, catalog.users[5].id, None)
        .await
        .unwrap();
    assert!(fresh.created);
}

//=========================================================================================
// Progress Writes
//=========================================================================================

#[sqlx::test(migrations = "./migrations")]
async fn threshold_is_eighty_percent_of_runtime(pool: PgPool) {
    let db = DbAdapter::new(pool);
    let catalog = seed_catalog(&db).await;
    let user = catalog.users[1].id;

    // runtime 600: 400 stays below, 480 reaches it exactly
    let below = db.record_lesson_progress(user, catalog.lesson_b.id, 400).await.unwrap();
    assert_eq!(below.status, ViewStatus::NotViewed);

    let reached = db.record_lesson_progress(user, catalog.lesson_b.id, 480).await.unwrap();
    assert_eq!(reached.status, ViewStatus::Viewed);

    let rewound = db.record_lesson_progress(user, catalog.lesson_b.id, 20).await.unwrap();
    assert_eq!(rewound.viewed_time, 20);
    assert_eq!(rewound.status, ViewStatus::Viewed);
}

#[sqlx::test(migrations = "./migrations")]
async fn negative_watch_time_is_rejected(pool: PgPool) {
    let db = DbAdapter::new(pool);
    let catalog = seed_catalog(&db).await;
    let user = catalog.users[1].id;

    let err = db
        .record_lesson_progress(user, catalog.lesson_a.id, -1)
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::InvalidInput(_)));
}

#[sqlx::test(migrations = "./migrations")]
async fn unknown_lesson_is_not_found(pool: PgPool) {
    let db = DbAdapter::new(pool);
    let catalog = seed_catalog(&db).await;

    let err = db
        .record_lesson_progress(catalog.users[1].id, 999_999, 10)
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::NotFound(_)));
}

#[sqlx::test(migrations = "./migrations")]
async fn concurrent_writes_share_one_record(pool: PgPool) {
    let db = DbAdapter::new(pool.clone());
    let catalog = seed_catalog(&db).await;
    let user = catalog.users[1].id;
    let lesson_id = catalog.lesson_b.id;

    let handles: Vec<_> = [100, 200, 300, 400, 500, 600]
        .into_iter()
        .map(|viewed_time| {
            let db = db.clone();
            tokio::spawn(async move { db.record_lesson_progress(user, lesson_id, viewed_time).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(view_rows(&pool, user, lesson_id).await, 1);
    let view = db.ensure_lesson_view(user, lesson_id).await.unwrap();
    // 500 and 600 both cross 480 of 600, and nothing demotes afterwards
    assert_eq!(view.status, ViewStatus::Viewed);
}
