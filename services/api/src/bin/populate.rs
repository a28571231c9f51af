//! services/api/src/bin/populate.rs
//!
//! Seeds the configured database with demo users, lessons and products.

use api_lib::{
    adapters::db::DbAdapter,
    config::Config,
    error::ApiError,
    seed::{seed, SeedPlan, DEMO_PASSWORD},
    web::auth::hash_password,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Starting database population...");

    let db_pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;
    let db = DbAdapter::new(db_pool);
    db.run_migrations().await?;

    let password_hash = hash_password(DEMO_PASSWORD)
        .map_err(|e| ApiError::Internal(format!("Failed to hash demo password: {}", e)))?;
    let plan = SeedPlan {
        users: 5,
        lessons: 10,
        products: 3,
        password_hash,
    };

    let mut rng = StdRng::from_os_rng();
    seed(&db, &plan, &mut rng).await?;
    Ok(())
}
