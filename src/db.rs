use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub async fn init_db() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(&database_url)
        .await
        .context("Could not connect to the database")?;

    sqlx::migrate!()
        .run(&pool)
        .await
        .context("Could not run database migrations")?;

    tracing::info!("Database pool initialized and migrations applied");

    Ok(pool)
}
