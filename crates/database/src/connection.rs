use crate::error::DbError;
use configuration::DatabaseSettings;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::env;

/// Establishes a connection pool to the PostgreSQL database.
///
/// The URL comes from the settings, falling back to `DATABASE_URL` from the
/// environment or the `.env` file. With `lazy` set, the pool is created without
/// touching the network and the first query opens a connection; otherwise an
/// unreachable database is reported here.
pub async fn connect(settings: &DatabaseSettings) -> Result<PgPool, DbError> {
    let database_url = resolve_url(settings)?;

    let options = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(settings.acquire_timeout())
        .idle_timeout(settings.idle_timeout());

    let pool = if settings.lazy {
        options.connect_lazy(&database_url)?
    } else {
        options.connect(&database_url).await?
    };

    Ok(pool)
}

fn resolve_url(settings: &DatabaseSettings) -> Result<String, DbError> {
    if let Some(url) = &settings.url {
        return Ok(url.clone());
    }

    // A missing .env file is fine as long as the variable is set some other way.
    dotenvy::dotenv().ok();

    env::var("DATABASE_URL")
        .map_err(|_e| DbError::ConnectionConfigError("DATABASE_URL must be set.".to_string()))
}

/// A utility function to run database migrations automatically.
///
/// This is useful for ensuring the database schema is up-to-date when the application starts,
/// which is especially important in production deployments.
pub async fn run_migrations(pool: &PgPool) -> Result<(), DbError> {
    // Use a relative path from the crate root
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Round-trips a trivial query to prove the store is reachable.
pub async fn ping(pool: &PgPool) -> Result<(), DbError> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
