use crate::error::DbError;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::env;
use std::time::Duration;

/// Builds the PostgreSQL connection pool the whole application shares.
///
/// `DATABASE_URL` is read from the process environment only. Loading a `.env`
/// file is the binary's concern at startup; an exported variable works
/// without any file on disk. Pool sizing comes from configuration so a cycle
/// with many concurrent instruments can be given headroom.
pub async fn connect(max_connections: u32, acquire_timeout: Duration) -> Result<PgPool, DbError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect(&database_url()?)
        .await?;
    Ok(pool)
}

fn database_url() -> Result<String, DbError> {
    env::var("DATABASE_URL")
        .map_err(|_| DbError::ConnectionConfigError("DATABASE_URL must be set.".to_string()))
}

/// Applies the embedded migrations, bringing the schema up to date. Run at
/// startup before any repository call.
pub async fn run_migrations(pool: &PgPool) -> Result<(), DbError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
