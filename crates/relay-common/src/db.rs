//! Database connection pool management (PostgreSQL via sqlx).

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::Result;

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    info!(max_connections, "creating database pool");

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    health_check(&pool).await?;
    info!("database pool ready");
    Ok(pool)
}

pub async fn health_check(pool: &PgPool) -> Result<()> {
    let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(pool).await?;

    if row.0 == 1 {
        Ok(())
    } else {
        warn!("database health check returned unexpected row");
        Err(crate::error::Error::Database(sqlx::Error::Protocol(
            "health check failed".into(),
        )))
    }
}

pub fn pool_stats(pool: &PgPool) -> (u32, usize) {
    (pool.size(), pool.num_idle())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pool_creation_against_real_database() {
        if let Ok(database_url) = std::env::var("DATABASE_URL") {
            let pool = create_pool(&database_url, 5).await.unwrap();
            let (size, idle) = pool_stats(&pool);
            assert!(size > 0);
            assert!(idle <= size as usize);
        } else {
            println!("skipping: DATABASE_URL not set");
        }
    }
}
