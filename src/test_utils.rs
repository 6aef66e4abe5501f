pub mod test_helpers {
    use std::sync::Arc;

    use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

    use crate::config::{Config, DatabaseSection, PollingSection};
    use crate::AppState;

    /// Create a new in-memory SQLite database for testing
    pub async fn create_test_db() -> Result<SqlitePool, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await?;

        // Run migrations
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(pool)
    }

    /// Build a Config without touching the filesystem or environment
    pub fn test_config(admin_password: &str) -> Config {
        Config {
            admin: Default::default(),
            polling: PollingSection::default(),
            database: DatabaseSection::default(),
            services: Vec::new(),
            host: "127.0.0.1".to_string(),
            port: 0,
            admin_password: admin_password.to_string(),
            password_generated: false,
        }
    }

    /// Build a full AppState over a fresh in-memory database
    pub async fn create_test_state(admin_password: &str) -> (AppState, SqlitePool) {
        let pool = create_test_db().await.expect("test db");
        let config = Arc::new(test_config(admin_password));
        (AppState::new(config, pool.clone()), pool)
    }

    /// Shift the newest snapshot of a service into the past so the service
    /// counts as due for a check
    pub async fn backdate_latest_snapshot(
        pool: &SqlitePool,
        service_id: i64,
        seconds: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE snapshots SET created_at = created_at - ?
             WHERE id = (SELECT id FROM snapshots
                         WHERE service_id = ?
                         ORDER BY created_at DESC, id DESC LIMIT 1)",
        )
        .bind(seconds)
        .bind(service_id)
        .execute(pool)
        .await?;

        Ok(())
    }
}
