use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

const SCHEMA: &str = include_str!("../../migrations/001_create_sessions.sql");

/// Open (creating if needed) the session database and apply the schema.
pub async fn init_db(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    tracing::info!("Connecting to database: {}", database_url);

    let pool = if database_url == "sqlite::memory:" {
        // Each connection to :memory: is a separate database, so pin the pool to one
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(SqliteConnectOptions::from_str(database_url)?)
            .await?
    } else if let Some(path_str) = database_url.strip_prefix("sqlite://") {
        let path_str = path_str.split('?').next().unwrap_or(path_str);
        let path = std::path::Path::new(path_str);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
                tracing::info!("Created database directory: {}", parent.display());
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?
    } else {
        return Err(sqlx::Error::Configuration(
            "Invalid SQLite URL format".into(),
        ));
    };

    tracing::info!("Applying session schema...");
    sqlx::raw_sql(SCHEMA).execute(&pool).await?;

    Ok(pool)
}
