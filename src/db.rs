use anyhow::{Context, Result};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use std::time::Duration;

use crate::config::Config;

/// Builds the connection pool. Connections are opened on first use, so a
/// server can start while the database is still down and report it through
/// `/health`.
pub fn connect(config: &Config) -> Result<MySqlPool> {
    let pool = MySqlPoolOptions::new()
        .max_connections(config.db.max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect_lazy(&config.db.url)
        .with_context(|| "Invalid database URL in [db].url")?;

    Ok(pool)
}
