use crate::connection::{HighAvailabilityConnection, HostRef, PgConnection};
use chrono::{DateTime, Utc};
use snafu::{ResultExt, Snafu};
use tracing::{info, warn};

#[derive(Debug, Snafu)]
pub enum ManagementError {
    #[snafu(display("Failed to read statistics reset time on {}: {}", host, source))]
    StatsResetQuery { host: HostRef, source: sqlx::Error },
}

type Result<T, E = ManagementError> = std::result::Result<T, E>;

/// Administrative actions on the statistics collector.
#[derive(Debug, Clone)]
pub struct DatabaseManagement {
    connection: HighAvailabilityConnection,
}

impl DatabaseManagement {
    pub fn new(connection: HighAvailabilityConnection) -> Self {
        Self { connection }
    }

    /// Resets statistics counters on every host. Returns `true` only when
    /// every host accepted the reset.
    pub async fn reset_statistics(&self) -> bool {
        let results =
            futures::future::join_all(self.connection.all_hosts().map(reset_on_host)).await;
        let failed = results.iter().filter(|ok| !**ok).count();
        if failed > 0 {
            warn!(failed, "Statistics were not reset on every host");
        }
        failed == 0
    }

    /// When statistics of the current database were last reset on the primary.
    pub async fn last_stats_reset_timestamp(&self) -> Result<Option<DateTime<Utc>>> {
        const QUERY: &str = r#"
            SELECT stats_reset
            FROM pg_catalog.pg_stat_database
            WHERE datname = current_database()
        "#;

        let primary = self.connection.primary();
        let reset: Option<Option<DateTime<Utc>>> = sqlx::query_scalar(QUERY)
            .fetch_optional(primary.pool())
            .await
            .context(StatsResetQuerySnafu {
                host: primary.host().clone(),
            })?;
        Ok(reset.flatten())
    }
}

async fn reset_on_host(connection: &PgConnection) -> bool {
    match sqlx::query("SELECT pg_stat_reset()")
        .execute(connection.pool())
        .await
    {
        Ok(_) => {
            info!(host = %connection.host(), "Statistics reset");
            true
        }
        Err(err) => {
            warn!(host = %connection.host(), "Failed to reset statistics: {err}");
            false
        }
    }
}
