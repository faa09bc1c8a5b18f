//! Server parameters worth tuning and the ones still left at their defaults.

use crate::config::ServerSpecification;
use crate::connection::PgConnection;
use serde::Serialize;
use snafu::{ResultExt, Snafu};
use sqlx::Row;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use tracing::debug;

#[derive(Debug, Snafu)]
pub enum SettingsError {
    #[snafu(display("Failed to execute query: {}", query))]
    QueryError { query: String, source: sqlx::Error },

    #[snafu(display("Parameter name cannot be blank"))]
    BlankParamName,
}

type Result<T, E = SettingsError> = std::result::Result<T, E>;

/// A server parameter as reported by `pg_settings`. Identity is the name.
#[derive(Debug, Clone, Serialize)]
pub struct PgParam {
    name: String,
    value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit: Option<String>,
}

impl PgParam {
    /// The value is trimmed; a whitespace-only value becomes empty.
    pub fn new(name: impl Into<String>, value: impl AsRef<str>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return BlankParamNameSnafu.fail();
        }
        Ok(Self {
            name,
            value: value.as_ref().trim().to_string(),
            unit: None,
        })
    }

    pub fn with_unit(mut self, unit: Option<String>) -> Self {
        self.unit = unit.filter(|u| !u.trim().is_empty());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }
}

impl PartialEq for PgParam {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for PgParam {}

impl Hash for PgParam {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// Parameters that almost always need a non-default value in production.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportantParam {
    SharedBuffers,
    WorkMem,
    MaintenanceWorkMem,
    RandomPageCost,
    LogMinDurationStatement,
    IdleInTransactionSessionTimeout,
    StatementTimeout,
    LockTimeout,
    EffectiveCacheSize,
    TempFileLimit,
}

impl ImportantParam {
    pub const ALL: [ImportantParam; 10] = [
        ImportantParam::SharedBuffers,
        ImportantParam::WorkMem,
        ImportantParam::MaintenanceWorkMem,
        ImportantParam::RandomPageCost,
        ImportantParam::LogMinDurationStatement,
        ImportantParam::IdleInTransactionSessionTimeout,
        ImportantParam::StatementTimeout,
        ImportantParam::LockTimeout,
        ImportantParam::EffectiveCacheSize,
        ImportantParam::TempFileLimit,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ImportantParam::SharedBuffers => "shared_buffers",
            ImportantParam::WorkMem => "work_mem",
            ImportantParam::MaintenanceWorkMem => "maintenance_work_mem",
            ImportantParam::RandomPageCost => "random_page_cost",
            ImportantParam::LogMinDurationStatement => "log_min_duration_statement",
            ImportantParam::IdleInTransactionSessionTimeout => {
                "idle_in_transaction_session_timeout"
            }
            ImportantParam::StatementTimeout => "statement_timeout",
            ImportantParam::LockTimeout => "lock_timeout",
            ImportantParam::EffectiveCacheSize => "effective_cache_size",
            ImportantParam::TempFileLimit => "temp_file_limit",
        }
    }

    /// Built-in default, in the unit `pg_settings.setting` uses.
    pub fn default_value(&self) -> &'static str {
        match self {
            ImportantParam::SharedBuffers => "16384",
            ImportantParam::WorkMem => "4096",
            ImportantParam::MaintenanceWorkMem => "65536",
            ImportantParam::RandomPageCost => "4",
            ImportantParam::LogMinDurationStatement => "-1",
            ImportantParam::IdleInTransactionSessionTimeout => "0",
            ImportantParam::StatementTimeout => "0",
            ImportantParam::LockTimeout => "0",
            ImportantParam::EffectiveCacheSize => "524288",
            ImportantParam::TempFileLimit => "-1",
        }
    }
}

/// Important parameters whose current value equals the built-in default.
///
/// `random_page_cost` only matters on SSD servers. Parameters missing from
/// `current` are skipped.
pub fn params_at_default(
    current: &BTreeMap<String, PgParam>,
    server: &ServerSpecification,
) -> Vec<PgParam> {
    ImportantParam::ALL
        .iter()
        .filter(|p| server.has_ssd() || **p != ImportantParam::RandomPageCost)
        .filter_map(|p| {
            current
                .get(p.name())
                .filter(|param| param.value() == p.default_value())
        })
        .cloned()
        .collect()
}

/// Reads `pg_settings` from one host.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    connection: PgConnection,
}

impl ServerSettings {
    pub fn new(connection: PgConnection) -> Self {
        Self { connection }
    }

    pub async fn current_values(&self) -> Result<BTreeMap<String, PgParam>> {
        const QUERY: &str = r#"
            SELECT
                name,
                setting,
                unit
            FROM pg_catalog.pg_settings
            ORDER BY name
        "#;

        let rows = sqlx::query(QUERY)
            .fetch_all(self.connection.pool())
            .await
            .context(QuerySnafu { query: QUERY })?;

        let mut params = BTreeMap::new();
        for row in rows {
            let name: String = row.try_get("name").context(QuerySnafu { query: QUERY })?;
            let value: Option<String> = row.try_get("setting").context(QuerySnafu { query: QUERY })?;
            let unit: Option<String> = row.try_get("unit").context(QuerySnafu { query: QUERY })?;
            let param = PgParam::new(name, value.unwrap_or_default())?.with_unit(unit);
            params.insert(param.name().to_string(), param);
        }

        debug!(host = %self.connection.host(), "Fetched {} configuration parameters", params.len());
        Ok(params)
    }

    pub async fn param_value(&self, param: ImportantParam) -> Result<Option<PgParam>> {
        Ok(self.current_values().await?.remove(param.name()))
    }

    pub async fn params_with_default_values(
        &self,
        server: &ServerSpecification,
    ) -> Result<Vec<PgParam>> {
        Ok(params_at_default(&self.current_values().await?, server))
    }
}
