use crate::connection::{ConnectionCredentials, HostRef};
use crate::context::{ContextError, SchemaContext, DEFAULT_BLOAT_PERCENTAGE_THRESHOLD};
use crate::exclusions::Exclusions;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt, Snafu};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    #[snafu(display("Failed to read config file: {}", source))]
    FileRead { source: std::io::Error },

    #[snafu(display("Failed to parse YAML config: {}", source))]
    YamlParse { source: serde_yaml::Error },

    #[snafu(display("Invalid compute spec format: {}", spec))]
    InvalidComputeSpec { spec: String },

    #[snafu(display("Server specification needs at least one CPU core and some memory"))]
    EmptyServer,

    #[snafu(display("{} {:?} of memory does not fit in 64 bits", amount, unit))]
    MemoryOverflow { amount: u64, unit: MemoryUnit },

    #[snafu(display("Invalid schema settings: {}", source))]
    InvalidSchema { source: ContextError },

    #[snafu(display("Cluster for database {} lists no hosts", database))]
    NoHosts { database: String },
}

type Result<T, E = ConfigError> = std::result::Result<T, E>;

/// One cluster to check, as read from a YAML list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    pub hosts: Vec<HostRef>,
    pub database: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_schemas")]
    pub schemas: Vec<SchemaContext>,
    #[serde(default = "default_bloat_percentage_threshold")]
    pub bloat_percentage_threshold: u16,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub exclusions: Exclusions,
    #[serde(default)]
    pub compute: Option<String>,
    #[serde(default = "default_ssd")]
    pub ssd: bool,
}

fn default_schemas() -> Vec<SchemaContext> {
    vec![SchemaContext::of_default()]
}

fn default_bloat_percentage_threshold() -> u16 {
    DEFAULT_BLOAT_PERCENTAGE_THRESHOLD.into()
}

fn default_ssd() -> bool {
    true
}

impl ClusterConfig {
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Vec<Self>> {
        let content = fs::read_to_string(path).context(FileReadSnafu)?;
        let configs: Vec<ClusterConfig> =
            serde_yaml::from_str(&content).context(YamlParseSnafu)?;
        for config in &configs {
            config.validate()?;
        }
        Ok(configs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() {
            return NoHostsSnafu {
                database: self.database.clone(),
            }
            .fail();
        }
        self.contexts()?;
        self.server_specification()?;
        Ok(())
    }

    pub fn credentials(&self) -> ConnectionCredentials {
        ConnectionCredentials {
            hosts: self.hosts.clone(),
            database: self.database.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }

    /// Schema contexts carrying the configured bloat threshold.
    pub fn contexts(&self) -> Result<Vec<SchemaContext>> {
        self.schemas
            .iter()
            .cloned()
            .map(|ctx| ctx.with_bloat_percentage_threshold(self.bloat_percentage_threshold))
            .collect::<std::result::Result<Vec<_>, _>>()
            .context(InvalidSchemaSnafu)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn server_specification(&self) -> Result<Option<ServerSpecification>> {
        self.compute
            .as_deref()
            .map(|spec| ServerSpecification::from_string(spec, self.ssd))
            .transpose()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryUnit {
    Kb,
    Mb,
    Gb,
}

impl MemoryUnit {
    /// `None` when the result does not fit in a `u64`.
    pub fn to_bytes(self, amount: u64) -> Option<u64> {
        let factor: u64 = match self {
            MemoryUnit::Kb => 1024,
            MemoryUnit::Mb => 1024 * 1024,
            MemoryUnit::Gb => 1024 * 1024 * 1024,
        };
        amount.checked_mul(factor)
    }
}

/// Hardware the database server runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServerSpecification {
    cpu_cores: u32,
    memory_bytes: u64,
    has_ssd: bool,
}

impl ServerSpecification {
    pub fn new(cpu_cores: u32, memory_bytes: u64, has_ssd: bool) -> Result<Self> {
        if cpu_cores == 0 || memory_bytes == 0 {
            return EmptyServerSnafu.fail();
        }
        Ok(Self {
            cpu_cores,
            memory_bytes,
            has_ssd,
        })
    }

    pub fn with_memory(cpu_cores: u32, amount: u64, unit: MemoryUnit, has_ssd: bool) -> Result<Self> {
        let memory_bytes = unit.to_bytes(amount).context(MemoryOverflowSnafu { amount, unit })?;
        Self::new(cpu_cores, memory_bytes, has_ssd)
    }

    /// Accepts `small`, `medium`, `large` or `<vCPU>vCPU-<GB>GB`, case-insensitive.
    pub fn from_string(spec: &str, has_ssd: bool) -> Result<Self> {
        let invalid = || ConfigError::InvalidComputeSpec {
            spec: spec.to_string(),
        };

        let (cpu_cores, memory_gb) = match spec.to_lowercase().as_str() {
            "small" => (2, 16),
            "medium" => (8, 64),
            "large" => (32, 256),
            lowered => {
                let (vcpu_part, memory_part) = lowered.split_once('-').ok_or_else(invalid)?;
                let cpu_cores = vcpu_part
                    .trim_end_matches("vcpu")
                    .parse::<u32>()
                    .map_err(|_| invalid())?;
                let memory_gb = memory_part
                    .trim_end_matches("gb")
                    .parse::<u64>()
                    .map_err(|_| invalid())?;
                (cpu_cores, memory_gb)
            }
        };

        Self::with_memory(cpu_cores, memory_gb, MemoryUnit::Gb, has_ssd).map_err(|_| invalid())
    }

    pub fn cpu_cores(&self) -> u32 {
        self.cpu_cores
    }

    pub fn memory_bytes(&self) -> u64 {
        self.memory_bytes
    }

    pub fn has_ssd(&self) -> bool {
        self.has_ssd
    }
}
