use itertools::Itertools;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{query_scalar, Pool, Postgres};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_PORT: u16 = 5432;

#[derive(Debug, Snafu)]
pub enum ConnectionError {
    #[snafu(display("Invalid host reference {:?}: expected host or host:port", value))]
    InvalidHost { value: String },

    #[snafu(display("Failed to connect to {}: {}", host, source))]
    Connect { host: HostRef, source: sqlx::Error },

    #[snafu(display("Failed to determine role of {}: {}", host, source))]
    Role { host: HostRef, source: sqlx::Error },

    #[snafu(display("No reachable host in cluster"))]
    EmptyTopology,

    #[snafu(display("None of the reachable hosts is a primary: {}", hosts.iter().join(", ")))]
    NoPrimary { hosts: Vec<HostRef> },

    #[snafu(display("More than one host claims to be the primary: {}", hosts.iter().join(", ")))]
    MultiplePrimaries { hosts: Vec<HostRef> },
}

type Result<T, E = ConnectionError> = std::result::Result<T, E>;

/// A connection endpoint. Two refs are the same host when `host:port` match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HostRef {
    host: String,
    port: u16,
}

impl HostRef {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for HostRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for HostRef {
    type Err = ConnectionError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ConnectionError::InvalidHost {
            value: s.to_string(),
        };
        let (host, port) = match s.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
            None => (s, DEFAULT_PORT),
        };
        if host.trim().is_empty() || host.contains(char::is_whitespace) {
            return Err(invalid());
        }
        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for HostRef {
    type Error = ConnectionError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<HostRef> for String {
    fn from(host: HostRef) -> Self {
        host.to_string()
    }
}

/// Everything needed to open pools against every host of one cluster.
#[derive(Debug, Clone)]
pub struct ConnectionCredentials {
    pub hosts: Vec<HostRef>,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl ConnectionCredentials {
    pub fn connect_options(&self, host: &HostRef) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&host.host)
            .port(host.port)
            .username(&self.username)
            .password(&self.password)
            .database(&self.database)
    }
}

/// A pool bound to one host.
#[derive(Debug, Clone)]
pub struct PgConnection {
    host: HostRef,
    pool: Pool<Postgres>,
}

impl PgConnection {
    pub async fn connect(credentials: &ConnectionCredentials, host: HostRef) -> Result<Self> {
        debug!("Connecting to PostgreSQL at {}", host);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(credentials.connect_options(&host))
            .await
            .context(ConnectSnafu { host: host.clone() })?;

        Ok(Self { host, pool })
    }

    pub fn from_pool(host: HostRef, pool: Pool<Postgres>) -> Self {
        Self { host, pool }
    }

    pub fn host(&self) -> &HostRef {
        &self.host
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    /// A primary is the host that is not in recovery.
    pub async fn is_primary(&self) -> Result<bool> {
        query_scalar::<_, bool>("SELECT NOT pg_is_in_recovery()")
            .fetch_one(&self.pool)
            .await
            .context(RoleSnafu {
                host: self.host.clone(),
            })
    }
}

/// Which host is the primary and which are standbys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterTopology {
    pub primary: HostRef,
    pub standbys: BTreeSet<HostRef>,
}

impl ClusterTopology {
    pub fn hosts(&self) -> impl Iterator<Item = &HostRef> {
        std::iter::once(&self.primary).chain(self.standbys.iter())
    }
}

/// Pools to every reachable host of a cluster, with the primary singled out.
#[derive(Debug, Clone)]
pub struct HighAvailabilityConnection {
    primary: PgConnection,
    standbys: Vec<PgConnection>,
}

impl HighAvailabilityConnection {
    /// Connects to every host and asks each whether it is the primary.
    ///
    /// Unreachable hosts are skipped; the call fails when no host is
    /// reachable or when the reachable hosts do not contain exactly one
    /// primary.
    pub async fn connect(credentials: &ConnectionCredentials) -> Result<Self> {
        let hosts: BTreeSet<HostRef> = credentials.hosts.iter().cloned().collect();
        let attempts = futures::future::join_all(
            hosts
                .into_iter()
                .map(|host| determine_role(credentials, host)),
        )
        .await;

        let mut primaries = Vec::new();
        let mut standbys = Vec::new();
        for attempt in attempts {
            match attempt {
                Ok((connection, true)) => primaries.push(connection),
                Ok((connection, false)) => standbys.push(connection),
                Err(err) => warn!("Skipping host: {err}"),
            }
        }

        let primary = match primaries.len() {
            0 if standbys.is_empty() => return EmptyTopologySnafu.fail(),
            0 => {
                return NoPrimarySnafu {
                    hosts: standbys.iter().map(|c| c.host.clone()).collect::<Vec<_>>(),
                }
                .fail()
            }
            1 => primaries.remove(0),
            _ => {
                return MultiplePrimariesSnafu {
                    hosts: primaries.iter().map(|c| c.host.clone()).collect::<Vec<_>>(),
                }
                .fail()
            }
        };

        info!(
            primary = %primary.host,
            standbys = standbys.len(),
            "Cluster topology discovered"
        );

        Ok(Self { primary, standbys })
    }

    pub fn new(primary: PgConnection, standbys: Vec<PgConnection>) -> Self {
        Self { primary, standbys }
    }

    pub fn primary(&self) -> &PgConnection {
        &self.primary
    }

    pub fn standbys(&self) -> &[PgConnection] {
        &self.standbys
    }

    pub fn all_hosts(&self) -> impl Iterator<Item = &PgConnection> {
        std::iter::once(&self.primary).chain(self.standbys.iter())
    }

    pub fn topology(&self) -> ClusterTopology {
        ClusterTopology {
            primary: self.primary.host.clone(),
            standbys: self.standbys.iter().map(|c| c.host.clone()).collect(),
        }
    }

    /// Closes every pool.
    pub async fn close(&self) {
        for connection in self.all_hosts() {
            connection.pool.close().await;
        }
    }
}

async fn determine_role(
    credentials: &ConnectionCredentials,
    host: HostRef,
) -> Result<(PgConnection, bool)> {
    let connection = PgConnection::connect(credentials, host).await?;
    let is_primary = connection.is_primary().await?;
    debug!(host = %connection.host, is_primary, "Host role determined");
    Ok((connection, is_primary))
}
