use clap::{Args, Parser, Subcommand};
use pghealth::cluster::ClusterAggregator;
use pghealth::config::{ClusterConfig, ServerSpecification};
use pghealth::connection::{ConnectionCredentials, HighAvailabilityConnection, HostRef};
use pghealth::context::{SchemaContext, DEFAULT_BLOAT_PERCENTAGE_THRESHOLD};
use pghealth::diagnostics::DiagnosticKind;
use pghealth::exclusions::Exclusions;
use pghealth::health::DatabaseHealth;
use pghealth::management::DatabaseManagement;
use pghealth::reporter::{ReportFormat, Reporter};
use pghealth::settings::ServerSettings;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// PostgreSQL index and table health checks across a primary and its standbys
#[derive(Parser, Debug)]
#[command(name = "pghealth")]
#[command(version)]
#[command(about = "PostgreSQL index and table health checker")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(short = 'f', long = "format", value_enum, default_value = "markdown", global = true)]
    format: ReportFormat,

    /// Enable verbose logging
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Args, Debug)]
struct ConnectionArgs {
    /// Cluster hosts as host or host:port, primary and standbys in any order
    #[arg(
        short = 'H',
        long = "host",
        env = "POSTGRES_HOSTS",
        value_delimiter = ',',
        default_value = "localhost"
    )]
    hosts: Vec<HostRef>,

    /// Database name
    #[arg(short = 'd', long = "database", env = "POSTGRES_DB")]
    database: String,

    /// Username
    #[arg(short = 'u', long = "username", env = "POSTGRES_USER")]
    username: String,

    /// Password
    #[arg(short = 'p', long = "password", env = "POSTGRES_PASSWORD")]
    password: String,
}

impl ConnectionArgs {
    fn credentials(&self) -> ConnectionCredentials {
        ConnectionCredentials {
            hosts: self.hosts.clone(),
            database: self.database.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run health diagnostics against one cluster
    Check {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// Schemas to check
        #[arg(short = 's', long = "schema", value_delimiter = ',', default_value = "public")]
        schemas: Vec<SchemaContext>,

        /// Diagnostics to run, all when omitted
        #[arg(short = 'k', long = "kind", value_enum, value_delimiter = ',')]
        kinds: Vec<DiagnosticKind>,

        /// Bloat percentage below which bloat is not reported
        #[arg(long = "bloat-threshold", default_value_t = u16::from(DEFAULT_BLOAT_PERCENTAGE_THRESHOLD))]
        bloat_threshold: u16,

        /// YAML file with findings to exclude
        #[arg(long = "exclusions")]
        exclusions: Option<String>,

        /// Per host deadline in seconds
        #[arg(long = "timeout-secs")]
        timeout_secs: Option<u64>,
    },
    /// Check every cluster listed in a YAML config file
    Config {
        /// Path to config file
        #[arg(short = 'c', long = "config")]
        config_path: String,
    },
    /// List important server parameters still at their default value
    Settings {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// Compute size: small, medium, large, or <vCPU>vCPU-<GB>GB
        #[arg(short = 'c', long = "compute", default_value = "small")]
        compute: String,

        /// Data lives on spinning disks
        #[arg(long = "hdd", default_value_t = false)]
        hdd: bool,
    },
    /// Reset statistics counters on every host
    ResetStats {
        #[command(flatten)]
        connection: ConnectionArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let reporter = Reporter::new(cli.format);

    match cli.command {
        Commands::Check {
            connection,
            schemas,
            kinds,
            bloat_threshold,
            exclusions,
            timeout_secs,
        } => {
            let contexts = schemas
                .into_iter()
                .map(|ctx| ctx.with_bloat_percentage_threshold(bloat_threshold))
                .collect::<Result<Vec<_>, _>>()?;
            let exclusions = match exclusions {
                Some(path) => Exclusions::from_file(path)?,
                None => Exclusions::none(),
            };
            let kinds = if kinds.is_empty() {
                DiagnosticKind::ALL.to_vec()
            } else {
                kinds
            };

            let failed = check_cluster(
                &connection.credentials(),
                &contexts,
                &kinds,
                exclusions,
                timeout_secs.map(Duration::from_secs),
                &reporter,
            )
            .await?;
            if failed {
                anyhow::bail!("Some diagnostics failed, see the report for details");
            }
        }
        Commands::Config { config_path } => {
            info!("Loading config from: {}", config_path);
            let configs = ClusterConfig::from_config_file(&config_path)?;

            let mut failed = false;
            for config in configs {
                info!("Checking database: {}", config.database);
                let contexts = config.contexts()?;
                match check_cluster(
                    &config.credentials(),
                    &contexts,
                    &DiagnosticKind::ALL,
                    config.exclusions.clone(),
                    config.deadline(),
                    &reporter,
                )
                .await
                {
                    Ok(cluster_failed) => failed |= cluster_failed,
                    Err(err) => {
                        warn!(database = %config.database, "Cluster check failed: {err:#}");
                        failed = true;
                    }
                }

                if let Some(server) = config.server_specification()? {
                    if let Err(err) =
                        report_settings(&config.credentials(), &server, &reporter).await
                    {
                        warn!(database = %config.database, "Settings check failed: {err:#}");
                        failed = true;
                    }
                }
            }
            if failed {
                anyhow::bail!("Some clusters could not be fully checked");
            }
        }
        Commands::Settings {
            connection,
            compute,
            hdd,
        } => {
            let server = ServerSpecification::from_string(&compute, !hdd)?;
            report_settings(&connection.credentials(), &server, &reporter).await?;
        }
        Commands::ResetStats { connection } => {
            let cluster = HighAvailabilityConnection::connect(&connection.credentials()).await?;
            let management = DatabaseManagement::new(cluster.clone());
            let previous = management.last_stats_reset_timestamp().await?;
            info!(?previous, "Last statistics reset");
            let reset = management.reset_statistics().await;
            cluster.close().await;
            if !reset {
                anyhow::bail!("Statistics were not reset on every host");
            }
            println!("Statistics reset on {} host(s)", cluster.topology().hosts().count());
        }
    }

    Ok(())
}

/// Connects, runs the kinds and prints the report. Returns whether any kind failed.
async fn check_cluster(
    credentials: &ConnectionCredentials,
    contexts: &[SchemaContext],
    kinds: &[DiagnosticKind],
    exclusions: Exclusions,
    deadline: Option<Duration>,
    reporter: &Reporter,
) -> anyhow::Result<bool> {
    let connection = HighAvailabilityConnection::connect(credentials).await?;

    let mut aggregator = ClusterAggregator::from_connection(&connection);
    if let Some(deadline) = deadline {
        aggregator = aggregator.with_deadline(deadline);
    }

    let health = DatabaseHealth::new(aggregator).with_exclusions(exclusions);
    let report = health.collect(kinds, contexts).await;
    connection.close().await;

    reporter.report(&report)?;
    Ok(report.has_failures())
}

async fn report_settings(
    credentials: &ConnectionCredentials,
    server: &ServerSpecification,
    reporter: &Reporter,
) -> anyhow::Result<()> {
    let connection = HighAvailabilityConnection::connect(credentials).await?;
    let params = ServerSettings::new(connection.primary().clone())
        .params_with_default_values(server)
        .await;
    connection.close().await;

    reporter.report_settings(&params?)?;
    Ok(())
}
