//! Fan-out of one diagnostic across the hosts of a cluster.

use crate::connection::{ClusterTopology, HighAvailabilityConnection, HostRef};
use crate::context::SchemaContext;
use crate::diagnostics::{
    self, DeadlineExceededSnafu, Diagnostic, DiagnosticKind, HostDiagnosticPort, MergePolicy,
    PgHostDiagnostics,
};
use crate::models::DiagnosticRecord;
use itertools::Itertools;
use snafu::Snafu;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Snafu)]
pub enum ClusterError {
    #[snafu(display(
        "{} could not be collected from the cluster (failed hosts: {}): {}",
        kind,
        hosts_failed.iter().join(", "),
        reason
    ))]
    PartialClusterFailure {
        kind: DiagnosticKind,
        hosts_failed: Vec<HostRef>,
        reason: String,
    },
}

type Result<T, E = ClusterError> = std::result::Result<T, E>;

/// Merged records plus the standbys that had to be left out.
#[derive(Debug, Clone)]
pub struct ClusterOutcome<R> {
    pub records: Vec<R>,
    pub skipped_hosts: Vec<HostRef>,
}

/// Runs diagnostics on the primary and, for usage-based kinds, on every
/// standby, then merges the answers by record identity.
#[derive(Clone)]
pub struct ClusterAggregator {
    primary: Arc<dyn HostDiagnosticPort>,
    standbys: Vec<Arc<dyn HostDiagnosticPort>>,
    deadline: Option<Duration>,
    max_failed_standbys: Option<usize>,
}

impl ClusterAggregator {
    pub fn new(
        primary: Arc<dyn HostDiagnosticPort>,
        standbys: Vec<Arc<dyn HostDiagnosticPort>>,
    ) -> Self {
        Self {
            primary,
            standbys,
            deadline: None,
            max_failed_standbys: None,
        }
    }

    pub fn from_connection(connection: &HighAvailabilityConnection) -> Self {
        let port = |c: &crate::connection::PgConnection| -> Arc<dyn HostDiagnosticPort> {
            Arc::new(PgHostDiagnostics::new(c.clone()))
        };
        Self::new(
            port(connection.primary()),
            connection.standbys().iter().map(port).collect(),
        )
    }

    /// Per host call deadline. A primary that misses it fails the kind; a
    /// standby that misses it is skipped.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// How many standbys may fail before the merged answer is not trusted.
    pub fn with_max_failed_standbys(mut self, max: usize) -> Self {
        self.max_failed_standbys = Some(max);
        self
    }

    pub fn topology(&self) -> ClusterTopology {
        ClusterTopology {
            primary: self.primary.host().clone(),
            standbys: self.standbys.iter().map(|s| s.host().clone()).collect(),
        }
    }

    pub async fn run<D: Diagnostic>(&self, ctx: &SchemaContext) -> Result<Vec<D::Record>> {
        Ok(self.run_detailed::<D>(ctx).await?.records)
    }

    pub async fn run_detailed<D: Diagnostic>(
        &self,
        ctx: &SchemaContext,
    ) -> Result<ClusterOutcome<D::Record>> {
        let kind = D::KIND;
        let policy = kind.merge_policy();

        let primary = match self.call::<D>(self.primary.as_ref(), ctx).await {
            Ok(records) => records,
            Err(err) => {
                return PartialClusterFailureSnafu {
                    kind,
                    hosts_failed: vec![err.host().clone()],
                    reason: err.to_string(),
                }
                .fail()
            }
        };

        if policy == MergePolicy::PrimaryOnly || self.standbys.is_empty() {
            return Ok(ClusterOutcome {
                records: merge(policy, vec![primary]),
                skipped_hosts: Vec::new(),
            });
        }

        let responses = futures::future::join_all(
            self.standbys
                .iter()
                .map(|standby| self.call::<D>(standby.as_ref(), ctx)),
        )
        .await;

        let mut answers = vec![primary];
        let mut skipped_hosts = Vec::new();
        for response in responses {
            match response {
                Ok(records) => answers.push(records),
                Err(err) => {
                    warn!(host = %err.host(), %kind, "Skipping standby: {err}");
                    skipped_hosts.push(err.host().clone());
                }
            }
        }
        skipped_hosts.sort();

        if let Some(max) = self.max_failed_standbys {
            if skipped_hosts.len() > max {
                return PartialClusterFailureSnafu {
                    kind,
                    reason: format!(
                        "{} of {} standbys failed, at most {} tolerated",
                        skipped_hosts.len(),
                        self.standbys.len(),
                        max
                    ),
                    hosts_failed: skipped_hosts,
                }
                .fail();
            }
        }

        Ok(ClusterOutcome {
            records: merge(policy, answers),
            skipped_hosts,
        })
    }

    async fn call<D: Diagnostic>(
        &self,
        port: &dyn HostDiagnosticPort,
        ctx: &SchemaContext,
    ) -> diagnostics::Result<Vec<D::Record>> {
        let result = match self.deadline {
            Some(deadline) => tokio::time::timeout(deadline, D::run(port, ctx))
                .await
                .unwrap_or_else(|_| {
                    DeadlineExceededSnafu {
                        host: port.host().clone(),
                        kind: D::KIND,
                        deadline,
                    }
                    .fail()
                }),
            None => D::run(port, ctx).await,
        };
        if let Ok(records) = &result {
            debug!(
                host = %port.host(),
                kind = %D::KIND,
                schema = ctx.schema_name(),
                rows = records.len(),
                "Host answered"
            );
        }
        result
    }
}

/// Merges per-host answers by identity. `answers[0]` is the primary.
///
/// Equal identities are folded with [`DiagnosticRecord::combine`], primary
/// first. Under [`MergePolicy::Intersection`] only identities reported by
/// every answer survive. The output is sorted.
pub(crate) fn merge<R: DiagnosticRecord>(policy: MergePolicy, answers: Vec<Vec<R>>) -> Vec<R> {
    let answered = answers.len();

    let mut tagged: Vec<(usize, R)> = answers
        .into_iter()
        .enumerate()
        .flat_map(|(host, records)| records.into_iter().map(move |record| (host, record)))
        .collect();
    tagged.sort_by(|(ha, a), (hb, b)| a.cmp(b).then(ha.cmp(hb)));

    tagged
        .into_iter()
        .map(|(host, record)| (1usize, host, record))
        .coalesce(|(seen, last, mut kept), (seen_b, host, other)| {
            if kept == other {
                kept.combine(&other);
                let seen = if host == last { seen } else { seen + 1 };
                Ok((seen, host, kept))
            } else {
                Err(((seen, last, kept), (seen_b, host, other)))
            }
        })
        .filter(|(seen, _, _)| policy != MergePolicy::Intersection || *seen == answered)
        .map(|(_, _, record)| record)
        .collect()
}
