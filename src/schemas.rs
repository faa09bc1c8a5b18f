use crate::cluster::{ClusterAggregator, ClusterOutcome};
use crate::context::SchemaContext;
use crate::diagnostics::Diagnostic;
use crate::health::{HealthError, SchemaSnafu};
use snafu::ResultExt;

type Result<T, E = HealthError> = std::result::Result<T, E>;

/// Repeats a cluster-aggregated diagnostic for every schema context.
///
/// Contexts run one after another in the order given; each context's slice
/// keeps its own sort order and slices are concatenated without
/// deduplication, since qualified names already differ between schemas.
#[derive(Clone)]
pub struct SchemaSetAggregator {
    cluster: ClusterAggregator,
}

impl SchemaSetAggregator {
    pub fn new(cluster: ClusterAggregator) -> Self {
        Self { cluster }
    }

    pub fn cluster(&self) -> &ClusterAggregator {
        &self.cluster
    }

    pub async fn run<D: Diagnostic>(&self, contexts: &[SchemaContext]) -> Result<Vec<D::Record>> {
        Ok(self.run_detailed::<D>(contexts).await?.records)
    }

    pub async fn run_detailed<D: Diagnostic>(
        &self,
        contexts: &[SchemaContext],
    ) -> Result<ClusterOutcome<D::Record>> {
        let mut records = Vec::new();
        let mut skipped_hosts = Vec::new();

        for ctx in contexts {
            let outcome = self
                .cluster
                .run_detailed::<D>(ctx)
                .await
                .context(SchemaSnafu {
                    schema: ctx.schema_name(),
                })?;
            records.extend(outcome.records);
            skipped_hosts.extend(outcome.skipped_hosts);
        }

        skipped_hosts.sort();
        skipped_hosts.dedup();
        Ok(ClusterOutcome {
            records,
            skipped_hosts,
        })
    }
}
