//! One entry point for every diagnostic over a set of schemas.

use crate::cluster::{ClusterAggregator, ClusterError, ClusterOutcome};
use crate::context::SchemaContext;
use crate::connection::HostRef;
use crate::diagnostics::{checks, DiagnosticKind};
use crate::exclusions::Exclusions;
use crate::models::{
    DuplicatedIndexes, ForeignKey, Index, IndexWithBloat, IndexWithNulls, Table, TableWithBloat,
    TableWithMissingIndex, UnusedIndex,
};
use crate::report::{Findings, HealthReport, Section, SectionOutcome};
use crate::schemas::SchemaSetAggregator;
use snafu::Snafu;
use tracing::{info, warn};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum HealthError {
    #[snafu(display("Diagnostics for schema {} failed: {}", schema, source))]
    Schema {
        schema: String,
        source: ClusterError,
    },
}

type Result<T, E = HealthError> = std::result::Result<T, E>;

#[derive(Clone)]
pub struct DatabaseHealth {
    schemas: SchemaSetAggregator,
    exclusions: Exclusions,
}

impl DatabaseHealth {
    pub fn new(cluster: ClusterAggregator) -> Self {
        Self {
            schemas: SchemaSetAggregator::new(cluster),
            exclusions: Exclusions::none(),
        }
    }

    /// Exclusions are applied by [`DatabaseHealth::collect`] only; the
    /// `get_*` methods always return everything found.
    pub fn with_exclusions(mut self, exclusions: Exclusions) -> Self {
        self.exclusions = exclusions;
        self
    }

    pub async fn get_invalid_indexes(&self, contexts: &[SchemaContext]) -> Result<Vec<Index>> {
        self.schemas.run::<checks::InvalidIndexes>(contexts).await
    }

    pub async fn get_duplicated_indexes(
        &self,
        contexts: &[SchemaContext],
    ) -> Result<Vec<DuplicatedIndexes>> {
        self.schemas.run::<checks::DuplicatedIndexes>(contexts).await
    }

    pub async fn get_intersected_indexes(
        &self,
        contexts: &[SchemaContext],
    ) -> Result<Vec<DuplicatedIndexes>> {
        self.schemas.run::<checks::IntersectedIndexes>(contexts).await
    }

    pub async fn get_unused_indexes(&self, contexts: &[SchemaContext]) -> Result<Vec<UnusedIndex>> {
        self.schemas.run::<checks::UnusedIndexes>(contexts).await
    }

    pub async fn get_foreign_keys_not_covered_with_index(
        &self,
        contexts: &[SchemaContext],
    ) -> Result<Vec<ForeignKey>> {
        self.schemas
            .run::<checks::ForeignKeysWithoutIndex>(contexts)
            .await
    }

    pub async fn get_tables_with_missing_indexes(
        &self,
        contexts: &[SchemaContext],
    ) -> Result<Vec<TableWithMissingIndex>> {
        self.schemas
            .run::<checks::TablesWithMissingIndexes>(contexts)
            .await
    }

    pub async fn get_tables_without_primary_key(
        &self,
        contexts: &[SchemaContext],
    ) -> Result<Vec<Table>> {
        self.schemas
            .run::<checks::TablesWithoutPrimaryKey>(contexts)
            .await
    }

    pub async fn get_indexes_with_null_values(
        &self,
        contexts: &[SchemaContext],
    ) -> Result<Vec<IndexWithNulls>> {
        self.schemas
            .run::<checks::IndexesWithNullValues>(contexts)
            .await
    }

    pub async fn get_indexes_with_bloat(
        &self,
        contexts: &[SchemaContext],
    ) -> Result<Vec<IndexWithBloat>> {
        self.schemas.run::<checks::IndexesBloat>(contexts).await
    }

    pub async fn get_tables_with_bloat(
        &self,
        contexts: &[SchemaContext],
    ) -> Result<Vec<TableWithBloat>> {
        self.schemas.run::<checks::TablesBloat>(contexts).await
    }

    /// Runs the selected kinds over every context.
    ///
    /// Kinds are independent: a kind that fails is recorded as failed in its
    /// section and the remaining kinds still run.
    pub async fn collect(
        &self,
        kinds: &[DiagnosticKind],
        contexts: &[SchemaContext],
    ) -> HealthReport {
        let mut sections = Vec::with_capacity(kinds.len());
        for &kind in kinds {
            let outcome = match self.collect_kind(kind, contexts).await {
                Ok((records, skipped_hosts)) => {
                    info!(%kind, count = records.len(), "Diagnostic completed");
                    SectionOutcome::Completed {
                        records: self.exclusions.apply(kind, records),
                        skipped_hosts,
                    }
                }
                Err(err) => {
                    warn!(%kind, "Diagnostic failed: {err}");
                    SectionOutcome::Failed {
                        error: err.to_string(),
                    }
                }
            };
            sections.push(Section { kind, outcome });
        }

        HealthReport {
            primary: self.schemas.cluster().topology().primary,
            schemas: contexts.iter().map(|c| c.schema_name().to_string()).collect(),
            sections,
        }
    }

    async fn collect_kind(
        &self,
        kind: DiagnosticKind,
        contexts: &[SchemaContext],
    ) -> Result<(Findings, Vec<HostRef>)> {
        macro_rules! run {
            ($marker:ty, $variant:ident) => {{
                let ClusterOutcome {
                    records,
                    skipped_hosts,
                } = self.schemas.run_detailed::<$marker>(contexts).await?;
                (Findings::$variant(records), skipped_hosts)
            }};
        }

        Ok(match kind {
            DiagnosticKind::InvalidIndexes => run!(checks::InvalidIndexes, Indexes),
            DiagnosticKind::DuplicatedIndexes => {
                run!(checks::DuplicatedIndexes, DuplicatedIndexes)
            }
            DiagnosticKind::IntersectedIndexes => {
                run!(checks::IntersectedIndexes, DuplicatedIndexes)
            }
            DiagnosticKind::UnusedIndexes => run!(checks::UnusedIndexes, UnusedIndexes),
            DiagnosticKind::ForeignKeysWithoutIndex => {
                run!(checks::ForeignKeysWithoutIndex, ForeignKeys)
            }
            DiagnosticKind::TablesWithMissingIndexes => {
                run!(checks::TablesWithMissingIndexes, TablesWithMissingIndexes)
            }
            DiagnosticKind::TablesWithoutPrimaryKey => {
                run!(checks::TablesWithoutPrimaryKey, Tables)
            }
            DiagnosticKind::IndexesWithNullValues => {
                run!(checks::IndexesWithNullValues, IndexesWithNulls)
            }
            DiagnosticKind::IndexesBloat => run!(checks::IndexesBloat, IndexesWithBloat),
            DiagnosticKind::TablesBloat => run!(checks::TablesBloat, TablesWithBloat),
        })
    }
}
