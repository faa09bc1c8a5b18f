//! Per-host diagnostic checks.
//!
//! [`HostDiagnosticPort`] is the capability every host exposes: one method
//! per [`DiagnosticKind`], each running a single read-only catalog query
//! against exactly one host. [`Diagnostic`] maps every kind to its record
//! type and port method at compile time so the aggregators stay generic.

use crate::connection::HostRef;
use crate::context::SchemaContext;
use crate::models::{
    DiagnosticRecord, DuplicatedIndexes, ForeignKey, Index, IndexWithBloat, IndexWithNulls,
    ModelError, Table, TableWithBloat, TableWithMissingIndex, UnusedIndex,
};
use async_trait::async_trait;
use clap::ValueEnum;
use futures::future::BoxFuture;
use serde::Serialize;
use snafu::Snafu;
use std::fmt;
use std::time::Duration;

mod host;
mod indexes;
#[cfg(test)]
pub(crate) mod scripted;
mod tables;

pub use host::PgHostDiagnostics;

/// The closed set of checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Indexes left unusable by a failed concurrent build
    InvalidIndexes,
    /// Indexes with identical definitions on the same table
    DuplicatedIndexes,
    /// Indexes where one key is a prefix of another
    IntersectedIndexes,
    /// Indexes that are rarely or never scanned
    UnusedIndexes,
    /// Foreign keys without an index on their leading columns
    ForeignKeysWithoutIndex,
    /// Tables read mostly by sequential scans
    TablesWithMissingIndexes,
    /// Tables without a primary key
    TablesWithoutPrimaryKey,
    /// Indexes over nullable columns
    IndexesWithNullValues,
    /// Estimated B-tree index bloat
    IndexesBloat,
    /// Estimated heap bloat
    TablesBloat,
}

/// How results from several hosts are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Structure does not diverge across replicas; ask the primary only.
    PrimaryOnly,
    /// Report every identity seen on any host.
    Union,
    /// Report identities that every responding host reported.
    Intersection,
}

impl DiagnosticKind {
    pub const ALL: [DiagnosticKind; 10] = [
        DiagnosticKind::InvalidIndexes,
        DiagnosticKind::DuplicatedIndexes,
        DiagnosticKind::IntersectedIndexes,
        DiagnosticKind::UnusedIndexes,
        DiagnosticKind::ForeignKeysWithoutIndex,
        DiagnosticKind::TablesWithMissingIndexes,
        DiagnosticKind::TablesWithoutPrimaryKey,
        DiagnosticKind::IndexesWithNullValues,
        DiagnosticKind::IndexesBloat,
        DiagnosticKind::TablesBloat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::InvalidIndexes => "invalid_indexes",
            DiagnosticKind::DuplicatedIndexes => "duplicated_indexes",
            DiagnosticKind::IntersectedIndexes => "intersected_indexes",
            DiagnosticKind::UnusedIndexes => "unused_indexes",
            DiagnosticKind::ForeignKeysWithoutIndex => "foreign_keys_without_index",
            DiagnosticKind::TablesWithMissingIndexes => "tables_with_missing_indexes",
            DiagnosticKind::TablesWithoutPrimaryKey => "tables_without_primary_key",
            DiagnosticKind::IndexesWithNullValues => "indexes_with_null_values",
            DiagnosticKind::IndexesBloat => "indexes_bloat",
            DiagnosticKind::TablesBloat => "tables_bloat",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            DiagnosticKind::InvalidIndexes => "Invalid Indexes",
            DiagnosticKind::DuplicatedIndexes => "Duplicated Indexes",
            DiagnosticKind::IntersectedIndexes => "Intersected Indexes",
            DiagnosticKind::UnusedIndexes => "Unused Indexes",
            DiagnosticKind::ForeignKeysWithoutIndex => "Foreign Keys Without Index",
            DiagnosticKind::TablesWithMissingIndexes => "Tables With Missing Indexes",
            DiagnosticKind::TablesWithoutPrimaryKey => "Tables Without Primary Key",
            DiagnosticKind::IndexesWithNullValues => "Indexes With Null Values",
            DiagnosticKind::IndexesBloat => "Index Bloat",
            DiagnosticKind::TablesBloat => "Table Bloat",
        }
    }

    pub fn merge_policy(&self) -> MergePolicy {
        match self {
            DiagnosticKind::UnusedIndexes => MergePolicy::Intersection,
            DiagnosticKind::TablesWithMissingIndexes
            | DiagnosticKind::IndexesBloat
            | DiagnosticKind::TablesBloat => MergePolicy::Union,
            DiagnosticKind::InvalidIndexes
            | DiagnosticKind::DuplicatedIndexes
            | DiagnosticKind::IntersectedIndexes
            | DiagnosticKind::ForeignKeysWithoutIndex
            | DiagnosticKind::TablesWithoutPrimaryKey
            | DiagnosticKind::IndexesWithNullValues => MergePolicy::PrimaryOnly,
        }
    }

    pub fn is_structural(&self) -> bool {
        self.merge_policy() == MergePolicy::PrimaryOnly
    }

    /// Columns the check's query returns.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            DiagnosticKind::InvalidIndexes => &["table_name", "index_name"],
            DiagnosticKind::DuplicatedIndexes => &["table_name", "index_names", "index_sizes"],
            DiagnosticKind::IntersectedIndexes => &[
                "table_name",
                "first_index_name",
                "first_index_size",
                "second_index_name",
                "second_index_size",
            ],
            DiagnosticKind::UnusedIndexes => {
                &["table_name", "index_name", "index_size", "index_scans"]
            }
            DiagnosticKind::ForeignKeysWithoutIndex => {
                &["table_name", "constraint_name", "columns"]
            }
            DiagnosticKind::TablesWithMissingIndexes => {
                &["table_name", "table_size", "seq_scans", "index_scans"]
            }
            DiagnosticKind::TablesWithoutPrimaryKey => &["table_name", "table_size"],
            DiagnosticKind::IndexesWithNullValues => {
                &["table_name", "index_name", "index_size", "nullable_field"]
            }
            DiagnosticKind::IndexesBloat => {
                &["table_name", "index_name", "index_size", "bloat_size"]
            }
            DiagnosticKind::TablesBloat => &["table_name", "table_size", "bloat_size"],
        }
    }

    /// Whether the query takes the bloat percentage threshold as `$2`.
    pub(crate) fn uses_bloat_threshold(&self) -> bool {
        matches!(
            self,
            DiagnosticKind::IndexesBloat | DiagnosticKind::TablesBloat
        )
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DiagnosticError {
    #[snafu(display("{} is unavailable on {}: {}", kind, host, source))]
    Unavailable {
        host: HostRef,
        kind: DiagnosticKind,
        source: sqlx::Error,
    },

    #[snafu(display("{} on {} did not finish within {:?}", kind, host, deadline))]
    DeadlineExceeded {
        host: HostRef,
        kind: DiagnosticKind,
        deadline: Duration,
    },

    #[snafu(display("{} on {} returned an invalid row: {}", kind, host, source))]
    InvalidRecord {
        host: HostRef,
        kind: DiagnosticKind,
        source: ModelError,
    },
}

impl DiagnosticError {
    pub fn host(&self) -> &HostRef {
        match self {
            DiagnosticError::Unavailable { host, .. }
            | DiagnosticError::DeadlineExceeded { host, .. }
            | DiagnosticError::InvalidRecord { host, .. } => host,
        }
    }

    pub fn kind(&self) -> DiagnosticKind {
        match self {
            DiagnosticError::Unavailable { kind, .. }
            | DiagnosticError::DeadlineExceeded { kind, .. }
            | DiagnosticError::InvalidRecord { kind, .. } => *kind,
        }
    }
}

pub type Result<T, E = DiagnosticError> = std::result::Result<T, E>;

/// Read-only diagnostics against a single host.
///
/// Implementations return rows in the order the database produced them and
/// never return a partial result: any failure fails the whole call.
#[async_trait]
pub trait HostDiagnosticPort: Send + Sync {
    fn host(&self) -> &HostRef;

    async fn invalid_indexes(&self, ctx: &SchemaContext) -> Result<Vec<Index>>;

    async fn duplicated_indexes(&self, ctx: &SchemaContext) -> Result<Vec<DuplicatedIndexes>>;

    async fn intersected_indexes(&self, ctx: &SchemaContext) -> Result<Vec<DuplicatedIndexes>>;

    async fn unused_indexes(&self, ctx: &SchemaContext) -> Result<Vec<UnusedIndex>>;

    async fn foreign_keys_not_covered_with_index(
        &self,
        ctx: &SchemaContext,
    ) -> Result<Vec<ForeignKey>>;

    async fn tables_with_missing_indexes(
        &self,
        ctx: &SchemaContext,
    ) -> Result<Vec<TableWithMissingIndex>>;

    async fn tables_without_primary_key(&self, ctx: &SchemaContext) -> Result<Vec<Table>>;

    async fn indexes_with_null_values(&self, ctx: &SchemaContext) -> Result<Vec<IndexWithNulls>>;

    async fn indexes_with_bloat(&self, ctx: &SchemaContext) -> Result<Vec<IndexWithBloat>>;

    async fn tables_with_bloat(&self, ctx: &SchemaContext) -> Result<Vec<TableWithBloat>>;
}

/// Binds a [`DiagnosticKind`] to its record type and port method.
pub trait Diagnostic: Send + Sync + 'static {
    const KIND: DiagnosticKind;
    type Record: DiagnosticRecord;

    fn run<'a>(
        port: &'a dyn HostDiagnosticPort,
        ctx: &'a SchemaContext,
    ) -> BoxFuture<'a, Result<Vec<Self::Record>>>;
}

macro_rules! diagnostics {
    ($($name:ident => $kind:ident, $record:ty, $method:ident;)+) => {
        $(
            #[derive(Debug, Clone, Copy, Default)]
            pub struct $name;

            impl Diagnostic for $name {
                const KIND: DiagnosticKind = DiagnosticKind::$kind;
                type Record = $record;

                fn run<'a>(
                    port: &'a dyn HostDiagnosticPort,
                    ctx: &'a SchemaContext,
                ) -> BoxFuture<'a, Result<Vec<Self::Record>>> {
                    port.$method(ctx)
                }
            }
        )+
    };
}

/// Marker types, one per [`DiagnosticKind`].
pub mod checks {
    use super::*;

    diagnostics! {
        InvalidIndexes => InvalidIndexes, Index, invalid_indexes;
        DuplicatedIndexes => DuplicatedIndexes, crate::models::DuplicatedIndexes, duplicated_indexes;
        IntersectedIndexes => IntersectedIndexes, crate::models::DuplicatedIndexes, intersected_indexes;
        UnusedIndexes => UnusedIndexes, UnusedIndex, unused_indexes;
        ForeignKeysWithoutIndex => ForeignKeysWithoutIndex, ForeignKey, foreign_keys_not_covered_with_index;
        TablesWithMissingIndexes => TablesWithMissingIndexes, TableWithMissingIndex, tables_with_missing_indexes;
        TablesWithoutPrimaryKey => TablesWithoutPrimaryKey, Table, tables_without_primary_key;
        IndexesWithNullValues => IndexesWithNullValues, IndexWithNulls, indexes_with_null_values;
        IndexesBloat => IndexesBloat, IndexWithBloat, indexes_with_bloat;
        TablesBloat => TablesBloat, TableWithBloat, tables_with_bloat;
    }
}
