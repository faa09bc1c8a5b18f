use super::{
    indexes, tables, DiagnosticError, DiagnosticKind, HostDiagnosticPort, InvalidRecordSnafu,
    Result, UnavailableSnafu,
};
use crate::connection::{HostRef, PgConnection};
use crate::context::SchemaContext;
use crate::models::{
    DuplicatedIndexes, ForeignKey, Index, IndexWithBloat, IndexWithNulls, ModelError, Table,
    TableWithBloat, TableWithMissingIndex, UnusedIndex,
};
use async_trait::async_trait;
use snafu::{IntoError, ResultExt};
use sqlx::postgres::PgRow;
use tracing::debug;

/// Why a single row could not be turned into a record.
#[derive(Debug)]
pub(super) enum RowError {
    Column(sqlx::Error),
    Model(ModelError),
}

impl From<sqlx::Error> for RowError {
    fn from(err: sqlx::Error) -> Self {
        RowError::Column(err)
    }
}

impl From<ModelError> for RowError {
    fn from(err: ModelError) -> Self {
        RowError::Model(err)
    }
}

pub(super) type Decoder<T> = fn(&PgRow, &SchemaContext) -> std::result::Result<T, RowError>;

/// Runs the catalog queries against one host through its pool.
#[derive(Debug, Clone)]
pub struct PgHostDiagnostics {
    connection: PgConnection,
}

impl PgHostDiagnostics {
    pub fn new(connection: PgConnection) -> Self {
        Self { connection }
    }

    async fn fetch<T>(
        &self,
        kind: DiagnosticKind,
        ctx: &SchemaContext,
        query: &'static str,
        decode: Decoder<T>,
    ) -> Result<Vec<T>> {
        let host = self.connection.host();
        debug!(%host, %kind, schema = ctx.schema_name(), "Running diagnostic");

        let mut statement = sqlx::query(query).bind(ctx.schema_name());
        if kind.uses_bloat_threshold() {
            statement = statement.bind(i32::from(ctx.bloat_percentage_threshold()));
        }
        let rows = statement
            .fetch_all(self.connection.pool())
            .await
            .context(UnavailableSnafu {
                host: host.clone(),
                kind,
            })?;
        debug!(%host, %kind, rows = rows.len(), "Diagnostic returned");

        rows.iter()
            .map(|row| decode(row, ctx).map_err(|err| row_error(host, kind, err)))
            .collect()
    }
}

fn row_error(host: &HostRef, kind: DiagnosticKind, err: RowError) -> DiagnosticError {
    match err {
        RowError::Column(source) => UnavailableSnafu {
            host: host.clone(),
            kind,
        }
        .into_error(source),
        RowError::Model(source) => InvalidRecordSnafu {
            host: host.clone(),
            kind,
        }
        .into_error(source),
    }
}

#[async_trait]
impl HostDiagnosticPort for PgHostDiagnostics {
    fn host(&self) -> &HostRef {
        self.connection.host()
    }

    async fn invalid_indexes(&self, ctx: &SchemaContext) -> Result<Vec<Index>> {
        self.fetch(
            DiagnosticKind::InvalidIndexes,
            ctx,
            indexes::INVALID_INDEXES,
            indexes::decode_index,
        )
        .await
    }

    async fn duplicated_indexes(&self, ctx: &SchemaContext) -> Result<Vec<DuplicatedIndexes>> {
        self.fetch(
            DiagnosticKind::DuplicatedIndexes,
            ctx,
            indexes::DUPLICATED_INDEXES,
            indexes::decode_duplicated,
        )
        .await
    }

    async fn intersected_indexes(&self, ctx: &SchemaContext) -> Result<Vec<DuplicatedIndexes>> {
        self.fetch(
            DiagnosticKind::IntersectedIndexes,
            ctx,
            indexes::INTERSECTED_INDEXES,
            indexes::decode_intersected,
        )
        .await
    }

    async fn unused_indexes(&self, ctx: &SchemaContext) -> Result<Vec<UnusedIndex>> {
        self.fetch(
            DiagnosticKind::UnusedIndexes,
            ctx,
            indexes::UNUSED_INDEXES,
            indexes::decode_unused,
        )
        .await
    }

    async fn foreign_keys_not_covered_with_index(
        &self,
        ctx: &SchemaContext,
    ) -> Result<Vec<ForeignKey>> {
        self.fetch(
            DiagnosticKind::ForeignKeysWithoutIndex,
            ctx,
            indexes::FOREIGN_KEYS_WITHOUT_INDEX,
            indexes::decode_foreign_key,
        )
        .await
    }

    async fn tables_with_missing_indexes(
        &self,
        ctx: &SchemaContext,
    ) -> Result<Vec<TableWithMissingIndex>> {
        self.fetch(
            DiagnosticKind::TablesWithMissingIndexes,
            ctx,
            tables::TABLES_WITH_MISSING_INDEXES,
            tables::decode_missing_index,
        )
        .await
    }

    async fn tables_without_primary_key(&self, ctx: &SchemaContext) -> Result<Vec<Table>> {
        self.fetch(
            DiagnosticKind::TablesWithoutPrimaryKey,
            ctx,
            tables::TABLES_WITHOUT_PRIMARY_KEY,
            tables::decode_table,
        )
        .await
    }

    async fn indexes_with_null_values(&self, ctx: &SchemaContext) -> Result<Vec<IndexWithNulls>> {
        self.fetch(
            DiagnosticKind::IndexesWithNullValues,
            ctx,
            indexes::INDEXES_WITH_NULL_VALUES,
            indexes::decode_with_nulls,
        )
        .await
    }

    async fn indexes_with_bloat(&self, ctx: &SchemaContext) -> Result<Vec<IndexWithBloat>> {
        self.fetch(
            DiagnosticKind::IndexesBloat,
            ctx,
            indexes::INDEXES_WITH_BLOAT,
            indexes::decode_bloat,
        )
        .await
    }

    async fn tables_with_bloat(&self, ctx: &SchemaContext) -> Result<Vec<TableWithBloat>> {
        self.fetch(
            DiagnosticKind::TablesBloat,
            ctx,
            tables::TABLES_WITH_BLOAT,
            tables::decode_bloat,
        )
        .await
    }
}
