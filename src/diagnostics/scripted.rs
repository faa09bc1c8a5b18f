//! In-memory host used by the aggregator tests.

use super::{DiagnosticError, DiagnosticKind, HostDiagnosticPort, Result};
use crate::connection::HostRef;
use crate::context::SchemaContext;
use crate::models::{
    DiagnosticRecord, DuplicatedIndexes, ForeignKey, Index, IndexWithBloat, IndexWithNulls, Table,
    TableWithBloat, TableWithMissingIndex, UnusedIndex,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Answers every check from canned records.
///
/// Records whose table name is unqualified belong to `public`; records named
/// `schema.table` belong to `schema`.
#[derive(Debug, Clone)]
pub(crate) struct ScriptedHost {
    pub host: HostRef,
    pub invalid_indexes: Vec<Index>,
    pub duplicated_indexes: Vec<DuplicatedIndexes>,
    pub intersected_indexes: Vec<DuplicatedIndexes>,
    pub unused_indexes: Vec<UnusedIndex>,
    pub foreign_keys: Vec<ForeignKey>,
    pub missing_indexes: Vec<TableWithMissingIndex>,
    pub without_primary_key: Vec<Table>,
    pub with_nulls: Vec<IndexWithNulls>,
    pub index_bloat: Vec<IndexWithBloat>,
    pub table_bloat: Vec<TableWithBloat>,
    pub failing: Vec<DiagnosticKind>,
    pub delay: Option<Duration>,
    pub calls: Arc<AtomicUsize>,
}

impl ScriptedHost {
    pub fn new(host: &str) -> Self {
        Self {
            host: HostRef::new(host, 5432),
            invalid_indexes: vec![],
            duplicated_indexes: vec![],
            intersected_indexes: vec![],
            unused_indexes: vec![],
            foreign_keys: vec![],
            missing_indexes: vec![],
            without_primary_key: vec![],
            with_nulls: vec![],
            index_bloat: vec![],
            table_bloat: vec![],
            failing: vec![],
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(mut self, kind: DiagnosticKind) -> Self {
        self.failing.push(kind);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn answer<R: DiagnosticRecord>(
        &self,
        kind: DiagnosticKind,
        ctx: &SchemaContext,
        records: &[R],
    ) -> Result<Vec<R>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(&kind) {
            return Err(DiagnosticError::Unavailable {
                host: self.host.clone(),
                kind,
                source: sqlx::Error::PoolTimedOut,
            });
        }
        Ok(records
            .iter()
            .filter(|record| belongs_to(ctx, record.table_name()))
            .cloned()
            .collect())
    }
}

fn belongs_to(ctx: &SchemaContext, table_name: &str) -> bool {
    match table_name.split_once('.') {
        Some((schema, _)) => schema == ctx.schema_name(),
        None => ctx.is_default_schema(),
    }
}

#[async_trait]
impl HostDiagnosticPort for ScriptedHost {
    fn host(&self) -> &HostRef {
        &self.host
    }

    async fn invalid_indexes(&self, ctx: &SchemaContext) -> Result<Vec<Index>> {
        self.answer(DiagnosticKind::InvalidIndexes, ctx, &self.invalid_indexes)
            .await
    }

    async fn duplicated_indexes(&self, ctx: &SchemaContext) -> Result<Vec<DuplicatedIndexes>> {
        self.answer(DiagnosticKind::DuplicatedIndexes, ctx, &self.duplicated_indexes)
            .await
    }

    async fn intersected_indexes(&self, ctx: &SchemaContext) -> Result<Vec<DuplicatedIndexes>> {
        self.answer(DiagnosticKind::IntersectedIndexes, ctx, &self.intersected_indexes)
            .await
    }

    async fn unused_indexes(&self, ctx: &SchemaContext) -> Result<Vec<UnusedIndex>> {
        self.answer(DiagnosticKind::UnusedIndexes, ctx, &self.unused_indexes)
            .await
    }

    async fn foreign_keys_not_covered_with_index(
        &self,
        ctx: &SchemaContext,
    ) -> Result<Vec<ForeignKey>> {
        self.answer(DiagnosticKind::ForeignKeysWithoutIndex, ctx, &self.foreign_keys)
            .await
    }

    async fn tables_with_missing_indexes(
        &self,
        ctx: &SchemaContext,
    ) -> Result<Vec<TableWithMissingIndex>> {
        self.answer(DiagnosticKind::TablesWithMissingIndexes, ctx, &self.missing_indexes)
            .await
    }

    async fn tables_without_primary_key(&self, ctx: &SchemaContext) -> Result<Vec<Table>> {
        self.answer(DiagnosticKind::TablesWithoutPrimaryKey, ctx, &self.without_primary_key)
            .await
    }

    async fn indexes_with_null_values(&self, ctx: &SchemaContext) -> Result<Vec<IndexWithNulls>> {
        self.answer(DiagnosticKind::IndexesWithNullValues, ctx, &self.with_nulls)
            .await
    }

    async fn indexes_with_bloat(&self, ctx: &SchemaContext) -> Result<Vec<IndexWithBloat>> {
        self.answer(DiagnosticKind::IndexesBloat, ctx, &self.index_bloat)
            .await
    }

    async fn tables_with_bloat(&self, ctx: &SchemaContext) -> Result<Vec<TableWithBloat>> {
        self.answer(DiagnosticKind::TablesBloat, ctx, &self.table_bloat)
            .await
    }
}
