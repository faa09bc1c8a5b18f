//! The outcome of a health run: one section per diagnostic kind.

use crate::connection::HostRef;
use crate::diagnostics::DiagnosticKind;
use crate::models::{
    DuplicatedIndexes, ForeignKey, Index, IndexWithBloat, IndexWithNulls, Table, TableWithBloat,
    TableWithMissingIndex, UnusedIndex,
};
use serde::Serialize;

/// Records of one kind.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Findings {
    Indexes(Vec<Index>),
    DuplicatedIndexes(Vec<DuplicatedIndexes>),
    UnusedIndexes(Vec<UnusedIndex>),
    ForeignKeys(Vec<ForeignKey>),
    TablesWithMissingIndexes(Vec<TableWithMissingIndex>),
    Tables(Vec<Table>),
    IndexesWithNulls(Vec<IndexWithNulls>),
    IndexesWithBloat(Vec<IndexWithBloat>),
    TablesWithBloat(Vec<TableWithBloat>),
}

impl Findings {
    pub fn len(&self) -> usize {
        match self {
            Findings::Indexes(r) => r.len(),
            Findings::DuplicatedIndexes(r) => r.len(),
            Findings::UnusedIndexes(r) => r.len(),
            Findings::ForeignKeys(r) => r.len(),
            Findings::TablesWithMissingIndexes(r) => r.len(),
            Findings::Tables(r) => r.len(),
            Findings::IndexesWithNulls(r) => r.len(),
            Findings::IndexesWithBloat(r) => r.len(),
            Findings::TablesWithBloat(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SectionOutcome {
    Completed {
        records: Findings,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        skipped_hosts: Vec<HostRef>,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct Section {
    pub kind: DiagnosticKind,
    #[serde(flatten)]
    pub outcome: SectionOutcome,
}

impl Section {
    /// Number of records, or `None` when the kind failed.
    pub fn count(&self) -> Option<usize> {
        match &self.outcome {
            SectionOutcome::Completed { records, .. } => Some(records.len()),
            SectionOutcome::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, SectionOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub primary: HostRef,
    pub schemas: Vec<String>,
    pub sections: Vec<Section>,
}

impl HealthReport {
    pub fn section(&self, kind: DiagnosticKind) -> Option<&Section> {
        self.sections.iter().find(|s| s.kind == kind)
    }

    pub fn has_failures(&self) -> bool {
        self.sections.iter().any(Section::is_failed)
    }

    /// Total number of records across every completed section.
    pub fn total_findings(&self) -> usize {
        self.sections.iter().filter_map(Section::count).sum()
    }
}
