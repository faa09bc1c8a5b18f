use crate::config::{ConfigError, FileReadSnafu, YamlParseSnafu};
use crate::diagnostics::DiagnosticKind;
use crate::models::{
    DuplicatedIndexes, IndexWithBloat, IndexWithNulls, Table, TableWithBloat,
    TableWithMissingIndex,
};
use crate::report::Findings;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// Findings an operator has decided to live with.
///
/// Index names match case-insensitively, either fully qualified or by the
/// bare index name. Size and bloat thresholds drop records below them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Exclusions {
    pub duplicated_indexes: BTreeSet<String>,
    pub intersected_indexes: BTreeSet<String>,
    pub unused_indexes: BTreeSet<String>,
    pub table_size_threshold_bytes: i64,
    pub index_size_threshold_bytes: i64,
    pub table_bloat_size_threshold_bytes: i64,
    pub table_bloat_percentage_threshold: u8,
    pub index_bloat_size_threshold_bytes: i64,
    pub index_bloat_percentage_threshold: u8,
}

impl Exclusions {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).context(FileReadSnafu)?;
        serde_yaml::from_str(&content).context(YamlParseSnafu)
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Drops excluded records from the findings of one kind.
    pub fn apply(&self, kind: DiagnosticKind, findings: Findings) -> Findings {
        match findings {
            Findings::DuplicatedIndexes(groups) => {
                let names = match kind {
                    DiagnosticKind::IntersectedIndexes => &self.intersected_indexes,
                    _ => &self.duplicated_indexes,
                };
                Findings::DuplicatedIndexes(retain(groups, |g| !group_excluded(names, g)))
            }
            Findings::UnusedIndexes(indexes) => Findings::UnusedIndexes(retain(indexes, |i| {
                !excluded(&self.unused_indexes, i.index_name())
                    && self.index_big_enough(i.index_size_bytes())
            })),
            Findings::IndexesWithNulls(indexes) => Findings::IndexesWithNulls(retain(
                indexes,
                |i: &IndexWithNulls| self.index_big_enough(i.index_size_bytes()),
            )),
            Findings::IndexesWithBloat(indexes) => Findings::IndexesWithBloat(retain(
                indexes,
                |i: &IndexWithBloat| {
                    self.index_big_enough(i.index_size_bytes())
                        && i.bloat_size_bytes() >= self.index_bloat_size_threshold_bytes
                        && i.bloat_percentage() >= self.index_bloat_percentage_threshold
                },
            )),
            Findings::Tables(tables) => Findings::Tables(retain(tables, |t: &Table| {
                self.table_big_enough(t.table_size_bytes())
            })),
            Findings::TablesWithMissingIndexes(tables) => Findings::TablesWithMissingIndexes(
                retain(tables, |t: &TableWithMissingIndex| {
                    self.table_big_enough(t.table_size_bytes())
                }),
            ),
            Findings::TablesWithBloat(tables) => Findings::TablesWithBloat(retain(
                tables,
                |t: &TableWithBloat| {
                    self.table_big_enough(t.table_size_bytes())
                        && t.bloat_size_bytes() >= self.table_bloat_size_threshold_bytes
                        && t.bloat_percentage() >= self.table_bloat_percentage_threshold
                },
            )),
            other @ (Findings::Indexes(_) | Findings::ForeignKeys(_)) => other,
        }
    }

    fn index_big_enough(&self, size: i64) -> bool {
        size >= self.index_size_threshold_bytes
    }

    fn table_big_enough(&self, size: i64) -> bool {
        size >= self.table_size_threshold_bytes
    }
}

fn retain<T>(mut records: Vec<T>, keep: impl Fn(&T) -> bool) -> Vec<T> {
    records.retain(|r| keep(r));
    records
}

fn excluded(names: &BTreeSet<String>, index_name: &str) -> bool {
    let bare = index_name.rsplit('.').next().unwrap_or(index_name);
    names
        .iter()
        .any(|n| n.eq_ignore_ascii_case(index_name) || n.eq_ignore_ascii_case(bare))
}

fn group_excluded(names: &BTreeSet<String>, group: &DuplicatedIndexes) -> bool {
    group
        .indexes()
        .iter()
        .any(|i| excluded(names, i.index_name()))
}
