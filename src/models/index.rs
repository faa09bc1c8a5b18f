use super::{
    bloat_percentage, non_negative, not_blank, DiagnosticRecord, MixedTablesSnafu, Result,
    TableNameAware, TooFewIndexesSnafu,
};
use serde::Serialize;

/// Identity of an index: the (qualified) table and index names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Index {
    table_name: String,
    index_name: String,
}

impl Index {
    pub fn new(table_name: impl Into<String>, index_name: impl Into<String>) -> Result<Self> {
        Ok(Self {
            table_name: not_blank("tableName", table_name)?,
            index_name: not_blank("indexName", index_name)?,
        })
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }
}

impl TableNameAware for Index {
    fn table_name(&self) -> &str {
        &self.table_name
    }
}

impl DiagnosticRecord for Index {}

#[derive(Debug, Clone, Serialize)]
pub struct IndexWithSize {
    #[serde(flatten)]
    index: Index,
    index_size_bytes: i64,
}

identity_ordering!(IndexWithSize => index);

impl IndexWithSize {
    pub fn new(
        table_name: impl Into<String>,
        index_name: impl Into<String>,
        index_size_bytes: i64,
    ) -> Result<Self> {
        Ok(Self {
            index: Index::new(table_name, index_name)?,
            index_size_bytes: non_negative("indexSize", index_size_bytes)?,
        })
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn index_name(&self) -> &str {
        self.index.index_name()
    }

    pub fn index_size_bytes(&self) -> i64 {
        self.index_size_bytes
    }
}

impl TableNameAware for IndexWithSize {
    fn table_name(&self) -> &str {
        self.index.table_name()
    }
}

impl DiagnosticRecord for IndexWithSize {
    fn combine(&mut self, other: &Self) {
        self.index_size_bytes = self.index_size_bytes.max(other.index_size_bytes);
    }
}

/// An index whose leading column is nullable.
#[derive(Debug, Clone, Serialize)]
pub struct IndexWithNulls {
    #[serde(flatten)]
    index: Index,
    index_size_bytes: i64,
    nullable_field: String,
}

identity_ordering!(IndexWithNulls => index);

impl IndexWithNulls {
    pub fn new(
        table_name: impl Into<String>,
        index_name: impl Into<String>,
        index_size_bytes: i64,
        nullable_field: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            index: Index::new(table_name, index_name)?,
            index_size_bytes: non_negative("indexSize", index_size_bytes)?,
            nullable_field: not_blank("nullableField", nullable_field)?,
        })
    }

    pub fn index_name(&self) -> &str {
        self.index.index_name()
    }

    pub fn index_size_bytes(&self) -> i64 {
        self.index_size_bytes
    }

    pub fn nullable_field(&self) -> &str {
        &self.nullable_field
    }
}

impl TableNameAware for IndexWithNulls {
    fn table_name(&self) -> &str {
        self.index.table_name()
    }
}

impl DiagnosticRecord for IndexWithNulls {
    fn combine(&mut self, other: &Self) {
        self.index_size_bytes = self.index_size_bytes.max(other.index_size_bytes);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexWithBloat {
    #[serde(flatten)]
    index: Index,
    index_size_bytes: i64,
    bloat_size_bytes: i64,
    bloat_percentage: u8,
}

identity_ordering!(IndexWithBloat => index);

impl IndexWithBloat {
    pub fn new(
        table_name: impl Into<String>,
        index_name: impl Into<String>,
        index_size_bytes: i64,
        bloat_size_bytes: i64,
    ) -> Result<Self> {
        let index_size_bytes = non_negative("indexSize", index_size_bytes)?;
        let bloat_size_bytes = non_negative("bloatSize", bloat_size_bytes)?;
        Ok(Self {
            index: Index::new(table_name, index_name)?,
            index_size_bytes,
            bloat_size_bytes,
            bloat_percentage: bloat_percentage(index_size_bytes, bloat_size_bytes),
        })
    }

    pub fn index_name(&self) -> &str {
        self.index.index_name()
    }

    pub fn index_size_bytes(&self) -> i64 {
        self.index_size_bytes
    }

    pub fn bloat_size_bytes(&self) -> i64 {
        self.bloat_size_bytes
    }

    pub fn bloat_percentage(&self) -> u8 {
        self.bloat_percentage
    }
}

impl TableNameAware for IndexWithBloat {
    fn table_name(&self) -> &str {
        self.index.table_name()
    }
}

impl DiagnosticRecord for IndexWithBloat {
    fn combine(&mut self, other: &Self) {
        self.index_size_bytes = self.index_size_bytes.max(other.index_size_bytes);
        self.bloat_size_bytes = self.bloat_size_bytes.max(other.bloat_size_bytes);
        self.bloat_percentage = bloat_percentage(self.index_size_bytes, self.bloat_size_bytes);
    }
}

/// An index with few or no scans recorded in the statistics collector.
#[derive(Debug, Clone, Serialize)]
pub struct UnusedIndex {
    #[serde(flatten)]
    index: Index,
    index_size_bytes: i64,
    index_scans: i64,
}

identity_ordering!(UnusedIndex => index);

impl UnusedIndex {
    pub fn new(
        table_name: impl Into<String>,
        index_name: impl Into<String>,
        index_size_bytes: i64,
        index_scans: i64,
    ) -> Result<Self> {
        Ok(Self {
            index: Index::new(table_name, index_name)?,
            index_size_bytes: non_negative("indexSize", index_size_bytes)?,
            index_scans: non_negative("indexScans", index_scans)?,
        })
    }

    pub fn index_name(&self) -> &str {
        self.index.index_name()
    }

    pub fn index_size_bytes(&self) -> i64 {
        self.index_size_bytes
    }

    pub fn index_scans(&self) -> i64 {
        self.index_scans
    }
}

impl TableNameAware for UnusedIndex {
    fn table_name(&self) -> &str {
        self.index.table_name()
    }
}

impl DiagnosticRecord for UnusedIndex {
    fn combine(&mut self, other: &Self) {
        self.index_size_bytes = self.index_size_bytes.max(other.index_size_bytes);
        self.index_scans = self.index_scans.max(other.index_scans);
    }
}

/// Two or more indexes on one table that duplicate or intersect each other.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicatedIndexes {
    table_name: String,
    total_size_bytes: i64,
    indexes: Vec<IndexWithSize>,
}

identity_ordering!(DuplicatedIndexes => table_name, indexes);

impl DuplicatedIndexes {
    pub fn new(indexes: impl IntoIterator<Item = IndexWithSize>) -> Result<Self> {
        let mut indexes: Vec<IndexWithSize> = indexes.into_iter().collect();
        if indexes.len() < 2 {
            return TooFewIndexesSnafu {
                count: indexes.len(),
            }
            .fail();
        }

        let table_name = indexes[0].table_name().to_string();
        if let Some(stranger) = indexes.iter().find(|idx| idx.table_name() != table_name) {
            return MixedTablesSnafu {
                expected: table_name,
                actual: stranger.table_name(),
            }
            .fail();
        }

        indexes.sort();
        let total_size_bytes = indexes.iter().map(IndexWithSize::index_size_bytes).sum();

        Ok(Self {
            table_name,
            total_size_bytes,
            indexes,
        })
    }

    pub fn total_size_bytes(&self) -> i64 {
        self.total_size_bytes
    }

    pub fn indexes(&self) -> &[IndexWithSize] {
        &self.indexes
    }

    pub fn index_names(&self) -> Vec<&str> {
        self.indexes.iter().map(IndexWithSize::index_name).collect()
    }
}

impl TableNameAware for DuplicatedIndexes {
    fn table_name(&self) -> &str {
        &self.table_name
    }
}

impl DiagnosticRecord for DuplicatedIndexes {}
