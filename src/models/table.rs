use super::{bloat_percentage, non_negative, not_blank, DiagnosticRecord, Result, TableNameAware};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Table {
    table_name: String,
    table_size_bytes: i64,
}

identity_ordering!(Table => table_name);

impl Table {
    pub fn new(table_name: impl Into<String>, table_size_bytes: i64) -> Result<Self> {
        Ok(Self {
            table_name: not_blank("tableName", table_name)?,
            table_size_bytes: non_negative("tableSize", table_size_bytes)?,
        })
    }

    pub fn table_size_bytes(&self) -> i64 {
        self.table_size_bytes
    }
}

impl TableNameAware for Table {
    fn table_name(&self) -> &str {
        &self.table_name
    }
}

impl DiagnosticRecord for Table {
    fn combine(&mut self, other: &Self) {
        self.table_size_bytes = self.table_size_bytes.max(other.table_size_bytes);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TableWithBloat {
    #[serde(flatten)]
    table: Table,
    bloat_size_bytes: i64,
    bloat_percentage: u8,
}

identity_ordering!(TableWithBloat => table);

impl TableWithBloat {
    pub fn new(
        table_name: impl Into<String>,
        table_size_bytes: i64,
        bloat_size_bytes: i64,
    ) -> Result<Self> {
        let table = Table::new(table_name, table_size_bytes)?;
        let bloat_size_bytes = non_negative("bloatSize", bloat_size_bytes)?;
        Ok(Self {
            bloat_percentage: bloat_percentage(table.table_size_bytes, bloat_size_bytes),
            table,
            bloat_size_bytes,
        })
    }

    pub fn table_size_bytes(&self) -> i64 {
        self.table.table_size_bytes
    }

    pub fn bloat_size_bytes(&self) -> i64 {
        self.bloat_size_bytes
    }

    pub fn bloat_percentage(&self) -> u8 {
        self.bloat_percentage
    }
}

impl TableNameAware for TableWithBloat {
    fn table_name(&self) -> &str {
        self.table.table_name()
    }
}

impl DiagnosticRecord for TableWithBloat {
    fn combine(&mut self, other: &Self) {
        self.table.combine(&other.table);
        self.bloat_size_bytes = self.bloat_size_bytes.max(other.bloat_size_bytes);
        self.bloat_percentage = bloat_percentage(self.table.table_size_bytes, self.bloat_size_bytes);
    }
}

/// A table read mostly through sequential scans.
#[derive(Debug, Clone, Serialize)]
pub struct TableWithMissingIndex {
    #[serde(flatten)]
    table: Table,
    seq_scans: i64,
    index_scans: i64,
}

identity_ordering!(TableWithMissingIndex => table);

impl TableWithMissingIndex {
    pub fn new(
        table_name: impl Into<String>,
        table_size_bytes: i64,
        seq_scans: i64,
        index_scans: i64,
    ) -> Result<Self> {
        Ok(Self {
            table: Table::new(table_name, table_size_bytes)?,
            seq_scans: non_negative("seqScans", seq_scans)?,
            index_scans: non_negative("indexScans", index_scans)?,
        })
    }

    pub fn table_size_bytes(&self) -> i64 {
        self.table.table_size_bytes
    }

    pub fn seq_scans(&self) -> i64 {
        self.seq_scans
    }

    pub fn index_scans(&self) -> i64 {
        self.index_scans
    }
}

impl TableNameAware for TableWithMissingIndex {
    fn table_name(&self) -> &str {
        self.table.table_name()
    }
}

impl DiagnosticRecord for TableWithMissingIndex {
    fn combine(&mut self, other: &Self) {
        self.table.combine(&other.table);
        self.seq_scans = self.seq_scans.max(other.seq_scans);
        self.index_scans = self.index_scans.max(other.index_scans);
    }
}
