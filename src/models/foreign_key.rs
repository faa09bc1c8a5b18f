use super::{not_blank, DiagnosticRecord, NoColumnsSnafu, Result, TableNameAware};
use serde::Serialize;

/// A foreign key constraint and its columns in constraint order.
#[derive(Debug, Clone, Serialize)]
pub struct ForeignKey {
    table_name: String,
    constraint_name: String,
    columns: Vec<String>,
}

identity_ordering!(ForeignKey => table_name, constraint_name);

impl ForeignKey {
    pub fn new(
        table_name: impl Into<String>,
        constraint_name: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self> {
        let table_name = not_blank("tableName", table_name)?;
        let constraint_name = not_blank("constraintName", constraint_name)?;
        let columns = columns
            .into_iter()
            .map(|column| not_blank("columnName", column))
            .collect::<Result<Vec<_>>>()?;
        if columns.is_empty() {
            return NoColumnsSnafu { constraint_name }.fail();
        }

        Ok(Self {
            table_name,
            constraint_name,
            columns,
        })
    }

    pub fn of_column(
        table_name: impl Into<String>,
        constraint_name: impl Into<String>,
        column: impl Into<String>,
    ) -> Result<Self> {
        Self::new(table_name, constraint_name, [column.into()])
    }

    pub fn constraint_name(&self) -> &str {
        &self.constraint_name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

impl TableNameAware for ForeignKey {
    fn table_name(&self) -> &str {
        &self.table_name
    }
}

impl DiagnosticRecord for ForeignKey {}
