//! Immutable diagnostic records.
//!
//! Every record has an identity (table name, plus index or constraint name
//! where it applies) and optional measurements. Equality, hashing and
//! ordering look at the identity only, so two snapshots of the same index
//! taken on different hosts compare equal.

use serde::Serialize;
use snafu::Snafu;
use std::fmt::Debug;

/// Implements `PartialEq`, `Eq`, `Hash`, `PartialOrd` and `Ord` on the
/// listed identity fields, in order.
macro_rules! identity_ordering {
    ($ty:ty => $($field:ident),+) => {
        impl PartialEq for $ty {
            fn eq(&self, other: &Self) -> bool {
                ($(&self.$field,)+) == ($(&other.$field,)+)
            }
        }

        impl Eq for $ty {}

        impl std::hash::Hash for $ty {
            fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
                $(std::hash::Hash::hash(&self.$field, state);)+
            }
        }

        impl PartialOrd for $ty {
            fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $ty {
            fn cmp(&self, other: &Self) -> std::cmp::Ordering {
                ($(&self.$field,)+).cmp(&($(&other.$field,)+))
            }
        }
    };
}

mod foreign_key;
mod index;
mod table;

pub use foreign_key::ForeignKey;
pub use index::{DuplicatedIndexes, Index, IndexWithBloat, IndexWithNulls, IndexWithSize, UnusedIndex};
pub use table::{Table, TableWithBloat, TableWithMissingIndex};

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum ModelError {
    #[snafu(display("{} cannot be blank", field))]
    BlankName { field: &'static str },

    #[snafu(display("{} cannot be negative, got {}", field, value))]
    NegativeValue { field: &'static str, value: i64 },

    #[snafu(display("A duplicated index group needs at least two indexes, got {}", count))]
    TooFewIndexes { count: usize },

    #[snafu(display(
        "Indexes in one group must belong to the same table: {} and {}",
        expected,
        actual
    ))]
    MixedTables { expected: String, actual: String },

    #[snafu(display("Foreign key {} has no columns", constraint_name))]
    NoColumns { constraint_name: String },
}

pub(crate) type Result<T, E = ModelError> = std::result::Result<T, E>;

/// Records that belong to a table.
pub trait TableNameAware {
    fn table_name(&self) -> &str;
}

/// A record that a diagnostic check returns.
pub trait DiagnosticRecord:
    TableNameAware + Ord + Clone + Debug + Serialize + Send + Sync + 'static
{
    /// Folds another snapshot of the same object into `self`, keeping the
    /// larger value of every measurement. Identity and non-numeric fields of
    /// `self` are kept.
    fn combine(&mut self, _other: &Self) {}
}

pub(crate) fn not_blank(field: &'static str, value: impl Into<String>) -> Result<String> {
    let value = value.into();
    if value.trim().is_empty() {
        return BlankNameSnafu { field }.fail();
    }
    Ok(value)
}

pub(crate) fn non_negative(field: &'static str, value: i64) -> Result<i64> {
    if value < 0 {
        return NegativeValueSnafu { field, value }.fail();
    }
    Ok(value)
}

/// `round(bloat / size * 100)` clamped to `0..=100`; zero for empty relations.
pub(crate) fn bloat_percentage(size_bytes: i64, bloat_size_bytes: i64) -> u8 {
    if size_bytes <= 0 {
        return 0;
    }
    let pct = (bloat_size_bytes as f64 / size_bytes as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 0, 0)]
    #[case(0, 10, 0)]
    #[case(100, 0, 0)]
    #[case(100, 45, 45)]
    #[case(3, 1, 33)]
    #[case(3, 2, 67)]
    #[case(200, 1, 1)]
    #[case(1000, 4, 0)]
    #[case(10, 10, 100)]
    #[case(10, 25, 100)]
    fn bloat_percentage_rounds_and_clamps(
        #[case] size: i64,
        #[case] bloat: i64,
        #[case] expected: u8,
    ) {
        assert_eq!(bloat_percentage(size, bloat), expected);
    }

    #[test]
    fn blank_names_are_rejected() {
        assert_eq!(
            not_blank("tableName", "  ").unwrap_err(),
            ModelError::BlankName { field: "tableName" }
        );
        assert_eq!(not_blank("tableName", "t").unwrap(), "t");
    }
}
