use serde::{Deserialize, Serialize};
use snafu::Snafu;
use std::fmt;
use std::str::FromStr;

/// Schema that PostgreSQL puts on the default `search_path`.
pub const DEFAULT_SCHEMA: &str = "public";

/// Bloat percentage below which bloat checks stay silent.
pub const DEFAULT_BLOAT_PERCENTAGE_THRESHOLD: u8 = 10;

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum ContextError {
    #[snafu(display(
        "{:?} is not a valid schema name: only ASCII letters, digits and '_' are allowed",
        name
    ))]
    InvalidIdentifier { name: String },

    #[snafu(display("Bloat percentage threshold must be within 0..=100, got {}", value))]
    InvalidThreshold { value: u16 },
}

type Result<T, E = ContextError> = std::result::Result<T, E>;

/// The PostgreSQL schema a diagnostic run is scoped to.
///
/// Schema names end up inside SQL text, so construction is the only place
/// they are checked: every character outside `[A-Za-z0-9_]` is rejected,
/// nothing is stripped or quoted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaContext {
    schema_name: String,
    bloat_percentage_threshold: u8,
}

impl SchemaContext {
    pub fn of(schema_name: impl Into<String>) -> Result<Self> {
        let schema_name = schema_name.into();
        if !is_valid_identifier(&schema_name) {
            return InvalidIdentifierSnafu { name: schema_name }.fail();
        }

        Ok(Self {
            schema_name,
            bloat_percentage_threshold: DEFAULT_BLOAT_PERCENTAGE_THRESHOLD,
        })
    }

    pub fn of_default() -> Self {
        Self {
            schema_name: DEFAULT_SCHEMA.to_string(),
            bloat_percentage_threshold: DEFAULT_BLOAT_PERCENTAGE_THRESHOLD,
        }
    }

    pub fn with_bloat_percentage_threshold(self, value: u16) -> Result<Self> {
        let threshold = u8::try_from(value)
            .ok()
            .filter(|pct| *pct <= 100)
            .ok_or(ContextError::InvalidThreshold { value })?;

        Ok(Self {
            bloat_percentage_threshold: threshold,
            ..self
        })
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    pub fn bloat_percentage_threshold(&self) -> u8 {
        self.bloat_percentage_threshold
    }

    pub fn is_default_schema(&self) -> bool {
        self.schema_name == DEFAULT_SCHEMA
    }

    /// Qualifies `object_name` with the schema, leaving it untouched for `public`.
    pub fn enrich(&self, object_name: &str) -> String {
        if self.is_default_schema() {
            object_name.to_string()
        } else {
            format!("{}.{}", self.schema_name, object_name)
        }
    }
}

impl Default for SchemaContext {
    fn default() -> Self {
        Self::of_default()
    }
}

impl fmt::Display for SchemaContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.schema_name)
    }
}

impl FromStr for SchemaContext {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self> {
        Self::of(s)
    }
}

impl TryFrom<String> for SchemaContext {
    type Error = ContextError;

    fn try_from(value: String) -> Result<Self> {
        Self::of(value)
    }
}

impl From<SchemaContext> for String {
    fn from(ctx: SchemaContext) -> Self {
        ctx.schema_name
    }
}

fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("demo")]
    #[case("test")]
    #[case("custom_schema_01")]
    #[case("_")]
    #[case("Billing")]
    #[case("a_very_long_schema_name_that_goes_past_the_postgres_identifier_limit")]
    fn accepts_identifier_names(#[case] name: &str) {
        let ctx = SchemaContext::of(name).unwrap();
        assert_eq!(ctx.schema_name(), name);
        assert_eq!(ctx.enrich("t"), format!("{name}.t"));
        assert_eq!(
            ctx.bloat_percentage_threshold(),
            DEFAULT_BLOAT_PERCENTAGE_THRESHOLD
        );
    }

    #[rstest]
    #[case("")]
    #[case(" ")]
    #[case("   ")]
    #[case("; truncate table clients;")]
    #[case("public; drop schema public")]
    #[case("demo ")]
    #[case(" demo")]
    #[case("de mo")]
    #[case("demo\t")]
    #[case("demo\n")]
    #[case("demo'")]
    #[case("demo\"")]
    #[case("demo--")]
    #[case("demo/*")]
    #[case("demo.t")]
    #[case("demo$1")]
    #[case("demo)")]
    #[case("schéma")]
    #[case("demo\0")]
    fn rejects_everything_else(#[case] name: &str) {
        let err = SchemaContext::of(name).unwrap_err();
        assert_eq!(
            err,
            ContextError::InvalidIdentifier {
                name: name.to_string()
            }
        );
    }

    #[test]
    fn default_context_leaves_names_unqualified() {
        let ctx = SchemaContext::of_default();
        assert!(ctx.is_default_schema());
        assert_eq!(ctx.schema_name(), "public");
        assert_eq!(ctx.enrich("t"), "t");
        assert_eq!(SchemaContext::default(), ctx);
    }

    #[test]
    fn explicit_public_is_the_default_context() {
        let ctx = SchemaContext::of("public").unwrap();
        assert_eq!(ctx, SchemaContext::of_default());
        assert_eq!(ctx.enrich("accounts"), "accounts");
    }

    #[test]
    fn bloat_threshold_is_bounded() {
        let ctx = SchemaContext::of("demo")
            .unwrap()
            .with_bloat_percentage_threshold(25)
            .unwrap();
        assert_eq!(ctx.bloat_percentage_threshold(), 25);

        assert!(SchemaContext::of_default()
            .with_bloat_percentage_threshold(100)
            .is_ok());
        assert_eq!(
            SchemaContext::of_default()
                .with_bloat_percentage_threshold(101)
                .unwrap_err(),
            ContextError::InvalidThreshold { value: 101 }
        );
        assert!(SchemaContext::of_default()
            .with_bloat_percentage_threshold(1000)
            .is_err());
    }

    #[test]
    fn parsing_goes_through_validation() {
        assert!("demo".parse::<SchemaContext>().is_ok());
        assert!("demo;".parse::<SchemaContext>().is_err());

        let from_yaml: std::result::Result<Vec<SchemaContext>, _> =
            serde_yaml::from_str("[demo, 'x; drop table t']");
        assert!(from_yaml.is_err());

        let ok: Vec<SchemaContext> = serde_yaml::from_str("[demo, public]").unwrap();
        assert_eq!(ok[1], SchemaContext::of_default());
    }
}
