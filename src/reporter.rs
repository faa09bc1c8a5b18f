use crate::diagnostics::DiagnosticKind;
use crate::models::TableNameAware;
use crate::report::{Findings, HealthReport, Section, SectionOutcome};
use crate::settings::PgParam;
use clap::ValueEnum;
use itertools::Itertools;
use snafu::{ResultExt, Snafu};
use std::io::Write;

/// Prefix of every key/count line.
pub const KEY_VALUE_PREFIX: &str = "db_indexes_health";

#[derive(Debug, Snafu)]
pub enum ReporterError {
    #[snafu(display("Failed to write output: {}", source))]
    OutputError { source: std::io::Error },
}

type Result<T, E = ReporterError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// One tab separated `key count` line per diagnostic
    KeyValue,
    /// Markdown formatted report
    Markdown,
    /// JSON formatted report
    Json,
}

pub struct Reporter {
    format: ReportFormat,
}

impl Reporter {
    pub fn new(format: ReportFormat) -> Self {
        Self { format }
    }

    pub fn report(&self, report: &HealthReport) -> Result<()> {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        self.render(report, &mut handle)
    }

    pub fn render(&self, report: &HealthReport, out: &mut impl Write) -> Result<()> {
        match self.format {
            ReportFormat::KeyValue => render_key_value(report, out),
            ReportFormat::Markdown => render_markdown(report, out),
            ReportFormat::Json => render_json(report, out),
        }
    }

    pub fn report_settings(&self, params: &[PgParam]) -> Result<()> {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        self.render_settings(params, &mut handle)
    }

    pub fn render_settings(&self, params: &[PgParam], out: &mut impl Write) -> Result<()> {
        match self.format {
            ReportFormat::KeyValue => {
                for param in params {
                    writeln!(out, "pg_settings\t{}\t{}", param.name(), param.value())
                        .context(OutputSnafu)?;
                }
            }
            ReportFormat::Markdown => {
                writeln!(out, "# Parameters Still At Default Value\n").context(OutputSnafu)?;
                if params.is_empty() {
                    writeln!(out, "All important parameters are tuned.").context(OutputSnafu)?;
                }
                for param in params {
                    writeln!(
                        out,
                        "- `{}` = {}{}",
                        param.name(),
                        param.value(),
                        param.unit().map(|u| format!(" ({u})")).unwrap_or_default()
                    )
                    .context(OutputSnafu)?;
                }
            }
            ReportFormat::Json => {
                serde_json::to_writer_pretty(&mut *out, params)
                    .map_err(std::io::Error::other)
                    .context(OutputSnafu)?;
                writeln!(out).context(OutputSnafu)?;
            }
        }
        Ok(())
    }
}

fn render_key_value(report: &HealthReport, out: &mut impl Write) -> Result<()> {
    for section in sections_in_order(report) {
        let count = section
            .count()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "failed".to_string());
        writeln!(
            out,
            "{KEY_VALUE_PREFIX}\t{}\t{}",
            section.kind.as_str(),
            count
        )
        .context(OutputSnafu)?;
    }
    Ok(())
}

fn render_markdown(report: &HealthReport, out: &mut impl Write) -> Result<()> {
    writeln!(out, "# Index Health Report\n").context(OutputSnafu)?;
    writeln!(out, "- **Primary**: {}", report.primary).context(OutputSnafu)?;
    writeln!(out, "- **Schemas**: {}\n", report.schemas.join(", ")).context(OutputSnafu)?;

    for section in sections_in_order(report) {
        let title = section.kind.title();
        match &section.outcome {
            SectionOutcome::Failed { error } => {
                writeln!(out, "## {title} (failed)\n").context(OutputSnafu)?;
                writeln!(out, "> {error}\n").context(OutputSnafu)?;
            }
            SectionOutcome::Completed {
                records,
                skipped_hosts,
            } => {
                writeln!(out, "## {title} ({})\n", records.len()).context(OutputSnafu)?;
                if records.is_empty() {
                    writeln!(out, "No issues found.\n").context(OutputSnafu)?;
                } else {
                    for line in describe(records) {
                        writeln!(out, "- {line}").context(OutputSnafu)?;
                    }
                    writeln!(out).context(OutputSnafu)?;
                }
                if !skipped_hosts.is_empty() {
                    writeln!(out, "_Skipped standbys: {}_\n", skipped_hosts.iter().join(", "))
                        .context(OutputSnafu)?;
                }
            }
        }
    }
    Ok(())
}

fn render_json(report: &HealthReport, out: &mut impl Write) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, report)
        .map_err(std::io::Error::other)
        .context(OutputSnafu)?;
    writeln!(out).context(OutputSnafu)
}

fn sections_in_order(report: &HealthReport) -> impl Iterator<Item = &Section> {
    report.sections.iter().sorted_by_key(|s| s.kind)
}

fn describe(findings: &Findings) -> Vec<String> {
    match findings {
        Findings::Indexes(records) => records
            .iter()
            .map(|i| format!("{}: {}", i.table_name(), i.index_name()))
            .collect(),
        Findings::DuplicatedIndexes(records) => records
            .iter()
            .map(|g| {
                format!(
                    "{}: {} ({} bytes)",
                    g.table_name(),
                    g.index_names().join(", "),
                    g.total_size_bytes()
                )
            })
            .collect(),
        Findings::UnusedIndexes(records) => records
            .iter()
            .map(|i| {
                format!(
                    "{}: {} ({} bytes, {} scans)",
                    i.table_name(),
                    i.index_name(),
                    i.index_size_bytes(),
                    i.index_scans()
                )
            })
            .collect(),
        Findings::ForeignKeys(records) => records
            .iter()
            .map(|fk| {
                format!(
                    "{}: {} ({})",
                    fk.table_name(),
                    fk.constraint_name(),
                    fk.columns().join(", ")
                )
            })
            .collect(),
        Findings::TablesWithMissingIndexes(records) => records
            .iter()
            .map(|t| {
                format!(
                    "{}: {} seq scans, {} index scans",
                    t.table_name(),
                    t.seq_scans(),
                    t.index_scans()
                )
            })
            .collect(),
        Findings::Tables(records) => records
            .iter()
            .map(|t| format!("{} ({} bytes)", t.table_name(), t.table_size_bytes()))
            .collect(),
        Findings::IndexesWithNulls(records) => records
            .iter()
            .map(|i| {
                format!(
                    "{}: {} (nullable: {})",
                    i.table_name(),
                    i.index_name(),
                    i.nullable_field()
                )
            })
            .collect(),
        Findings::IndexesWithBloat(records) => records
            .iter()
            .map(|i| {
                format!(
                    "{}: {} ({} of {} bytes, {}%)",
                    i.table_name(),
                    i.index_name(),
                    i.bloat_size_bytes(),
                    i.index_size_bytes(),
                    i.bloat_percentage()
                )
            })
            .collect(),
        Findings::TablesWithBloat(records) => records
            .iter()
            .map(|t| {
                format!(
                    "{} ({} of {} bytes, {}%)",
                    t.table_name(),
                    t.bloat_size_bytes(),
                    t.table_size_bytes(),
                    t.bloat_percentage()
                )
            })
            .collect(),
    }
}
