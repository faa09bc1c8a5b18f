use super::host::RowError;
use crate::context::SchemaContext;
use crate::models::{Table, TableWithBloat, TableWithMissingIndex};
use sqlx::postgres::PgRow;
use sqlx::Row;

type Result<T, E = RowError> = std::result::Result<T, E>;

// Tables smaller than five pages are ignored.
pub(super) const TABLES_WITH_MISSING_INDEXES: &str = r#"
    SELECT
        s.relname::text AS table_name,
        pg_relation_size(s.relid) AS table_size,
        coalesce(s.seq_scan, 0) AS seq_scans,
        coalesce(s.idx_scan, 0) AS index_scans
    FROM pg_catalog.pg_stat_all_tables s
    WHERE s.schemaname = $1::text
      AND pg_relation_size(s.relid) > 5 * current_setting('block_size')::bigint
      AND coalesce(s.seq_scan, 0) > coalesce(s.idx_scan, 0)
    ORDER BY s.relname
"#;

pub(super) const TABLES_WITHOUT_PRIMARY_KEY: &str = r#"
    SELECT
        t.relname::text AS table_name,
        pg_relation_size(t.oid) AS table_size
    FROM pg_catalog.pg_class t
    JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
    WHERE t.relkind = 'r'
      AND n.nspname = $1::text
      AND NOT EXISTS (
          SELECT 1
          FROM pg_catalog.pg_constraint c
          WHERE c.conrelid = t.oid
            AND c.contype = 'p'
      )
    ORDER BY t.relname
"#;

// Heap size estimate from pg_stats column widths: 24 bytes of tuple header
// plus a 4 byte line pointer, data aligned to 8 bytes, 24 bytes of page
// header. Tables without full statistics are skipped.
pub(super) const TABLES_WITH_BLOAT: &str = r#"
    WITH table_data AS (
        SELECT
            t.oid,
            n.nspname,
            t.relname,
            t.relpages::numeric AS relpages,
            greatest(t.reltuples, 0)::numeric AS reltuples,
            coalesce(
                substring(array_to_string(t.reloptions, ' ') FROM 'fillfactor=([0-9]+)')::numeric,
                100
            ) AS fillfactor,
            current_setting('block_size')::numeric AS bs
        FROM pg_catalog.pg_class t
        JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
        WHERE t.relkind = 'r'
          AND t.relpages > 0
          AND n.nspname = $1::text
    ),
    row_widths AS (
        SELECT
            d.oid,
            sum((1 - coalesce(s.null_frac, 0)) * coalesce(s.avg_width, 0))::numeric AS data_width,
            bool_and(s.attname IS NOT NULL) AS has_stats
        FROM table_data d
        JOIN pg_catalog.pg_attribute a
          ON a.attrelid = d.oid
         AND a.attnum > 0
         AND NOT a.attisdropped
        LEFT JOIN pg_catalog.pg_stats s
          ON s.schemaname = d.nspname
         AND s.tablename = d.relname
         AND s.attname = a.attname
        GROUP BY d.oid
    ),
    estimates AS (
        SELECT
            d.relname,
            d.relpages * d.bs AS table_size,
            d.bs * greatest(
                d.relpages - ceil(
                    d.reltuples * (28 + ceil(w.data_width / 8) * 8)
                    / ((d.bs - 24) * d.fillfactor / 100)
                ),
                0
            ) AS bloat_size
        FROM table_data d
        JOIN row_widths w ON w.oid = d.oid
        WHERE w.has_stats
    )
    SELECT
        relname::text AS table_name,
        table_size::bigint AS table_size,
        bloat_size::bigint AS bloat_size
    FROM estimates
    WHERE bloat_size > 0
      AND round(bloat_size * 100 / table_size) >= $2::integer
    ORDER BY relname
"#;

pub(super) fn decode_table(row: &PgRow, ctx: &SchemaContext) -> Result<Table> {
    Ok(Table::new(
        ctx.enrich(&row.try_get::<String, _>("table_name")?),
        row.try_get("table_size")?,
    )?)
}

pub(super) fn decode_missing_index(
    row: &PgRow,
    ctx: &SchemaContext,
) -> Result<TableWithMissingIndex> {
    Ok(TableWithMissingIndex::new(
        ctx.enrich(&row.try_get::<String, _>("table_name")?),
        row.try_get("table_size")?,
        row.try_get("seq_scans")?,
        row.try_get("index_scans")?,
    )?)
}

pub(super) fn decode_bloat(row: &PgRow, ctx: &SchemaContext) -> Result<TableWithBloat> {
    Ok(TableWithBloat::new(
        ctx.enrich(&row.try_get::<String, _>("table_name")?),
        row.try_get("table_size")?,
        row.try_get("bloat_size")?,
    )?)
}
