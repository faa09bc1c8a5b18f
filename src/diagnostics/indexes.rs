use super::host::RowError;
use crate::context::SchemaContext;
use crate::models::{
    DuplicatedIndexes, ForeignKey, Index, IndexWithBloat, IndexWithNulls, IndexWithSize,
    UnusedIndex,
};
use sqlx::postgres::PgRow;
use sqlx::Row;

type Result<T, E = RowError> = std::result::Result<T, E>;

pub(super) const INVALID_INDEXES: &str = r#"
    SELECT
        t.relname::text AS table_name,
        ic.relname::text AS index_name
    FROM pg_catalog.pg_index i
    JOIN pg_catalog.pg_class ic ON ic.oid = i.indexrelid
    JOIN pg_catalog.pg_class t ON t.oid = i.indrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
    WHERE n.nspname = $1::text
      AND NOT i.indisvalid
    ORDER BY t.relname, ic.relname
"#;

// Hash indexes never count as duplicates.
pub(super) const DUPLICATED_INDEXES: &str = r#"
    SELECT
        t.relname::text AS table_name,
        array_agg(ic.relname::text ORDER BY ic.relname) AS index_names,
        array_agg(pg_relation_size(i.indexrelid) ORDER BY ic.relname) AS index_sizes
    FROM pg_catalog.pg_index i
    JOIN pg_catalog.pg_class ic ON ic.oid = i.indexrelid
    JOIN pg_catalog.pg_class t ON t.oid = i.indrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
    JOIN pg_catalog.pg_am am ON am.oid = ic.relam
    WHERE n.nspname = $1::text
      AND am.amname <> 'hash'
    GROUP BY
        t.relname,
        i.indrelid,
        ic.relam,
        i.indkey::text,
        i.indclass::text,
        i.indcollation::text,
        coalesce(pg_get_expr(i.indexprs, i.indrelid), ''),
        coalesce(pg_get_expr(i.indpred, i.indrelid), '')
    HAVING count(*) > 1
    ORDER BY t.relname, sum(pg_relation_size(i.indexrelid)) DESC
"#;

// Pairs of indexes with the same access method and predicate where the key
// of one is a strict prefix of the other's.
pub(super) const INTERSECTED_INDEXES: &str = r#"
    WITH index_info AS (
        SELECT
            i.indrelid,
            ic.relam,
            t.relname::text AS table_name,
            ic.relname::text AS index_name,
            array_to_string(i.indkey::int2[], ' ') AS cols,
            coalesce(pg_get_expr(i.indpred, i.indrelid), '') AS pred,
            pg_relation_size(i.indexrelid) AS index_size
        FROM pg_catalog.pg_index i
        JOIN pg_catalog.pg_class ic ON ic.oid = i.indexrelid
        JOIN pg_catalog.pg_class t ON t.oid = i.indrelid
        JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
        WHERE n.nspname = $1::text
    )
    SELECT
        a.table_name,
        a.index_name AS first_index_name,
        a.index_size AS first_index_size,
        b.index_name AS second_index_name,
        b.index_size AS second_index_size
    FROM index_info a
    JOIN index_info b
      ON a.indrelid = b.indrelid
     AND a.relam = b.relam
     AND a.pred = b.pred
     AND a.index_name < b.index_name
     AND a.cols <> b.cols
     AND (
            (a.cols || ' ') LIKE (b.cols || ' %')
         OR (b.cols || ' ') LIKE (a.cols || ' %')
     )
    ORDER BY a.table_name, a.index_name, b.index_name
"#;

// Fewer than 50 scans counts as unused. Unique indexes and indexes backing
// a foreign key are never reported.
pub(super) const UNUSED_INDEXES: &str = r#"
    WITH foreign_key_indexes AS (
        SELECT i.indexrelid
        FROM pg_catalog.pg_constraint c
        JOIN pg_catalog.pg_index i
          ON i.indrelid = c.conrelid
         AND c.conkey::int2[] <@ i.indkey::int2[]
        WHERE c.contype = 'f'
    )
    SELECT
        s.relname::text AS table_name,
        s.indexrelname::text AS index_name,
        pg_relation_size(s.indexrelid) AS index_size,
        coalesce(s.idx_scan, 0) AS index_scans
    FROM pg_catalog.pg_stat_all_indexes s
    JOIN pg_catalog.pg_index i ON i.indexrelid = s.indexrelid
    WHERE s.schemaname = $1::text
      AND NOT i.indisunique
      AND s.indexrelid NOT IN (SELECT indexrelid FROM foreign_key_indexes)
      AND coalesce(s.idx_scan, 0) < 50
    ORDER BY s.relname, s.indexrelname
"#;

// A foreign key is covered when a non-partial index starts with all of its
// columns, in any order.
pub(super) const FOREIGN_KEYS_WITHOUT_INDEX: &str = r#"
    SELECT
        t.relname::text AS table_name,
        c.conname::text AS constraint_name,
        array_agg(a.attname::text ORDER BY u.attposition) AS columns
    FROM pg_catalog.pg_constraint c
    CROSS JOIN LATERAL unnest(c.conkey) WITH ORDINALITY AS u(attnum, attposition)
    JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
    JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = u.attnum
    WHERE c.contype = 'f'
      AND n.nspname = $1::text
      AND NOT EXISTS (
          SELECT 1
          FROM pg_catalog.pg_index i
          WHERE i.indrelid = c.conrelid
            AND i.indpred IS NULL
            AND (i.indkey::int2[])[0:cardinality(c.conkey) - 1] @> c.conkey
      )
    GROUP BY t.relname, c.conname, c.oid
    ORDER BY t.relname, c.conname
"#;

pub(super) const INDEXES_WITH_NULL_VALUES: &str = r#"
    SELECT
        t.relname::text AS table_name,
        ic.relname::text AS index_name,
        pg_relation_size(i.indexrelid) AS index_size,
        string_agg(a.attname::text, ', ' ORDER BY a.attnum) AS nullable_field
    FROM pg_catalog.pg_index i
    JOIN pg_catalog.pg_class ic ON ic.oid = i.indexrelid
    JOIN pg_catalog.pg_class t ON t.oid = i.indrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
    JOIN pg_catalog.pg_attribute a
      ON a.attrelid = i.indrelid
     AND a.attnum > 0
     AND a.attnum = ANY(i.indkey)
    WHERE n.nspname = $1::text
      AND NOT i.indisunique
      AND NOT a.attnotnull
      AND (
          i.indpred IS NULL
          OR position(a.attname::text IN pg_get_expr(i.indpred, i.indrelid)) = 0
      )
    GROUP BY t.relname, ic.relname, i.indexrelid
    ORDER BY t.relname, ic.relname
"#;

// B-tree size estimate from pg_stats column widths: 12 bytes of tuple
// overhead, data aligned to 8 bytes, 40 bytes of page header and special
// space, one metapage. Indexes without full statistics are skipped.
pub(super) const INDEXES_WITH_BLOAT: &str = r#"
    WITH index_data AS (
        SELECT
            i.indexrelid,
            i.indrelid,
            i.indkey,
            n.nspname,
            t.relname AS table_name,
            ic.relname AS index_name,
            ic.relpages::numeric AS relpages,
            greatest(ic.reltuples, 0)::numeric AS reltuples,
            coalesce(
                substring(array_to_string(ic.reloptions, ' ') FROM 'fillfactor=([0-9]+)')::numeric,
                90
            ) AS fillfactor,
            current_setting('block_size')::numeric AS bs
        FROM pg_catalog.pg_index i
        JOIN pg_catalog.pg_class ic ON ic.oid = i.indexrelid
        JOIN pg_catalog.pg_class t ON t.oid = i.indrelid
        JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
        JOIN pg_catalog.pg_am am ON am.oid = ic.relam
        WHERE am.amname = 'btree'
          AND ic.relpages > 0
          AND n.nspname = $1::text
    ),
    index_widths AS (
        SELECT
            d.indexrelid,
            sum((1 - coalesce(s.null_frac, 0)) * coalesce(s.avg_width, 0))::numeric AS data_width,
            bool_and(s.attname IS NOT NULL) AS has_stats
        FROM index_data d
        JOIN pg_catalog.pg_attribute a ON a.attrelid = d.indrelid AND a.attnum = ANY(d.indkey)
        LEFT JOIN pg_catalog.pg_stats s
          ON s.schemaname = d.nspname
         AND s.tablename = d.table_name
         AND s.attname = a.attname
        GROUP BY d.indexrelid
    ),
    estimates AS (
        SELECT
            d.table_name,
            d.index_name,
            d.relpages * d.bs AS index_size,
            d.bs * greatest(
                d.relpages - (
                    ceil(
                        d.reltuples * (12 + ceil(w.data_width / 8) * 8)
                        / ((d.bs - 40) * d.fillfactor / 100)
                    ) + 1
                ),
                0
            ) AS bloat_size
        FROM index_data d
        JOIN index_widths w ON w.indexrelid = d.indexrelid
        WHERE w.has_stats
    )
    SELECT
        table_name::text AS table_name,
        index_name::text AS index_name,
        index_size::bigint AS index_size,
        bloat_size::bigint AS bloat_size
    FROM estimates
    WHERE bloat_size > 0
      AND round(bloat_size * 100 / index_size) >= $2::integer
    ORDER BY table_name, index_name
"#;

pub(super) fn decode_index(row: &PgRow, ctx: &SchemaContext) -> Result<Index> {
    let table_name: String = row.try_get("table_name")?;
    let index_name: String = row.try_get("index_name")?;
    Ok(Index::new(ctx.enrich(&table_name), ctx.enrich(&index_name))?)
}

pub(super) fn decode_duplicated(row: &PgRow, ctx: &SchemaContext) -> Result<DuplicatedIndexes> {
    let table_name = ctx.enrich(&row.try_get::<String, _>("table_name")?);
    let names: Vec<String> = row.try_get("index_names")?;
    let sizes: Vec<i64> = row.try_get("index_sizes")?;

    let members = names
        .iter()
        .zip(sizes)
        .map(|(name, size)| IndexWithSize::new(table_name.as_str(), ctx.enrich(name), size))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(DuplicatedIndexes::new(members)?)
}

pub(super) fn decode_intersected(row: &PgRow, ctx: &SchemaContext) -> Result<DuplicatedIndexes> {
    let table_name = ctx.enrich(&row.try_get::<String, _>("table_name")?);
    let first = IndexWithSize::new(
        table_name.as_str(),
        ctx.enrich(&row.try_get::<String, _>("first_index_name")?),
        row.try_get("first_index_size")?,
    )?;
    let second = IndexWithSize::new(
        table_name.as_str(),
        ctx.enrich(&row.try_get::<String, _>("second_index_name")?),
        row.try_get("second_index_size")?,
    )?;
    Ok(DuplicatedIndexes::new([first, second])?)
}

pub(super) fn decode_unused(row: &PgRow, ctx: &SchemaContext) -> Result<UnusedIndex> {
    Ok(UnusedIndex::new(
        ctx.enrich(&row.try_get::<String, _>("table_name")?),
        ctx.enrich(&row.try_get::<String, _>("index_name")?),
        row.try_get("index_size")?,
        row.try_get("index_scans")?,
    )?)
}

pub(super) fn decode_foreign_key(row: &PgRow, ctx: &SchemaContext) -> Result<ForeignKey> {
    let columns: Vec<String> = row.try_get("columns")?;
    Ok(ForeignKey::new(
        ctx.enrich(&row.try_get::<String, _>("table_name")?),
        row.try_get::<String, _>("constraint_name")?,
        columns,
    )?)
}

pub(super) fn decode_with_nulls(row: &PgRow, ctx: &SchemaContext) -> Result<IndexWithNulls> {
    Ok(IndexWithNulls::new(
        ctx.enrich(&row.try_get::<String, _>("table_name")?),
        ctx.enrich(&row.try_get::<String, _>("index_name")?),
        row.try_get("index_size")?,
        row.try_get::<String, _>("nullable_field")?,
    )?)
}

pub(super) fn decode_bloat(row: &PgRow, ctx: &SchemaContext) -> Result<IndexWithBloat> {
    Ok(IndexWithBloat::new(
        ctx.enrich(&row.try_get::<String, _>("table_name")?),
        ctx.enrich(&row.try_get::<String, _>("index_name")?),
        row.try_get("index_size")?,
        row.try_get("bloat_size")?,
    )?)
}
