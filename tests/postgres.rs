//! End-to-end checks against a real PostgreSQL. Run with `cargo test -- --ignored`.

use pghealth::cluster::ClusterAggregator;
use pghealth::connection::{ConnectionCredentials, HighAvailabilityConnection, HostRef};
use pghealth::context::SchemaContext;
use pghealth::diagnostics::DiagnosticKind;
use pghealth::health::DatabaseHealth;
use pghealth::management::DatabaseManagement;
use pghealth::models::TableNameAware;
use rstest::rstest;
use sqlx::Connection;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;

struct Database {
    _node: ContainerAsync<Postgres>,
    credentials: ConnectionCredentials,
    connection: HighAvailabilityConnection,
}

impl Database {
    async fn start() -> Self {
        let node = Postgres::default().start().await.unwrap();
        let port = node.get_host_port_ipv4(5432).await.unwrap();
        let credentials = ConnectionCredentials {
            hosts: vec![HostRef::new("127.0.0.1", port)],
            database: "postgres".into(),
            username: "postgres".into(),
            password: "postgres".into(),
        };
        let connection = HighAvailabilityConnection::connect(&credentials)
            .await
            .unwrap();
        Self {
            _node: node,
            credentials,
            connection,
        }
    }

    async fn execute(&self, sql: &str) -> Result<(), sqlx::Error> {
        sqlx::query(sql)
            .execute(self.connection.primary().pool())
            .await
            .map(|_| ())
    }

    async fn count_rows(&self, table: &str) -> i64 {
        sqlx::query_scalar(&format!("select count(*) from {table}"))
            .fetch_one(self.connection.primary().pool())
            .await
            .unwrap()
    }

    /// Runs `sql` on a short-lived session so its statistics are flushed on exit.
    async fn execute_in_own_session(&self, sql: &str, times: usize) {
        let options = self
            .credentials
            .connect_options(&self.credentials.hosts[0]);
        let mut session = sqlx::postgres::PgConnection::connect_with(&options)
            .await
            .unwrap();
        for _ in 0..times {
            sqlx::query(sql).execute(&mut session).await.unwrap();
        }
        session.close().await.unwrap();
    }

    fn health(&self) -> DatabaseHealth {
        DatabaseHealth::new(ClusterAggregator::from_connection(&self.connection))
    }

    /// `clients` and `accounts` linked by a foreign key with no index behind it.
    async fn with_references(&self, ctx: &SchemaContext) {
        let schema = ctx.schema_name();
        if !ctx.is_default_schema() {
            self.execute(&format!("create schema {schema}")).await.unwrap();
        }
        self.execute(&format!(
            "create table {schema}.clients (
                id bigserial primary key,
                last_name varchar(255) not null,
                first_name varchar(255) not null,
                middle_name varchar(255),
                info jsonb
            )"
        ))
        .await
        .unwrap();
        self.execute(&format!(
            "create table {schema}.accounts (
                id bigserial primary key,
                client_id bigint not null,
                account_number varchar(50) not null unique,
                account_balance numeric(22, 2) not null default 0,
                deleted boolean not null default false,
                constraint c_accounts_fk_client_id foreign key (client_id) references {schema}.clients (id)
            )"
        ))
        .await
        .unwrap();
    }

    async fn with_data(&self, ctx: &SchemaContext) {
        let schema = ctx.schema_name();
        self.execute(&format!(
            "insert into {schema}.clients (last_name, first_name)
             select 'last' || g, 'first' || g from generate_series(1, 1000) g"
        ))
        .await
        .unwrap();
        self.execute(&format!(
            "insert into {schema}.accounts (client_id, account_number, account_balance)
             select (g % 1000) + 1, lpad(g::text, 20, '0'), g from generate_series(1, 10000) g"
        ))
        .await
        .unwrap();
    }
}

fn context(schema: &str) -> SchemaContext {
    SchemaContext::of(schema).unwrap()
}

#[tokio::test]
#[ignore = "requires docker"]
async fn single_host_is_the_primary() {
    let db = Database::start().await;
    let topology = db.connection.topology();
    assert!(topology.standbys.is_empty());
    assert_eq!(topology.primary.host(), "127.0.0.1");
}

#[rstest]
#[case("public")]
#[case("custom")]
#[tokio::test]
#[ignore = "requires docker"]
async fn finds_duplicated_indexes(#[case] schema: &str) {
    let db = Database::start().await;
    let ctx = context(schema);
    db.with_references(&ctx).await;
    db.execute(&format!(
        "create index i_accounts_account_number on {schema}.accounts (account_number)"
    ))
    .await
    .unwrap();

    let duplicated = db.health().get_duplicated_indexes(&[ctx.clone()]).await.unwrap();

    assert_eq!(duplicated.len(), 1);
    assert_eq!(duplicated[0].table_name(), ctx.enrich("accounts"));
    assert_eq!(
        duplicated[0].index_names(),
        vec![
            ctx.enrich("accounts_account_number_key"),
            ctx.enrich("i_accounts_account_number")
        ]
    );
    assert!(duplicated[0].total_size_bytes() >= 16384);
}

#[rstest]
#[case::hash(
    "create index i_clients_last_name_h1 on {s}.clients using hash (last_name)",
    "create index i_clients_last_name_h2 on {s}.clients using hash (last_name)"
)]
#[case::opclass(
    "create index i_clients_last_name on {s}.clients (last_name)",
    "create index i_clients_last_name_pattern on {s}.clients (last_name varchar_pattern_ops)"
)]
#[case::collation(
    "create index i_clients_last_name on {s}.clients (last_name)",
    "create index i_clients_last_name_c on {s}.clients (last_name collate \"C\")"
)]
#[tokio::test]
#[ignore = "requires docker"]
async fn look_alike_indexes_are_not_duplicates(#[case] first: &str, #[case] second: &str) {
    let db = Database::start().await;
    let ctx = context("custom");
    db.with_references(&ctx).await;
    for sql in [first, second] {
        db.execute(&sql.replace("{s}", ctx.schema_name()))
            .await
            .unwrap();
    }

    let health = db.health();
    let ctx = [ctx];
    assert!(health.get_duplicated_indexes(&ctx).await.unwrap().is_empty());
    assert!(health.get_intersected_indexes(&ctx).await.unwrap().is_empty());
}

#[rstest]
#[case("public")]
#[case("custom")]
#[tokio::test]
#[ignore = "requires docker"]
async fn finds_intersected_indexes(#[case] schema: &str) {
    let db = Database::start().await;
    let ctx = context(schema);
    db.with_references(&ctx).await;
    db.with_data(&ctx).await;
    db.execute(&format!(
        "create index i_clients_last_first on {schema}.clients (last_name, first_name)"
    ))
    .await
    .unwrap();
    db.execute(&format!(
        "create index i_clients_last_name on {schema}.clients (last_name)"
    ))
    .await
    .unwrap();

    let intersected = db
        .health()
        .get_intersected_indexes(&[ctx.clone()])
        .await
        .unwrap();

    assert_eq!(intersected.len(), 1);
    assert_eq!(intersected[0].table_name(), ctx.enrich("clients"));
    assert_eq!(
        intersected[0].index_names(),
        vec![
            ctx.enrich("i_clients_last_first"),
            ctx.enrich("i_clients_last_name")
        ]
    );
    assert!(db
        .health()
        .get_duplicated_indexes(&[ctx])
        .await
        .unwrap()
        .is_empty());
}

#[rstest]
#[case("public")]
#[case("custom")]
#[tokio::test]
#[ignore = "requires docker"]
async fn finds_unused_indexes(#[case] schema: &str) {
    let db = Database::start().await;
    let ctx = context(schema);
    db.with_references(&ctx).await;

    // Primary keys, unique constraints and foreign keys only.
    assert!(db
        .health()
        .get_unused_indexes(&[ctx.clone()])
        .await
        .unwrap()
        .is_empty());

    db.with_data(&ctx).await;
    db.execute(&format!(
        "create index i_clients_last_first on {schema}.clients (last_name, first_name)"
    ))
    .await
    .unwrap();
    db.execute(&format!(
        "create index i_accounts_client_id on {schema}.accounts (client_id)"
    ))
    .await
    .unwrap();

    let unused = db.health().get_unused_indexes(&[ctx.clone()]).await.unwrap();

    let names: Vec<_> = unused.iter().map(|i| i.index_name()).collect();
    // The index behind the foreign key is never reported.
    assert_eq!(names, vec![ctx.enrich("i_clients_last_first")]);
    assert_eq!(unused[0].index_scans(), 0);
}

#[rstest]
#[case("public")]
#[case("custom")]
#[tokio::test]
#[ignore = "requires docker"]
async fn finds_invalid_indexes(#[case] schema: &str) {
    let db = Database::start().await;
    let ctx = context(schema);
    if !ctx.is_default_schema() {
        db.execute(&format!("create schema {schema}")).await.unwrap();
    }
    db.execute(&format!("create table {schema}.t (v integer)"))
        .await
        .unwrap();
    db.execute(&format!("insert into {schema}.t values (1), (1)"))
        .await
        .unwrap();
    // Fails on the duplicate and leaves an invalid index behind.
    assert!(db
        .execute(&format!("create unique index concurrently i1 on {schema}.t (v)"))
        .await
        .is_err());

    let invalid = db.health().get_invalid_indexes(&[ctx.clone()]).await.unwrap();

    assert_eq!(invalid.len(), 1);
    assert_eq!(invalid[0].table_name(), ctx.enrich("t"));
    assert_eq!(invalid[0].index_name(), ctx.enrich("i1"));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn finds_invalid_indexes_in_every_schema() {
    let db = Database::start().await;
    for schema in ["demo", "test"] {
        db.execute(&format!("create schema {schema}")).await.unwrap();
        db.execute(&format!("create table {schema}.t (v integer)"))
            .await
            .unwrap();
        db.execute(&format!("insert into {schema}.t values (1), (1)"))
            .await
            .unwrap();
        assert!(db
            .execute(&format!("create unique index concurrently i1 on {schema}.t (v)"))
            .await
            .is_err());
    }

    let contexts = [context("demo"), context("test")];
    let invalid = db.health().get_invalid_indexes(&contexts).await.unwrap();

    let names: Vec<_> = invalid
        .iter()
        .map(|i| (i.table_name(), i.index_name()))
        .collect();
    assert_eq!(names, vec![("demo.t", "demo.i1"), ("test.t", "test.i1")]);
}

#[rstest]
#[case("public")]
#[case("custom")]
#[tokio::test]
#[ignore = "requires docker"]
async fn foreign_key_is_covered_by_a_leading_column_index(#[case] schema: &str) {
    let db = Database::start().await;
    let ctx = context(schema);
    db.with_references(&ctx).await;

    let health = db.health();
    let contexts = [ctx.clone()];

    let uncovered = health
        .get_foreign_keys_not_covered_with_index(&contexts)
        .await
        .unwrap();
    assert_eq!(uncovered.len(), 1);
    assert_eq!(uncovered[0].table_name(), ctx.enrich("accounts"));
    assert_eq!(uncovered[0].constraint_name(), "c_accounts_fk_client_id");
    assert_eq!(uncovered[0].columns(), ["client_id"]);

    // client_id is not the leading column here.
    db.execute(&format!(
        "create index i_accounts_id_client_id on {schema}.accounts (id, client_id)"
    ))
    .await
    .unwrap();
    assert_eq!(
        health
            .get_foreign_keys_not_covered_with_index(&contexts)
            .await
            .unwrap()
            .len(),
        1
    );

    db.execute(&format!(
        "create index i_accounts_client_id_id on {schema}.accounts (client_id, id)"
    ))
    .await
    .unwrap();
    assert!(health
        .get_foreign_keys_not_covered_with_index(&contexts)
        .await
        .unwrap()
        .is_empty());
}

#[rstest]
#[case("public")]
#[case("custom")]
#[tokio::test]
#[ignore = "requires docker"]
async fn finds_indexes_with_null_values(#[case] schema: &str) {
    let db = Database::start().await;
    let ctx = context(schema);
    db.with_references(&ctx).await;
    db.with_data(&ctx).await;
    db.execute(&format!(
        "create index i_clients_last_first on {schema}.clients (last_name, first_name)"
    ))
    .await
    .unwrap();
    db.execute(&format!(
        "create index i_clients_middle_name_not_null on {schema}.clients (middle_name)
         where middle_name is not null"
    ))
    .await
    .unwrap();

    let health = db.health();
    let contexts = [ctx.clone()];
    assert!(health
        .get_indexes_with_null_values(&contexts)
        .await
        .unwrap()
        .is_empty());

    db.execute(&format!(
        "create index i_clients_middle_name on {schema}.clients (middle_name)"
    ))
    .await
    .unwrap();

    let with_nulls = health.get_indexes_with_null_values(&contexts).await.unwrap();
    assert_eq!(with_nulls.len(), 1);
    assert_eq!(with_nulls[0].index_name(), ctx.enrich("i_clients_middle_name"));
    assert_eq!(with_nulls[0].nullable_field(), "middle_name");
}

#[rstest]
#[case("public")]
#[case("custom")]
#[tokio::test]
#[ignore = "requires docker"]
async fn finds_bloat_once_statistics_exist(#[case] schema: &str) {
    let db = Database::start().await;
    let ctx = context(schema);
    if !ctx.is_default_schema() {
        db.execute(&format!("create schema {schema}")).await.unwrap();
    }
    db.execute(&format!(
        "create table {schema}.bloated (id bigint primary key, payload text not null)"
    ))
    .await
    .unwrap();
    db.execute(&format!(
        "insert into {schema}.bloated select g, repeat('x', 100) from generate_series(1, 10000) g"
    ))
    .await
    .unwrap();
    db.execute(&format!("delete from {schema}.bloated where id % 2 = 0"))
        .await
        .unwrap();

    let health = db.health();
    let contexts = [ctx.clone()];

    // Nothing can be estimated without pg_stats.
    assert!(health.get_indexes_with_bloat(&contexts).await.unwrap().is_empty());
    assert!(health.get_tables_with_bloat(&contexts).await.unwrap().is_empty());

    db.execute(&format!("analyze {schema}.bloated")).await.unwrap();

    let index_bloat = health.get_indexes_with_bloat(&contexts).await.unwrap();
    assert_eq!(index_bloat.len(), 1);
    assert_eq!(index_bloat[0].index_name(), ctx.enrich("bloated_pkey"));
    assert!(index_bloat[0].bloat_size_bytes() > 0);
    assert!(index_bloat[0].bloat_percentage() >= 10);

    let table_bloat = health.get_tables_with_bloat(&contexts).await.unwrap();
    assert_eq!(table_bloat.len(), 1);
    assert_eq!(table_bloat[0].table_name(), ctx.enrich("bloated"));
    assert!(table_bloat[0].bloat_percentage() >= 10);

    // Above the estimated bloat, nothing is reported.
    let strict = [ctx.with_bloat_percentage_threshold(100).unwrap()];
    assert!(health.get_tables_with_bloat(&strict).await.unwrap().is_empty());
}

#[rstest]
#[case("public")]
#[case("custom")]
#[tokio::test]
#[ignore = "requires docker"]
async fn finds_tables_read_by_sequential_scans(#[case] schema: &str) {
    let db = Database::start().await;
    let ctx = context(schema);
    db.with_references(&ctx).await;
    db.with_data(&ctx).await;

    let health = db.health();
    let contexts = [ctx.clone()];
    let accounts = ctx.enrich("accounts");

    db.execute_in_own_session(
        &format!("select count(*) from {schema}.accounts where account_balance > 100"),
        10,
    )
    .await;

    // The statistics collector reports asynchronously.
    let mut tables = Vec::new();
    for _ in 0..40 {
        tables = health.get_tables_with_missing_indexes(&contexts).await.unwrap();
        if tables.iter().any(|t| t.table_name() == accounts) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    let found = tables
        .iter()
        .find(|t| t.table_name() == accounts)
        .expect("accounts is read by sequential scans");
    assert!(found.seq_scans() >= 10);
    assert!(found.seq_scans() > found.index_scans());
}

#[rstest]
#[case("public")]
#[case("custom")]
#[tokio::test]
#[ignore = "requires docker"]
async fn tables_without_primary_key_are_reported(#[case] schema: &str) {
    let db = Database::start().await;
    let ctx = context(schema);
    db.with_references(&ctx).await;
    db.execute(&format!(
        "create table {schema}.bad_clients (id bigint, name text)"
    ))
    .await
    .unwrap();

    let report = db
        .health()
        .collect(&DiagnosticKind::ALL, &[ctx.clone()])
        .await;

    assert!(!report.has_failures());
    assert_eq!(
        report
            .section(DiagnosticKind::TablesWithoutPrimaryKey)
            .unwrap()
            .count(),
        Some(1)
    );
    let tables = db
        .health()
        .get_tables_without_primary_key(&[ctx.clone()])
        .await
        .unwrap();
    assert_eq!(tables[0].table_name(), ctx.enrich("bad_clients"));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn unsafe_schema_names_never_reach_the_database() {
    let db = Database::start().await;
    let ctx = SchemaContext::of_default();
    db.with_references(&ctx).await;
    db.with_data(&ctx).await;
    db.execute("create index i_clients_middle_name on clients (middle_name)")
        .await
        .unwrap();
    let before = db.count_rows("clients").await;
    assert_eq!(before, 1000);

    assert!(SchemaContext::of("; truncate table clients;").is_err());
    assert!(SchemaContext::of("; select pg_sleep(100000000);").is_err());
    assert_eq!(db.count_rows("clients").await, before);

    let with_nulls = db
        .health()
        .get_indexes_with_null_values(&[ctx])
        .await
        .unwrap();
    assert_eq!(with_nulls.len(), 1);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn statistics_can_be_reset() {
    let db = Database::start().await;
    let management = DatabaseManagement::new(db.connection.clone());

    assert!(management.reset_statistics().await);
    assert!(management
        .last_stats_reset_timestamp()
        .await
        .unwrap()
        .is_some());
}
