//! Table layout for the three tables an engine reads and writes.

use warden_config::AuthConfig;
use warden_store::{MemoryStore, SqlDialect};
use warden_types::Status;

const DIALECT: SqlDialect = SqlDialect::Standard;

fn time_columns(config: &AuthConfig) -> String {
    if !config.write_time {
        return String::new();
    }
    let ty = if config.time_format.is_empty() {
        "BIGINT"
    } else {
        "VARCHAR"
    };
    format!(
        ",\n    {} {ty},\n    {} {ty}",
        DIALECT.quote_ident("create_time"),
        DIALECT.quote_ident("update_time")
    )
}

fn sequence_name(table: &str) -> String {
    format!("{table}_id_seq")
}

/// `CREATE` statements for the configured tables, in execution order.
///
/// Rule and role ids come from sequences. The access table has no unique
/// index over `(uid, gid)`; duplicates are rejected by the DAO.
pub fn create_statements(config: &AuthConfig) -> Vec<String> {
    let times = time_columns(config);
    let q = |name: &str| DIALECT.quote_ident(name);
    let effective = config.status_codes().code(Status::Effective);

    let mut statements = Vec::new();
    for table in [&config.rule_table, &config.role_table] {
        statements.push(format!(
            "CREATE SEQUENCE IF NOT EXISTS {} START 1",
            q(&sequence_name(table))
        ));
    }

    statements.push(format!(
        "CREATE TABLE IF NOT EXISTS {table} (\n    \
         {id} BIGINT PRIMARY KEY DEFAULT nextval('{seq}'),\n    \
         {pid} BIGINT NOT NULL DEFAULT 0,\n    \
         {pids} VARCHAR NOT NULL DEFAULT '0',\n    \
         {title} VARCHAR NOT NULL DEFAULT '',\n    \
         {rule} VARCHAR NOT NULL DEFAULT '',\n    \
         {remark} VARCHAR NOT NULL DEFAULT '',\n    \
         {status} BIGINT NOT NULL DEFAULT {effective}{times}\n)",
        table = q(&config.rule_table),
        id = q("id"),
        seq = sequence_name(&config.rule_table),
        pid = q("pid"),
        pids = q("pids"),
        title = q("title"),
        rule = q("rule"),
        remark = q("remark"),
        status = q("status"),
    ));

    statements.push(format!(
        "CREATE TABLE IF NOT EXISTS {table} (\n    \
         {id} BIGINT PRIMARY KEY DEFAULT nextval('{seq}'),\n    \
         {pid} BIGINT NOT NULL DEFAULT 0,\n    \
         {pids} VARCHAR NOT NULL DEFAULT '0',\n    \
         {title} VARCHAR NOT NULL DEFAULT '',\n    \
         {rules} VARCHAR NOT NULL DEFAULT '',\n    \
         {status} BIGINT NOT NULL DEFAULT {effective}{times}\n)",
        table = q(&config.role_table),
        id = q("id"),
        seq = sequence_name(&config.role_table),
        pid = q("pid"),
        pids = q("pids"),
        title = q("title"),
        rules = q("rules"),
        status = q("status"),
    ));

    statements.push(format!(
        "CREATE TABLE IF NOT EXISTS {table} (\n    \
         {uid} BIGINT NOT NULL,\n    \
         {gid} BIGINT NOT NULL{times}\n)",
        table = q(&config.access_table),
        uid = q("uid"),
        gid = q("gid"),
    ));

    statements
}

/// A [`MemoryStore`] with the configured tables registered.
pub fn memory_store(config: &AuthConfig) -> MemoryStore {
    MemoryStore::new()
        .with_auto_increment(config.rule_table.as_str())
        .with_auto_increment(config.role_table.as_str())
        .with_table(config.access_table.as_str())
}

/// A [`DuckDbStore`](warden_store::DuckDbStore) with the configured tables
/// created.
#[cfg(feature = "duckdb")]
pub fn duckdb_store(
    config: &AuthConfig,
    store: warden_store::DuckDbStore,
) -> warden_store::Result<warden_store::DuckDbStore> {
    let store = store
        .with_auto_increment(config.rule_table.as_str())
        .with_auto_increment(config.role_table.as_str());
    store.execute_batch(&format!("{};", create_statements(config).join(";\n")))?;
    Ok(store)
}
