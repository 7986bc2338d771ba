use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

pub const LATEST_SCHEMA_VERSION: u32 = 1;

const MIGRATIONS: &[(u32, &str)] = &[(
    1,
    r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#,
)];

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database operation failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("unsupported schema version {current}; latest supported is {latest}")]
    UnsupportedSchemaVersion { current: u32, latest: u32 },
}

pub fn open_connection(path: &str) -> Result<Connection, DbError> {
    Connection::open(path).map_err(DbError::from)
}

pub fn run_migrations(connection: &mut Connection) -> Result<(), DbError> {
    let current_version = schema_version(connection)?;

    if current_version > LATEST_SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchemaVersion {
            current: current_version,
            latest: LATEST_SCHEMA_VERSION,
        });
    }

    let transaction = connection.transaction()?;

    for (version, sql) in MIGRATIONS {
        if *version > current_version {
            transaction.execute_batch(sql)?;
            transaction.pragma_update(None, "user_version", version)?;
        }
    }

    transaction.commit()?;

    Ok(())
}

pub fn schema_version(connection: &Connection) -> Result<u32, DbError> {
    let version = connection.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

pub fn get_value(connection: &Connection, key: &str) -> Result<Option<String>, DbError> {
    let value = connection
        .query_row(
            "SELECT value FROM kv_store WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

/// Inserts or overwrites `key`. `updated_at` is an ISO-8601 timestamp.
pub fn put_value(
    connection: &Connection,
    key: &str,
    value: &str,
    updated_at: &str,
) -> Result<(), DbError> {
    connection.execute(
        "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, value, updated_at],
    )?;
    Ok(())
}

/// Returns whether a row was removed.
pub fn delete_value(connection: &Connection, key: &str) -> Result<bool, DbError> {
    let removed = connection.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
    Ok(removed > 0)
}

pub fn list_keys(connection: &Connection) -> Result<Vec<String>, DbError> {
    let mut statement = connection.prepare("SELECT key FROM kv_store ORDER BY key")?;
    let rows = statement.query_map([], |row| row.get(0))?;

    let mut keys = Vec::new();
    for row in rows {
        keys.push(row?);
    }

    Ok(keys)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{
        DbError, LATEST_SCHEMA_VERSION, delete_value, get_value, list_keys, open_connection,
        put_value, run_migrations, schema_version,
    };

    fn temp_db_path(name: &str) -> PathBuf {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join(name);
        std::mem::forget(dir);
        path
    }

    fn migrated(name: &str) -> rusqlite::Connection {
        let db_path = temp_db_path(name);
        let mut connection =
            open_connection(db_path.to_string_lossy().as_ref()).expect("db connection should open");
        run_migrations(&mut connection).expect("migrations should succeed");
        connection
    }

    #[test]
    fn migrates_fresh_database_to_latest_version() {
        let connection = migrated("fresh.sqlite");

        let version = schema_version(&connection).expect("schema version should be queryable");
        assert_eq!(version, LATEST_SCHEMA_VERSION);

        let table_exists: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='kv_store'",
                [],
                |row| row.get(0),
            )
            .expect("kv_store table check should work");
        assert_eq!(table_exists, 1);
    }

    #[test]
    fn keeps_existing_values_when_migrations_rerun() {
        let db_path = temp_db_path("rerun.sqlite");
        let mut connection =
            open_connection(db_path.to_string_lossy().as_ref()).expect("db connection should open");
        run_migrations(&mut connection).expect("first migration run should succeed");
        put_value(&connection, "preferences", "{}", "2026-03-01T08:00:00.000Z")
            .expect("put should succeed");

        run_migrations(&mut connection).expect("second migration run should succeed");

        assert_eq!(schema_version(&connection).expect("version"), LATEST_SCHEMA_VERSION);
        assert_eq!(
            get_value(&connection, "preferences").expect("get should succeed"),
            Some("{}".to_string())
        );
    }

    #[test]
    fn rejects_newer_schema_versions() {
        let db_path = temp_db_path("future.sqlite");
        let mut connection =
            open_connection(db_path.to_string_lossy().as_ref()).expect("db connection should open");
        connection
            .pragma_update(None, "user_version", 42)
            .expect("pragma update should succeed");

        let err = run_migrations(&mut connection).expect_err("future schema must be rejected");
        assert!(matches!(
            err,
            DbError::UnsupportedSchemaVersion {
                current: 42,
                latest: LATEST_SCHEMA_VERSION
            }
        ));
    }

    #[test]
    fn upserts_and_deletes_values() {
        let connection = migrated("kv.sqlite");

        assert_eq!(get_value(&connection, "missing").expect("get"), None);

        put_value(&connection, "prediction_cache", "{\"a\":1}", "2026-03-01T08:00:00.000Z")
            .expect("first put");
        put_value(&connection, "prediction_cache", "{\"a\":2}", "2026-03-01T08:00:30.000Z")
            .expect("second put");
        put_value(&connection, "predictor_model", "{}", "2026-03-01T08:00:30.000Z")
            .expect("model put");

        assert_eq!(
            get_value(&connection, "prediction_cache").expect("get"),
            Some("{\"a\":2}".to_string())
        );
        let updated_at: String = connection
            .query_row(
                "SELECT updated_at FROM kv_store WHERE key = 'prediction_cache'",
                [],
                |row| row.get(0),
            )
            .expect("updated_at query");
        assert_eq!(updated_at, "2026-03-01T08:00:30.000Z");
        assert_eq!(
            list_keys(&connection).expect("keys"),
            vec!["prediction_cache".to_string(), "predictor_model".to_string()]
        );

        assert!(delete_value(&connection, "prediction_cache").expect("delete"));
        assert!(!delete_value(&connection, "prediction_cache").expect("second delete"));
        assert_eq!(get_value(&connection, "prediction_cache").expect("get"), None);
    }
}
