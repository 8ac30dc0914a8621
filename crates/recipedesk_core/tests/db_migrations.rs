use recipedesk_core::db::migrations::{latest_version, schema_version};
use recipedesk_core::db::{open_db, open_db_in_memory, DbError};
use rusqlite::Connection;

const EDITOR_TABLES: &[&str] = &["images", "attachment_files", "documents", "kv_entries"];

fn table_names(conn: &Connection) -> Vec<String> {
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name;")
        .unwrap();
    stmt.query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
}

#[test]
fn fresh_store_gets_every_editor_table() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn).unwrap(), latest_version());
    let tables = table_names(&conn);
    for table in EDITOR_TABLES {
        assert!(tables.iter().any(|name| name == table), "missing {table}");
    }
}

#[test]
fn reopening_a_store_keeps_saved_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kitchen.db");

    {
        let conn = open_db(&path).unwrap();
        conn.execute(
            "INSERT INTO kv_entries (key, value, updated_at) VALUES ('session', '[]', 7);",
            [],
        )
        .unwrap();
    }

    let conn = open_db(&path).unwrap();
    let value: String = conn
        .query_row(
            "SELECT value FROM kv_entries WHERE key = 'session';",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(value, "[]");
    assert_eq!(schema_version(&conn).unwrap(), latest_version());
}

#[test]
fn store_from_a_newer_build_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("newer.db");
    Connection::open(&path)
        .unwrap()
        .pragma_update(None, "user_version", latest_version() + 5)
        .unwrap();

    match open_db(&path) {
        Err(DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        }) => {
            assert_eq!(db_version, latest_version() + 5);
            assert_eq!(latest_supported, latest_version());
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("newer schema must be refused"),
    }
}

#[test]
fn failed_upgrade_leaves_version_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clash.db");
    // A pre-existing `documents` table makes the second step fail.
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("CREATE TABLE documents (id TEXT PRIMARY KEY);")
        .unwrap();
    drop(conn);

    match open_db(&path) {
        Err(DbError::MigrationFailed { version, .. }) => assert_eq!(version, 2),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("clashing table must abort the upgrade"),
    }
    let conn = Connection::open(&path).unwrap();
    assert_eq!(schema_version(&conn).unwrap(), 0);
    assert!(!table_names(&conn).iter().any(|name| name == "images"));
}
