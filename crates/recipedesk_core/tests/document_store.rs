use recipedesk_core::db::open_db_in_memory;
use recipedesk_core::model::tab::PersistedSessionSnapshot;
use recipedesk_core::{
    Document, DocumentRepository, MediaRef, SessionRepository, SqliteDocumentRepository,
    SqliteSessionRepository, Step, StoreError, Tab,
};
use uuid::Uuid;

fn document(title: &str) -> Document {
    let mut step = Step::new("Retrieve");
    step.media.push(MediaRef::local("batch-retrieve-image"));
    Document {
        title: title.to_string(),
        category: "Batch".to_string(),
        steps: vec![step],
        editor_id: Some(Uuid::new_v4()),
        ..Document::default()
    }
}

#[test]
fn saved_document_round_trips_without_editor_identity() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteDocumentRepository::try_new(&conn).unwrap();

    repo.save_document("nightly-batch", &document("Nightly batch"))
        .unwrap();

    let saved = repo.get_document("nightly-batch").unwrap().unwrap();
    assert_eq!(saved.id, "nightly-batch");
    assert_eq!(saved.title, "Nightly batch");
    assert_eq!(saved.document.id.as_deref(), Some("nightly-batch"));
    assert!(saved.document.editor_id.is_none());
    assert_eq!(
        saved.document.steps[0].media[0].source,
        "local://batch-retrieve-image"
    );
    assert!(repo.get_document("other").unwrap().is_none());
}

#[test]
fn saving_same_id_replaces_previous_body() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteDocumentRepository::try_new(&conn).unwrap();

    repo.save_document("report", &document("Report")).unwrap();
    let mut changed = document("Report");
    changed.summary = "second".to_string();
    repo.save_document("report", &changed).unwrap();

    let listed = repo.list_documents().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].document.summary, "second");
}

#[test]
fn list_orders_by_update_time_then_id() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteDocumentRepository::try_new(&conn).unwrap();
    repo.save_document("b", &document("B")).unwrap();
    repo.save_document("a", &document("A")).unwrap();
    repo.save_document("c", &document("C")).unwrap();
    conn.execute("UPDATE documents SET updated_at = 1000;", [])
        .unwrap();
    conn.execute("UPDATE documents SET updated_at = 2000 WHERE id = 'c';", [])
        .unwrap();

    let ids: Vec<String> = repo
        .list_documents()
        .unwrap()
        .into_iter()
        .map(|saved| saved.id)
        .collect();
    assert_eq!(ids, vec!["c", "a", "b"]);

    assert!(repo.delete_document("a").unwrap());
    assert!(!repo.delete_document("a").unwrap());
}

#[test]
fn corrupted_document_body_is_reported_as_invalid_data() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteDocumentRepository::try_new(&conn).unwrap();
    conn.execute(
        "INSERT INTO documents (id, title, body, updated_at) VALUES ('x', 'X', 'not json', 1);",
        [],
    )
    .unwrap();

    assert!(matches!(
        repo.get_document("x"),
        Err(StoreError::InvalidData(_))
    ));
}

#[test]
fn session_snapshot_save_load_clear() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteSessionRepository::try_new(&conn).unwrap();
    assert!(repo.load_snapshot().unwrap().is_none());

    let mut tab = Tab::new(document("Nightly batch"));
    tab.is_active = true;
    tab.has_changes = true;
    let snapshot = PersistedSessionSnapshot {
        active_tab_id: Some(tab.id),
        tabs: vec![tab],
    };
    repo.save_snapshot(&snapshot).unwrap();
    repo.save_snapshot(&snapshot).unwrap();

    assert_eq!(repo.load_snapshot().unwrap(), Some(snapshot));

    repo.clear_snapshot().unwrap();
    assert!(repo.load_snapshot().unwrap().is_none());
}
