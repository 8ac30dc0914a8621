use recipedesk_core::db::open_db_in_memory;
use recipedesk_core::{
    BlobKind, BlobStore, Channel, Document, DocumentRepository, EditorConfig, EditorSession,
    FileUpload, ImageTarget, ManualClock, SavedDocument, SessionRepository, SqliteBlobStore,
    SqliteDocumentRepository, SqliteSessionRepository, Step, StoreResult,
};
use rusqlite::Connection;
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

struct CountingDocuments<'c> {
    inner: SqliteDocumentRepository<'c>,
    writes: Cell<usize>,
}

impl DocumentRepository for CountingDocuments<'_> {
    fn save_document(&self, id: &str, document: &Document) -> StoreResult<()> {
        self.writes.set(self.writes.get() + 1);
        self.inner.save_document(id, document)
    }

    fn get_document(&self, id: &str) -> StoreResult<Option<SavedDocument>> {
        self.inner.get_document(id)
    }

    fn list_documents(&self) -> StoreResult<Vec<SavedDocument>> {
        self.inner.list_documents()
    }

    fn delete_document(&self, id: &str) -> StoreResult<bool> {
        self.inner.delete_document(id)
    }
}

type TestSession<'c> =
    EditorSession<SqliteBlobStore<'c>, CountingDocuments<'c>, SqliteSessionRepository<'c>>;

fn open_session(conn: &Connection, clock: Rc<ManualClock>) -> TestSession<'_> {
    EditorSession::open(
        SqliteBlobStore::try_new(conn).unwrap(),
        CountingDocuments {
            inner: SqliteDocumentRepository::try_new(conn).unwrap(),
            writes: Cell::new(0),
        },
        SqliteSessionRepository::try_new(conn).unwrap(),
        EditorConfig::default(),
        clock,
    )
    .unwrap()
}

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

#[test]
fn burst_of_edits_produces_one_durable_save() {
    let conn = open_db_in_memory().unwrap();
    let clock = Rc::new(ManualClock::new());
    let mut session = open_session(&conn, clock.clone());
    let tab = session.active_tab_id().unwrap();

    for text in ["N", "Ni", "Nig", "Nigh", "Nightly"] {
        session
            .update_document(tab, |doc| doc.title = text.to_string())
            .unwrap();
        clock.advance(ms(200));
        assert!(!session.tick().contains(&Channel::Autosave));
    }
    assert_eq!(session.documents().writes.get(), 0);
    assert!(session.tab(tab).unwrap().has_changes);

    clock.advance(ms(3000));
    let fired = session.tick();

    assert!(fired.contains(&Channel::Autosave));
    assert_eq!(session.documents().writes.get(), 1);
    assert!(!session.tab(tab).unwrap().has_changes);
    assert!(!session.is_pending(Channel::Autosave));

    clock.advance(ms(5000));
    assert!(session.tick().is_empty());
    assert_eq!(session.documents().writes.get(), 1);
}

#[test]
fn autosave_writes_session_snapshot() {
    let conn = open_db_in_memory().unwrap();
    let clock = Rc::new(ManualClock::new());
    let mut session = open_session(&conn, clock.clone());
    let tab = session.active_tab_id().unwrap();
    session
        .update_document(tab, |doc| doc.title = "Snapshot me".to_string())
        .unwrap();

    clock.advance(ms(3000));
    session.tick();

    let snapshot = SqliteSessionRepository::try_new(&conn)
        .unwrap()
        .load_snapshot()
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.active_tab_id, Some(tab));
    assert_eq!(snapshot.tabs[0].document.title, "Snapshot me");
    assert!(!snapshot.tabs[0].has_changes);
}

#[test]
fn preview_channel_fires_well_before_autosave() {
    let conn = open_db_in_memory().unwrap();
    let clock = Rc::new(ManualClock::new());
    let mut session = open_session(&conn, clock.clone());
    let tab = session.active_tab_id().unwrap();

    session
        .update_document(tab, |doc| {
            doc.title = "Preview me".to_string();
            doc.summary = "Pulls **all** rows".to_string();
        })
        .unwrap();
    clock.advance(ms(60));

    assert_eq!(session.tick(), vec![Channel::Preview]);
    let preview = session.preview().unwrap();
    assert!(preview.markdown.starts_with("# Preview me"));
    assert_eq!(
        preview.summary_text.as_deref(),
        Some("Preview me Pulls all rows")
    );
    assert_eq!(session.documents().writes.get(), 0);
}

#[test]
fn continuous_input_is_saved_on_shutdown() {
    let conn = open_db_in_memory().unwrap();
    let clock = Rc::new(ManualClock::new());
    let mut session = open_session(&conn, clock.clone());
    let tab = session.active_tab_id().unwrap();

    for step in 0..20 {
        session
            .update_document(tab, |doc| doc.notes = format!("line {step}"))
            .unwrap();
        clock.advance(ms(1000));
        session.tick();
    }
    assert_eq!(session.documents().writes.get(), 0);

    let report = session.shutdown();

    assert_eq!(report.saved, vec![tab]);
    assert_eq!(session.documents().writes.get(), 1);
    assert!(!session.is_pending(Channel::Autosave));
}

#[test]
fn rename_pending_at_shutdown_is_applied_before_saving() {
    let conn = open_db_in_memory().unwrap();
    let mut session = open_session(&conn, Rc::new(ManualClock::new()));
    let tab = session.active_tab_id().unwrap();
    session
        .update_document(tab, |doc| {
            doc.title = "Nightly batch".to_string();
            doc.category = "Batch".to_string();
            doc.steps.push(Step::new("Retrieve"));
        })
        .unwrap();
    let png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
    session
        .attach_image(
            tab,
            ImageTarget::Step(0),
            FileUpload::new("photo.png", Some("image/png"), png),
        )
        .unwrap();
    session
        .update_document(tab, |doc| doc.steps[0].label = "Fetch".to_string())
        .unwrap();

    let report = session.shutdown();

    assert_eq!(report.saved, vec![tab]);
    let saved = session
        .documents()
        .get_document("nightly-batch")
        .unwrap()
        .unwrap();
    assert_eq!(
        saved.document.steps[0].media[0].local_key(),
        Some("batch-fetch-image")
    );
    let blobs = session.blobs();
    assert!(blobs.exists(BlobKind::Image, "batch-fetch-image").unwrap());
    assert!(!blobs.exists(BlobKind::Image, "batch-retrieve-image").unwrap());
}

#[test]
fn closed_tab_is_not_autosaved() {
    let conn = open_db_in_memory().unwrap();
    let clock = Rc::new(ManualClock::new());
    let mut session = open_session(&conn, clock.clone());
    let tab = session.active_tab_id().unwrap();
    session
        .update_document(tab, |doc| doc.title = "Throwaway".to_string())
        .unwrap();

    session.close_tab(tab, |_| recipedesk_core::CloseConfirmation::Discard);
    clock.advance(ms(3000));
    session.tick();

    assert_eq!(session.documents().writes.get(), 0);
}
