//! Command-line driver for the RecipeDesk core.
//!
//! # Responsibility
//! - Provide probes (`ping`, `version`) to verify `recipedesk_core` linkage.
//! - Export, import and list saved documents of a local database using the
//!   directory form of the archive layout.
//!
//! # Invariants
//! - Failures are printed to stderr and reported through the exit code;
//!   the driver never panics on bad input.

use log::{error, info};
use recipedesk_core::service::transfer::{build_export, import_document_json, import_entries};
use recipedesk_core::{
    core_version, default_log_level, init_logging, open_db, ping, read_tree, write_tree,
    DocumentRepository, EditorConfig, ImportReport, SessionRepository, SqliteBlobStore,
    SqliteDocumentRepository, SqliteEditorSession, SqliteSessionRepository, SystemClock,
};
use rusqlite::Connection;
use std::path::Path;
use std::process::ExitCode;
use std::rc::Rc;

const LOG_DIR_ENV: &str = "RECIPEDESK_LOG_DIR";
const CONFIG_ENV: &str = "RECIPEDESK_CONFIG";
const USAGE: &str = "usage: recipedesk <ping|version|list <db>|export <db> <dir>|import <db> <dir|file.json>>";

fn main() -> ExitCode {
    if let Ok(log_dir) = std::env::var(LOG_DIR_ENV) {
        if let Err(err) = init_logging(default_log_level(), &log_dir) {
            eprintln!("logging disabled: {err}");
        }
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let command = args.first().copied().unwrap_or("help");
    info!("event=cli_command module=cli status=start command={command}");
    let result = match args.as_slice() {
        ["ping"] => {
            println!("recipedesk_core ping={}", ping());
            Ok(())
        }
        ["version"] => {
            println!("recipedesk_core version={}", core_version());
            Ok(())
        }
        ["list", db] => list(db),
        ["export", db, dir] => export(db, dir),
        ["import", db, source] => import(db, source),
        _ => Err(USAGE.to_string()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("event=cli_command module=cli status=error command={command}");
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn list(db: &str) -> Result<(), String> {
    let conn = open_db(db).map_err(|err| format!("cannot open {db}: {err}"))?;
    let documents = SqliteDocumentRepository::try_new(&conn).map_err(|err| err.to_string())?;
    for saved in documents.list_documents().map_err(|err| err.to_string())? {
        println!("{}\t{}\t{}", saved.id, saved.updated_at, saved.title);
    }
    Ok(())
}

fn export(db: &str, dir: &str) -> Result<(), String> {
    let conn = open_db(db).map_err(|err| format!("cannot open {db}: {err}"))?;
    let documents = SqliteDocumentRepository::try_new(&conn).map_err(|err| err.to_string())?;
    let blobs = SqliteBlobStore::try_new(&conn).map_err(|err| err.to_string())?;

    let bundle = build_export(&documents, &blobs, |stage| println!("export {stage:?}"))
        .map_err(|err| err.to_string())?;
    write_tree(dir, &bundle.entries).map_err(|err| err.to_string())?;

    println!(
        "exported documents={} entries={} missing={}",
        bundle.documents,
        bundle.entries.len(),
        bundle.missing.len()
    );
    for missing in &bundle.missing {
        println!("missing {} {}", missing.document_id, missing.blob);
    }
    Ok(())
}

fn import(db: &str, source: &str) -> Result<(), String> {
    let conn = open_db(db).map_err(|err| format!("cannot open {db}: {err}"))?;
    let mut session = open_session(&conn)?;

    let path = Path::new(source);
    let report = if path.is_dir() {
        let entries = read_tree(path).map_err(|err| err.to_string())?;
        import_entries(&mut session, entries)
    } else {
        let bytes = std::fs::read(path).map_err(|err| format!("cannot read {source}: {err}"))?;
        import_document_json(&mut session, source, &bytes).map_err(|err| err.to_string())?
    };

    // A CLI import has no user to confirm retention, so imported tabs are saved.
    for tab_id in &report.tabs {
        session.save_tab(*tab_id).map_err(|err| err.to_string())?;
    }
    session
        .persist_snapshot()
        .map_err(|err| err.to_string())?;
    print_import_report(&report);
    Ok(())
}

fn open_session(conn: &Connection) -> Result<SqliteEditorSession<'_>, String> {
    let config = match std::env::var(CONFIG_ENV) {
        Ok(path) => EditorConfig::load(&path).map_err(|err| err.to_string())?,
        Err(_) => EditorConfig::default(),
    };
    let blobs = SqliteBlobStore::try_new(conn).map_err(|err| err.to_string())?;
    let documents = SqliteDocumentRepository::try_new(conn).map_err(|err| err.to_string())?;
    let snapshots = SqliteSessionRepository::try_new(conn).map_err(|err| err.to_string())?;
    // Imports start from an empty tab list rather than a previous session.
    snapshots
        .clear_snapshot()
        .map_err(|err| err.to_string())?;
    SqliteEditorSession::open(blobs, documents, snapshots, config, Rc::new(SystemClock))
        .map_err(|err| err.to_string())
}

fn print_import_report(report: &ImportReport) {
    println!(
        "imported tabs={} blobs={} failures={} missing={}",
        report.tabs.len(),
        report.stored_blobs.len(),
        report.failures.len(),
        report.missing.len()
    );
    for failure in &report.failures {
        println!("failed {}: {}", failure.path, failure.reason);
    }
    for missing in &report.missing {
        println!("missing {} {}", missing.document_title, missing.blob);
    }
}
