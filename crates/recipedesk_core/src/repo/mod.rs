//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define storage contracts for blobs, saved documents and the session
//!   snapshot.
//! - Isolate SQLite query details from session orchestration.
//!
//! # Invariants
//! - Every SQLite repository checks schema version and required tables in
//!   `try_new` before serving calls.

pub mod blob_repo;
pub mod common;
pub mod document_repo;
pub mod session_repo;
