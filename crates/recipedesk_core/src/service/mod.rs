//! Editor use-case services.
//!
//! # Responsibility
//! - Orchestrate the blob store, document and snapshot repositories into the
//!   tab session, naming, autosave and transfer use cases.
//! - Keep UI adapters decoupled from storage details.

pub mod autosave;
pub mod naming;
pub mod preview;
pub mod session;
pub mod transfer;
