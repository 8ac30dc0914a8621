//! Editor domain model.
//!
//! # Responsibility
//! - Define the recipe document schema, tabs and blob identities.
//! - Keep behavior limited to structural queries and validation.

pub mod blob;
pub mod document;
pub mod tab;
