//! Business logic services.

pub mod blob_store;
pub mod events;
pub mod findings_engine;
pub mod insights;
pub mod queries;
