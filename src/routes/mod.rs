//! Route definitions for the logsieve API.

pub mod health;
pub mod ingestions;
