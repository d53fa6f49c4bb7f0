//! Core domain logic for the GigaChat relay bot.
//!
//! This crate is intentionally transport-agnostic: everything that talks to
//! the outside world (Telegram, the GigaChat HTTP API) lives behind ports
//! (traits) implemented in adapter crates. The dialogue orchestrator, access
//! control, history store contract, and prompt assembly all live here so they
//! can be tested without network access.

pub mod access;
pub mod config;
pub mod dialogue;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod history;
pub mod llm;
pub mod logging;
pub mod prompt;
pub mod stats;

#[cfg(test)]
pub(crate) mod test_support;

pub use errors::{Error, Result};
