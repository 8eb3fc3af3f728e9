//! Core domain + application logic for the Slack GPT bot.
//!
//! This crate is framework-agnostic. Slack / OpenAI / the usage ledger backends
//! live behind ports (traits) implemented in adapter crates.

pub mod config;
pub mod conversation;
pub mod domain;
pub mod errors;
pub mod ledger;
pub mod logging;
pub mod orchestrator;
pub mod ports;
pub mod retry;

pub use errors::{Error, Result};
