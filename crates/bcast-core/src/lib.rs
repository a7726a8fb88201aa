//! Core domain + application logic for the broadcast bot.
//!
//! This crate is intentionally framework-agnostic. Telegram lives behind the
//! delivery port (trait) implemented in the adapter crate; persistence lives
//! behind the store ports.

pub mod broadcast;
pub mod config;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod ports;
pub mod security;
pub mod store;

pub use errors::{Error, Result};
