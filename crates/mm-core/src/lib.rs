//! Core domain + application logic for the MiniMaid poll bot.
//!
//! This crate is intentionally framework-agnostic. Telegram lives behind the
//! messaging port implemented in the adapter crate.

pub mod config;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod messaging;
pub mod poll;
pub mod render;
pub mod retry;

pub use errors::{Error, Result};
