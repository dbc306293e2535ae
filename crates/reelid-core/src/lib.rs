//! Core domain + application logic for the movie-identification DM bot.
//!
//! This crate is intentionally platform-agnostic. The account client, direct messaging,
//! the realtime feed and the vision model live behind ports (traits) implemented in adapter
//! crates.

pub mod bot;
pub mod config;
pub mod debug_dump;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod media;
pub mod message;
pub mod pending;
pub mod ports;
pub mod rate_limit;
pub mod replies;
pub mod session_store;

#[cfg(test)]
mod fakes;

pub use errors::{Error, Result};
