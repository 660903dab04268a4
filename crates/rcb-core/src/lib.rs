//! Core domain + application logic for the RSS channel bot.
//!
//! This crate is framework-agnostic. The feed fetcher, the text generation
//! service and Telegram live behind ports (traits) implemented in adapter crates.

pub mod cache;
pub mod config;
pub mod controller;
pub mod domain;
pub mod enrich;
pub mod errors;
pub mod feed;
pub mod formatting;
pub mod logging;
pub mod publish;
pub mod stats;

pub use errors::{Error, Result};
