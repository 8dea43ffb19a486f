//! # Nomen Common Library
//!
//! Shared code for the catalog normalization services:
//! - Error kinds and the common `Result` alias
//! - Configuration file loading and data folder resolution
//! - SQLite pool setup

pub mod config;
pub mod error;
#[cfg(feature = "sqlx")]
pub mod pool;

pub use error::{Error, Result};
