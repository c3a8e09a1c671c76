//! # chartmeta common library
//!
//! Shared code for the chartmeta crates:
//! - Error type
//! - TOML bootstrap configuration
//! - Config file, data folder and secret resolution

pub mod config;
pub mod error;

pub use error::{Error, Result};
