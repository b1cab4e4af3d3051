//! Shared types, config, and error definitions for the fare date strip.

pub mod config;
pub mod error;
pub mod types;

pub use config::StripConfig;
pub use error::{Error, FetchError};
pub use types::*;

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, Error>;
