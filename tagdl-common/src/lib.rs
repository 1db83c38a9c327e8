//! # tagdl Common Library
//!
//! Shared code for tagdl services:
//! - Error type
//! - Bootstrap configuration (TOML) and root folder resolution
//! - Request-scoped identifiers
//! - Filename sanitization

pub mod config;
pub mod error;
pub mod filename;
pub mod uuid_utils;

pub use error::{Error, Result};
pub use filename::sanitize_filename;
pub use uuid_utils::RequestId;
