//! Utility functions for common operations.
//!
//! - **URL validation**: scheme and host checks for feed sources
//! - **Text processing**: plain-text excerpts for article summaries

mod text;
mod url_validator;

pub use text::{excerpt, strip_control_chars};
pub use url_validator::{validate_url, UrlValidationError};
