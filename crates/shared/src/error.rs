//! Error types for Paymount shared types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SharedError {
    #[error("Unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },
}
