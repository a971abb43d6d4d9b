//! Crate-wide error type.
//!
//! Replaces the teacher's `error_chain!` macro with the `thiserror` idiom used
//! across the grounding corpus (e.g. the `DiskPool` operator's `Error` enum).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("failed to (de)serialize resource: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invariant violation: {0}")]
    Validation(String),

    #[error("admission denied: {0}")]
    Admission(String),

    #[error("finalizer error: {0}")]
    Finalizer(#[from] Box<kube::runtime::finalizer::Error<Error>>),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
