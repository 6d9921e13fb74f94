//! Error types for the mongosnap operator

use thiserror::Error;

/// Main error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("object is missing required metadata: {0}")]
    MissingObjectKey(&'static str),
}
