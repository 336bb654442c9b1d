//! The engine-level error taxonomy (spec §7): every fallible operation here
//! returns a `Result<_, EngineError>` (or a plain `bool`/`Option` where the
//! operation's own contract is a boolean-success one, e.g. `ResourceBase`
//! setters). Nothing in this crate panics or unwinds across an API
//! boundary on a recoverable failure.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("format error: {0}")]
    Format(String),

    #[error("resource error: {0}")]
    Resource(String),

    #[error("operation requires {0:?} but the resource flag is not set")]
    State(RequiredState),

    #[error("domain error: {0}")]
    Domain(String),

    #[error(transparent)]
    Packed(#[from] embedded_rforest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredState {
    AbleToTraining,
    AbleToInference,
}

impl EngineError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        EngineError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
