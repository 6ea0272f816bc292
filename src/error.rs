use thiserror::Error;

use crate::decoder::DecodeError;

/// Errors surfaced by the engine to its host.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown decoder '{0}'")]
    UnknownDecoder(String),

    #[error("decoder '{name}' failed to initialize: {source}")]
    DecoderInit {
        name: String,
        #[source]
        source: DecodeError,
    },

    #[error(transparent)]
    Decode(#[from] DecodeError),
}
