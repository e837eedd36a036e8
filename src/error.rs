use std::time::Duration;

use thiserror::Error;

/// Everything that can stop a tile from being produced.
///
/// Callers that only need success/failure use the `Option`-returning
/// entry points; the `try_` variants hand back one of these.
#[derive(Debug, Error)]
pub enum TileError {
    /// Fetching, parsing or reprojecting the dataset failed.
    #[error("failed to load dataset {descriptor}: {source:#}")]
    LoadFailure {
        descriptor: String,
        #[source]
        source: anyhow::Error,
    },

    /// Another request was loading the same dataset and did not finish in time.
    #[error("timed out after {waited:?} waiting for {descriptor} to load")]
    PlaceholderTimeout { descriptor: String, waited: Duration },

    /// A relative descriptor arrived without a context to resolve it against.
    #[error("cannot resolve relative descriptor '{0}' without a context path")]
    RelativeDescriptor(String),

    #[error("invalid descriptor '{0}'")]
    InvalidDescriptor(String),

    #[error("tile {0} is outside the grid")]
    InvalidTile(String),

    /// A feature referenced an attribute name never registered with the layer.
    #[error("attribute key '{0}' was not registered with the layer")]
    UnregisteredKey(String),

    #[error("feature has {names} attribute names but {values} values")]
    AttributeCount { names: usize, values: usize },

    #[error("failed to encode tile: {0}")]
    Encode(#[from] prost::EncodeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TileError>;
