use thiserror::Error;

/// Layerprobe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// Engine unreachable or the liveness ping failed.
    #[error("Engine connection unavailable: {message}")]
    ConnectionUnavailable {
        message: String,
        hint: Option<String>,
    },

    /// Image could not be resolved by any lookup in the fallback chain.
    #[error("Image not found: {0}")]
    ImageNotFound(String),

    /// Transport or non-2xx failure from the engine API.
    #[error("Engine request failed: {0}")]
    Engine(#[from] bollard::errors::Error),

    /// Archive extraction failure (outer export or per-layer).
    #[error("Extraction failed: {0}")]
    Extraction(String),

    /// Missing or malformed export manifest.
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// Malformed terminal layer configuration.
    #[error("Layer config error: {0}")]
    LayerConfig(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl ProbeError {
    /// True for the expected "image is not known to the engine" case, as
    /// opposed to transport or extraction faults.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProbeError::ImageNotFound(_))
    }
}

impl From<serde_json::Error> for ProbeError {
    fn from(err: serde_json::Error) -> Self {
        ProbeError::Serialization(err.to_string())
    }
}

/// Result type alias for layerprobe operations.
pub type Result<T> = std::result::Result<T, ProbeError>;
