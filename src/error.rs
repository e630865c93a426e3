//! Error types for cryptfile.

use thiserror::Error;

/// Main error type for cryptfile operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A key ID or key value was not valid GUID/hex text of the right length.
    #[error("Malformed key: {0}")]
    MalformedKey(String),

    /// A track, key or protection header was constructed with invalid parameters.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A bitstream field value does not fit its declared width or form.
    #[error("Invalid field: {0}")]
    InvalidField(String),

    /// The requested encoding or operation is not available.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Failed to write or parse XML.
    #[error("XML error: {0}")]
    XmlError(String),

    /// Base64 decode error.
    #[error("Base64 decode error: {0}")]
    Base64DecodeError(#[from] base64::DecodeError),

    /// Hex decode error.
    #[error("Hex decode error: {0}")]
    HexDecodeError(#[from] hex::FromHexError),

    /// Failed to parse protobuf message.
    #[error("Protobuf decode error: {0}")]
    ProtobufDecodeError(#[from] prost::DecodeError),

    /// Failed to parse a JSON key-server response.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias for cryptfile operations.
pub type Result<T> = std::result::Result<T, Error>;
