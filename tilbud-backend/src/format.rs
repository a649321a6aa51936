//! Value encodings.
//!
//! Backends store opaque bytes. [`Format`] decides how a cached response is
//! turned into those bytes: JSON keeps entries human readable, bincode keeps
//! them small.

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Encoding or decoding failure.
#[derive(Error, Debug)]
pub enum FormatError {
    /// The value could not be encoded.
    #[error(transparent)]
    Serialize(Box<dyn std::error::Error + Send>),

    /// The stored bytes could not be decoded.
    #[error(transparent)]
    Deserialize(Box<dyn std::error::Error + Send>),
}

/// Serialization format of cached values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Format {
    /// `serde_json`.
    #[default]
    Json,
    /// `bincode` with the standard configuration.
    Bincode,
}

impl Format {
    /// Encodes `value`.
    pub fn serialize<T: Serialize>(&self, value: &T) -> Result<Bytes, FormatError> {
        match self {
            Format::Json => serde_json::to_vec(value)
                .map(Bytes::from)
                .map_err(|err| FormatError::Serialize(Box::new(err))),
            Format::Bincode => bincode::serde::encode_to_vec(value, bincode::config::standard())
                .map(Bytes::from)
                .map_err(|err| FormatError::Serialize(Box::new(err))),
        }
    }

    /// Decodes a value previously produced by [`Format::serialize`].
    pub fn deserialize<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, FormatError> {
        match self {
            Format::Json => {
                serde_json::from_slice(data).map_err(|err| FormatError::Deserialize(Box::new(err)))
            }
            Format::Bincode => {
                bincode::serde::decode_from_slice(data, bincode::config::standard())
                    .map(|(value, _)| value)
                    .map_err(|err| FormatError::Deserialize(Box::new(err)))
            }
        }
    }

    /// Name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Bincode => "bincode",
        }
    }
}
