//! Error taxonomy for the track engine

use crate::types::TrackKind;
use thiserror::Error;

/// Errors produced while validating, reading, aggregating or caching tracks.
///
/// The type is `Clone` because a failed computation is handed to every caller
/// waiting on the same cache key.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackError {
    #[error("Out of bounds: {message}")]
    OutOfBounds { message: String },

    #[error("No {kind} data loaded for sample {sample_id}")]
    DataUnavailable { sample_id: String, kind: TrackKind },

    #[error("Corrupt record at line {line}: {message}")]
    CorruptRecord { line: usize, message: String },

    #[error("No resolution level fits {points} points into a budget of {budget}")]
    ResolutionError { points: u64, budget: u64 },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Overview error: {message}")]
    Overview { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Computation for {key} was abandoned")]
    Abandoned { key: String },
}

impl TrackError {
    pub fn out_of_bounds<S: Into<String>>(message: S) -> Self {
        Self::OutOfBounds { message: message.into() }
    }

    pub fn data_unavailable<S: Into<String>>(sample_id: S, kind: TrackKind) -> Self {
        Self::DataUnavailable {
            sample_id: sample_id.into(),
            kind,
        }
    }

    pub fn corrupt_record<S: Into<String>>(line: usize, message: S) -> Self {
        Self::CorruptRecord {
            line,
            message: message.into(),
        }
    }

    pub fn storage<S: Into<String>>(message: S) -> Self {
        Self::Storage { message: message.into() }
    }

    pub fn overview<S: Into<String>>(message: S) -> Self {
        Self::Overview { message: message.into() }
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into() }
    }

    pub fn serialization<S: Into<String>>(message: S) -> Self {
        Self::Serialization { message: message.into() }
    }

    /// True for errors the viewer shows as an empty "no data" state.
    pub fn is_no_data(&self) -> bool {
        matches!(self, Self::DataUnavailable { .. })
    }
}

impl From<std::io::Error> for TrackError {
    fn from(err: std::io::Error) -> Self {
        Self::storage(err.to_string())
    }
}

impl From<serde_json::Error> for TrackError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

/// Result type for track engine operations
pub type TrackResult<T> = Result<T, TrackError>;
