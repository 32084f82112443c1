// Error types for the consolidation and translation engines
//
// Each enum maps onto the shared `ErrorKind` taxonomy so callers can decide
// what is fatal (configuration) and what is isolated (one detection, one
// provider). "All providers failed" and "no text detected" are values, not
// errors, and do not appear here.

use std::time::Duration;
use thiserror::Error;

/// Coarse classification shared by every error in the crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidGeometry,
    InvalidConfidence,
    InvalidWeights,
    InvalidConfig,
    ProviderTimeout,
    ProviderUnavailable,
    ProviderRejected,
    NoTextDetected,
    Cache,
}

/// Malformed bounding box or polygon
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GeometryError {
    #[error("Inverted bounding box: ({min_x},{min_y})-({max_x},{max_y})")]
    InvertedBox {
        min_x: u32,
        min_y: u32,
        max_x: u32,
        max_y: u32,
    },

    #[error("Negative coordinate in polygon: ({x},{y})")]
    NegativeCoordinate { x: i32, y: i32 },
}

impl GeometryError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidGeometry
    }
}

/// A single raw OCR hit that cannot become a `Detection`
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DetectionError {
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(#[from] GeometryError),

    #[error("Detection confidence must be in [0.0, 1.0], got {0}")]
    InvalidConfidence(f32),
}

impl DetectionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DetectionError::InvalidGeometry(_) => ErrorKind::InvalidGeometry,
            DetectionError::InvalidConfidence(_) => ErrorKind::InvalidConfidence,
        }
    }
}

/// Configuration errors, always fatal at startup
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Confidence weights must sum to 1.0 (±0.01), got {sum:.4}")]
    InvalidWeights { sum: f64 },

    #[error("Confidence weights must be 4 finite values in [0.0, 1.0], got {0:?}")]
    MalformedWeights(Vec<f32>),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown configuration preset: {0}")]
    UnknownPreset(String),

    #[error("Failed to read {path}: {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    ParseFailed {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Environment variable {name} could not be parsed: {value:?}")]
    EnvVarError { name: String, value: String },
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConfigError::InvalidWeights { .. } | ConfigError::MalformedWeights(_) => {
                ErrorKind::InvalidWeights
            }
            _ => ErrorKind::InvalidConfig,
        }
    }
}

/// Failure of one translation provider call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Provider {provider} unavailable: {reason}")]
    Unavailable { provider: String, reason: String },

    #[error("Provider {provider} timed out after {after:?}")]
    Timeout { provider: String, after: Duration },

    #[error("Provider {provider} rejected the request: {reason}")]
    Rejected { provider: String, reason: String },
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Unavailable { .. } => ErrorKind::ProviderUnavailable,
            ProviderError::Timeout { .. } => ErrorKind::ProviderTimeout,
            ProviderError::Rejected { .. } => ErrorKind::ProviderRejected,
        }
    }

    pub fn provider(&self) -> &str {
        match self {
            ProviderError::Unavailable { provider, .. }
            | ProviderError::Timeout { provider, .. }
            | ProviderError::Rejected { provider, .. } => provider,
        }
    }
}

/// Failure of one OCR pass over one image variant
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OcrError {
    #[error("OCR engine failed on variant {variant}: {reason}")]
    EngineFailed { variant: String, reason: String },

    #[error("Image could not be decoded: {0}")]
    UndecodableImage(String),
}

/// Cache persistence errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to load cache from {path}: {source}")]
    LoadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to save cache to {path}: {source}")]
    SaveFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache (de)serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache capacity must be > 0")]
    ZeroCapacity,
}

impl CacheError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Cache
    }
}

pub type GeometryResult<T> = Result<T, GeometryError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
pub type ProviderResult<T> = Result<T, ProviderError>;
pub type OcrResult<T> = Result<T, OcrError>;
pub type CacheResult<T> = Result<T, CacheError>;
