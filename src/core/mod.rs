pub mod config;
pub mod errors;
pub mod types;
pub mod vocabulary;

// Re-export commonly used items for convenience
pub use config::{ConfidenceWeights, Config, ProviderEndpoint, ProviderKind};
pub use errors::{
    CacheError, ConfigError, DetectionError, ErrorKind, GeometryError, OcrError, ProviderError,
};
pub use types::{
    Detection, FrameInput, FrameOverlay, FrameStats, MetricBreakdown, RawDetection,
    ScoredCandidate, Selection, TextGroup, TranslationCandidate, TranslationResult,
};
pub use vocabulary::DomainVocabulary;
