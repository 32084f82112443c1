// Library exports for the emulator screenshot translation workflow
//
// OCR detections are consolidated into text groups, each group is raced
// across translation providers, and the winners form the frame overlay.

pub mod core;
pub mod middleware;
pub mod orchestration;
pub mod services;
pub mod utils;

// Re-export commonly used types and functions
pub use core::{
    config::Config,
    errors::{CacheError, ConfigError, DetectionError, ErrorKind, GeometryError, OcrError, ProviderError},
    types::{
        Detection, FrameInput, FrameOverlay, FrameStats, RawDetection, ScoredCandidate, Selection,
        TextGroup, TranslationCandidate, TranslationResult,
    },
    vocabulary::DomainVocabulary,
};

pub use middleware::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

pub use orchestration::FramePipeline;

pub use services::{
    ConfidenceScorer, Consolidator, HttpTranslationProvider, JsonOverlayRenderer, OverlayRenderer,
    RaceOutcome, SequentialFallback, TranslationCache, TranslationProvider, TranslatorRace,
};

pub use utils::{BBox, Metrics, MetricsSnapshot};
