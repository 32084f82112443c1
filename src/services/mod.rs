pub mod consolidation;
pub mod ocr;
pub mod rendering;
pub mod scoring;
pub mod translation;

// Re-export commonly used services
pub use consolidation::{ConsolidationStats, Consolidator};
pub use ocr::{collect_variant_detections, select_best_rotation, ImageVariant, OcrProvider};
pub use rendering::{JsonOverlayRenderer, OverlayRenderer};
pub use scoring::ConfidenceScorer;
pub use translation::{
    HttpTranslationProvider, RaceOutcome, SequentialFallback, TranslationCache,
    TranslationProvider, TranslatorRace,
};
