// Detection consolidation: validation, confidence filter, dedup, grouping

pub mod dedup;
pub mod grouper;

pub use dedup::Deduplicator;
pub use grouper::SpatialGrouper;

use tracing::{debug, warn};

use crate::core::config::ConsolidationConfig;
use crate::core::types::{Detection, RawDetection, TextGroup};

/// Counters for one consolidation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsolidationStats {
    pub raw: usize,
    pub dropped_invalid: usize,
    pub dropped_low_confidence: usize,
    pub deduplicated: usize,
    pub groups: usize,
}

/// Validate raw OCR hits, dropping (and logging) the malformed ones.
///
/// Returns the valid detections and the number dropped.
pub fn validate_detections(raw: Vec<RawDetection>) -> (Vec<Detection>, usize) {
    let mut dropped = 0;
    let valid = raw
        .into_iter()
        .filter_map(|r| {
            let text = r.text.clone();
            match Detection::try_from(r) {
                Ok(d) => Some(d),
                Err(e) => {
                    warn!("Dropping detection '{}': {} ({:?})", text, e, e.kind());
                    dropped += 1;
                    None
                }
            }
        })
        .collect();
    (valid, dropped)
}

/// Raw per-variant detections in, reading-order text groups out
#[derive(Debug, Clone)]
pub struct Consolidator {
    min_confidence: f32,
    deduplicator: Deduplicator,
    grouper: SpatialGrouper,
}

impl Consolidator {
    pub fn new(config: &ConsolidationConfig) -> Self {
        Self {
            min_confidence: config.min_detection_confidence,
            deduplicator: Deduplicator::new(config.dedup_distance_px),
            grouper: SpatialGrouper::new(config.clone()),
        }
    }

    pub fn consolidate(
        &self,
        raw: Vec<RawDetection>,
        frame_width: u32,
        frame_height: u32,
    ) -> (Vec<TextGroup>, ConsolidationStats) {
        let mut stats = ConsolidationStats {
            raw: raw.len(),
            ..Default::default()
        };

        let (valid, dropped_invalid) = validate_detections(raw);
        stats.dropped_invalid = dropped_invalid;

        let before_filter = valid.len();
        let confident: Vec<Detection> = valid
            .into_iter()
            .filter(|d| d.confidence() > self.min_confidence)
            .collect();
        stats.dropped_low_confidence = before_filter - confident.len();

        let unique = self.deduplicator.run(confident);
        stats.deduplicated = unique.len();

        let groups = self.grouper.group(unique, frame_width, frame_height);
        stats.groups = groups.len();

        debug!(
            "Consolidated {} raw detections: {} invalid, {} low confidence, {} unique, {} groups",
            stats.raw,
            stats.dropped_invalid,
            stats.dropped_low_confidence,
            stats.deduplicated,
            stats.groups
        );
        (groups, stats)
    }
}
