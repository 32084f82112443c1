// Collapse near-duplicate detections produced by OCR runs over several
// preprocessing variants of the same frame

use std::cmp::Ordering;

use tracing::debug;

use crate::core::types::Detection;
use crate::utils::geometry::centroid_distance;

/// Pairwise duplicate collapse.
///
/// Two detections are duplicates when their centroids are closer than
/// `distance_px` and their texts are equal or one contains the other
/// (case-insensitive). The survivor is the highest-confidence member, so it
/// keeps that member's text, variant and confidence.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    distance_px: f32,
}

impl Deduplicator {
    pub fn new(distance_px: f32) -> Self {
        Self { distance_px }
    }

    pub fn run(&self, detections: Vec<Detection>) -> Vec<Detection> {
        let input_count = detections.len();

        let mut candidates: Vec<(String, Detection)> = detections
            .into_iter()
            .filter(|d| !d.text().trim().is_empty())
            .map(|d| (d.text().trim().to_lowercase(), d))
            .collect();

        // Strongest first; position and text make ties deterministic
        candidates.sort_by(|(ta, a), (tb, b)| {
            b.confidence()
                .total_cmp(&a.confidence())
                .then_with(|| a.bbox().min_y().cmp(&b.bbox().min_y()))
                .then_with(|| a.bbox().min_x().cmp(&b.bbox().min_x()))
                .then_with(|| ta.cmp(tb))
        });

        let mut survivors: Vec<(String, Detection)> = Vec::with_capacity(candidates.len());
        for (norm, det) in candidates {
            let absorbed_by = survivors
                .iter()
                .position(|(s_norm, s)| self.is_duplicate(s_norm, s, &norm, &det));

            match absorbed_by {
                Some(idx) => debug!(
                    "Dropping duplicate '{}' ({:.2}, {}) in favour of '{}' ({:.2}, {})",
                    det.text(),
                    det.confidence(),
                    det.source_variant(),
                    survivors[idx].1.text(),
                    survivors[idx].1.confidence(),
                    survivors[idx].1.source_variant()
                ),
                None => survivors.push((norm, det)),
            }
        }

        debug!(
            "Deduplicated {} detections into {}",
            input_count,
            survivors.len()
        );
        survivors.into_iter().map(|(_, d)| d).collect()
    }

    fn is_duplicate(&self, a_norm: &str, a: &Detection, b_norm: &str, b: &Detection) -> bool {
        if centroid_distance(a.bbox(), b.bbox()) >= self.distance_px {
            return false;
        }
        a_norm == b_norm || a_norm.contains(b_norm) || b_norm.contains(a_norm)
    }
}

/// Ordering used by callers that want detections back in reading order
pub fn reading_order(a: &Detection, b: &Detection) -> Ordering {
    a.bbox()
        .min_y()
        .cmp(&b.bbox().min_y())
        .then_with(|| a.bbox().min_x().cmp(&b.bbox().min_x()))
        .then_with(|| a.text().cmp(b.text()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::geometry::BBox;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn det(text: &str, b: [u32; 4], conf: f32, variant: &str) -> Detection {
        Detection::from_bbox(text, BBox::try_from(b).unwrap(), conf, variant).unwrap()
    }

    #[test]
    fn test_empty_input() {
        assert!(Deduplicator::new(20.0).run(vec![]).is_empty());
    }

    #[test]
    fn test_collapses_variants_keeping_strongest() {
        let dets = vec![
            det("start", [10, 10, 60, 30], 0.70, "gray"),
            det("START", [12, 11, 61, 31], 0.92, "clahe"),
            det("STAR", [11, 10, 58, 30], 0.55, "threshold"),
        ];
        let out = Deduplicator::new(20.0).run(dets);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text(), "START");
        assert_eq!(out[0].source_variant(), "clahe");
        assert_eq!(out[0].confidence(), 0.92);
    }

    #[test]
    fn test_keeps_distinct_text_and_distant_repeats() {
        let dets = vec![
            det("START", [10, 10, 60, 30], 0.9, "gray"),
            det("SELECT", [12, 12, 62, 32], 0.9, "gray"),
            // same word far away on screen is a different label
            det("START", [200, 150, 250, 170], 0.8, "gray"),
        ];
        let out = Deduplicator::new(20.0).run(dets);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_drops_blank_text() {
        let dets = vec![
            det("   ", [10, 10, 60, 30], 0.9, "gray"),
            det("", [100, 10, 160, 30], 0.9, "gray"),
            det("GO", [200, 10, 230, 30], 0.6, "gray"),
        ];
        let out = Deduplicator::new(20.0).run(dets);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text(), "GO");
    }

    #[test]
    fn test_fixed_point() {
        let dets = vec![
            det("GAME OVER", [100, 100, 220, 120], 0.8, "gray"),
            det("GAME", [102, 101, 160, 121], 0.6, "clahe"),
            det("OVER", [165, 100, 220, 120], 0.7, "clahe"),
            det("CONTINUE?", [100, 140, 210, 160], 0.9, "gray"),
            det("continue", [101, 141, 200, 160], 0.5, "sharpen"),
            det("YES", [100, 180, 130, 196], 0.4, "gray"),
        ];
        let dedup = Deduplicator::new(20.0);
        let once = dedup.run(dets);
        let twice = dedup.run(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_second_pass_changes_nothing_on_random_frames() {
        const WORDS: [&str; 8] = ["START", "STAR", "start", "GAME", "GAME OVER", "OVER", "GO", "  "];
        const VARIANTS: [&str; 3] = ["gray", "clahe", "threshold"];

        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..100 {
            let count = rng.gen_range(0..30);
            let dets: Vec<Detection> = (0..count)
                .map(|_| {
                    // clustered so near-duplicates are common
                    let x = rng.gen_range(0..6) * 15 + rng.gen_range(0..6);
                    let y = rng.gen_range(0..4) * 15 + rng.gen_range(0..6);
                    let w = rng.gen_range(1..50);
                    let h = rng.gen_range(1..16);
                    det(
                        WORDS[rng.gen_range(0..WORDS.len())],
                        [x, y, x + w, y + h],
                        rng.gen_range(1..=100) as f32 / 100.0,
                        VARIANTS[rng.gen_range(0..VARIANTS.len())],
                    )
                })
                .collect();

            let dedup = Deduplicator::new(20.0);
            let once = dedup.run(dets);
            let twice = dedup.run(once.clone());
            assert_eq!(once, twice);
            assert!(once.iter().all(|d| !d.text().trim().is_empty()));
        }
    }

    #[test]
    fn test_reading_order() {
        let mut dets = vec![
            det("B", [50, 10, 60, 20], 0.9, "gray"),
            det("C", [0, 30, 10, 40], 0.9, "gray"),
            det("A", [0, 10, 10, 20], 0.9, "gray"),
        ];
        dets.sort_by(reading_order);
        let texts: Vec<_> = dets.iter().map(|d| d.text()).collect();
        assert_eq!(texts, vec!["A", "B", "C"]);
    }
}
