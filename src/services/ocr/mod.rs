// OCR seam. The engine itself lives outside this crate; this module collects
// its output over several preprocessed variants of one frame and picks the
// best rotation for vertical or rotated text.

use async_trait::async_trait;
use futures::future::join_all;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use tracing::{debug, instrument, warn};

use crate::core::errors::{OcrError, OcrResult};
use crate::core::types::RawDetection;
use crate::services::translation::cache::Fingerprint;

/// Detections below this confidence do not count toward rotation choice
pub const ROTATION_CONFIDENCE_FLOOR: f32 = 0.3;

/// An external OCR engine
#[async_trait]
pub trait OcrProvider: Send + Sync {
    async fn detect(&self, image_bytes: &[u8], language: &str) -> OcrResult<Vec<RawDetection>>;
}

/// One preprocessed rendition of a frame (grayscale, CLAHE, threshold, ...)
#[derive(Debug, Clone)]
pub struct ImageVariant {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl ImageVariant {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// Detections from every variant that succeeded, plus the failures
#[derive(Debug, Default)]
pub struct VariantCollection {
    pub detections: Vec<RawDetection>,
    pub failures: Vec<OcrError>,
}

/// Run `provider` over all variants concurrently.
///
/// Each detection is tagged with the variant that produced it. A failing
/// variant is logged and reported but does not affect the others.
#[instrument(skip_all, fields(variants = variants.len(), language = %language))]
pub async fn collect_variant_detections(
    provider: &dyn OcrProvider,
    variants: &[ImageVariant],
    language: &str,
) -> VariantCollection {
    let runs = join_all(
        variants
            .iter()
            .map(|v| async move { (v, provider.detect(&v.bytes, language).await) }),
    )
    .await;

    let mut collection = VariantCollection::default();
    for (variant, outcome) in runs {
        match outcome {
            Ok(detections) => {
                debug!("Variant {} produced {} detections", variant.name, detections.len());
                collection
                    .detections
                    .extend(detections.into_iter().map(|mut d| {
                        d.source_variant = variant.name.clone();
                        d
                    }));
            }
            Err(e) => {
                warn!("OCR failed on variant {}: {}", variant.name, e);
                let failure = if matches!(e, OcrError::EngineFailed { .. }) {
                    e
                } else {
                    OcrError::EngineFailed {
                        variant: variant.name.clone(),
                        reason: e.to_string(),
                    }
                };
                collection.failures.push(failure);
            }
        }
    }
    collection
}

/// Index of the rotation whose confident detections carry the most
/// characters. Ties go to the earliest rotation; `None` when empty.
pub fn select_best_rotation(rotations: &[Vec<RawDetection>]) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    for (idx, detections) in rotations.iter().enumerate() {
        let chars: usize = detections
            .iter()
            .filter(|d| d.confidence > ROTATION_CONFIDENCE_FLOOR)
            .map(|d| d.text.trim().chars().count())
            .sum();
        if best.map_or(true, |(_, top)| chars > top) {
            best = Some((idx, chars));
        }
    }
    best.map(|(idx, _)| idx)
}

/// Memoizes an OCR engine by image content and language
pub struct CachingOcrProvider<P> {
    inner: P,
    cache: Mutex<LruCache<Fingerprint, Vec<RawDetection>>>,
}

impl<P: OcrProvider> CachingOcrProvider<P> {
    pub fn new(inner: P, capacity: NonZeroUsize) -> Self {
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}

#[async_trait]
impl<P: OcrProvider> OcrProvider for CachingOcrProvider<P> {
    async fn detect(&self, image_bytes: &[u8], language: &str) -> OcrResult<Vec<RawDetection>> {
        let key = Fingerprint::for_ocr(image_bytes, language);
        let cached = self.cache.lock().get(&key).cloned();
        if let Some(hit) = cached {
            debug!("OCR cache hit {}", key.to_hex());
            return Ok(hit);
        }

        let detections = self.inner.detect(image_bytes, language).await?;
        self.cache.lock().put(key, detections.clone());
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn raw(text: &str, confidence: f32) -> RawDetection {
        RawDetection {
            text: text.to_string(),
            bbox: [[0, 0], [40, 0], [40, 12], [0, 12]],
            confidence,
            source_variant: String::new(),
        }
    }

    /// Returns one detection naming the bytes it saw; fails on "broken"
    struct EchoOcr {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OcrProvider for EchoOcr {
        async fn detect(&self, image_bytes: &[u8], _language: &str) -> OcrResult<Vec<RawDetection>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let text = String::from_utf8_lossy(image_bytes).to_string();
            if text == "broken" {
                return Err(OcrError::UndecodableImage("bad header".to_string()));
            }
            Ok(vec![raw(&text, 0.9)])
        }
    }

    fn echo() -> EchoOcr {
        EchoOcr {
            calls: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn test_variants_are_tagged_and_failures_isolated() {
        let variants = vec![
            ImageVariant::new("gray", b"START".to_vec()),
            ImageVariant::new("clahe", b"broken".to_vec()),
            ImageVariant::new("threshold", b"SELECT".to_vec()),
        ];
        let collection = collect_variant_detections(&echo(), &variants, "en").await;

        let tagged: Vec<(&str, &str)> = collection
            .detections
            .iter()
            .map(|d| (d.text.as_str(), d.source_variant.as_str()))
            .collect();
        assert_eq!(tagged, vec![("START", "gray"), ("SELECT", "threshold")]);

        assert_eq!(collection.failures.len(), 1);
        assert!(matches!(
            &collection.failures[0],
            OcrError::EngineFailed { variant, .. } if variant == "clahe"
        ));
    }

    #[test]
    fn test_rotation_with_most_confident_chars_wins() {
        let rotations = vec![
            vec![raw("ab", 0.9)],
            vec![raw("abcdef", 0.2), raw("abc", 0.8)],
            vec![raw("GAME OVER", 0.95)],
        ];
        assert_eq!(select_best_rotation(&rotations), Some(2));
    }

    #[test]
    fn test_rotation_ties_go_to_earliest() {
        let rotations = vec![vec![], vec![raw("abc", 0.9)], vec![raw("xyz", 0.9)]];
        assert_eq!(select_best_rotation(&rotations), Some(1));
        assert_eq!(select_best_rotation(&[vec![], vec![]]), Some(0));
        assert_eq!(select_best_rotation(&[]), None);
    }

    #[tokio::test]
    async fn test_caching_provider_skips_repeat_frames() {
        let ocr = CachingOcrProvider::new(echo(), NonZeroUsize::new(4).unwrap());

        ocr.detect(b"START", "en").await.unwrap();
        ocr.detect(b"START", "en").await.unwrap();
        ocr.detect(b"START", "ja").await.unwrap();
        assert!(ocr.detect(b"broken", "en").await.is_err());

        assert_eq!(ocr.inner.calls.load(Ordering::SeqCst), 3);
        assert_eq!(ocr.len(), 2);
    }
}
