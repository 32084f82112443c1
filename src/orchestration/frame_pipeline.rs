// Frame pipeline: raw OCR detections in, translated overlay out

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use crate::core::config::Config;
use crate::core::types::{FrameInput, FrameOverlay, FrameStats, Selection, TextGroup, TranslationResult};
use crate::services::consolidation::Consolidator;
use crate::services::scoring::ConfidenceScorer;
use crate::services::translation::{
    RaceOutcome, SequentialFallback, TranslationCacheSeam, TranslationProvider, TranslatorRace,
};
use crate::utils::Metrics;

/// Drives one frame through consolidation, the per-group race and the
/// fallback path
pub struct FramePipeline {
    consolidator: Consolidator,
    race: TranslatorRace,
    fallback: SequentialFallback,
    group_semaphore: Semaphore,
    race_enabled: bool,
    source_lang: String,
    target_lang: String,
    metrics: Metrics,
}

/// Translated group plus whether its race came up empty
struct GroupOutcome {
    result: TranslationResult,
    race_failed: bool,
}

impl FramePipeline {
    /// `providers` must be in priority order. The race uses the first
    /// `max_concurrent_requests` of them; the fallback walks all of them.
    pub fn new(
        config: &Config,
        providers: Vec<Arc<dyn TranslationProvider>>,
        scorer: Arc<ConfidenceScorer>,
        cache: Option<Arc<dyn TranslationCacheSeam>>,
        metrics: Metrics,
    ) -> Self {
        let translation = &config.translation;

        let mut race = TranslatorRace::new(providers.clone(), scorer.clone(), translation)
            .with_metrics(metrics.clone());
        if let Some(cache) = cache {
            race = race.with_cache(cache);
        }
        let fallback = SequentialFallback::new(providers, scorer, config.translation_timeout())
            .with_metrics(metrics.clone());

        info!(
            "Frame pipeline ready (racing: {:?}, groups in flight: {}, race enabled: {})",
            race.provider_ids(),
            translation.max_concurrent_groups,
            translation.enabled
        );

        Self {
            consolidator: Consolidator::new(&config.consolidation),
            race,
            fallback,
            group_semaphore: Semaphore::new(translation.max_concurrent_groups),
            race_enabled: translation.enabled,
            source_lang: translation.source_lang.clone(),
            target_lang: translation.target_lang.clone(),
            metrics,
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Process one frame. A frame without usable text yields an empty
    /// overlay, not an error.
    #[instrument(skip(self, frame), fields(width = frame.width, height = frame.height, detections = frame.detections.len()))]
    pub async fn process(&self, frame: FrameInput) -> FrameOverlay {
        let started = Instant::now();
        let source_lang = frame.source_lang.unwrap_or_else(|| self.source_lang.clone());
        let target_lang = frame.target_lang.unwrap_or_else(|| self.target_lang.clone());

        let (groups, consolidation) =
            self.consolidator
                .consolidate(frame.detections, frame.width, frame.height);

        let mut stats = FrameStats {
            raw_detections: consolidation.raw,
            dropped_invalid: consolidation.dropped_invalid,
            dropped_low_confidence: consolidation.dropped_low_confidence,
            deduplicated: consolidation.deduplicated,
            groups: consolidation.groups,
            ..FrameStats::default()
        };

        if groups.is_empty() {
            info!("No text detected in frame");
        }

        let outcomes = join_all(
            groups
                .into_iter()
                .map(|g| self.translate_group(g, &source_lang, &target_lang)),
        )
        .await;

        let mut results = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            if outcome.race_failed {
                stats.all_failed += 1;
            }
            if outcome.result.fallback_used {
                stats.fallback_used += 1;
            }
            match outcome.result.selection {
                Selection::Qualified => stats.qualified += 1,
                Selection::BestEffort => stats.best_effort += 1,
                Selection::Cached => stats.cached += 1,
                Selection::Fallback | Selection::Untranslated => {}
            }
            results.push(outcome.result);
        }

        stats.elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.metrics.record_frame(results.len());
        info!(
            "Frame done: {} groups ({} qualified, {} best effort, {} cached, {} fallback) in {:.1}ms",
            stats.groups,
            stats.qualified,
            stats.best_effort,
            stats.cached,
            stats.fallback_used,
            stats.elapsed_ms
        );

        FrameOverlay {
            width: frame.width,
            height: frame.height,
            results,
            stats,
        }
    }

    async fn translate_group(
        &self,
        group: TextGroup,
        source_lang: &str,
        target_lang: &str,
    ) -> GroupOutcome {
        // the semaphore is never closed, so acquire only fails on shutdown
        let _permit = self.group_semaphore.acquire().await.ok();

        if !self.race_enabled {
            debug!("Race disabled, translating '{}' sequentially", group.text());
            let result = self
                .fallback
                .translate(group, Vec::new(), source_lang, target_lang)
                .await;
            return GroupOutcome {
                result,
                race_failed: false,
            };
        }

        match self.race.race(group, source_lang, target_lang).await {
            RaceOutcome::Selected(result) => GroupOutcome {
                result,
                race_failed: false,
            },
            RaceOutcome::AllFailed(failed) => {
                let result = self
                    .fallback
                    .translate(
                        failed.text_group,
                        failed.attempted_providers,
                        source_lang,
                        target_lang,
                    )
                    .await;
                GroupOutcome {
                    result,
                    race_failed: true,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::RawDetection;
    use crate::core::vocabulary::DomainVocabulary;
    use crate::services::translation::provider::testing::MockProvider;
    use std::time::Duration;

    fn raw(text: &str, b: [i32; 4], conf: f32, variant: &str) -> RawDetection {
        RawDetection {
            text: text.to_string(),
            bbox: [[b[0], b[1]], [b[2], b[1]], [b[2], b[3]], [b[0], b[3]]],
            confidence: conf,
            source_variant: variant.to_string(),
        }
    }

    fn title_screen() -> FrameInput {
        FrameInput {
            width: 640,
            height: 480,
            source_lang: Some("en".to_string()),
            target_lang: None,
            detections: vec![
                raw("PRESS", [100, 200, 160, 216], 0.92, "gray"),
                raw("START", [170, 200, 230, 216], 0.90, "gray"),
                raw("START", [171, 201, 231, 217], 0.70, "clahe"),
                raw("GAME OVER", [250, 50, 370, 70], 0.88, "gray"),
            ],
        }
    }

    fn pipeline(config: &Config, mocks: &[Arc<MockProvider>]) -> FramePipeline {
        let scorer = ConfidenceScorer::new(
            config.translation.confidence_weights,
            Arc::new(DomainVocabulary::builtin().unwrap()),
        )
        .unwrap();
        FramePipeline::new(
            config,
            mocks
                .iter()
                .map(|m| m.clone() as Arc<dyn TranslationProvider>)
                .collect(),
            Arc::new(scorer),
            None,
            Metrics::new(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_title_screen_end_to_end() {
        let config = Config::default();
        let p = pipeline(
            &config,
            &[Arc::new(MockProvider::ok("deep_google", "Pressione START", 300))],
        );

        let overlay = p.process(title_screen()).await;

        assert_eq!(overlay.width, 640);
        assert_eq!(overlay.stats.raw_detections, 4);
        assert_eq!(overlay.stats.deduplicated, 3);
        assert_eq!(overlay.stats.groups, 2);

        let sources: Vec<&str> = overlay.results.iter().map(|r| r.text_group.text()).collect();
        assert_eq!(sources, vec!["GAME OVER", "PRESS START"]);
        assert_eq!(overlay.results[1].selection, Selection::Qualified);
        assert_eq!(overlay.results[1].display_text(), "Pressione START");
        assert_eq!(p.metrics().snapshot().frames_processed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_race_falls_back_to_full_provider_list() {
        let mut config = Config::default();
        config.translation.max_concurrent_requests = 1;
        let racer = Arc::new(MockProvider::hanging("deep_google"));
        let backup = Arc::new(MockProvider::ok("google", "Pressione START", 50));
        let p = pipeline(&config, &[racer.clone(), backup.clone()]);

        let mut frame = title_screen();
        frame.detections.truncate(2);
        let overlay = p.process(frame).await;

        let result = &overlay.results[0];
        assert_eq!(result.selection, Selection::Fallback);
        assert!(result.fallback_used);
        assert_eq!(result.attempted_providers, vec!["deep_google", "google"]);
        assert_eq!(overlay.stats.all_failed, 1);
        assert_eq!(overlay.stats.fallback_used, 1);
        // once in the race, once in the fallback
        assert_eq!(racer.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_race_translates_sequentially() {
        let mut config = Config::default();
        config.translation.enabled = false;
        let p = pipeline(&config, &[Arc::new(MockProvider::ok("google", "Texto", 10))]);

        let overlay = p.process(title_screen()).await;

        assert!(overlay
            .results
            .iter()
            .all(|r| r.selection == Selection::Fallback));
        assert_eq!(overlay.stats.all_failed, 0);
        assert_eq!(p.metrics().snapshot().races_total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_without_text_is_empty_overlay() {
        let p = pipeline(&Config::default(), &[Arc::new(MockProvider::ok("google", "x", 10))]);
        let frame = FrameInput {
            width: 320,
            height: 240,
            source_lang: None,
            target_lang: None,
            detections: vec![
                raw("BAD", [-4, 0, 10, 10], 0.9, "gray"),
                raw("faint", [0, 0, 40, 10], 0.1, "gray"),
            ],
        };

        let overlay = p.process(frame).await;
        assert!(overlay.is_empty());
        assert_eq!(overlay.stats.dropped_invalid, 1);
        assert_eq!(overlay.stats.dropped_low_confidence, 1);
        assert_eq!(overlay.stats.groups, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_group_concurrency_is_bounded() {
        let frame = FrameInput {
            width: 640,
            height: 480,
            source_lang: None,
            target_lang: None,
            detections: vec![
                raw("START", [20, 20, 80, 36], 0.9, "gray"),
                raw("OPTIONS", [20, 200, 110, 216], 0.9, "gray"),
                raw("EXIT", [20, 400, 70, 416], 0.9, "gray"),
            ],
        };

        let mut serial = Config::default();
        serial.translation.max_concurrent_groups = 1;
        let p = pipeline(&serial, &[Arc::new(MockProvider::ok("google", "Sair", 1_000))]);
        let started = Instant::now();
        p.process(frame.clone()).await;
        assert!(started.elapsed() >= Duration::from_secs(3));

        let p = pipeline(&Config::default(), &[Arc::new(MockProvider::ok("google", "Sair", 1_000))]);
        let started = Instant::now();
        p.process(frame).await;
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
