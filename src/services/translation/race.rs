// Confidence-weighted translator race
//
// One concurrent attempt per provider, each under its own timeout; results
// are collected at a single barrier, scored, and ranked. No lock is held
// while providers are in flight.

use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::core::config::TranslationConfig;
use crate::core::errors::ProviderError;
use crate::core::types::{
    ScoredCandidate, Selection, TextGroup, TranslationCandidate, TranslationResult,
};
use crate::services::scoring::ConfidenceScorer;
use crate::services::translation::cache::{Fingerprint, TranslationCacheSeam};
use crate::services::translation::provider::TranslationProvider;
use crate::utils::metrics::{AttemptOutcome, Metrics};

/// Lifecycle of one group's race
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceState {
    Pending,
    Racing,
    Scoring,
    Selected,
    AllFailed,
}

impl RaceState {
    fn advance(&mut self, next: RaceState) {
        debug!("Race state {:?} -> {:?}", self, next);
        *self = next;
    }
}

/// Every provider errored or timed out
#[derive(Debug, Clone)]
pub struct AllFailed {
    pub text_group: TextGroup,
    pub attempted_providers: Vec<String>,
    /// One entry per provider, each with `error` set
    pub failures: Vec<TranslationCandidate>,
}

#[derive(Debug, Clone)]
pub enum RaceOutcome {
    Selected(TranslationResult),
    AllFailed(AllFailed),
}

impl RaceOutcome {
    pub fn is_selected(&self) -> bool {
        matches!(self, RaceOutcome::Selected(_))
    }

    pub fn into_result(self) -> Option<TranslationResult> {
        match self {
            RaceOutcome::Selected(result) => Some(result),
            RaceOutcome::AllFailed(_) => None,
        }
    }
}

pub struct TranslatorRace {
    providers: Vec<Arc<dyn TranslationProvider>>,
    scorer: Arc<ConfidenceScorer>,
    timeout: Duration,
    min_confidence: f32,
    cache: Option<Arc<dyn TranslationCacheSeam>>,
    metrics: Option<Metrics>,
}

impl TranslatorRace {
    /// `providers` must be in priority order. Only the first
    /// `max_concurrent_requests` take part in the race.
    pub fn new(
        providers: Vec<Arc<dyn TranslationProvider>>,
        scorer: Arc<ConfidenceScorer>,
        config: &TranslationConfig,
    ) -> Self {
        let limit = config.max_concurrent_requests;
        if providers.len() > limit {
            warn!(
                "{} providers configured, racing only the first {}",
                providers.len(),
                limit
            );
        }

        Self {
            providers: providers.into_iter().take(limit).collect(),
            scorer,
            timeout: Duration::from_secs(config.translation_timeout_seconds),
            min_confidence: config.min_confidence_score,
            cache: None,
            metrics: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn TranslationCacheSeam>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn provider_ids(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.id().to_string()).collect()
    }

    /// Race every provider on `group` and pick a winner.
    ///
    /// Ranking is by score (desc), then latency (asc), then priority order.
    /// A winner below the minimum confidence is still returned, tagged
    /// [`Selection::BestEffort`].
    #[instrument(skip(self, group), fields(chars = group.text().chars().count(), providers = self.providers.len()))]
    pub async fn race(&self, group: TextGroup, source_lang: &str, target_lang: &str) -> RaceOutcome {
        let mut state = RaceState::Pending;
        let fingerprint = Fingerprint::for_translation(group.text(), source_lang, target_lang);

        if let Some(hit) = self.cache.as_ref().and_then(|c| c.lookup(&fingerprint)) {
            debug!("Cache hit for '{}'", group.text());
            state.advance(RaceState::Selected);
            return RaceOutcome::Selected(hit.into_result(group));
        }

        if let Some(ref m) = self.metrics {
            m.record_race_started();
        }
        let attempted_providers = self.provider_ids();

        state.advance(RaceState::Racing);
        let attempts = join_all(
            self.providers
                .iter()
                .map(|p| self.attempt(p.as_ref(), group.text(), source_lang, target_lang)),
        )
        .await;

        state.advance(RaceState::Scoring);
        let mut ranked: Vec<(usize, ScoredCandidate)> = Vec::with_capacity(attempts.len());
        let mut failures = Vec::new();
        for (priority, attempt) in attempts.into_iter().enumerate() {
            match attempt {
                Ok(candidate) => ranked.push((priority, self.scorer.score_candidate(candidate))),
                Err(failed) => failures.push(failed),
            }
        }
        ranked.sort_by(|(pa, a), (pb, b)| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| {
                    a.candidate
                        .elapsed_seconds
                        .total_cmp(&b.candidate.elapsed_seconds)
                })
                .then_with(|| pa.cmp(pb))
        });

        let Some((_, winner)) = ranked.into_iter().next() else {
            state.advance(RaceState::AllFailed);
            warn!(
                "All {} providers failed for '{}'",
                attempted_providers.len(),
                group.text()
            );
            if let Some(ref m) = self.metrics {
                m.record_all_failed();
            }
            return RaceOutcome::AllFailed(AllFailed {
                text_group: group,
                attempted_providers,
                failures,
            });
        };

        let selection = if winner.score >= self.min_confidence {
            Selection::Qualified
        } else {
            Selection::BestEffort
        };
        state.advance(RaceState::Selected);
        debug!(
            "Selected {} ({:.3}, {:?}) for '{}'",
            winner.candidate.provider_id,
            winner.score,
            selection,
            group.text()
        );
        if let Some(ref m) = self.metrics {
            m.record_selection(&winner.candidate.provider_id, winner.score, selection);
        }

        let result = TranslationResult {
            text_group: group,
            winning_candidate: Some(winner),
            attempted_providers,
            fallback_used: false,
            selection,
        };

        // best-effort picks are retried next time rather than pinned
        if selection == Selection::Qualified {
            if let Some(cache) = &self.cache {
                cache.store(fingerprint, &result);
            }
        }

        RaceOutcome::Selected(result)
    }

    /// Race that gives up as soon as `cancel` resolves. In-flight provider
    /// calls are dropped; returns `None` when cancelled.
    pub async fn race_cancellable<C>(
        &self,
        group: TextGroup,
        source_lang: &str,
        target_lang: &str,
        cancel: C,
    ) -> Option<RaceOutcome>
    where
        C: Future<Output = ()>,
    {
        tokio::select! {
            outcome = self.race(group, source_lang, target_lang) => Some(outcome),
            _ = cancel => {
                info!("Race cancelled, dropping in-flight provider calls");
                None
            }
        }
    }

    /// One provider call under the per-provider timeout. The error side is a
    /// candidate with `error` set.
    async fn attempt(
        &self,
        provider: &dyn TranslationProvider,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<TranslationCandidate, TranslationCandidate> {
        let id = provider.id();
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            self.timeout,
            provider.translate(text, source_lang, target_lang),
        )
        .await;
        let elapsed = started.elapsed();

        let result = match outcome {
            Ok(reply) => reply,
            Err(_) => {
                provider.record_timeout();
                Err(ProviderError::Timeout {
                    provider: id.to_string(),
                    after: self.timeout,
                })
            }
        };

        if let Some(ref m) = self.metrics {
            let kind = match &result {
                Ok(_) => AttemptOutcome::Success,
                Err(ProviderError::Timeout { .. }) => AttemptOutcome::Timeout,
                Err(_) => AttemptOutcome::Failure,
            };
            m.record_attempt(id, kind, elapsed);
        }

        match result {
            Ok(translated) => Ok(TranslationCandidate::succeeded(
                id,
                text,
                translated,
                elapsed.as_secs_f64(),
            )),
            Err(e) => {
                debug!("Provider {} failed: {} ({:?})", id, e, e.kind());
                Err(TranslationCandidate::failed(id, text, elapsed.as_secs_f64(), &e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Detection;
    use crate::core::vocabulary::DomainVocabulary;
    use crate::core::ConfidenceWeights;
    use crate::services::translation::cache::CachedTranslation;
    use crate::services::translation::provider::testing::MockProvider;
    use crate::utils::geometry::BBox;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    fn group(text: &str) -> TextGroup {
        let det = Detection::from_bbox(text, BBox::new(10, 10, 120, 30).unwrap(), 0.9, "gray")
            .unwrap();
        TextGroup::from_lines(vec![vec![det]]).unwrap()
    }

    fn scorer() -> Arc<ConfidenceScorer> {
        Arc::new(
            ConfidenceScorer::new(
                ConfidenceWeights::default(),
                Arc::new(DomainVocabulary::builtin().unwrap()),
            )
            .unwrap(),
        )
    }

    fn race_of(mocks: &[Arc<MockProvider>]) -> TranslatorRace {
        let providers: Vec<Arc<dyn TranslationProvider>> = mocks
            .iter()
            .map(|m| m.clone() as Arc<dyn TranslationProvider>)
            .collect();
        TranslatorRace::new(providers, scorer(), &TranslationConfig::default())
    }

    fn winner(outcome: &RaceOutcome) -> &ScoredCandidate {
        match outcome {
            RaceOutcome::Selected(r) => r.winning_candidate.as_ref().unwrap(),
            RaceOutcome::AllFailed(f) => panic!("race failed: {:?}", f.failures),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_equal_scores_break_on_latency() {
        let race = race_of(&[
            Arc::new(MockProvider::ok("deep_microsoft", "Aperte START", 500)),
            Arc::new(MockProvider::ok("deep_google", "Pressione START", 300)),
            Arc::new(MockProvider::ok("google", "Press START", 100)),
        ]);

        let outcome = race.race(group("Press START"), "en", "pt").await;
        let w = winner(&outcome);
        assert_eq!(w.candidate.provider_id, "deep_google");
        assert!((w.score - 0.92).abs() < 1e-4);
        assert!((w.candidate.elapsed_seconds - 0.3).abs() < 1e-6);

        let RaceOutcome::Selected(result) = outcome else {
            unreachable!()
        };
        assert_eq!(result.selection, Selection::Qualified);
        assert!(!result.fallback_used);
        assert_eq!(
            result.attempted_providers,
            vec!["deep_microsoft", "deep_google", "google"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_equal_scores_and_latency_break_on_priority() {
        let race = race_of(&[
            Arc::new(MockProvider::ok("first", "Pressione START", 200)),
            Arc::new(MockProvider::ok("second", "Pressione START", 200)),
        ]);
        let outcome = race.race(group("Press START"), "en", "pt").await;
        assert_eq!(winner(&outcome).candidate.provider_id, "first");
    }

    #[tokio::test(start_paused = true)]
    async fn test_speed_decides_between_equal_quality() {
        let race = race_of(&[
            Arc::new(MockProvider::ok("slow", "Pressione START", 7_000)),
            Arc::new(MockProvider::ok("fast", "Aperte START", 500)),
        ]);
        let outcome = race.race(group("Press START"), "en", "pt").await;
        assert_eq!(winner(&outcome).candidate.provider_id, "fast");
    }

    #[tokio::test(start_paused = true)]
    async fn test_passthrough_only_is_best_effort() {
        let race = race_of(&[Arc::new(MockProvider::ok("google", "Press START", 100))]);
        let outcome = race.race(group("Press START"), "en", "pt").await;

        let RaceOutcome::Selected(result) = outcome else {
            panic!("expected a best-effort selection");
        };
        let w = result.winning_candidate.as_ref().unwrap();
        assert!((w.metric_breakdown.consistency - 0.3).abs() < 1e-6);
        assert!(w.score < 0.6);
        assert_eq!(result.selection, Selection::BestEffort);
        assert_eq!(result.display_text(), "Press START");
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_providers_time_out() {
        let metrics = Metrics::new();
        let race = race_of(&[
            Arc::new(MockProvider::hanging("deep_google")),
            Arc::new(MockProvider::hanging("deep_microsoft")),
            Arc::new(MockProvider::hanging("google")),
        ])
        .with_metrics(metrics.clone());

        let outcome = race.race(group("Press START"), "en", "pt").await;
        let RaceOutcome::AllFailed(failed) = outcome else {
            panic!("expected AllFailed");
        };
        assert_eq!(failed.attempted_providers.len(), 3);
        assert_eq!(failed.failures.len(), 3);
        for f in &failed.failures {
            assert!(f.is_error());
            assert!(f.error.as_deref().unwrap().contains("timed out"));
            assert!((f.elapsed_seconds - 8.0).abs() < 1e-6);
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.races_all_failed, 1);
        assert_eq!(snapshot.providers["google"].timeouts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_reach_the_provider() {
        let hanging = Arc::new(MockProvider::hanging("deep_google"));
        let quick = Arc::new(MockProvider::ok("google", "Pressione START", 100));
        let race = race_of(&[hanging.clone(), quick.clone()]);

        race.race(group("Press START"), "en", "pt").await;
        race.race(group("Continue?"), "en", "pt").await;

        assert_eq!(hanging.timeouts(), 2);
        assert_eq!(quick.timeouts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_isolated() {
        let race = race_of(&[
            Arc::new(MockProvider::unavailable("deep_google", 10)),
            Arc::new(MockProvider::hanging("deep_microsoft")),
            Arc::new(MockProvider::ok("google", "Pressione START", 900)),
        ]);
        let outcome = race.race(group("Press START"), "en", "pt").await;
        assert_eq!(winner(&outcome).candidate.provider_id, "google");
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_races_pick_same_winner() {
        let race = race_of(&[
            Arc::new(MockProvider::ok("a", "Pressione START", 250)),
            Arc::new(MockProvider::ok("b", "Aperte o START", 250)),
            Arc::new(MockProvider::ok("c", "Iniciar", 250)),
        ]);

        let first = race.race(group("Press START"), "en", "pt").await;
        let expected = winner(&first).clone();
        for _ in 0..5 {
            let again = race.race(group("Press START"), "en", "pt").await;
            assert_eq!(winner(&again), &expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_first_providers_race() {
        let mocks: Vec<Arc<MockProvider>> = ["p1", "p2", "p3", "p4"]
            .iter()
            .map(|id| Arc::new(MockProvider::ok(id, "Pressione START", 100)))
            .collect();
        let race = race_of(&mocks);
        assert_eq!(race.provider_ids(), vec!["p1", "p2", "p3"]);

        race.race(group("Press START"), "en", "pt").await;
        assert_eq!(mocks[3].calls(), 0);
        assert!(mocks[..3].iter().all(|m| m.calls() == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_drops_in_flight_calls() {
        let slow = Arc::new(MockProvider::ok("slow", "Pressione START", 5_000));
        let race = race_of(&[slow.clone()]);

        let outcome = race
            .race_cancellable(
                group("Press START"),
                "en",
                "pt",
                tokio::time::sleep(Duration::from_secs(1)),
            )
            .await;
        assert!(outcome.is_none());
        assert_eq!(slow.calls(), 1);

        let finished = race
            .race_cancellable(
                group("Press START"),
                "en",
                "pt",
                tokio::time::sleep(Duration::from_secs(60)),
            )
            .await;
        assert!(finished.unwrap().is_selected());
    }

    #[derive(Default)]
    struct MapCache(Mutex<HashMap<Fingerprint, CachedTranslation>>);

    impl TranslationCacheSeam for MapCache {
        fn lookup(&self, fingerprint: &Fingerprint) -> Option<CachedTranslation> {
            self.0.lock().get(fingerprint).cloned()
        }

        fn store(&self, fingerprint: Fingerprint, result: &TranslationResult) {
            if let Some(w) = &result.winning_candidate {
                self.0.lock().insert(
                    fingerprint,
                    CachedTranslation {
                        winning_candidate: w.clone(),
                        attempted_providers: result.attempted_providers.clone(),
                    },
                );
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_short_circuits_second_race() {
        let provider = Arc::new(MockProvider::ok("deep_google", "Pressione START", 300));
        let cache = Arc::new(MapCache::default());
        let race = race_of(&[provider.clone()]).with_cache(cache.clone());

        let first = race.race(group("Press START"), "en", "pt").await;
        let second = race.race(group("Press  START"), "en", "pt").await;

        assert_eq!(provider.calls(), 1);
        let RaceOutcome::Selected(result) = second else {
            panic!("expected cached selection");
        };
        assert_eq!(result.selection, Selection::Cached);
        assert_eq!(result.winning_candidate.as_ref(), Some(winner(&first)));

        // a different target language is a different key
        race.race(group("Press START"), "en", "es").await;
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_best_effort_is_not_cached() {
        let provider = Arc::new(MockProvider::ok("google", "Press START", 100));
        let cache = Arc::new(MapCache::default());
        let race = race_of(&[provider.clone()]).with_cache(cache.clone());

        race.race(group("Press START"), "en", "pt").await;
        race.race(group("Press START"), "en", "pt").await;
        assert_eq!(provider.calls(), 2);
    }
}
