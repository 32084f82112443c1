use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{Selection, TextGroup, TranslationCandidate, TranslationResult};
use crate::services::scoring::ConfidenceScorer;
use crate::services::translation::provider::TranslationProvider;
use crate::utils::metrics::Metrics;

/// Last resort after a race where every provider failed.
///
/// Walks the full provider list in priority order, one call at a time, and
/// accepts the first non-empty answer regardless of score. When nothing
/// answers, the group keeps its source text.
pub struct SequentialFallback {
    providers: Vec<Arc<dyn TranslationProvider>>,
    scorer: Arc<ConfidenceScorer>,
    timeout: Duration,
    metrics: Option<Metrics>,
}

impl SequentialFallback {
    pub fn new(
        providers: Vec<Arc<dyn TranslationProvider>>,
        scorer: Arc<ConfidenceScorer>,
        timeout: Duration,
    ) -> Self {
        Self {
            providers,
            scorer,
            timeout,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[instrument(skip_all, fields(chars = group.text().chars().count()))]
    pub async fn translate(
        &self,
        group: TextGroup,
        mut attempted_providers: Vec<String>,
        source_lang: &str,
        target_lang: &str,
    ) -> TranslationResult {
        if let Some(ref m) = self.metrics {
            m.record_fallback_used();
        }
        info!("Falling back to sequential translation for '{}'", group.text());

        for provider in &self.providers {
            let id = provider.id();
            if !attempted_providers.iter().any(|p| p == id) {
                attempted_providers.push(id.to_string());
            }

            let started = Instant::now();
            let reply = tokio::time::timeout(
                self.timeout,
                provider.translate(group.text(), source_lang, target_lang),
            )
            .await;
            let elapsed = started.elapsed().as_secs_f64();

            match reply {
                Ok(Ok(translated)) if !translated.trim().is_empty() => {
                    let candidate =
                        TranslationCandidate::succeeded(id, group.text(), translated, elapsed);
                    let scored = self.scorer.score_candidate(candidate);
                    debug!("Fallback accepted {} ({:.3})", id, scored.score);
                    return TranslationResult {
                        text_group: group,
                        winning_candidate: Some(scored),
                        attempted_providers,
                        fallback_used: true,
                        selection: Selection::Fallback,
                    };
                }
                Ok(Ok(_)) => debug!("Fallback provider {} returned empty text", id),
                Ok(Err(e)) => debug!("Fallback provider {} failed: {}", id, e),
                Err(_) => {
                    debug!("Fallback provider {} timed out after {:?}", id, self.timeout);
                    provider.record_timeout();
                }
            }
        }

        warn!("No provider could translate '{}', keeping source text", group.text());
        TranslationResult {
            text_group: group,
            winning_candidate: None,
            attempted_providers,
            fallback_used: true,
            selection: Selection::Untranslated,
        }
    }
}
