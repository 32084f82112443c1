use async_trait::async_trait;

use crate::core::errors::ProviderResult;

/// A translation backend as seen by the race.
///
/// Implementations report failures through `ProviderError` only; the race
/// treats every backend the same regardless of protocol.
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    /// Stable identifier, used for priority order and statistics
    fn id(&self) -> &str;

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> ProviderResult<String>;

    /// The caller stopped waiting on a `translate` call; counts as a failure
    /// toward the backend's health
    fn record_timeout(&self) {}
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::core::errors::ProviderError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Deterministic provider: fixed reply after a fixed (virtual) delay
    pub struct MockProvider {
        id: String,
        reply: ProviderResult<String>,
        delay: Duration,
        calls: AtomicUsize,
        timeouts: AtomicUsize,
    }

    impl MockProvider {
        pub fn ok(id: &str, text: &str, delay_ms: u64) -> Self {
            Self {
                id: id.to_string(),
                reply: Ok(text.to_string()),
                delay: Duration::from_millis(delay_ms),
                calls: AtomicUsize::new(0),
                timeouts: AtomicUsize::new(0),
            }
        }

        pub fn unavailable(id: &str, delay_ms: u64) -> Self {
            Self {
                id: id.to_string(),
                reply: Err(ProviderError::Unavailable {
                    provider: id.to_string(),
                    reason: "503 Service Unavailable".to_string(),
                }),
                delay: Duration::from_millis(delay_ms),
                calls: AtomicUsize::new(0),
                timeouts: AtomicUsize::new(0),
            }
        }

        /// Answers long after any sane timeout
        pub fn hanging(id: &str) -> Self {
            Self::ok(id, "too late", 3_600_000)
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn timeouts(&self) -> usize {
            self.timeouts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TranslationProvider for MockProvider {
        fn id(&self) -> &str {
            &self.id
        }

        async fn translate(
            &self,
            _text: &str,
            _source_lang: &str,
            _target_lang: &str,
        ) -> ProviderResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.reply.clone()
        }

        fn record_timeout(&self) {
            self.timeouts.fetch_add(1, Ordering::SeqCst);
        }
    }
}
