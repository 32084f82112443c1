pub mod cache;
pub mod fallback;
pub mod http_provider;
pub mod provider;
pub mod race;

pub use cache::{CachedTranslation, Fingerprint, TranslationCache, TranslationCacheSeam};
pub use fallback::SequentialFallback;
pub use http_provider::HttpTranslationProvider;
pub use provider::TranslationProvider;
pub use race::{AllFailed, RaceOutcome, RaceState, TranslatorRace};
