use lru::LruCache;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::core::errors::{CacheError, CacheResult};
use crate::core::types::{ScoredCandidate, Selection, TextGroup, TranslationResult};
use crate::utils::Metrics;

/// Stable cache key for a translation or an OCR result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Key over (normalized text, source language, target language).
    ///
    /// Whitespace runs collapse to one space; case is kept because button
    /// labels often translate differently in caps.
    pub fn for_translation(text: &str, source_lang: &str, target_lang: &str) -> Self {
        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let input = format!(
            "{}\u{1f}{}\u{1f}{}",
            normalized,
            source_lang.to_lowercase(),
            target_lang.to_lowercase()
        );
        Self(xxh3_64(input.as_bytes()))
    }

    /// Key over (image bytes, source language)
    pub fn for_ocr(image_bytes: &[u8], source_lang: &str) -> Self {
        let mut hash_input = Vec::with_capacity(image_bytes.len() + source_lang.len() + 1);
        hash_input.extend_from_slice(image_bytes);
        hash_input.push(0x1f);
        hash_input.extend_from_slice(source_lang.to_lowercase().as_bytes());
        Self(xxh3_64(&hash_input))
    }

    pub fn to_hex(&self) -> String {
        format!("{:016x}", self.0)
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        u64::from_str_radix(hex, 16).ok().map(Self)
    }
}

/// The reusable part of a race result; rebound to the caller's group on a hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedTranslation {
    pub winning_candidate: ScoredCandidate,
    pub attempted_providers: Vec<String>,
}

impl CachedTranslation {
    pub fn into_result(self, text_group: TextGroup) -> TranslationResult {
        TranslationResult {
            text_group,
            winning_candidate: Some(self.winning_candidate),
            attempted_providers: self.attempted_providers,
            fallback_used: false,
            selection: Selection::Cached,
        }
    }
}

/// Read-through cache consulted by the race. Implementations must be safe to
/// share between concurrently racing groups.
pub trait TranslationCacheSeam: Send + Sync {
    fn lookup(&self, fingerprint: &Fingerprint) -> Option<CachedTranslation>;

    /// Remember a result; results without a winner are ignored
    fn store(&self, fingerprint: Fingerprint, result: &TranslationResult);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    translation: CachedTranslation,
    stored_at: u64,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Translation cache with TTL expiry, LRU eviction and debounced persistence.
///
/// Entries live in memory behind a `parking_lot` lock; a background task
/// writes the whole table to `translations.json` at most once per save
/// interval, and only when something changed.
#[derive(Clone)]
pub struct TranslationCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    cache: RwLock<LruCache<Fingerprint, CacheEntry>>,
    cache_file: PathBuf,
    ttl: Duration,

    // Debounced persistence
    dirty: RwLock<bool>,

    metrics: Option<Metrics>,
}

impl TranslationCache {
    /// Open (or create) the cache in `cache_dir`.
    ///
    /// A corrupt cache file is logged and ignored. `save_interval` of `None`
    /// or zero disables background persistence; call [`save`](Self::save).
    pub async fn new(
        cache_dir: &str,
        max_entries: usize,
        ttl: Duration,
        save_interval: Option<Duration>,
        metrics: Option<Metrics>,
    ) -> CacheResult<Self> {
        let capacity = NonZeroUsize::new(max_entries).ok_or(CacheError::ZeroCapacity)?;

        let cache_path = Path::new(cache_dir);
        if !cache_path.exists() {
            tokio::fs::create_dir_all(cache_path)
                .await
                .map_err(|source| CacheError::LoadFailed {
                    path: cache_dir.to_string(),
                    source,
                })?;
        }
        let cache_file = cache_path.join("translations.json");

        let stored: HashMap<String, CacheEntry> = if cache_file.exists() {
            let data = tokio::fs::read_to_string(&cache_file)
                .await
                .map_err(|source| CacheError::LoadFailed {
                    path: cache_file.display().to_string(),
                    source,
                })?;
            serde_json::from_str(&data).unwrap_or_else(|e| {
                warn!("Ignoring unreadable cache file {}: {}", cache_file.display(), e);
                HashMap::new()
            })
        } else {
            HashMap::new()
        };

        let now = unix_now();
        let mut lru = LruCache::new(capacity);
        let mut expired = 0;
        for (key, entry) in stored {
            match Fingerprint::from_hex(&key) {
                Some(fp) if now.saturating_sub(entry.stored_at) < ttl.as_secs() => {
                    lru.put(fp, entry);
                }
                _ => expired += 1,
            }
        }
        debug!(
            "Loaded {} cached translations ({} expired or invalid)",
            lru.len(),
            expired
        );

        let inner = Arc::new(CacheInner {
            cache: RwLock::new(lru),
            cache_file,
            ttl,
            dirty: RwLock::new(false),
            metrics,
        });
        let cache = Self { inner };

        if let Some(interval) = save_interval.filter(|i| !i.is_zero()) {
            cache.start_persistence_task(interval);
        }

        Ok(cache)
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<CachedTranslation> {
        let now = unix_now();
        let ttl = self.inner.ttl.as_secs();

        let hit = {
            let mut cache = self.inner.cache.write();
            let found = cache
                .get(fingerprint)
                .map(|e| (now.saturating_sub(e.stored_at) >= ttl, e.translation.clone()));
            match found {
                Some((false, translation)) => Some(translation),
                Some((true, _)) => {
                    cache.pop(fingerprint);
                    *self.inner.dirty.write() = true;
                    None
                }
                None => None,
            }
        };

        self.record(hit.is_some());
        hit
    }

    pub fn put(&self, fingerprint: Fingerprint, translation: CachedTranslation) {
        let entry = CacheEntry {
            translation,
            stored_at: unix_now(),
        };
        self.inner.cache.write().put(fingerprint, entry);

        *self.inner.dirty.write() = true;
    }

    fn record(&self, hit: bool) {
        if let Some(ref m) = self.inner.metrics {
            if hit {
                m.record_cache_hit();
            } else {
                m.record_cache_miss();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the table to disk now
    pub async fn save(&self) -> CacheResult<()> {
        save_inner(&self.inner).await
    }

    /// Periodic persistence; the task ends once the last cache handle is
    /// dropped
    fn start_persistence_task(&self, interval: Duration) {
        let weak: Weak<CacheInner> = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            let mut last_save = Instant::now();

            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;

                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let is_dirty = *inner.dirty.read();
                if is_dirty && last_save.elapsed() >= interval {
                    match save_inner(&inner).await {
                        Ok(()) => last_save = Instant::now(),
                        Err(e) => warn!("Background cache save failed: {}", e),
                    }
                }
            }
        });
    }
}

async fn save_inner(inner: &CacheInner) -> CacheResult<()> {
    let snapshot = take_snapshot(inner);
    let written = write_snapshot(inner, &snapshot).await;
    if written.is_err() {
        *inner.dirty.write() = true;
    }
    written
}

/// Clears the dirty flag, then copies the table. Writes landing after this
/// point mark the cache dirty again.
fn take_snapshot(inner: &CacheInner) -> HashMap<String, CacheEntry> {
    *inner.dirty.write() = false;
    let cache = inner.cache.read();
    cache
        .iter()
        .map(|(k, v)| (k.to_hex(), v.clone()))
        .collect()
}

async fn write_snapshot(inner: &CacheInner, snapshot: &HashMap<String, CacheEntry>) -> CacheResult<()> {
    let json = serde_json::to_string_pretty(snapshot)?;
    tokio::fs::write(&inner.cache_file, json)
        .await
        .map_err(|source| CacheError::SaveFailed {
            path: inner.cache_file.display().to_string(),
            source,
        })
}

impl TranslationCacheSeam for TranslationCache {
    fn lookup(&self, fingerprint: &Fingerprint) -> Option<CachedTranslation> {
        self.get(fingerprint)
    }

    fn store(&self, fingerprint: Fingerprint, result: &TranslationResult) {
        if let Some(winner) = &result.winning_candidate {
            self.put(
                fingerprint,
                CachedTranslation {
                    winning_candidate: winner.clone(),
                    attempted_providers: result.attempted_providers.clone(),
                },
            );
        }
    }
}
