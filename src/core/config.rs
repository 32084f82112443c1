use crate::core::errors::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Detection consolidation (dedup + grouping) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    /// Detections at or below this OCR confidence are dropped before dedup
    pub min_detection_confidence: f32,
    /// Centroid distance under which two detections may be duplicates
    pub dedup_distance_px: f32,
    /// Horizontal grouping reach as a fraction of frame width
    pub group_horizontal_ratio: f32,
    /// Vertical grouping reach as a fraction of frame height
    pub group_vertical_ratio: f32,
    /// Floor for the horizontal reach on small frames
    pub horizontal_fallback_px: u32,
    /// Floor for the vertical reach on small frames
    pub vertical_fallback_px: u32,
    /// Horizontal threshold in multiples of the line's text height
    pub horizontal_height_factor: f32,
    /// Vertical threshold in multiples of the line's text height
    pub vertical_height_factor: f32,
    /// Paragraph tolerance in multiples of the line tolerance
    pub paragraph_factor: f32,
    /// Minimum horizontal overlap with the line above to continue a paragraph
    pub paragraph_min_overlap: f32,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            min_detection_confidence: 0.3,
            dedup_distance_px: 20.0,
            group_horizontal_ratio: 0.15,
            group_vertical_ratio: 0.10,
            horizontal_fallback_px: 50,
            vertical_fallback_px: 25,
            horizontal_height_factor: 1.5,
            vertical_height_factor: 0.5,
            paragraph_factor: 3.0,
            paragraph_min_overlap: 0.30,
        }
    }
}

/// Weights of the four confidence sub-metrics.
///
/// Serialized as `[context, consistency, quality, speed]`. Must sum to
/// 1.0 ± 0.01; checked by [`ConfidenceWeights::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct ConfidenceWeights {
    pub context: f32,
    pub consistency: f32,
    pub quality: f32,
    pub speed: f32,
}

impl ConfidenceWeights {
    pub const SUM_TOLERANCE: f64 = 0.01;

    pub fn new(context: f32, consistency: f32, quality: f32, speed: f32) -> ConfigResult<Self> {
        let weights = Self {
            context,
            consistency,
            quality,
            speed,
        };
        weights.validate()?;
        Ok(weights)
    }

    /// Parse the comma-separated `CONFIDENCE_WEIGHTS` form ("0.4,0.3,0.2,0.1")
    pub fn parse_list(raw: &str) -> ConfigResult<Self> {
        let values: Vec<f32> = raw
            .split(',')
            .map(|s| s.trim().parse::<f32>())
            .collect::<Result<_, _>>()
            .map_err(|_| ConfigError::EnvVarError {
                name: "CONFIDENCE_WEIGHTS".to_string(),
                value: raw.to_string(),
            })?;
        if values.len() != 4 {
            return Err(ConfigError::MalformedWeights(values));
        }
        Self::new(values[0], values[1], values[2], values[3])
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let values = self.as_array();
        if values.iter().any(|w| !w.is_finite() || !(0.0..=1.0).contains(w)) {
            return Err(ConfigError::MalformedWeights(values.to_vec()));
        }
        let sum: f64 = values.iter().map(|&w| w as f64).sum();
        // f32 inputs like 0.995 carry representation error; allow for it
        if (sum - 1.0).abs() > Self::SUM_TOLERANCE + 1e-6 {
            return Err(ConfigError::InvalidWeights { sum });
        }
        Ok(())
    }

    pub fn as_array(&self) -> [f32; 4] {
        [self.context, self.consistency, self.quality, self.speed]
    }
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            context: 0.4,
            consistency: 0.3,
            quality: 0.2,
            speed: 0.1,
        }
    }
}

impl From<[f32; 4]> for ConfidenceWeights {
    fn from(v: [f32; 4]) -> Self {
        Self {
            context: v[0],
            consistency: v[1],
            quality: v[2],
            speed: v[3],
        }
    }
}

impl From<ConfidenceWeights> for [f32; 4] {
    fn from(w: ConfidenceWeights) -> Self {
        w.as_array()
    }
}

/// Per-provider circuit breaker thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: usize,
    pub success_threshold: usize,
    pub open_seconds: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_seconds: 60,
        }
    }
}

/// Translator race configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    /// When false every group goes straight to the sequential fallback
    pub enabled: bool,
    pub max_concurrent_requests: usize,
    pub translation_timeout_seconds: u64,
    pub min_confidence_score: f32,
    pub confidence_weights: ConfidenceWeights,
    /// Provider ids, highest priority first
    pub provider_priority_order: Vec<String>,
    /// Extra HTTP attempts per provider call
    pub retry_attempts: u32,
    /// Groups raced at the same time within one frame
    pub max_concurrent_groups: usize,
    pub source_lang: String,
    pub target_lang: String,
    pub circuit_breaker: BreakerSettings,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent_requests: 3,
            translation_timeout_seconds: 8,
            min_confidence_score: 0.6,
            confidence_weights: ConfidenceWeights::default(),
            provider_priority_order: vec![
                "deep_google".to_string(),
                "deep_microsoft".to_string(),
                "google".to_string(),
            ],
            retry_attempts: 2,
            max_concurrent_groups: 4,
            source_lang: "auto".to_string(),
            target_lang: "pt".to_string(),
            circuit_breaker: BreakerSettings::default(),
        }
    }
}

/// Wire protocol spoken by a provider endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// LibreTranslate-compatible `POST /translate`
    Libre,
    /// Gemini `generateContent`
    Gemini,
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "libre" | "libretranslate" => Ok(ProviderKind::Libre),
            "gemini" => Ok(ProviderKind::Gemini),
            other => Err(ConfigError::InvalidConfig(format!(
                "unknown provider kind '{other}' (expected libre or gemini)"
            ))),
        }
    }
}

/// One translation backend reachable over HTTP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    pub id: String,
    pub kind: ProviderKind,
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Translation cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub dir: String,
    pub ttl_seconds: u64,
    pub max_entries: usize,
    pub save_interval_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: ".cache".to_string(),
            ttl_seconds: 300,
            max_entries: 10_000,
            save_interval_seconds: 5,
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub consolidation: ConsolidationConfig,
    pub translation: TranslationConfig,
    pub providers: Vec<ProviderEndpoint>,
    pub cache: CacheConfig,
    /// Replacement for the built-in domain vocabulary
    pub vocabulary_path: Option<String>,
}

impl Config {
    /// Load from `.env` and the process environment, then validate
    pub fn new() -> ConfigResult<Self> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Self::load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: display.clone(),
            source,
        })?;
        let config: Config =
            serde_json::from_str(&raw).map_err(|source| ConfigError::ParseFailed {
                path: display,
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Named deployment profile layered over the defaults. Provider
    /// endpoints still come from `.env` and the process environment.
    pub fn preset(name: &str) -> ConfigResult<Self> {
        let _ = dotenvy::dotenv();

        let mut config = Config::default();
        let t = &mut config.translation;
        let order = |ids: &[&str]| ids.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        match name {
            "development" => {
                t.provider_priority_order = order(&["deep_google", "google"]);
                t.max_concurrent_requests = 2;
                t.translation_timeout_seconds = 10;
                t.min_confidence_score = 0.5;
                config.logging.level = "debug".to_string();
            }
            "production" => {
                t.provider_priority_order = order(&["deep_google", "deep_microsoft", "google"]);
                t.max_concurrent_requests = 3;
                t.translation_timeout_seconds = 8;
                t.min_confidence_score = 0.6;
            }
            "testing" => {
                t.provider_priority_order = order(&["deep_google"]);
                t.max_concurrent_requests = 1;
                t.translation_timeout_seconds = 15;
                t.min_confidence_score = 0.3;
                config.logging.level = "debug".to_string();
            }
            "conservative" => {
                t.enabled = false;
                t.provider_priority_order = order(&["google"]);
                t.max_concurrent_requests = 1;
                t.translation_timeout_seconds = 5;
                t.min_confidence_score = 0.8;
            }
            other => return Err(ConfigError::UnknownPreset(other.to_string())),
        }

        config.providers = providers_from_env(&config.translation.provider_priority_order)?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_env() -> ConfigResult<Self> {
        let defaults = Config::default();
        let c = &defaults.consolidation;
        let t = &defaults.translation;
        let k = &defaults.cache;

        let provider_priority_order = env::var("CONCURRENT_TRANSLATORS")
            .ok()
            .map(|list| {
                list.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_else(|| t.provider_priority_order.clone());

        // Never fall back to defaults for a malformed weight vector
        let confidence_weights = match env::var("CONFIDENCE_WEIGHTS") {
            Ok(raw) => ConfidenceWeights::parse_list(&raw)?,
            Err(_) => t.confidence_weights,
        };

        let providers = providers_from_env(&provider_priority_order)?;

        Ok(Self {
            logging: LoggingConfig {
                level: env::var("LOG_LEVEL").unwrap_or_else(|_| defaults.logging.level.clone()),
            },
            consolidation: ConsolidationConfig {
                min_detection_confidence: env_or(
                    "MIN_DETECTION_CONFIDENCE",
                    c.min_detection_confidence,
                )?,
                dedup_distance_px: env_or("DEDUP_DISTANCE_PX", c.dedup_distance_px)?,
                group_horizontal_ratio: env_or("GROUP_HORIZONTAL_RATIO", c.group_horizontal_ratio)?,
                group_vertical_ratio: env_or("GROUP_VERTICAL_RATIO", c.group_vertical_ratio)?,
                ..c.clone()
            },
            translation: TranslationConfig {
                enabled: env_flag("ENABLE_CONCURRENT_TRANSLATION", t.enabled)?,
                max_concurrent_requests: env_or(
                    "MAX_CONCURRENT_REQUESTS",
                    t.max_concurrent_requests,
                )?,
                translation_timeout_seconds: env_or(
                    "TRANSLATION_TIMEOUT",
                    t.translation_timeout_seconds,
                )?,
                min_confidence_score: env_or("MIN_CONFIDENCE_SCORE", t.min_confidence_score)?,
                confidence_weights,
                provider_priority_order,
                retry_attempts: env_or("TRANSLATION_RETRY_ATTEMPTS", t.retry_attempts)?,
                max_concurrent_groups: env_or("MAX_CONCURRENT_GROUPS", t.max_concurrent_groups)?,
                source_lang: env::var("SOURCE_LANG").unwrap_or_else(|_| t.source_lang.clone()),
                target_lang: env::var("TARGET_LANG").unwrap_or_else(|_| t.target_lang.clone()),
                circuit_breaker: t.circuit_breaker.clone(),
            },
            providers,
            cache: CacheConfig {
                enabled: env_flag("ENABLE_TRANSLATION_CACHING", k.enabled)?,
                dir: env::var("CACHE_DIR").unwrap_or_else(|_| k.dir.clone()),
                ttl_seconds: env_or("TRANSLATION_CACHE_TTL", k.ttl_seconds)?,
                ..k.clone()
            },
            vocabulary_path: env::var("VOCABULARY_PATH").ok(),
        })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        parse_level(&self.logging.level).ok_or_else(|| {
            ConfigError::InvalidConfig(format!("unknown log level '{}'", self.logging.level))
        })?;

        let c = &self.consolidation;
        check_unit("min_detection_confidence", c.min_detection_confidence)?;
        check_unit("paragraph_min_overlap", c.paragraph_min_overlap)?;
        if !(c.dedup_distance_px.is_finite() && c.dedup_distance_px > 0.0) {
            return Err(ConfigError::InvalidConfig(format!(
                "dedup_distance_px must be > 0, got {}",
                c.dedup_distance_px
            )));
        }
        for (name, ratio) in [
            ("group_horizontal_ratio", c.group_horizontal_ratio),
            ("group_vertical_ratio", c.group_vertical_ratio),
        ] {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(ConfigError::InvalidConfig(format!(
                    "{name} must be in (0.0, 1.0], got {ratio}"
                )));
            }
        }
        if c.horizontal_fallback_px == 0 || c.vertical_fallback_px == 0 {
            return Err(ConfigError::InvalidConfig(
                "grouping pixel fallbacks must be > 0".to_string(),
            ));
        }
        if !(c.horizontal_height_factor > 0.0 && c.vertical_height_factor > 0.0) {
            return Err(ConfigError::InvalidConfig(
                "grouping height factors must be > 0".to_string(),
            ));
        }
        if !(c.paragraph_factor >= 1.0) {
            return Err(ConfigError::InvalidConfig(format!(
                "paragraph_factor must be >= 1.0, got {}",
                c.paragraph_factor
            )));
        }

        let t = &self.translation;
        if !(1..=10).contains(&t.max_concurrent_requests) {
            return Err(ConfigError::InvalidConfig(format!(
                "max_concurrent_requests must be between 1 and 10, got {}",
                t.max_concurrent_requests
            )));
        }
        if !(1..=60).contains(&t.translation_timeout_seconds) {
            return Err(ConfigError::InvalidConfig(format!(
                "translation_timeout_seconds must be between 1 and 60, got {}",
                t.translation_timeout_seconds
            )));
        }
        check_unit("min_confidence_score", t.min_confidence_score)?;
        t.confidence_weights.validate()?;
        if t.provider_priority_order.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "provider_priority_order must list at least one provider".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = t.provider_priority_order.iter().find(|id| !seen.insert(*id)) {
            return Err(ConfigError::InvalidConfig(format!(
                "provider '{dup}' listed twice in provider_priority_order"
            )));
        }
        if t.retry_attempts > 5 {
            return Err(ConfigError::InvalidConfig(format!(
                "retry_attempts must be between 0 and 5, got {}",
                t.retry_attempts
            )));
        }
        if !(1..=32).contains(&t.max_concurrent_groups) {
            return Err(ConfigError::InvalidConfig(format!(
                "max_concurrent_groups must be between 1 and 32, got {}",
                t.max_concurrent_groups
            )));
        }
        if t.target_lang.trim().is_empty() || t.source_lang.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "source_lang and target_lang must not be empty".to_string(),
            ));
        }
        if t.circuit_breaker.failure_threshold == 0 || t.circuit_breaker.success_threshold == 0 {
            return Err(ConfigError::InvalidConfig(
                "circuit breaker thresholds must be > 0".to_string(),
            ));
        }

        let mut ids = HashSet::new();
        for p in &self.providers {
            if !ids.insert(p.id.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "provider '{}' configured twice",
                    p.id
                )));
            }
            if p.url.trim().is_empty() {
                return Err(ConfigError::InvalidConfig(format!(
                    "provider '{}' has an empty url",
                    p.id
                )));
            }
            if p.kind == ProviderKind::Gemini && p.api_key.as_deref().unwrap_or("").is_empty() {
                return Err(ConfigError::InvalidConfig(format!(
                    "gemini provider '{}' requires an api key",
                    p.id
                )));
            }
        }

        if self.cache.enabled {
            if !(60..=3600).contains(&self.cache.ttl_seconds) {
                return Err(ConfigError::InvalidConfig(format!(
                    "cache ttl_seconds must be between 60 and 3600, got {}",
                    self.cache.ttl_seconds
                )));
            }
            if self.cache.max_entries == 0 {
                return Err(ConfigError::InvalidConfig(
                    "cache max_entries must be > 0".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn log_level(&self) -> Level {
        parse_level(&self.logging.level).unwrap_or(Level::INFO)
    }

    pub fn translation_timeout(&self) -> Duration {
        Duration::from_secs(self.translation.translation_timeout_seconds)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_seconds)
    }

    pub fn provider(&self, id: &str) -> Option<&ProviderEndpoint> {
        self.providers.iter().find(|p| p.id == id)
    }
}

fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

fn check_unit(name: &str, value: f32) -> ConfigResult<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::InvalidConfig(format!(
            "{name} must be between 0.0 and 1.0, got {value}"
        )));
    }
    Ok(())
}

/// Read and parse an env var; unset means `default`, unparseable is an error
fn env_or<T: FromStr>(name: &str, default: T) -> ConfigResult<T> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::EnvVarError {
            name: name.to_string(),
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

fn env_flag(name: &str, default: bool) -> ConfigResult<bool> {
    match env::var(name) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::EnvVarError {
                name: name.to_string(),
                value: raw,
            }),
        },
        Err(_) => Ok(default),
    }
}

fn providers_from_env(ids: &[String]) -> ConfigResult<Vec<ProviderEndpoint>> {
    ids.iter()
        .filter_map(|id| provider_from_env(id).transpose())
        .collect()
}

/// `PROVIDER_<ID>_{KIND,URL,API_KEY,MODEL}`; a provider without a URL is
/// simply not configured
fn provider_from_env(id: &str) -> ConfigResult<Option<ProviderEndpoint>> {
    let prefix = format!("PROVIDER_{}", id.to_uppercase().replace('-', "_"));
    let Ok(url) = env::var(format!("{prefix}_URL")) else {
        return Ok(None);
    };
    let kind = match env::var(format!("{prefix}_KIND")) {
        Ok(raw) => raw.parse()?,
        Err(_) => ProviderKind::Libre,
    };

    Ok(Some(ProviderEndpoint {
        id: id.to_string(),
        kind,
        url,
        api_key: env::var(format!("{prefix}_API_KEY")).ok().filter(|k| !k.is_empty()),
        model: env::var(format!("{prefix}_MODEL")).ok().filter(|m| !m.is_empty()),
    }))
}
