// Command-line entry point: translate the OCR output of one emulator frame

use retro_translate::{
    core::{Config, DomainVocabulary, FrameInput},
    middleware::CircuitBreakerConfig,
    orchestration::FramePipeline,
    services::{
        rendering::{JsonOverlayRenderer, OverlayRenderer},
        scoring::ConfidenceScorer,
        translation::{HttpTranslationProvider, TranslationCache, TranslationCacheSeam, TranslationProvider},
    },
    utils::Metrics,
};

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const USAGE: &str = "usage: retro-translate <frame.json> [config.json | preset]";

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let Some(frame_path) = args.next() else {
        bail!(USAGE);
    };

    // Load configuration: a JSON file, a named preset, or the environment
    let config = match args.next() {
        Some(arg) if Path::new(&arg).exists() => {
            Config::from_file(&arg).with_context(|| format!("Invalid config file {}", arg))?
        }
        Some(name) => Config::preset(&name)?,
        None => Config::new().context("Failed to load configuration")?,
    };

    // Initialize logging; stdout carries the overlay, logs go to stderr
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new(format!(
        "retro_translate={}",
        match config.log_level() {
            tracing::Level::TRACE => "trace",
            tracing::Level::DEBUG => "debug",
            tracing::Level::INFO => "info",
            tracing::Level::WARN => "warn",
            tracing::Level::ERROR => "error",
        }
    ));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!(
        "Config: racing {:?}, timeout {}s, min confidence {}, cache {}",
        config.translation.provider_priority_order,
        config.translation.translation_timeout_seconds,
        config.translation.min_confidence_score,
        if config.cache.enabled { "ON" } else { "OFF" }
    );

    let vocabulary = match &config.vocabulary_path {
        Some(path) => DomainVocabulary::from_file(path)?,
        None => DomainVocabulary::builtin()?,
    };
    let scorer = Arc::new(ConfidenceScorer::new(
        config.translation.confidence_weights,
        Arc::new(vocabulary),
    )?);

    let metrics = Metrics::new();
    let providers = build_providers(&config, &metrics)?;
    if providers.is_empty() {
        warn!("No provider endpoints configured, text will stay untranslated");
    }

    let cache = if config.cache.enabled {
        let cache = TranslationCache::new(
            &config.cache.dir,
            config.cache.max_entries,
            config.cache_ttl(),
            Some(Duration::from_secs(config.cache.save_interval_seconds)),
            Some(metrics.clone()),
        )
        .await
        .context("Failed to open translation cache")?;
        Some(Arc::new(cache))
    } else {
        None
    };

    let pipeline = FramePipeline::new(
        &config,
        providers,
        scorer,
        cache
            .clone()
            .map(|c| c as Arc<dyn TranslationCacheSeam>),
        metrics.clone(),
    );

    let raw = tokio::fs::read_to_string(&frame_path)
        .await
        .with_context(|| format!("Failed to read frame {}", frame_path))?;
    let frame: FrameInput = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse frame {}", frame_path))?;

    let overlay = pipeline.process(frame).await;

    {
        let mut stdout = std::io::stdout().lock();
        JsonOverlayRenderer::new().pretty().render(&overlay, &mut stdout)?;
    }

    if let Some(cache) = cache {
        cache.save().await.context("Failed to save translation cache")?;
    }

    let snapshot = metrics.snapshot();
    info!(
        "Races: {} ({} all failed), fallback used {}, cache hit rate {:.0}%",
        snapshot.races_total,
        snapshot.races_all_failed,
        snapshot.fallback_used,
        snapshot.cache_hit_rate * 100.0
    );

    Ok(())
}

/// HTTP providers in priority order; ids without an endpoint are skipped
fn build_providers(config: &Config, metrics: &Metrics) -> Result<Vec<Arc<dyn TranslationProvider>>> {
    let breaker = CircuitBreakerConfig::from(&config.translation.circuit_breaker);
    let mut providers: Vec<Arc<dyn TranslationProvider>> = Vec::new();

    for id in &config.translation.provider_priority_order {
        let Some(endpoint) = config.provider(id) else {
            warn!("Provider {} has no endpoint configured, skipping", id);
            continue;
        };
        let provider = HttpTranslationProvider::new(
            endpoint.clone(),
            config.translation_timeout(),
            config.translation.retry_attempts,
            breaker.clone(),
            Some(metrics.clone()),
        )?;
        providers.push(Arc::new(provider));
    }

    Ok(providers)
}
