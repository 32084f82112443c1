use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::core::config::{ProviderEndpoint, ProviderKind};
use crate::core::errors::{ProviderError, ProviderResult};
use crate::middleware::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::services::translation::provider::TranslationProvider;
use crate::utils::Metrics;

const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

/// Translation provider reachable over HTTP, guarded by its own circuit
/// breaker and retried with exponential backoff plus jitter
pub struct HttpTranslationProvider {
    endpoint: ProviderEndpoint,
    http_client: reqwest::Client,
    circuit_breaker: CircuitBreaker,
    request_timeout: Duration,
    retry_attempts: u32,
    metrics: Option<Metrics>,
}

#[derive(Debug, Deserialize)]
struct LibreResponse {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

/// Failure of one HTTP round trip, before retry policy is applied
enum SendError {
    Status(reqwest::StatusCode, String),
    Transport(reqwest::Error),
}

impl HttpTranslationProvider {
    pub fn new(
        endpoint: ProviderEndpoint,
        request_timeout: Duration,
        retry_attempts: u32,
        breaker_config: CircuitBreakerConfig,
        metrics: Option<Metrics>,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("Failed to create HTTP client")?;

        let circuit_breaker = CircuitBreaker::new(&endpoint.id, breaker_config);

        Ok(Self {
            endpoint,
            http_client,
            circuit_breaker,
            request_timeout,
            retry_attempts,
            metrics,
        })
    }

    fn note_failure(&self) {
        if self.circuit_breaker.record_failure() {
            if let Some(ref m) = self.metrics {
                m.record_circuit_breaker_trip();
            }
        }
    }

    fn request(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> (String, serde_json::Value) {
        match self.endpoint.kind {
            ProviderKind::Libre => {
                let url = format!("{}/translate", self.endpoint.url.trim_end_matches('/'));
                let mut body = serde_json::json!({
                    "q": text,
                    "source": source_lang,
                    "target": target_lang,
                    "format": "text",
                });
                if let Some(key) = &self.endpoint.api_key {
                    body["api_key"] = serde_json::Value::String(key.clone());
                }
                (url, body)
            }
            ProviderKind::Gemini => {
                let model = self.endpoint.model.as_deref().unwrap_or(DEFAULT_GEMINI_MODEL);
                let url = format!(
                    "{}/v1beta/models/{}:generateContent?key={}",
                    self.endpoint.url.trim_end_matches('/'),
                    model,
                    self.endpoint.api_key.as_deref().unwrap_or_default()
                );
                let source = if source_lang == "auto" {
                    "the detected source language".to_string()
                } else {
                    source_lang.to_string()
                };
                let prompt = format!(
                    "Translate the following video game text from {} to {}. \
                     Keep button names and line breaks. \
                     Only output the translation, nothing else.\n\n{}",
                    source, target_lang, text
                );
                let body = serde_json::json!({
                    "contents": [{
                        "parts": [{"text": prompt}]
                    }],
                    "generationConfig": {
                        "temperature": 0.2,
                        "maxOutputTokens": 512
                    }
                });
                (url, body)
            }
        }
    }

    fn parse(&self, body: &str) -> ProviderResult<String> {
        let translated = match self.endpoint.kind {
            ProviderKind::Libre => serde_json::from_str::<LibreResponse>(body)
                .map(|r| r.translated_text)
                .ok(),
            ProviderKind::Gemini => serde_json::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|v| {
                    v["candidates"][0]["content"]["parts"][0]["text"]
                        .as_str()
                        .map(|s| s.trim().to_string())
                }),
        };

        translated.ok_or_else(|| ProviderError::Rejected {
            provider: self.endpoint.id.clone(),
            reason: format!(
                "unexpected response body: {}",
                body.chars().take(120).collect::<String>()
            ),
        })
    }

    async fn send_once(&self, url: &str, body: &serde_json::Value) -> Result<String, SendError> {
        let response = self
            .http_client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(SendError::Transport)?;

        let status = response.status();
        let text = response.text().await.map_err(SendError::Transport)?;
        if status.is_success() {
            Ok(text)
        } else {
            Err(SendError::Status(status, text))
        }
    }

    /// Send with retries. Rate limits, 5xx and transport errors are retried;
    /// other 4xx are final.
    async fn send_with_retries(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> ProviderResult<String> {
        let mut attempt = 0;
        loop {
            let err = match self.send_once(url, body).await {
                Ok(text) => return Ok(text),
                Err(e) => self.classify(e),
            };

            let retryable = matches!(err, ProviderError::Unavailable { .. });
            if !retryable || attempt >= self.retry_attempts {
                return Err(err);
            }

            attempt += 1;
            debug!(
                "Provider {} failed: {}. Retrying ({}/{})",
                self.endpoint.id, err, attempt, self.retry_attempts
            );
            tokio::time::sleep(backoff_delay(attempt)).await;
        }
    }

    fn classify(&self, err: SendError) -> ProviderError {
        let provider = self.endpoint.id.clone();
        match err {
            SendError::Status(status, body) => {
                let reason = format!("{} - {}", status, body.chars().take(200).collect::<String>());
                if status.as_u16() == 429 || status.is_server_error() {
                    ProviderError::Unavailable { provider, reason }
                } else {
                    ProviderError::Rejected { provider, reason }
                }
            }
            SendError::Transport(e) if e.is_timeout() => ProviderError::Timeout {
                provider,
                after: self.request_timeout,
            },
            SendError::Transport(e) => ProviderError::Unavailable {
                provider,
                reason: e.to_string(),
            },
        }
    }
}

/// Exponential backoff (250ms, 500ms, 1s, ...) plus up to 250ms of jitter
fn backoff_delay(attempt: u32) -> Duration {
    let base = 250_u64 * 2_u64.pow(attempt.saturating_sub(1).min(5));
    let jitter = rand::random::<u64>() % 250;
    Duration::from_millis(base + jitter)
}

#[async_trait]
impl TranslationProvider for HttpTranslationProvider {
    fn id(&self) -> &str {
        &self.endpoint.id
    }

    #[instrument(skip(self, text), fields(provider = %self.endpoint.id, chars = text.chars().count()))]
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> ProviderResult<String> {
        if !self.circuit_breaker.allow_request() {
            warn!("Circuit breaker for {} is open, failing fast", self.endpoint.id);
            return Err(ProviderError::Unavailable {
                provider: self.endpoint.id.clone(),
                reason: "circuit breaker open".to_string(),
            });
        }

        let (url, body) = self.request(text, source_lang, target_lang);
        let result = self
            .send_with_retries(&url, &body)
            .await
            .and_then(|raw| self.parse(&raw));

        match &result {
            Ok(_) => self.circuit_breaker.record_success(),
            // a rejected request says nothing about provider health
            Err(ProviderError::Rejected { .. }) => {}
            Err(_) => self.note_failure(),
        }
        result
    }

    fn record_timeout(&self) {
        warn!("Provider {} outlived its caller's timeout", self.endpoint.id);
        self.note_failure();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(kind: ProviderKind, url: &str) -> HttpTranslationProvider {
        HttpTranslationProvider::new(
            ProviderEndpoint {
                id: "local".to_string(),
                kind,
                url: url.to_string(),
                api_key: Some("k".to_string()),
                model: None,
            },
            Duration::from_secs(2),
            0,
            CircuitBreakerConfig {
                failure_threshold: 1,
                timeout: Duration::from_secs(60),
                success_threshold: 1,
            },
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_libre_request_shape() {
        let p = provider(ProviderKind::Libre, "http://localhost:5000/");
        let (url, body) = p.request("Press START", "en", "pt");
        assert_eq!(url, "http://localhost:5000/translate");
        assert_eq!(body["q"], "Press START");
        assert_eq!(body["target"], "pt");
        assert_eq!(body["api_key"], "k");
    }

    #[test]
    fn test_gemini_request_and_parse() {
        let p = provider(ProviderKind::Gemini, "https://generativelanguage.googleapis.com");
        let (url, body) = p.request("GAME OVER", "auto", "pt");
        assert!(url.contains("models/gemini-2.5-flash:generateContent?key=k"));
        let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(prompt.ends_with("GAME OVER"));

        let reply = r#"{"candidates":[{"content":{"parts":[{"text":" FIM DE JOGO \n"}]}}]}"#;
        assert_eq!(p.parse(reply).unwrap(), "FIM DE JOGO");
        assert!(matches!(
            p.parse(r#"{"candidates":[]}"#),
            Err(ProviderError::Rejected { .. })
        ));
    }

    #[test]
    fn test_libre_parse() {
        let p = provider(ProviderKind::Libre, "http://localhost:5000");
        assert_eq!(
            p.parse(r#"{"translatedText":"Pressione START"}"#).unwrap(),
            "Pressione START"
        );
        assert!(p.parse("<html>oops</html>").is_err());
    }

    #[test]
    fn test_status_classification() {
        let p = provider(ProviderKind::Libre, "http://localhost:5000");
        let classify = |code: u16| {
            p.classify(SendError::Status(
                reqwest::StatusCode::from_u16(code).unwrap(),
                String::new(),
            ))
        };
        assert!(matches!(classify(429), ProviderError::Unavailable { .. }));
        assert!(matches!(classify(503), ProviderError::Unavailable { .. }));
        assert!(matches!(classify(400), ProviderError::Rejected { .. }));
        assert!(matches!(classify(403), ProviderError::Rejected { .. }));
    }

    #[test]
    fn test_backoff_grows() {
        assert!(backoff_delay(1) < Duration::from_millis(500));
        assert!(backoff_delay(3) >= Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_unreachable_provider_opens_circuit() {
        // port 9 (discard) on localhost is refused on any sane test host
        let p = provider(ProviderKind::Libre, "http://127.0.0.1:9");
        let first = p.translate("START", "en", "pt").await;
        assert!(matches!(
            first,
            Err(ProviderError::Unavailable { .. }) | Err(ProviderError::Timeout { .. })
        ));

        let second = p.translate("START", "en", "pt").await.unwrap_err();
        assert!(second.to_string().contains("circuit breaker open"));
    }

    #[tokio::test]
    async fn test_caller_timeout_opens_circuit() {
        use crate::middleware::CircuitState;

        let p = provider(ProviderKind::Libre, "http://localhost:5000");
        assert_eq!(p.circuit_breaker.state(), CircuitState::Closed);

        p.record_timeout();
        assert_eq!(p.circuit_breaker.state(), CircuitState::Open);
        assert_eq!(p.circuit_breaker.trips(), 1);

        let err = p.translate("START", "en", "pt").await.unwrap_err();
        assert!(err.to_string().contains("circuit breaker open"));
    }
}
