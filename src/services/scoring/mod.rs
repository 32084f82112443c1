// Multi-factor confidence scoring of candidate translations
//
// Pure and deterministic: no I/O, no clock. Every sub-metric and the
// composite score lie in [0, 1].

use std::collections::HashSet;
use std::sync::Arc;

use crate::core::config::ConfidenceWeights;
use crate::core::errors::ConfigResult;
use crate::core::types::{MetricBreakdown, ScoredCandidate, TranslationCandidate};
use crate::core::vocabulary::{tokenize, DomainVocabulary};

const NEUTRAL_CONTEXT: f32 = 0.8;
const PASSTHROUGH_CONTEXT: f32 = 0.5;
const IMPERATIVE_BONUS: f32 = 0.1;

const CONSISTENCY_BASE: f32 = 0.8;
const PASSTHROUGH_CONSISTENCY: f32 = 0.3;
const BRACKET_PENALTY: f32 = 0.1;
const REPETITION_WEIGHT: f32 = 0.5;
const LENGTH_FACTOR_FLOOR: f32 = 0.3;

const FORMATTING_BASE: f32 = 0.8;
const PARITY_BONUS: f32 = 0.1;
const ERROR_PENALTY: f32 = 0.5;

const FAST_SECONDS: f64 = 2.0;
const SLOW_SECONDS: f64 = 8.0;

#[derive(Debug, Clone)]
pub struct ConfidenceScorer {
    weights: ConfidenceWeights,
    vocabulary: Arc<DomainVocabulary>,
}

impl ConfidenceScorer {
    /// Fails with `InvalidWeights` unless the weights sum to 1.0 ± 0.01
    pub fn new(weights: ConfidenceWeights, vocabulary: Arc<DomainVocabulary>) -> ConfigResult<Self> {
        weights.validate()?;
        Ok(Self {
            weights,
            vocabulary,
        })
    }

    pub fn score(&self, source: &str, translated: &str, elapsed_seconds: f64) -> (f32, MetricBreakdown) {
        let breakdown = MetricBreakdown {
            context: self.context_preservation(source, translated),
            consistency: linguistic_consistency(source, translated),
            quality: self.technical_quality(source, translated),
            speed: speed(elapsed_seconds),
        };

        let w = &self.weights;
        let composite = w.context * breakdown.context
            + w.consistency * breakdown.consistency
            + w.quality * breakdown.quality
            + w.speed * breakdown.speed;

        // weights may sum to 1.01
        (composite.clamp(0.0, 1.0), breakdown)
    }

    pub fn score_candidate(&self, candidate: TranslationCandidate) -> ScoredCandidate {
        let (score, metric_breakdown) = self.score(
            &candidate.source_text,
            &candidate.translated_text,
            candidate.elapsed_seconds,
        );
        ScoredCandidate {
            candidate,
            score,
            metric_breakdown,
        }
    }

    /// Share of source vocabulary terms that survive translation
    pub fn context_preservation(&self, source: &str, translated: &str) -> f32 {
        if is_passthrough(source, translated) {
            return PASSTHROUGH_CONTEXT;
        }

        let terms = self.vocabulary.terms_in(source);
        if terms.is_empty() {
            return NEUTRAL_CONTEXT;
        }

        let preserved = terms
            .iter()
            .filter(|t| self.vocabulary.is_preserved(t, translated))
            .count();
        let ratio = preserved as f32 / terms.len() as f32;

        let bonus = if self.vocabulary.starts_with_action_verb(source)
            && self.vocabulary.starts_with_action_verb(translated)
        {
            IMPERATIVE_BONUS
        } else {
            0.0
        };

        (ratio + bonus).clamp(0.0, 1.0)
    }

    pub fn technical_quality(&self, source: &str, translated: &str) -> f32 {
        let encoding = if encodes_cleanly(translated) { 1.0 } else { 0.5 };

        let mut formatting = FORMATTING_BASE;
        if starts_uppercase(source) && starts_uppercase(translated) {
            formatting += PARITY_BONUS;
        }
        if ends_sentence(source) && ends_sentence(translated) {
            formatting += PARITY_BONUS;
        }

        let penalty = if self.vocabulary.contains_error_pattern(translated) {
            ERROR_PENALTY
        } else {
            0.0
        };

        (encoding * formatting - penalty).clamp(0.0, 1.0)
    }
}

fn is_passthrough(source: &str, translated: &str) -> bool {
    source.trim().to_lowercase() == translated.trim().to_lowercase()
}

pub fn linguistic_consistency(source: &str, translated: &str) -> f32 {
    if translated.trim().chars().count() < 2 {
        return 0.0;
    }
    if is_passthrough(source, translated) {
        return PASSTHROUGH_CONSISTENCY;
    }

    let brackets = translated
        .chars()
        .filter(|c| matches!(c, '[' | ']' | '{' | '}' | '(' | ')' | '<' | '>'))
        .count();
    let bracket_penalty = brackets as f32 * BRACKET_PENALTY;

    let words = tokenize(translated);
    let repetition_penalty = if words.is_empty() {
        0.0
    } else {
        let unique: HashSet<&String> = words.iter().collect();
        (words.len() - unique.len()) as f32 / words.len() as f32 * REPETITION_WEIGHT
    };

    let ratio = translated.chars().count() as f32 / source.chars().count().max(1) as f32;
    let raw = (CONSISTENCY_BASE - bracket_penalty - repetition_penalty).max(0.0);
    (raw * length_factor(ratio)).clamp(0.0, 1.0)
}

/// 1.0 inside [0.5, 2.0], linear decay outside, never below 0.3
fn length_factor(ratio: f32) -> f32 {
    let factor = if ratio < 0.5 {
        ratio / 0.5
    } else if ratio > 2.0 {
        1.0 - (ratio - 2.0) / 2.0
    } else {
        1.0
    };
    factor.max(LENGTH_FACTOR_FLOOR)
}

pub fn speed(elapsed_seconds: f64) -> f32 {
    if !elapsed_seconds.is_finite() || elapsed_seconds >= SLOW_SECONDS {
        0.1
    } else if elapsed_seconds < FAST_SECONDS {
        1.0
    } else {
        (1.0 - (elapsed_seconds - FAST_SECONDS) / (SLOW_SECONDS - FAST_SECONDS) * 0.7) as f32
    }
}

/// Replacement characters and stray control bytes mean the provider mangled
/// the encoding somewhere
fn encodes_cleanly(text: &str) -> bool {
    !text
        .chars()
        .any(|c| c == '\u{FFFD}' || (c.is_control() && c != '\n' && c != '\t'))
}

fn starts_uppercase(text: &str) -> bool {
    text.trim_start()
        .chars()
        .next()
        .is_some_and(|c| c.is_uppercase())
}

fn ends_sentence(text: &str) -> bool {
    text.trim_end().ends_with(['.', '!', '?'])
}
