// Domain vocabulary used by the context and quality metrics
//
// The built-in table covers generic game UI in English and Portuguese. Titles
// with their own jargon ship a replacement JSON file via `vocabulary_path`.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::errors::{ConfigError, ConfigResult};

const BUILTIN_VOCABULARY: &str = include_str!("../../assets/vocabulary.json");

#[derive(Debug, Clone, Deserialize)]
struct VocabularyFile {
    terms: Vec<String>,
    #[serde(default)]
    synonyms: HashMap<String, Vec<String>>,
    #[serde(default)]
    action_verbs: Vec<String>,
    #[serde(default)]
    error_patterns: Vec<String>,
}

/// Term list, synonym map, imperative verbs and provider error tokens.
///
/// All entries are stored pre-tokenized and lowercased; matching is
/// whole-word and case-insensitive, and multi-word terms match as a
/// contiguous token sequence.
#[derive(Debug, Clone, Serialize)]
pub struct DomainVocabulary {
    terms: Vec<String>,
    synonyms: HashMap<String, Vec<String>>,
    action_verbs: HashSet<String>,
    error_patterns: Vec<String>,
    #[serde(skip)]
    term_tokens: Vec<Vec<String>>,
    #[serde(skip)]
    synonym_tokens: HashMap<String, Vec<Vec<String>>>,
    #[serde(skip)]
    error_tokens: Vec<Vec<String>>,
}

impl DomainVocabulary {
    /// Table compiled into the binary
    pub fn builtin() -> ConfigResult<Self> {
        Self::from_json(BUILTIN_VOCABULARY, "<builtin vocabulary>")
    }

    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: display.clone(),
            source,
        })?;
        Self::from_json(&raw, &display)
    }

    pub fn from_json(raw: &str, origin: &str) -> ConfigResult<Self> {
        let file: VocabularyFile =
            serde_json::from_str(raw).map_err(|source| ConfigError::ParseFailed {
                path: origin.to_string(),
                source,
            })?;
        let vocab = Self::from_parts(
            file.terms,
            file.synonyms,
            file.action_verbs,
            file.error_patterns,
        );
        if vocab.term_tokens.iter().any(|t| t.is_empty()) {
            return Err(ConfigError::InvalidConfig(format!(
                "{origin}: vocabulary terms must contain at least one word"
            )));
        }

        debug!(
            "Loaded vocabulary from {}: {} terms, {} synonym sets, {} action verbs",
            origin,
            vocab.terms.len(),
            vocab.synonyms.len(),
            vocab.action_verbs.len()
        );
        Ok(vocab)
    }

    pub fn from_parts(
        terms: Vec<String>,
        synonyms: HashMap<String, Vec<String>>,
        action_verbs: Vec<String>,
        error_patterns: Vec<String>,
    ) -> Self {
        let mut seen = HashSet::new();
        let terms: Vec<String> = terms
            .into_iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| seen.insert(t.clone()))
            .collect();

        let synonyms: HashMap<String, Vec<String>> = synonyms
            .into_iter()
            .map(|(k, v)| {
                (
                    k.trim().to_lowercase(),
                    v.into_iter().map(|s| s.trim().to_lowercase()).collect(),
                )
            })
            .collect();

        let term_tokens = terms.iter().map(|t| tokenize(t)).collect();
        let synonym_tokens = synonyms
            .iter()
            .map(|(k, v)| (k.clone(), v.iter().map(|s| tokenize(s)).collect()))
            .collect();

        let error_patterns: Vec<String> = error_patterns
            .into_iter()
            .map(|p| p.trim().to_lowercase())
            .collect();
        let error_tokens = error_patterns.iter().map(|p| tokenize(p)).collect();

        Self {
            terms,
            synonyms,
            action_verbs: action_verbs
                .into_iter()
                .map(|v| v.trim().to_lowercase())
                .collect(),
            error_patterns,
            term_tokens,
            synonym_tokens,
            error_tokens,
        }
    }

    /// Vocabulary terms that occur in `text`, in table order, each once
    pub fn terms_in(&self, text: &str) -> Vec<&str> {
        let words = tokenize(text);
        self.terms
            .iter()
            .zip(&self.term_tokens)
            .filter(|(_, phrase)| contains_phrase(&words, phrase))
            .map(|(term, _)| term.as_str())
            .collect()
    }

    /// Whether `term` survives in `translated`, literally or as a synonym
    pub fn is_preserved(&self, term: &str, translated: &str) -> bool {
        let words = tokenize(translated);
        if contains_phrase(&words, &tokenize(term)) {
            return true;
        }
        self.synonym_tokens
            .get(term)
            .map(|alts| alts.iter().any(|alt| contains_phrase(&words, alt)))
            .unwrap_or(false)
    }

    /// Whether the first word of `text` is an imperative UI verb
    pub fn starts_with_action_verb(&self, text: &str) -> bool {
        tokenize(text)
            .first()
            .map(|w| self.action_verbs.contains(w))
            .unwrap_or(false)
    }

    /// Whether `text` looks like a provider diagnostic rather than a translation
    pub fn contains_error_pattern(&self, text: &str) -> bool {
        let words = tokenize(text);
        self.error_tokens
            .iter()
            .any(|pattern| contains_phrase(&words, pattern))
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }
}

/// Lowercased alphanumeric runs of `text`
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

fn contains_phrase(words: &[String], phrase: &[String]) -> bool {
    if phrase.is_empty() || phrase.len() > words.len() {
        return false;
    }
    words.windows(phrase.len()).any(|w| w == phrase)
}
