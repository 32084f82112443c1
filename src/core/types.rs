// Records flowing between the OCR engine, the consolidation engine, the
// translator race and the downstream renderer.

use serde::{Deserialize, Serialize};

use crate::core::errors::DetectionError;
use crate::utils::geometry::{bbox_of, union_all, BBox, Point};

/// Detection as it arrives from the OCR engine, before validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub text: String,
    /// Four polygon vertices, `[x, y]` each
    pub bbox: [[i32; 2]; 4],
    pub confidence: f32,
    /// Preprocessing pass that produced the hit (e.g. "gray", "clahe")
    #[serde(default)]
    pub source_variant: String,
}

/// One validated OCR hit. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    text: String,
    points: [Point; 4],
    bbox: BBox,
    confidence: f32,
    source_variant: String,
}

impl Detection {
    pub fn new(
        text: impl Into<String>,
        points: [Point; 4],
        confidence: f32,
        source_variant: impl Into<String>,
    ) -> Result<Self, DetectionError> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(DetectionError::InvalidConfidence(confidence));
        }
        let bbox = bbox_of(&points)?;
        Ok(Self {
            text: text.into(),
            points,
            bbox,
            confidence,
            source_variant: source_variant.into(),
        })
    }

    /// Detection whose polygon is exactly the given box
    pub fn from_bbox(
        text: impl Into<String>,
        bbox: BBox,
        confidence: f32,
        source_variant: impl Into<String>,
    ) -> Result<Self, DetectionError> {
        Self::new(text, bbox.corners(), confidence, source_variant)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn bbox(&self) -> &BBox {
        &self.bbox
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn source_variant(&self) -> &str {
        &self.source_variant
    }
}

impl TryFrom<RawDetection> for Detection {
    type Error = DetectionError;

    fn try_from(raw: RawDetection) -> Result<Self, Self::Error> {
        let points = raw.bbox.map(Point::from);
        Detection::new(raw.text, points, raw.confidence, raw.source_variant)
    }
}

/// A consolidated region of text, the unit handed to translation.
///
/// Invariants: `bbox` is the exact union of the member boxes, `text` lists
/// members top-to-bottom then left-to-right, `member_count == members.len()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextGroup {
    text: String,
    bbox: BBox,
    confidence: f32,
    member_count: usize,
    is_grouped: bool,
    #[serde(skip)]
    members: Vec<Detection>,
}

impl TextGroup {
    /// Build a group from members already arranged in reading order and split
    /// into lines. Returns `None` for an empty member list.
    pub(crate) fn from_lines(lines: Vec<Vec<Detection>>) -> Option<Self> {
        let text = lines
            .iter()
            .map(|line| {
                line.iter()
                    .map(|d| d.text().trim())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join("\n");

        let members: Vec<Detection> = lines.into_iter().flatten().collect();
        let bbox = union_all(members.iter().map(|d| d.bbox()))?;
        let confidence = size_weighted_confidence(&members);
        let member_count = members.len();

        Some(Self {
            text,
            bbox,
            confidence,
            member_count,
            is_grouped: member_count > 1,
            members,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn bbox(&self) -> &BBox {
        &self.bbox
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn member_count(&self) -> usize {
        self.member_count
    }

    pub fn is_grouped(&self) -> bool {
        self.is_grouped
    }

    pub fn members(&self) -> &[Detection] {
        &self.members
    }
}

/// Mean member confidence weighted by box area. Falls back to the plain
/// mean when every member is degenerate (zero area).
fn size_weighted_confidence(members: &[Detection]) -> f32 {
    if members.is_empty() {
        return 0.0;
    }

    let total_area: f64 = members.iter().map(|d| d.bbox().area() as f64).sum();
    if total_area == 0.0 {
        let sum: f64 = members.iter().map(|d| d.confidence() as f64).sum();
        return (sum / members.len() as f64) as f32;
    }

    let weighted: f64 = members
        .iter()
        .map(|d| d.confidence() as f64 * d.bbox().area() as f64)
        .sum();
    (weighted / total_area) as f32
}

/// One provider's attempt at translating a group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationCandidate {
    pub provider_id: String,
    pub source_text: String,
    pub translated_text: String,
    pub elapsed_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl TranslationCandidate {
    pub fn succeeded(
        provider_id: impl Into<String>,
        source_text: impl Into<String>,
        translated_text: impl Into<String>,
        elapsed_seconds: f64,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            source_text: source_text.into(),
            translated_text: translated_text.into(),
            elapsed_seconds,
            error: None,
        }
    }

    pub fn failed(
        provider_id: impl Into<String>,
        source_text: impl Into<String>,
        elapsed_seconds: f64,
        error: impl ToString,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            source_text: source_text.into(),
            translated_text: String::new(),
            elapsed_seconds,
            error: Some(error.to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Per-metric view of a candidate's score, each value in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct MetricBreakdown {
    pub context: f32,
    pub consistency: f32,
    pub quality: f32,
    pub speed: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub candidate: TranslationCandidate,
    pub score: f32,
    pub metric_breakdown: MetricBreakdown,
}

/// How the winning translation of a group was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    /// Race winner scored at or above the minimum confidence
    Qualified,
    /// No candidate reached the minimum; the best one was taken anyway
    BestEffort,
    /// Served from the translation cache
    Cached,
    /// Every racer failed; the sequential fallback produced the text
    Fallback,
    /// Nothing produced a translation; the source text is shown
    Untranslated,
}

/// Final, per-group outcome handed to the renderer. Never mutated after
/// selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslationResult {
    pub text_group: TextGroup,
    pub winning_candidate: Option<ScoredCandidate>,
    pub attempted_providers: Vec<String>,
    pub fallback_used: bool,
    pub selection: Selection,
}

impl TranslationResult {
    /// Text to draw: the winner's translation, or the source text when no
    /// provider produced one
    pub fn display_text(&self) -> &str {
        self.winning_candidate
            .as_ref()
            .map(|w| w.candidate.translated_text.as_str())
            .unwrap_or_else(|| self.text_group.text())
    }
}

/// One screenshot worth of OCR output, as handed over by the OCR orchestrator
#[derive(Debug, Clone, Deserialize)]
pub struct FrameInput {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub source_lang: Option<String>,
    #[serde(default)]
    pub target_lang: Option<String>,
    pub detections: Vec<RawDetection>,
}

/// Per-frame counters reported alongside the overlay
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameStats {
    pub raw_detections: usize,
    pub dropped_invalid: usize,
    pub dropped_low_confidence: usize,
    pub deduplicated: usize,
    pub groups: usize,
    pub qualified: usize,
    pub best_effort: usize,
    pub cached: usize,
    pub all_failed: usize,
    pub fallback_used: usize,
    pub elapsed_ms: f64,
}

/// Everything the renderer needs to draw the translated overlay
#[derive(Debug, Clone, Serialize)]
pub struct FrameOverlay {
    pub width: u32,
    pub height: u32,
    pub results: Vec<TranslationResult>,
    pub stats: FrameStats,
}

impl FrameOverlay {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
