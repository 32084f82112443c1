use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;

use crate::core::types::{FrameOverlay, FrameStats, Selection};
use crate::utils::geometry::BBox;

/// Consumer of finished overlays. Drawing onto the emulator frame happens
/// downstream; implementations only hand the overlay over.
pub trait OverlayRenderer: Send + Sync {
    fn render(&self, overlay: &FrameOverlay, out: &mut dyn Write) -> Result<()>;
}

/// Draw list entry: where to draw, what to draw, and how it was chosen
#[derive(Debug, Serialize)]
struct OverlayEntry<'a> {
    bbox: &'a BBox,
    source: &'a str,
    text: &'a str,
    selection: Selection,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    score: Option<f32>,
}

#[derive(Debug, Serialize)]
struct OverlayDocument<'a> {
    width: u32,
    height: u32,
    entries: Vec<OverlayEntry<'a>>,
    stats: &'a FrameStats,
}

/// Writes the overlay as one JSON document
#[derive(Debug, Clone, Default)]
pub struct JsonOverlayRenderer {
    pretty: bool,
}

impl JsonOverlayRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pretty(mut self) -> Self {
        self.pretty = true;
        self
    }
}

impl OverlayRenderer for JsonOverlayRenderer {
    fn render(&self, overlay: &FrameOverlay, out: &mut dyn Write) -> Result<()> {
        let entries = overlay
            .results
            .iter()
            .map(|r| OverlayEntry {
                bbox: r.text_group.bbox(),
                source: r.text_group.text(),
                text: r.display_text(),
                selection: r.selection,
                provider: r
                    .winning_candidate
                    .as_ref()
                    .map(|w| w.candidate.provider_id.as_str()),
                score: r.winning_candidate.as_ref().map(|w| w.score),
            })
            .collect();

        let document = OverlayDocument {
            width: overlay.width,
            height: overlay.height,
            entries,
            stats: &overlay.stats,
        };

        let written = if self.pretty {
            serde_json::to_writer_pretty(&mut *out, &document)
        } else {
            serde_json::to_writer(&mut *out, &document)
        };
        written.context("Failed to serialize overlay")?;
        writeln!(out).context("Failed to write overlay")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Detection, TextGroup, TranslationResult};

    fn overlay() -> FrameOverlay {
        let det = Detection::from_bbox(
            "GAME OVER",
            BBox::new(100, 80, 220, 100).unwrap(),
            0.9,
            "gray",
        )
        .unwrap();
        let group = TextGroup::from_lines(vec![vec![det]]).unwrap();
        FrameOverlay {
            width: 320,
            height: 240,
            results: vec![TranslationResult {
                text_group: group,
                winning_candidate: None,
                attempted_providers: vec!["deep_google".to_string()],
                fallback_used: true,
                selection: Selection::Untranslated,
            }],
            stats: FrameStats {
                groups: 1,
                all_failed: 1,
                fallback_used: 1,
                ..FrameStats::default()
            },
        }
    }

    #[test]
    fn test_json_draw_list() {
        let mut out = Vec::new();
        JsonOverlayRenderer::new().render(&overlay(), &mut out).unwrap();

        let doc: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(doc["width"], 320);
        let entry = &doc["entries"][0];
        assert_eq!(entry["bbox"], serde_json::json!([100, 80, 220, 100]));
        assert_eq!(entry["text"], "GAME OVER");
        assert_eq!(entry["selection"], "untranslated");
        assert!(entry.get("provider").is_none());
        assert_eq!(doc["stats"]["all_failed"], 1);
    }

    #[test]
    fn test_pretty_output_is_multiline() {
        let mut out = Vec::new();
        JsonOverlayRenderer::new()
            .pretty()
            .render(&overlay(), &mut out)
            .unwrap();
        assert!(String::from_utf8(out).unwrap().lines().count() > 5);
    }
}
