// Merge deduplicated detections into reading-order text groups
//
// Greedy single pass over detections sorted top-to-bottom, left-to-right.
// Several groups may be open at once so that side-by-side panels (dialogue
// box next to a stats column) interleaving in y still form separate groups.

use tracing::debug;

use crate::core::config::ConsolidationConfig;
use crate::core::types::{Detection, TextGroup};
use crate::services::consolidation::dedup::reading_order;
use crate::utils::geometry::{
    horizontal_gap, horizontal_overlap_fraction, union, vertical_gap, BBox,
};

#[derive(Debug, Clone)]
pub struct SpatialGrouper {
    config: ConsolidationConfig,
}

/// Per-frame grouping reach, before scaling by text height
#[derive(Debug, Clone, Copy)]
struct Reach {
    horizontal_cap: f32,
    vertical_cap: f32,
}

struct Line {
    reference: BBox,
    bbox: BBox,
}

struct OpenGroup {
    members: Vec<Detection>,
    lines: Vec<Line>,
    bbox: BBox,
}

enum Placement {
    SameLine(usize),
    NewLine(usize),
}

impl SpatialGrouper {
    pub fn new(config: ConsolidationConfig) -> Self {
        Self { config }
    }

    /// Partition `detections` into text groups.
    ///
    /// Every input detection ends up in exactly one group. Groups come back
    /// in reading order of their top-left corner.
    pub fn group(
        &self,
        mut detections: Vec<Detection>,
        frame_width: u32,
        frame_height: u32,
    ) -> Vec<TextGroup> {
        if detections.is_empty() {
            return Vec::new();
        }

        let reach = Reach {
            horizontal_cap: (self.config.group_horizontal_ratio * frame_width as f32)
                .max(self.config.horizontal_fallback_px as f32),
            vertical_cap: (self.config.group_vertical_ratio * frame_height as f32)
                .max(self.config.vertical_fallback_px as f32),
        };
        // Nothing can join a group whose bottom is further above than this
        let max_drop = (self.config.paragraph_factor * reach.vertical_cap).ceil() as i64;

        detections.sort_by(reading_order);
        let input_count = detections.len();

        let mut open: Vec<OpenGroup> = Vec::new();
        let mut finished: Vec<OpenGroup> = Vec::new();

        for det in detections {
            let top = det.bbox().min_y() as i64;
            let (still_open, closed): (Vec<_>, Vec<_>) = open
                .into_iter()
                .partition(|g| top - g.bbox.max_y() as i64 <= max_drop);
            finished.extend(closed);
            open = still_open;

            let placement = open
                .iter()
                .enumerate()
                .find_map(|(idx, g)| self.placement(idx, g, &det, reach));
            match placement {
                Some(Placement::SameLine(idx)) => {
                    let group = &mut open[idx];
                    if let Some(line) = group.lines.last_mut() {
                        line.bbox = union(&line.bbox, det.bbox());
                    }
                    group.bbox = union(&group.bbox, det.bbox());
                    group.members.push(det);
                }
                Some(Placement::NewLine(idx)) => {
                    let group = &mut open[idx];
                    group.lines.push(Line {
                        reference: *det.bbox(),
                        bbox: *det.bbox(),
                    });
                    group.bbox = union(&group.bbox, det.bbox());
                    group.members.push(det);
                }
                None => {
                    let bbox = *det.bbox();
                    open.push(OpenGroup {
                        members: vec![det],
                        lines: vec![Line {
                            reference: bbox,
                            bbox,
                        }],
                        bbox,
                    });
                }
            }
        }
        finished.extend(open);

        let mut groups: Vec<TextGroup> = finished
            .into_iter()
            .filter_map(|g| TextGroup::from_lines(self.arrange_lines(g.members, reach)))
            .collect();
        groups.sort_by(|a, b| {
            a.bbox()
                .min_y()
                .cmp(&b.bbox().min_y())
                .then_with(|| a.bbox().min_x().cmp(&b.bbox().min_x()))
        });

        debug!(
            "Grouped {} detections into {} text groups ({} multi-member)",
            input_count,
            groups.len(),
            groups.iter().filter(|g| g.is_grouped()).count()
        );
        groups
    }

    /// Where `det` fits in the open groups, first group wins
    fn placement(
        &self,
        idx: usize,
        group: &OpenGroup,
        det: &Detection,
        reach: Reach,
    ) -> Option<Placement> {
        if self.fits_line(group, det, reach) {
            Some(Placement::SameLine(idx))
        } else if self.fits_paragraph(group, det, reach) {
            Some(Placement::NewLine(idx))
        } else {
            None
        }
    }

    fn thresholds(&self, reference: &BBox, det: &Detection, reach: Reach) -> (f32, f32) {
        let text_height = reference.height().max(det.bbox().height()).max(1) as f32;
        let h = reach
            .horizontal_cap
            .min(self.config.horizontal_height_factor * text_height);
        let v = reach
            .vertical_cap
            .min(self.config.vertical_height_factor * text_height);
        (h, v)
    }

    fn fits_line(&self, group: &OpenGroup, det: &Detection, reach: Reach) -> bool {
        let Some(line) = group.lines.last() else {
            return false;
        };
        let (h_thresh, v_thresh) = self.thresholds(&line.reference, det, reach);
        let center_drift = (det.bbox().center_y() - line.reference.center_y()).abs();
        // a negative gap is horizontal overlap
        center_drift <= v_thresh && horizontal_gap(det.bbox(), &line.bbox) as f32 <= h_thresh
    }

    fn fits_paragraph(&self, group: &OpenGroup, det: &Detection, reach: Reach) -> bool {
        let Some(line) = group.lines.last() else {
            return false;
        };
        let (_, v_thresh) = self.thresholds(&line.reference, det, reach);
        vertical_gap(det.bbox(), &line.bbox) as f32 <= self.config.paragraph_factor * v_thresh
            && horizontal_overlap_fraction(det.bbox(), &line.bbox)
                >= self.config.paragraph_min_overlap
    }

    /// Re-band a finished group's members into lines by vertical center,
    /// each line sorted left to right
    fn arrange_lines(&self, mut members: Vec<Detection>, reach: Reach) -> Vec<Vec<Detection>> {
        members.sort_by(|a, b| {
            a.bbox()
                .center_y()
                .total_cmp(&b.bbox().center_y())
                .then_with(|| a.bbox().min_x().cmp(&b.bbox().min_x()))
        });

        let mut lines: Vec<(BBox, Vec<Detection>)> = Vec::new();
        for det in members {
            let same_band = lines.last().is_some_and(|(reference, _)| {
                let (_, v_thresh) = self.thresholds(reference, &det, reach);
                (det.bbox().center_y() - reference.center_y()).abs() <= v_thresh
            });
            if same_band {
                if let Some((_, line)) = lines.last_mut() {
                    line.push(det);
                }
            } else {
                lines.push((*det.bbox(), vec![det]));
            }
        }

        lines
            .into_iter()
            .map(|(_, mut line)| {
                line.sort_by_key(|d| d.bbox().min_x());
                line
            })
            .collect()
    }
}
