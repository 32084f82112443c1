pub mod geometry;
pub mod metrics;

// Re-export commonly used items
pub use geometry::{BBox, Point};
pub use metrics::{AttemptOutcome, Metrics, MetricsSnapshot};
