//! Vision risk scoring
//!
//! Pipeline per frame: face adapter sample → raw sub-scores → smoothing →
//! composite → flag policy. Mouth motion is forwarded to the audio scorer
//! through the fusion bridge.

pub mod features;
pub mod scorer;

pub use features::VisionSubScores;
pub use scorer::VisionScorer;
