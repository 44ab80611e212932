//! Audio risk scoring
//!
//! Pipeline per VAD frame: ambient calibration → adaptive speech gate → raw
//! sub-scores → smoothing → composite → flag policy. The lip-sync sub-score
//! reads mouth motion published by the vision scorer.

pub mod features;
pub mod scorer;

pub use features::AudioSubScores;
pub use scorer::AudioScorer;
