//! Identity verification
//!
//! Periodic presence, liveness, and recognition checks against an enrolled
//! reference centroid.

pub mod embedding;
pub mod machine;

pub use embedding::{centroid, cosine_similarity};
pub use machine::{IdentityObservation, IdentityState, IdentityVerifier};
