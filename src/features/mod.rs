//! Raw customer records to model-ready matrices.
//!
//! `engineer` derives features from raw attributes; `align` one-hot encodes
//! the result and reconciles it against the frozen training schema.

pub mod align;
pub mod engineer;

pub use align::{align, dummy_name, sha256_hex, AlignedMatrix, FeatureSchema};
pub use engineer::{age_bin, FeatureEngineer, FrameColumn, PipelineVersion, ProcessedFrame};
