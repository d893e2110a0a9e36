//! Business analytics over scored batches.

pub mod roi;

pub use roi::{CustomerValue, RoiCalculator, RoiInput, RoiSummary};
