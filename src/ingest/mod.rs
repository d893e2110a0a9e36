//! CSV ingestion for batch scoring and training data.

pub mod batch;

pub use batch::{
    BatchReader, BatchRejection, CsvTable, DecodedBatch, CRITICAL_COLUMNS, FEATURE_COLUMNS,
    MISSING_MARKERS,
};
