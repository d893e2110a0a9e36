use super::align::dummy_name;
use crate::models::{Gender, Geography, RawRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use strum::{Display, EnumString, IntoEnumIterator};

/// Identifier of a feature-engineering pipeline, persisted with the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum PipelineVersion {
    #[strum(serialize = "feature_engineer_v1")]
    #[serde(rename = "feature_engineer_v1")]
    V1,
    #[strum(serialize = "feature_engineer_v2")]
    #[serde(rename = "feature_engineer_v2")]
    V2,
}

impl Default for PipelineVersion {
    fn default() -> Self {
        PipelineVersion::V2
    }
}

impl PipelineVersion {
    /// Run the pipeline over a batch of raw records
    pub fn run(&self, records: &[RawRecord]) -> ProcessedFrame {
        match self {
            PipelineVersion::V1 => FeatureEngineer::run_v1(records),
            PipelineVersion::V2 => FeatureEngineer::run_v2(records),
        }
    }

    /// Every encoded column name this pipeline can emit: its numeric columns
    /// plus one indicator per category of each categorical column
    pub fn output_columns(&self) -> BTreeSet<String> {
        let frame = self.run(&[RawRecord::default()]);
        frame
            .columns()
            .iter()
            .flat_map(|(name, column)| match column {
                FrameColumn::Numeric(_) => vec![name.clone()],
                FrameColumn::Categorical(_) => categories(name)
                    .iter()
                    .map(|category| dummy_name(name, category))
                    .collect(),
            })
            .collect()
    }
}

/// Category domain of a categorical pipeline column
fn categories(column: &str) -> Vec<String> {
    match column {
        "Geography" => Geography::iter().map(|g| g.to_string()).collect(),
        "Age_bin" => AGE_BINS.iter().map(|(_, label)| label.to_string()).collect(),
        _ => Vec::new(),
    }
}

/// A single column of a processed frame
#[derive(Debug, Clone, PartialEq)]
pub enum FrameColumn {
    Numeric(Vec<f64>),
    /// `None` marks a missing category (produces no one-hot column)
    Categorical(Vec<Option<String>>),
}

impl FrameColumn {
    pub fn len(&self) -> usize {
        match self {
            FrameColumn::Numeric(values) => values.len(),
            FrameColumn::Categorical(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_categorical(&self) -> bool {
        matches!(self, FrameColumn::Categorical(_))
    }
}

/// Columnar output of a feature-engineering pipeline, in pipeline column order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessedFrame {
    n_rows: usize,
    columns: Vec<(String, FrameColumn)>,
}

impl ProcessedFrame {
    pub fn new(n_rows: usize) -> Self {
        Self {
            n_rows,
            columns: Vec::new(),
        }
    }

    pub fn push_numeric(&mut self, name: &str, values: Vec<f64>) {
        debug_assert_eq!(values.len(), self.n_rows);
        self.columns
            .push((name.to_string(), FrameColumn::Numeric(values)));
    }

    pub fn push_categorical(&mut self, name: &str, values: Vec<Option<String>>) {
        debug_assert_eq!(values.len(), self.n_rows);
        self.columns
            .push((name.to_string(), FrameColumn::Categorical(values)));
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn columns(&self) -> &[(String, FrameColumn)] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&FrameColumn> {
        self.columns
            .iter()
            .find(|(col, _)| col == name)
            .map(|(_, values)| values)
    }
}

/// Age bucket boundaries (right-closed) and labels
const AGE_BINS: [(f64, &str); 5] = [
    (25.0, "very_young"),
    (35.0, "young"),
    (45.0, "mid"),
    (60.0, "mature"),
    (f64::INFINITY, "senior"),
];

/// Pure transforms from raw customer attributes to model-ready columns
pub struct FeatureEngineer;

impl FeatureEngineer {
    /// Categorical mapping, binning, interaction flags and log tenure
    pub fn run_v1(records: &[RawRecord]) -> ProcessedFrame {
        let mut frame = ProcessedFrame::new(records.len());

        let column = |f: &dyn Fn(&RawRecord) -> f64| -> Vec<f64> { records.iter().map(f).collect() };

        frame.push_numeric("CreditScore", column(&|r| r.credit_score));
        frame.push_categorical(
            "Geography",
            records
                .iter()
                .map(|r| Some(r.geography.to_string()))
                .collect(),
        );
        frame.push_numeric("Gender", column(&|r| r.gender.code() as f64));
        frame.push_numeric("Age", column(&|r| r.age));
        frame.push_numeric("Balance", column(&|r| r.balance));
        frame.push_numeric("NumOfProducts", column(&|r| as_int(r.num_of_products)));
        frame.push_numeric("HasCrCard", column(&|r| as_int(r.has_cr_card)));
        frame.push_numeric("IsActiveMember", column(&|r| as_int(r.is_active_member)));
        frame.push_numeric("EstimatedSalary", column(&|r| r.estimated_salary));
        frame.push_categorical(
            "Age_bin",
            records
                .iter()
                .map(|r| age_bin(r.age).map(str::to_string))
                .collect(),
        );
        frame.push_numeric(
            "Is_two_products",
            column(&|r| flag(r.num_of_products == 2.0)),
        );
        frame.push_numeric(
            "Germany_Female",
            column(&|r| flag(r.geography == Geography::Germany && r.gender == Gender::Female)),
        );
        frame.push_numeric(
            "Germany_Inactive",
            column(&|r| flag(r.geography == Geography::Germany && r.is_active_member == 0.0)),
        );
        frame.push_numeric("Has_Zero_Balance", column(&|r| flag(r.balance == 0.0)));
        frame.push_numeric("Tenure_log", column(&|r| r.tenure.ln_1p()));

        frame
    }

    /// V1 plus the zero-balance inactive mature-customer flag
    pub fn run_v2(records: &[RawRecord]) -> ProcessedFrame {
        let mut frame = Self::run_v1(records);
        frame.push_numeric(
            "is_mature_inactive_transit",
            records
                .iter()
                .map(|r| flag(r.balance == 0.0 && r.is_active_member == 0.0 && r.age > 40.0))
                .collect(),
        );
        frame
    }
}

/// Label of the right-closed age bucket, `None` outside `(0, inf)`
pub fn age_bin(age: f64) -> Option<&'static str> {
    if !(age > 0.0) {
        return None;
    }
    AGE_BINS
        .iter()
        .find(|(upper, _)| age <= *upper)
        .map(|(_, label)| *label)
}

fn flag(condition: bool) -> f64 {
    if condition {
        1.0
    } else {
        0.0
    }
}

/// Integer cast with missing/non-finite values mapped to 0
fn as_int(value: f64) -> f64 {
    if value.is_finite() {
        value.trunc()
    } else {
        0.0
    }
}
