use crate::error::{AppError, Result};
use crate::features::engineer::{FrameColumn, ProcessedFrame};
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Frozen, ordered list of model input columns fixed at training time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct FeatureSchema {
    columns: Vec<String>,
}

impl FeatureSchema {
    pub fn new(columns: Vec<String>) -> Result<Self> {
        if columns.is_empty() {
            return Err(AppError::Validation(
                "feature schema must not be empty".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            if !seen.insert(column.as_str()) {
                return Err(AppError::Validation(format!(
                    "duplicate column '{}' in feature schema",
                    column
                )));
            }
        }

        Ok(Self { columns })
    }

    /// Derive the schema from a training frame: numeric columns in frame
    /// order, then one dummy per observed category (sorted) per categorical
    /// column.
    pub fn derive(frame: &ProcessedFrame) -> Result<Self> {
        let mut numeric = Vec::new();
        let mut dummies = Vec::new();

        for (name, column) in frame.columns() {
            match column {
                FrameColumn::Numeric(_) => numeric.push(name.clone()),
                FrameColumn::Categorical(values) => {
                    let categories: BTreeSet<&str> =
                        values.iter().flatten().map(String::as_str).collect();
                    dummies.extend(categories.into_iter().map(|v| dummy_name(name, v)));
                }
            }
        }

        numeric.extend(dummies);
        Self::new(numeric)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Canonical JSON encoding (a plain array of names)
    pub fn canonical_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.columns)?)
    }

    /// Hex SHA-256 of the canonical JSON encoding
    pub fn fingerprint(&self) -> Result<String> {
        Ok(sha256_hex(&self.canonical_json()?))
    }
}

impl TryFrom<Vec<String>> for FeatureSchema {
    type Error = AppError;

    fn try_from(columns: Vec<String>) -> Result<Self> {
        Self::new(columns)
    }
}

impl From<FeatureSchema> for Vec<String> {
    fn from(schema: FeatureSchema) -> Self {
        schema.columns
    }
}

/// Processed frame one-hot encoded and reconciled to a [`FeatureSchema`]
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedMatrix {
    columns: Vec<String>,
    values: Array2<f64>,
}

impl AlignedMatrix {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn into_values(self) -> Array2<f64> {
        self.values
    }

    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn row(&self, index: usize) -> ArrayView1<'_, f64> {
        self.values.row(index)
    }
}

/// One-hot encode, zero-fill missing columns, drop unexpected ones and order
/// the result exactly as the schema.
///
/// The output matrix is allocated with one column per schema entry, so its
/// width always equals the schema length. Drift between the frame and the
/// schema surfaces as `SchemaDrift` when two encoded columns share a name or
/// a column has the wrong number of rows. A schema naming columns the
/// pipeline never emits is refused earlier, when the artifact bundle is
/// built or loaded.
pub fn align(frame: &ProcessedFrame, schema: &FeatureSchema) -> Result<AlignedMatrix> {
    let n_rows = frame.n_rows();
    let encoded = one_hot(frame)?;

    let mut values = Array2::<f64>::zeros((n_rows, schema.len()));
    let mut filled = Vec::new();

    for (j, name) in schema.columns().iter().enumerate() {
        match encoded.get(name.as_str()) {
            Some(column) => {
                if column.len() != n_rows {
                    return Err(AppError::SchemaDrift(format!(
                        "column '{}' has {} rows, expected {}",
                        name,
                        column.len(),
                        n_rows
                    )));
                }
                for (i, value) in column.iter().enumerate() {
                    values[[i, j]] = *value;
                }
            }
            None => filled.push(name.as_str()),
        }
    }

    let mut dropped: Vec<&str> = encoded
        .keys()
        .map(String::as_str)
        .filter(|name| schema.position(name).is_none())
        .collect();
    dropped.sort_unstable();

    if !filled.is_empty() || !dropped.is_empty() {
        tracing::debug!(
            zero_filled = ?filled,
            dropped = ?dropped,
            "Reconciled encoded frame against feature schema"
        );
    }

    Ok(AlignedMatrix {
        columns: schema.columns().to_vec(),
        values,
    })
}

/// Expand categorical columns into `<column>_<value>` indicator columns
fn one_hot(frame: &ProcessedFrame) -> Result<HashMap<String, Vec<f64>>> {
    let mut encoded: HashMap<String, Vec<f64>> = HashMap::new();

    for (name, column) in frame.columns() {
        match column {
            FrameColumn::Numeric(values) => {
                insert_unique(&mut encoded, name.clone(), values.clone())?
            }
            FrameColumn::Categorical(values) => {
                let categories: BTreeSet<&str> =
                    values.iter().flatten().map(String::as_str).collect();
                for category in categories {
                    let indicator = values
                        .iter()
                        .map(|v| if v.as_deref() == Some(category) { 1.0 } else { 0.0 })
                        .collect();
                    insert_unique(&mut encoded, dummy_name(name, category), indicator)?;
                }
            }
        }
    }

    Ok(encoded)
}

fn insert_unique(
    encoded: &mut HashMap<String, Vec<f64>>,
    name: String,
    values: Vec<f64>,
) -> Result<()> {
    if encoded.contains_key(&name) {
        return Err(AppError::SchemaDrift(format!(
            "encoded column '{}' produced twice",
            name
        )));
    }
    encoded.insert(name, values);
    Ok(())
}

/// Name of the indicator column for one category value
pub fn dummy_name(column: &str, value: &str) -> String {
    format!("{}_{}", column, value)
}

/// Lowercase hex SHA-256 digest
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
