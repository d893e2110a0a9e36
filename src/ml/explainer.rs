use crate::error::Result;
use crate::ml::shap::{Explainer, TreeExplainer};
use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Signed contribution of one feature to the churn margin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureAttribution {
    pub feature: String,
    pub value: f64,
}

/// Top-K local attribution for one prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LocalExplanation {
    /// Attributions sorted by absolute magnitude, largest first
    pub attributions: Vec<FeatureAttribution>,
    /// Model output with no feature known
    pub expected_value: Option<f64>,
}

impl LocalExplanation {
    pub fn is_empty(&self) -> bool {
        self.attributions.is_empty()
    }

    /// Bulleted description of each attribution's direction and size
    pub fn describe(&self) -> String {
        if self.attributions.is_empty() {
            return "SHAP analysis is unavailable or failed for this prediction.".to_string();
        }

        let mut text = String::from("Main factors (local SHAP values):\n");
        for attribution in &self.attributions {
            let direction = if attribution.value > 0.0 {
                "pushes churn risk up (+)"
            } else {
                "pushes churn risk down (-)"
            };
            text.push_str(&format!(
                "- {}: {} (impact: {:.4})\n",
                attribution.feature,
                direction,
                attribution.value.abs()
            ));
        }
        text
    }
}

/// Prompt fragment a client can hand to a language model
pub fn explanation_prompt(probability: f64, explanation: &LocalExplanation) -> String {
    format!(
        "The model predicts a churn probability of {:.4}.\nKey feature information:\n{}",
        probability,
        explanation.describe()
    )
}

/// Order by |value| descending; ties keep column order
pub fn top_k(names: &[String], values: ArrayView1<'_, f64>, k: usize) -> Vec<FeatureAttribution> {
    let mut attributions: Vec<FeatureAttribution> = names
        .iter()
        .zip(values.iter())
        .map(|(feature, value)| FeatureAttribution {
            feature: feature.clone(),
            value: *value,
        })
        .collect();

    attributions.sort_by(|a, b| {
        b.value
            .abs()
            .partial_cmp(&a.value.abs())
            .unwrap_or(Ordering::Equal)
    });
    attributions.truncate(k);
    attributions
}

/// Local explanation for one aligned row. Failures degrade to an empty
/// explanation rather than failing the prediction.
pub fn explain_local(
    explainer: Option<&TreeExplainer>,
    names: &[String],
    row: ArrayView1<'_, f64>,
    k: usize,
) -> LocalExplanation {
    let Some(explainer) = explainer else {
        return LocalExplanation::default();
    };

    match explainer.shap_values(row) {
        Ok(values) if values.len() == names.len() => LocalExplanation {
            attributions: top_k(names, values.view(), k),
            expected_value: Some(explainer.expected_value()),
        },
        Ok(values) => {
            tracing::error!(
                n_values = values.len(),
                n_features = names.len(),
                "Attribution count does not match feature count"
            );
            crate::metrics::EXPLANATION_FAILURES_TOTAL.inc();
            LocalExplanation::default()
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to compute local SHAP values");
            crate::metrics::EXPLANATION_FAILURES_TOTAL.inc();
            LocalExplanation::default()
        }
    }
}

/// Mean absolute attribution per feature over a sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalImportance {
    pub n_samples: usize,
    pub expected_value: f64,
    /// Sorted by importance, largest first
    pub features: Vec<FeatureAttribution>,
}

impl GlobalImportance {
    pub fn compute(
        explainer: &TreeExplainer,
        names: &[String],
        sample: &Array2<f64>,
    ) -> Result<Self> {
        let shap = explainer.shap_matrix(sample)?;
        let mean_abs = shap
            .mapv(f64::abs)
            .mean_axis(Axis(0))
            .unwrap_or_else(|| ndarray::Array1::zeros(names.len()));

        Ok(Self {
            n_samples: sample.nrows(),
            expected_value: explainer.expected_value(),
            features: top_k(names, mean_abs.view(), names.len()),
        })
    }
}
