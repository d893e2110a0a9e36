//! Import of XGBoost JSON models (`Booster.save_model("model.json")`).
//!
//! Only `gbtree` boosters with a `binary:logistic` objective are accepted.
//! XGBoost stores leaf values in `split_conditions` for leaf nodes and
//! routes `x < split_condition` left, the same rule [`TreeEnsemble`] uses.

use crate::error::{AppError, Result};
use crate::ml::models::{ModelMetadata, ModelType};
use crate::ml::tree::{logit, RegressionTree, TreeEnsemble, TreeNode};
use serde::Deserialize;

#[derive(Deserialize)]
struct XgbDocument {
    learner: XgbLearner,
}

#[derive(Deserialize)]
struct XgbLearner {
    #[serde(default)]
    feature_names: Vec<String>,
    gradient_booster: XgbBooster,
    learner_model_param: XgbModelParam,
    objective: XgbObjective,
}

#[derive(Deserialize)]
struct XgbBooster {
    name: String,
    #[serde(default)]
    model: Option<XgbGbtree>,
}

#[derive(Deserialize)]
struct XgbGbtree {
    trees: Vec<XgbTree>,
}

#[derive(Deserialize)]
struct XgbTree {
    left_children: Vec<i64>,
    right_children: Vec<i64>,
    split_indices: Vec<i64>,
    split_conditions: Vec<f64>,
    default_left: Vec<Flag>,
    sum_hessian: Vec<f64>,
}

/// Older dumps store flags as 0/1, newer ones as booleans
#[derive(Deserialize, Clone, Copy)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Int(i64),
}

impl Flag {
    fn as_bool(self) -> bool {
        match self {
            Flag::Bool(b) => b,
            Flag::Int(i) => i != 0,
        }
    }
}

#[derive(Deserialize)]
struct XgbModelParam {
    base_score: String,
    num_feature: String,
}

#[derive(Deserialize)]
struct XgbObjective {
    name: String,
}

/// A converted model plus the feature names recorded by XGBoost, if any
#[derive(Debug, Clone)]
pub struct ImportedModel {
    pub model: TreeEnsemble,
    pub feature_names: Option<Vec<String>>,
}

pub fn import_xgboost_json(bytes: &[u8]) -> Result<ImportedModel> {
    let document: XgbDocument = serde_json::from_slice(bytes)
        .map_err(|e| AppError::Validation(format!("not an XGBoost JSON model: {}", e)))?;
    let learner = document.learner;

    if learner.objective.name != "binary:logistic" {
        return Err(AppError::Validation(format!(
            "unsupported objective '{}', expected binary:logistic",
            learner.objective.name
        )));
    }
    let booster = match (learner.gradient_booster.name.as_str(), learner.gradient_booster.model) {
        ("gbtree", Some(model)) => model,
        (name, _) => {
            return Err(AppError::Validation(format!(
                "unsupported booster '{}', expected gbtree",
                name
            )))
        }
    };

    let n_features: usize = learner
        .learner_model_param
        .num_feature
        .trim()
        .parse()
        .map_err(|_| AppError::Validation("invalid num_feature".to_string()))?;
    let base_score = parse_base_score(&learner.learner_model_param.base_score)?;

    let trees = booster
        .trees
        .iter()
        .enumerate()
        .map(|(i, tree)| {
            convert_tree(tree).map_err(|e| AppError::Validation(format!("tree {}: {}", i, e)))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut metadata = ModelMetadata::new("xgboost-import", ModelType::XgboostImport, n_features);
    metadata.hyperparameters.insert("base_score".to_string(), base_score);

    let model = TreeEnsemble::new(logit(base_score), n_features, trees).with_metadata(metadata);
    model.validate()?;

    let feature_names = if learner.feature_names.is_empty() {
        None
    } else {
        Some(learner.feature_names)
    };

    tracing::info!(
        n_trees = model.trees.len(),
        n_features,
        base_score,
        "Imported XGBoost model"
    );

    Ok(ImportedModel {
        model,
        feature_names,
    })
}

/// Accepts "0.5", "5E-1" and the bracketed "[5E-1]" form of XGBoost 2.x
fn parse_base_score(raw: &str) -> Result<f64> {
    let trimmed = raw.trim().trim_start_matches('[').trim_end_matches(']');
    let value: f64 = trimmed
        .parse()
        .map_err(|_| AppError::Validation(format!("invalid base_score '{}'", raw)))?;
    if !(value > 0.0 && value < 1.0) {
        return Err(AppError::Validation(format!(
            "base_score {} is not a probability",
            value
        )));
    }
    Ok(value)
}

fn convert_tree(tree: &XgbTree) -> std::result::Result<RegressionTree, String> {
    let n = tree.left_children.len();
    let lengths = [
        tree.right_children.len(),
        tree.split_indices.len(),
        tree.split_conditions.len(),
        tree.default_left.len(),
        tree.sum_hessian.len(),
    ];
    if n == 0 || lengths.iter().any(|&len| len != n) {
        return Err("node arrays have inconsistent lengths".to_string());
    }

    let to_index = |value: i64| -> std::result::Result<usize, String> {
        usize::try_from(value).map_err(|_| format!("invalid node reference {}", value))
    };

    let mut nodes = Vec::with_capacity(n);
    for i in 0..n {
        let cover = tree.sum_hessian[i];
        if tree.left_children[i] == -1 {
            nodes.push(TreeNode::leaf(tree.split_conditions[i], cover));
        } else {
            nodes.push(TreeNode::Split {
                feature: to_index(tree.split_indices[i])?,
                threshold: tree.split_conditions[i],
                left: to_index(tree.left_children[i])?,
                right: to_index(tree.right_children[i])?,
                default_left: tree.default_left[i].as_bool(),
                cover,
            });
        }
    }
    Ok(RegressionTree::new(nodes))
}
