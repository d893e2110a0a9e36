/// Gradient-boosted churn model: training, persistence, inference and
/// TreeSHAP explanations.
///
/// - [`tree`]: the tree ensemble and the [`Classifier`] seam
/// - [`trainer`], [`cart`], [`cv`], [`tuning`]: histogram GBDT training,
///   stratified cross-validation and random-search tuning
/// - [`shap`], [`explainer`]: exact path-dependent TreeSHAP, local top-K
///   and global importance
/// - [`artifact`]: the digest-verified artifact bundle
/// - [`xgboost`]: import of XGBoost JSON models
/// - [`service`]: request-time inference over a loaded bundle
/// - [`workflow`]: offline training, hold-out scoring and global importance

pub mod artifact;
pub mod cart;
pub mod cv;
pub mod explainer;
pub mod models;
pub mod service;
pub mod shap;
pub mod trainer;
pub mod tree;
pub mod tuning;
pub mod workflow;
pub mod xgboost;

pub use artifact::{ArtifactBundle, ArtifactManifest};
pub use cv::{cross_validate, roc_auc, stratified_k_fold, CvReport};
pub use explainer::{
    explain_local, explanation_prompt, FeatureAttribution, GlobalImportance, LocalExplanation,
};
pub use models::{ModelMetadata, ModelMetrics, ModelType, TrainingDataset};
pub use service::{BatchPrediction, ChurnService, ModelInfo, ScoredRow, SinglePrediction};
pub use shap::{Explainer, TreeExplainer};
pub use trainer::{GbdtParams, GbdtTrainer, TrainOutcome};
pub use tree::{Classifier, RegressionTree, TreeEnsemble, TreeNode};
pub use tuning::{RandomSearch, SearchSpace, TuningReport};
pub use workflow::{train_bundle, TrainingOptions, TrainingRun};
pub use xgboost::{import_xgboost_json, ImportedModel};
