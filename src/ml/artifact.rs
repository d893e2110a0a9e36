//! Persisted model bundle: model, feature schema and pipeline identifier,
//! tied together by a manifest of SHA-256 digests.
//!
//! Files are written to temporary names and renamed into place, manifest
//! last, so a reader never sees a manifest describing half-written parts.

use crate::error::{AppError, Result};
use crate::features::{sha256_hex, FeatureSchema, PipelineVersion};
use crate::ml::models::{ModelMetrics, ModelType};
use crate::ml::tree::TreeEnsemble;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const MODEL_FILE: &str = "model.json";
pub const FEATURES_FILE: &str = "feature_columns.json";
pub const PIPELINE_FILE: &str = "fe_pipeline.txt";
pub const MANIFEST_FILE: &str = "manifest.json";

const FORMAT_VERSION: u32 = 1;

/// Digests and provenance of an artifact bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub format_version: u32,
    pub model_sha256: String,
    pub feature_columns_sha256: String,
    pub fe_pipeline_sha256: String,
    /// Digest over the three part digests
    pub bundle_fingerprint: String,
    pub fe_pipeline: PipelineVersion,
    pub n_features: usize,
    pub n_trees: usize,
    pub model_type: ModelType,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub n_training_rows: usize,
    #[serde(default)]
    pub cv_metrics: Option<ModelMetrics>,
    #[serde(default)]
    pub hyperparameters: BTreeMap<String, f64>,
}

/// Serialized bundle parts, exactly as written to disk
struct BundleBytes {
    model: Vec<u8>,
    schema: Vec<u8>,
    pipeline: Vec<u8>,
}

impl BundleBytes {
    fn encode(model: &TreeEnsemble, schema: &FeatureSchema, pipeline: PipelineVersion) -> Result<Self> {
        Ok(Self {
            model: serde_json::to_vec(model)?,
            schema: schema.canonical_json()?,
            pipeline: pipeline.to_string().into_bytes(),
        })
    }
}

fn bundle_fingerprint(model_sha: &str, schema_sha: &str, pipeline_sha: &str) -> String {
    sha256_hex(format!("{}:{}:{}", model_sha, schema_sha, pipeline_sha).as_bytes())
}

/// Model, schema and pipeline that are known to belong together
#[derive(Debug, Clone)]
pub struct ArtifactBundle {
    pub model: TreeEnsemble,
    pub schema: FeatureSchema,
    pub pipeline: PipelineVersion,
    pub manifest: ArtifactManifest,
}

impl ArtifactBundle {
    pub fn new(model: TreeEnsemble, schema: FeatureSchema, pipeline: PipelineVersion) -> Result<Self> {
        check_pairing(&model, &schema, pipeline)?;
        model.validate()?;

        let bytes = BundleBytes::encode(&model, &schema, pipeline)?;
        let model_sha256 = sha256_hex(&bytes.model);
        let feature_columns_sha256 = sha256_hex(&bytes.schema);
        let fe_pipeline_sha256 = sha256_hex(&bytes.pipeline);

        let manifest = ArtifactManifest {
            format_version: FORMAT_VERSION,
            bundle_fingerprint: bundle_fingerprint(
                &model_sha256,
                &feature_columns_sha256,
                &fe_pipeline_sha256,
            ),
            model_sha256,
            feature_columns_sha256,
            fe_pipeline_sha256,
            fe_pipeline: pipeline,
            n_features: schema.len(),
            n_trees: model.trees.len(),
            model_type: model.metadata.model_type,
            created_at: chrono::Utc::now(),
            n_training_rows: model.metadata.n_training_samples,
            cv_metrics: model.metadata.validation_metrics.clone(),
            hyperparameters: model.metadata.hyperparameters.clone(),
        };

        Ok(Self {
            model,
            schema,
            pipeline,
            manifest,
        })
    }

    pub fn fingerprint(&self) -> &str {
        &self.manifest.bundle_fingerprint
    }

    /// Write the bundle into `dir`, creating it if needed
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let bytes = BundleBytes::encode(&self.model, &self.schema, self.pipeline)?;

        write_atomic(dir, MODEL_FILE, &bytes.model)?;
        write_atomic(dir, FEATURES_FILE, &bytes.schema)?;
        write_atomic(dir, PIPELINE_FILE, &bytes.pipeline)?;
        write_atomic(dir, MANIFEST_FILE, &serde_json::to_vec_pretty(&self.manifest)?)?;

        info!(
            dir = %dir.display(),
            fingerprint = %self.fingerprint(),
            n_trees = self.manifest.n_trees,
            n_features = self.manifest.n_features,
            "💾 Artifact bundle saved"
        );
        Ok(())
    }

    /// Load and verify a bundle. Missing or unreadable parts are
    /// `ModelUnavailable`; parts that do not match the manifest are
    /// `ArtifactMismatch`.
    pub fn load(dir: &Path) -> Result<Self> {
        let manifest_bytes = read_part(dir, MANIFEST_FILE)?;
        let manifest: ArtifactManifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| AppError::ModelUnavailable(format!("invalid manifest: {}", e)))?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(AppError::ModelUnavailable(format!(
                "unsupported artifact format version {}",
                manifest.format_version
            )));
        }

        let model_bytes = read_part(dir, MODEL_FILE)?;
        let schema_bytes = read_part(dir, FEATURES_FILE)?;
        let pipeline_bytes = read_part(dir, PIPELINE_FILE)?;

        verify_digest(MODEL_FILE, &model_bytes, &manifest.model_sha256)?;
        verify_digest(FEATURES_FILE, &schema_bytes, &manifest.feature_columns_sha256)?;
        verify_digest(PIPELINE_FILE, &pipeline_bytes, &manifest.fe_pipeline_sha256)?;

        let expected = bundle_fingerprint(
            &manifest.model_sha256,
            &manifest.feature_columns_sha256,
            &manifest.fe_pipeline_sha256,
        );
        if expected != manifest.bundle_fingerprint {
            return Err(AppError::ArtifactMismatch(
                "bundle fingerprint does not match part digests".to_string(),
            ));
        }

        let model: TreeEnsemble = serde_json::from_slice(&model_bytes)
            .map_err(|e| AppError::ModelUnavailable(format!("invalid model file: {}", e)))?;
        let schema: FeatureSchema = serde_json::from_slice(&schema_bytes)
            .map_err(|e| AppError::ModelUnavailable(format!("invalid feature columns: {}", e)))?;
        let pipeline_name = String::from_utf8_lossy(&pipeline_bytes);
        let pipeline: PipelineVersion = pipeline_name.trim().parse().map_err(|_| {
            AppError::ModelUnavailable(format!("unknown feature pipeline '{}'", pipeline_name.trim()))
        })?;

        if pipeline != manifest.fe_pipeline {
            return Err(AppError::ArtifactMismatch(format!(
                "pipeline file names {} but manifest names {}",
                pipeline, manifest.fe_pipeline
            )));
        }
        if schema.len() != manifest.n_features {
            return Err(AppError::ArtifactMismatch(format!(
                "manifest declares {} features, schema has {}",
                manifest.n_features,
                schema.len()
            )));
        }
        check_pairing(&model, &schema, pipeline)?;
        model.validate()?;

        debug!(dir = %dir.display(), fingerprint = %manifest.bundle_fingerprint, "Artifact bundle verified");

        Ok(Self {
            model,
            schema,
            pipeline,
            manifest,
        })
    }
}

/// The model must take exactly the schema's columns, and every schema
/// column must be one the pipeline can emit. A column outside the pipeline's
/// vocabulary would be zero-filled on every request.
fn check_pairing(model: &TreeEnsemble, schema: &FeatureSchema, pipeline: PipelineVersion) -> Result<()> {
    if model.n_features != schema.len() {
        return Err(AppError::ArtifactMismatch(format!(
            "model expects {} features but schema lists {}",
            model.n_features,
            schema.len()
        )));
    }

    let emitted = pipeline.output_columns();
    let foreign: Vec<&str> = schema
        .columns()
        .iter()
        .map(String::as_str)
        .filter(|column| !emitted.contains(*column))
        .collect();
    if !foreign.is_empty() {
        return Err(AppError::ArtifactMismatch(format!(
            "{} never produces feature columns: {}",
            pipeline,
            foreign.join(", ")
        )));
    }
    Ok(())
}

fn read_part(dir: &Path, name: &str) -> Result<Vec<u8>> {
    let path = dir.join(name);
    fs::read(&path).map_err(|e| {
        AppError::ModelUnavailable(format!("cannot read {}: {}", path.display(), e))
    })
}

fn verify_digest(name: &str, bytes: &[u8], expected: &str) -> Result<()> {
    let actual = sha256_hex(bytes);
    if actual != expected {
        return Err(AppError::ArtifactMismatch(format!(
            "{} digest {} does not match manifest {}",
            name, actual, expected
        )));
    }
    Ok(())
}

fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
    let tmp: PathBuf = dir.join(format!(".{}.tmp", name));
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, dir.join(name))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::tree::tests::sample_tree;

    fn bundle() -> ArtifactBundle {
        let model = TreeEnsemble::new(-1.2, 2, vec![sample_tree()]);
        let schema = FeatureSchema::new(vec!["Age".to_string(), "Balance".to_string()]).unwrap();
        ArtifactBundle::new(model, schema, PipelineVersion::V2).unwrap()
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let original = bundle();
        original.save(dir.path()).unwrap();

        let loaded = ArtifactBundle::load(dir.path()).unwrap();
        assert_eq!(loaded.model, original.model);
        assert_eq!(loaded.schema, original.schema);
        assert_eq!(loaded.pipeline, PipelineVersion::V2);
        assert_eq!(loaded.fingerprint(), original.fingerprint());
        assert_eq!(
            loaded.manifest.feature_columns_sha256,
            loaded.schema.fingerprint().unwrap()
        );
        assert!(!dir.path().join(".model.json.tmp").exists());
    }

    #[test]
    fn test_missing_bundle_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = ArtifactBundle::load(dir.path()).unwrap_err();
        assert_eq!(err.error_code(), "MODEL_UNAVAILABLE");
    }

    #[test]
    fn test_tampered_parts_are_detected() {
        for (file, contents) in [
            (FEATURES_FILE, r#"["Balance","Age"]"#),
            (PIPELINE_FILE, "feature_engineer_v1"),
        ] {
            let dir = tempfile::tempdir().unwrap();
            bundle().save(dir.path()).unwrap();
            fs::write(dir.path().join(file), contents).unwrap();

            let err = ArtifactBundle::load(dir.path()).unwrap_err();
            assert_eq!(err.error_code(), "ARTIFACT_MISMATCH", "tampering {}", file);
        }
    }

    #[test]
    fn test_tampered_model_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        bundle().save(dir.path()).unwrap();

        let mut other = TreeEnsemble::new(0.0, 2, vec![sample_tree()]);
        other.metadata = bundle().model.metadata;
        fs::write(dir.path().join(MODEL_FILE), serde_json::to_vec(&other).unwrap()).unwrap();

        let err = ArtifactBundle::load(dir.path()).unwrap_err();
        assert_eq!(err.error_code(), "ARTIFACT_MISMATCH");
    }

    #[test]
    fn test_schema_outside_pipeline_vocabulary_is_rejected() {
        let schema = || {
            FeatureSchema::new(vec![
                "is_mature_inactive_transit".to_string(),
                "Gender".to_string(),
            ])
            .unwrap()
        };

        let model = TreeEnsemble::new(0.0, 2, vec![sample_tree()]);
        let err = ArtifactBundle::new(model, schema(), PipelineVersion::V1).unwrap_err();
        assert_eq!(err.error_code(), "ARTIFACT_MISMATCH");
        assert!(err.to_string().contains("is_mature_inactive_transit"));
        assert!(!err.to_string().contains("Gender"));

        let model = TreeEnsemble::new(0.0, 2, vec![sample_tree()]);
        assert!(ArtifactBundle::new(model, schema(), PipelineVersion::V2).is_ok());

        let model = TreeEnsemble::new(0.0, 2, vec![sample_tree()]);
        let misspelt = FeatureSchema::new(vec!["Age".to_string(), "Gender_Female".to_string()]).unwrap();
        assert!(ArtifactBundle::new(model, misspelt, PipelineVersion::V2).is_err());
    }

    #[test]
    fn test_pairing_checked_on_creation() {
        let model = TreeEnsemble::new(0.0, 2, vec![sample_tree()]);
        let schema = FeatureSchema::new(vec!["Age".to_string()]).unwrap();
        let err = ArtifactBundle::new(model, schema, PipelineVersion::V1).unwrap_err();
        assert_eq!(err.error_code(), "ARTIFACT_MISMATCH");
    }
}
