use anyhow::{bail, Context};
use churn_bank_service::{
    charts,
    features::{FeatureSchema, PipelineVersion},
    ingest::{BatchReader, CsvTable},
    ml::{
        artifact::ArtifactBundle,
        import_xgboost_json,
        workflow::{self, TrainingOptions},
        GbdtParams, GlobalImportance,
    },
};
use clap::{Parser, Subcommand};
use reqwest::Client;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "churn-cli")]
#[command(about = "Bank churn model training and service client", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:5000", env = "CHURN_ENDPOINT")]
    endpoint: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model with cross-validation and write the artifact bundle
    Train {
        /// Labelled training CSV
        #[arg(short, long)]
        data: PathBuf,

        /// Unlabelled hold-out CSV to score into a submission file
        #[arg(short, long)]
        test: Option<PathBuf>,

        #[arg(short, long, default_value = "artifacts/churn_bank")]
        output: PathBuf,

        #[arg(long, default_value = "Exited")]
        label: String,

        #[arg(short, long, default_value = "5")]
        folds: usize,

        /// Random-search trials before the final fit (0 = use the parameters as given)
        #[arg(long, default_value = "0")]
        tune_trials: usize,

        /// JSON file overriding the default hyperparameters
        #[arg(long)]
        params: Option<PathBuf>,

        #[arg(long, default_value = "feature_engineer_v2")]
        pipeline: PipelineVersion,

        #[arg(long, default_value = "submission.csv")]
        submission: PathBuf,

        /// Rows sampled for the global SHAP chart (0 = skip)
        #[arg(long, default_value = "2000")]
        global_sample: usize,
    },

    /// Compute global SHAP importance and chart for a saved bundle
    GlobalShap {
        #[arg(short, long, default_value = "artifacts/churn_bank")]
        artifacts: PathBuf,

        /// CSV with the raw feature columns
        #[arg(short, long)]
        data: PathBuf,

        #[arg(long, default_value = "Exited")]
        label: String,

        #[arg(short, long, default_value = "2000")]
        sample: usize,

        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Convert an XGBoost JSON model into an artifact bundle
    ImportXgboost {
        /// Output of `Booster.save_model("model.json")`
        #[arg(short, long)]
        model: PathBuf,

        /// JSON array of feature columns, when the model carries none
        #[arg(short, long)]
        features: Option<PathBuf>,

        #[arg(long, default_value = "feature_engineer_v2")]
        pipeline: PipelineVersion,

        #[arg(short, long, default_value = "artifacts/churn_bank")]
        output: PathBuf,
    },

    /// Verify a bundle and print its manifest
    Inspect {
        #[arg(short, long, default_value = "artifacts/churn_bank")]
        artifacts: PathBuf,
    },

    /// Check server health
    Health,

    /// Score one customer; fields use the CSV column names
    Predict {
        /// JSON object, e.g. '{"Age": 52, "Geography": 2, "IsActiveMember": 0}'
        #[arg(value_name = "JSON", default_value = "{}")]
        json: String,
    },

    /// Upload a CSV for batch scoring
    PredictBatch {
        #[arg(value_name = "CSV_FILE")]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "churn_bank_service=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let client = Client::new();

    match cli.command {
        Commands::Train {
            data,
            test,
            output,
            label,
            folds,
            tune_trials,
            params,
            pipeline,
            submission,
            global_sample,
        } => {
            let params = match params {
                Some(path) => {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    serde_json::from_str::<GbdtParams>(&text)
                        .with_context(|| format!("parsing {}", path.display()))?
                }
                None => GbdtParams::default(),
            };
            let bytes =
                std::fs::read(&data).with_context(|| format!("reading {}", data.display()))?;
            let batch = BatchReader::labelled(&label)
                .read(&bytes)
                .context("decoding training data")?;
            let records = batch.records.clone();

            let options = TrainingOptions {
                params,
                folds,
                tune_trials,
                pipeline,
            };
            let run = tokio::task::spawn_blocking(move || workflow::train_bundle(batch, &options))
                .await??;

            run.bundle
                .save(&output)
                .with_context(|| format!("writing bundle to {}", output.display()))?;

            println!("Cross-validation ROC AUC: {:.5} ± {:.5}", run.cv.metrics.auc_mean, run.cv.metrics.auc_std);
            for (fold, auc) in run.cv.metrics.fold_auc.iter().enumerate() {
                println!("  fold {}: {:.5}", fold + 1, auc);
            }
            if let Some(tuning) = &run.tuning {
                println!(
                    "Best tuning trial #{} (AUC {:.5})",
                    tuning.best.number, tuning.best.auc_mean
                );
                std::fs::write(
                    output.join("tuning_report.json"),
                    serde_json::to_vec_pretty(tuning)?,
                )?;
            }
            println!("Final model: {} trees", run.params.n_estimators);
            println!("Bundle fingerprint: {}", run.bundle.fingerprint());

            if let Some(test) = test {
                let bytes =
                    std::fs::read(&test).with_context(|| format!("reading {}", test.display()))?;
                let holdout = BatchReader::unlabelled()
                    .read(&bytes)
                    .context("decoding test data")?;
                let probabilities = workflow::score_holdout(
                    &run.cv,
                    &run.bundle.schema,
                    run.bundle.pipeline,
                    &holdout.records,
                )?;
                let ids: Vec<i64> = holdout.records.iter().map(|r| r.id).collect();
                workflow::write_submission(&submission, &ids, &probabilities)?;
                println!("Submission written to {}", submission.display());
            }

            if global_sample > 0 {
                let importance =
                    workflow::global_importance(&run.bundle, &records, global_sample, run.params.seed)?;
                write_global_outputs(&importance, &output)?;
            }
        }

        Commands::GlobalShap {
            artifacts,
            data,
            label,
            sample,
            seed,
        } => {
            let bundle = ArtifactBundle::load(&artifacts)
                .with_context(|| format!("loading bundle from {}", artifacts.display()))?;
            let bytes =
                std::fs::read(&data).with_context(|| format!("reading {}", data.display()))?;
            let table = CsvTable::parse(&bytes)?;
            let reader = if table.headers.iter().any(|h| h == &label) {
                BatchReader::labelled(&label)
            } else {
                BatchReader::unlabelled()
            };
            let batch = reader.decode(&table).context("decoding data")?;

            let importance = workflow::global_importance(&bundle, &batch.records, sample, seed)?;
            write_global_outputs(&importance, &artifacts)?;
        }

        Commands::ImportXgboost {
            model,
            features,
            pipeline,
            output,
        } => {
            let bytes =
                std::fs::read(&model).with_context(|| format!("reading {}", model.display()))?;
            let imported = import_xgboost_json(&bytes)?;

            let columns = match (features, imported.feature_names) {
                (Some(path), _) => {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    serde_json::from_str::<Vec<String>>(&text)
                        .with_context(|| format!("parsing {}", path.display()))?
                }
                (None, Some(names)) => names,
                (None, None) => bail!("the model has no feature names, pass --features"),
            };
            let schema = FeatureSchema::new(columns)?;
            let bundle = ArtifactBundle::new(imported.model, schema, pipeline)?;
            bundle.save(&output)?;
            println!("Imported bundle {} into {}", bundle.fingerprint(), output.display());
        }

        Commands::Inspect { artifacts } => {
            let bundle = ArtifactBundle::load(&artifacts)
                .with_context(|| format!("loading bundle from {}", artifacts.display()))?;
            println!("{}", serde_json::to_string_pretty(&bundle.manifest)?);
            println!("Feature columns ({}):", bundle.schema.len());
            for column in bundle.schema.columns() {
                println!("  {}", column);
            }
        }

        Commands::Health => {
            let response = client
                .get(format!("{}/health", cli.endpoint))
                .send()
                .await?;

            let body: serde_json::Value = response.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }

        Commands::Predict { json } => {
            let payload: serde_json::Value =
                serde_json::from_str(&json).context("request must be a JSON object")?;
            let response = client
                .post(format!("{}/api/churn_bank/predict", cli.endpoint))
                .json(&payload)
                .send()
                .await?;

            let mut body: serde_json::Value = response.json().await?;
            // Base64 chart payloads are unreadable on a terminal
            if let Some(charts) = body.get_mut("charts").and_then(|c| c.as_array_mut()) {
                for chart in charts {
                    if let Some(data) = chart.get_mut("base64_data") {
                        let len = data.as_str().map_or(0, str::len);
                        *data = serde_json::Value::String(format!("<{} base64 chars>", len));
                    }
                }
            }
            println!("{}", serde_json::to_string_pretty(&body)?);
        }

        Commands::PredictBatch { file } => {
            let bytes =
                std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            let filename = file_name(&file);
            let part = reqwest::multipart::Part::bytes(bytes)
                .file_name(filename)
                .mime_str("text/csv")?;
            let form = reqwest::multipart::Form::new().part("file", part);

            let response = client
                .post(format!("{}/api/churn_bank/predict_batch", cli.endpoint))
                .multipart(form)
                .send()
                .await?;

            let body: serde_json::Value = response.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
    }

    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.csv".to_string())
}

fn write_global_outputs(importance: &GlobalImportance, dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;
    let json_path = dir.join("global_importance.json");
    std::fs::write(&json_path, serde_json::to_vec_pretty(importance)?)?;

    let chart_path = dir.join("shap_summary.svg");
    charts::write_global_chart(importance, &chart_path)?;

    println!("Global importance over {} rows:", importance.n_samples);
    for feature in importance.features.iter().take(10) {
        println!("  {:<32} {:.5}", feature.feature, feature.value);
    }
    println!("Wrote {} and {}", json_path.display(), chart_path.display());
    Ok(())
}
