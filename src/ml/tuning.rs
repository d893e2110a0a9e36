use crate::error::{AppError, Result};
use crate::ml::cv::cross_validate;
use crate::ml::models::TrainingDataset;
use crate::ml::trainer::GbdtParams;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Hyperparameter ranges explored by [`RandomSearch`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub n_estimators: (usize, usize),
    /// Sampled log-uniformly
    pub learning_rate: (f64, f64),
    pub max_depth: (usize, usize),
    /// Sampled log-uniformly
    pub reg_lambda: (f64, f64),
    /// Sampled log-uniformly
    pub reg_alpha: (f64, f64),
    pub subsample: (f64, f64),
    pub colsample_bytree: (f64, f64),
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self {
            n_estimators: (500, 3000),
            learning_rate: (0.01, 0.1),
            max_depth: (3, 10),
            reg_lambda: (1e-8, 10.0),
            reg_alpha: (1e-8, 10.0),
            subsample: (0.5, 1.0),
            colsample_bytree: (0.5, 1.0),
        }
    }
}

impl SearchSpace {
    /// Draw one candidate, keeping non-searched fields from `base`
    pub fn sample(&self, rng: &mut StdRng, base: &GbdtParams) -> GbdtParams {
        GbdtParams {
            n_estimators: rng.gen_range(self.n_estimators.0..=self.n_estimators.1),
            learning_rate: log_uniform(rng, self.learning_rate),
            max_depth: rng.gen_range(self.max_depth.0..=self.max_depth.1),
            reg_lambda: log_uniform(rng, self.reg_lambda),
            reg_alpha: log_uniform(rng, self.reg_alpha),
            subsample: rng.gen_range(self.subsample.0..=self.subsample.1),
            colsample_bytree: rng.gen_range(self.colsample_bytree.0..=self.colsample_bytree.1),
            ..base.clone()
        }
    }
}

fn log_uniform(rng: &mut StdRng, (low, high): (f64, f64)) -> f64 {
    rng.gen_range(low.ln()..=high.ln()).exp()
}

/// Outcome of one evaluated candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trial {
    pub number: usize,
    pub params: GbdtParams,
    pub auc_mean: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningReport {
    pub best: Trial,
    pub trials: Vec<Trial>,
}

/// Random search maximizing mean cross-validated ROC AUC
pub struct RandomSearch {
    pub space: SearchSpace,
    pub n_trials: usize,
    pub folds: usize,
    pub seed: u64,
}

impl RandomSearch {
    pub fn new(n_trials: usize, folds: usize, seed: u64) -> Self {
        Self {
            space: SearchSpace::default(),
            n_trials,
            folds,
            seed,
        }
    }

    pub fn with_space(mut self, space: SearchSpace) -> Self {
        self.space = space;
        self
    }

    pub fn run(&self, base: &GbdtParams, dataset: &TrainingDataset) -> Result<TuningReport> {
        if self.n_trials == 0 {
            return Err(AppError::Validation(
                "tuning needs at least one trial".to_string(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut trials: Vec<Trial> = Vec::with_capacity(self.n_trials);

        for number in 0..self.n_trials {
            let params = self.space.sample(&mut rng, base);
            let report = cross_validate(&params, dataset, self.folds)?;
            info!(
                trial = number,
                auc_mean = report.metrics.auc_mean,
                n_estimators = params.n_estimators,
                max_depth = params.max_depth,
                learning_rate = params.learning_rate,
                "Trial finished"
            );
            trials.push(Trial {
                number,
                params,
                auc_mean: report.metrics.auc_mean,
            });
        }

        let best = trials
            .iter()
            .fold(None::<&Trial>, |best, t| match best {
                Some(b) if b.auc_mean >= t.auc_mean => Some(b),
                _ => Some(t),
            })
            .cloned()
            .ok_or_else(|| AppError::Internal("no tuning trial completed".to_string()))?;

        info!(trial = best.number, auc_mean = best.auc_mean, "Best trial");
        Ok(TuningReport { best, trials })
    }
}
