//! End-to-end training run: cohort -> scalers -> GWO-tuned SVR -> softmax
//! stage classifier -> confidence calibration -> artifacts.
//!
//! The regression scaler is fitted on the training split only; the
//! classification scaler on the whole cohort. The two are exported side by
//! side and never interchanged at inference.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use rand::seq::{index, SliceRandom};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::adapters::fs_artifacts::{sha256_hex, MANIFEST_FILE, SIGNATURE_FILE};
use crate::adapters::{
    Kernel, MemoryArtifactSource, ModelManifest, SoftmaxModel, SoftmaxStageClassifier,
    SupportVectorRegressor, SvrModel, TargetTransform,
};
use crate::application::bundle::{
    RegressorArtifact, ScalerArtifact, CLASSIFIER_ARTIFACT, REGRESSOR_ARTIFACT, SCALERS_ARTIFACT,
    THRESHOLDS_ARTIFACT,
};
use crate::application::preprocess::{FeatureTransform, ScalerColumn, StandardScaler};
use crate::application::regressor::ConfidenceSettings;
use crate::application::ModelBundle;
use crate::domain::{OptionalField, StageThresholds, FEATURE_NAMES, N_FEATURES};
use crate::ports::{RegressionModel, StageModel};

use super::cohort::{generate_cohort, CohortRecord};
use super::gwo::GreyWolfOptimizer;
use super::softmax_fit::{argmax, fit_softmax, SoftmaxOptions};
use super::svr_fit::{fit_svr, FitOptions, SvrParams};
use super::TrainingError;

/// Per-column transform, in [`FEATURE_NAMES`] order.
const TRANSFORMS: [FeatureTransform; N_FEATURES] = [
    FeatureTransform::Identity,
    FeatureTransform::Identity,
    FeatureTransform::Ln,
    FeatureTransform::Ln,
    FeatureTransform::Identity,
    FeatureTransform::Identity,
];

const C_BOUNDS: (f64, f64) = (0.1, 100.0);
const EPSILON_BOUNDS: (f64, f64) = (0.01, 1.0);
const GAMMA_BOUNDS: (f64, f64) = (0.001, 1.0);

/// Confidence lost per imputed field is kept within these bounds.
const PENALTY_RANGE: (f64, f64) = (0.01, 0.5);
const OUT_OF_RANGE_FACTOR: f64 = 0.5;

/// SVR kernel family searched by the optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KernelChoice {
    /// Searches `(C, ε)`
    #[default]
    Linear,
    /// Searches `(C, ε, γ)`
    Rbf,
}

impl std::str::FromStr for KernelChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "rbf" => Ok(Self::Rbf),
            other => Err(format!("unknown kernel {other:?} (expected linear or rbf)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingConfig {
    pub samples: usize,
    pub seed: u64,
    /// Share of the cohort held out for validation
    pub validation_fraction: f64,
    pub n_wolves: usize,
    pub max_iter: usize,
    pub kernel: KernelChoice,
    /// Reference rows exported for attribution
    pub background_size: usize,
    /// Training rows used for each candidate fit during the search
    pub search_rows: usize,
    /// Training rows used for the final fit (the dual is O(n²) in memory)
    pub max_fit_rows: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            samples: 5000,
            seed: 42,
            validation_fraction: 0.2,
            n_wolves: 12,
            max_iter: 30,
            kernel: KernelChoice::default(),
            background_size: 16,
            search_rows: 600,
            max_fit_rows: 1500,
        }
    }
}

impl TrainingConfig {
    fn check(&self) -> Result<(), TrainingError> {
        if !(self.validation_fraction > 0.0 && self.validation_fraction < 1.0) {
            return Err(TrainingError::InvalidConfig(format!(
                "validation_fraction {} not in (0, 1)",
                self.validation_fraction
            )));
        }
        if self.background_size == 0 || self.search_rows == 0 || self.max_fit_rows == 0 {
            return Err(TrainingError::InvalidConfig(
                "background_size, search_rows and max_fit_rows must be positive".into(),
            ));
        }
        if self.samples < 50 {
            return Err(TrainingError::InvalidConfig(format!(
                "need at least 50 samples, got {}",
                self.samples
            )));
        }
        Ok(())
    }
}

/// Metrics of a training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub kernel: Kernel,
    pub c: f64,
    pub epsilon: f64,
    /// eGFR RMSE on the validation split (mL/min/1.73m²)
    pub validation_rmse: f64,
    /// Threshold-derived stage accuracy of the regressor on validation
    pub stage_accuracy: f64,
    pub classifier_accuracy: f64,
    pub support_vectors: usize,
    pub convergence: Vec<f64>,
}

/// Everything a model directory holds, in memory.
#[derive(Debug, Clone)]
pub struct TrainedArtifacts {
    pub scalers: ScalerArtifact,
    pub regressor: RegressorArtifact,
    pub classifier: SoftmaxModel,
    pub thresholds: StageThresholds,
    pub report: TrainingReport,
}

impl TrainedArtifacts {
    /// Pretty JSON of every artifact, keyed by file name.
    ///
    /// # Errors
    /// `Serialize` if any artifact fails to serialize.
    pub fn to_json(&self) -> Result<BTreeMap<&'static str, Vec<u8>>, TrainingError> {
        let mut out = BTreeMap::new();
        out.insert(SCALERS_ARTIFACT, serde_json::to_vec_pretty(&self.scalers)?);
        out.insert(REGRESSOR_ARTIFACT, serde_json::to_vec_pretty(&self.regressor)?);
        out.insert(CLASSIFIER_ARTIFACT, serde_json::to_vec_pretty(&self.classifier)?);
        out.insert(THRESHOLDS_ARTIFACT, serde_json::to_vec_pretty(&self.thresholds)?);
        Ok(out)
    }

    /// Load the artifacts through the same path inference uses.
    ///
    /// # Errors
    /// `Validation` if the bundle loader rejects them.
    pub fn validate(&self) -> Result<ModelBundle, TrainingError> {
        let mut source = MemoryArtifactSource::new("trained");
        for (name, bytes) in self.to_json()? {
            source.insert(name, bytes);
        }
        Ok(ModelBundle::load(&source)?)
    }
}

fn fit_scaler(rows: &[[f64; N_FEATURES]]) -> StandardScaler {
    let n = rows.len() as f64;
    let columns = FEATURE_NAMES
        .iter()
        .zip(TRANSFORMS)
        .enumerate()
        .map(|(j, (name, transform))| {
            let values: Vec<f64> = rows.iter().map(|r| transform.apply(r[j])).collect();
            let mean = values.iter().sum::<f64>() / n;
            let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
            let std = var.sqrt();
            ScalerColumn {
                name: (*name).to_string(),
                transform,
                mean,
                std: if std > 1e-12 { std } else { 1.0 },
            }
        })
        .collect();
    StandardScaler { columns }
}

fn scale(scaler: &StandardScaler, raw: &[f64; N_FEATURES]) -> Vec<f64> {
    scaler
        .columns
        .iter()
        .zip(raw)
        .map(|(col, v)| (col.transform.apply(*v) - col.mean) / col.std)
        .collect()
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn column_index(field: OptionalField) -> usize {
    FEATURE_NAMES
        .iter()
        .position(|n| *n == field.feature_name())
        .unwrap_or(0)
}

fn rmse(model: &dyn RegressionModel, x: &[Vec<f64>], egfr: &[f64]) -> f64 {
    let sq: f64 = x
        .iter()
        .zip(egfr)
        .map(|(row, target)| (model.predict(row) - target).powi(2))
        .sum();
    (sq / x.len() as f64).sqrt()
}

fn stage_accuracy(
    model: &dyn RegressionModel,
    thresholds: &StageThresholds,
    x: &[Vec<f64>],
    records: &[&CohortRecord],
) -> f64 {
    let correct = x
        .iter()
        .zip(records)
        .filter(|(row, r)| thresholds.stage_for(model.predict(row)) == r.stage)
        .count();
    correct as f64 / x.len() as f64
}

fn kernel_for(choice: KernelChoice, position: &[f64]) -> Kernel {
    match choice {
        KernelChoice::Linear => Kernel::Linear,
        KernelChoice::Rbf => Kernel::Rbf {
            gamma: position.get(2).copied().unwrap_or(GAMMA_BOUNDS.1),
        },
    }
}

fn regressor(model: SvrModel) -> Result<SupportVectorRegressor, TrainingError> {
    SupportVectorRegressor::new(model, N_FEATURES).map_err(TrainingError::Fit)
}

/// Run the full training pipeline.
///
/// # Errors
/// `InvalidConfig` for unusable settings, `Fit` if a model cannot be fitted,
/// and `Validation` if the result is rejected by the bundle loader.
pub fn train(config: &TrainingConfig) -> Result<TrainedArtifacts, TrainingError> {
    config.check()?;
    let mut rng = ChaCha20Rng::seed_from_u64(config.seed);

    tracing::info!("Generating synthetic cohort ({} records)", config.samples);
    let cohort = generate_cohort(config.samples, &mut rng)?;

    let mut order: Vec<usize> = (0..cohort.len()).collect();
    order.shuffle(&mut rng);
    let n_val = ((cohort.len() as f64) * config.validation_fraction).round() as usize;
    let n_val = n_val.clamp(1, cohort.len() - 1);
    let (val_idx, train_idx) = order.split_at(n_val);
    let train: Vec<&CohortRecord> = train_idx.iter().map(|&i| &cohort[i]).collect();
    let val: Vec<&CohortRecord> = val_idx.iter().map(|&i| &cohort[i]).collect();

    let train_raw: Vec<[f64; N_FEATURES]> = train.iter().map(|r| r.raw_features()).collect();
    let val_raw: Vec<[f64; N_FEATURES]> = val.iter().map(|r| r.raw_features()).collect();
    let all_raw: Vec<[f64; N_FEATURES]> = cohort.iter().map(CohortRecord::raw_features).collect();

    let imputation: BTreeMap<String, f64> = OptionalField::ALL
        .iter()
        .map(|field| {
            let j = column_index(*field);
            let mut values: Vec<f64> = train_raw.iter().map(|r| r[j]).collect();
            (field.feature_name().to_string(), median(&mut values))
        })
        .collect();

    let reg_scaler = fit_scaler(&train_raw);
    let cls_scaler = fit_scaler(&all_raw);

    let transform = TargetTransform::Log;
    let x_train: Vec<Vec<f64>> = train_raw.iter().map(|r| scale(&reg_scaler, r)).collect();
    let y_train: Vec<f64> = train.iter().map(|r| transform.forward(r.egfr)).collect();
    let x_val: Vec<Vec<f64>> = val_raw.iter().map(|r| scale(&reg_scaler, r)).collect();
    let egfr_val: Vec<f64> = val.iter().map(|r| r.egfr).collect();

    // Hyperparameter search on a subset, scored on the full validation split.
    let n_search = config.search_rows.min(x_train.len());
    let (x_search, y_search) = (&x_train[..n_search], &y_train[..n_search]);
    let (mut lower, mut upper) = (vec![C_BOUNDS.0, EPSILON_BOUNDS.0], vec![C_BOUNDS.1, EPSILON_BOUNDS.1]);
    if config.kernel == KernelChoice::Rbf {
        lower.push(GAMMA_BOUNDS.0);
        upper.push(GAMMA_BOUNDS.1);
    }
    let gwo = GreyWolfOptimizer::new(lower, upper, config.n_wolves, config.max_iter)?;
    tracing::info!(
        "GWO search: {} wolves, {} iterations, {} rows per fit",
        config.n_wolves,
        config.max_iter,
        n_search
    );
    let outcome = gwo.minimize(
        |pos| {
            let params = SvrParams {
                kernel: kernel_for(config.kernel, pos),
                c: pos[0],
                epsilon: pos[1],
            };
            fit_svr(x_search, y_search, params, transform, FitOptions::default())
                .and_then(regressor)
                .map_or(f64::INFINITY, |m| rmse(&m, &x_val, &egfr_val))
        },
        &mut rng,
    );
    let best = SvrParams {
        kernel: kernel_for(config.kernel, &outcome.best_position),
        c: outcome.best_position[0],
        epsilon: outcome.best_position[1],
    };
    tracing::info!(
        "GWO best: C={:.4} epsilon={:.4} kernel={:?} search RMSE={:.3}",
        best.c,
        best.epsilon,
        best.kernel,
        outcome.best_score
    );

    let n_fit = config.max_fit_rows.min(x_train.len());
    let mut model = fit_svr(&x_train[..n_fit], &y_train[..n_fit], best, transform, FitOptions::default())?;
    let svr = regressor(model.clone())?;
    let validation_rmse = rmse(&svr, &x_val, &egfr_val);
    model.hyperparameters.tuned_by = Some("gwo".into());
    model.hyperparameters.validation_rmse = Some(validation_rmse);

    let thresholds = StageThresholds::default();
    let accuracy = stage_accuracy(&svr, &thresholds, &x_val, &val);

    // Penalty per field: relative accuracy lost when it is replaced by its median.
    let mut missing_penalty = BTreeMap::new();
    for field in OptionalField::ALL {
        let j = column_index(field);
        let fill = imputation.get(field.feature_name()).copied().unwrap_or_default();
        let x_imputed: Vec<Vec<f64>> = val_raw
            .iter()
            .map(|r| {
                let mut r = *r;
                r[j] = fill;
                scale(&reg_scaler, &r)
            })
            .collect();
        let acc = stage_accuracy(&svr, &thresholds, &x_imputed, &val);
        let drop = if accuracy > 0.0 { (accuracy - acc) / accuracy } else { 0.0 };
        let penalty = drop.clamp(PENALTY_RANGE.0, PENALTY_RANGE.1);
        tracing::debug!("Imputing {} costs {:.3} stage accuracy", field.feature_name(), accuracy - acc);
        missing_penalty.insert(field.feature_name().to_string(), penalty);
    }
    let confidence = ConfidenceSettings {
        base: accuracy.clamp(0.05, 1.0),
        missing_penalty,
        out_of_range_factor: OUT_OF_RANGE_FACTOR,
    };

    let labels: Vec<usize> = train.iter().map(|r| r.stage.index()).collect();
    let x_cls: Vec<Vec<f64>> = train_raw.iter().map(|r| scale(&cls_scaler, r)).collect();
    let mut classifier = fit_softmax(&x_cls, &labels, SoftmaxOptions::default())?;
    let classifier_accuracy = {
        let clf = SoftmaxStageClassifier::new(classifier.clone(), N_FEATURES)
            .map_err(TrainingError::Fit)?;
        let correct = val_raw
            .iter()
            .zip(&val)
            .filter(|(raw, r)| argmax(&clf.predict_proba(&scale(&cls_scaler, raw))) == r.stage.index())
            .count();
        correct as f64 / val.len() as f64
    };
    classifier.validation_accuracy = Some(classifier_accuracy);

    let k = config.background_size.min(x_train.len());
    let background: Vec<Vec<f64>> = index::sample(&mut rng, x_train.len(), k)
        .into_iter()
        .map(|i| x_train[i].clone())
        .collect();

    let report = TrainingReport {
        kernel: best.kernel,
        c: best.c,
        epsilon: best.epsilon,
        validation_rmse,
        stage_accuracy: accuracy,
        classifier_accuracy,
        support_vectors: model.support_vectors.len(),
        convergence: outcome.convergence,
    };
    tracing::info!(
        "Trained: RMSE={:.2} stage accuracy={:.3} classifier accuracy={:.3} support vectors={}",
        report.validation_rmse,
        report.stage_accuracy,
        report.classifier_accuracy,
        report.support_vectors
    );

    let artifacts = TrainedArtifacts {
        scalers: ScalerArtifact {
            feature_names: FEATURE_NAMES.iter().map(|n| (*n).to_string()).collect(),
            imputation,
            regression: reg_scaler,
            classification: cls_scaler,
        },
        regressor: RegressorArtifact {
            model,
            confidence,
            background,
        },
        classifier,
        thresholds,
        report,
    };
    artifacts.validate()?;
    Ok(artifacts)
}

fn write_error(path: &Path) -> impl FnOnce(std::io::Error) -> TrainingError {
    let path = path.to_path_buf();
    move |source| TrainingError::Export { path, source }
}

/// Write the artifacts and an unsigned manifest into `dir`.
///
/// A `model.sig` left from an earlier run no longer matches and is removed;
/// sign the directory with `sign_model` afterwards.
///
/// # Errors
/// `Export` on any filesystem failure.
pub fn export(artifacts: &TrainedArtifacts, dir: &Path) -> Result<ModelManifest, TrainingError> {
    fs::create_dir_all(dir).map_err(write_error(dir))?;

    let mut files = BTreeMap::new();
    for (name, bytes) in artifacts.to_json()? {
        let path = dir.join(name);
        fs::write(&path, &bytes).map_err(write_error(&path))?;
        files.insert(name.to_string(), sha256_hex(&bytes));
    }

    let manifest = ModelManifest {
        version: 1,
        serial: None,
        created_at: Some(chrono::Utc::now().timestamp()),
        files,
    };
    let path = dir.join(MANIFEST_FILE);
    fs::write(&path, serde_json::to_vec_pretty(&manifest)?).map_err(write_error(&path))?;

    let sig = dir.join(SIGNATURE_FILE);
    if sig.exists() {
        fs::remove_file(&sig).map_err(write_error(&sig))?;
    }
    tracing::info!("Exported {} artifacts to {}", manifest.files.len(), dir.display());
    Ok(manifest)
}
