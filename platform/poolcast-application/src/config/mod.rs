use poolcast_domain::entities::dataset::EntityCatalog;
use poolcast_domain::repositories::regression::{MixedEffectsOptions, Priors, RobustOptions};
use poolcast_domain::services::batching::{
    BatchPolicy, DEFAULT_BATCH_SIZE, DEFAULT_MIN_BATCH, DEFAULT_RECLAIM_EVERY,
};
use poolcast_domain::value_objects::entity::EntityMeta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const DEFAULT_HOLDOUT_FRACTION: f64 = 0.2;

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub run: RunConfig,
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub entities: BTreeMap<String, EntityMeta>,
    pub required: Option<RequiredConfig>,
    pub batch: Option<BatchConfig>,
    pub sampling: Option<SamplingConfig>,
    pub priors: Option<Priors>,
    pub robust: Option<RobustOptions>,
    pub mixed_effects: Option<MixedEffectsOptions>,
    pub standardization: Option<StandardizationConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub seed: u64,
    pub folds: usize,
    pub workers: Option<usize>,
    pub holdout_fraction: Option<f64>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct DatasetConfig {
    pub target: String,
    pub features: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct RequiredConfig {
    #[serde(default)]
    pub tradable: Vec<String>,
    #[serde(default)]
    pub benchmarks: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    pub batch_size: Option<usize>,
    pub min_batch: Option<usize>,
    pub reclaim_every: Option<usize>,
    pub pool_batches: Option<bool>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SamplingSection {
    pub chains: usize,
    pub iterations: usize,
    pub warmup: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct SamplingConfig {
    pub no_pooling: Option<SamplingSection>,
    pub pooled: Option<SamplingSection>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CvStandardization {
    #[default]
    FoldLocal,
    None,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FinalStandardization {
    /// Scaling learned over every row, test dates included.
    #[default]
    FullDataset,
    TrainOnly,
    None,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default)]
#[serde(deny_unknown_fields)]
pub struct StandardizationConfig {
    #[serde(default)]
    pub cross_validation: CvStandardization,
    #[serde(default)]
    pub final_model: FinalStandardization,
}

pub const DEFAULT_NO_POOLING_SAMPLING: SamplingSection = SamplingSection {
    chains: 2,
    iterations: 500,
    warmup: 250,
};

pub const DEFAULT_POOLED_SAMPLING: SamplingSection = SamplingSection {
    chains: 4,
    iterations: 1_000,
    warmup: 500,
};

impl Config {
    /// Config with every optional section at its default.
    pub fn for_dataset(
        target: &str,
        features: Vec<String>,
        entities: BTreeMap<String, EntityMeta>,
        seed: u64,
        folds: usize,
    ) -> Self {
        Self {
            run: RunConfig {
                seed,
                folds,
                workers: None,
                holdout_fraction: None,
            },
            dataset: DatasetConfig {
                target: target.to_string(),
                features,
            },
            entities,
            required: None,
            batch: None,
            sampling: None,
            priors: None,
            robust: None,
            mixed_effects: None,
            standardization: None,
        }
    }

    pub fn workers(&self) -> usize {
        self.run.workers.unwrap_or(1).max(1)
    }

    pub fn holdout_fraction(&self) -> f64 {
        self.run.holdout_fraction.unwrap_or(DEFAULT_HOLDOUT_FRACTION)
    }

    pub fn entity_catalog(&self) -> EntityCatalog {
        EntityCatalog::new(self.entities.clone())
    }

    pub fn required(&self) -> RequiredConfig {
        self.required.clone().unwrap_or_default()
    }

    pub fn batch_policy(&self) -> BatchPolicy {
        let batch = self.batch.as_ref();
        BatchPolicy {
            batch_size: batch.and_then(|b| b.batch_size).unwrap_or(DEFAULT_BATCH_SIZE),
            min_batch: batch.and_then(|b| b.min_batch).unwrap_or(DEFAULT_MIN_BATCH),
            reclaim_every: batch
                .and_then(|b| b.reclaim_every)
                .unwrap_or(DEFAULT_RECLAIM_EVERY),
            workers: self.workers(),
            pool_batches: batch.and_then(|b| b.pool_batches).unwrap_or(false),
        }
    }

    pub fn no_pooling_sampling(&self) -> SamplingSection {
        self.sampling
            .as_ref()
            .and_then(|s| s.no_pooling)
            .unwrap_or(DEFAULT_NO_POOLING_SAMPLING)
    }

    pub fn pooled_sampling(&self) -> SamplingSection {
        self.sampling
            .as_ref()
            .and_then(|s| s.pooled)
            .unwrap_or(DEFAULT_POOLED_SAMPLING)
    }

    pub fn priors(&self) -> Priors {
        self.priors.unwrap_or_default()
    }

    pub fn robust(&self) -> RobustOptions {
        self.robust.unwrap_or_default()
    }

    pub fn mixed_effects(&self) -> MixedEffectsOptions {
        self.mixed_effects.unwrap_or_default()
    }

    pub fn standardization(&self) -> StandardizationConfig {
        self.standardization.unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.run.folds < 2 {
            return Err(format!("run.folds must be >= 2 (got {})", self.run.folds));
        }
        if self.run.workers == Some(0) {
            return Err("run.workers must be >= 1".to_string());
        }
        let holdout = self.holdout_fraction();
        if !(0.0..1.0).contains(&holdout) {
            return Err(format!("run.holdout_fraction must be in [0, 1) (got {holdout})"));
        }
        if self.dataset.target.trim().is_empty() {
            return Err("dataset.target must not be empty".to_string());
        }
        if self.dataset.features.is_empty() {
            return Err("dataset.features must list at least one column".to_string());
        }
        if let Some(dup) = first_duplicate(&self.dataset.features) {
            return Err(format!("dataset.features lists '{dup}' more than once"));
        }

        let policy = self.batch_policy();
        if policy.batch_size == 0 {
            return Err("batch.batch_size must be >= 1".to_string());
        }

        for (section, sampling) in [
            ("sampling.no_pooling", self.no_pooling_sampling()),
            ("sampling.pooled", self.pooled_sampling()),
        ] {
            if sampling.chains == 0 || sampling.iterations == 0 {
                return Err(format!("{section}: chains and iterations must be >= 1"));
            }
        }

        let priors = self.priors();
        for (name, value) in [
            ("priors.slope_scale", priors.slope_scale),
            ("priors.intercept_scale", priors.intercept_scale),
            ("priors.intercept_df", priors.intercept_df),
            ("priors.noise_df", priors.noise_df),
            ("priors.variance_shape", priors.variance_shape),
            ("priors.variance_rate", priors.variance_rate),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(format!("{name} must be finite and > 0 (got {value})"));
            }
        }

        let robust = self.robust();
        if !(robust.tuning.is_finite() && robust.tuning > 0.0) || robust.max_iter == 0 {
            return Err("robust.tuning must be > 0 and robust.max_iter >= 1".to_string());
        }
        if self.mixed_effects().max_iter == 0 {
            return Err("mixed_effects.max_iter must be >= 1".to_string());
        }
        Ok(())
    }
}

fn first_duplicate(values: &[String]) -> Option<&str> {
    let mut seen = std::collections::BTreeSet::new();
    values
        .iter()
        .find(|v| !seen.insert(v.as_str()))
        .map(String::as_str)
}

pub fn load_config(path: &Path) -> Result<Config, String> {
    let (config, _source) = load_config_with_source(path)?;
    Ok(config)
}

pub fn load_config_with_source(path: &Path) -> Result<(Config, String), String> {
    let contents = fs::read_to_string(path)
        .map_err(|err| format!("failed to read config {}: {}", path.display(), err))?;
    let config: Config = toml::from_str(&contents)
        .map_err(|err| format!("failed to parse TOML {}: {}", path.display(), err))?;
    config
        .validate()
        .map_err(|err| format!("invalid config {}: {err}", path.display()))?;
    Ok((config, contents))
}

pub fn to_toml_pretty(config: &Config) -> Result<String, String> {
    toml::to_string_pretty(config)
        .map_err(|err| format!("failed to serialize config as TOML: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[run]
seed = 7
folds = 3

[dataset]
target = "close"
features = ["sma_5", "rsi_14", "volatility_20"]

[entities.AAPL]
benchmark_group = "SPY"
category_label = "tech"

[entities.SPY]
benchmark_group = "SPY"
category_label = "benchmark"
"#;

    fn parse_config(toml_str: &str) -> Config {
        toml::from_str(toml_str).expect("config should parse")
    }

    #[test]
    fn parse_minimal_config_fills_defaults() {
        let config = parse_config(MINIMAL);
        config.validate().expect("minimal config is valid");
        assert_eq!(config.workers(), 1);
        assert_eq!(config.holdout_fraction(), DEFAULT_HOLDOUT_FRACTION);
        assert_eq!(config.batch_policy().batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.pooled_sampling(), DEFAULT_POOLED_SAMPLING);
        assert_eq!(
            config.standardization().final_model,
            FinalStandardization::FullDataset
        );
        assert_eq!(config.entity_catalog().len(), 2);
    }

    #[test]
    fn batch_policy_shares_the_run_worker_count() {
        let mut config = parse_config(MINIMAL);
        assert_eq!(config.batch_policy().workers, 1);
        config.run.workers = Some(4);
        assert_eq!(config.batch_policy().workers, 4);
    }

    #[test]
    fn parse_full_config() {
        let toml_str = format!(
            r#"{MINIMAL}
[required]
tradable = ["AAPL"]
benchmarks = ["SPY"]

[batch]
batch_size = 1000
min_batch = 200
reclaim_every = 2
pool_batches = true

[sampling.no_pooling]
chains = 1
iterations = 100
warmup = 50

[sampling.pooled]
chains = 2
iterations = 200
warmup = 100

[priors]
slope_scale = 5.0
intercept_scale = 20.0
intercept_df = 3.0
noise_df = 5.0
variance_shape = 2.0
variance_rate = 1.0

[robust]
tuning = 1.5
max_iter = 30
tolerance = 1e-6

[mixed_effects]
max_iter = 50
tolerance = 1e-5

[standardization]
cross_validation = "none"
final_model = "train_only"
"#
        );
        let config = parse_config(&toml_str);
        config.validate().expect("full config is valid");
        assert!(config.batch_policy().pool_batches);
        assert_eq!(config.no_pooling_sampling().chains, 1);
        assert_eq!(config.priors().noise_df, 5.0);
        assert_eq!(
            config.standardization().cross_validation,
            CvStandardization::None
        );
        assert_eq!(config.required().benchmarks, vec!["SPY".to_string()]);
    }

    #[test]
    fn parse_config_rejects_unknown_fields() {
        let toml_str = format!("{MINIMAL}\n[batch]\nbatch_size = 10\nunknown_field = 1\n");
        let err = toml::from_str::<Config>(&toml_str).expect_err("unknown field should fail");
        assert!(err.to_string().to_lowercase().contains("unknown field"));
    }

    #[test]
    fn parse_config_rejects_malformed_toml() {
        let err = toml::from_str::<Config>("[run\nseed = 1").expect_err("malformed");
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn validate_rejects_degenerate_settings() {
        let mut config = parse_config(MINIMAL);
        config.run.folds = 1;
        assert!(config.validate().unwrap_err().contains("folds"));

        let mut config = parse_config(MINIMAL);
        config.run.workers = Some(0);
        assert!(config.validate().unwrap_err().contains("workers"));

        let mut config = parse_config(MINIMAL);
        config.run.holdout_fraction = Some(1.0);
        assert!(config.validate().unwrap_err().contains("holdout_fraction"));

        let mut config = parse_config(MINIMAL);
        config.priors = Some(Priors {
            slope_scale: 0.0,
            ..Priors::default()
        });
        assert!(config.validate().unwrap_err().contains("slope_scale"));

        let mut config = parse_config(MINIMAL);
        config.dataset.features.push("rsi_14".to_string());
        assert!(config.validate().unwrap_err().contains("rsi_14"));
    }

    #[test]
    fn toml_round_trip_keeps_sections() {
        let config = parse_config(MINIMAL);
        let rendered = to_toml_pretty(&config).expect("serialize");
        let reparsed = parse_config(&rendered);
        assert_eq!(reparsed.dataset.features, config.dataset.features);
        assert_eq!(reparsed.entities, config.entities);
    }
}
