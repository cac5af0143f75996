use crate::config::Config;
use crate::experiment::{run_experiment, ExperimentReport};
use chrono::NaiveDate;
use poolcast_domain::entities::dataset::Dataset;
use poolcast_domain::errors::PipelineError;
use poolcast_domain::repositories::regression::RegressionBackend;
use poolcast_domain::value_objects::entity::EntityMeta;
use poolcast_domain::value_objects::observation::Observation;
use std::collections::BTreeMap;
use std::time::Instant;

pub const SYNTHETIC_TARGET: &str = "fwd_return";
pub const SYNTHETIC_FEATURES: [&str; 2] = ["momentum", "spread"];
const BENCHMARK_GROUPS: [&str; 2] = ["BENCH_A", "BENCH_B"];

pub struct SyntheticUniverse {
    pub dataset: Dataset,
    pub entities: BTreeMap<String, EntityMeta>,
}

pub struct BenchSummary {
    pub rows: usize,
    pub entities: usize,
    pub elapsed_ms: u64,
    pub rows_per_sec: f64,
    pub report: ExperimentReport,
}

/// `entities` assets over `days` consecutive dates, alternating between two benchmark groups.
/// Each entity has its own intercept around a shared slope structure; roughly 1 in 50 cells is missing.
pub fn synthetic_universe(entities: usize, days: usize) -> Result<SyntheticUniverse, String> {
    if entities == 0 || days == 0 {
        return Err("entities and days must be > 0".to_string());
    }
    let start = NaiveDate::from_ymd_opt(2020, 1, 1).ok_or_else(|| "invalid start date".to_string())?;

    let mut meta = BTreeMap::new();
    let mut rows = Vec::with_capacity(entities * days);
    for e in 0..entities {
        let entity_id = format!("E{e:03}");
        let group = BENCHMARK_GROUPS[e % BENCHMARK_GROUPS.len()];
        meta.insert(
            entity_id.clone(),
            EntityMeta {
                benchmark_group: group.to_string(),
                category_label: if e % 3 == 0 { "core" } else { "satellite" }.to_string(),
            },
        );
        let level = ((e as f64) * 0.7).sin();
        let group_shift = if e % 2 == 0 { 0.25 } else { -0.25 };
        for d in 0..days {
            let t = d as f64 + 13.0 * e as f64;
            let momentum = (t * 0.11).sin();
            let spread = (t * 0.05).cos();
            let noise = 0.1 * (t * 2.3).sin() * (t * 0.7).cos();
            let missing = (e * 31 + d * 17) % 50 == 0;
            rows.push(Observation {
                entity_id: entity_id.clone(),
                date: start + chrono::Duration::days(d as i64),
                features: vec![Some(momentum), (!missing).then_some(spread)],
                target: Some(level + group_shift + 0.6 * momentum - 0.3 * spread + noise),
            });
        }
    }

    let features = SYNTHETIC_FEATURES.iter().map(|f| f.to_string()).collect();
    let dataset = Dataset::new(features, rows).map_err(|err| err.to_string())?;
    Ok(SyntheticUniverse {
        dataset,
        entities: meta,
    })
}

pub fn synthetic_config(
    universe: &SyntheticUniverse,
    seed: u64,
    folds: usize,
    workers: usize,
) -> Config {
    let features = SYNTHETIC_FEATURES.iter().map(|f| f.to_string()).collect();
    let mut config = Config::for_dataset(SYNTHETIC_TARGET, features, universe.entities.clone(), seed, folds);
    config.run.workers = Some(workers.max(1));
    config
}

pub fn run_bench(
    dataset: &Dataset,
    config: &Config,
    backend: &dyn RegressionBackend,
) -> Result<BenchSummary, PipelineError> {
    let started = Instant::now();
    let report = run_experiment(dataset, config, backend)?;
    let elapsed = started.elapsed();
    let secs = elapsed.as_secs_f64();

    Ok(BenchSummary {
        rows: dataset.len(),
        entities: dataset.entity_ids().len(),
        elapsed_ms: elapsed.as_millis() as u64,
        rows_per_sec: if secs > 0.0 { dataset.len() as f64 / secs } else { 0.0 },
        report,
    })
}
