use crate::entities::cross_validation::{CvSummary, FoldMetrics, FoldResult, ModelSummary};
use crate::entities::evaluation::Metric;
use crate::services::stats::{finite, mean, sample_std};
use std::collections::{BTreeMap, BTreeSet};

/// Per-model mean/std over the folds that produced a result; null folds add no row.
pub fn summarize(fold_results: &[Option<FoldResult>], k: usize) -> CvSummary {
    let completed: Vec<&FoldResult> = fold_results.iter().flatten().collect();
    let model_names: BTreeSet<&str> = completed
        .iter()
        .flat_map(|fold| fold.evaluations.keys().map(String::as_str))
        .collect();

    let models = model_names
        .into_iter()
        .map(|name| {
            let matrix: Vec<FoldMetrics> = completed
                .iter()
                .filter_map(|fold| {
                    fold.evaluations.get(name).map(|eval| FoldMetrics {
                        fold: fold.fold,
                        values: Metric::ALL.iter().map(|m| (*m, eval.metric(*m))).collect(),
                    })
                })
                .collect();

            let mut means = BTreeMap::new();
            let mut stds = BTreeMap::new();
            for metric in Metric::ALL {
                let column = finite(matrix.iter().map(|row| row.values.get(&metric).copied().flatten()));
                means.insert(metric, mean(&column));
                stds.insert(metric, sample_std(&column));
            }

            (
                name.to_string(),
                ModelSummary {
                    mean: means,
                    std: stds,
                    matrix,
                },
            )
        })
        .collect();

    CvSummary {
        folds_requested: k,
        folds_succeeded: completed.len(),
        models,
    }
}
