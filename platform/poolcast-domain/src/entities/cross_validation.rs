use crate::entities::evaluation::{EvaluationResult, Metric};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoldResult {
    pub fold: usize,
    pub test_start: NaiveDate,
    pub test_end: NaiveDate,
    pub train_rows: usize,
    pub test_rows: usize,
    pub evaluations: BTreeMap<String, EvaluationResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoldMetrics {
    pub fold: usize,
    pub values: BTreeMap<Metric, Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSummary {
    pub mean: BTreeMap<Metric, Option<f64>>,
    pub std: BTreeMap<Metric, Option<f64>>,
    /// One row per fold in which the model was evaluated.
    pub matrix: Vec<FoldMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CvSummary {
    pub folds_requested: usize,
    pub folds_succeeded: usize,
    pub models: BTreeMap<String, ModelSummary>,
}
