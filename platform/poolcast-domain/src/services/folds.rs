use crate::entities::dataset::Dataset;
use crate::errors::PipelineError;
use chrono::NaiveDate;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldPlan {
    pub fold: usize,
    pub test_dates: BTreeSet<NaiveDate>,
}

impl FoldPlan {
    pub fn test_start(&self) -> Option<NaiveDate> {
        self.test_dates.first().copied()
    }

    pub fn test_end(&self) -> Option<NaiveDate> {
        self.test_dates.last().copied()
    }
}

/// Contiguous date blocks of `n / k`, the last block taking the remainder.
pub fn plan_time_folds(dates: &[NaiveDate], k: usize) -> Result<Vec<FoldPlan>, PipelineError> {
    let unique: Vec<NaiveDate> = dates
        .iter()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let n = unique.len();
    if k < 2 {
        return Err(PipelineError::InvalidInput(format!(
            "cross-validation needs at least 2 folds, got {k}"
        )));
    }
    if n < k {
        return Err(PipelineError::InvalidInput(format!(
            "cannot split {n} unique date(s) into {k} folds"
        )));
    }

    let size = n / k;
    Ok((0..k)
        .map(|fold| {
            let start = fold * size;
            let end = if fold + 1 == k { n } else { start + size };
            FoldPlan {
                fold,
                test_dates: unique[start..end].iter().copied().collect(),
            }
        })
        .collect())
}

/// (train, test) rows for one fold: test is every row dated inside the block.
pub fn split_fold(dataset: &Dataset, plan: &FoldPlan) -> (Dataset, Dataset) {
    dataset.partition_by_dates(&plan.test_dates)
}
