use chrono::NaiveDate;
use poolcast_domain::entities::dataset::Dataset;
use poolcast_domain::services::batching::plan_batches;
use poolcast_domain::services::combiner::combine;
use poolcast_domain::services::evaluator::evaluate;
use poolcast_domain::services::folds::{plan_time_folds, split_fold};
use poolcast_domain::value_objects::artifact::{CoefficientTable, ModelArtifact, INTERCEPT};
use poolcast_domain::value_objects::observation::Observation;
use proptest::prelude::*;
use std::collections::BTreeSet;

fn raw(intercept: f64, slope: f64, var: f64, n: usize) -> ModelArtifact {
    ModelArtifact::RawCoefficient(
        CoefficientTable::new(
            vec![INTERCEPT.to_string(), "x".to_string()],
            vec![intercept, slope],
            vec![vec![var, 0.0], vec![0.0, var]],
            n,
        )
        .unwrap(),
    )
}

fn day(offset: u16) -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1).unwrap() + chrono::Duration::days(offset as i64)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn batch_plans_are_exhaustive_ordered_and_disjoint(
        n in 0usize..5_000,
        batch_size in 1usize..2_000,
        min_batch in 0usize..1_500,
    ) {
        let plan = plan_batches(n, batch_size, min_batch);
        prop_assert!(!plan.is_empty());
        prop_assert_eq!(plan.first().unwrap().start, 0);
        prop_assert_eq!(plan.last().unwrap().end, n);
        for pair in plan.windows(2) {
            prop_assert_eq!(pair[0].end, pair[1].start);
        }
        prop_assert_eq!(plan.iter().map(|r| r.len()).sum::<usize>(), n);
    }

    #[test]
    fn pooled_combination_ignores_arrival_order(
        batches in prop::collection::vec((-50.0f64..50.0, -5.0f64..5.0, 0.01f64..10.0, 1usize..500), 2..8),
        rotation in 0usize..8,
    ) {
        let artifacts: Vec<ModelArtifact> = batches.iter().map(|(a, b, v, n)| raw(*a, *b, *v, *n)).collect();
        let mut rotated = artifacts.clone();
        rotated.rotate_left(rotation % artifacts.len());
        rotated.reverse();

        let forward = combine("prop", artifacts).unwrap();
        let shuffled = combine("prop", rotated).unwrap();
        let (f, s) = (forward.coefficients().unwrap(), shuffled.coefficients().unwrap());
        prop_assert_eq!(f.n_obs, s.n_obs);
        for i in 0..f.len() {
            prop_assert!((f.values[i] - s.values[i]).abs() < 1e-9);
            prop_assert!((f.covariance[i][i] - s.covariance[i][i]).abs() < 1e-9);
        }
    }

    #[test]
    fn evaluator_is_pure_and_bounded(
        pairs in prop::collection::vec((prop::option::of(-1e3f64..1e3), prop::option::of(-1e3f64..1e3)), 0..60),
    ) {
        let (pred, actual): (Vec<Option<f64>>, Vec<Option<f64>>) = pairs.into_iter().unzip();
        let first = evaluate(Some(&pred), &actual);
        let second = evaluate(Some(&pred), &actual);
        prop_assert_eq!(format!("{first:?}"), format!("{second:?}"));
        if let Some(rmse) = first.rmse {
            prop_assert!(rmse >= 0.0);
        }
        if let Some(da) = first.directional_accuracy {
            prop_assert!((0.0..=1.0).contains(&da));
        }
        for value in [first.rmse, first.mae, first.r2, first.mape, first.information_ratio].into_iter().flatten() {
            prop_assert!(value.is_finite());
        }
    }

    #[test]
    fn fold_test_blocks_partition_every_date(
        offsets in prop::collection::btree_set(0u16..2_000, 4..120),
        k in 2usize..6,
    ) {
        prop_assume!(offsets.len() >= k);
        let rows: Vec<Observation> = offsets
            .iter()
            .map(|o| Observation {
                entity_id: "A".to_string(),
                date: day(*o),
                features: vec![Some(*o as f64)],
                target: Some(1.0),
            })
            .collect();
        let dataset = Dataset::new(vec!["x".to_string()], rows).unwrap();
        let folds = plan_time_folds(&dataset.unique_dates(), k).unwrap();

        let mut seen = BTreeSet::new();
        for plan in &folds {
            for date in &plan.test_dates {
                prop_assert!(seen.insert(*date));
            }
            let (train, test) = split_fold(&dataset, plan);
            prop_assert_eq!(train.len() + test.len(), dataset.len());
            prop_assert!(train.rows().iter().all(|r| !plan.test_dates.contains(&r.date)));
        }
        prop_assert_eq!(seen.len(), offsets.len());
        let size = offsets.len() / k;
        prop_assert!(folds[..k - 1].iter().all(|f| f.test_dates.len() == size));
    }
}
