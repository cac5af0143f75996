use crate::config::Config;
use poolcast_domain::entities::dataset::{Dataset, EntityCatalog};
use poolcast_domain::errors::PipelineError;
use poolcast_domain::value_objects::observation::Observation;
use std::collections::BTreeSet;

/// Fatal start-up checks: required columns, required entities and catalog coverage.
pub fn validate_inputs(dataset: &Dataset, config: &Config) -> Result<(), PipelineError> {
    let missing_columns: Vec<String> = config
        .dataset
        .features
        .iter()
        .filter(|f| dataset.feature_index(f).is_none())
        .cloned()
        .collect();
    if !missing_columns.is_empty() {
        return Err(PipelineError::MissingColumns(missing_columns));
    }

    let present: BTreeSet<String> = dataset.entity_ids().into_iter().collect();
    let required = config.required();
    let missing_entities: BTreeSet<String> = required
        .tradable
        .iter()
        .chain(required.benchmarks.iter())
        .filter(|id| !present.contains(*id))
        .cloned()
        .collect();
    if !missing_entities.is_empty() {
        return Err(PipelineError::MissingEntities(missing_entities.into_iter().collect()));
    }

    check_catalog(&present, &config.entity_catalog())
}

fn check_catalog(present: &BTreeSet<String>, catalog: &EntityCatalog) -> Result<(), PipelineError> {
    for entity in present {
        catalog.meta(entity)?;
    }
    Ok(())
}

/// Restricts the dataset to the configured feature columns, in configured order.
pub fn project_features(dataset: &Dataset, features: &[String]) -> Result<Dataset, PipelineError> {
    let mut indices = Vec::with_capacity(features.len());
    let mut missing = Vec::new();
    for feature in features {
        match dataset.feature_index(feature) {
            Some(idx) => indices.push(idx),
            None => missing.push(feature.clone()),
        }
    }
    if !missing.is_empty() {
        return Err(PipelineError::MissingColumns(missing));
    }
    if dataset.feature_names() == features {
        return Ok(dataset.clone());
    }

    let rows = dataset
        .rows()
        .iter()
        .map(|row| Observation {
            features: indices.iter().map(|&idx| row.features[idx]).collect(),
            ..row.clone()
        })
        .collect();
    Dataset::new(features.to_vec(), rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use poolcast_domain::value_objects::entity::EntityMeta;
    use std::collections::BTreeMap;

    fn dataset(entities: &[&str], features: &[&str]) -> Dataset {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let rows = entities
            .iter()
            .map(|e| Observation {
                entity_id: e.to_string(),
                date,
                features: (0..features.len()).map(|i| Some(i as f64)).collect(),
                target: Some(1.0),
            })
            .collect();
        Dataset::new(features.iter().map(|f| f.to_string()).collect(), rows).unwrap()
    }

    fn config(entities: &[&str], required: (&[&str], &[&str])) -> Config {
        let mut config = Config::for_dataset(
            "close",
            vec!["sma_5".to_string(), "rsi_14".to_string()],
            entities
                .iter()
                .map(|e| {
                    (
                        e.to_string(),
                        EntityMeta {
                            benchmark_group: "SPY".to_string(),
                            category_label: "tech".to_string(),
                        },
                    )
                })
                .collect::<BTreeMap<_, _>>(),
            1,
            3,
        );
        config.required = Some(crate::config::RequiredConfig {
            tradable: required.0.iter().map(|s| s.to_string()).collect(),
            benchmarks: required.1.iter().map(|s| s.to_string()).collect(),
        });
        config
    }

    #[test]
    fn missing_feature_columns_are_fatal() {
        let ds = dataset(&["AAPL"], &["sma_5"]);
        let err = validate_inputs(&ds, &config(&["AAPL"], (&[], &[]))).unwrap_err();
        assert_eq!(err, PipelineError::MissingColumns(vec!["rsi_14".to_string()]));
    }

    #[test]
    fn missing_required_entities_are_fatal() {
        let ds = dataset(&["AAPL"], &["sma_5", "rsi_14"]);
        let err = validate_inputs(&ds, &config(&["AAPL", "SPY"], (&["AAPL", "MSFT"], &["SPY"])))
            .unwrap_err();
        assert_eq!(
            err,
            PipelineError::MissingEntities(vec!["MSFT".to_string(), "SPY".to_string()])
        );
    }

    #[test]
    fn entities_required_twice_are_reported_once() {
        let ds = dataset(&["AAPL"], &["sma_5", "rsi_14"]);
        let err = validate_inputs(
            &ds,
            &config(&["AAPL", "SPY", "QQQ"], (&["SPY", "AAPL", "QQQ"], &["QQQ", "SPY"])),
        )
        .unwrap_err();
        assert_eq!(
            err,
            PipelineError::MissingEntities(vec!["QQQ".to_string(), "SPY".to_string()])
        );
    }

    #[test]
    fn entities_without_metadata_are_fatal() {
        let ds = dataset(&["AAPL", "TSLA"], &["sma_5", "rsi_14"]);
        let err = validate_inputs(&ds, &config(&["AAPL"], (&["AAPL"], &[]))).unwrap_err();
        assert_eq!(err, PipelineError::UnknownEntity("TSLA".to_string()));
    }

    #[test]
    fn project_features_reorders_and_drops_extra_columns() {
        let ds = dataset(&["AAPL"], &["extra", "rsi_14", "sma_5"]);
        let projected = project_features(&ds, &["sma_5".to_string(), "rsi_14".to_string()]).unwrap();
        assert_eq!(projected.feature_names(), ["sma_5", "rsi_14"]);
        assert_eq!(projected.rows()[0].features, vec![Some(2.0), Some(1.0)]);
    }
}
