use chrono::NaiveDate;
use poolcast_domain::entities::dataset::Dataset;
use poolcast_domain::errors::PipelineError;
use poolcast_domain::repositories::dataset_source::DatasetSource;
use poolcast_domain::value_objects::observation::Observation;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::info;

pub const DATE_COLUMN: &str = "date";
pub const ENTITY_COLUMN: &str = "entity_id";

/// Long-format CSV: one row per (entity, date) with `date` as `YYYY-MM-DD`.
/// Empty cells and `NaN` load as missing values.
#[derive(Debug, Clone)]
pub struct CsvDatasetSource {
    path: PathBuf,
    target: String,
    features: Vec<String>,
}

impl CsvDatasetSource {
    pub fn new(path: impl Into<PathBuf>, target: impl Into<String>, features: Vec<String>) -> Self {
        Self {
            path: path.into(),
            target: target.into(),
            features,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn parse_value(raw: &str, column: &str, line: u64) -> Result<Option<f64>, PipelineError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    trimmed
        .parse::<f64>()
        .map(Some)
        .map_err(|err| PipelineError::InvalidInput(format!("line {line}: column '{column}': {err}")))
}

impl DatasetSource for CsvDatasetSource {
    fn load_dataset(&self) -> Result<Dataset, PipelineError> {
        let file = File::open(&self.path).map_err(|err| {
            PipelineError::InvalidInput(format!("failed to open dataset CSV {}: {}", self.path.display(), err))
        })?;
        let mut reader = csv::Reader::from_reader(file);
        let headers = reader
            .headers()
            .map_err(|err| PipelineError::InvalidInput(format!("failed to read CSV header: {err}")))?
            .clone();
        let position = |name: &str| headers.iter().position(|h| h.trim() == name);

        let required: Vec<&str> = [DATE_COLUMN, ENTITY_COLUMN, self.target.as_str()]
            .into_iter()
            .chain(self.features.iter().map(String::as_str))
            .collect();
        let missing: Vec<String> = required
            .iter()
            .filter(|name| position(name).is_none())
            .map(|name| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::MissingColumns(missing));
        }
        let date_idx = position(DATE_COLUMN).unwrap_or_default();
        let entity_idx = position(ENTITY_COLUMN).unwrap_or_default();
        let target_idx = position(&self.target).unwrap_or_default();
        let feature_idx: Vec<usize> = self
            .features
            .iter()
            .map(|f| position(f).unwrap_or_default())
            .collect();

        let mut rows = Vec::new();
        for result in reader.records() {
            let record =
                result.map_err(|err| PipelineError::InvalidInput(format!("failed to parse CSV row: {err}")))?;
            let line = record.position().map(|p| p.line()).unwrap_or_default();
            let field = |idx: usize| record.get(idx).unwrap_or("");

            let date = NaiveDate::parse_from_str(field(date_idx).trim(), "%Y-%m-%d").map_err(|err| {
                PipelineError::InvalidInput(format!("line {line}: invalid date '{}': {err}", field(date_idx)))
            })?;
            let entity_id = field(entity_idx).trim().to_string();
            if entity_id.is_empty() {
                return Err(PipelineError::InvalidInput(format!("line {line}: empty entity_id")));
            }
            let features = feature_idx
                .iter()
                .zip(&self.features)
                .map(|(idx, name)| parse_value(field(*idx), name, line))
                .collect::<Result<Vec<_>, _>>()?;
            rows.push(Observation {
                entity_id,
                date,
                features,
                target: parse_value(field(target_idx), &self.target, line)?,
            });
        }

        info!(path = %self.path.display(), rows = rows.len(), "loaded dataset CSV");
        Dataset::new(self.features.clone(), rows)
    }
}
