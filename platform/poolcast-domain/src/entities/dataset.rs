use crate::errors::PipelineError;
use crate::value_objects::entity::EntityMeta;
use crate::value_objects::observation::Observation;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Cleaned rows handed over by the preprocessing collaborator.
/// Rows are unique by (entity_id, date) and every feature vector matches `feature_names`.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    feature_names: Vec<String>,
    rows: Vec<Observation>,
}

impl Dataset {
    pub fn new(feature_names: Vec<String>, rows: Vec<Observation>) -> Result<Self, PipelineError> {
        let width = feature_names.len();
        let mut seen: HashSet<(&str, NaiveDate)> = HashSet::with_capacity(rows.len());
        for row in &rows {
            if row.features.len() != width {
                return Err(PipelineError::InvalidInput(format!(
                    "row {}@{} has {} features, expected {width}",
                    row.entity_id,
                    row.date,
                    row.features.len()
                )));
            }
            if !seen.insert((row.entity_id.as_str(), row.date)) {
                return Err(PipelineError::InvalidInput(format!(
                    "duplicate row for entity {} on {}",
                    row.entity_id, row.date
                )));
            }
        }
        Ok(Self {
            feature_names,
            rows,
        })
    }

    /// Builds a dataset over rows taken (possibly transformed) from this one.
    /// Keys are assumed to stay unique, so no re-validation happens.
    pub fn with_rows(&self, rows: Vec<Observation>) -> Self {
        Self {
            feature_names: self.feature_names.clone(),
            rows,
        }
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn rows(&self) -> &[Observation] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn feature_index(&self, name: &str) -> Option<usize> {
        self.feature_names.iter().position(|f| f == name)
    }

    pub fn targets(&self) -> Vec<Option<f64>> {
        self.rows.iter().map(|r| r.target).collect()
    }

    pub fn sorted_by_date(&self) -> Dataset {
        let mut rows = self.rows.clone();
        rows.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.entity_id.cmp(&b.entity_id)));
        self.with_rows(rows)
    }

    pub fn unique_dates(&self) -> Vec<NaiveDate> {
        self.rows
            .iter()
            .map(|r| r.date)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn entity_ids(&self) -> Vec<String> {
        self.rows
            .iter()
            .map(|r| r.entity_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn slice(&self, range: std::ops::Range<usize>) -> Dataset {
        let end = range.end.min(self.rows.len());
        let start = range.start.min(end);
        self.with_rows(self.rows[start..end].to_vec())
    }

    /// Splits rows into (date not in `dates`, date in `dates`), preserving order.
    pub fn partition_by_dates(&self, dates: &BTreeSet<NaiveDate>) -> (Dataset, Dataset) {
        let (inside, outside): (Vec<Observation>, Vec<Observation>) = self
            .rows
            .iter()
            .cloned()
            .partition(|r| dates.contains(&r.date));
        (self.with_rows(outside), self.with_rows(inside))
    }

    /// Date-ordered per-entity views, keyed by entity id.
    pub fn group_by_entity(&self) -> BTreeMap<String, EntitySlice<'_>> {
        let mut groups: BTreeMap<String, Vec<&Observation>> = BTreeMap::new();
        for row in &self.rows {
            groups.entry(row.entity_id.clone()).or_default().push(row);
        }
        groups
            .into_iter()
            .map(|(entity_id, mut rows)| {
                rows.sort_by_key(|r| r.date);
                let slice = EntitySlice {
                    entity_id: entity_id.clone(),
                    rows,
                };
                (entity_id, slice)
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct EntitySlice<'a> {
    entity_id: String,
    rows: Vec<&'a Observation>,
}

impl<'a> EntitySlice<'a> {
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn rows(&self) -> &[&'a Observation] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityCatalog {
    entries: BTreeMap<String, EntityMeta>,
}

impl EntityCatalog {
    pub fn new(entries: BTreeMap<String, EntityMeta>) -> Self {
        Self { entries }
    }

    pub fn meta(&self, entity_id: &str) -> Result<&EntityMeta, PipelineError> {
        self.entries
            .get(entity_id)
            .ok_or_else(|| PipelineError::UnknownEntity(entity_id.to_string()))
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.entries.contains_key(entity_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
