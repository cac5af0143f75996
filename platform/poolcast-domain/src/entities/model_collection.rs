use crate::value_objects::artifact::ModelArtifact;
use serde::Serialize;
use std::collections::BTreeMap;

/// Result name -> fitted artifact, `None` when that fit failed.
/// Built once per fitter invocation and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ModelCollection {
    entries: BTreeMap<String, Option<ModelArtifact>>,
}

impl ModelCollection {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Present artifact under `name`; `None` when absent or unknown.
    pub fn get(&self, name: &str) -> Option<&ModelArtifact> {
        self.entries.get(name).and_then(Option::as_ref)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&ModelArtifact>)> {
        self.entries
            .iter()
            .map(|(name, artifact)| (name.as_str(), artifact.as_ref()))
    }

    pub fn present(&self) -> impl Iterator<Item = (&str, &ModelArtifact)> {
        self.entries
            .iter()
            .filter_map(|(name, artifact)| artifact.as_ref().map(|a| (name.as_str(), a)))
    }

    pub fn present_count(&self) -> usize {
        self.entries.values().filter(|a| a.is_some()).count()
    }

    pub fn absent_names(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, a)| a.is_none())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

impl FromIterator<(String, Option<ModelArtifact>)> for ModelCollection {
    fn from_iter<I: IntoIterator<Item = (String, Option<ModelArtifact>)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
