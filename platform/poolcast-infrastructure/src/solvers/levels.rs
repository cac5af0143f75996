use poolcast_domain::repositories::regression::DesignMatrix;
use std::collections::BTreeMap;

/// Factor levels of a random intercept and the level of every design row.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Levels {
    pub labels: Vec<String>,
    pub index: Vec<usize>,
}

impl Levels {
    pub fn from_labels<I: IntoIterator<Item = String>>(labels: I) -> Self {
        let mut lookup: BTreeMap<String, usize> = BTreeMap::new();
        let mut ordered = Vec::new();
        let index = labels
            .into_iter()
            .map(|label| {
                if let Some(idx) = lookup.get(&label) {
                    return *idx;
                }
                let idx = ordered.len();
                ordered.push(label.clone());
                lookup.insert(label, idx);
                idx
            })
            .collect();
        Self {
            labels: ordered,
            index,
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Benchmark-group levels.
    pub fn groups(design: &DesignMatrix) -> Self {
        Self::from_labels(design.groups.iter().cloned())
    }

    /// Entity-within-group levels, labelled `group/entity`.
    pub fn nested_entities(design: &DesignMatrix) -> Self {
        Self::from_labels(
            design
                .groups
                .iter()
                .zip(&design.entity_ids)
                .map(|(group, entity)| format!("{group}/{entity}")),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::Levels;

    #[test]
    fn levels_keep_first_seen_order() {
        let levels = Levels::from_labels(["b", "a", "b", "c"].iter().map(|s| s.to_string()));
        assert_eq!(levels.labels, vec!["b", "a", "c"]);
        assert_eq!(levels.index, vec![0, 1, 0, 2]);
        assert_eq!(levels.len(), 3);
    }
}
