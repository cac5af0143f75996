use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub entity_id: String,
    pub date: NaiveDate,
    pub features: Vec<Option<f64>>,
    pub target: Option<f64>,
}

impl Observation {
    pub fn is_complete(&self) -> bool {
        self.target.is_some_and(f64::is_finite)
            && self.features.iter().all(|v| v.is_some_and(f64::is_finite))
    }
}
