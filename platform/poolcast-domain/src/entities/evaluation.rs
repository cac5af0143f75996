use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Rmse,
    Mae,
    R2,
    Mape,
    DirectionalAccuracy,
    InformationRatio,
    NPredictions,
}

impl Metric {
    pub const ALL: [Metric; 7] = [
        Metric::Rmse,
        Metric::Mae,
        Metric::R2,
        Metric::Mape,
        Metric::DirectionalAccuracy,
        Metric::InformationRatio,
        Metric::NPredictions,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Metric::Rmse => "rmse",
            Metric::Mae => "mae",
            Metric::R2 => "r2",
            Metric::Mape => "mape",
            Metric::DirectionalAccuracy => "directional_accuracy",
            Metric::InformationRatio => "information_ratio",
            Metric::NPredictions => "n_predictions",
        }
    }
}

/// `None` is the explicit "undefined" value for a metric.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct EvaluationResult {
    pub rmse: Option<f64>,
    pub mae: Option<f64>,
    pub r2: Option<f64>,
    pub mape: Option<f64>,
    pub directional_accuracy: Option<f64>,
    pub information_ratio: Option<f64>,
    pub n_predictions: Option<usize>,
}

impl EvaluationResult {
    pub fn undefined() -> Self {
        Self::default()
    }

    pub fn is_undefined(&self) -> bool {
        *self == Self::undefined()
    }

    pub fn metric(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Rmse => self.rmse,
            Metric::Mae => self.mae,
            Metric::R2 => self.r2,
            Metric::Mape => self.mape,
            Metric::DirectionalAccuracy => self.directional_accuracy,
            Metric::InformationRatio => self.information_ratio,
            Metric::NPredictions => self.n_predictions.map(|n| n as f64),
        }
    }
}
