use crate::entities::dataset::Dataset;
use crate::errors::PipelineError;

/// Supplies the cleaned, feature-engineered dataset.
pub trait DatasetSource {
    fn load_dataset(&self) -> Result<Dataset, PipelineError>;
}
