pub mod cross_validation;
pub mod dataset;
pub mod evaluation;
pub mod model_collection;
