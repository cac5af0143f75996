pub mod dataset_source;
pub mod regression;
