pub mod batching;
pub mod combiner;
pub mod evaluator;
pub mod folds;
pub mod predictor;
pub mod preprocessing;
pub mod stats;
pub mod summary;
pub mod workers;
