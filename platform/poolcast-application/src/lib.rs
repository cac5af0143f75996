pub mod benchmarking;
pub mod config;
pub mod cross_validation;
pub mod experiment;
pub mod fitting;
mod shared;
pub mod validation;
