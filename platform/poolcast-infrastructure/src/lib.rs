pub mod dataset;
pub mod solvers;
