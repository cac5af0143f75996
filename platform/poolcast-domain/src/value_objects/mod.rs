pub mod artifact;
pub mod entity;
pub mod observation;
