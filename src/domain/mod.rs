// Domain layer - Core types, error taxonomy and pipeline policies

pub mod errors;
pub mod model;
pub mod rules;
