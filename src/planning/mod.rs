//! Planning: decomposition, wave resolution, estimation

pub mod decomposer;
pub mod estimator;
pub mod resolver;

pub use decomposer::TaskDecomposer;
pub use estimator::TimeEstimator;
pub use resolver::{ResolveError, resolve_waves, validate_dag};
