pub mod estimator;
pub mod manifest;
pub mod runner;

pub use estimator::{ProcessingJob, TimeEstimator};
pub use runner::{CancelToken, JobHandle, JobStatus, SeparatedStems, SeparationJobRunner};
