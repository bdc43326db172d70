mod job;
mod scheduled_job;
mod service;

pub use job::*;
pub use scheduled_job::*;
pub use service::*;
