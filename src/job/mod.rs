//! Job management module

pub mod id;
pub mod state;
pub mod store;

pub use id::JobId;
pub use state::{Job, JobStatus};
pub use store::JobStore;
