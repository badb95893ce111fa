//! Shared status of install jobs.
//!
//! The orchestrator writes, UI front ends read. The registry is passed
//! explicitly as an `Arc<StatusRegistry>` to every component that needs it.

mod registry;

pub use registry::{AppUpdateStatus, FollowupAction, JobState, StatusEvent, StatusRegistry};
