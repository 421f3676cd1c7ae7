//! Background execution: a host scheduling platform and the two jobs
//! (refresh and retention cleanup) bound to it.

mod platform;
mod scheduler;

pub use platform::{
    BackgroundTask, Completion, JobHandler, LocalPlatform, ScheduleError, SchedulingPlatform,
    DEFAULT_RUN_BUDGET,
};
pub use scheduler::{BackgroundScheduler, SchedulerSettings, CLEANUP_JOB_ID, REFRESH_JOB_ID};
