// Scheduler core: a live-reconciled cron engine over the job catalog

pub mod core;
pub mod engine;

pub use self::core::SchedulerCore;
pub use self::engine::{CronEngine, EntryId, FireAction};
