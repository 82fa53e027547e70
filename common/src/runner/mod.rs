// Runner core: task registry, dispatcher and script reconciliation

pub mod builtin;
pub mod core;
pub mod dispatch;
pub mod registry;
pub mod script;
pub mod task;

pub use self::builtin::{builtin_tasks, ClearExpiredTokens, CLEAR_EXPIRED_TOKENS};
pub use self::core::RunnerCore;
pub use self::dispatch::dispatch;
pub use self::registry::TaskRegistry;
pub use self::script::ScriptTask;
pub use self::task::Task;
