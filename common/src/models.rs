// Catalog entity models shared by the scheduler and runner

use serde::{Deserialize, Serialize};

/// Name of the catalog table holding job descriptors.
pub const JOBS_TABLE: &str = "jobs";

/// Name of the catalog table holding script descriptors.
pub const SCRIPTS_TABLE: &str = "scripts";

/// Job describes a scheduled task: when to fire it, which handler to
/// invoke and what payload to hand over. The same shape is persisted in
/// the catalog and serialized onto the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    /// Cron-style time expression, e.g. `"0 30 4 * * *"` or `"@every 1s"`.
    pub when: String,
    #[serde(default)]
    pub description: String,
    /// Task name the runner dispatches on.
    pub name: String,
    /// Arbitrary payload, delivered verbatim to the handler.
    #[serde(default)]
    pub args: serde_json::Value,
}

/// Script is a dynamic task definition stored in the catalog. Its `id`
/// doubles as the dispatch name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub id: String,
    pub interpreter: Interpreter,
    pub source: String,
}

/// Interpreter tag on a script descriptor. Only `js` is recognized;
/// anything else deserializes to `Unknown` and the descriptor is skipped
/// during installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Interpreter {
    Js,
    Unknown,
}

impl From<String> for Interpreter {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "js" => Interpreter::Js,
            _ => Interpreter::Unknown,
        }
    }
}

impl From<Interpreter> for String {
    fn from(interpreter: Interpreter) -> Self {
        match interpreter {
            Interpreter::Js => "js".to_string(),
            Interpreter::Unknown => "unknown".to_string(),
        }
    }
}
