// Task registry: name to handler, live-reconciled from the catalog
//
// The reconciler writes, the dispatcher pool reads concurrently. Reads
// are short-held lock lookups; a lookup clones the handler Arc so the
// lock is never held across a run.

use crate::runner::task::Task;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, Arc<dyn Task>>>,
    builtins: HashSet<String>,
}

impl TaskRegistry {
    /// Seed the registry with the built-in handler set. Built-in names
    /// are authoritative: a script can never replace or remove one.
    pub fn with_builtins(builtins: HashMap<String, Arc<dyn Task>>) -> Self {
        let names = builtins.keys().cloned().collect();
        Self {
            tasks: RwLock::new(builtins),
            builtins: names,
        }
    }

    pub fn is_builtin(&self, name: &str) -> bool {
        self.builtins.contains(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Task>> {
        self.tasks
            .read()
            .expect("registry lock poisoned")
            .get(name)
            .cloned()
    }

    /// Bind a handler to a name. Returns false when the name collides
    /// with a built-in; the descriptor is silently shadowed.
    pub fn install(&self, name: &str, task: Arc<dyn Task>) -> bool {
        if self.is_builtin(name) {
            warn!(task = name, "Script shadowed by a built-in task");
            return false;
        }
        self.tasks
            .write()
            .expect("registry lock poisoned")
            .insert(name.to_string(), task);
        debug!(task = name, "Task installed");
        true
    }

    /// Unbind a name. Built-ins and unknown names are left untouched.
    pub fn uninstall(&self, name: &str) -> bool {
        if self.is_builtin(name) {
            return false;
        }
        let removed = self
            .tasks
            .write()
            .expect("registry lock poisoned")
            .remove(name)
            .is_some();
        if removed {
            debug!(task = name, "Task uninstalled");
        }
        removed
    }

    /// All bound names, sorted. For observation in tests.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tasks
            .read()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tasks.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
