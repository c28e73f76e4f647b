//! Human-readable status narration

use std::sync::{Arc, Mutex};

/// Receives plain-language status messages
pub trait Narrator: Send + Sync {
    fn say(&self, message: &str);
}

pub type SharedNarrator = Arc<dyn Narrator>;

/// Narrates into the log
pub struct LogNarrator {
    name: String,
}

impl LogNarrator {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Narrator for LogNarrator {
    fn say(&self, message: &str) {
        tracing::info!(target: "narration", "{} says: {}", self.name, message);
    }
}

/// Keeps every message, for dry runs and tests
#[derive(Default)]
pub struct MemoryNarrator {
    messages: Mutex<Vec<String>>,
}

impl MemoryNarrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Narrator for MemoryNarrator {
    fn say(&self, message: &str) {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(message.to_string());
    }
}
