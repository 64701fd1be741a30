//! Serialises tests that touch process environment variables.

use std::sync::{Mutex, MutexGuard, OnceLock};

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

/// Snapshot of a fixed set of variables, cleared on creation and restored on
/// drop. Holding it also holds the process-wide env lock.
pub struct ScopedEnv {
    _lock: MutexGuard<'static, ()>,
    saved: Vec<(&'static str, Option<String>)>,
}

impl ScopedEnv {
    pub fn cleared(keys: &[&'static str]) -> Self {
        let lock = ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let saved = keys
            .iter()
            .map(|&key| {
                let prev = std::env::var(key).ok();
                std::env::remove_var(key);
                (key, prev)
            })
            .collect();
        Self { _lock: lock, saved }
    }

    /// Only keys passed to `cleared` may be set, so all of them get restored.
    pub fn set(&self, key: &'static str, value: &str) {
        assert!(
            self.saved.iter().any(|(k, _)| *k == key),
            "{key} not managed by this scope"
        );
        std::env::set_var(key, value);
    }
}

impl Drop for ScopedEnv {
    fn drop(&mut self) {
        for (key, prev) in self.saved.drain(..) {
            match prev {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
        }
    }
}
