use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::dcs::DbState;

/// State every adapter shares: identity, the sticky startup flag and the
/// per-cycle snapshot cache.
#[derive(Debug)]
pub struct DbManagerBase {
    engine: String,
    member_name: String,
    startup_ready: AtomicBool,
    db_state: Mutex<Option<DbState>>,
}

impl DbManagerBase {
    pub fn new(engine: impl Into<String>, member_name: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            member_name: member_name.into(),
            startup_ready: AtomicBool::new(false),
            db_state: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &str {
        &self.engine
    }

    pub fn member_name(&self) -> &str {
        &self.member_name
    }

    pub fn is_startup_ready(&self) -> bool {
        self.startup_ready.load(Ordering::Acquire)
    }

    pub fn mark_startup_ready(&self) {
        self.startup_ready.store(true, Ordering::Release);
    }

    /// Cached snapshot from the current HA cycle, if one was taken.
    pub fn db_state(&self) -> Option<DbState> {
        self.db_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn store_db_state(&self, state: DbState) {
        *self.db_state.lock().unwrap_or_else(PoisonError::into_inner) = Some(state);
    }

    pub fn reset_db_state(&self) {
        *self.db_state.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
