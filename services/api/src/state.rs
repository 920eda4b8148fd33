use crate::config::Config;
use crate::db::Db;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;
use vocab_core::TurnWorkflow;

/// Shared application state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Db>,
    pub workflow: Arc<TurnWorkflow>,
    pub config: Arc<Config>,
    turn_locks: Arc<Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>>,
}

impl AppState {
    pub fn new(db: Arc<Db>, workflow: Arc<TurnWorkflow>, config: Arc<Config>) -> Self {
        Self {
            db,
            workflow,
            config,
            turn_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the per-room lock that serializes chat turns.
    pub fn turn_lock(&self, room_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.turn_locks.lock().expect("turn lock map poisoned");
        locks
            .entry(room_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drops the lock entry for a room that no longer exists.
    pub fn forget_turn_lock(&self, room_id: Uuid) {
        let mut locks = self.turn_locks.lock().expect("turn lock map poisoned");
        locks.remove(&room_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_lock_is_shared_per_room() {
        let locks: Arc<Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let room = Uuid::new_v4();

        let first = {
            let mut map = locks.lock().unwrap();
            map.entry(room)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let second = {
            let mut map = locks.lock().unwrap();
            map.entry(room)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };

        assert!(Arc::ptr_eq(&first, &second));
    }
}
