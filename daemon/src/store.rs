//! Shared controller state
//!
//! Single writer (the poll thread), any number of readers. Readers get a
//! copy and never wait on USB I/O; the lock is only held for the copy.
//!
//! SPDX-License-Identifier: GPL-3.0

use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};

use crate::report::{format_raw, ControllerState};

/// `full-data` text before the first report
pub const NO_DATA_AVAILABLE: &str = "no data available";

/// `full-data` text while the controller cannot be found
pub const CONTROLLER_NOT_FOUND: &str = "controller not found";

/// `full-data` text after a failed read
pub const NO_DATA_READ: &str = "no data read";

/// `full-data` text when libusb cannot be initialised
pub const BACKEND_UNAVAILABLE: &str = "USB backend unavailable";

/// Consistent view of everything the daemon publishes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    /// Latest decoded state, or the safe state
    pub state: ControllerState,
    /// True while a controller is claimed
    pub connected: bool,
    /// Last raw report or a status message
    pub full_data: String,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            state: ControllerState::SAFE,
            connected: false,
            full_data: NO_DATA_AVAILABLE.to_string(),
        }
    }
}

/// Thread-safe holder of the latest [`Snapshot`]
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    inner: Arc<RwLock<Snapshot>>,
}

impl StateStore {
    /// Create a store holding the safe state
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace state and connectivity in one update
    pub fn publish(&self, state: ControllerState, connected: bool) {
        self.update(|snapshot| {
            snapshot.state = state;
            snapshot.connected = connected;
        });
    }

    /// Publish a freshly decoded report together with its raw bytes
    ///
    /// `raw` is `None` when the diagnostic dump is disabled.
    pub fn publish_report(&self, state: ControllerState, raw: Option<&[u8]>) {
        let full_data = raw.map(format_raw);
        self.update(|snapshot| {
            snapshot.state = state;
            snapshot.connected = true;
            if let Some(text) = full_data {
                snapshot.full_data = text;
            }
        });
    }

    /// Safe state with `connected = true` and a fresh status text
    pub fn mark_connected(&self, status: &str) {
        self.update(|snapshot| {
            snapshot.state = ControllerState::SAFE;
            snapshot.connected = true;
            status.clone_into(&mut snapshot.full_data);
        });
    }

    /// Drop to the safe state with `connected = false`
    pub fn reset(&self, reason: &str) {
        self.update(|snapshot| {
            snapshot.state = ControllerState::SAFE;
            snapshot.connected = false;
            reason.clone_into(&mut snapshot.full_data);
        });
    }

    /// Update only the diagnostic text
    pub fn set_full_data(&self, text: &str) {
        self.update(|snapshot| text.clone_into(&mut snapshot.full_data));
    }

    /// Copy of the current snapshot
    pub fn snapshot(&self) -> Snapshot {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Copy of the current controller state
    pub fn state(&self) -> ControllerState {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).state
    }

    /// Current connectivity flag
    pub fn connected(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .connected
    }

    fn update(&self, apply: impl FnOnce(&mut Snapshot)) {
        // Snapshot is plain data, a poisoned lock still holds a usable value
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        apply(&mut *guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn pressed_state() -> ControllerState {
        ControllerState {
            a: true,
            dpad_left: true,
            right_trigger: true,
            left_x: 0.5,
            right_y: -1.0,
            ..ControllerState::SAFE
        }
    }

    #[test]
    fn test_initial_snapshot_is_safe() {
        let store = StateStore::new();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.state, ControllerState::SAFE);
        assert!(!snapshot.connected);
        assert_eq!(snapshot.full_data, NO_DATA_AVAILABLE);
    }

    #[test]
    fn test_publish_round_trip() {
        let store = StateStore::new();
        let state = pressed_state();
        store.publish(state, true);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.state, state);
        assert!(snapshot.connected);
        assert_eq!(store.state(), state);
        assert!(store.connected());
    }

    #[test]
    fn test_publish_report_sets_full_data() {
        let store = StateStore::new();
        store.publish_report(pressed_state(), Some(&[1, 2, 3]));
        let snapshot = store.snapshot();
        assert!(snapshot.connected);
        assert_eq!(snapshot.full_data, "[1, 2, 3]");

        // Dump disabled keeps the previous text
        store.publish_report(ControllerState::SAFE, None);
        assert_eq!(store.snapshot().full_data, "[1, 2, 3]");
    }

    #[test]
    fn test_reset_returns_to_safe_state() {
        let store = StateStore::new();
        store.publish(pressed_state(), true);
        store.reset(NO_DATA_READ);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.state, ControllerState::SAFE);
        assert!(!snapshot.connected);
        assert_eq!(snapshot.full_data, NO_DATA_READ);
    }

    #[test]
    fn test_mark_connected_replaces_status() {
        let store = StateStore::new();
        store.set_full_data(CONTROLLER_NOT_FOUND);
        store.mark_connected(NO_DATA_AVAILABLE);

        let snapshot = store.snapshot();
        assert!(snapshot.connected);
        assert_eq!(snapshot.state, ControllerState::SAFE);
        assert_eq!(snapshot.full_data, NO_DATA_AVAILABLE);
    }

    #[test]
    fn test_clones_share_state() {
        let store = StateStore::new();
        let reader = store.clone();
        store.publish(pressed_state(), true);
        assert_eq!(reader.state(), pressed_state());
    }

    #[test]
    fn test_concurrent_readers_never_see_torn_state() {
        let store = StateStore::new();
        let on = ControllerState {
            left_bumper: true,
            right_bumper: true,
            left_x: 0.5,
            right_x: 0.5,
            ..ControllerState::SAFE
        };

        let writer = {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..2_000 {
                    if i % 2 == 0 {
                        store.publish(on, true);
                    } else {
                        store.publish(ControllerState::SAFE, false);
                    }
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                let on = on;
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        let snapshot = store.snapshot();
                        if snapshot.connected {
                            assert_eq!(snapshot.state, on);
                        } else {
                            assert_eq!(snapshot.state, ControllerState::SAFE);
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
