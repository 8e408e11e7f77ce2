//! Controller poll loop
//!
//! Drives [`ConnectionManager`] → [`DeviceHandle::read_report`] →
//! [`decode_report`] → [`StateStore`] on a dedicated thread.
//!
//! ## States
//! - `Disconnected`: no handle held, next step tries to connect
//! - `Connecting`: one acquisition attempt; absent → sleep and back to
//!   `Disconnected`, found → `Connected`
//! - `Connected`: one read per step; timeout keeps the state, a report is
//!   published, any other failure publishes the safe state, releases the
//!   handle and goes back to `Disconnected`
//!
//! There is no terminal state. If libusb itself is unavailable the loop
//! parks in `Disconnected` for the rest of the process.
//!
//! SPDX-License-Identifier: GPL-3.0

use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::report::{decode_report, ControllerState, REPORT_MIN_LEN};
use crate::store::{
    StateStore, BACKEND_UNAVAILABLE, CONTROLLER_NOT_FOUND, NO_DATA_AVAILABLE, NO_DATA_READ,
};
use crate::usb::{ConnectionManager, DeviceHandle, LinkError};

/// Name of the poll thread
pub const POLL_THREAD_NAME: &str = "f710-poll";

/// Observable link state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No handle held
    Disconnected,
    /// Next step attempts an acquisition
    Connecting,
    /// Handle held, reading reports
    Connected,
}

/// What the driver should do after a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Run the next step right away
    Continue,
    /// Sleep before the next step
    Sleep(Duration),
    /// Nothing will ever change, stop stepping
    Park,
}

enum Phase {
    Disconnected,
    Connecting,
    Connected(Box<dyn DeviceHandle>),
}

/// Single writer of the [`StateStore`]
pub struct PollLoop {
    manager: ConnectionManager,
    store: StateStore,
    phase: Phase,
    read_timeout: Duration,
    publish_full_data: bool,
    buf: Vec<u8>,
    /// libusb is gone for good
    parked: bool,
    /// "Waiting for controller" already logged for this outage
    absent_logged: bool,
}

impl PollLoop {
    pub fn new(
        manager: ConnectionManager,
        store: StateStore,
        read_timeout: Duration,
        publish_full_data: bool,
    ) -> Self {
        Self {
            manager,
            store,
            phase: Phase::Disconnected,
            read_timeout,
            publish_full_data,
            buf: vec![0u8; REPORT_MIN_LEN],
            parked: false,
            absent_logged: false,
        }
    }

    /// Build a poll loop from the daemon configuration
    pub fn from_config(manager: ConnectionManager, store: StateStore, config: &Config) -> Self {
        Self::new(manager, store, config.read_timeout(), config.publish_full_data)
    }

    /// Current link state
    pub fn state(&self) -> LinkState {
        match self.phase {
            Phase::Disconnected => LinkState::Disconnected,
            Phase::Connecting => LinkState::Connecting,
            Phase::Connected(_) => LinkState::Connected,
        }
    }

    /// Perform exactly one state transition
    pub fn step(&mut self) -> Step {
        if self.parked {
            return Step::Park;
        }

        match std::mem::replace(&mut self.phase, Phase::Disconnected) {
            Phase::Disconnected => {
                self.phase = Phase::Connecting;
                Step::Continue
            }
            Phase::Connecting => self.connect(),
            Phase::Connected(handle) => self.read(handle),
        }
    }

    fn connect(&mut self) -> Step {
        match self.manager.acquire() {
            Ok(Some(handle)) => {
                self.absent_logged = false;
                let size = handle.packet_size().max(REPORT_MIN_LEN);
                self.buf.resize(size, 0);
                // Replaces any "controller not found" text
                self.store.mark_connected(NO_DATA_AVAILABLE);
                self.phase = Phase::Connected(handle);
                Step::Continue
            }
            Ok(None) => {
                let delay = self.manager.retry_delay();
                if !self.absent_logged {
                    tracing::info!(
                        retry_ms = delay.as_millis() as u64,
                        "Waiting for F710 controller..."
                    );
                    self.absent_logged = true;
                } else {
                    tracing::debug!(retry_ms = delay.as_millis() as u64, "F710 controller still absent");
                }
                self.store.set_full_data(CONTROLLER_NOT_FOUND);
                self.phase = Phase::Disconnected;
                Step::Sleep(delay)
            }
            Err(e) => {
                tracing::error!(error = %e, "USB backend unavailable, controller polling disabled");
                self.store.reset(BACKEND_UNAVAILABLE);
                self.parked = true;
                self.phase = Phase::Disconnected;
                Step::Park
            }
        }
    }

    fn read(&mut self, mut handle: Box<dyn DeviceHandle>) -> Step {
        match self.next_report(handle.as_mut()) {
            Ok((state, len)) => {
                let raw = &self.buf[..len];
                tracing::trace!(report = ?raw, "Report received");
                let dump = if self.publish_full_data { Some(raw) } else { None };
                self.store.publish_report(state, dump);
                self.phase = Phase::Connected(handle);
                Step::Continue
            }
            Err(e) if e.ends_connection() => self.drop_connection(handle, e),
            Err(_) => {
                // Read timeout: nothing changed
                self.phase = Phase::Connected(handle);
                Step::Continue
            }
        }
    }

    /// Read and decode one report into `buf`
    fn next_report(&mut self, handle: &mut dyn DeviceHandle) -> Result<(ControllerState, usize), LinkError> {
        let len = handle.read_report(&mut self.buf, self.read_timeout)?;
        let state = decode_report(&self.buf[..len])?;
        Ok((state, len))
    }

    fn drop_connection(&mut self, handle: Box<dyn DeviceHandle>, error: LinkError) -> Step {
        tracing::warn!(
            device = %handle.device_id(),
            error = %error,
            "Controller connection lost, publishing safe state"
        );

        // Safe state and connected=false land in one store update
        self.store.reset(NO_DATA_READ);
        self.manager.release(handle);
        self.phase = Phase::Disconnected;
        Step::Sleep(self.manager.retry_delay())
    }

    /// Step forever
    pub fn run(mut self) {
        tracing::info!("Controller poll loop started");

        loop {
            match self.step() {
                Step::Continue => {}
                Step::Sleep(delay) => thread::sleep(delay),
                Step::Park => {
                    // Spurious wakeups just park again
                    thread::park();
                }
            }
        }
    }

    /// Run the loop on its own named thread
    pub fn spawn(self) -> std::io::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name(POLL_THREAD_NAME.to_string())
            .spawn(move || self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceId;
    use crate::store::Snapshot;
    use crate::usb::{UnavailableBackend, UsbBackend};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    const INITIAL: Duration = Duration::from_secs(5);
    const RECONNECT: Duration = Duration::from_millis(200);

    enum Read {
        Report(Vec<u8>),
        Timeout,
        Fail(LinkError),
    }

    struct ScriptHandle {
        id: DeviceId,
        reads: VecDeque<Read>,
        released: Arc<AtomicUsize>,
    }

    impl DeviceHandle for ScriptHandle {
        fn device_id(&self) -> &DeviceId {
            &self.id
        }

        fn packet_size(&self) -> usize {
            20
        }

        fn read_report(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, LinkError> {
            match self.reads.pop_front() {
                Some(Read::Report(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Read::Timeout) => Err(LinkError::ReadTimeout),
                Some(Read::Fail(e)) => Err(e),
                None => {
                    thread::sleep(timeout);
                    Err(LinkError::ReadTimeout)
                }
            }
        }

        fn release(self: Box<Self>) -> Result<(), LinkError> {
            self.released.fetch_add(1, Ordering::SeqCst);
            Err(LinkError::ReleaseFailure("already gone".into()))
        }
    }

    /// One entry per `open`: `Ok(Some(reads))` connects with that read script
    struct ScriptBackend {
        opens: VecDeque<Result<Option<Vec<Read>>, LinkError>>,
        released: Arc<AtomicUsize>,
    }

    impl UsbBackend for ScriptBackend {
        fn open(&mut self, _ids: &[DeviceId], _interface: u8) -> Result<Box<dyn DeviceHandle>, LinkError> {
            let reads = self
                .opens
                .pop_front()
                .unwrap_or(Ok(None))?
                .ok_or(LinkError::DeviceAbsent)?;
            Ok(Box::new(ScriptHandle {
                id: DeviceId::wireless(),
                reads: reads.into(),
                released: self.released.clone(),
            }))
        }
    }

    fn poll_loop(
        opens: Vec<Result<Option<Vec<Read>>, LinkError>>,
    ) -> (PollLoop, StateStore, Arc<AtomicUsize>) {
        let released = Arc::new(AtomicUsize::new(0));
        let backend = ScriptBackend {
            opens: opens.into(),
            released: released.clone(),
        };
        let manager = ConnectionManager::new(
            Box::new(backend),
            vec![DeviceId::wireless(), DeviceId::wired()],
            0,
            INITIAL,
            RECONNECT,
        );
        let store = StateStore::new();
        let poll = PollLoop::new(manager, store.clone(), Duration::from_millis(10), true);
        (poll, store, released)
    }

    /// Scenario report: LB + B, left stick (0.5, -0.5)
    fn pressed_report() -> Vec<u8> {
        vec![0, 0, 0x00, 0x21, 0x00, 0x00, 192, 0, 64, 0, 128, 0, 128]
    }

    fn connect(poll: &mut PollLoop) {
        assert_eq!(poll.step(), Step::Continue);
        assert_eq!(poll.state(), LinkState::Connecting);
        assert_eq!(poll.step(), Step::Continue);
        assert_eq!(poll.state(), LinkState::Connected);
    }

    #[test]
    fn test_absent_uses_initial_delay() {
        let (mut poll, store, _) = poll_loop(vec![Ok(None)]);

        assert_eq!(poll.state(), LinkState::Disconnected);
        assert_eq!(poll.step(), Step::Continue);
        assert_eq!(poll.state(), LinkState::Connecting);
        assert_eq!(poll.step(), Step::Sleep(INITIAL));
        assert_eq!(poll.state(), LinkState::Disconnected);

        let snapshot = store.snapshot();
        assert!(!snapshot.connected);
        assert_eq!(snapshot.state, ControllerState::SAFE);
        assert_eq!(snapshot.full_data, CONTROLLER_NOT_FOUND);
    }

    #[test]
    fn test_connect_sets_connected() {
        let (mut poll, store, _) = poll_loop(vec![Ok(None), Ok(Some(vec![Read::Timeout]))]);

        poll.step();
        poll.step();
        assert_eq!(store.snapshot().full_data, CONTROLLER_NOT_FOUND);

        connect(&mut poll);
        assert_eq!(poll.step(), Step::Continue);

        let snapshot = store.snapshot();
        assert!(snapshot.connected);
        assert_eq!(snapshot.state, ControllerState::SAFE);
        assert_eq!(snapshot.full_data, NO_DATA_AVAILABLE);
    }

    #[test]
    fn test_report_is_published() {
        let (mut poll, store, _) = poll_loop(vec![Ok(Some(vec![Read::Report(pressed_report())]))]);
        connect(&mut poll);

        assert_eq!(poll.step(), Step::Continue);
        assert_eq!(poll.state(), LinkState::Connected);

        let snapshot = store.snapshot();
        assert!(snapshot.connected);
        assert!(snapshot.state.left_bumper);
        assert!(snapshot.state.b);
        assert_eq!(snapshot.state.left_x, 0.5);
        assert_eq!(snapshot.state.left_y, -0.5);
        assert_eq!(snapshot.full_data, format!("{:?}", pressed_report()));
    }

    #[test]
    fn test_timeout_leaves_store_unchanged() {
        let (mut poll, store, released) = poll_loop(vec![Ok(Some(vec![
            Read::Report(pressed_report()),
            Read::Timeout,
        ]))]);
        connect(&mut poll);
        poll.step();

        let before: Snapshot = store.snapshot();
        assert_eq!(poll.step(), Step::Continue);
        assert_eq!(poll.state(), LinkState::Connected);
        assert_eq!(store.snapshot(), before);
        assert_eq!(released.load(Ordering::SeqCst), 0);
    }

    fn assert_connection_dropped(failure: Read) {
        let (mut poll, store, released) =
            poll_loop(vec![Ok(Some(vec![Read::Report(pressed_report()), failure]))]);
        connect(&mut poll);
        poll.step();
        assert!(store.state().left_bumper);

        assert_eq!(poll.step(), Step::Sleep(RECONNECT));
        assert_eq!(poll.state(), LinkState::Disconnected);

        let snapshot = store.snapshot();
        assert!(!snapshot.connected);
        assert_eq!(snapshot.state, ControllerState::SAFE);
        assert_eq!(snapshot.full_data, NO_DATA_READ);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disconnect_publishes_safe_state() {
        assert_connection_dropped(Read::Fail(LinkError::Disconnect("No such device".into())));
    }

    #[test]
    fn test_transport_fault_treated_as_disconnect() {
        assert_connection_dropped(Read::Fail(LinkError::Fault("Pipe error".into())));
    }

    #[test]
    fn test_short_report_treated_as_disconnect() {
        assert_connection_dropped(Read::Report(vec![0, 0, 0, 0x10]));
    }

    #[test]
    fn test_reconnect_after_disconnect() {
        let (mut poll, store, released) = poll_loop(vec![
            Ok(Some(vec![Read::Fail(LinkError::Disconnect("gone".into()))])),
            Ok(None),
            Ok(Some(vec![Read::Report(pressed_report())])),
        ]);

        connect(&mut poll);
        assert_eq!(poll.step(), Step::Sleep(RECONNECT));

        // Still absent: short delay now that it was seen once
        assert_eq!(poll.step(), Step::Continue);
        assert_eq!(poll.step(), Step::Sleep(RECONNECT));
        assert_eq!(store.snapshot().full_data, CONTROLLER_NOT_FOUND);

        connect(&mut poll);
        assert_eq!(poll.step(), Step::Continue);
        assert!(store.connected());
        assert!(store.state().b);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backend_unavailable_parks() {
        let (mut poll, store, _) = poll_loop(vec![
            Err(LinkError::TransportUnavailable("libusb missing".into())),
            Ok(Some(vec![])),
        ]);

        assert_eq!(poll.step(), Step::Continue);
        assert_eq!(poll.step(), Step::Park);
        assert_eq!(poll.state(), LinkState::Disconnected);

        // Never leaves Disconnected, even though a device would be available
        for _ in 0..3 {
            assert_eq!(poll.step(), Step::Park);
            assert_eq!(poll.state(), LinkState::Disconnected);
        }

        let snapshot = store.snapshot();
        assert!(!snapshot.connected);
        assert_eq!(snapshot.full_data, BACKEND_UNAVAILABLE);
    }

    #[test]
    fn test_libusb_init_failure_parks() {
        let manager = ConnectionManager::new(
            Box::new(UnavailableBackend::new("libusb_init failed")),
            vec![DeviceId::wireless()],
            0,
            INITIAL,
            RECONNECT,
        );
        let store = StateStore::new();
        let mut poll = PollLoop::new(manager, store.clone(), Duration::from_millis(10), true);

        assert_eq!(poll.step(), Step::Continue);
        assert_eq!(poll.step(), Step::Park);
        assert_eq!(poll.step(), Step::Park);
        assert_eq!(poll.state(), LinkState::Disconnected);

        let snapshot = store.snapshot();
        assert!(!snapshot.connected);
        assert_eq!(snapshot.full_data, BACKEND_UNAVAILABLE);
    }

    #[test]
    fn test_full_data_dump_disabled() {
        let released = Arc::new(AtomicUsize::new(0));
        let backend = ScriptBackend {
            opens: vec![Ok(Some(vec![Read::Report(pressed_report())]))].into(),
            released,
        };
        let manager =
            ConnectionManager::new(Box::new(backend), vec![DeviceId::wireless()], 0, INITIAL, RECONNECT);
        let store = StateStore::new();
        let mut poll = PollLoop::new(manager, store.clone(), Duration::from_millis(10), false);

        connect(&mut poll);
        poll.step();
        let snapshot = store.snapshot();
        assert!(snapshot.state.b);
        assert_eq!(snapshot.full_data, crate::store::NO_DATA_AVAILABLE);
    }

    #[test]
    fn test_spawned_loop_publishes() {
        let (poll, store, _) = poll_loop(vec![Ok(Some(vec![Read::Report(pressed_report())]))]);
        let handle = poll.spawn().unwrap();
        assert_eq!(handle.thread().name(), Some(POLL_THREAD_NAME));

        let deadline = Instant::now() + Duration::from_secs(5);
        while !store.state().b && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        assert!(store.connected());
        assert!(store.state().b);
    }
}
