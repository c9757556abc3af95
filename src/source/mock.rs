//! Scripted device context for tests.
//!
//! [`MockContext`] replays a fixed sequence of dispatch results, and
//! [`EventLedger`] counts how many events were handed out and released so
//! tests can check nothing leaks between dispatches.
//!
//! Only built for tests and with the `mock` feature.

use std::cell::{Cell, RefCell};
use std::collections::{HashSet, VecDeque};
use std::io;
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use super::{DeviceContext, EventSource};
use crate::error::TypeTraceError;
use crate::gate::{DeviceGate, RestrictedGate};
use crate::keyboard::{KeyEvent, KeyState, RawEventKind, SourceEvent};
use crate::tracer::Shutdown;
use crate::TypeTraceResult;

/// A gate that opens real files but counts every open and close, and can be
/// told to deny paths.
#[derive(Debug, Clone, Default)]
pub struct MockGate {
    state: Rc<RefCell<GateState>>,
}

#[derive(Debug, Default)]
struct GateState {
    denied: HashSet<PathBuf>,
    opened: usize,
    closed: usize,
}

impl MockGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every open of `path` fail with `EACCES`.
    pub fn deny(self, path: impl Into<PathBuf>) -> Self {
        self.state.borrow_mut().denied.insert(path.into());
        self
    }

    /// Number of successful opens.
    pub fn opened(&self) -> usize {
        self.state.borrow().opened
    }

    /// Number of closes.
    pub fn closed(&self) -> usize {
        self.state.borrow().closed
    }
}

impl DeviceGate for MockGate {
    fn open(&mut self, path: &Path, flags: i32) -> Result<OwnedFd, i32> {
        if self.state.borrow().denied.contains(path) {
            return Err(-libc::EACCES);
        }

        let fd = RestrictedGate.open(path, flags)?;
        self.state.borrow_mut().opened += 1;

        Ok(fd)
    }

    fn close(&mut self, fd: OwnedFd) {
        self.state.borrow_mut().closed += 1;
        RestrictedGate.close(fd);
    }
}

/// Shared counters of the events a [`MockSource`] hands out.
#[derive(Debug, Clone, Default)]
pub struct EventLedger(Rc<LedgerCounts>);

#[derive(Debug, Default)]
struct LedgerCounts {
    dispatches: Cell<usize>,
    popped: Cell<usize>,
    released: Cell<usize>,
    leaks: Cell<usize>,
}

impl EventLedger {
    /// Number of `dispatch` calls.
    pub fn dispatches(&self) -> usize {
        self.0.dispatches.get()
    }

    /// Number of events popped from the queue.
    pub fn popped(&self) -> usize {
        self.0.popped.get()
    }

    /// Number of popped events that were released.
    pub fn released(&self) -> usize {
        self.0.released.get()
    }

    /// Number of `dispatch` calls made while a popped event was still alive.
    pub fn leaks(&self) -> usize {
        self.0.leaks.get()
    }
}

/// One scripted answer to [`EventSource::dispatch`].
#[derive(Debug)]
pub enum MockDispatch {
    /// Dispatch succeeds and queues these events.
    Events(Vec<RawEventKind>),
    /// Dispatch fails with an I/O error of this kind.
    Fail(io::ErrorKind),
}

/// A device context with scripted seats, devices and dispatch results.
#[derive(Debug)]
pub struct MockContext<G = MockGate> {
    gate: G,
    seats: Vec<String>,
    devices: Vec<PathBuf>,
    script: VecDeque<MockDispatch>,
    source_init_fails: bool,
    shutdown: Option<Shutdown>,
    ledger: EventLedger,
}

impl<G: DeviceGate> MockContext<G> {
    /// A context offering `seat0` and no devices.
    pub fn new(gate: G) -> Self {
        Self {
            gate,
            seats: vec![super::DEFAULT_SEAT.to_owned()],
            devices: Vec::new(),
            script: VecDeque::new(),
            source_init_fails: false,
            shutdown: None,
            ledger: EventLedger::default(),
        }
    }

    /// Offer only the given seats.
    pub fn with_seats(mut self, seats: &[&str]) -> Self {
        self.seats = seats.iter().map(|s| s.to_string()).collect();
        self
    }

    /// A device file the source opens through the gate once a seat is assigned.
    pub fn with_device(mut self, path: impl Into<PathBuf>) -> Self {
        self.devices.push(path.into());
        self
    }

    /// Make [`DeviceContext::open_source`] fail.
    pub fn failing_source_init(mut self) -> Self {
        self.source_init_fails = true;
        self
    }

    /// Queue a successful dispatch.
    pub fn then_events(mut self, events: Vec<RawEventKind>) -> Self {
        self.script.push_back(MockDispatch::Events(events));
        self
    }

    /// Queue a failing dispatch.
    pub fn then_failure(mut self, kind: io::ErrorKind) -> Self {
        self.script.push_back(MockDispatch::Fail(kind));
        self
    }

    /// Trigger `shutdown` once the script is exhausted.
    pub fn shutdown_when_drained(mut self, shutdown: &Shutdown) -> Self {
        self.shutdown = Some(shutdown.clone());
        self
    }

    pub fn ledger(&self) -> EventLedger {
        self.ledger.clone()
    }
}

impl<G: DeviceGate> DeviceContext for MockContext<G> {
    type Source = MockSource<G>;

    fn open_source(&mut self) -> TypeTraceResult<Self::Source> {
        if self.source_init_fails {
            return Err(TypeTraceError::SourceInitFailed(
                "mock source init failure".into(),
            ));
        }

        Ok(MockSource {
            gate: self.gate.clone(),
            seats: self.seats.clone(),
            device_paths: self.devices.clone(),
            devices: Vec::new(),
            seat: None,
            script: std::mem::take(&mut self.script),
            queue: VecDeque::new(),
            shutdown: self.shutdown.clone(),
            ledger: self.ledger.clone(),
        })
    }
}

/// The event source bound by a [`MockContext`].
#[derive(Debug)]
pub struct MockSource<G: DeviceGate> {
    gate: G,
    seats: Vec<String>,
    device_paths: Vec<PathBuf>,
    devices: Vec<OwnedFd>,
    seat: Option<String>,
    script: VecDeque<MockDispatch>,
    queue: VecDeque<RawEventKind>,
    shutdown: Option<Shutdown>,
    ledger: EventLedger,
}

impl<G: DeviceGate> EventSource for MockSource<G> {
    type Event = MockEvent;

    fn assign_seat(&mut self, seat: &str) -> TypeTraceResult<()> {
        if self.seat.is_some() || !self.seats.iter().any(|s| s == seat) {
            return Err(TypeTraceError::SeatAssignmentFailed {
                seat: seat.to_owned(),
            });
        }

        for path in &self.device_paths {
            // A denied device is skipped, like a real source does.
            if let Ok(fd) = self.gate.open(path, libc::O_RDONLY | libc::O_CLOEXEC) {
                self.devices.push(fd);
            }
        }
        self.seat = Some(seat.to_owned());

        Ok(())
    }

    fn dispatch(&mut self) -> TypeTraceResult<()> {
        if self.seat.is_none() {
            return Err(TypeTraceError::DispatchFailed(io::Error::new(
                io::ErrorKind::Other,
                "no seat assigned",
            )));
        }

        let counts = &self.ledger.0;
        counts.dispatches.set(counts.dispatches.get() + 1);
        if counts.popped.get() != counts.released.get() {
            counts.leaks.set(counts.leaks.get() + 1);
        }

        match self.script.pop_front() {
            Some(MockDispatch::Events(events)) => {
                self.queue.extend(events);
                Ok(())
            }
            Some(MockDispatch::Fail(kind)) => Err(TypeTraceError::DispatchFailed(kind.into())),
            None => {
                if let Some(shutdown) = &self.shutdown {
                    shutdown.trigger();
                }
                Ok(())
            }
        }
    }

    fn next_event(&mut self) -> Option<Self::Event> {
        let kind = self.queue.pop_front()?;
        let counts = &self.ledger.0;
        counts.popped.set(counts.popped.get() + 1);

        Some(MockEvent {
            kind,
            ledger: self.ledger.clone(),
        })
    }
}

impl<G: DeviceGate> Drop for MockSource<G> {
    fn drop(&mut self) {
        while let Some(fd) = self.devices.pop() {
            self.gate.close(fd);
        }
    }
}

/// An event popped from a [`MockSource`]; dropping it counts as a release.
#[derive(Debug)]
pub struct MockEvent {
    kind: RawEventKind,
    ledger: EventLedger,
}

impl SourceEvent for MockEvent {
    fn kind(&self) -> RawEventKind {
        self.kind
    }
}

impl Drop for MockEvent {
    fn drop(&mut self) {
        let counts = &self.ledger.0;
        counts.released.set(counts.released.get() + 1);
    }
}

/// A key press of `code`.
pub fn press(code: u32) -> RawEventKind {
    RawEventKind::KeyboardKey(KeyEvent::new(code, KeyState::Pressed))
}

/// A key release of `code`.
pub fn release(code: u32) -> RawEventKind {
    RawEventKind::KeyboardKey(KeyEvent::new(code, KeyState::Released))
}

/// A non-keyboard event.
pub fn other() -> RawEventKind {
    RawEventKind::Other
}
