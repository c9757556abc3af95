//! Keyboards read straight from the kernel's evdev nodes.
//!
//! This backend needs neither udev nor libinput. It applies the same key
//! filtering libinput does for keyboards, so both backends produce the same
//! stream for the same typing.

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::io;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::{DeviceContext, EventSource, DEFAULT_SEAT};
use crate::error::TypeTraceError;
use crate::gate::DeviceGate;
use crate::keyboard::device::{
    find_char_devices, has_keyboard_flags, read_event_flags, read_input_events, read_key_state,
    read_name,
};
use crate::keyboard::event_codes::{EV_SYN, KEY_CNT, SYN_DROPPED, SYN_REPORT};
use crate::keyboard::{KeyEvent, KeyState, RawEventKind, SourceEvent};
use crate::TypeTraceResult;

/// Where the kernel exposes input event nodes.
pub const DEV_INPUT_DIR: &str = "/dev/input";

/// How often the input directory is scanned again for keyboards plugged in
/// after the seat was assigned.
pub const RESCAN_PERIOD: Duration = Duration::from_secs(1);

const OPEN_FLAGS: i32 = libc::O_RDONLY | libc::O_NONBLOCK | libc::O_CLOEXEC;

/// A device context backed by a directory of evdev nodes.
#[derive(Debug)]
pub struct DevInputContext<G> {
    gate: G,
    dir: PathBuf,
    rescan_period: Duration,
}

impl<G: DeviceGate> DevInputContext<G> {
    /// Create a context over the event nodes in `dir` (usually [`DEV_INPUT_DIR`]).
    pub fn new(gate: G, dir: impl Into<PathBuf>) -> TypeTraceResult<Self> {
        let dir = dir.into();

        fs::read_dir(&dir).map_err(TypeTraceError::DiscoveryFailed)?;
        debug!("Input device directory {} is readable.", dir.display());

        Ok(Self {
            gate,
            dir,
            rescan_period: RESCAN_PERIOD,
        })
    }

    /// Scan for new keyboards at most once per `period` (zero: on every dispatch).
    pub fn with_rescan_period(mut self, period: Duration) -> Self {
        self.rescan_period = period;
        self
    }
}

impl<G: DeviceGate> DeviceContext for DevInputContext<G> {
    type Source = EvdevSource<G>;

    fn open_source(&mut self) -> TypeTraceResult<Self::Source> {
        if !self.dir.is_dir() {
            return Err(TypeTraceError::SourceInitFailed(format!(
                "{} is not a directory",
                self.dir.display()
            )));
        }

        Ok(EvdevSource {
            gate: self.gate.clone(),
            dir: self.dir.clone(),
            rescan_period: self.rescan_period,
            last_scan: None,
            seat: None,
            probed: HashSet::new(),
            devices: Vec::new(),
            queue: VecDeque::new(),
        })
    }
}

/// A raw event produced by [`EvdevSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvdevEvent {
    /// A keyboard was opened.
    DeviceAdded(PathBuf),
    /// A keyboard disappeared and was closed.
    DeviceRemoved(PathBuf),
    /// A key transition.
    Key(KeyEvent),
}

impl SourceEvent for EvdevEvent {
    fn kind(&self) -> RawEventKind {
        match self {
            EvdevEvent::Key(key) => RawEventKind::KeyboardKey(*key),
            EvdevEvent::DeviceAdded(_) | EvdevEvent::DeviceRemoved(_) => RawEventKind::Other,
        }
    }
}

/// Reads key events from every keyboard in a [`DevInputContext`].
#[derive(Debug)]
pub struct EvdevSource<G: DeviceGate> {
    gate: G,
    dir: PathBuf,
    rescan_period: Duration,
    last_scan: Option<Instant>,
    seat: Option<String>,
    /// Nodes already looked at, keyboards or not.
    probed: HashSet<PathBuf>,
    devices: Vec<Keyboard>,
    queue: VecDeque<EvdevEvent>,
}

impl<G: DeviceGate> EvdevSource<G> {
    /// The paths of the keyboards currently open.
    pub fn devices(&self) -> impl Iterator<Item = &Path> {
        self.devices.iter().map(|kb| kb.path.as_path())
    }

    /// Open `path` through the gate and keep it if it is a keyboard.
    fn open_keyboard(&mut self, path: &Path) -> Option<Keyboard> {
        let fd = match self.gate.open(path, OPEN_FLAGS) {
            Ok(fd) => fd,
            Err(errno) => {
                debug!("Skipping {}", TypeTraceError::open_restricted(path, errno));
                return None;
            }
        };

        match read_event_flags(fd.as_fd()) {
            Ok(flags) if has_keyboard_flags(flags) => {}
            Ok(_) => {
                self.gate.close(fd);
                return None;
            }
            Err(e) => {
                debug!("Skipping {}: {}", path.display(), e);
                self.gate.close(fd);
                return None;
            }
        }

        let name = read_name(fd.as_fd()).unwrap_or_default();
        info!("Keyboard added: {} ({})", name, path.display());

        Some(Keyboard {
            path: path.to_owned(),
            fd,
            keys: KeyFilter::default(),
        })
    }

    /// Open the nodes of `paths` that were not looked at yet.
    fn probe(&mut self, paths: Vec<PathBuf>) {
        self.last_scan = Some(Instant::now());
        // A node that went away may come back with another device behind it.
        self.probed.retain(|path| paths.contains(path));

        for path in paths {
            if !self.probed.insert(path.clone()) {
                continue;
            }

            if let Some(keyboard) = self.open_keyboard(&path) {
                self.queue.push_back(EvdevEvent::DeviceAdded(path));
                self.devices.push(keyboard);
            }
        }
    }

    fn rescan_due(&self) -> bool {
        self.last_scan
            .map_or(true, |at| at.elapsed() >= self.rescan_period)
    }

    fn rescan(&mut self) {
        match find_char_devices(&self.dir) {
            Ok(paths) => self.probe(paths),
            Err(e) => {
                warn!("Cannot scan {}: {}", self.dir.display(), e);
                self.last_scan = Some(Instant::now());
            }
        }
    }
}

impl<G: DeviceGate> EventSource for EvdevSource<G> {
    type Event = EvdevEvent;

    fn assign_seat(&mut self, seat: &str) -> TypeTraceResult<()> {
        let failed = || TypeTraceError::SeatAssignmentFailed {
            seat: seat.to_owned(),
        };

        if self.seat.is_some() {
            warn!("A seat is already assigned.");
            return Err(failed());
        }

        // Without udev there are no seat tags: every device is on the default seat.
        if seat != DEFAULT_SEAT {
            warn!("The evdev backend only provides {DEFAULT_SEAT}.");
            return Err(failed());
        }

        let paths = find_char_devices(&self.dir).map_err(|e| {
            warn!("Cannot scan {}: {}", self.dir.display(), e);
            failed()
        })?;

        self.probe(paths);

        if self.devices.is_empty() {
            warn!("No keyboard on {seat} could be opened yet.");
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

        if self.rescan_due() {
            self.rescan();
        }

        let mut i = 0;
        while i < self.devices.len() {
            match self.devices[i].read_pending(&mut self.queue) {
                Ok(()) => i += 1,
                Err(e) if e.raw_os_error() == Some(libc::ENODEV) => {
                    let keyboard = self.devices.remove(i);
                    info!("Keyboard removed: {}", keyboard.path.display());
                    self.probed.remove(&keyboard.path);
                    self.queue
                        .push_back(EvdevEvent::DeviceRemoved(keyboard.path));
                    self.gate.close(keyboard.fd);
                }
                Err(e) => return Err(TypeTraceError::DispatchFailed(e)),
            }
        }

        Ok(())
    }

    fn next_event(&mut self) -> Option<Self::Event> {
        self.queue.pop_front()
    }
}

impl<G: DeviceGate> Drop for EvdevSource<G> {
    fn drop(&mut self) {
        while let Some(keyboard) = self.devices.pop() {
            self.gate.close(keyboard.fd);
        }
    }
}

/// An open keyboard device.
#[derive(Debug)]
struct Keyboard {
    path: PathBuf,
    fd: OwnedFd,
    keys: KeyFilter,
}

impl Keyboard {
    /// Queue every key transition the device has pending.
    fn read_pending(&mut self, queue: &mut VecDeque<EvdevEvent>) -> io::Result<()> {
        let fd = self.fd.as_fd();

        loop {
            let events = match read_input_events(fd) {
                Ok(events) => events,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            if events.is_empty() {
                return Ok(());
            }

            self.keys.filter(&events, || KeysDown::read(fd), queue);
        }
    }
}

/// Turns the raw records of one device into key transitions.
#[derive(Debug, Default)]
struct KeyFilter {
    keys_down: KeysDown,
    /// Set by `SYN_DROPPED` until the next `SYN_REPORT`.
    dropping: bool,
}

impl KeyFilter {
    /// Queue the key transitions found in `events`.
    ///
    /// After a `SYN_DROPPED` the records up to the next `SYN_REPORT` are
    /// incomplete and discarded. The key state is then read again with
    /// `current` and every key whose state changed meanwhile is queued as a
    /// transition.
    fn filter<F>(
        &mut self,
        events: &[libc::input_event],
        mut current: F,
        queue: &mut VecDeque<EvdevEvent>,
    ) where
        F: FnMut() -> io::Result<KeysDown>,
    {
        for ev in events {
            if ev.type_ == EV_SYN as u16 {
                match ev.code {
                    SYN_DROPPED => {
                        debug!("Input records were dropped, resyncing the key state.");
                        self.dropping = true;
                    }
                    SYN_REPORT if self.dropping => {
                        self.dropping = false;
                        let now = current().unwrap_or_else(|e| {
                            debug!("Cannot read the key state: {e}");
                            KeysDown::default()
                        });
                        queue.extend(self.keys_down.resync(now).into_iter().map(EvdevEvent::Key));
                    }
                    _ => {}
                }
                continue;
            }

            if self.dropping {
                continue;
            }

            if let Some(key) = KeyEvent::from_input_event(ev) {
                if self.keys_down.update(&key) {
                    queue.push_back(EvdevEvent::Key(key));
                }
            }
        }
    }
}

const LONG_BITS: usize = libc::c_ulong::BITS as usize;

/// The keys currently held down on one device, laid out like the kernel's
/// key bitmap.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct KeysDown([libc::c_ulong; KEY_CNT / LONG_BITS]);

impl KeysDown {
    /// The keys the device reports as down right now.
    fn read(fd: BorrowedFd<'_>) -> io::Result<Self> {
        let mut keys = Self::default();
        read_key_state(fd, &mut keys.0)?;

        Ok(keys)
    }

    fn slot(code: usize) -> (usize, libc::c_ulong) {
        (code / LONG_BITS, 1 << (code % LONG_BITS))
    }

    fn is_down(&self, code: usize) -> bool {
        let (word, bit) = Self::slot(code);
        self.0[word] & bit != 0
    }

    /// Record `key` and report whether it is a real transition.
    ///
    /// A press of a key that is already down and a release of a key that is
    /// not down are dropped, the same way libinput does.
    fn update(&mut self, key: &KeyEvent) -> bool {
        let code = key.code as usize;
        if code >= KEY_CNT {
            return true;
        }

        let (word, bit) = Self::slot(code);
        let is_down = self.0[word] & bit != 0;

        match key.state {
            KeyState::Pressed if !is_down => {
                self.0[word] |= bit;
                true
            }
            KeyState::Released if is_down => {
                self.0[word] &= !bit;
                true
            }
            _ => false,
        }
    }

    /// Adopt `now` and return the transitions from the old state, in code order.
    fn resync(&mut self, now: KeysDown) -> Vec<KeyEvent> {
        let changes = (0..KEY_CNT)
            .filter(|&code| self.is_down(code) != now.is_down(code))
            .map(|code| {
                let state = if now.is_down(code) {
                    KeyState::Pressed
                } else {
                    KeyState::Released
                };
                KeyEvent::new(code as u32, state)
            })
            .collect();

        *self = now;

        changes
    }
}
