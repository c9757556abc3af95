//! udev device discovery with libinput event processing.

use std::os::fd::OwnedFd;
use std::path::Path;

use input::event::keyboard::{KeyState as LibinputKeyState, KeyboardEventTrait};
use input::event::KeyboardEvent;
use input::{AsRaw, Event, Libinput, LibinputInterface};
use log::{debug, warn};

use super::{DeviceContext, EventSource};
use crate::error::TypeTraceError;
use crate::gate::DeviceGate;
use crate::keyboard::{KeyEvent, KeyState, RawEventKind, SourceEvent};
use crate::TypeTraceResult;

/// Routes libinput's device opens through a [`DeviceGate`].
struct GateInterface<G>(G);

impl<G: DeviceGate> LibinputInterface for GateInterface<G> {
    fn open_restricted(&mut self, path: &Path, flags: i32) -> Result<OwnedFd, i32> {
        self.0.open(path, flags)
    }

    fn close_restricted(&mut self, fd: OwnedFd) {
        self.0.close(fd)
    }
}

/// A device context backed by udev.
///
/// The handle only proves that udev is reachable: libinput opens its own
/// udev connection when the source is bound.
pub struct UdevContext<G> {
    gate: G,
    _udev: udev::Udev,
}

impl<G: DeviceGate> UdevContext<G> {
    pub fn new(gate: G) -> TypeTraceResult<Self> {
        let udev = udev::Udev::new().map_err(TypeTraceError::DiscoveryFailed)?;
        debug!("udev initialized successfully.");

        Ok(Self { gate, _udev: udev })
    }
}

impl<G: DeviceGate> DeviceContext for UdevContext<G> {
    type Source = LibinputSource;

    fn open_source(&mut self) -> TypeTraceResult<Self::Source> {
        let input = Libinput::new_with_udev(GateInterface(self.gate.clone()));

        if let Err(e) = ensure_created(input.as_raw()) {
            // A null context must never reach libinput_unref.
            std::mem::forget(input);
            return Err(e);
        }
        debug!("libinput context created.");

        Ok(LibinputSource { input, seat: None })
    }
}

/// libinput reports a failed context creation with a null pointer.
fn ensure_created<T>(raw: *const T) -> TypeTraceResult<()> {
    if raw.is_null() {
        return Err(TypeTraceError::SourceInitFailed(
            "libinput_udev_create_context failed".into(),
        ));
    }

    Ok(())
}

/// An event source reading from a udev-backed libinput context.
pub struct LibinputSource {
    input: Libinput,
    seat: Option<String>,
}

impl EventSource for LibinputSource {
    type Event = Event;

    fn assign_seat(&mut self, seat: &str) -> TypeTraceResult<()> {
        let failed = || TypeTraceError::SeatAssignmentFailed {
            seat: seat.to_owned(),
        };

        if self.seat.is_some() {
            warn!("A seat is already assigned.");
            return Err(failed());
        }

        self.input.udev_assign_seat(seat).map_err(|()| failed())?;
        self.seat = Some(seat.to_owned());

        Ok(())
    }

    fn dispatch(&mut self) -> TypeTraceResult<()> {
        self.input.dispatch().map_err(TypeTraceError::DispatchFailed)
    }

    fn next_event(&mut self) -> Option<Self::Event> {
        self.input.next()
    }
}

impl SourceEvent for Event {
    fn kind(&self) -> RawEventKind {
        match self {
            Event::Keyboard(KeyboardEvent::Key(key)) => {
                let state = if key.key_state() == LibinputKeyState::Pressed {
                    KeyState::Pressed
                } else {
                    KeyState::Released
                };

                RawEventKind::KeyboardKey(KeyEvent::new(key.key(), state))
            }
            _ => RawEventKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_context_is_a_source_init_failure() {
        let err = ensure_created(std::ptr::null::<u8>()).unwrap_err();

        assert!(matches!(err, TypeTraceError::SourceInitFailed(_)));
        assert_eq!(err.exit_status().code(), 2);
    }

    #[test]
    fn created_context_is_accepted() {
        let context = 0u8;

        assert!(ensure_created(&context as *const u8).is_ok());
    }
}
