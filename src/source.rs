//! Device contexts and the event sources bound to them.

pub mod evdev;
#[cfg(feature = "libinput")]
pub mod libinput;
#[cfg(any(test, feature = "mock"))]
pub mod mock;

use std::fmt;
use std::str::FromStr;

use crate::keyboard::SourceEvent;
use crate::TypeTraceResult;

/// The seat every process is assigned to unless told otherwise.
pub const DEFAULT_SEAT: &str = "seat0";

/// The OS's view of the attached input devices.
///
/// A context owns the [`DeviceGate`](crate::DeviceGate) it was built with and
/// passes it on to the event source it binds.
pub trait DeviceContext {
    type Source: EventSource;

    /// Bind a new event source to this context.
    fn open_source(&mut self) -> TypeTraceResult<Self::Source>;
}

/// Turns device activity into a FIFO queue of raw events.
pub trait EventSource {
    type Event: SourceEvent;

    /// Assign the source to `seat`. Can only succeed once.
    fn assign_seat(&mut self, seat: &str) -> TypeTraceResult<()>;

    /// Move the pending device activity into the event queue.
    fn dispatch(&mut self) -> TypeTraceResult<()>;

    /// Pop the oldest queued event. The event is released when dropped.
    fn next_event(&mut self) -> Option<Self::Event>;
}

/// The device access backends the daemon can run with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// udev device discovery and libinput event processing.
    #[cfg(feature = "libinput")]
    Libinput,
    /// Raw `/dev/input` event nodes.
    Evdev,
}

impl Default for Backend {
    #[cfg(feature = "libinput")]
    fn default() -> Self {
        Backend::Libinput
    }

    #[cfg(not(feature = "libinput"))]
    fn default() -> Self {
        Backend::Evdev
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            #[cfg(feature = "libinput")]
            "libinput" => Ok(Backend::Libinput),
            #[cfg(not(feature = "libinput"))]
            "libinput" => Err("backend `libinput` is not compiled in".into()),
            "evdev" => Ok(Backend::Evdev),
            other => Err(format!("unknown backend `{other}`")),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(feature = "libinput")]
            Backend::Libinput => f.write_str("libinput"),
            Backend::Evdev => f.write_str("evdev"),
        }
    }
}
