pub(crate) mod device;
pub mod event_codes;

use std::fmt;

use event_codes::{key_name, EV_KEY, EV_KEY_PRESS, EV_KEY_RELEASE};

/// The name reported for key codes without a symbolic name.
pub const UNKNOWN_KEY_NAME: &str = "unknown";

/// The state of a key after a key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    /// The key was pressed.
    Pressed,
    /// The key was released.
    Released,
}

/// A key transition (EV_KEY) reported by a keyboard device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    /// The key code of the key that triggered the event.
    pub code: u32,
    /// Whether the key went down or up.
    pub state: KeyState,
    /// The symbolic name of `code`, once translated.
    pub name: Option<&'static str>,
}

impl KeyEvent {
    pub fn new(code: u32, state: KeyState) -> Self {
        Self {
            code,
            state,
            name: None,
        }
    }

    /// Look up the symbolic name of the key code.
    pub fn translated(self) -> Self {
        Self {
            name: key_name(self.code),
            ..self
        }
    }

    /// The symbolic name of the key, or [`UNKNOWN_KEY_NAME`].
    pub fn key_name(&self) -> &'static str {
        self.name.unwrap_or(UNKNOWN_KEY_NAME)
    }

    /// Convert a raw kernel input event into a key transition.
    ///
    /// Only press and release records of type `EV_KEY` are key transitions;
    /// autorepeat records (`value == 2`) and every other event type yield `None`.
    pub(crate) fn from_input_event(ev: &libc::input_event) -> Option<Self> {
        if ev.type_ != EV_KEY as u16 {
            return None;
        }

        let state = match ev.value {
            EV_KEY_RELEASE => KeyState::Released,
            EV_KEY_PRESS => KeyState::Pressed,
            _ => return None,
        };

        Some(Self::new(u32::from(ev.code), state))
    }
}

/// What a raw event from an event source turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawEventKind {
    /// A keyboard key transition.
    KeyboardKey(KeyEvent),
    /// Any other event type (device added/removed, pointer motion...).
    Other,
}

/// A unit of device activity popped from an [`EventSource`](crate::EventSource).
///
/// The event is released when it is dropped.
pub trait SourceEvent: fmt::Debug {
    fn kind(&self) -> RawEventKind;
}

/// Decide whether `event` is a key press worth emitting.
///
/// Non-keyboard events and key releases yield `None`. Key presses come back
/// with their symbolic name looked up; codes without a name are still
/// returned and report [`UNKNOWN_KEY_NAME`].
pub fn classify<E: SourceEvent + ?Sized>(event: &E) -> Option<KeyEvent> {
    match event.kind() {
        RawEventKind::KeyboardKey(key) if key.state == KeyState::Pressed => Some(key.translated()),
        RawEventKind::KeyboardKey(_) | RawEventKind::Other => None,
    }
}
