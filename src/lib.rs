//! The backend of TypeTrace: captures key presses on Linux and streams them
//! to a front-end as JSON lines.
//!
//! Keyboards are discovered through a [`DeviceContext`] (udev with the
//! `libinput` feature, or the raw `/dev/input` nodes), which binds an
//! [`EventSource`] to a seat. Device files are only ever opened through a
//! [`DeviceGate`]. The [`KeyTracer`] run loop dispatches the source, keeps the
//! key presses and hands them to a [`KeyEventSink`], usually a [`JsonEmitter`]
//! writing one line per press:
//!
//! ```text
//! {"key_name": "KEY_A", "key_code": 30}
//! ```
//!
//! # Example
//!
//! Print the key presses of every keyboard on `seat0` to stdout until the
//! process is interrupted. Reading `/dev/input` usually needs root privileges.
//!
//! ```no_run
//! use std::io;
//!
//! use typetrace_backend::source::evdev::{DevInputContext, DEV_INPUT_DIR};
//! use typetrace_backend::{trace, Config, JsonEmitter, RestrictedGate, Shutdown};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let shutdown = Shutdown::new();
//!     tokio::spawn(shutdown.clone().on_signals());
//!
//!     let context = DevInputContext::new(RestrictedGate, DEV_INPUT_DIR);
//!     let emitter = JsonEmitter::new(io::stdout().lock());
//!     let status = trace(context, &Config::default(), emitter, &shutdown).await;
//!
//!     std::process::exit(status.code().into());
//! }
//! ```

#[cfg(not(target_os = "linux"))]
compile_error!("This crate only works on Linux");

pub mod cli;
pub mod emitter;
mod error;
mod gate;
pub mod keyboard;
pub mod source;
mod tracer;

pub use cli::Config;
pub use emitter::{EmittedRecord, JsonEmitter, KeyEventSink};
pub use error::{ExitStatus, TypeTraceError};
pub use gate::{DeviceGate, RestrictedGate};
pub use keyboard::{classify, KeyEvent, KeyState, RawEventKind, SourceEvent};
pub use source::{Backend, DeviceContext, EventSource};
pub use tracer::{trace, KeyTracer, Pacer, Shutdown};

pub type TypeTraceResult<T> = Result<T, TypeTraceError>;
