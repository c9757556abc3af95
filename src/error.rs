use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TypeTraceError {
    #[error("failed to initialize the device enumeration service: {0}")]
    DiscoveryFailed(#[source] io::Error),
    #[error("failed to bind the event source to the device context: {0}")]
    SourceInitFailed(String),
    #[error("failed to assign seat {seat}")]
    SeatAssignmentFailed { seat: String },
    #[error("failed to dispatch input events: {0}")]
    DispatchFailed(#[source] io::Error),
    #[error("failed to write key event: {0}")]
    EmissionFailed(#[source] io::Error),
    #[error("failed to open {}: {}", path.display(), io::Error::from_raw_os_error(*errno))]
    OpenRestricted { path: PathBuf, errno: i32 },
}

impl TypeTraceError {
    /// Build an [`TypeTraceError::OpenRestricted`] from the signed result of a
    /// [`DeviceGate::open`](crate::DeviceGate::open) call.
    pub fn open_restricted(path: impl Into<PathBuf>, errno: i32) -> Self {
        TypeTraceError::OpenRestricted {
            path: path.into(),
            errno: errno.abs(),
        }
    }

    /// The process exit status a fatal error of this kind terminates with.
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            TypeTraceError::DiscoveryFailed(_) => ExitStatus::UdevFailed,
            TypeTraceError::SeatAssignmentFailed { .. } => ExitStatus::SeatFailed,
            TypeTraceError::SourceInitFailed(_)
            | TypeTraceError::DispatchFailed(_)
            | TypeTraceError::EmissionFailed(_)
            | TypeTraceError::OpenRestricted { .. } => ExitStatus::LibinputFailed,
        }
    }
}

/// Exit codes of the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitStatus {
    NoError = 0,
    UdevFailed = 1,
    LibinputFailed = 2,
    SeatFailed = 3,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<ExitStatus> for std::process::ExitCode {
    fn from(status: ExitStatus) -> Self {
        std::process::ExitCode::from(status.code())
    }
}
