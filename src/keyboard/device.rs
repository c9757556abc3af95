use std::fs;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use super::event_codes::{EV_KEY, EV_MSC, EV_REP, EV_SYN};

const IOC_NRBITS: libc::c_ulong = 8;
const IOC_TYPEBITS: libc::c_ulong = 8;
const IOC_SIZEBITS: libc::c_ulong = 14;
const IOC_NRSHIFT: libc::c_ulong = 0;
const IOC_TYPESHIFT: libc::c_ulong = IOC_NRSHIFT + IOC_NRBITS;
const IOC_SIZESHIFT: libc::c_ulong = IOC_TYPESHIFT + IOC_TYPEBITS;
const IOC_DIRSHIFT: libc::c_ulong = IOC_SIZESHIFT + IOC_SIZEBITS;
const IOC_READ: libc::c_ulong = 2;

/// Read the [`libc::input_event`s](libc::input_event) currently queued on `fd`.
///
/// `fd` must be non-blocking; an empty queue is reported as
/// [`io::ErrorKind::WouldBlock`].
pub(crate) fn read_input_events(fd: BorrowedFd<'_>) -> io::Result<Vec<libc::input_event>> {
    const MAX_INPUT_EV: usize = 128;

    let mut input_events = [mem::MaybeUninit::<libc::input_event>::uninit(); MAX_INPUT_EV];

    let n = unsafe {
        libc::read(
            fd.as_raw_fd(),
            input_events.as_mut_ptr() as *mut _,
            MAX_INPUT_EV * mem::size_of::<libc::input_event>(),
        )
    };

    if n < 0 {
        return Err(io::Error::last_os_error());
    }

    let n = (n as usize) / mem::size_of::<libc::input_event>();

    // The first n elements of the array are initialized:
    Ok(input_events[..n]
        .iter()
        .map(|e| unsafe { e.assume_init() })
        .collect())
}

/// Read the name of the specified input device using the `EVIOCGNAME` ioctl.
pub(crate) fn read_name(fd: BorrowedFd<'_>) -> io::Result<String> {
    const DEVICE_NAME_MAX_LEN: usize = 256;

    let mut device_name = [0u8; DEVICE_NAME_MAX_LEN];

    let eviocgname = (IOC_READ << IOC_DIRSHIFT)
        | (('E' as libc::c_ulong) << IOC_TYPESHIFT)
        | (0x06 << IOC_NRSHIFT)
        | ((device_name.len() as libc::c_ulong) << IOC_SIZESHIFT);

    ioctl(
        fd.as_raw_fd(),
        eviocgname,
        device_name.as_mut_ptr() as *mut libc::c_ulong,
    )?;

    let len = device_name
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(device_name.len());

    Ok(String::from_utf8_lossy(&device_name[..len]).into())
}

/// Read the event types supported by the specified device using the `EVIOCGBIT` ioctl.
pub(crate) fn read_event_flags(fd: BorrowedFd<'_>) -> io::Result<libc::c_ulong> {
    let mut ev_flags: libc::c_ulong = 0;

    let eviocgbit = (IOC_READ << IOC_DIRSHIFT)
        | (('E' as libc::c_ulong) << IOC_TYPESHIFT)
        | (0x20 << IOC_NRSHIFT)
        | (((mem::size_of::<libc::c_ulong>()) as libc::c_ulong) << IOC_SIZESHIFT);

    ioctl(
        fd.as_raw_fd(),
        eviocgbit,
        (&mut ev_flags) as *mut libc::c_ulong,
    )?;

    Ok(ev_flags)
}

/// Read the state of every key of the device into `keys` using the `EVIOCGKEY` ioctl.
///
/// Bit `n` of the bitmap is set when key code `n` is currently down.
pub(crate) fn read_key_state(fd: BorrowedFd<'_>, keys: &mut [libc::c_ulong]) -> io::Result<()> {
    let eviocgkey = (IOC_READ << IOC_DIRSHIFT)
        | (('E' as libc::c_ulong) << IOC_TYPESHIFT)
        | (0x18 << IOC_NRSHIFT)
        | ((mem::size_of_val(keys) as libc::c_ulong) << IOC_SIZESHIFT);

    ioctl(fd.as_raw_fd(), eviocgkey, keys.as_mut_ptr())
}

/// Check whether the specified `flags` indicate the device is a keyboard.
pub(crate) fn has_keyboard_flags(flags: libc::c_ulong) -> bool {
    const KEYBOARD_FLAGS: libc::c_ulong =
        (1 << EV_SYN) | (1 << EV_KEY) | (1 << EV_MSC) | (1 << EV_REP);

    (flags & KEYBOARD_FLAGS) == KEYBOARD_FLAGS
}

/// Get all character devices from `dir`, in name order.
pub(crate) fn find_char_devices(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut devices = fs::read_dir(dir)?
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let file_type = fs::metadata(entry.path()).ok()?.file_type();

            if file_type.is_char_device() {
                Some(entry.path())
            } else {
                None
            }
        })
        .collect::<Vec<_>>();

    devices.sort();

    Ok(devices)
}

fn ioctl(fd: RawFd, request: libc::c_ulong, buf: *mut libc::c_ulong) -> io::Result<()> {
    let res = unsafe { libc::ioctl(fd, request as _, buf) };

    if res < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
