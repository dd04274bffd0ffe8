use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::ByteStream;

/// Serial line transport.
///
/// Opens a tty device and switches it to raw 8N1 mode with no flow control,
/// so control bytes such as Ctrl-C and Ctrl-D reach the board untouched.
pub struct SerialPort;

impl SerialPort {
    /// Baud rate used by most MicroPython boards.
    pub const DEFAULT_BAUD: u32 = crate::DEFAULT_BAUD;

    /// Open the device at `path` at the given baud rate.
    pub fn open(path: impl AsRef<Path>, baud: u32) -> Result<ByteStream> {
        let path = path.as_ref();
        let speed = baud_to_speed(baud)?;

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(path)
            .map_err(|e| TransportError::Open {
                path: path.to_path_buf(),
                source: e,
            })?;

        configure_raw(file.as_raw_fd(), speed).map_err(|e| TransportError::Configure {
            path: path.to_path_buf(),
            source: e,
        })?;

        info!(?path, baud, "opened serial line");
        Ok(ByteStream::from_serial(SerialLine::new(file)))
    }
}

/// How often a blocked serial reader checks whether the line was closed.
const STOP_CHECK_MS: libc::c_int = 100;

/// An open tty shared with the readers cloned from it.
///
/// A tty read does not return when another descriptor for the same device
/// is closed, so readers poll and stop once the line is dropped.
pub(crate) struct SerialLine {
    file: File,
    stop: Arc<AtomicBool>,
}

impl SerialLine {
    fn new(file: File) -> Self {
        Self {
            file,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn reader(&self) -> io::Result<SerialReader> {
        Ok(SerialReader {
            file: self.file.try_clone()?,
            stop: Arc::clone(&self.stop),
        })
    }
}

impl Read for SerialLine {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for SerialLine {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Drop for SerialLine {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// Read half of a [`SerialLine`]. Reports end of stream once the line is dropped.
pub(crate) struct SerialReader {
    file: File,
    stop: Arc<AtomicBool>,
}

impl Read for SerialReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.stop.load(Ordering::Acquire) {
                return Ok(0);
            }
            let mut pfd = libc::pollfd {
                fd: self.file.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            };
            // SAFETY: `pfd` is one valid pollfd for a descriptor this reader owns.
            let ready = unsafe { libc::poll(&mut pfd, 1, STOP_CHECK_MS) };
            if ready < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            if ready > 0 {
                return self.file.read(buf);
            }
        }
    }
}

fn baud_to_speed(baud: u32) -> Result<libc::speed_t> {
    let speed = match baud {
        1200 => libc::B1200,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115_200 => libc::B115200,
        230_400 => libc::B230400,
        other => return Err(TransportError::UnsupportedBaud(other)),
    };
    Ok(speed)
}

fn configure_raw(fd: libc::c_int, speed: libc::speed_t) -> std::io::Result<()> {
    let mut tio = std::mem::MaybeUninit::<libc::termios>::uninit();

    // SAFETY: `fd` is an open descriptor owned by the caller and `tio` points to
    // writable storage of the right size; tcgetattr fully initializes it on success.
    if unsafe { libc::tcgetattr(fd, tio.as_mut_ptr()) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: tcgetattr returned 0 above.
    let mut tio = unsafe { tio.assume_init() };

    // SAFETY: `tio` is a valid, initialized termios value.
    unsafe { libc::cfmakeraw(&mut tio) };
    tio.c_cflag |= libc::CLOCAL | libc::CREAD;
    tio.c_cflag &= !(libc::CSTOPB | libc::PARENB | libc::CRTSCTS);
    tio.c_iflag &= !(libc::IXON | libc::IXOFF | libc::IXANY);
    tio.c_cc[libc::VMIN] = 1;
    tio.c_cc[libc::VTIME] = 0;

    // SAFETY: `tio` is valid; the speed constants come from libc.
    let rc = unsafe {
        let rc_in = libc::cfsetispeed(&mut tio, speed);
        let rc_out = libc::cfsetospeed(&mut tio, speed);
        if rc_in != 0 || rc_out != 0 {
            -1
        } else {
            libc::tcsetattr(fd, libc::TCSANOW, &tio)
        }
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }

    // Drop whatever was queued before the line settings took effect.
    // SAFETY: `fd` is open; TCIFLUSH only discards pending input.
    unsafe { libc::tcflush(fd, libc::TCIFLUSH) };
    debug!("serial line configured raw 8N1");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::os::fd::FromRawFd;
    use std::path::PathBuf;
    use std::thread;

    use super::*;
    use crate::ByteTransport;

    /// Open a pseudo-terminal; returns the master and the slave's path.
    #[cfg(target_os = "linux")]
    fn open_pty() -> (File, PathBuf) {
        // SAFETY: plain pty setup calls; every return value is checked and the
        // name buffer outlives the CStr read from it.
        unsafe {
            let master = libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY);
            assert!(master >= 0, "posix_openpt failed");
            assert_eq!(libc::grantpt(master), 0);
            assert_eq!(libc::unlockpt(master), 0);
            let mut name = [0 as libc::c_char; 128];
            assert_eq!(libc::ptsname_r(master, name.as_mut_ptr(), name.len()), 0);
            let path = std::ffi::CStr::from_ptr(name.as_ptr())
                .to_string_lossy()
                .into_owned();
            (File::from_raw_fd(master), PathBuf::from(path))
        }
    }

    #[cfg(target_os = "linux")]
    fn descriptors_for(path: &Path) -> usize {
        std::fs::read_dir("/proc/self/fd")
            .unwrap()
            .filter_map(|entry| std::fs::read_link(entry.ok()?.path()).ok())
            .filter(|target| target.as_path() == path)
            .count()
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn pty_roundtrip_in_raw_mode() {
        let (mut master, slave) = open_pty();
        let mut stream = SerialPort::open(&slave, 115_200).unwrap();

        master.write_all(b"\x03>>> ").unwrap();
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"\x03>>> ");

        stream.write_all(b"\x01").unwrap();
        let mut byte = [0u8; 1];
        master.read_exact(&mut byte).unwrap();
        assert_eq!(byte, [0x01]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn close_ends_blocked_reader_and_releases_device() {
        let (_master, slave) = open_pty();
        let mut stream = SerialPort::open(&slave, 115_200).unwrap();
        let mut reader = stream.try_clone_reader().unwrap();
        assert_eq!(descriptors_for(&slave), 2);

        let blocked = thread::spawn(move || {
            let mut buf = [0u8; 16];
            reader.read(&mut buf)
        });
        stream.close().unwrap();

        assert_eq!(blocked.join().unwrap().unwrap(), 0);
        assert_eq!(descriptors_for(&slave), 0);
    }

    #[test]
    fn standard_rates_are_supported() {
        for baud in [9600, 57600, 115_200, 230_400] {
            assert!(baud_to_speed(baud).is_ok(), "{baud} should be supported");
        }
    }

    #[test]
    fn odd_rate_rejected() {
        assert!(matches!(
            baud_to_speed(12345),
            Err(TransportError::UnsupportedBaud(12345))
        ));
    }

    #[test]
    fn missing_device_reports_path() {
        let err = SerialPort::open("/dev/replmux-does-not-exist", 115_200).unwrap_err();
        assert!(matches!(err, TransportError::Open { ref path, .. }
            if path == Path::new("/dev/replmux-does-not-exist")));
    }

    #[test]
    fn regular_file_is_not_a_tty() {
        let path = std::env::temp_dir().join(format!("replmux-not-a-tty-{}", std::process::id()));
        std::fs::write(&path, b"").unwrap();

        let err = SerialPort::open(&path, 115_200).unwrap_err();
        assert!(matches!(err, TransportError::Configure { .. }));

        let _ = std::fs::remove_file(&path);
    }
}
