use std::path::Path;

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::stream::ByteStream;

/// Unix domain socket transport.
///
/// Used for device bridges and simulators that expose a board's REPL on a
/// filesystem socket instead of a tty.
pub struct UnixDomainSocket;

impl UnixDomainSocket {
    /// Maximum socket path length.
    /// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Connect to a listening Unix domain socket (blocking).
    pub fn connect(path: impl AsRef<Path>) -> Result<ByteStream> {
        let path = path.as_ref();

        let path_bytes = path.as_os_str().len();
        if path_bytes >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path: path.to_path_buf(),
                len: path_bytes,
                max: Self::MAX_PATH_LEN,
            });
        }

        let stream =
            std::os::unix::net::UnixStream::connect(path).map_err(|e| TransportError::Connect {
                target: path.display().to_string(),
                source: e,
            })?;
        debug!(?path, "connected to unix domain socket");
        Ok(ByteStream::from_unix(stream))
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::os::unix::net::UnixListener;

    use super::*;

    #[test]
    fn connect_and_exchange() {
        let dir = std::env::temp_dir().join(format!("replmux-uds-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let sock_path = dir.join("board.sock");
        let _ = std::fs::remove_file(&sock_path);
        let listener = UnixListener::bind(&sock_path).unwrap();

        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b">>> ").unwrap();
        });

        let mut stream = UnixDomainSocket::connect(&sock_path).unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b">>> ");

        server.join().unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn path_too_long_rejected() {
        let long = format!("/tmp/{}", "x".repeat(200));
        let err = UnixDomainSocket::connect(&long).unwrap_err();
        assert!(matches!(err, TransportError::PathTooLong { .. }));
    }

    #[test]
    fn missing_socket_is_connect_error() {
        let err = UnixDomainSocket::connect("/tmp/replmux-missing.sock").unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }
}
