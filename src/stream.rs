//! Establishing byte streams to servers.
use crate::host::Host;

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// A connected, bidirectional byte stream.
pub trait Stream: Read + Write + Send {}

impl<T: Read + Write + Send> Stream for T {}

/// Encapsulates the functionality for how to connect to the server.
pub trait StreamConnector: Send + Sync {
    fn connect(&self, host: &Host) -> io::Result<Box<dyn Stream>>;
}

/// Connect to the server through a regular TCP stream.
#[derive(Clone, Debug, Default)]
pub struct TcpConnector {
    /// Maximum time to wait for each resolved address to accept, if any.
    pub connect_timeout: Option<Duration>,
}

impl TcpConnector {
    pub fn new() -> TcpConnector {
        TcpConnector::default()
    }

    pub fn with_timeout(timeout: Duration) -> TcpConnector {
        TcpConnector {
            connect_timeout: Some(timeout),
        }
    }
}

impl StreamConnector for TcpConnector {
    fn connect(&self, host: &Host) -> io::Result<Box<dyn Stream>> {
        let timeout = match self.connect_timeout {
            Some(timeout) => timeout,
            None => {
                let stream = TcpStream::connect((&host.host_name[..], host.port))?;
                stream.set_nodelay(true)?;
                return Ok(Box::new(stream));
            }
        };

        let mut last_err = None;
        for addr in (&host.host_name[..], host.port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(Box::new(stream));
                }
                Err(err) => last_err = Some(err),
            }
        }

        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("could not resolve {}", host),
            )
        }))
    }
}
