//! Error types for topology monitoring, server selection and connection pooling.
use crate::host::Host;

use bson::oid;

use std::{error, fmt, io, sync};

/// A type for results generated by this crate.
pub type Result<T> = ::std::result::Result<T, Error>;

// Server error codes that indicate the node is no longer a writable primary.
const NOT_WRITABLE_PRIMARY_CODES: [i32; 3] = [
    10107, // NotWritablePrimary
    13435, // NotPrimaryNoSecondaryOk
    10058, // LegacyNotPrimary
];

// Server error codes that indicate the node is in an unusable state.
const RECOVERING_CODES: [i32; 5] = [
    91,    // ShutdownInProgress
    189,   // PrimarySteppedDown
    11600, // InterruptedAtShutdown
    11602, // InterruptedDueToReplStateChange
    13436, // NotPrimaryOrSecondary
];

const SHUTTING_DOWN_CODES: [i32; 2] = [
    91,    // ShutdownInProgress
    11600, // InterruptedAtShutdown
];

/// The error type for topology, selection and pool operations.
#[derive(Debug)]
pub enum Error {
    /// Invalid configuration or arguments supplied by the caller.
    ArgumentError(String),
    /// A handshake or command reply could not be interpreted.
    ResponseError(String),
    /// An operation required a primary, but the topology currently has none.
    NoPrimaryAvailable,
    /// No server in the topology satisfies the read preference.
    NoServerAvailable(String),
    /// Server selection did not find a suitable server before its deadline.
    ServerSelectionTimeout(String),
    /// A server reports a wire version range the driver cannot speak.
    IncompatibleServer(String),
    /// A checkout request waited longer than the wait queue timeout.
    WaitQueueTimeout(Host),
    /// The connection pool for the given host has been closed.
    PoolClosed(Host),
    /// A new connection to the given host could not be established.
    ConnectionError(Host, io::Error),
    /// A network failure observed while running a command.
    NetworkError(io::Error),
    /// A server reported a command failure.
    CommandError { code: i32, message: String },
    /// An internal lock has been poisoned.
    LockError,
}

impl Error {
    /// Returns true if server selection may succeed when retried against a
    /// newer topology description.
    pub fn is_retryable_selection(&self) -> bool {
        match *self {
            Error::NoPrimaryAvailable | Error::NoServerAvailable(_) => true,
            _ => false,
        }
    }

    /// Returns true if the error was produced by the network layer.
    pub fn is_network_error(&self) -> bool {
        match *self {
            Error::NetworkError(_) | Error::ConnectionError(..) => true,
            _ => false,
        }
    }

    /// Returns true if the error is a network timeout rather than a broken connection.
    pub fn is_network_timeout(&self) -> bool {
        match *self {
            Error::NetworkError(ref err) | Error::ConnectionError(_, ref err) => {
                err.kind() == io::ErrorKind::TimedOut || err.kind() == io::ErrorKind::WouldBlock
            }
            _ => false,
        }
    }

    /// Returns true for "not primary" style server errors.
    pub fn is_not_primary(&self) -> bool {
        match *self {
            Error::CommandError { code, .. } => NOT_WRITABLE_PRIMARY_CODES.contains(&code),
            _ => false,
        }
    }

    /// Returns true for "node is recovering" style server errors.
    pub fn is_recovering(&self) -> bool {
        match *self {
            Error::CommandError { code, .. } => RECOVERING_CODES.contains(&code),
            _ => false,
        }
    }

    /// Returns true if the server reported that it is shutting down.
    pub fn is_shutting_down(&self) -> bool {
        match *self {
            Error::CommandError { code, .. } => SHUTTING_DOWN_CODES.contains(&code),
            _ => false,
        }
    }

    /// Returns true if the error indicates that the server's state changed
    /// such that the topology must re-evaluate it.
    pub fn is_state_change_error(&self) -> bool {
        self.is_not_primary() || self.is_recovering()
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::NetworkError(err)
    }
}

impl From<oid::Error> for Error {
    fn from(err: oid::Error) -> Error {
        Error::ResponseError(format!("invalid ObjectId: {}", err))
    }
}

impl<T> From<sync::PoisonError<T>> for Error {
    fn from(_: sync::PoisonError<T>) -> Error {
        Error::LockError
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::ArgumentError(ref inner) => inner.fmt(fmt),
            Error::ResponseError(ref inner) => inner.fmt(fmt),
            Error::NoPrimaryAvailable => write!(fmt, "No primary server is available."),
            Error::NoServerAvailable(ref reason) => {
                write!(fmt, "No suitable servers available: {}", reason)
            }
            Error::ServerSelectionTimeout(ref inner) => {
                write!(fmt, "Server selection timed out: {}", inner)
            }
            Error::IncompatibleServer(ref inner) => inner.fmt(fmt),
            Error::WaitQueueTimeout(ref host) => write!(
                fmt,
                "Timed out while checking out a connection from the pool for {}.",
                host
            ),
            Error::PoolClosed(ref host) => write!(fmt, "The connection pool for {} is closed.", host),
            Error::ConnectionError(ref host, ref inner) => {
                write!(fmt, "Failed to connect to {}: {}", host, inner)
            }
            Error::NetworkError(ref inner) => inner.fmt(fmt),
            Error::CommandError { code, ref message } => {
                write!(fmt, "Command failed ({}): {}", code, message)
            }
            Error::LockError => write!(fmt, "Lock poisoned."),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::ConnectionError(_, ref inner) | Error::NetworkError(ref inner) => Some(inner),
            _ => None,
        }
    }
}
