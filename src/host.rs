//! Server addresses.
use crate::error::{Error::ArgumentError, Result};

use serde::de::{self, Deserialize, Deserializer};

use std::fmt;
use std::str::FromStr;

pub const DEFAULT_PORT: u16 = 27017;

/// Encapsulates the hostname and port of a host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Host {
    pub host_name: String,
    pub port: u16,
}

impl Host {
    /// Creates a new Host struct. The host name is lowercased.
    pub fn new(host_name: &str, port: u16) -> Host {
        Host {
            host_name: host_name.to_ascii_lowercase(),
            port,
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        if self.host_name.contains(':') {
            write!(fmt, "[{}]:{}", self.host_name, self.port)
        } else {
            write!(fmt, "{}:{}", self.host_name, self.port)
        }
    }
}

impl FromStr for Host {
    type Err = crate::error::Error;
    fn from_str(s: &str) -> Result<Self> {
        parse_host(s)
    }
}

impl<'de> Deserialize<'de> for Host {
    fn deserialize<D>(deserializer: D) -> ::std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_host(&s).map_err(de::Error::custom)
    }
}

// Parses an IPv6 literal host of the form [addr] or [addr]:port.
fn parse_ipv6_literal_host(entity: &str) -> Result<Host> {
    match entity.find(']') {
        Some(idx) => {
            let rest = &entity[idx + 1..];
            if rest.is_empty() {
                Ok(Host::new(&entity[1..idx], DEFAULT_PORT))
            } else if rest.starts_with(':') {
                match rest[1..].parse::<u16>() {
                    Ok(val) => Ok(Host::new(&entity[1..idx], val)),
                    Err(_) => Err(ArgumentError("Port must be an integer.".to_owned())),
                }
            } else {
                Err(ArgumentError(format!("Invalid host '{}'.", entity)))
            }
        }
        None => Err(ArgumentError(
            "An IPv6 address must be enclosed in '[' and ']' according to RFC 2732.".to_owned(),
        )),
    }
}

/// Parses a host entity of the form host or host:port, and redirects IPv6 entities.
/// All host names are lowercased.
pub fn parse_host(entity: &str) -> Result<Host> {
    if entity.is_empty() {
        return Err(ArgumentError("Empty host.".to_owned()));
    }

    if entity.starts_with('[') {
        parse_ipv6_literal_host(entity)
    } else if let Some(idx) = entity.find(':') {
        let (host, port) = (&entity[..idx], &entity[idx + 1..]);
        if port.contains(':') {
            return Err(ArgumentError(
                "An IPv6 address literal must be enclosed in '[' and ']' according to RFC 2732."
                    .to_owned(),
            ));
        }
        match port.parse::<u16>() {
            Ok(val) => Ok(Host::new(host, val)),
            Err(_) => Err(ArgumentError("Port must be an unsigned integer.".to_owned())),
        }
    } else {
        Ok(Host::new(entity, DEFAULT_PORT))
    }
}
