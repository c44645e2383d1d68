//! Endpoint descriptor: immutable identification of a remote service

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EndpointParseError {
    #[error("endpoint address is empty")]
    Empty,

    #[error("network address {0:?} is missing a port")]
    MissingPort(String),
}

/// The two address forms a peer can be reached at: a filesystem-path-style
/// local channel, or a `host:port` network address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointAddress {
    Local(PathBuf),
    Network(String),
}

impl FromStr for EndpointAddress {
    type Err = EndpointParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(EndpointParseError::Empty);
        }
        if s.starts_with('/') || s.starts_with('.') {
            return Ok(EndpointAddress::Local(PathBuf::from(s)));
        }
        // Anything else must be host:port
        match s.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(EndpointAddress::Network(s.to_string()))
            }
            _ => Err(EndpointParseError::MissingPort(s.to_string())),
        }
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointAddress::Local(path) => write!(f, "{}", path.display()),
            EndpointAddress::Network(addr) => write!(f, "{addr}"),
        }
    }
}

/// Immutable identification of a remote service: where to dial, and
/// optionally which named service to target once connected.
#[derive(Debug, Clone)]
pub struct Endpoint {
    address: EndpointAddress,
    service: Option<String>,
}

impl Endpoint {
    pub fn new(address: EndpointAddress) -> Self {
        Self {
            address,
            service: None,
        }
    }

    /// Target a named service behind the channel (the "callsign" of the
    /// plugin-hosted flavor).
    pub fn with_service(address: EndpointAddress, service: impl Into<String>) -> Self {
        Self {
            address,
            service: Some(service.into()),
        }
    }

    pub fn address(&self) -> &EndpointAddress {
        &self.address
    }

    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.service {
            Some(service) => write!(f, "{}#{}", self.address, service),
            None => write!(f, "{}", self.address),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_local_path() {
        let addr: EndpointAddress = "/tmp/tether-communicator".parse().unwrap();
        assert_eq!(
            addr,
            EndpointAddress::Local(PathBuf::from("/tmp/tether-communicator"))
        );
    }

    #[test]
    fn test_parse_network_address() {
        let addr: EndpointAddress = "127.0.0.1:55555".parse().unwrap();
        assert_eq!(addr, EndpointAddress::Network("127.0.0.1:55555".to_string()));
    }

    #[test]
    fn test_parse_rejects_missing_port() {
        let result: Result<EndpointAddress, _> = "example.com".parse();
        assert!(matches!(result, Err(EndpointParseError::MissingPort(_))));
    }

    #[test]
    fn test_parse_rejects_empty() {
        let result: Result<EndpointAddress, _> = "".parse();
        assert_eq!(result, Err(EndpointParseError::Empty));
    }

    #[test]
    fn test_endpoint_display_includes_service() {
        let endpoint = Endpoint::with_service(
            "127.0.0.1:55555".parse().unwrap(),
            "SimpleService",
        );
        assert_eq!(endpoint.to_string(), "127.0.0.1:55555#SimpleService");
        assert_eq!(endpoint.service(), Some("SimpleService"));
    }
}
