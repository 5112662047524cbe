use std::{
    fmt,
    net::{IpAddr, SocketAddr},
    str::FromStr,
};

use crate::error::ParseError;

/// A `host:port` pair handed to `adb connect` / `adb disconnect`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let host = host
            .trim()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        Self { host, port }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The address string adb expects, with IPv6 hosts bracketed.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn is_loopback(&self) -> bool {
        if self.host.eq_ignore_ascii_case("localhost") {
            return true;
        }
        self.host
            .parse::<IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl FromStr for Endpoint {
    type Err = ParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidEndpoint(raw.to_string());
        let addr = strip_family_prefix(raw.trim());
        let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        let endpoint = Endpoint::new(host, port);
        if endpoint.host.is_empty() {
            return Err(invalid());
        }
        Ok(endpoint)
    }
}

/// Drops an address-family tag such as `InterNetwork/` that some endpoint renderers
/// put in front of `host:port`.
pub fn strip_family_prefix(raw: &str) -> &str {
    if let Some((family, rest)) = raw.split_once('/') {
        let is_family = family
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
            && family.chars().all(|c| c.is_ascii_alphanumeric());
        if is_family {
            return rest;
        }
    }
    raw
}
