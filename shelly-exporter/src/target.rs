//! Target identity and address normalization.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors produced while parsing a target address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    #[error("target address is empty")]
    Empty,
    #[error("invalid target address '{0}': {1}")]
    Invalid(String, &'static str),
}

/// A device address (host or IP, optional port).
///
/// The inner string is the normalized identity key: lowercase, without
/// scheme or trailing slash. Two targets are the same device iff their
/// identities are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Target(String);

impl Target {
    /// Parse and normalize a target address.
    pub fn parse(raw: &str) -> Result<Self, TargetError> {
        let mut addr = raw.trim();
        for scheme in ["http://", "https://"] {
            if addr
                .get(..scheme.len())
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
            {
                addr = &addr[scheme.len()..];
                break;
            }
        }
        let addr = addr.trim_end_matches('/');

        if addr.is_empty() {
            return Err(TargetError::Empty);
        }
        if addr.contains('/') {
            return Err(TargetError::Invalid(raw.to_string(), "paths are not allowed"));
        }
        if addr.chars().any(|c| c.is_whitespace() || c == '@' || c == '?') {
            return Err(TargetError::Invalid(raw.to_string(), "unexpected character"));
        }

        let port = if let Some(rest) = addr.strip_prefix('[') {
            let (_, after) = rest
                .split_once(']')
                .ok_or_else(|| TargetError::Invalid(raw.to_string(), "unterminated IPv6 literal"))?;
            after.strip_prefix(':')
        } else {
            match addr.split_once(':') {
                Some((host, port)) if !host.is_empty() => Some(port),
                Some(_) => return Err(TargetError::Invalid(raw.to_string(), "missing host")),
                None => None,
            }
        };
        if let Some(port) = port
            && port.parse::<u16>().is_err()
        {
            return Err(TargetError::Invalid(raw.to_string(), "invalid port"));
        }

        Ok(Self(addr.to_ascii_lowercase()))
    }

    /// The normalized identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build the device URL for an API path such as `/status`.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}/{}", self.0, path.trim_start_matches('/'))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Target {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Target {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Target {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Target::parse(&raw).map_err(serde::de::Error::custom)
    }
}
