//! Item identifiers.
//!
//! Published items are addressed by OPC UA style node ids such as
//! `"ns=2;s=Boiler.Temperature"` or `"i=2258"`. This module provides parsing,
//! formatting and the null check the data store relies on.
//!
//! Parsing is hand-written segment matching; no regex is needed for a grammar
//! this small.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The identifier part of a node id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Identifier {
    /// `i=<u32>`
    Numeric(u32),
    /// `s=<text>`
    String(String),
    /// `g=<8-4-4-4-12 hex>`, kept lower-case
    Guid(String),
    /// `b=<base64 text>`, kept as written
    Opaque(String),
}

/// An item identifier: namespace index plus identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    namespace: u16,
    identifier: Identifier,
}

const NIL_GUID: &str = "00000000-0000-0000-0000-000000000000";

impl NodeId {
    pub fn new(namespace: u16, identifier: Identifier) -> Self {
        Self {
            namespace,
            identifier,
        }
    }

    pub fn numeric(namespace: u16, value: u32) -> Self {
        Self::new(namespace, Identifier::Numeric(value))
    }

    pub fn string(namespace: u16, value: &str) -> Self {
        Self::new(namespace, Identifier::String(value.to_string()))
    }

    /// The null node id (`ns=0;i=0`).
    pub fn null() -> Self {
        Self::numeric(0, 0)
    }

    pub fn namespace(&self) -> u16 {
        self.namespace
    }

    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// The null node id: namespace 0 with the zero value of its identifier
    /// type (`i=0`, empty string, nil GUID, empty opaque).
    pub fn is_null(&self) -> bool {
        self.namespace == 0 && self.has_zero_identifier()
    }

    /// True if the node id cannot address an item.
    ///
    /// Covers the null node id plus empty string and opaque identifiers in
    /// any namespace. Numeric 0 and the nil GUID are valid outside namespace 0.
    pub fn is_empty(&self) -> bool {
        match &self.identifier {
            Identifier::String(s) => s.is_empty(),
            Identifier::Opaque(b) => b.is_empty(),
            _ => self.is_null(),
        }
    }

    fn has_zero_identifier(&self) -> bool {
        match &self.identifier {
            Identifier::Numeric(v) => *v == 0,
            Identifier::String(s) => s.is_empty(),
            Identifier::Guid(g) => g == NIL_GUID,
            Identifier::Opaque(b) => b.is_empty(),
        }
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.namespace != 0 {
            write!(f, "ns={};", self.namespace)?;
        }
        match &self.identifier {
            Identifier::Numeric(v) => write!(f, "i={v}"),
            Identifier::String(s) => write!(f, "s={s}"),
            Identifier::Guid(g) => write!(f, "g={g}"),
            Identifier::Opaque(b) => write!(f, "b={b}"),
        }
    }
}

impl FromStr for NodeId {
    type Err = NodeIdError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if text.is_empty() {
            return Err(NodeIdError::Empty);
        }

        let (namespace, rest) = match text.strip_prefix("ns=") {
            Some(after) => {
                let (ns, rest) = after
                    .split_once(';')
                    .ok_or_else(|| NodeIdError::MissingIdentifier(text.to_string()))?;
                let ns = ns
                    .parse::<u16>()
                    .map_err(|_| NodeIdError::InvalidNamespace(ns.to_string()))?;
                (ns, rest)
            }
            None => (0, text),
        };

        let (kind, value) = rest
            .split_once('=')
            .ok_or_else(|| NodeIdError::MissingIdentifier(text.to_string()))?;

        let identifier = match kind {
            "i" => Identifier::Numeric(
                value
                    .parse::<u32>()
                    .map_err(|_| NodeIdError::InvalidNumeric(value.to_string()))?,
            ),
            "s" => Identifier::String(value.to_string()),
            "g" => Identifier::Guid(parse_guid(value)?),
            "b" => Identifier::Opaque(value.to_string()),
            other => return Err(NodeIdError::UnknownIdentifierType(other.to_string())),
        };

        Ok(Self::new(namespace, identifier))
    }
}

impl TryFrom<&str> for NodeId {
    type Error = NodeIdError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Validate a textual guid and normalize it to lower case.
fn parse_guid(value: &str) -> Result<String, NodeIdError> {
    let groups: Vec<&str> = value.split('-').collect();
    let lengths = [8, 4, 4, 4, 12];

    let well_formed = groups.len() == lengths.len()
        && groups
            .iter()
            .zip(lengths.iter())
            .all(|(g, &len)| g.len() == len && g.chars().all(|c| c.is_ascii_hexdigit()));

    if well_formed {
        Ok(value.to_ascii_lowercase())
    } else {
        Err(NodeIdError::InvalidGuid(value.to_string()))
    }
}

impl Serialize for NodeId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Errors that can occur when parsing a node id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeIdError {
    #[error("Empty node id")]
    Empty,

    #[error("Missing identifier in '{0}'")]
    MissingIdentifier(String),

    #[error("Invalid namespace index '{0}'")]
    InvalidNamespace(String),

    #[error("Invalid numeric identifier '{0}'")]
    InvalidNumeric(String),

    #[error("Invalid guid identifier '{0}'")]
    InvalidGuid(String),

    #[error("Unknown identifier type '{0}'")]
    UnknownIdentifierType(String),
}
