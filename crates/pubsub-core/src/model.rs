//! PubSub data model types.
//!
//! These types are shared by the configurator, the data store and the
//! publication path:
//! - The derived `PubSubState` of a configuration node
//! - `StatusCode` and `DataValue` for published values
//! - The valid OPC UA attribute id range

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Effective state of a configuration node.
///
/// Never stored. It is computed from the node's own flag and the flags of
/// its ancestors every time it is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PubSubState {
    /// The node's own flag is off.
    Disabled,
    /// Enabled, but some ancestor is disabled.
    Paused,
    /// Enabled together with every ancestor up to the root.
    Operational,
}

impl std::fmt::Display for PubSubState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PubSubState::Disabled => "Disabled",
            PubSubState::Paused => "Paused",
            PubSubState::Operational => "Operational",
        };
        f.write_str(s)
    }
}

/// OPC UA status code attached to every published value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub u32);

impl StatusCode {
    pub const GOOD: StatusCode = StatusCode(0x0000_0000);
    pub const UNCERTAIN: StatusCode = StatusCode(0x4000_0000);
    pub const BAD: StatusCode = StatusCode(0x8000_0000);
    pub const BAD_NO_DATA: StatusCode = StatusCode(0x809B_0000);
    pub const BAD_INVALID_ARGUMENT: StatusCode = StatusCode(0x80AB_0000);
    pub const BAD_INVALID_STATE: StatusCode = StatusCode(0x80AF_0000);

    /// Severity bits only.
    fn severity(self) -> u32 {
        self.0 & 0xC000_0000
    }

    pub fn is_good(self) -> bool {
        self.severity() == 0
    }

    pub fn is_uncertain(self) -> bool {
        self.severity() == 0x4000_0000
    }

    pub fn is_bad(self) -> bool {
        self.severity() & 0x8000_0000 != 0
    }
}

impl Default for StatusCode {
    fn default() -> Self {
        StatusCode::GOOD
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            StatusCode::GOOD => f.write_str("Good"),
            StatusCode::UNCERTAIN => f.write_str("Uncertain"),
            StatusCode::BAD => f.write_str("Bad"),
            StatusCode::BAD_NO_DATA => f.write_str("BadNoData"),
            StatusCode::BAD_INVALID_ARGUMENT => f.write_str("BadInvalidArgument"),
            StatusCode::BAD_INVALID_STATE => f.write_str("BadInvalidState"),
            StatusCode(code) => write!(f, "0x{code:08X}"),
        }
    }
}

/// Scalar or array payload of a published value.
pub type Variant = serde_json::Value;

/// A timestamped, status-coded value as stored and published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataValue {
    /// The payload (number, string, bool, array, ...)
    pub value: Variant,

    /// Quality of the value
    #[serde(default)]
    pub status: StatusCode,

    /// When the source produced the value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_timestamp: Option<DateTime<Utc>>,

    /// When the value entered this process
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_timestamp: Option<DateTime<Utc>>,
}

impl DataValue {
    /// A good value stamped with the current time.
    pub fn new(value: impl Into<Variant>) -> Self {
        let now = Utc::now();
        Self {
            value: value.into(),
            status: StatusCode::GOOD,
            source_timestamp: Some(now),
            server_timestamp: Some(now),
        }
    }

    /// A value without payload carrying only a status.
    pub fn from_status(status: StatusCode) -> Self {
        Self {
            value: Variant::Null,
            status,
            source_timestamp: None,
            server_timestamp: Some(Utc::now()),
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn with_source_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.source_timestamp = Some(timestamp);
        self
    }

    /// True if payload and status are equal, ignoring timestamps.
    pub fn same_value(&self, other: &DataValue) -> bool {
        self.status == other.status && self.value == other.value
    }
}

/// OPC UA attribute ids.
///
/// Only ids in `NODE_ID..=ACCESS_LEVEL_EX` address something; everything else
/// is rejected by the data store.
pub mod attribute {
    pub const NODE_ID: u32 = 1;
    pub const NODE_CLASS: u32 = 2;
    pub const BROWSE_NAME: u32 = 3;
    pub const DISPLAY_NAME: u32 = 4;
    pub const DESCRIPTION: u32 = 5;
    pub const WRITE_MASK: u32 = 6;
    pub const USER_WRITE_MASK: u32 = 7;
    pub const IS_ABSTRACT: u32 = 8;
    pub const SYMMETRIC: u32 = 9;
    pub const INVERSE_NAME: u32 = 10;
    pub const CONTAINS_NO_LOOPS: u32 = 11;
    pub const EVENT_NOTIFIER: u32 = 12;
    pub const VALUE: u32 = 13;
    pub const DATA_TYPE: u32 = 14;
    pub const VALUE_RANK: u32 = 15;
    pub const ARRAY_DIMENSIONS: u32 = 16;
    pub const ACCESS_LEVEL: u32 = 17;
    pub const USER_ACCESS_LEVEL: u32 = 18;
    pub const MINIMUM_SAMPLING_INTERVAL: u32 = 19;
    pub const HISTORIZING: u32 = 20;
    pub const EXECUTABLE: u32 = 21;
    pub const USER_EXECUTABLE: u32 = 22;
    pub const DATA_TYPE_DEFINITION: u32 = 23;
    pub const ROLE_PERMISSIONS: u32 = 24;
    pub const USER_ROLE_PERMISSIONS: u32 = 25;
    pub const ACCESS_RESTRICTIONS: u32 = 26;
    pub const ACCESS_LEVEL_EX: u32 = 27;

    const NAMES: [&str; 27] = [
        "NodeId",
        "NodeClass",
        "BrowseName",
        "DisplayName",
        "Description",
        "WriteMask",
        "UserWriteMask",
        "IsAbstract",
        "Symmetric",
        "InverseName",
        "ContainsNoLoops",
        "EventNotifier",
        "Value",
        "DataType",
        "ValueRank",
        "ArrayDimensions",
        "AccessLevel",
        "UserAccessLevel",
        "MinimumSamplingInterval",
        "Historizing",
        "Executable",
        "UserExecutable",
        "DataTypeDefinition",
        "RolePermissions",
        "UserRolePermissions",
        "AccessRestrictions",
        "AccessLevelEx",
    ];

    /// Check that an attribute id is one of the defined attributes.
    pub fn is_valid(attribute_id: u32) -> bool {
        (NODE_ID..=ACCESS_LEVEL_EX).contains(&attribute_id)
    }

    /// Browse name of an attribute, if it is defined.
    pub fn name(attribute_id: u32) -> Option<&'static str> {
        if is_valid(attribute_id) {
            Some(NAMES[(attribute_id - 1) as usize])
        } else {
            None
        }
    }
}
