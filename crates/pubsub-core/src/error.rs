//! Error types shared by the configurator and the data store.

use thiserror::Error;

use crate::model::StatusCode;

/// Errors returned by state-machine and data-store operations.
///
/// Both variants are reported back to the caller unchanged so a management
/// surface can tell "not found" apart from "illegal transition".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PubSubError {
    /// Unknown node handle, null item id or attribute id out of range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Transition not allowed from the node's current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl PubSubError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        PubSubError::InvalidArgument(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        PubSubError::InvalidState(msg.into())
    }

    /// The OPC UA status code a method handler would return for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            PubSubError::InvalidArgument(_) => StatusCode::BAD_INVALID_ARGUMENT,
            PubSubError::InvalidState(_) => StatusCode::BAD_INVALID_STATE,
        }
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, PubSubError::InvalidArgument(_))
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, PubSubError::InvalidState(_))
    }
}

/// Errors found while validating an ingested configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{kind} name must not be empty")]
    EmptyName { kind: &'static str },

    #[error("Writer group '{group}' has invalid publishing interval {interval} ms")]
    InvalidPublishingInterval { group: String, interval: f64 },

    #[error("Duplicate writer group id {id} on connection '{connection}'")]
    DuplicateWriterGroupId { connection: String, id: u16 },

    #[error("Duplicate dataset writer id {id} in writer group '{group}'")]
    DuplicateDataSetWriterId { group: String, id: u16 },

    #[error("Dataset writer '{writer}' references unknown published dataset '{data_set}'")]
    UnknownDataSet { writer: String, data_set: String },

    #[error("Published dataset '{data_set}' field '{field}' has invalid attribute id {attribute_id}")]
    InvalidAttribute {
        data_set: String,
        field: String,
        attribute_id: u32,
    },

    #[error("Published dataset '{data_set}' field '{field}' has a null item id")]
    NullItemId { data_set: String, field: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(
            PubSubError::invalid_argument("x").status_code(),
            StatusCode::BAD_INVALID_ARGUMENT
        );
        assert_eq!(
            PubSubError::invalid_state("x").status_code(),
            StatusCode::BAD_INVALID_STATE
        );
    }

    #[test]
    fn test_error_display() {
        let err = PubSubError::invalid_state("node is already enabled");
        assert_eq!(err.to_string(), "Invalid state: node is already enabled");
        assert!(err.is_invalid_state());
        assert!(!err.is_invalid_argument());
    }
}
