//! Network message types handed to the transport layer.
//!
//! One `NetworkMessage` carries the dataset messages a writer group produced
//! in one publishing cycle:
//! - Key frames carry every field of the dataset
//! - Delta frames carry only fields that changed since the previous frame
//! - Keep-alives carry no fields and only advance the sequence number
//!
//! The structures derive serde so a JSON transport can serialize them
//! directly; binary encodings are the transport's concern.

use chrono::{DateTime, Utc};
use pubsub_core::{DataValue, PublisherId};
use serde::{Deserialize, Serialize};

/// Message produced by one writer group in one publishing cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkMessage {
    pub publisher_id: PublisherId,

    pub writer_group_id: u16,

    /// Increments by one per network message of this writer group (wrapping)
    pub sequence_number: u16,

    pub timestamp: DateTime<Utc>,

    pub dataset_messages: Vec<DataSetMessage>,
}

impl NetworkMessage {
    /// True if every dataset message is a keep-alive.
    pub fn is_keep_alive(&self) -> bool {
        self.dataset_messages
            .iter()
            .all(|m| m.message_type == DataSetMessageType::KeepAlive)
    }

    /// Number of fields over all dataset messages.
    pub fn field_count(&self) -> usize {
        self.dataset_messages.iter().map(|m| m.fields.len()).sum()
    }
}

/// Content of one dataset writer inside a network message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSetMessage {
    pub dataset_writer_id: u16,

    /// Increments by one per message of this dataset writer (wrapping)
    pub sequence_number: u16,

    pub message_type: DataSetMessageType,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<DataSetField>,
}

impl DataSetMessage {
    /// Field by name.
    pub fn field(&self, name: &str) -> Option<&DataSetField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Kind of dataset message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataSetMessageType {
    KeyFrame,
    DeltaFrame,
    KeepAlive,
}

/// One published field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSetField {
    pub name: String,

    /// Position of the field in the published dataset
    pub index: u16,

    pub value: DataValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NetworkMessage {
        NetworkMessage {
            publisher_id: PublisherId::UInt(100),
            writer_group_id: 1,
            sequence_number: 7,
            timestamp: Utc::now(),
            dataset_messages: vec![
                DataSetMessage {
                    dataset_writer_id: 1,
                    sequence_number: 3,
                    message_type: DataSetMessageType::DeltaFrame,
                    fields: vec![DataSetField {
                        name: "Temperature".to_string(),
                        index: 0,
                        value: DataValue::new(85.5),
                    }],
                },
                DataSetMessage {
                    dataset_writer_id: 2,
                    sequence_number: 9,
                    message_type: DataSetMessageType::KeepAlive,
                    fields: Vec::new(),
                },
            ],
        }
    }

    #[test]
    fn test_serialize_network_message() {
        let json = serde_json::to_value(sample()).unwrap();

        assert_eq!(json["publisherId"], 100);
        assert_eq!(json["writerGroupId"], 1);
        assert_eq!(json["datasetMessages"][0]["messageType"], "deltaFrame");
        assert_eq!(json["datasetMessages"][0]["fields"][0]["value"]["value"], 85.5);
        // Keep-alives serialize without a field list.
        assert!(json["datasetMessages"][1].get("fields").is_none());
    }

    #[test]
    fn test_helpers() {
        let message = sample();
        assert_eq!(message.field_count(), 1);
        assert!(!message.is_keep_alive());
        assert!(message.dataset_messages[0].field("Temperature").is_some());
        assert!(message.dataset_messages[0].field("Pressure").is_none());
    }
}
