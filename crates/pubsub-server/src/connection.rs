//! Connection abstraction consumed by the publisher.
//!
//! A publisher only asks its connection two things per tick: whether the
//! writer group may publish right now, and which network messages to send.
//! [`DataStoreConnection`] answers both from the configurator and the data
//! store and forwards the result to a [`MessageSink`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use pubsub_core::{
    Configurator, DataStore, DataValue, NodeHandle, PubSubError, PubSubState, StatusCode,
};
use pubsub_protocol::{DataSetField, DataSetMessage, DataSetMessageType, NetworkMessage};
use thiserror::Error;
use tracing::{debug, trace};

use crate::transport::MessageSink;

/// Transient failure while building or dispatching messages.
///
/// These are reported per tick and never stop a publisher.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("transport is not connected")]
    NotConnected,

    #[error(transparent)]
    PubSub(#[from] PubSubError),
}

/// Operations a publisher performs against its connection.
pub trait PubSubConnection: Send + Sync {
    /// Whether `writer_group` may publish right now.
    fn can_publish(&self, writer_group: NodeHandle) -> bool;

    /// Build the messages of one publishing cycle.
    ///
    /// `state` is owned by the publisher and carried from tick to tick.
    fn create_network_messages(
        &self,
        writer_group: NodeHandle,
        state: &mut PublishState,
    ) -> Result<Vec<NetworkMessage>, PublishError>;

    /// Hand a built message to the transport.
    fn publish_network_message(&self, message: &NetworkMessage) -> Result<(), PublishError>;
}

/// Per-publisher cursor threaded through successive ticks.
#[derive(Debug, Default)]
pub struct PublishState {
    network_sequence: u16,
    writers: HashMap<u16, WriterCursor>,
}

#[derive(Debug, Default)]
struct WriterCursor {
    sequence: u16,
    /// Messages produced since the last reset
    produced: u64,
    /// Field values of the last key or delta frame
    last_sent: Vec<DataValue>,
}

impl PublishState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number for the next network message. Starts at 1.
    pub fn next_network_sequence(&mut self) -> u16 {
        self.network_sequence = self.network_sequence.wrapping_add(1);
        self.network_sequence
    }

    /// Number of messages produced for a dataset writer.
    pub fn messages_produced(&self, dataset_writer_id: u16) -> u64 {
        self.writers
            .get(&dataset_writer_id)
            .map(|c| c.produced)
            .unwrap_or(0)
    }

    /// Forget what was sent; every writer starts over with a key frame.
    pub fn reset(&mut self) {
        self.writers.clear();
    }
}

impl WriterCursor {
    fn next_sequence(&mut self) -> u16 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }
}

/// Connection that publishes values read from a [`DataStore`].
pub struct DataStoreConnection {
    configurator: Arc<Configurator>,
    store: Arc<dyn DataStore>,
    connection: NodeHandle,
    sink: Arc<dyn MessageSink>,
}

impl DataStoreConnection {
    pub fn new(
        configurator: Arc<Configurator>,
        store: Arc<dyn DataStore>,
        connection: NodeHandle,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        Self {
            configurator,
            store,
            connection,
            sink,
        }
    }

    /// Connection node this instance publishes for.
    pub fn node(&self) -> NodeHandle {
        self.connection
    }

    fn dataset_message(
        &self,
        writer: NodeHandle,
        state: &mut PublishState,
    ) -> Result<DataSetMessage, PublishError> {
        let config = self.configurator.dataset_writer(writer)?;
        let data_set = self
            .configurator
            .published_data_set(&config.data_set_name)
            .ok_or_else(|| {
                PubSubError::invalid_argument(format!(
                    "published dataset '{}' is unknown",
                    config.data_set_name
                ))
            })?;

        let values = data_set
            .fields
            .iter()
            .map(|field| {
                Ok(self
                    .store
                    .read(&field.published_variable, field.attribute_id)?
                    .unwrap_or_else(|| DataValue::from_status(StatusCode::BAD_NO_DATA)))
            })
            .collect::<Result<Vec<_>, PubSubError>>()?;

        let cursor = state.writers.entry(config.dataset_writer_id).or_default();
        let key_frame = cursor.last_sent.len() != values.len()
            || config.key_frame_count <= 1
            || cursor.produced % u64::from(config.key_frame_count) == 0;

        let mut fields = Vec::new();
        for (index, (field, value)) in data_set.fields.iter().zip(&values).enumerate() {
            let changed = cursor
                .last_sent
                .get(index)
                .map_or(true, |last| !last.same_value(value));
            if key_frame || changed {
                fields.push(DataSetField {
                    name: field.field_name.clone(),
                    index: index as u16,
                    value: value.clone(),
                });
            }
        }

        let message_type = if key_frame {
            DataSetMessageType::KeyFrame
        } else if fields.is_empty() {
            DataSetMessageType::KeepAlive
        } else {
            DataSetMessageType::DeltaFrame
        };

        cursor.last_sent = values;
        cursor.produced += 1;

        Ok(DataSetMessage {
            dataset_writer_id: config.dataset_writer_id,
            sequence_number: cursor.next_sequence(),
            message_type,
            fields,
        })
    }
}

impl PubSubConnection for DataStoreConnection {
    fn can_publish(&self, writer_group: NodeHandle) -> bool {
        let operational =
            self.configurator.find_state(writer_group) == Ok(PubSubState::Operational);
        let ours = self.configurator.connection_of(writer_group) == Ok(self.connection);
        operational && ours && self.sink.is_connected()
    }

    fn create_network_messages(
        &self,
        writer_group: NodeHandle,
        state: &mut PublishState,
    ) -> Result<Vec<NetworkMessage>, PublishError> {
        let group = self.configurator.writer_group(writer_group)?;
        let connection = self.configurator.connection(self.connection)?;

        let mut dataset_messages = Vec::new();
        for writer in self.configurator.children(writer_group)? {
            if self.configurator.find_state(writer)? != PubSubState::Operational {
                trace!(%writer, "Skipping non-operational dataset writer");
                continue;
            }
            dataset_messages.push(self.dataset_message(writer, state)?);
        }

        if dataset_messages.is_empty() {
            return Ok(Vec::new());
        }

        let message = NetworkMessage {
            publisher_id: connection.publisher_id,
            writer_group_id: group.writer_group_id,
            sequence_number: state.next_network_sequence(),
            timestamp: Utc::now(),
            dataset_messages,
        };
        debug!(
            writer_group = %group.name,
            sequence = message.sequence_number,
            fields = message.field_count(),
            "Built network message"
        );
        Ok(vec![message])
    }

    fn publish_network_message(&self, message: &NetworkMessage) -> Result<(), PublishError> {
        if !self.sink.is_connected() {
            return Err(PublishError::NotConnected);
        }
        self.sink.send(message)
    }
}
