//! In-memory PubSub configuration model.
//!
//! A host loads these structures from wherever it keeps them (a JSON file, an
//! XML document converted by a separate tool, a management call) and hands the
//! result to [`Configurator::new`](crate::Configurator::new). Only validation
//! lives here; reading and writing storage is the host's concern.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::ConfigError;
use crate::model::attribute;
use crate::node_id::NodeId;

/// Root of a PubSub configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubSubConfiguration {
    /// Own-enabled flag of the root node.
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,

    /// Datasets the writers publish, referenced by name.
    #[serde(default)]
    pub published_data_sets: Vec<PublishedDataSet>,
}

/// Identity of a publisher on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PublisherId {
    UInt(u64),
    String(String),
}

impl Default for PublisherId {
    fn default() -> Self {
        PublisherId::UInt(0)
    }
}

impl std::fmt::Display for PublisherId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublisherId::UInt(id) => write!(f, "{id}"),
            PublisherId::String(id) => f.write_str(id),
        }
    }
}

/// A PubSub connection (one transport endpoint).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    pub name: String,

    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub publisher_id: PublisherId,

    /// Transport profile (e.g. UADP over UDP, MQTT JSON)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport_profile_uri: Option<String>,

    /// Network address URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    #[serde(default)]
    pub writer_groups: Vec<WriterGroupConfig>,

    #[serde(default)]
    pub reader_groups: Vec<ReaderGroupConfig>,
}

/// A writer group: dataset writers sharing one publishing cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriterGroupConfig {
    pub name: String,

    #[serde(default)]
    pub enabled: bool,

    pub writer_group_id: u16,

    /// Publishing interval in milliseconds, must be > 0
    pub publishing_interval: f64,

    /// Keep-alive time in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive_time: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_network_message_size: Option<u32>,

    #[serde(default)]
    pub dataset_writers: Vec<DataSetWriterConfig>,
}

impl WriterGroupConfig {
    pub fn new(name: &str, writer_group_id: u16, publishing_interval: f64) -> Self {
        Self {
            name: name.to_string(),
            enabled: false,
            writer_group_id,
            publishing_interval,
            keep_alive_time: None,
            max_network_message_size: None,
            dataset_writers: Vec::new(),
        }
    }

    /// Publishing interval as a `Duration`.
    ///
    /// Sub-millisecond intervals are kept; non-positive or non-finite values
    /// yield `None`.
    pub fn publishing_interval(&self) -> Option<std::time::Duration> {
        if self.publishing_interval.is_finite() && self.publishing_interval > 0.0 {
            Some(std::time::Duration::from_secs_f64(
                self.publishing_interval / 1000.0,
            ))
        } else {
            None
        }
    }
}

/// A reader group: dataset readers sharing one receive path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReaderGroupConfig {
    pub name: String,

    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub dataset_readers: Vec<DataSetReaderConfig>,
}

/// A dataset writer publishing one published dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSetWriterConfig {
    pub name: String,

    #[serde(default)]
    pub enabled: bool,

    pub dataset_writer_id: u16,

    /// Name of the published dataset in `PubSubConfiguration::published_data_sets`
    pub data_set_name: String,

    /// Send a key frame every N messages; 0 or 1 means every message
    #[serde(default)]
    pub key_frame_count: u32,
}

/// A dataset reader consuming one publisher's dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSetReaderConfig {
    pub name: String,

    #[serde(default)]
    pub enabled: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher_id: Option<PublisherId>,

    #[serde(default)]
    pub writer_group_id: u16,

    #[serde(default)]
    pub dataset_writer_id: u16,
}

/// A named list of variables published together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedDataSet {
    pub name: String,

    #[serde(default)]
    pub fields: Vec<PublishedVariable>,
}

/// One field of a published dataset and where its value comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedVariable {
    pub field_name: String,

    /// Item the field reads from the data store
    pub published_variable: NodeId,

    /// Attribute of the item, `Value` unless stated otherwise
    #[serde(default = "default_attribute_id")]
    pub attribute_id: u32,
}

fn default_attribute_id() -> u32 {
    attribute::VALUE
}

impl PublishedVariable {
    pub fn new(field_name: &str, published_variable: NodeId) -> Self {
        Self {
            field_name: field_name.to_string(),
            published_variable,
            attribute_id: attribute::VALUE,
        }
    }
}

impl PubSubConfiguration {
    /// Look up a published dataset by name.
    pub fn data_set(&self, name: &str) -> Option<&PublishedDataSet> {
        self.published_data_sets.iter().find(|ds| ds.name == name)
    }

    /// Check the invariants the configurator and publishers rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for ds in &self.published_data_sets {
            ds.validate()?;
        }

        for connection in &self.connections {
            if connection.name.is_empty() {
                return Err(ConfigError::EmptyName { kind: "Connection" });
            }

            let mut group_ids = HashSet::new();
            for group in &connection.writer_groups {
                group.validate()?;
                if !group_ids.insert(group.writer_group_id) {
                    return Err(ConfigError::DuplicateWriterGroupId {
                        connection: connection.name.clone(),
                        id: group.writer_group_id,
                    });
                }
                for writer in &group.dataset_writers {
                    if self.data_set(&writer.data_set_name).is_none() {
                        return Err(ConfigError::UnknownDataSet {
                            writer: writer.name.clone(),
                            data_set: writer.data_set_name.clone(),
                        });
                    }
                }
            }

            for group in &connection.reader_groups {
                if group.name.is_empty() {
                    return Err(ConfigError::EmptyName { kind: "ReaderGroup" });
                }
                if group.dataset_readers.iter().any(|r| r.name.is_empty()) {
                    return Err(ConfigError::EmptyName {
                        kind: "DataSetReader",
                    });
                }
            }
        }

        Ok(())
    }
}

impl WriterGroupConfig {
    /// Validate the group on its own (used for runtime additions too).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::EmptyName { kind: "WriterGroup" });
        }
        if self.publishing_interval().is_none() {
            return Err(ConfigError::InvalidPublishingInterval {
                group: self.name.clone(),
                interval: self.publishing_interval,
            });
        }

        let mut writer_ids = HashSet::new();
        for writer in &self.dataset_writers {
            if writer.name.is_empty() {
                return Err(ConfigError::EmptyName {
                    kind: "DataSetWriter",
                });
            }
            if !writer_ids.insert(writer.dataset_writer_id) {
                return Err(ConfigError::DuplicateDataSetWriterId {
                    group: self.name.clone(),
                    id: writer.dataset_writer_id,
                });
            }
        }
        Ok(())
    }
}

impl PublishedDataSet {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::EmptyName {
                kind: "PublishedDataSet",
            });
        }
        for field in &self.fields {
            if field.published_variable.is_empty() {
                return Err(ConfigError::NullItemId {
                    data_set: self.name.clone(),
                    field: field.field_name.clone(),
                });
            }
            if !attribute::is_valid(field.attribute_id) {
                return Err(ConfigError::InvalidAttribute {
                    data_set: self.name.clone(),
                    field: field.field_name.clone(),
                    attribute_id: field.attribute_id,
                });
            }
        }
        Ok(())
    }
}
