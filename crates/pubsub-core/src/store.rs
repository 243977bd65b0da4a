//! Published-data store.
//!
//! The store keeps the latest value of every (item, attribute) pair that a
//! data source has written. Writers and the publication path access it
//! independently; each read returns a complete copy of one previously
//! written value.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::error::PubSubError;
use crate::model::{attribute, DataValue};
use crate::node_id::NodeId;

/// Trait for published-data storage implementations.
pub trait DataStore: Send + Sync {
    /// Insert or overwrite the value of an item attribute.
    fn write(&self, item: &NodeId, attribute_id: u32, value: DataValue) -> Result<(), PubSubError>;

    /// Latest value of an item attribute, `None` if it was never written.
    fn read(&self, item: &NodeId, attribute_id: u32) -> Result<Option<DataValue>, PubSubError>;

    /// Number of stored entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the `Value` attribute.
    fn write_value(&self, item: &NodeId, value: DataValue) -> Result<(), PubSubError> {
        self.write(item, attribute::VALUE, value)
    }

    /// Read the `Value` attribute.
    fn read_value(&self, item: &NodeId) -> Result<Option<DataValue>, PubSubError> {
        self.read(item, attribute::VALUE)
    }

    /// Write several entries. Stops at the first invalid key.
    fn write_many(&self, entries: Vec<(NodeId, u32, DataValue)>) -> Result<(), PubSubError> {
        for (item, attribute_id, value) in entries {
            self.write(&item, attribute_id, value)?;
        }
        Ok(())
    }

    /// Read several entries in order.
    fn read_many(&self, keys: &[(NodeId, u32)]) -> Result<Vec<Option<DataValue>>, PubSubError> {
        keys.iter()
            .map(|(item, attribute_id)| self.read(item, *attribute_id))
            .collect()
    }
}

/// Reject keys that cannot address anything.
pub fn validate_key(item: &NodeId, attribute_id: u32) -> Result<(), PubSubError> {
    if item.is_empty() {
        return Err(PubSubError::invalid_argument("item id must not be null or empty"));
    }
    if !attribute::is_valid(attribute_id) {
        return Err(PubSubError::invalid_argument(format!(
            "attribute id {attribute_id} is outside {}..={}",
            attribute::NODE_ID,
            attribute::ACCESS_LEVEL_EX
        )));
    }
    Ok(())
}

/// In-memory data store behind a single reader/writer lock.
#[derive(Debug, Default)]
pub struct MemoryDataStore {
    values: RwLock<HashMap<(NodeId, u32), DataValue>>,
}

impl MemoryDataStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// All item ids that currently hold a value.
    pub fn items(&self) -> Vec<(NodeId, u32)> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

impl DataStore for MemoryDataStore {
    fn write(&self, item: &NodeId, attribute_id: u32, value: DataValue) -> Result<(), PubSubError> {
        validate_key(item, attribute_id)?;
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((item.clone(), attribute_id), value);
        Ok(())
    }

    fn read(&self, item: &NodeId, attribute_id: u32) -> Result<Option<DataValue>, PubSubError> {
        validate_key(item, attribute_id)?;
        Ok(self
            .values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(item.clone(), attribute_id))
            .cloned())
    }

    fn len(&self) -> usize {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
