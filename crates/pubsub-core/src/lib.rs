//! # pubsub-core
//!
//! Core PubSub configuration model, state machine and data store.
//!
//! This crate provides:
//! - Data model types (DataValue, StatusCode, PubSubState, attribute ids)
//! - Item identifier parsing (OPC UA style node ids)
//! - The in-memory configuration tree and its `Configurator`
//! - The concurrent published-data store
//!
//! This crate is intentionally runtime-agnostic and contains no async code.
//! Scheduling and transport hand-off live in `pubsub-server`.

pub mod config;
pub mod configurator;
pub mod error;
pub mod model;
pub mod node_id;
pub mod store;
pub mod tree;

pub use config::{
    ConnectionConfig, DataSetReaderConfig, DataSetWriterConfig, PubSubConfiguration,
    PublishedDataSet, PublishedVariable, PublisherId, ReaderGroupConfig, WriterGroupConfig,
};
pub use configurator::{Configurator, StateChange, StateChangeListener};
pub use error::{ConfigError, PubSubError};
pub use model::*;
pub use node_id::{Identifier, NodeId, NodeIdError};
pub use store::{DataStore, MemoryDataStore};
pub use tree::{NodeHandle, NodeKind};
