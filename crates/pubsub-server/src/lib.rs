//! # pubsub-server
//!
//! PubSub publishing runtime on top of tokio.
//!
//! - `connection` - the `PubSubConnection` seam and a DataStore-backed implementation
//! - `transport` - the `MessageSink` boundary to the (external) transport layer
//! - `publisher` - one drift-corrected periodic loop per writer group
//! - `application` - starts and stops publishers as writer groups change state

pub mod application;
pub mod connection;
pub mod publisher;
pub mod transport;

pub use application::{ApplicationConfig, PubSubApplication, SinkFactory};
pub use connection::{DataStoreConnection, PubSubConnection, PublishError, PublishState};
pub use publisher::{Publisher, PublisherOptions, PublisherStats, PublisherStatsSnapshot, TickSchedule};
pub use transport::{ChannelSink, MessageSink};

pub use pubsub_core::{
    Configurator, DataStore, DataValue, MemoryDataStore, NodeHandle, NodeId, PubSubState,
};
pub use pubsub_protocol::NetworkMessage;
