//! Publisher lifecycle driven by configuration state.
//!
//! The application owns the configurator, the shared data store, one
//! [`DataStoreConnection`] per connection node and one [`Publisher`] per
//! writer group. Once started, a writer group entering `Operational` starts
//! its publisher and leaving it stops the publisher, whichever management
//! call caused the change.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use pubsub_core::{
    ConfigError, ConnectionConfig, Configurator, DataStore, MemoryDataStore, NodeHandle, NodeKind,
    PubSubConfiguration, PubSubError, PubSubState, StateChange,
};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::connection::DataStoreConnection;
use crate::publisher::{Publisher, PublisherOptions, PublisherStatsSnapshot};
use crate::transport::MessageSink;

/// Builds the transport sink of a connection when it first publishes.
pub type SinkFactory = Arc<dyn Fn(NodeHandle, &ConnectionConfig) -> Arc<dyn MessageSink> + Send + Sync>;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct ApplicationConfig {
    /// Options applied to every publisher.
    pub publisher: PublisherOptions,

    /// Capacity of a [`ChannelSink`](crate::ChannelSink) created by hosts.
    pub sink_capacity: usize,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            publisher: PublisherOptions::default(),
            sink_capacity: 1024,
        }
    }
}

/// A PubSub application publishing from a data store.
pub struct PubSubApplication {
    inner: Arc<Inner>,
}

struct Inner {
    config: ApplicationConfig,
    configurator: Arc<Configurator>,
    store: Arc<dyn DataStore>,
    sinks: SinkFactory,
    runtime: Handle,
    started: AtomicBool,
    connections: Mutex<HashMap<NodeHandle, Arc<DataStoreConnection>>>,
    publishers: Mutex<HashMap<NodeHandle, Arc<Publisher>>>,
}

impl PubSubApplication {
    /// Build an application over a fresh [`MemoryDataStore`].
    ///
    /// Must be called inside a tokio runtime; publishers run on it.
    pub fn new(
        configuration: PubSubConfiguration,
        config: ApplicationConfig,
        sinks: SinkFactory,
    ) -> Result<Self, ConfigError> {
        Self::with_store(configuration, config, Arc::new(MemoryDataStore::new()), sinks)
    }

    /// Build an application publishing from an existing store.
    pub fn with_store(
        configuration: PubSubConfiguration,
        config: ApplicationConfig,
        store: Arc<dyn DataStore>,
        sinks: SinkFactory,
    ) -> Result<Self, ConfigError> {
        let configurator = Arc::new(Configurator::new(configuration)?);
        let inner = Arc::new(Inner {
            config,
            configurator,
            store,
            sinks,
            runtime: Handle::current(),
            started: AtomicBool::new(false),
            connections: Mutex::new(HashMap::new()),
            publishers: Mutex::new(HashMap::new()),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        inner
            .configurator
            .on_state_changed(Arc::new(move |change: &StateChange| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_state_changed(change);
                }
            }));

        Ok(Self { inner })
    }

    pub fn configurator(&self) -> &Arc<Configurator> {
        &self.inner.configurator
    }

    pub fn data_store(&self) -> Arc<dyn DataStore> {
        self.inner.store.clone()
    }

    pub fn config(&self) -> &ApplicationConfig {
        &self.inner.config
    }

    /// Start publishers for every writer group that is currently Operational.
    ///
    /// Returns the number of publishers started.
    pub fn start(&self) -> usize {
        self.inner.started.store(true, Ordering::SeqCst);

        let mut count = 0;
        for group in self.inner.configurator.nodes_of_kind(NodeKind::WriterGroup) {
            if self.inner.configurator.find_state(group) == Ok(PubSubState::Operational)
                && self.inner.start_publisher(group)
            {
                count += 1;
            }
        }
        info!(publishers = count, "PubSub application started");
        count
    }

    /// Stop every publisher and wait for their loops to exit.
    pub async fn shutdown(&self) {
        self.inner.started.store(false, Ordering::SeqCst);

        let publishers: Vec<Arc<Publisher>> = self
            .inner
            .lock_publishers()
            .drain()
            .map(|(_, p)| p)
            .collect();
        for publisher in &publishers {
            publisher.stop().await;
        }
        info!(publishers = publishers.len(), "PubSub application shut down");
    }

    /// Publisher of a writer group, if one was created.
    pub fn publisher(&self, writer_group: NodeHandle) -> Option<Arc<Publisher>> {
        self.inner.lock_publishers().get(&writer_group).cloned()
    }

    pub fn is_publishing(&self, writer_group: NodeHandle) -> bool {
        self.publisher(writer_group)
            .is_some_and(|p| p.is_running())
    }

    pub fn publisher_stats(&self, writer_group: NodeHandle) -> Option<PublisherStatsSnapshot> {
        self.publisher(writer_group).map(|p| p.stats())
    }
}

impl Inner {
    fn on_state_changed(&self, change: &StateChange) {
        if !self.configurator.is_tracked(change.node) {
            self.prune_removed();
            return;
        }
        if change.kind != NodeKind::WriterGroup || !self.started.load(Ordering::SeqCst) {
            return;
        }

        if change.new == PubSubState::Operational {
            self.start_publisher(change.node);
        } else if let Some(publisher) = self.lock_publishers().get(&change.node) {
            publisher.request_stop();
        }
    }

    fn start_publisher(&self, writer_group: NodeHandle) -> bool {
        let publisher = match self.publisher_for(writer_group) {
            Ok(publisher) => publisher,
            Err(e) => {
                warn!(%writer_group, "Cannot create publisher: {}", e);
                return false;
            }
        };
        let started = publisher.start();

        // A shutdown may have drained the publishers since `started` was checked.
        if !self.started.load(Ordering::SeqCst) {
            publisher.request_stop();
            let mut publishers = self.lock_publishers();
            if publishers
                .get(&writer_group)
                .is_some_and(|p| Arc::ptr_eq(p, &publisher))
            {
                publishers.remove(&writer_group);
            }
            debug!(%writer_group, "Application shut down while starting publisher");
            return false;
        }
        started
    }

    /// Drop publishers and connections whose nodes were removed.
    fn prune_removed(&self) {
        self.lock_publishers().retain(|&node, publisher| {
            let tracked = self.configurator.is_tracked(node);
            if !tracked {
                publisher.request_stop();
                debug!(writer_group = %node, "Writer group removed, publisher dropped");
            }
            tracked
        });
        self.lock_connections().retain(|&node, _| {
            let tracked = self.configurator.is_tracked(node);
            if !tracked {
                debug!(connection = %node, "Connection removed, transport released");
            }
            tracked
        });
    }

    fn publisher_for(&self, writer_group: NodeHandle) -> Result<Arc<Publisher>, PubSubError> {
        if let Some(publisher) = self.lock_publishers().get(&writer_group) {
            return Ok(publisher.clone());
        }
        self.prune_removed();

        let group = self.configurator.writer_group(writer_group)?;
        let interval = group.publishing_interval().ok_or_else(|| {
            PubSubError::invalid_argument(format!(
                "writer group '{}' has no valid publishing interval",
                group.name
            ))
        })?;
        let connection = self.connection_for(self.configurator.connection_of(writer_group)?)?;

        let publisher = Arc::new(Publisher::with_runtime(
            self.runtime.clone(),
            connection,
            writer_group,
            interval,
            self.config.publisher.clone(),
        ));
        debug!(%writer_group, name = %group.name, "Created publisher");
        Ok(self
            .lock_publishers()
            .entry(writer_group)
            .or_insert(publisher)
            .clone())
    }

    fn connection_for(&self, node: NodeHandle) -> Result<Arc<DataStoreConnection>, PubSubError> {
        let mut connections = self.lock_connections();
        if let Some(connection) = connections.get(&node) {
            return Ok(connection.clone());
        }

        let config = self.configurator.connection(node)?;
        let sink = (self.sinks)(node, &config);
        let connection = Arc::new(DataStoreConnection::new(
            self.configurator.clone(),
            self.store.clone(),
            node,
            sink,
        ));
        info!(connection = %config.name, publisher_id = %config.publisher_id, "Connection bound to transport");
        connections.insert(node, connection.clone());
        Ok(connection)
    }

    fn lock_connections(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<NodeHandle, Arc<DataStoreConnection>>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_publishers(&self) -> std::sync::MutexGuard<'_, HashMap<NodeHandle, Arc<Publisher>>> {
        self.publishers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelSink;
    use pubsub_core::{DataSetWriterConfig, PublishedDataSet, WriterGroupConfig};
    use std::time::Duration;

    fn configuration(enabled: bool) -> PubSubConfiguration {
        let mut group = WriterGroupConfig::new("Group1", 1, 100.0);
        group.enabled = true;
        group.dataset_writers.push(DataSetWriterConfig {
            name: "Writer1".to_string(),
            enabled: true,
            dataset_writer_id: 1,
            data_set_name: "Empty".to_string(),
            key_frame_count: 0,
        });
        PubSubConfiguration {
            enabled,
            connections: vec![ConnectionConfig {
                name: "Conn1".to_string(),
                enabled: true,
                writer_groups: vec![group],
                ..Default::default()
            }],
            published_data_sets: vec![PublishedDataSet {
                name: "Empty".to_string(),
                fields: Vec::new(),
            }],
        }
    }

    fn application(enabled: bool) -> (PubSubApplication, tokio::sync::mpsc::Receiver<pubsub_protocol::NetworkMessage>) {
        let (sink, rx) = ChannelSink::new(64);
        let sink: Arc<dyn MessageSink> = Arc::new(sink);
        let factory: SinkFactory = Arc::new(move |_: NodeHandle, _: &ConnectionConfig| sink.clone());
        let app =
            PubSubApplication::new(configuration(enabled), ApplicationConfig::default(), factory)
                .unwrap();
        (app, rx)
    }

    fn group(app: &PubSubApplication) -> NodeHandle {
        app.configurator()
            .find(NodeKind::WriterGroup, "Group1")
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_publishes_operational_groups() {
        let (app, mut rx) = application(true);
        assert_eq!(app.start(), 1);
        assert!(app.is_publishing(group(&app)));

        let message = rx.recv().await.unwrap();
        assert_eq!(message.writer_group_id, 1);

        app.shutdown().await;
        assert!(!app.is_publishing(group(&app)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_before_start() {
        let (app, _rx) = application(false);
        app.configurator().enable(app.configurator().root()).unwrap();
        assert!(app.publisher(group(&app)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_changes_drive_publisher() {
        let (app, _rx) = application(false);
        assert_eq!(app.start(), 0);
        let group = group(&app);
        let root = app.configurator().root();

        app.configurator().enable(root).unwrap();
        assert!(app.is_publishing(group));

        app.configurator().disable(root).unwrap();
        assert!(!app.is_publishing(group));
        let ticks = app.publisher_stats(group).unwrap().ticks;

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(app.publisher_stats(group).unwrap().ticks, ticks);

        app.configurator().enable(root).unwrap();
        assert!(app.is_publishing(group));
        app.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_group_drops_publisher() {
        let (app, _rx) = application(true);
        app.start();
        let group = group(&app);

        app.configurator().remove(group).unwrap();
        assert!(app.publisher(group).is_none());
        app.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_added_group_starts_publishing() {
        let (app, mut rx) = application(true);
        app.start();
        let conn = app.configurator().find(NodeKind::Connection, "Conn1").unwrap();

        let mut extra = WriterGroupConfig::new("Group2", 2, 50.0);
        extra.enabled = true;
        extra.dataset_writers.push(DataSetWriterConfig {
            name: "Writer2".to_string(),
            enabled: true,
            dataset_writer_id: 2,
            data_set_name: "Empty".to_string(),
            key_frame_count: 0,
        });
        let added = app.configurator().add_writer_group(conn, extra).unwrap();
        assert!(app.is_publishing(added));

        let mut seen = std::collections::HashSet::new();
        while seen.len() < 2 {
            seen.insert(rx.recv().await.unwrap().writer_group_id);
        }
        app.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_connection_is_pruned() {
        let (app, mut rx) = application(true);
        app.start();
        rx.recv().await.unwrap();
        assert_eq!(app.inner.lock_connections().len(), 1);

        let conn = app.configurator().find(NodeKind::Connection, "Conn1").unwrap();
        app.configurator().remove(conn).unwrap();

        assert!(app.inner.lock_connections().is_empty());
        assert!(app.publisher(group(&app)).is_none());
        app.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_after_shutdown_is_undone() {
        let (app, _rx) = application(true);
        let group = group(&app);

        // Same interleaving as a listener that checked `started` just before shutdown.
        assert!(!app.inner.start_publisher(group));
        assert!(app.publisher(group).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_racing_with_enable_leaves_nothing_running() {
        for _ in 0..50 {
            let (app, _rx) = application(false);
            app.start();
            let configurator = app.configurator().clone();
            let root = configurator.root();

            let toggler = std::thread::spawn(move || {
                for _ in 0..20 {
                    let _ = configurator.enable(root);
                    let _ = configurator.disable(root);
                }
                let _ = configurator.enable(root);
            });
            tokio::task::yield_now().await;
            app.shutdown().await;
            toggler.join().unwrap();

            assert!(app.inner.lock_publishers().values().all(|p| !p.is_running()));
        }
    }
}
