//! The PubSub state machine.
//!
//! The configurator owns the configuration tree and is the only place that
//! changes a node's own-enabled flag. Effective states are never stored: every
//! query walks from the node to the root (see [`PubSubState`]), so enabling or
//! disabling a node needs no writes to its descendants.
//!
//! Every node is addressed by the [`NodeHandle`] the configurator handed out
//! when it registered the node. Handles from another configurator, or for
//! removed nodes, are rejected with `InvalidArgument`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};

use crate::config::{
    ConnectionConfig, DataSetReaderConfig, DataSetWriterConfig, PubSubConfiguration,
    PublishedDataSet, ReaderGroupConfig, WriterGroupConfig,
};
use crate::error::{ConfigError, PubSubError};
use crate::model::PubSubState;
use crate::tree::{ConfigTree, NodeData, NodeHandle, NodeKind};

/// A change of a node's derived state caused by a configurator operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub node: NodeHandle,
    pub kind: NodeKind,
    pub old: PubSubState,
    pub new: PubSubState,
}

/// Callback invoked for every [`StateChange`].
///
/// Listeners run on the thread performing the change, while configuration
/// mutations are serialized. They may query the configurator but must not
/// mutate it.
pub type StateChangeListener = Arc<dyn Fn(&StateChange) + Send + Sync>;

/// State machine over a PubSub configuration tree.
pub struct Configurator {
    tree: RwLock<ConfigTree>,
    data_sets: RwLock<Vec<PublishedDataSet>>,
    /// Serializes flag changes and structure changes with their notifications.
    mutation: Mutex<()>,
    listeners: RwLock<Vec<StateChangeListener>>,
}

impl Configurator {
    /// Validate a loaded configuration and register every node in it.
    pub fn new(config: PubSubConfiguration) -> Result<Self, ConfigError> {
        config.validate()?;

        let PubSubConfiguration {
            enabled,
            connections,
            published_data_sets,
        } = config;

        let mut tree = ConfigTree::new(enabled);
        let root = tree.root();
        for connection in connections {
            insert_connection(&mut tree, root, connection);
        }

        let configurator = Self {
            tree: RwLock::new(tree),
            data_sets: RwLock::new(published_data_sets),
            mutation: Mutex::new(()),
            listeners: RwLock::new(Vec::new()),
        };
        info!(
            nodes = configurator.read_tree().live().count(),
            "PubSub configuration loaded"
        );
        Ok(configurator)
    }

    // ========================================================================
    // State machine
    // ========================================================================

    /// Set a node's own-enabled flag.
    ///
    /// Fails with `InvalidState` if the node is not currently `Disabled`.
    pub fn enable(&self, node: NodeHandle) -> Result<(), PubSubError> {
        self.set_enabled(node, true)
    }

    /// Clear a node's own-enabled flag.
    ///
    /// Fails with `InvalidState` if the node already is `Disabled`.
    pub fn disable(&self, node: NodeHandle) -> Result<(), PubSubError> {
        self.set_enabled(node, false)
    }

    /// Current derived state of a node.
    pub fn find_state(&self, node: NodeHandle) -> Result<PubSubState, PubSubError> {
        let tree = self.read_tree();
        let index = resolve(&tree, node)?;
        Ok(tree.state(index))
    }

    fn set_enabled(&self, node: NodeHandle, enabled: bool) -> Result<(), PubSubError> {
        let _guard = self.lock_mutation();

        let changes = {
            let tree = self.read_tree();
            let index = resolve(&tree, node)?;
            let subtree = tree.subtree(index);
            let before: Vec<PubSubState> = subtree.iter().map(|&i| tree.state(i)).collect();

            let flipped = tree
                .node(index)
                .map(|n| n.set_enabled(enabled))
                .unwrap_or(false);
            if !flipped {
                let current = tree.state(index);
                debug!(%node, %current, enabled, "Rejected state transition");
                return Err(PubSubError::invalid_state(if enabled {
                    format!("{node} is already enabled ({current})")
                } else {
                    format!("{node} is already disabled")
                }));
            }

            subtree
                .iter()
                .zip(before)
                .filter_map(|(&i, old)| {
                    let new = tree.state(i);
                    (old != new).then(|| StateChange {
                        node: tree.handle(i),
                        kind: tree.node(i).map(|n| n.data.kind()).unwrap_or(NodeKind::Root),
                        old,
                        new,
                    })
                })
                .collect::<Vec<_>>()
        };

        info!(%node, enabled, changed = changes.len(), "Own-enabled flag changed");
        self.notify(&changes);
        Ok(())
    }

    // ========================================================================
    // Structure
    // ========================================================================

    /// Register a connection (with its groups) under the root.
    pub fn add_connection(&self, config: ConnectionConfig) -> Result<NodeHandle, PubSubError> {
        if config.name.is_empty() {
            return Err(PubSubError::invalid_argument(
                ConfigError::EmptyName { kind: "Connection" }.to_string(),
            ));
        }
        let mut group_ids = std::collections::HashSet::new();
        for group in &config.writer_groups {
            self.check_writer_group(group)?;
            if !group_ids.insert(group.writer_group_id) {
                return Err(PubSubError::invalid_argument(
                    ConfigError::DuplicateWriterGroupId {
                        connection: config.name.clone(),
                        id: group.writer_group_id,
                    }
                    .to_string(),
                ));
            }
        }
        let root = self.root();
        self.add_node(root, NodeKind::Connection, |tree, parent| {
            Ok(insert_connection(tree, parent, config))
        })
    }

    /// Register a writer group (with its writers) under a connection.
    pub fn add_writer_group(
        &self,
        connection: NodeHandle,
        config: WriterGroupConfig,
    ) -> Result<NodeHandle, PubSubError> {
        self.check_writer_group(&config)?;
        self.add_node(connection, NodeKind::WriterGroup, |tree, parent| {
            check_unique_id(tree, parent, NodeKind::WriterGroup, config.writer_group_id)?;
            Ok(insert_writer_group(tree, parent, config))
        })
    }

    /// Register a reader group (with its readers) under a connection.
    pub fn add_reader_group(
        &self,
        connection: NodeHandle,
        config: ReaderGroupConfig,
    ) -> Result<NodeHandle, PubSubError> {
        self.add_node(connection, NodeKind::ReaderGroup, |tree, parent| {
            Ok(insert_reader_group(tree, parent, config))
        })
    }

    /// Register a dataset writer under a writer group.
    pub fn add_dataset_writer(
        &self,
        writer_group: NodeHandle,
        config: DataSetWriterConfig,
    ) -> Result<NodeHandle, PubSubError> {
        self.check_data_set(&config)?;
        self.add_node(writer_group, NodeKind::DataSetWriter, |tree, parent| {
            check_unique_id(tree, parent, NodeKind::DataSetWriter, config.dataset_writer_id)?;
            let enabled = config.enabled;
            Ok(tree.insert(parent, NodeData::DataSetWriter(config), enabled))
        })
    }

    /// Register a dataset reader under a reader group.
    pub fn add_dataset_reader(
        &self,
        reader_group: NodeHandle,
        config: DataSetReaderConfig,
    ) -> Result<NodeHandle, PubSubError> {
        self.add_node(reader_group, NodeKind::DataSetReader, |tree, parent| {
            let enabled = config.enabled;
            Ok(tree.insert(parent, NodeData::DataSetReader(config), enabled))
        })
    }

    /// Add a published dataset writers can refer to.
    pub fn add_published_data_set(&self, data_set: PublishedDataSet) -> Result<(), PubSubError> {
        let single = PubSubConfiguration {
            published_data_sets: vec![data_set.clone()],
            ..Default::default()
        };
        single
            .validate()
            .map_err(|e| PubSubError::invalid_argument(e.to_string()))?;

        let mut data_sets = self.data_sets.write().unwrap_or_else(PoisonError::into_inner);
        if data_sets.iter().any(|ds| ds.name == data_set.name) {
            return Err(PubSubError::invalid_argument(format!(
                "published dataset '{}' already exists",
                data_set.name
            )));
        }
        data_sets.push(data_set);
        Ok(())
    }

    /// Remove a node and everything below it.
    ///
    /// Nodes that were not `Disabled` are reported as changing to `Disabled`.
    /// Their handles are unknown afterwards.
    pub fn remove(&self, node: NodeHandle) -> Result<(), PubSubError> {
        let _guard = self.lock_mutation();

        let changes = {
            let mut tree = self.write_tree();
            let index = resolve(&tree, node)?;
            if index == tree.root() {
                return Err(PubSubError::invalid_argument(
                    "the configuration root cannot be removed",
                ));
            }

            let changes: Vec<StateChange> = tree
                .subtree(index)
                .into_iter()
                .filter_map(|i| {
                    let old = tree.state(i);
                    (old != PubSubState::Disabled).then(|| StateChange {
                        node: tree.handle(i),
                        kind: tree.node(i).map(|n| n.data.kind()).unwrap_or(NodeKind::Root),
                        old,
                        new: PubSubState::Disabled,
                    })
                })
                .collect();

            tree.remove_subtree(index);
            changes
        };

        info!(%node, "Configuration node removed");
        self.notify(&changes);
        Ok(())
    }

    fn add_node(
        &self,
        parent: NodeHandle,
        kind: NodeKind,
        insert: impl FnOnce(&mut ConfigTree, u32) -> Result<u32, PubSubError>,
    ) -> Result<NodeHandle, PubSubError> {
        let _guard = self.lock_mutation();

        let (handle, changes) = {
            let mut tree = self.write_tree();
            let parent_index = resolve(&tree, parent)?;
            let parent_kind = tree
                .node(parent_index)
                .map(|n| n.data.kind())
                .unwrap_or(NodeKind::Root);
            if !parent_kind.can_contain(kind) {
                return Err(PubSubError::invalid_argument(format!(
                    "a {parent_kind} cannot contain a {kind}"
                )));
            }

            let index = insert(&mut *tree, parent_index)?;
            let changes: Vec<StateChange> = tree
                .subtree(index)
                .into_iter()
                .filter_map(|i| {
                    let new = tree.state(i);
                    (new != PubSubState::Disabled).then(|| StateChange {
                        node: tree.handle(i),
                        kind: tree.node(i).map(|n| n.data.kind()).unwrap_or(NodeKind::Root),
                        old: PubSubState::Disabled,
                        new,
                    })
                })
                .collect();
            (tree.handle(index), changes)
        };

        debug!(%parent, %handle, %kind, "Configuration node added");
        self.notify(&changes);
        Ok(handle)
    }

    fn check_writer_group(&self, config: &WriterGroupConfig) -> Result<(), PubSubError> {
        config
            .validate()
            .map_err(|e| PubSubError::invalid_argument(e.to_string()))?;
        config
            .dataset_writers
            .iter()
            .try_for_each(|w| self.check_data_set(w))
    }

    fn check_data_set(&self, writer: &DataSetWriterConfig) -> Result<(), PubSubError> {
        if self.published_data_set(&writer.data_set_name).is_some() {
            Ok(())
        } else {
            Err(PubSubError::invalid_argument(
                ConfigError::UnknownDataSet {
                    writer: writer.name.clone(),
                    data_set: writer.data_set_name.clone(),
                }
                .to_string(),
            ))
        }
    }

    // ========================================================================
    // Notifications
    // ========================================================================

    /// Register a callback for derived state changes.
    pub fn on_state_changed(&self, listener: StateChangeListener) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn notify(&self, changes: &[StateChange]) {
        if changes.is_empty() {
            return;
        }
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for change in changes {
            debug!(node = %change.node, kind = %change.kind, old = %change.old, new = %change.new, "State changed");
            for listener in &listeners {
                listener(change);
            }
        }
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Handle of the configuration root.
    pub fn root(&self) -> NodeHandle {
        let tree = self.read_tree();
        tree.handle(tree.root())
    }

    /// Whether `node` is a live node of this configurator.
    pub fn is_tracked(&self, node: NodeHandle) -> bool {
        self.read_tree().resolve(node).is_some()
    }

    pub fn kind(&self, node: NodeHandle) -> Result<NodeKind, PubSubError> {
        self.with_node(node, |tree, i| {
            tree.node(i).map(|n| n.data.kind()).unwrap_or(NodeKind::Root)
        })
    }

    pub fn name(&self, node: NodeHandle) -> Result<String, PubSubError> {
        self.with_node(node, |tree, i| {
            tree.node(i)
                .map(|n| n.data.name().to_string())
                .unwrap_or_default()
        })
    }

    pub fn parent(&self, node: NodeHandle) -> Result<Option<NodeHandle>, PubSubError> {
        self.with_node(node, |tree, i| {
            tree.node(i).and_then(|n| n.parent).map(|p| tree.handle(p))
        })
    }

    pub fn children(&self, node: NodeHandle) -> Result<Vec<NodeHandle>, PubSubError> {
        self.with_node(node, |tree, i| {
            tree.node(i)
                .map(|n| n.children.iter().map(|&c| tree.handle(c)).collect())
                .unwrap_or_default()
        })
    }

    /// The connection a node belongs to (the node itself for a connection).
    pub fn connection_of(&self, node: NodeHandle) -> Result<NodeHandle, PubSubError> {
        let tree = self.read_tree();
        let index = resolve(&tree, node)?;
        tree.ancestor_of_kind(index, NodeKind::Connection)
            .map(|c| tree.handle(c))
            .ok_or_else(|| PubSubError::invalid_argument(format!("{node} has no connection")))
    }

    /// All live nodes of a kind, in registration order.
    pub fn nodes_of_kind(&self, kind: NodeKind) -> Vec<NodeHandle> {
        let tree = self.read_tree();
        tree.live()
            .filter(|&i| tree.node(i).map(|n| n.data.kind()) == Some(kind))
            .map(|i| tree.handle(i))
            .collect()
    }

    /// First live node of a kind with the given name.
    pub fn find(&self, kind: NodeKind, name: &str) -> Option<NodeHandle> {
        let tree = self.read_tree();
        let found = tree
            .live()
            .find(|&i| {
                tree.node(i)
                    .map(|n| n.data.kind() == kind && n.data.name() == name)
                    .unwrap_or(false)
            })
            .map(|i| tree.handle(i));
        found
    }

    /// Connection settings (without groups), with the current own-enabled flag.
    pub fn connection(&self, node: NodeHandle) -> Result<ConnectionConfig, PubSubError> {
        self.with_data(node, |data, enabled| match data {
            NodeData::Connection(c) => Some(ConnectionConfig {
                enabled,
                ..c.clone()
            }),
            _ => None,
        })
    }

    /// Writer group settings (without writers), with the current own-enabled flag.
    pub fn writer_group(&self, node: NodeHandle) -> Result<WriterGroupConfig, PubSubError> {
        self.with_data(node, |data, enabled| match data {
            NodeData::WriterGroup(c) => Some(WriterGroupConfig {
                enabled,
                ..c.clone()
            }),
            _ => None,
        })
    }

    /// Dataset writer settings, with the current own-enabled flag.
    pub fn dataset_writer(&self, node: NodeHandle) -> Result<DataSetWriterConfig, PubSubError> {
        self.with_data(node, |data, enabled| match data {
            NodeData::DataSetWriter(c) => Some(DataSetWriterConfig {
                enabled,
                ..c.clone()
            }),
            _ => None,
        })
    }

    pub fn published_data_set(&self, name: &str) -> Option<PublishedDataSet> {
        self.data_sets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|ds| ds.name == name)
            .cloned()
    }

    /// Rebuild a configuration value from the live tree and current flags.
    pub fn snapshot(&self) -> PubSubConfiguration {
        let tree = self.read_tree();
        let root = tree.root();
        let enabled_of = |i: u32| tree.node(i).map(|n| n.own_enabled()).unwrap_or(false);
        let children_of = |i: u32| {
            tree.node(i)
                .map(|n| n.children.clone())
                .unwrap_or_default()
        };

        let mut connections = Vec::new();
        for c in children_of(root) {
            let Some(NodeData::Connection(conn)) = tree.node(c).map(|n| &n.data) else {
                continue;
            };
            let mut conn = ConnectionConfig {
                enabled: enabled_of(c),
                ..conn.clone()
            };
            for g in children_of(c) {
                match tree.node(g).map(|n| &n.data) {
                    Some(NodeData::WriterGroup(group)) => {
                        let mut group = WriterGroupConfig {
                            enabled: enabled_of(g),
                            ..group.clone()
                        };
                        for w in children_of(g) {
                            if let Some(NodeData::DataSetWriter(writer)) =
                                tree.node(w).map(|n| &n.data)
                            {
                                group.dataset_writers.push(DataSetWriterConfig {
                                    enabled: enabled_of(w),
                                    ..writer.clone()
                                });
                            }
                        }
                        conn.writer_groups.push(group);
                    }
                    Some(NodeData::ReaderGroup(group)) => {
                        let mut group = ReaderGroupConfig {
                            enabled: enabled_of(g),
                            ..group.clone()
                        };
                        for r in children_of(g) {
                            if let Some(NodeData::DataSetReader(reader)) =
                                tree.node(r).map(|n| &n.data)
                            {
                                group.dataset_readers.push(DataSetReaderConfig {
                                    enabled: enabled_of(r),
                                    ..reader.clone()
                                });
                            }
                        }
                        conn.reader_groups.push(group);
                    }
                    _ => {}
                }
            }
            connections.push(conn);
        }

        PubSubConfiguration {
            enabled: enabled_of(root),
            connections,
            published_data_sets: self
                .data_sets
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    fn with_node<T>(
        &self,
        node: NodeHandle,
        f: impl FnOnce(&ConfigTree, u32) -> T,
    ) -> Result<T, PubSubError> {
        let tree = self.read_tree();
        let index = resolve(&tree, node)?;
        Ok(f(&*tree, index))
    }

    fn with_data<T>(
        &self,
        node: NodeHandle,
        f: impl FnOnce(&NodeData, bool) -> Option<T>,
    ) -> Result<T, PubSubError> {
        let tree = self.read_tree();
        let index = resolve(&tree, node)?;
        tree.node(index)
            .and_then(|n| f(&n.data, n.own_enabled()))
            .ok_or_else(|| PubSubError::invalid_argument(format!("{node} has another node kind")))
    }

    fn read_tree(&self) -> RwLockReadGuard<'_, ConfigTree> {
        self.tree.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_tree(&self) -> RwLockWriteGuard<'_, ConfigTree> {
        self.tree.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_mutation(&self) -> MutexGuard<'_, ()> {
        self.mutation.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Configurator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Configurator")
            .field("nodes", &self.read_tree().live().count())
            .finish()
    }
}

fn resolve(tree: &ConfigTree, node: NodeHandle) -> Result<u32, PubSubError> {
    tree.resolve(node)
        .ok_or_else(|| PubSubError::invalid_argument(format!("{node} is not part of this configuration")))
}

/// Writer group ids are unique per connection, dataset writer ids per group.
fn check_unique_id(
    tree: &ConfigTree,
    parent: u32,
    kind: NodeKind,
    id: u16,
) -> Result<(), PubSubError> {
    let siblings = tree.node(parent).map(|n| n.children.as_slice()).unwrap_or_default();
    let taken = siblings.iter().any(|&c| match tree.node(c).map(|n| &n.data) {
        Some(NodeData::WriterGroup(g)) => kind == NodeKind::WriterGroup && g.writer_group_id == id,
        Some(NodeData::DataSetWriter(w)) => {
            kind == NodeKind::DataSetWriter && w.dataset_writer_id == id
        }
        _ => false,
    });
    if taken {
        return Err(PubSubError::invalid_argument(format!(
            "{kind} id {id} is already used under {}",
            tree.handle(parent)
        )));
    }
    Ok(())
}

fn insert_connection(tree: &mut ConfigTree, parent: u32, mut config: ConnectionConfig) -> u32 {
    let writer_groups = std::mem::take(&mut config.writer_groups);
    let reader_groups = std::mem::take(&mut config.reader_groups);
    let enabled = config.enabled;

    let index = tree.insert(parent, NodeData::Connection(config), enabled);
    for group in writer_groups {
        insert_writer_group(tree, index, group);
    }
    for group in reader_groups {
        insert_reader_group(tree, index, group);
    }
    index
}

fn insert_writer_group(tree: &mut ConfigTree, parent: u32, mut config: WriterGroupConfig) -> u32 {
    let writers = std::mem::take(&mut config.dataset_writers);
    let enabled = config.enabled;

    let index = tree.insert(parent, NodeData::WriterGroup(config), enabled);
    for writer in writers {
        let enabled = writer.enabled;
        tree.insert(index, NodeData::DataSetWriter(writer), enabled);
    }
    index
}

fn insert_reader_group(tree: &mut ConfigTree, parent: u32, mut config: ReaderGroupConfig) -> u32 {
    let readers = std::mem::take(&mut config.dataset_readers);
    let enabled = config.enabled;

    let index = tree.insert(parent, NodeData::ReaderGroup(config), enabled);
    for reader in readers {
        let enabled = reader.enabled;
        tree.insert(index, NodeData::DataSetReader(reader), enabled);
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PublishedVariable, PublisherId};
    use crate::node_id::NodeId;
    use pretty_assertions::assert_eq;
    use PubSubState::{Disabled, Operational, Paused};

    fn data_set() -> PublishedDataSet {
        PublishedDataSet {
            name: "Boiler".to_string(),
            fields: vec![PublishedVariable::new(
                "Temperature",
                NodeId::string(2, "Boiler.Temperature"),
            )],
        }
    }

    /// Root -> Connection -> WriterGroup -> DataSetWriter, everything disabled.
    fn disabled_chain() -> PubSubConfiguration {
        let mut group = WriterGroupConfig::new("WG1", 1, 100.0);
        group.dataset_writers.push(DataSetWriterConfig {
            name: "DSW1".to_string(),
            dataset_writer_id: 1,
            data_set_name: "Boiler".to_string(),
            ..Default::default()
        });
        PubSubConfiguration {
            enabled: false,
            connections: vec![ConnectionConfig {
                name: "Conn1".to_string(),
                publisher_id: PublisherId::UInt(7),
                writer_groups: vec![group],
                reader_groups: vec![ReaderGroupConfig {
                    name: "RG1".to_string(),
                    dataset_readers: vec![DataSetReaderConfig {
                        name: "DSR1".to_string(),
                        ..Default::default()
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            }],
            published_data_sets: vec![data_set()],
        }
    }

    struct Chain {
        root: NodeHandle,
        connection: NodeHandle,
        group: NodeHandle,
        writer: NodeHandle,
    }

    fn chain(configurator: &Configurator) -> Chain {
        Chain {
            root: configurator.root(),
            connection: configurator.find(NodeKind::Connection, "Conn1").unwrap(),
            group: configurator.find(NodeKind::WriterGroup, "WG1").unwrap(),
            writer: configurator.find(NodeKind::DataSetWriter, "DSW1").unwrap(),
        }
    }

    fn states(configurator: &Configurator, c: &Chain) -> [PubSubState; 4] {
        [c.root, c.connection, c.group, c.writer].map(|n| configurator.find_state(n).unwrap())
    }

    #[test]
    fn test_enable_sequence_scenario() {
        let configurator = Configurator::new(disabled_chain()).unwrap();
        let c = chain(&configurator);
        assert_eq!(states(&configurator, &c), [Disabled; 4]);

        configurator.enable(c.connection).unwrap();
        assert_eq!(states(&configurator, &c), [Disabled, Paused, Disabled, Disabled]);

        configurator.enable(c.group).unwrap();
        assert_eq!(states(&configurator, &c), [Disabled, Paused, Paused, Disabled]);

        configurator.enable(c.writer).unwrap();
        assert_eq!(states(&configurator, &c), [Disabled, Paused, Paused, Paused]);

        configurator.enable(c.root).unwrap();
        assert_eq!(states(&configurator, &c), [Operational; 4]);
    }

    #[test]
    fn test_enable_twice_is_invalid_state() {
        let configurator = Configurator::new(disabled_chain()).unwrap();
        let c = chain(&configurator);

        configurator.enable(c.group).unwrap();
        let err = configurator.enable(c.group).unwrap_err();
        assert!(err.is_invalid_state());

        configurator.disable(c.group).unwrap();
        let err = configurator.disable(c.group).unwrap_err();
        assert!(err.is_invalid_state());

        // Disabling an already disabled node fails even at the root.
        assert!(configurator.disable(c.root).unwrap_err().is_invalid_state());
    }

    #[test]
    fn test_foreign_handles_are_invalid_argument() {
        let configurator = Configurator::new(disabled_chain()).unwrap();
        let twin = Configurator::new(disabled_chain()).unwrap();
        let foreign = chain(&twin);

        assert!(configurator.enable(foreign.group).unwrap_err().is_invalid_argument());
        assert!(configurator.disable(foreign.group).unwrap_err().is_invalid_argument());
        assert!(configurator.find_state(foreign.root).unwrap_err().is_invalid_argument());

        // The twin's own operations are untouched.
        twin.enable(foreign.group).unwrap();
        assert_eq!(twin.find_state(foreign.group).unwrap(), Paused);
    }

    #[test]
    fn test_disable_parent_pauses_children_without_touching_flags() {
        let mut config = disabled_chain();
        config.enabled = true;
        config.connections[0].enabled = true;
        config.connections[0].writer_groups[0].enabled = true;
        config.connections[0].writer_groups[0].dataset_writers[0].enabled = true;
        let configurator = Configurator::new(config).unwrap();
        let c = chain(&configurator);
        assert_eq!(states(&configurator, &c), [Operational; 4]);

        configurator.disable(c.connection).unwrap();
        assert_eq!(states(&configurator, &c), [Operational, Disabled, Paused, Paused]);
        assert!(configurator.writer_group(c.group).unwrap().enabled);

        configurator.enable(c.connection).unwrap();
        assert_eq!(states(&configurator, &c), [Operational; 4]);
    }

    #[test]
    fn test_state_change_notifications() {
        let configurator = Configurator::new(disabled_chain()).unwrap();
        let c = chain(&configurator);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        configurator.on_state_changed(Arc::new(move |change: &StateChange| {
            sink.lock().unwrap().push(change.clone());
        }));

        configurator.enable(c.connection).unwrap();
        configurator.enable(c.group).unwrap();
        seen.lock().unwrap().clear();

        configurator.enable(c.root).unwrap();
        let changes = seen.lock().unwrap().clone();
        assert_eq!(
            changes,
            vec![
                StateChange {
                    node: c.root,
                    kind: NodeKind::Root,
                    old: Disabled,
                    new: Operational
                },
                StateChange {
                    node: c.connection,
                    kind: NodeKind::Connection,
                    old: Paused,
                    new: Operational
                },
                StateChange {
                    node: c.group,
                    kind: NodeKind::WriterGroup,
                    old: Paused,
                    new: Operational
                },
            ]
        );

        // A rejected transition reports nothing.
        seen.lock().unwrap().clear();
        assert!(configurator.enable(c.root).is_err());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_add_and_remove_nodes() {
        let configurator = Configurator::new(disabled_chain()).unwrap();
        let c = chain(&configurator);

        let mut group = WriterGroupConfig::new("WG2", 2, 250.0);
        group.enabled = true;
        let added = configurator.add_writer_group(c.connection, group).unwrap();
        assert_eq!(configurator.kind(added).unwrap(), NodeKind::WriterGroup);
        assert_eq!(configurator.parent(added).unwrap(), Some(c.connection));
        assert_eq!(configurator.find_state(added).unwrap(), Paused);
        assert_eq!(configurator.connection_of(added).unwrap(), c.connection);

        configurator.remove(c.group).unwrap();
        assert!(!configurator.is_tracked(c.group));
        assert!(!configurator.is_tracked(c.writer));
        assert!(configurator.enable(c.group).unwrap_err().is_invalid_argument());
        assert_eq!(configurator.children(c.connection).unwrap().len(), 2);

        assert!(configurator.remove(c.root).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_find_by_kind_and_name() {
        let configurator = Configurator::new(disabled_chain()).unwrap();
        let c = chain(&configurator);

        assert_eq!(configurator.find(NodeKind::WriterGroup, "WG1"), Some(c.group));
        assert_eq!(configurator.find(NodeKind::DataSetWriter, "WG1"), None);
        assert_eq!(configurator.find(NodeKind::Connection, "Missing"), None);

        configurator.remove(c.group).unwrap();
        assert_eq!(configurator.find(NodeKind::WriterGroup, "WG1"), None);
    }

    #[test]
    fn test_add_rejects_duplicate_ids() {
        let configurator = Configurator::new(disabled_chain()).unwrap();
        let c = chain(&configurator);

        let err = configurator
            .add_writer_group(c.connection, WriterGroupConfig::new("WG1 again", 1, 100.0))
            .unwrap_err();
        assert!(err.is_invalid_argument());

        let writer = DataSetWriterConfig {
            name: "DSW2".to_string(),
            dataset_writer_id: 1,
            data_set_name: "Boiler".to_string(),
            ..Default::default()
        };
        let err = configurator
            .add_dataset_writer(c.group, writer.clone())
            .unwrap_err();
        assert!(err.is_invalid_argument());
        assert_eq!(configurator.children(c.group).unwrap(), vec![c.writer]);

        // The same ids are fine under another parent.
        let other = configurator
            .add_writer_group(c.connection, WriterGroupConfig::new("WG2", 2, 100.0))
            .unwrap();
        configurator.add_dataset_writer(other, writer).unwrap();

        // Groups of a new connection must not collide with each other.
        let err = configurator
            .add_connection(ConnectionConfig {
                name: "Conn2".to_string(),
                writer_groups: vec![
                    WriterGroupConfig::new("A", 5, 100.0),
                    WriterGroupConfig::new("B", 5, 100.0),
                ],
                ..Default::default()
            })
            .unwrap_err();
        assert!(err.is_invalid_argument());
        assert_eq!(configurator.find(NodeKind::Connection, "Conn2"), None);
    }

    #[test]
    fn test_add_rejects_wrong_parent_kind_and_bad_config() {
        let configurator = Configurator::new(disabled_chain()).unwrap();
        let c = chain(&configurator);

        let err = configurator
            .add_writer_group(c.group, WriterGroupConfig::new("Nested", 9, 100.0))
            .unwrap_err();
        assert!(err.is_invalid_argument());

        let err = configurator
            .add_writer_group(c.connection, WriterGroupConfig::new("Zero", 9, 0.0))
            .unwrap_err();
        assert!(err.is_invalid_argument());

        let err = configurator
            .add_dataset_writer(
                c.group,
                DataSetWriterConfig {
                    name: "Orphan".to_string(),
                    dataset_writer_id: 2,
                    data_set_name: "Nope".to_string(),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn test_removal_reports_disabled() {
        let mut config = disabled_chain();
        config.enabled = true;
        config.connections[0].enabled = true;
        config.connections[0].writer_groups[0].enabled = true;
        let configurator = Configurator::new(config).unwrap();
        let c = chain(&configurator);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        configurator.on_state_changed(Arc::new(move |change: &StateChange| {
            sink.lock().unwrap().push((change.node, change.new));
        }));

        configurator.remove(c.connection).unwrap();
        assert_eq!(
            seen.lock().unwrap().clone(),
            vec![(c.connection, Disabled), (c.group, Disabled)]
        );
    }

    #[test]
    fn test_snapshot_reflects_current_flags() {
        let configurator = Configurator::new(disabled_chain()).unwrap();
        let c = chain(&configurator);
        configurator.enable(c.group).unwrap();

        let snapshot = configurator.snapshot();
        assert!(!snapshot.enabled);
        let group = &snapshot.connections[0].writer_groups[0];
        assert!(group.enabled);
        assert_eq!(group.dataset_writers.len(), 1);
        assert_eq!(snapshot.connections[0].reader_groups[0].dataset_readers.len(), 1);
        assert!(snapshot.validate().is_ok());
    }

    #[test]
    fn test_typed_lookups_reject_other_kinds() {
        let configurator = Configurator::new(disabled_chain()).unwrap();
        let c = chain(&configurator);

        assert_eq!(configurator.writer_group(c.group).unwrap().writer_group_id, 1);
        assert!(configurator.writer_group(c.writer).unwrap_err().is_invalid_argument());
        assert_eq!(configurator.dataset_writer(c.writer).unwrap().name, "DSW1");
        assert_eq!(
            configurator.connection(c.connection).unwrap().publisher_id,
            PublisherId::UInt(7)
        );
        assert_eq!(configurator.name(c.root).unwrap(), "PubSubConfiguration");
        assert_eq!(configurator.nodes_of_kind(NodeKind::DataSetReader).len(), 1);
    }
}
