//! Configuration tree storage.
//!
//! Nodes live in an append-only arena. A [`NodeHandle`] names a node by the
//! identity of the tree that created it plus its slot, so a handle from another
//! tree (even one built from an identical configuration) never resolves here.
//! Removed slots are left empty and never reused.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::config::{
    ConnectionConfig, DataSetReaderConfig, DataSetWriterConfig, ReaderGroupConfig,
    WriterGroupConfig,
};
use crate::model::PubSubState;

static NEXT_TREE_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a tracked configuration node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle {
    tree: u64,
    index: u32,
}

impl NodeHandle {
    /// Slot index inside the owning tree.
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl std::fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node#{}.{}", self.tree, self.index)
    }
}

/// Level of a node in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Root,
    Connection,
    WriterGroup,
    ReaderGroup,
    DataSetWriter,
    DataSetReader,
}

impl NodeKind {
    /// Whether a node of this kind may own a node of `child` kind.
    pub fn can_contain(self, child: NodeKind) -> bool {
        matches!(
            (self, child),
            (NodeKind::Root, NodeKind::Connection)
                | (NodeKind::Connection, NodeKind::WriterGroup)
                | (NodeKind::Connection, NodeKind::ReaderGroup)
                | (NodeKind::WriterGroup, NodeKind::DataSetWriter)
                | (NodeKind::ReaderGroup, NodeKind::DataSetReader)
        )
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeKind::Root => "PubSubConfiguration",
            NodeKind::Connection => "Connection",
            NodeKind::WriterGroup => "WriterGroup",
            NodeKind::ReaderGroup => "ReaderGroup",
            NodeKind::DataSetWriter => "DataSetWriter",
            NodeKind::DataSetReader => "DataSetReader",
        };
        f.write_str(s)
    }
}

/// Domain fields of a node, with child lists stripped.
#[derive(Debug, Clone)]
pub(crate) enum NodeData {
    Root,
    Connection(ConnectionConfig),
    WriterGroup(WriterGroupConfig),
    ReaderGroup(ReaderGroupConfig),
    DataSetWriter(DataSetWriterConfig),
    DataSetReader(DataSetReaderConfig),
}

impl NodeData {
    pub(crate) fn kind(&self) -> NodeKind {
        match self {
            NodeData::Root => NodeKind::Root,
            NodeData::Connection(_) => NodeKind::Connection,
            NodeData::WriterGroup(_) => NodeKind::WriterGroup,
            NodeData::ReaderGroup(_) => NodeKind::ReaderGroup,
            NodeData::DataSetWriter(_) => NodeKind::DataSetWriter,
            NodeData::DataSetReader(_) => NodeKind::DataSetReader,
        }
    }

    pub(crate) fn name(&self) -> &str {
        match self {
            NodeData::Root => "PubSubConfiguration",
            NodeData::Connection(c) => &c.name,
            NodeData::WriterGroup(c) => &c.name,
            NodeData::ReaderGroup(c) => &c.name,
            NodeData::DataSetWriter(c) => &c.name,
            NodeData::DataSetReader(c) => &c.name,
        }
    }
}

pub(crate) struct ConfigNode {
    pub(crate) data: NodeData,
    pub(crate) parent: Option<u32>,
    pub(crate) children: Vec<u32>,
    /// The node's own-enabled flag; the only mutable bit of state.
    enabled: AtomicBool,
}

impl ConfigNode {
    pub(crate) fn own_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Flip the flag from `!to` to `to`. Returns false if it already was `to`.
    pub(crate) fn set_enabled(&self, to: bool) -> bool {
        self.enabled
            .compare_exchange(!to, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Arena holding every node of one configuration.
pub(crate) struct ConfigTree {
    id: u64,
    slots: Vec<Option<ConfigNode>>,
}

impl ConfigTree {
    /// A tree containing only the root node.
    pub(crate) fn new(root_enabled: bool) -> Self {
        let mut tree = Self {
            id: NEXT_TREE_ID.fetch_add(1, Ordering::Relaxed),
            slots: Vec::new(),
        };
        tree.slots.push(Some(ConfigNode {
            data: NodeData::Root,
            parent: None,
            children: Vec::new(),
            enabled: AtomicBool::new(root_enabled),
        }));
        tree
    }

    pub(crate) fn root(&self) -> u32 {
        0
    }

    pub(crate) fn handle(&self, index: u32) -> NodeHandle {
        NodeHandle {
            tree: self.id,
            index,
        }
    }

    /// Resolve a handle to a live slot of this tree.
    pub(crate) fn resolve(&self, handle: NodeHandle) -> Option<u32> {
        if handle.tree != self.id {
            return None;
        }
        match self.slots.get(handle.index as usize) {
            Some(Some(_)) => Some(handle.index),
            _ => None,
        }
    }

    pub(crate) fn node(&self, index: u32) -> Option<&ConfigNode> {
        self.slots.get(index as usize).and_then(Option::as_ref)
    }

    pub(crate) fn node_mut(&mut self, index: u32) -> Option<&mut ConfigNode> {
        self.slots.get_mut(index as usize).and_then(Option::as_mut)
    }

    /// Append a node under `parent`. The caller has checked the kinds.
    pub(crate) fn insert(&mut self, parent: u32, data: NodeData, enabled: bool) -> u32 {
        let index = self.slots.len() as u32;
        self.slots.push(Some(ConfigNode {
            data,
            parent: Some(parent),
            children: Vec::new(),
            enabled: AtomicBool::new(enabled),
        }));
        if let Some(p) = self.node_mut(parent) {
            p.children.push(index);
        }
        index
    }

    /// Empty the slots of `index` and all its descendants.
    pub(crate) fn remove_subtree(&mut self, index: u32) {
        let doomed = self.subtree(index);
        if let Some(parent) = self.node(index).and_then(|n| n.parent) {
            if let Some(p) = self.node_mut(parent) {
                p.children.retain(|&c| c != index);
            }
        }
        for i in doomed {
            self.slots[i as usize] = None;
        }
    }

    /// `index` followed by all of its descendants, parents before children.
    pub(crate) fn subtree(&self, index: u32) -> Vec<u32> {
        let mut out = Vec::new();
        let mut stack = vec![index];
        while let Some(i) = stack.pop() {
            if let Some(node) = self.node(i) {
                out.push(i);
                stack.extend(node.children.iter().rev());
            }
        }
        out
    }

    /// Derived state: walk from the node towards the root.
    pub(crate) fn state(&self, index: u32) -> PubSubState {
        let Some(node) = self.node(index) else {
            return PubSubState::Disabled;
        };
        if !node.own_enabled() {
            return PubSubState::Disabled;
        }

        let mut parent = node.parent;
        while let Some(p) = parent {
            match self.node(p) {
                Some(ancestor) if ancestor.own_enabled() => parent = ancestor.parent,
                _ => return PubSubState::Paused,
            }
        }
        PubSubState::Operational
    }

    /// Closest ancestor (or self) of the given kind.
    pub(crate) fn ancestor_of_kind(&self, index: u32, kind: NodeKind) -> Option<u32> {
        let mut current = Some(index);
        while let Some(i) = current {
            let node = self.node(i)?;
            if node.data.kind() == kind {
                return Some(i);
            }
            current = node.parent;
        }
        None
    }

    /// Live slot indices in creation order.
    pub(crate) fn live(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .map(|(i, _)| i as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Root -> Connection -> WriterGroup -> DataSetWriter, all with the given flags.
    fn chain(flags: [bool; 4]) -> (ConfigTree, [u32; 4]) {
        let mut tree = ConfigTree::new(flags[0]);
        let root = tree.root();
        let conn = tree.insert(
            root,
            NodeData::Connection(ConnectionConfig::default()),
            flags[1],
        );
        let group = tree.insert(
            conn,
            NodeData::WriterGroup(WriterGroupConfig::new("wg", 1, 100.0)),
            flags[2],
        );
        let writer = tree.insert(
            group,
            NodeData::DataSetWriter(DataSetWriterConfig::default()),
            flags[3],
        );
        (tree, [root, conn, group, writer])
    }

    #[test]
    fn test_state_derivation_all_flag_assignments() {
        for bits in 0u8..16 {
            let flags = [bits & 1 != 0, bits & 2 != 0, bits & 4 != 0, bits & 8 != 0];
            let (tree, nodes) = chain(flags);

            for (depth, &node) in nodes.iter().enumerate() {
                let expected = if !flags[depth] {
                    PubSubState::Disabled
                } else if flags[..depth].iter().all(|&f| f) {
                    PubSubState::Operational
                } else {
                    PubSubState::Paused
                };
                assert_eq!(tree.state(node), expected, "flags {flags:?} depth {depth}");
            }
        }
    }

    #[test]
    fn test_handles_are_tree_scoped() {
        let (a, nodes_a) = chain([true; 4]);
        let (b, _) = chain([true; 4]);

        let foreign = b.handle(nodes_a[2]);
        assert_eq!(a.resolve(a.handle(nodes_a[2])), Some(nodes_a[2]));
        assert_eq!(a.resolve(foreign), None);
    }

    #[test]
    fn test_remove_subtree_empties_slots() {
        let (mut tree, [root, conn, group, writer]) = chain([true; 4]);
        let group_handle = tree.handle(group);

        tree.remove_subtree(group);

        assert_eq!(tree.resolve(group_handle), None);
        assert!(tree.node(writer).is_none());
        assert!(tree.node(conn).unwrap().children.is_empty());
        assert_eq!(tree.live().collect::<Vec<_>>(), vec![root, conn]);

        // Slots are not reused.
        let again = tree.insert(
            conn,
            NodeData::WriterGroup(WriterGroupConfig::new("wg2", 2, 100.0)),
            true,
        );
        assert_ne!(again, group);
        assert_eq!(tree.resolve(group_handle), None);
    }

    #[test]
    fn test_subtree_order_and_ancestors() {
        let (tree, [root, conn, group, writer]) = chain([true; 4]);
        assert_eq!(tree.subtree(root), vec![root, conn, group, writer]);
        assert_eq!(
            tree.ancestor_of_kind(writer, NodeKind::Connection),
            Some(conn)
        );
        assert_eq!(tree.ancestor_of_kind(conn, NodeKind::WriterGroup), None);
    }

    #[test]
    fn test_set_enabled_only_flips_once() {
        let (tree, [root, ..]) = chain([false; 4]);
        let node = tree.node(root).unwrap();
        assert!(node.set_enabled(true));
        assert!(!node.set_enabled(true));
        assert!(node.own_enabled());
        assert!(node.set_enabled(false));
        assert!(!node.set_enabled(false));
    }
}
