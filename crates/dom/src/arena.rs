//! Arena-based mirror storage
//!
//! Nodes are keyed by the remote `NodeId`, relations are ids, and the
//! backend index maps `BackendNodeId` to whichever live node currently
//! carries it.
//!
//! ```text
//! nodes:          NodeId ──► DomNode { parent_id, slot, children: [NodeId] }
//! backend_index:  BackendNodeId ──► NodeId   (zero or one live node)
//! ```
//!
//! Invariants kept by every mutation:
//! - the arena is a forest; a node has at most one owner and the owner
//!   lists it in the relation named by its `slot`
//! - loaded `children` length equals `child_node_count`
//! - an event naming an unknown id changes nothing

use ahash::AHashMap;

use crate::error::{DomError, Result};
use crate::events::{
    AttributeModified, AttributeRemoved, CharacterDataModified, ChildNodeCountUpdated,
    ChildNodeInserted, ChildNodeRemoved, DistributedNodesUpdated, DomEvent, PseudoElementAdded,
    PseudoElementRemoved, SetChildNodes, ShadowRootPopped, ShadowRootPushed, TreeChange,
};
use crate::types::{
    Attributes, BackendNodeId, DomNode, IdList, Node, NodeDetails, NodeId, NodeType, Slot,
};

#[derive(Debug)]
pub struct DomArena {
    nodes: AHashMap<NodeId, DomNode>,

    /// Backend node ID → live NodeId
    backend_index: AHashMap<BackendNodeId, NodeId>,

    root_id: Option<NodeId>,

    /// Bumped whenever every NodeId is invalidated
    generation: u64,

    /// Bumped for every event that changed the mirror
    revision: u64,
}

impl DomArena {
    pub fn new() -> Self {
        Self::with_capacity(1024) // Pre-allocate for typical page
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: AHashMap::with_capacity(capacity),
            backend_index: AHashMap::with_capacity(capacity),
            root_id: None,
            generation: 0,
            revision: 0,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Replace the whole mirror with a fresh document snapshot
    pub fn load_document(&mut self, root: Node) -> Option<NodeId> {
        self.invalidate();
        let root_id = self.insert_subtree(root, None, Slot::Root)?;
        self.root_id = Some(root_id);
        Some(root_id)
    }

    /// Replace the mirror with a `getFlattenedDocument` snapshot
    pub fn load_flattened(&mut self, nodes: Vec<Node>) -> Option<NodeId> {
        let root = unflatten(nodes)?;
        self.load_document(root)
    }

    /// Forget everything; all NodeIds become stale
    pub fn invalidate(&mut self) {
        self.nodes.clear();
        self.backend_index.clear();
        self.root_id = None;
        self.generation += 1;
    }

    pub fn get(&self, node_id: NodeId) -> Result<&DomNode> {
        self.nodes
            .get(&node_id)
            .ok_or(DomError::NodeNotFound(node_id))
    }

    pub fn get_by_backend_id(&self, backend_id: BackendNodeId) -> Result<&DomNode> {
        let node_id = self
            .backend_index
            .get(&backend_id)
            .ok_or(DomError::BackendNodeNotFound(backend_id))?;
        self.get(*node_id)
    }

    pub fn node_id_for_backend(&self, backend_id: BackendNodeId) -> Option<NodeId> {
        self.backend_index.get(&backend_id).copied()
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    pub fn root_id(&self) -> Option<NodeId> {
        self.root_id
    }

    pub fn root(&self) -> Option<&DomNode> {
        self.root_id.and_then(|id| self.nodes.get(&id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DomNode> {
        self.nodes.values()
    }

    /// Loaded children in order; empty when not loaded
    pub fn children(&self, node_id: NodeId) -> Result<Vec<&DomNode>> {
        let node = self.get(node_id)?;
        node.child_ids().iter().map(|&id| self.get(id)).collect()
    }

    pub fn parent(&self, node_id: NodeId) -> Result<Option<&DomNode>> {
        let node = self.get(node_id)?;
        match node.parent_id {
            Some(parent_id) => Ok(Some(self.get(parent_id)?)),
            None => Ok(None),
        }
    }

    /// Depth-first over every owned node (iterative, no recursion)
    pub fn traverse_df<F>(&self, start_id: NodeId, mut visit: F) -> Result<()>
    where
        F: FnMut(&DomNode) -> Result<()>,
    {
        let mut stack = vec![start_id];

        while let Some(node_id) = stack.pop() {
            let node = self.get(node_id)?;
            visit(node)?;

            // Reverse so they're visited left-to-right
            stack.extend(node.owned_ids().into_iter().rev());
        }

        Ok(())
    }

    /// Ids of nodes matching predicate, ascending
    pub fn find<F>(&self, predicate: F) -> Vec<NodeId>
    where
        F: Fn(&DomNode) -> bool,
    {
        let mut ids: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|node| predicate(node))
            .map(|node| node.node_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn find_by_tag(&self, tag: &str) -> Vec<NodeId> {
        self.find(|node| node.tag_name().is_some_and(|name| name.eq_ignore_ascii_case(tag)))
    }

    /// Element carrying `id="..."`, lowest NodeId wins
    pub fn find_by_id(&self, id: &str) -> Option<NodeId> {
        self.find(|node| node.is_element() && node.attr("id") == Some(id))
            .into_iter()
            .next()
    }

    /// Concatenated text of the loaded subtree
    pub fn text_content(&self, node_id: NodeId) -> Result<String> {
        let mut text = String::new();
        self.traverse_df(node_id, |node| {
            if node.is_text() {
                text.push_str(&node.node_value);
            }
            Ok(())
        })?;
        Ok(text.trim().to_string())
    }

    /// Rebuild the wire form of a loaded subtree.
    ///
    /// `depth` counts levels below `node_id`; negative means unbounded.
    pub fn subtree(&self, node_id: NodeId, depth: i32) -> Result<Node> {
        let node = self.get(node_id)?;
        let mut wire = node.to_wire();
        if depth == 0 {
            return Ok(wire);
        }

        let next = if depth < 0 { depth } else { depth - 1 };
        let list = |ids: &Option<IdList>| -> Result<Option<Vec<Node>>> {
            ids.as_ref()
                .map(|ids| ids.iter().map(|&id| self.subtree(id, next)).collect())
                .transpose()
        };
        let single = |id: Option<NodeId>| -> Result<Option<Box<Node>>> {
            id.map(|id| self.subtree(id, next).map(Box::new))
                .transpose()
        };

        wire.children = list(&node.children)?;
        wire.shadow_roots = list(&node.shadow_roots)?;
        wire.pseudo_elements = list(&node.pseudo_elements)?;
        wire.content_document = single(node.content_document)?;
        wire.template_content = single(node.template_content)?;
        wire.imported_document = single(node.imported_document)?;
        Ok(wire)
    }

    /// Apply one mutation event. `None` when nothing changed.
    pub fn apply(&mut self, event: DomEvent) -> Option<TreeChange> {
        let change = self.apply_event(event);
        if change.is_some() {
            self.revision += 1;
        }
        change
    }

    fn apply_event(&mut self, event: DomEvent) -> Option<TreeChange> {
        match event {
            DomEvent::SetChildNodes(e) => self.set_child_nodes(e),
            DomEvent::ChildNodeInserted(e) => self.child_node_inserted(e),
            DomEvent::ChildNodeRemoved(e) => self.child_node_removed(e),
            DomEvent::ChildNodeCountUpdated(e) => self.child_node_count_updated(e),
            DomEvent::AttributeModified(e) => self.attribute_modified(e),
            DomEvent::AttributeRemoved(e) => self.attribute_removed(e),
            DomEvent::CharacterDataModified(e) => self.character_data_modified(e),
            DomEvent::DocumentUpdated => {
                self.invalidate();
                Some(TreeChange::DocumentInvalidated)
            }
            DomEvent::ShadowRootPushed(e) => self.shadow_root_pushed(e),
            DomEvent::ShadowRootPopped(e) => self.shadow_root_popped(e),
            DomEvent::PseudoElementAdded(e) => self.pseudo_element_added(e),
            DomEvent::PseudoElementRemoved(e) => self.pseudo_element_removed(e),
            DomEvent::DistributedNodesUpdated(e) => self.distributed_nodes_updated(e),
            DomEvent::InlineStyleInvalidated(e) => {
                let nodes: Vec<NodeId> = e
                    .node_ids
                    .into_iter()
                    .filter(|id| self.contains(*id))
                    .collect();
                if nodes.is_empty() {
                    None
                } else {
                    Some(TreeChange::InlineStyleInvalidated { nodes })
                }
            }
        }
    }

    fn set_child_nodes(&mut self, e: SetChildNodes) -> Option<TreeChange> {
        let Some(parent) = self.nodes.get_mut(&e.parent_id) else {
            tracing::warn!(parent_id = %e.parent_id, "setChildNodes for unknown parent");
            return None;
        };

        // Full replacement of whatever was loaded before
        let previous = parent.children.take();
        for old in previous.into_iter().flatten() {
            self.purge(old);
        }

        let ids = self.insert_list(e.nodes, e.parent_id, Slot::Child);
        let count = ids.len();
        let parent = self.nodes.get_mut(&e.parent_id)?;
        parent.child_node_count = Some(count as u32);
        parent.children = Some(ids);

        Some(TreeChange::ChildrenSet {
            parent: e.parent_id,
            count,
        })
    }

    fn child_node_inserted(&mut self, e: ChildNodeInserted) -> Option<TreeChange> {
        let parent_id = e.parent_node_id;
        let loaded = match self.nodes.get(&parent_id) {
            Some(parent) => parent.children_loaded(),
            None => {
                tracing::warn!(parent_id = %parent_id, node_id = %e.node.node_id, "childNodeInserted under unknown parent");
                return None;
            }
        };

        if !loaded {
            // Content was never fetched: only the count is authoritative here
            let moved = e.node.node_id;
            if self.contains(moved) && !self.is_self_or_ancestor(moved, Some(parent_id)) {
                self.remove_subtree(moved);
            }
            let parent = self.nodes.get_mut(&parent_id)?;
            let count = parent.child_node_count.unwrap_or(0) + 1;
            parent.child_node_count = Some(count);
            tracing::debug!(parent_id = %parent_id, count, "insert into unloaded parent, count only");
            return Some(TreeChange::ChildCountUpdated {
                node: parent_id,
                count,
            });
        }

        let node_id = self.insert_subtree(e.node, Some(parent_id), Slot::Child)?;

        // The insert may have evicted an earlier copy of the node, even the parent's own
        let parent = self.nodes.get_mut(&parent_id)?;
        let children = parent.children.get_or_insert_with(IdList::new);
        let index = match e.previous_node_id.non_zero() {
            None => 0,
            Some(previous) => match children.iter().position(|id| *id == previous) {
                Some(pos) => pos + 1,
                None => {
                    tracing::warn!(parent_id = %parent_id, previous_id = %previous, "previous sibling unknown, appending");
                    children.len()
                }
            },
        };
        children.insert(index, node_id);
        parent.child_node_count = Some(children.len() as u32);

        Some(TreeChange::NodeInserted {
            parent: parent_id,
            node: node_id,
        })
    }

    fn child_node_removed(&mut self, e: ChildNodeRemoved) -> Option<TreeChange> {
        let Some(node) = self.nodes.get(&e.node_id) else {
            tracing::debug!(node_id = %e.node_id, "childNodeRemoved for unknown node, ignoring");
            return None;
        };

        let parent = node.parent_id;
        if parent != Some(e.parent_node_id) {
            tracing::warn!(
                node_id = %e.node_id,
                reported_parent = %e.parent_node_id,
                mirrored_parent = ?parent,
                "childNodeRemoved parent mismatch, removing from mirrored parent"
            );
        }

        self.remove_subtree(e.node_id);
        Some(TreeChange::NodeRemoved {
            parent,
            node: e.node_id,
        })
    }

    fn child_node_count_updated(&mut self, e: ChildNodeCountUpdated) -> Option<TreeChange> {
        let Some(node) = self.nodes.get_mut(&e.node_id) else {
            tracing::debug!(node_id = %e.node_id, "childNodeCountUpdated for unknown node");
            return None;
        };

        let mismatched = node
            .children
            .as_ref()
            .map_or(false, |children| children.len() as u32 != e.child_node_count);
        let stale = if mismatched { node.children.take() } else { None };
        node.child_node_count = Some(e.child_node_count);

        // A loaded list that disagrees with the count is no longer trustworthy
        if let Some(stale) = stale {
            tracing::debug!(node_id = %e.node_id, "child count disagrees with loaded children, unloading");
            for id in stale {
                self.purge(id);
            }
        }

        Some(TreeChange::ChildCountUpdated {
            node: e.node_id,
            count: e.child_node_count,
        })
    }

    fn attribute_modified(&mut self, e: AttributeModified) -> Option<TreeChange> {
        let Some(node) = self.nodes.get_mut(&e.node_id) else {
            tracing::debug!(node_id = %e.node_id, "attributeModified for unknown node");
            return None;
        };
        node.attributes.set(&e.name, &e.value);
        Some(TreeChange::AttributeChanged {
            node: e.node_id,
            name: e.name,
        })
    }

    fn attribute_removed(&mut self, e: AttributeRemoved) -> Option<TreeChange> {
        let Some(node) = self.nodes.get_mut(&e.node_id) else {
            tracing::debug!(node_id = %e.node_id, "attributeRemoved for unknown node");
            return None;
        };
        node.attributes.remove(&e.name)?;
        Some(TreeChange::AttributeChanged {
            node: e.node_id,
            name: e.name,
        })
    }

    fn character_data_modified(&mut self, e: CharacterDataModified) -> Option<TreeChange> {
        let Some(node) = self.nodes.get_mut(&e.node_id) else {
            tracing::debug!(node_id = %e.node_id, "characterDataModified for unknown node");
            return None;
        };
        node.node_value = e.character_data;
        Some(TreeChange::CharacterDataChanged { node: e.node_id })
    }

    fn shadow_root_pushed(&mut self, e: ShadowRootPushed) -> Option<TreeChange> {
        if !self.contains(e.host_id) {
            tracing::warn!(host_id = %e.host_id, "shadowRootPushed for unknown host");
            return None;
        }
        let root_id = self.insert_subtree(e.root, Some(e.host_id), Slot::ShadowRoot)?;
        let host = self.nodes.get_mut(&e.host_id)?;
        push_unique(host.shadow_roots.get_or_insert_with(IdList::new), root_id);
        Some(TreeChange::ShadowRootsChanged { host: e.host_id })
    }

    fn shadow_root_popped(&mut self, e: ShadowRootPopped) -> Option<TreeChange> {
        self.remove_owned(e.host_id, e.root_id, Slot::ShadowRoot)?;
        Some(TreeChange::ShadowRootsChanged { host: e.host_id })
    }

    fn pseudo_element_added(&mut self, e: PseudoElementAdded) -> Option<TreeChange> {
        if !self.contains(e.parent_id) {
            tracing::warn!(parent_id = %e.parent_id, "pseudoElementAdded for unknown parent");
            return None;
        }
        let pseudo_id = self.insert_subtree(e.pseudo_element, Some(e.parent_id), Slot::PseudoElement)?;
        let parent = self.nodes.get_mut(&e.parent_id)?;
        push_unique(parent.pseudo_elements.get_or_insert_with(IdList::new), pseudo_id);
        Some(TreeChange::PseudoElementsChanged {
            parent: e.parent_id,
        })
    }

    fn pseudo_element_removed(&mut self, e: PseudoElementRemoved) -> Option<TreeChange> {
        self.remove_owned(e.parent_id, e.pseudo_element_id, Slot::PseudoElement)?;
        Some(TreeChange::PseudoElementsChanged {
            parent: e.parent_id,
        })
    }

    fn distributed_nodes_updated(&mut self, e: DistributedNodesUpdated) -> Option<TreeChange> {
        let Some(node) = self.nodes.get_mut(&e.insertion_point_id) else {
            tracing::debug!(node_id = %e.insertion_point_id, "distributedNodesUpdated for unknown insertion point");
            return None;
        };
        node.distributed_nodes = Some(e.distributed_nodes);
        Some(TreeChange::DistributedNodesChanged {
            insertion_point: e.insertion_point_id,
        })
    }

    /// Remove `id` if it is mirrored as `slot` of `owner_id`
    fn remove_owned(&mut self, owner_id: NodeId, id: NodeId, slot: Slot) -> Option<()> {
        match self.nodes.get(&id) {
            Some(node) if node.parent_id == Some(owner_id) && node.slot == slot => {
                self.remove_subtree(id);
                Some(())
            }
            Some(_) => {
                tracing::warn!(owner_id = %owner_id, node_id = %id, ?slot, "node is not owned as expected, ignoring");
                None
            }
            None => {
                tracing::debug!(owner_id = %owner_id, node_id = %id, ?slot, "removal of unknown node, ignoring");
                None
            }
        }
    }

    fn insert_list(&mut self, nodes: Vec<Node>, owner: NodeId, slot: Slot) -> IdList {
        let mut ids = IdList::new();
        for node in nodes {
            if let Some(id) = self.insert_subtree(node, Some(owner), slot) {
                push_unique(&mut ids, id);
            }
        }
        ids
    }

    /// Materialize a wire subtree under `parent`.
    ///
    /// A node id that is already mirrored is moved: the old copy and its
    /// subtree are dropped first, so no id ever has two owners. Inserting a
    /// node beneath its own descendant is refused.
    fn insert_subtree(&mut self, node: Node, parent: Option<NodeId>, slot: Slot) -> Option<NodeId> {
        let node_id = node.node_id;

        if self.contains(node_id) {
            if self.is_self_or_ancestor(node_id, parent) {
                tracing::warn!(node_id = %node_id, parent_id = ?parent, "refusing to insert node beneath itself");
                return None;
            }
            tracing::debug!(node_id = %node_id, "node pushed again, replacing previous copy");
            self.remove_subtree(node_id);
        }

        let Node {
            backend_node_id,
            node_type,
            node_name,
            local_name,
            node_value,
            child_node_count,
            children,
            attributes,
            document_url,
            base_url,
            public_id,
            system_id,
            internal_subset,
            xml_version,
            name,
            value,
            pseudo_type,
            shadow_root_type,
            frame_id,
            content_document,
            shadow_roots,
            template_content,
            pseudo_elements,
            imported_document,
            distributed_nodes,
            is_svg,
            ..
        } = node;

        self.nodes.insert(
            node_id,
            DomNode {
                node_id,
                parent_id: parent,
                slot,
                backend_node_id,
                node_type,
                node_name,
                local_name,
                node_value,
                child_node_count,
                children: None,
                attributes: attributes
                    .map(|flat| Attributes::from_flat(&flat))
                    .unwrap_or_default(),
                details: Box::new(NodeDetails {
                    document_url,
                    base_url,
                    public_id,
                    system_id,
                    internal_subset,
                    xml_version,
                    name,
                    value,
                    pseudo_type,
                    shadow_root_type,
                    frame_id,
                    is_svg,
                }),
                content_document: None,
                template_content: None,
                imported_document: None,
                shadow_roots: None,
                pseudo_elements: None,
                distributed_nodes,
            },
        );
        if backend_node_id.0 != 0 {
            self.backend_index.insert(backend_node_id, node_id);
        }

        let children = children.map(|list| self.insert_list(list, node_id, Slot::Child));
        let shadow_roots = shadow_roots.map(|list| self.insert_list(list, node_id, Slot::ShadowRoot));
        let pseudo_elements =
            pseudo_elements.map(|list| self.insert_list(list, node_id, Slot::PseudoElement));
        let content_document = content_document
            .and_then(|doc| self.insert_subtree(*doc, Some(node_id), Slot::ContentDocument));
        let template_content = template_content
            .and_then(|doc| self.insert_subtree(*doc, Some(node_id), Slot::TemplateContent));
        let imported_document = imported_document
            .and_then(|doc| self.insert_subtree(*doc, Some(node_id), Slot::ImportedDocument));

        let mirrored = self.nodes.get_mut(&node_id)?;
        if let Some(children) = &children {
            mirrored.child_node_count = Some(children.len() as u32);
        }
        mirrored.children = children;
        mirrored.shadow_roots = shadow_roots;
        mirrored.pseudo_elements = pseudo_elements;
        mirrored.content_document = content_document;
        mirrored.template_content = template_content;
        mirrored.imported_document = imported_document;

        Some(node_id)
    }

    /// Detach `node_id` from its owner and drop its subtree
    fn remove_subtree(&mut self, node_id: NodeId) -> bool {
        let Some(node) = self.nodes.get(&node_id) else {
            return false;
        };
        let (parent, slot) = (node.parent_id, node.slot);

        if let Some(owner) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            owner.detach(node_id, slot);
        }
        self.purge(node_id);
        true
    }

    /// Drop a subtree from every index without touching its owner
    fn purge(&mut self, node_id: NodeId) {
        let mut stack = vec![node_id];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.remove(&id) else {
                continue;
            };
            if self.backend_index.get(&node.backend_node_id) == Some(&id) {
                self.backend_index.remove(&node.backend_node_id);
            }
            if self.root_id == Some(id) {
                self.root_id = None;
            }
            stack.extend(node.owned_ids());
        }
    }

    /// Is `candidate` equal to `node` or one of its ancestors?
    fn is_self_or_ancestor(&self, candidate: NodeId, mut node: Option<NodeId>) -> bool {
        while let Some(id) = node {
            if id == candidate {
                return true;
            }
            node = self.nodes.get(&id).and_then(|n| n.parent_id);
        }
        false
    }

    /// The `<!DOCTYPE>` node, when the root's children are loaded
    pub fn doctype(&self) -> Option<&DomNode> {
        let root = self.root()?;
        root.child_ids()
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .find(|node| node.kind() == Some(NodeType::DocumentType))
    }
}

fn push_unique(ids: &mut IdList, id: NodeId) {
    ids.retain(|x| *x != id);
    ids.push(id);
}

impl Default for DomArena {
    fn default() -> Self {
        Self::new()
    }
}

/// Nest a flat node list by `parentId`, keeping list order among siblings.
///
/// The first node without a parent is the root. A node with no listed
/// children counts as loaded only when the remote reports zero children.
/// Nodes that never connect to the root are dropped.
pub fn unflatten(nodes: Vec<Node>) -> Option<Node> {
    let mut by_parent: AHashMap<NodeId, Vec<Node>> = AHashMap::new();
    let mut root = None;
    for node in nodes {
        match node.parent_id {
            Some(parent) => by_parent.entry(parent).or_default().push(node),
            None if root.is_none() => root = Some(node),
            None => tracing::warn!(node_id = %node.node_id, "extra parentless node in flat document, dropped"),
        }
    }

    let mut root = root?;
    attach_children(&mut root, &mut by_parent);
    for (parent, orphans) in by_parent {
        tracing::warn!(parent_id = %parent, count = orphans.len(), "flat nodes not connected to the root, dropped");
    }
    Some(root)
}

fn attach_children(node: &mut Node, by_parent: &mut AHashMap<NodeId, Vec<Node>>) {
    match by_parent.remove(&node.node_id) {
        Some(mut children) => {
            for child in &mut children {
                attach_children(child, by_parent);
            }
            node.child_node_count = Some(children.len() as u32);
            node.children = Some(children);
        }
        None if node.child_node_count == Some(0) => node.children = Some(Vec::new()),
        None => {}
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::events::InlineStyleInvalidated;
    use crate::types::ShadowRootType;

    /// Every structural invariant, checked node by node
    pub(crate) fn assert_consistent(arena: &DomArena) {
        for node in arena.iter() {
            if let Some(children) = &node.children {
                assert_eq!(
                    node.child_node_count,
                    Some(children.len() as u32),
                    "count mismatch on {}",
                    node.node_id
                );
            }
            for child in node.owned_ids() {
                let child = arena.get(child).expect("owned id must be mirrored");
                assert_eq!(child.parent_id, Some(node.node_id));
            }
            if let Some(parent_id) = node.parent_id {
                let parent = arena.get(parent_id).expect("parent must be mirrored");
                let listed = parent.owned_ids().iter().filter(|id| **id == node.node_id).count();
                assert_eq!(listed, 1, "{} listed {} times by its parent", node.node_id, listed);
            }
        }
        for (backend, node_id) in &arena.backend_index {
            assert_eq!(arena.get(*node_id).unwrap().backend_node_id, *backend);
        }
    }

    fn element(id: u32, name: &str) -> Node {
        Node::new(id, id + 100, NodeType::Element, name)
    }

    fn text(id: u32, value: &str) -> Node {
        let mut node = Node::new(id, id + 100, NodeType::Text, "#text");
        node.node_value = value.to_string();
        node
    }

    /// #document(1) > HTML(2) > [HEAD(3), BODY(4) > [P(6) > "hi"(7)]]
    pub(crate) fn sample_document() -> Node {
        Node::new(1, 101, NodeType::Document, "#document").with_children(vec![element(2, "HTML")
            .with_children(vec![
                element(3, "HEAD").with_children(vec![]),
                element(4, "BODY").with_children(vec![element(6, "P")
                    .with_attributes(&["id", "intro", "class", "lead"])
                    .with_children(vec![text(7, "hi")])]),
            ])])
    }

    fn inserted(parent: u32, previous: u32, node: Node) -> DomEvent {
        DomEvent::ChildNodeInserted(ChildNodeInserted {
            parent_node_id: NodeId(parent),
            previous_node_id: NodeId(previous),
            node,
        })
    }

    fn removed(parent: u32, node: u32) -> DomEvent {
        DomEvent::ChildNodeRemoved(ChildNodeRemoved {
            parent_node_id: NodeId(parent),
            node_id: NodeId(node),
        })
    }

    fn loaded() -> DomArena {
        let mut arena = DomArena::new();
        arena.load_document(sample_document()).unwrap();
        arena
    }

    fn flat(id: u32, parent: Option<u32>, name: &str, count: u32) -> Node {
        let mut node = element(id, name);
        node.parent_id = parent.map(NodeId);
        node.child_node_count = Some(count);
        node
    }

    #[test]
    fn test_load_flattened_document() {
        let mut arena = DomArena::new();
        let mut doc = Node::new(1, 101, NodeType::Document, "#document");
        doc.child_node_count = Some(1);

        let root = arena.load_flattened(vec![
            doc,
            flat(2, Some(1), "HTML", 2),
            flat(3, Some(2), "HEAD", 0),
            flat(4, Some(2), "BODY", 3),
            flat(9, Some(77), "DIV", 0),
        ]);

        assert_eq!(root, Some(NodeId(1)));
        assert_eq!(arena.get(NodeId(2)).unwrap().child_ids(), &[NodeId(3), NodeId(4)]);
        assert!(arena.get(NodeId(3)).unwrap().children_loaded());
        let body = arena.get(NodeId(4)).unwrap();
        assert!(!body.children_loaded());
        assert_eq!(body.child_node_count, Some(3));
        assert!(!arena.contains(NodeId(9)));
        assert_eq!(arena.len(), 4);
        assert_consistent(&arena);
    }

    #[test]
    fn test_unflatten_without_root() {
        assert!(unflatten(vec![flat(2, Some(1), "HTML", 0)]).is_none());
        assert!(unflatten(Vec::new()).is_none());
    }

    #[test]
    fn test_load_document() {
        let arena = loaded();

        assert_eq!(arena.root_id(), Some(NodeId(1)));
        assert_eq!(arena.len(), 6);
        assert_eq!(arena.get(NodeId(6)).unwrap().attr("class"), Some("lead"));
        assert_eq!(arena.get(NodeId(4)).unwrap().child_node_count, Some(1));
        assert_eq!(
            arena.get_by_backend_id(BackendNodeId(106)).unwrap().node_id,
            NodeId(6)
        );
        assert_eq!(arena.text_content(NodeId(1)).unwrap(), "hi");
        assert_consistent(&arena);
    }

    #[test]
    fn test_insert_then_remove() {
        let mut arena = DomArena::new();
        arena
            .load_document(Node::new(1, 1, NodeType::Element, "DIV").with_children(vec![]))
            .unwrap();

        arena.apply(inserted(1, 0, element(5, "SPAN"))).unwrap();
        assert_eq!(arena.get(NodeId(1)).unwrap().child_ids(), &[NodeId(5)]);
        assert_eq!(arena.get(NodeId(5)).unwrap().parent_id, Some(NodeId(1)));

        arena.apply(removed(1, 5)).unwrap();
        let parent = arena.get(NodeId(1)).unwrap();
        assert!(!parent.child_ids().contains(&NodeId(5)));
        assert_eq!(parent.child_node_count, Some(0));
        assert!(matches!(
            arena.get(NodeId(5)),
            Err(DomError::NodeNotFound(NodeId(5)))
        ));
        assert_consistent(&arena);
    }

    #[test]
    fn test_insert_honours_previous_sibling() {
        let mut arena = loaded();

        arena.apply(inserted(2, 3, element(10, "NAV"))).unwrap();
        arena.apply(inserted(2, 0, element(11, "LINK"))).unwrap();
        arena.apply(inserted(2, 999, element(12, "FOOTER"))).unwrap();

        assert_eq!(
            arena.get(NodeId(2)).unwrap().child_ids(),
            &[NodeId(11), NodeId(3), NodeId(10), NodeId(4), NodeId(12)]
        );
        assert_eq!(arena.get(NodeId(2)).unwrap().child_node_count, Some(5));
        assert_consistent(&arena);
    }

    #[test]
    fn test_insert_into_unloaded_parent_counts_only() {
        let mut arena = loaded();
        arena
            .apply(DomEvent::ChildNodeCountUpdated(ChildNodeCountUpdated {
                node_id: NodeId(3),
                child_node_count: 2,
            }))
            .unwrap();

        let change = arena.apply(inserted(3, 0, element(20, "META")));
        assert_eq!(
            change,
            Some(TreeChange::ChildCountUpdated {
                node: NodeId(3),
                count: 3
            })
        );
        let head = arena.get(NodeId(3)).unwrap();
        assert!(!head.children_loaded());
        assert_eq!(head.child_node_count, Some(3));
        assert!(!arena.contains(NodeId(20)));
    }

    #[test]
    fn test_unknown_ids_are_noops() {
        let mut arena = loaded();
        let before = arena.len();

        assert_eq!(arena.apply(removed(4, 404)), None);
        assert_eq!(arena.apply(inserted(404, 0, element(30, "A"))), None);
        assert_eq!(
            arena.apply(DomEvent::AttributeModified(AttributeModified {
                node_id: NodeId(404),
                name: "x".into(),
                value: "y".into(),
            })),
            None
        );
        assert_eq!(
            arena.apply(DomEvent::ShadowRootPopped(ShadowRootPopped {
                host_id: NodeId(4),
                root_id: NodeId(404),
            })),
            None
        );
        assert_eq!(arena.len(), before);
        assert_consistent(&arena);
    }

    #[test]
    fn test_remove_drops_subtree_and_backend_index() {
        let mut arena = loaded();

        arena.apply(removed(2, 4)).unwrap();

        assert!(!arena.contains(NodeId(6)));
        assert!(!arena.contains(NodeId(7)));
        assert_eq!(arena.node_id_for_backend(BackendNodeId(106)), None);
        assert_eq!(arena.get(NodeId(2)).unwrap().child_ids(), &[NodeId(3)]);
        assert_consistent(&arena);
    }

    #[test]
    fn test_set_child_nodes_replaces_loaded_children() {
        let mut arena = loaded();

        let change = arena.apply(DomEvent::SetChildNodes(SetChildNodes {
            parent_id: NodeId(4),
            nodes: vec![element(40, "UL"), text(41, "tail")],
        }));

        assert_eq!(
            change,
            Some(TreeChange::ChildrenSet {
                parent: NodeId(4),
                count: 2
            })
        );
        assert!(!arena.contains(NodeId(6)));
        assert!(!arena.contains(NodeId(7)));
        let body = arena.get(NodeId(4)).unwrap();
        assert_eq!(body.child_ids(), &[NodeId(40), NodeId(41)]);
        assert_eq!(body.child_node_count, Some(2));
        // Children of the new nodes were not sent, so they stay unloaded
        assert!(!arena.get(NodeId(40)).unwrap().children_loaded());
        assert_consistent(&arena);
    }

    #[test]
    fn test_set_child_nodes_loads_empty() {
        let mut arena = loaded();
        arena
            .apply(DomEvent::ChildNodeCountUpdated(ChildNodeCountUpdated {
                node_id: NodeId(3),
                child_node_count: 0,
            }))
            .unwrap();
        arena
            .apply(DomEvent::SetChildNodes(SetChildNodes {
                parent_id: NodeId(3),
                nodes: vec![],
            }))
            .unwrap();

        let head = arena.get(NodeId(3)).unwrap();
        assert_eq!(head.children.as_deref(), Some(&[][..]));
        assert_eq!(head.child_node_count, Some(0));
    }

    #[test]
    fn test_count_update_unloads_disagreeing_children() {
        let mut arena = loaded();

        arena
            .apply(DomEvent::ChildNodeCountUpdated(ChildNodeCountUpdated {
                node_id: NodeId(4),
                child_node_count: 3,
            }))
            .unwrap();

        let body = arena.get(NodeId(4)).unwrap();
        assert!(!body.children_loaded());
        assert_eq!(body.child_node_count, Some(3));
        assert!(!arena.contains(NodeId(6)));
        assert_consistent(&arena);
    }

    #[test]
    fn test_attribute_modify_then_remove() {
        let mut arena = loaded();
        let original = arena.get(NodeId(6)).unwrap().attributes.len();

        arena
            .apply(DomEvent::AttributeModified(AttributeModified {
                node_id: NodeId(6),
                name: "id".into(),
                value: "changed".into(),
            }))
            .unwrap();
        assert_eq!(arena.get(NodeId(6)).unwrap().attributes.len(), original);
        assert_eq!(arena.get(NodeId(6)).unwrap().attr("id"), Some("changed"));

        arena
            .apply(DomEvent::AttributeRemoved(AttributeRemoved {
                node_id: NodeId(6),
                name: "id".into(),
            }))
            .unwrap();
        let p = arena.get(NodeId(6)).unwrap();
        assert_eq!(p.attributes.len(), original - 1);
        assert_eq!(p.attributes.to_flat(), vec!["class", "lead"]);

        // Removing it again changes nothing
        assert_eq!(
            arena.apply(DomEvent::AttributeRemoved(AttributeRemoved {
                node_id: NodeId(6),
                name: "id".into(),
            })),
            None
        );
    }

    #[test]
    fn test_character_data_modified() {
        let mut arena = loaded();
        arena
            .apply(DomEvent::CharacterDataModified(CharacterDataModified {
                node_id: NodeId(7),
                character_data: "hello".into(),
            }))
            .unwrap();
        assert_eq!(arena.text_content(NodeId(4)).unwrap(), "hello");
    }

    #[test]
    fn test_document_updated_is_idempotent() {
        let mut arena = loaded();
        let generation = arena.generation();

        for _ in 0..3 {
            assert_eq!(
                arena.apply(DomEvent::DocumentUpdated),
                Some(TreeChange::DocumentInvalidated)
            );
            assert!(arena.is_empty());
            assert_eq!(arena.root_id(), None);
            assert_eq!(arena.node_id_for_backend(BackendNodeId(101)), None);
        }
        assert_eq!(arena.generation(), generation + 3);

        // Request-ready: a new snapshot loads cleanly
        arena.load_document(sample_document()).unwrap();
        assert_eq!(arena.len(), 6);
    }

    #[test]
    fn test_shadow_root_push_and_pop() {
        let mut arena = loaded();
        let mut root = Node::new(50, 150, NodeType::DocumentFragment, "#document-fragment")
            .with_children(vec![element(51, "SLOT")]);
        root.shadow_root_type = Some(ShadowRootType::Open);

        arena
            .apply(DomEvent::ShadowRootPushed(ShadowRootPushed {
                host_id: NodeId(6),
                root,
            }))
            .unwrap();
        let host = arena.get(NodeId(6)).unwrap();
        assert_eq!(host.shadow_roots.as_deref(), Some(&[NodeId(50)][..]));
        assert_eq!(arena.get(NodeId(50)).unwrap().slot, Slot::ShadowRoot);
        // Shadow content does not count as light-DOM children
        assert_eq!(host.child_node_count, Some(1));
        assert_consistent(&arena);

        arena
            .apply(DomEvent::ShadowRootPopped(ShadowRootPopped {
                host_id: NodeId(6),
                root_id: NodeId(50),
            }))
            .unwrap();
        assert!(!arena.contains(NodeId(50)));
        assert!(!arena.contains(NodeId(51)));
        assert_eq!(
            arena.get(NodeId(6)).unwrap().shadow_roots.as_deref(),
            Some(&[][..])
        );
        assert_consistent(&arena);
    }

    #[test]
    fn test_pseudo_elements() {
        let mut arena = loaded();
        let mut before = Node::new(60, 160, NodeType::Element, "::before");
        before.pseudo_type = Some(crate::types::PseudoType::Before);

        arena
            .apply(DomEvent::PseudoElementAdded(PseudoElementAdded {
                parent_id: NodeId(6),
                pseudo_element: before,
            }))
            .unwrap();
        assert_eq!(
            arena.get(NodeId(6)).unwrap().pseudo_elements.as_deref(),
            Some(&[NodeId(60)][..])
        );

        // Wrong owner is refused
        assert_eq!(
            arena.apply(DomEvent::PseudoElementRemoved(PseudoElementRemoved {
                parent_id: NodeId(4),
                pseudo_element_id: NodeId(60),
            })),
            None
        );
        arena
            .apply(DomEvent::PseudoElementRemoved(PseudoElementRemoved {
                parent_id: NodeId(6),
                pseudo_element_id: NodeId(60),
            }))
            .unwrap();
        assert!(!arena.contains(NodeId(60)));
        assert_consistent(&arena);
    }

    #[test]
    fn test_distributed_nodes_and_inline_style() {
        let mut arena = loaded();
        let change = arena.apply(DomEvent::DistributedNodesUpdated(DistributedNodesUpdated {
            insertion_point_id: NodeId(6),
            distributed_nodes: vec![crate::types::BackendNode {
                node_type: 1,
                node_name: "SPAN".into(),
                backend_node_id: BackendNodeId(900),
            }],
        }));
        assert!(change.is_some());
        assert_eq!(
            arena.get(NodeId(6)).unwrap().distributed_nodes.as_ref().map(Vec::len),
            Some(1)
        );

        let change = arena.apply(DomEvent::InlineStyleInvalidated(InlineStyleInvalidated {
            node_ids: vec![NodeId(6), NodeId(404)],
        }));
        assert_eq!(
            change,
            Some(TreeChange::InlineStyleInvalidated {
                nodes: vec![NodeId(6)]
            })
        );
    }

    #[test]
    fn test_reinserted_node_moves() {
        let mut arena = loaded();

        // P(6) shows up under HEAD(3) without a prior removal
        arena
            .apply(DomEvent::SetChildNodes(SetChildNodes {
                parent_id: NodeId(3),
                nodes: vec![element(6, "P")],
            }))
            .unwrap();

        assert_eq!(arena.get(NodeId(6)).unwrap().parent_id, Some(NodeId(3)));
        assert!(arena.get(NodeId(4)).unwrap().child_ids().is_empty());
        assert_eq!(arena.get(NodeId(4)).unwrap().child_node_count, Some(0));
        assert_consistent(&arena);
    }

    #[test]
    fn test_insert_beneath_itself_is_refused() {
        let mut arena = loaded();
        assert_eq!(arena.apply(inserted(6, 0, element(2, "HTML"))), None);
        assert!(arena.contains(NodeId(7)));
        assert_consistent(&arena);
    }

    #[test]
    fn test_subtree_export_respects_depth() {
        let arena = loaded();

        let shallow = arena.subtree(NodeId(2), 1).unwrap();
        let children = shallow.children.unwrap();
        assert_eq!(children.len(), 2);
        assert!(children[1].children.is_none());
        assert_eq!(children[1].child_node_count, Some(1));

        let full = arena.subtree(NodeId(1), -1).unwrap();
        let html = &full.children.as_ref().unwrap()[0];
        let body = &html.children.as_ref().unwrap()[1];
        let p = &body.children.as_ref().unwrap()[0];
        assert_eq!(p.attributes.as_deref().map(<[String]>::len), Some(4));
        assert_eq!(p.children.as_ref().unwrap()[0].node_value, "hi");
    }

    #[test]
    fn test_traverse_and_find() {
        let arena = loaded();

        let mut visited = Vec::new();
        arena
            .traverse_df(NodeId(1), |node| {
                visited.push(node.node_name.clone());
                Ok(())
            })
            .unwrap();
        assert_eq!(visited, vec!["#document", "HTML", "HEAD", "BODY", "P", "#text"]);

        assert_eq!(arena.find_by_tag("p"), vec![NodeId(6)]);
        assert!(arena.find_by_tag("#text").is_empty());
        assert_eq!(arena.find_by_id("intro"), Some(NodeId(6)));
        assert_eq!(arena.find_by_id("missing"), None);
        assert!(arena.doctype().is_none());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Insert { parent: u32, previous: u32, id: u32 },
            Remove { parent: u32, id: u32 },
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (1u32..20, 0u32..20, 2u32..20)
                    .prop_map(|(parent, previous, id)| Op::Insert { parent, previous, id }),
                (1u32..20, 2u32..20).prop_map(|(parent, id)| Op::Remove { parent, id }),
            ]
        }

        proptest! {
            #[test]
            fn count_matches_loaded_children(ops in proptest::collection::vec(op(), 1..60)) {
                let mut arena = DomArena::new();
                arena.load_document(Node::new(1, 1, NodeType::Document, "#document").with_children(vec![]));

                for op in ops {
                    match op {
                        Op::Insert { parent, previous, id } => {
                            arena.apply(inserted(parent, previous, element(id, "DIV").with_children(vec![])));
                        }
                        Op::Remove { parent, id } => {
                            arena.apply(removed(parent, id));
                        }
                    }

                    for node in arena.iter() {
                        if let Some(children) = &node.children {
                            prop_assert_eq!(node.child_node_count, Some(children.len() as u32));
                        }
                    }
                }
                assert_consistent(&arena);
            }
        }
    }
}
