//! Live DOM mirror
//!
//! Wraps a `DomArena` behind a tokio `RwLock` and a `Transport`. Events are
//! applied under the write lock one at a time; readers always see the last
//! fully applied event. Commands that change the remote DOM never touch the
//! arena directly, their effect arrives later as events.

use cdp::Transport;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::arena::{unflatten, DomArena};
use crate::error::{DomError, Result};
use crate::events::{DomEvent, TreeChange};
use crate::geometry::BoxModel;
use crate::types::{Attributes, BackendNodeId, DomNode, Node, NodeId, NodeRef, RemoteObject};

/// Configuration for the mirror
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MirrorConfig {
    /// Depth for `getDocument` / `requestChildNodes` when the caller passes none
    pub default_depth: i32,
    /// Traverse iframes and shadow roots by default
    pub pierce: bool,
    /// Capacity of the `TreeChange` broadcast channel
    pub change_capacity: usize,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            default_depth: 1,
            pierce: false,
            change_capacity: 1024,
        }
    }
}

#[derive(Deserialize)]
struct RootResult {
    root: Node,
}

#[derive(Deserialize)]
struct NodeResult {
    node: Node,
}

#[derive(Deserialize)]
struct NodesResult {
    nodes: Vec<Node>,
}

#[derive(Deserialize)]
struct AttributesResult {
    attributes: Vec<String>,
}

#[derive(Deserialize)]
struct ObjectResult {
    object: RemoteObject,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeIdResult {
    #[serde(default)]
    node_id: NodeId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeIdsResult {
    node_ids: Vec<NodeId>,
}

#[derive(Deserialize)]
struct BoxModelResult {
    model: BoxModel,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OuterHtmlResult {
    #[serde(rename = "outerHTML")]
    outer_html: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClassNamesResult {
    class_names: Vec<String>,
}

/// Client-side mirror of one target's DOM
pub struct DomMirror<T: Transport> {
    transport: Arc<T>,
    config: MirrorConfig,
    arena: RwLock<DomArena>,
    changes: broadcast::Sender<TreeChange>,
}

impl<T: Transport> DomMirror<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self::with_config(transport, MirrorConfig::default())
    }

    pub fn with_config(transport: Arc<T>, config: MirrorConfig) -> Self {
        let (changes, _) = broadcast::channel(config.change_capacity.max(1));
        Self {
            transport,
            config,
            arena: RwLock::new(DomArena::new()),
            changes,
        }
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Receive a `TreeChange` for every event that changed the mirror
    pub fn subscribe(&self) -> broadcast::Receiver<TreeChange> {
        self.changes.subscribe()
    }

    /// Fetch a full snapshot and rebuild the mirror from it.
    ///
    /// Fails with `StaleTree` when an event changed the mirror while the request
    /// was in flight; the mirror is left as the events made it.
    pub async fn get_document(&self, depth: Option<i32>, pierce: Option<bool>) -> Result<Node> {
        let revision = self.arena.read().await.revision();
        let result: RootResult = self
            .call("DOM.getDocument", self.snapshot_params(depth, pierce))
            .await?;
        self.load_snapshot(revision, result.root).await
    }

    /// Same as `get_document`, fetched as one flat list and nested again
    /// by `parentId` before loading.
    pub async fn get_flattened_document(
        &self,
        depth: Option<i32>,
        pierce: Option<bool>,
    ) -> Result<Node> {
        let revision = self.arena.read().await.revision();
        let result: NodesResult = self
            .call("DOM.getFlattenedDocument", self.snapshot_params(depth, pierce))
            .await?;
        let root = unflatten(result.nodes).ok_or(DomError::MissingRoot)?;
        self.load_snapshot(revision, root).await
    }

    fn snapshot_params(&self, depth: Option<i32>, pierce: Option<bool>) -> Value {
        json!({
            "depth": depth.unwrap_or(self.config.default_depth),
            "pierce": pierce.unwrap_or(self.config.pierce),
        })
    }

    /// Load a snapshot requested at `revision`, unless events got there first
    async fn load_snapshot(&self, revision: u64, root: Node) -> Result<Node> {
        let root_id = {
            let mut arena = self.arena.write().await;
            if arena.revision() != revision {
                tracing::warn!(
                    requested_at = revision,
                    now = arena.revision(),
                    "document snapshot raced with mutation events"
                );
                return Err(DomError::StaleTree);
            }
            arena
                .load_document(root.clone())
                .ok_or(DomError::NodeNotFound(root.node_id))?
        };

        tracing::info!(root_id = %root_id, "document loaded");
        self.publish(TreeChange::DocumentLoaded { root: root_id });
        Ok(root)
    }

    /// Ask for the children of a mirrored node. The mirror changes only
    /// when the resulting `setChildNodes` event is applied.
    pub async fn request_child_nodes(
        &self,
        node_id: NodeId,
        depth: Option<i32>,
        pierce: Option<bool>,
    ) -> Result<()> {
        if !self.arena.read().await.contains(node_id) {
            return Err(DomError::NodeNotFound(node_id));
        }

        self.send(
            "DOM.requestChildNodes",
            json!({
                "nodeId": node_id,
                "depth": depth.unwrap_or(self.config.default_depth),
                "pierce": pierce.unwrap_or(self.config.pierce),
            }),
        )
        .await
    }

    /// Single mutation entry point
    pub async fn apply_event(&self, event: DomEvent) -> Option<TreeChange> {
        let method = event.method();
        let change = self.arena.write().await.apply(event);

        match &change {
            Some(change) => self.publish(change.clone()),
            None => tracing::trace!(method, "event left the mirror unchanged"),
        }
        change
    }

    /// Decode a raw protocol event and apply it if it belongs to the mirror
    pub async fn handle_cdp_event(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Option<TreeChange>> {
        match DomEvent::from_cdp(method, params)? {
            Some(event) => Ok(self.apply_event(event).await),
            None => Ok(None),
        }
    }

    /// Resolve any node reference to its wire form.
    ///
    /// Mirrored nodes are answered locally. Backend ids and remote objects
    /// are pushed to the frontend first and described remotely when the
    /// push has not materialized them in the mirror yet.
    pub async fn resolve(&self, node: &NodeRef) -> Result<Node> {
        match node {
            NodeRef::Node(id) => self.arena.read().await.subtree(*id, 0),
            NodeRef::Backend(backend_id) => {
                let mirrored = self.arena.read().await.node_id_for_backend(*backend_id);
                if let Some(node_id) = mirrored {
                    return self.arena.read().await.subtree(node_id, 0);
                }

                let pushed = self.push_nodes_by_backend_ids(&[*backend_id]).await?;
                let node_id = pushed
                    .into_iter()
                    .next()
                    .flatten()
                    .ok_or(DomError::BackendNodeNotFound(*backend_id))?;
                self.local_or_described(node_id, node).await
            }
            NodeRef::Object(object_id) => {
                let result: NodeIdResult = self
                    .call("DOM.requestNode", json!({ "objectId": object_id }))
                    .await?;
                let node_id = result
                    .node_id
                    .non_zero()
                    .ok_or_else(|| DomError::ObjectNotFound(object_id.clone()))?;
                self.local_or_described(node_id, node).await
            }
        }
    }

    async fn local_or_described(&self, node_id: NodeId, node: &NodeRef) -> Result<Node> {
        if let Ok(local) = self.arena.read().await.subtree(node_id, 0) {
            return Ok(local);
        }

        tracing::debug!(node_id = %node_id, "pushed node not mirrored yet, describing");
        let mut described = self.describe_node(node, Some(0), None).await?;
        described.node_id = node_id;
        Ok(described)
    }

    /// Clone of a mirrored node
    pub async fn node(&self, node_id: NodeId) -> Result<DomNode> {
        self.arena.read().await.get(node_id).cloned()
    }

    /// Wire form of a mirrored subtree, `depth < 0` for all of it
    pub async fn subtree(&self, node_id: NodeId, depth: i32) -> Result<Node> {
        self.arena.read().await.subtree(node_id, depth)
    }

    pub async fn root_id(&self) -> Option<NodeId> {
        self.arena.read().await.root_id()
    }

    /// Run a closure against the current snapshot
    pub async fn read<R>(&self, f: impl FnOnce(&DomArena) -> R) -> R {
        f(&*self.arena.read().await)
    }

    /// First descendant of `node_id` matching `selector`
    pub async fn query_selector(&self, node_id: NodeId, selector: &str) -> Result<Option<NodeId>> {
        let result: NodeIdResult = self
            .call(
                "DOM.querySelector",
                json!({ "nodeId": node_id, "selector": selector }),
            )
            .await?;
        Ok(result.node_id.non_zero())
    }

    pub async fn query_selector_all(&self, node_id: NodeId, selector: &str) -> Result<Vec<NodeId>> {
        let result: NodeIdsResult = self
            .call(
                "DOM.querySelectorAll",
                json!({ "nodeId": node_id, "selector": selector }),
            )
            .await?;
        Ok(result
            .node_ids
            .into_iter()
            .filter(|id| !id.is_none())
            .collect())
    }

    /// Describe a node without making it part of the mirror
    pub async fn describe_node(
        &self,
        node: &NodeRef,
        depth: Option<i32>,
        pierce: Option<bool>,
    ) -> Result<Node> {
        let mut params = node_params(node);
        if let Some(depth) = depth {
            params.insert("depth".into(), json!(depth));
        }
        if let Some(pierce) = pierce {
            params.insert("pierce".into(), json!(pierce));
        }

        let result: NodeResult = self.call("DOM.describeNode", Value::Object(params)).await?;
        Ok(result.node)
    }

    /// Ask for NodeIds for backend ids; `None` where the backend has no node
    pub async fn push_nodes_by_backend_ids(
        &self,
        backend_node_ids: &[BackendNodeId],
    ) -> Result<Vec<Option<NodeId>>> {
        let result: NodeIdsResult = self
            .call(
                "DOM.pushNodesByBackendIdsToFrontend",
                json!({ "backendNodeIds": backend_node_ids }),
            )
            .await?;
        Ok(result.node_ids.into_iter().map(NodeId::non_zero).collect())
    }

    pub async fn get_box_model(&self, node: &NodeRef) -> Result<BoxModel> {
        let result: BoxModelResult = self
            .call("DOM.getBoxModel", Value::Object(node_params(node)))
            .await?;
        Ok(result.model)
    }

    pub async fn get_outer_html(&self, node: &NodeRef) -> Result<String> {
        let result: OuterHtmlResult = self
            .call("DOM.getOuterHTML", Value::Object(node_params(node)))
            .await?;
        Ok(result.outer_html)
    }

    /// Node at a viewport location, if the frontend knows it
    pub async fn get_node_for_location(
        &self,
        x: i32,
        y: i32,
        include_user_agent_shadow_dom: bool,
    ) -> Result<Option<NodeId>> {
        let result: NodeIdResult = self
            .call(
                "DOM.getNodeForLocation",
                json!({
                    "x": x,
                    "y": y,
                    "includeUserAgentShadowDOM": include_user_agent_shadow_dom,
                }),
            )
            .await?;
        Ok(result.node_id.non_zero())
    }

    pub async fn collect_class_names(&self, node_id: NodeId) -> Result<Vec<String>> {
        let result: ClassNamesResult = self
            .call(
                "DOM.collectClassNamesFromSubtree",
                json!({ "nodeId": node_id }),
            )
            .await?;
        Ok(result.class_names)
    }

    pub async fn set_attribute_value(&self, node_id: NodeId, name: &str, value: &str) -> Result<()> {
        self.send(
            "DOM.setAttributeValue",
            json!({ "nodeId": node_id, "name": name, "value": value }),
        )
        .await
    }

    pub async fn remove_attribute(&self, node_id: NodeId, name: &str) -> Result<()> {
        self.send(
            "DOM.removeAttribute",
            json!({ "nodeId": node_id, "name": name }),
        )
        .await
    }

    pub async fn set_node_value(&self, node_id: NodeId, value: &str) -> Result<()> {
        self.send(
            "DOM.setNodeValue",
            json!({ "nodeId": node_id, "value": value }),
        )
        .await
    }

    pub async fn remove_node(&self, node_id: NodeId) -> Result<()> {
        self.send("DOM.removeNode", json!({ "nodeId": node_id })).await
    }

    /// Current attributes straight from the remote end; the mirror keeps
    /// whatever the events made it
    pub async fn get_attributes(&self, node_id: NodeId) -> Result<Attributes> {
        let result: AttributesResult = self
            .call("DOM.getAttributes", json!({ "nodeId": node_id }))
            .await?;
        Ok(Attributes::from_flat(&result.attributes))
    }

    /// NodeId for a node path in the agent's own format; `None` when the
    /// path no longer resolves
    pub async fn push_node_by_path(&self, path: &str) -> Result<Option<NodeId>> {
        let result: NodeIdResult = self
            .call("DOM.pushNodeByPathToFrontend", json!({ "path": path }))
            .await?;
        Ok(result.node_id.non_zero())
    }

    /// Move a node under `target`, before `insert_before` or last.
    /// Returns the node's new id.
    pub async fn move_to(
        &self,
        node_id: NodeId,
        target: NodeId,
        insert_before: Option<NodeId>,
    ) -> Result<NodeId> {
        self.relocate("DOM.moveTo", node_id, target, insert_before)
            .await
    }

    /// Deep-copy a node under `target`; returns the clone's id
    pub async fn copy_to(
        &self,
        node_id: NodeId,
        target: NodeId,
        insert_before: Option<NodeId>,
    ) -> Result<NodeId> {
        self.relocate("DOM.copyTo", node_id, target, insert_before)
            .await
    }

    async fn relocate(
        &self,
        method: &str,
        node_id: NodeId,
        target: NodeId,
        insert_before: Option<NodeId>,
    ) -> Result<NodeId> {
        let mut params = json!({ "nodeId": node_id, "targetNodeId": target });
        if let Some(before) = insert_before {
            params["insertBeforeNodeId"] = json!(before);
        }
        let result: NodeIdResult = self.call(method, params).await?;
        Ok(result.node_id)
    }

    /// Rename an element; the remote end replaces it, so the id changes
    pub async fn set_node_name(&self, node_id: NodeId, name: &str) -> Result<NodeId> {
        let result: NodeIdResult = self
            .call("DOM.setNodeName", json!({ "nodeId": node_id, "name": name }))
            .await?;
        Ok(result.node_id)
    }

    pub async fn set_outer_html(&self, node_id: NodeId, outer_html: &str) -> Result<()> {
        self.send(
            "DOM.setOuterHTML",
            json!({ "nodeId": node_id, "outerHTML": outer_html }),
        )
        .await
    }

    /// Parse `text` as attribute markup and apply it, replacing `name` when given
    pub async fn set_attributes_as_text(
        &self,
        node_id: NodeId,
        text: &str,
        name: Option<&str>,
    ) -> Result<()> {
        let mut params = json!({ "nodeId": node_id, "text": text });
        if let Some(name) = name {
            params["name"] = json!(name);
        }
        self.send("DOM.setAttributesAsText", params).await
    }

    pub async fn set_file_input_files(&self, node: &NodeRef, files: &[String]) -> Result<()> {
        let mut params = node_params(node);
        params.insert("files".into(), json!(files));
        self.send("DOM.setFileInputFiles", Value::Object(params)).await
    }

    /// Make a node the agent's "inspected" node (`$0` in a console)
    pub async fn set_inspected_node(&self, node_id: NodeId) -> Result<()> {
        self.send("DOM.setInspectedNode", json!({ "nodeId": node_id }))
            .await
    }

    /// JavaScript wrapper for a node or backend node
    pub async fn resolve_node(
        &self,
        node: &NodeRef,
        object_group: Option<&str>,
    ) -> Result<RemoteObject> {
        let mut params = node_params(node);
        if let Some(group) = object_group {
            params.insert("objectGroup".into(), json!(group));
        }
        let result: ObjectResult = self.call("DOM.resolveNode", Value::Object(params)).await?;
        Ok(result.object)
    }

    pub async fn focus(&self, node: &NodeRef) -> Result<()> {
        self.send("DOM.focus", Value::Object(node_params(node))).await
    }

    /// Nearest ancestor whose layout is independent of the node's
    pub async fn get_relayout_boundary(&self, node_id: NodeId) -> Result<NodeId> {
        let result: NodeIdResult = self
            .call("DOM.getRelayoutBoundary", json!({ "nodeId": node_id }))
            .await?;
        Ok(result.node_id)
    }

    fn publish(&self, change: TreeChange) {
        // No subscribers is fine
        let _ = self.changes.send(change);
    }

    async fn call<R: DeserializeOwned>(&self, method: &str, params: Value) -> Result<R> {
        let value = self.transport.send_command(method, Some(params)).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn send(&self, method: &str, params: Value) -> Result<()> {
        self.transport.send_command(method, Some(params)).await?;
        Ok(())
    }
}

fn node_params(node: &NodeRef) -> Map<String, Value> {
    match node.to_params() {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
