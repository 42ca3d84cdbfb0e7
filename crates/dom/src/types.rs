//! Core type definitions for the DOM domain
//!
//! Key design principles:
//! 1. Two id spaces, two types: `NodeId` is transient, `BackendNodeId` is not
//! 2. Wire `Node` keeps "not loaded" (`None`) apart from "loaded, empty"
//! 3. SmallVec for small arrays (most elements carry a handful of attributes)

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Client-visible node id. Valid until the document is invalidated or the
/// node is removed. `0` on the wire means "no node".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const NONE: NodeId = NodeId(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// `None` for the wire's "no node" marker
    pub fn non_zero(self) -> Option<NodeId> {
        if self.is_none() {
            None
        } else {
            Some(self)
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable backend id; survives document rebuilds and may exist without a
/// live `NodeId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendNodeId(pub u32);

impl fmt::Display for BackendNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Id of a JavaScript wrapper object for a node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteObjectId(pub String);

impl fmt::Display for RemoteObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// JavaScript wrapper handed out by `resolveNode`. Only the fields a DOM
/// client needs; the rest of the Runtime mirror object is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<RemoteObjectId>,
}

/// Frame identifier from CDP
pub type FrameId = String;

/// Any of the three ways a caller can name a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRef {
    Node(NodeId),
    Backend(BackendNodeId),
    Object(RemoteObjectId),
}

impl NodeRef {
    /// Protocol params selecting this node (`nodeId` | `backendNodeId` | `objectId`)
    pub fn to_params(&self) -> serde_json::Value {
        match self {
            NodeRef::Node(id) => serde_json::json!({ "nodeId": id }),
            NodeRef::Backend(id) => serde_json::json!({ "backendNodeId": id }),
            NodeRef::Object(id) => serde_json::json!({ "objectId": id }),
        }
    }
}

impl From<NodeId> for NodeRef {
    fn from(id: NodeId) -> Self {
        NodeRef::Node(id)
    }
}

impl From<BackendNodeId> for NodeRef {
    fn from(id: BackendNodeId) -> Self {
        NodeRef::Backend(id)
    }
}

/// Node type matching DOM specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum NodeType {
    Element = 1,
    Attribute = 2,
    Text = 3,
    CdataSection = 4,
    EntityReference = 5,
    Entity = 6,
    ProcessingInstruction = 7,
    Comment = 8,
    Document = 9,
    DocumentType = 10,
    DocumentFragment = 11,
    Notation = 12,
}

impl NodeType {
    pub fn from_code(value: u32) -> Option<Self> {
        match value {
            1 => Some(NodeType::Element),
            2 => Some(NodeType::Attribute),
            3 => Some(NodeType::Text),
            4 => Some(NodeType::CdataSection),
            5 => Some(NodeType::EntityReference),
            6 => Some(NodeType::Entity),
            7 => Some(NodeType::ProcessingInstruction),
            8 => Some(NodeType::Comment),
            9 => Some(NodeType::Document),
            10 => Some(NodeType::DocumentType),
            11 => Some(NodeType::DocumentFragment),
            12 => Some(NodeType::Notation),
            _ => None,
        }
    }
}

/// Shadow root type from CDP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShadowRootType {
    #[serde(rename = "user-agent")]
    UserAgent,
    #[serde(rename = "open")]
    Open,
    #[serde(rename = "closed")]
    Closed,
}

/// Pseudo element type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PseudoType {
    FirstLine,
    FirstLetter,
    Before,
    After,
    Backdrop,
    Selection,
    FirstLineInherited,
    Scrollbar,
    ScrollbarThumb,
    ScrollbarButton,
    ScrollbarTrack,
    ScrollbarTrackPiece,
    ScrollbarCorner,
    Resizer,
    InputListButton,
    #[serde(other)]
    Unknown,
}

/// Unattached reference to a node the frontend may not have been given yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendNode {
    pub node_type: u32,
    pub node_name: String,
    pub backend_node_id: BackendNodeId,
}

/// Node as it travels on the wire.
///
/// `children: None` means the count is known but the content was not
/// fetched; `Some(vec![])` means loaded and empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub node_id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<NodeId>,
    pub backend_node_id: BackendNodeId,
    pub node_type: u32,
    pub node_name: String,
    #[serde(default)]
    pub local_name: String,
    #[serde(default)]
    pub node_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_node_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<Node>>,
    /// Flat `[name1, value1, name2, value2, ...]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<String>>,
    #[serde(rename = "documentURL", default, skip_serializing_if = "Option::is_none")]
    pub document_url: Option<String>,
    #[serde(rename = "baseURL", default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_subset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xml_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pseudo_type: Option<PseudoType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shadow_root_type: Option<ShadowRootType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_id: Option<FrameId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_document: Option<Box<Node>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shadow_roots: Option<Vec<Node>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_content: Option<Box<Node>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pseudo_elements: Option<Vec<Node>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imported_document: Option<Box<Node>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distributed_nodes: Option<Vec<BackendNode>>,
    #[serde(rename = "isSVG", default, skip_serializing_if = "Option::is_none")]
    pub is_svg: Option<bool>,
}

impl Node {
    /// Minimal node, mostly useful for building events by hand
    pub fn new(node_id: u32, backend_node_id: u32, node_type: NodeType, node_name: &str) -> Self {
        Self {
            node_id: NodeId(node_id),
            backend_node_id: BackendNodeId(backend_node_id),
            node_type: node_type as u32,
            node_name: node_name.to_string(),
            local_name: node_name.to_ascii_lowercase(),
            ..Default::default()
        }
    }

    pub fn kind(&self) -> Option<NodeType> {
        NodeType::from_code(self.node_type)
    }

    /// Mark children as loaded with the given content
    pub fn with_children(mut self, children: Vec<Node>) -> Self {
        self.child_node_count = Some(children.len() as u32);
        self.children = Some(children);
        self
    }

    pub fn with_attributes(mut self, flat: &[&str]) -> Self {
        self.attributes = Some(flat.iter().map(|s| s.to_string()).collect());
        self
    }
}

/// Ordered, name-unique attribute pairs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes(SmallVec<[(String, String); 4]>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the wire's flat form. A trailing name without value is
    /// dropped; a repeated name keeps its first position and last value.
    pub fn from_flat(flat: &[String]) -> Self {
        let mut attrs = Self::new();
        for pair in flat.chunks_exact(2) {
            attrs.set(&pair[0], &pair[1]);
        }
        attrs
    }

    pub fn to_flat(&self) -> Vec<String> {
        self.0
            .iter()
            .flat_map(|(name, value)| [name.clone(), value.clone()])
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Upsert in place; returns true when the name was new
    pub fn set(&mut self, name: &str, value: &str) -> bool {
        match self.0.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => {
                *v = value.to_string();
                false
            }
            None => {
                self.0.push((name.to_string(), value.to_string()));
                true
            }
        }
    }

    /// Remove one pair, keeping the relative order of the rest
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let pos = self.0.iter().position(|(n, _)| n == name)?;
        Some(self.0.remove(pos).1)
    }

    /// Number of pairs
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

/// Owned relation lists (children, shadow roots, pseudo elements)
pub type IdList = SmallVec<[NodeId; 4]>;

/// Where a mirrored node hangs off its owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Root,
    Child,
    ShadowRoot,
    PseudoElement,
    ContentDocument,
    TemplateContent,
    ImportedDocument,
}

/// Rarely-present node fields, boxed to keep `DomNode` small
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeDetails {
    pub document_url: Option<String>,
    pub base_url: Option<String>,
    pub public_id: Option<String>,
    pub system_id: Option<String>,
    pub internal_subset: Option<String>,
    pub xml_version: Option<String>,
    pub name: Option<String>,
    pub value: Option<String>,
    pub pseudo_type: Option<PseudoType>,
    pub shadow_root_type: Option<ShadowRootType>,
    pub frame_id: Option<FrameId>,
    pub is_svg: Option<bool>,
}

/// A node as held by the mirror.
///
/// Relations are ids into the arena. `children: None` keeps the wire meaning
/// (count known, content not fetched); when `Some`, `child_node_count`
/// always equals its length.
#[derive(Debug, Clone, PartialEq)]
pub struct DomNode {
    pub node_id: NodeId,
    pub parent_id: Option<NodeId>,
    pub slot: Slot,
    pub backend_node_id: BackendNodeId,
    pub node_type: u32,
    pub node_name: String,
    pub local_name: String,
    pub node_value: String,
    pub child_node_count: Option<u32>,
    pub children: Option<IdList>,
    pub attributes: Attributes,
    pub details: Box<NodeDetails>,
    pub content_document: Option<NodeId>,
    pub template_content: Option<NodeId>,
    pub imported_document: Option<NodeId>,
    pub shadow_roots: Option<IdList>,
    pub pseudo_elements: Option<IdList>,
    pub distributed_nodes: Option<Vec<BackendNode>>,
}

impl DomNode {
    pub fn kind(&self) -> Option<NodeType> {
        NodeType::from_code(self.node_type)
    }

    /// Get tag name for element nodes
    pub fn tag_name(&self) -> Option<&str> {
        if self.is_element() {
            Some(&self.node_name)
        } else {
            None
        }
    }

    pub fn is_element(&self) -> bool {
        self.kind() == Some(NodeType::Element)
    }

    pub fn is_text(&self) -> bool {
        self.kind() == Some(NodeType::Text)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name)
    }

    pub fn children_loaded(&self) -> bool {
        self.children.is_some()
    }

    /// Loaded child ids; empty when not loaded
    pub fn child_ids(&self) -> &[NodeId] {
        self.children.as_deref().unwrap_or(&[])
    }

    /// Every node this one owns, in document-ish order
    pub fn owned_ids(&self) -> Vec<NodeId> {
        let mut ids = Vec::new();
        ids.extend(self.template_content);
        ids.extend(self.pseudo_elements.iter().flatten().copied());
        ids.extend(self.shadow_roots.iter().flatten().copied());
        ids.extend(self.content_document);
        ids.extend(self.children.iter().flatten().copied());
        ids.extend(self.imported_document);
        ids
    }

    /// Drop `id` from whichever relation `slot` names
    pub(crate) fn detach(&mut self, id: NodeId, slot: Slot) {
        fn without(list: &mut Option<IdList>, id: NodeId) {
            if let Some(list) = list {
                list.retain(|x| *x != id);
            }
        }

        match slot {
            Slot::Root => {}
            Slot::Child => {
                if let Some(children) = &mut self.children {
                    children.retain(|x| *x != id);
                    self.child_node_count = Some(children.len() as u32);
                }
            }
            Slot::ShadowRoot => without(&mut self.shadow_roots, id),
            Slot::PseudoElement => without(&mut self.pseudo_elements, id),
            Slot::ContentDocument if self.content_document == Some(id) => {
                self.content_document = None
            }
            Slot::TemplateContent if self.template_content == Some(id) => {
                self.template_content = None
            }
            Slot::ImportedDocument if self.imported_document == Some(id) => {
                self.imported_document = None
            }
            _ => {}
        }
    }

    /// Shallow wire form; relations are left for the caller to fill
    pub fn to_wire(&self) -> Node {
        let details = &*self.details;
        Node {
            node_id: self.node_id,
            parent_id: self.parent_id,
            backend_node_id: self.backend_node_id,
            node_type: self.node_type,
            node_name: self.node_name.clone(),
            local_name: self.local_name.clone(),
            node_value: self.node_value.clone(),
            child_node_count: self.child_node_count,
            attributes: if self.is_element() || !self.attributes.is_empty() {
                Some(self.attributes.to_flat())
            } else {
                None
            },
            document_url: details.document_url.clone(),
            base_url: details.base_url.clone(),
            public_id: details.public_id.clone(),
            system_id: details.system_id.clone(),
            internal_subset: details.internal_subset.clone(),
            xml_version: details.xml_version.clone(),
            name: details.name.clone(),
            value: details.value.clone(),
            pseudo_type: details.pseudo_type,
            shadow_root_type: details.shadow_root_type,
            frame_id: details.frame_id.clone(),
            distributed_nodes: self.distributed_nodes.clone(),
            is_svg: details.is_svg,
            ..Default::default()
        }
    }
}
