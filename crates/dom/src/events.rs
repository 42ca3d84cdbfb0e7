//! DOM events as a closed set
//!
//! Method names are mapped once, here. Everything downstream matches on
//! `DomEvent` and never sees a string.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::types::{BackendNode, Node, NodeId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeModified {
    pub node_id: NodeId,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeRemoved {
    pub node_id: NodeId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterDataModified {
    pub node_id: NodeId,
    pub character_data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildNodeCountUpdated {
    pub node_id: NodeId,
    pub child_node_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildNodeInserted {
    pub parent_node_id: NodeId,
    /// `0` inserts as first child
    #[serde(default)]
    pub previous_node_id: NodeId,
    pub node: Node,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildNodeRemoved {
    pub parent_node_id: NodeId,
    pub node_id: NodeId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributedNodesUpdated {
    pub insertion_point_id: NodeId,
    pub distributed_nodes: Vec<BackendNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineStyleInvalidated {
    pub node_ids: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PseudoElementAdded {
    pub parent_id: NodeId,
    pub pseudo_element: Node,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PseudoElementRemoved {
    pub parent_id: NodeId,
    pub pseudo_element_id: NodeId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetChildNodes {
    pub parent_id: NodeId,
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShadowRootPopped {
    pub host_id: NodeId,
    pub root_id: NodeId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShadowRootPushed {
    pub host_id: NodeId,
    pub root: Node,
}

/// Every DOM event the mirror understands
#[derive(Debug, Clone, PartialEq)]
pub enum DomEvent {
    AttributeModified(AttributeModified),
    AttributeRemoved(AttributeRemoved),
    CharacterDataModified(CharacterDataModified),
    ChildNodeCountUpdated(ChildNodeCountUpdated),
    ChildNodeInserted(ChildNodeInserted),
    ChildNodeRemoved(ChildNodeRemoved),
    DistributedNodesUpdated(DistributedNodesUpdated),
    DocumentUpdated,
    InlineStyleInvalidated(InlineStyleInvalidated),
    PseudoElementAdded(PseudoElementAdded),
    PseudoElementRemoved(PseudoElementRemoved),
    SetChildNodes(SetChildNodes),
    ShadowRootPopped(ShadowRootPopped),
    ShadowRootPushed(ShadowRootPushed),
}

impl DomEvent {
    /// Decode a raw `(method, params)` pair.
    ///
    /// `Ok(None)` for methods outside the set (other domains, or DOM events
    /// the mirror has no use for); `Err` when a known event has a bad payload.
    pub fn from_cdp(method: &str, params: Option<Value>) -> Result<Option<Self>> {
        let params = params.unwrap_or_else(|| Value::Object(Default::default()));

        let event = match method {
            "DOM.attributeModified" => Self::AttributeModified(serde_json::from_value(params)?),
            "DOM.attributeRemoved" => Self::AttributeRemoved(serde_json::from_value(params)?),
            "DOM.characterDataModified" => {
                Self::CharacterDataModified(serde_json::from_value(params)?)
            }
            "DOM.childNodeCountUpdated" => {
                Self::ChildNodeCountUpdated(serde_json::from_value(params)?)
            }
            "DOM.childNodeInserted" => Self::ChildNodeInserted(serde_json::from_value(params)?),
            "DOM.childNodeRemoved" => Self::ChildNodeRemoved(serde_json::from_value(params)?),
            "DOM.distributedNodesUpdated" => {
                Self::DistributedNodesUpdated(serde_json::from_value(params)?)
            }
            "DOM.documentUpdated" => Self::DocumentUpdated,
            "DOM.inlineStyleInvalidated" => {
                Self::InlineStyleInvalidated(serde_json::from_value(params)?)
            }
            "DOM.pseudoElementAdded" => Self::PseudoElementAdded(serde_json::from_value(params)?),
            "DOM.pseudoElementRemoved" => {
                Self::PseudoElementRemoved(serde_json::from_value(params)?)
            }
            "DOM.setChildNodes" => Self::SetChildNodes(serde_json::from_value(params)?),
            "DOM.shadowRootPopped" => Self::ShadowRootPopped(serde_json::from_value(params)?),
            "DOM.shadowRootPushed" => Self::ShadowRootPushed(serde_json::from_value(params)?),
            _ => return Ok(None),
        };

        Ok(Some(event))
    }

    /// Protocol method name, the inverse of `from_cdp`
    pub fn method(&self) -> &'static str {
        match self {
            Self::AttributeModified(_) => "DOM.attributeModified",
            Self::AttributeRemoved(_) => "DOM.attributeRemoved",
            Self::CharacterDataModified(_) => "DOM.characterDataModified",
            Self::ChildNodeCountUpdated(_) => "DOM.childNodeCountUpdated",
            Self::ChildNodeInserted(_) => "DOM.childNodeInserted",
            Self::ChildNodeRemoved(_) => "DOM.childNodeRemoved",
            Self::DistributedNodesUpdated(_) => "DOM.distributedNodesUpdated",
            Self::DocumentUpdated => "DOM.documentUpdated",
            Self::InlineStyleInvalidated(_) => "DOM.inlineStyleInvalidated",
            Self::PseudoElementAdded(_) => "DOM.pseudoElementAdded",
            Self::PseudoElementRemoved(_) => "DOM.pseudoElementRemoved",
            Self::SetChildNodes(_) => "DOM.setChildNodes",
            Self::ShadowRootPopped(_) => "DOM.shadowRootPopped",
            Self::ShadowRootPushed(_) => "DOM.shadowRootPushed",
        }
    }
}

/// What an applied event changed, as seen by subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum TreeChange {
    DocumentLoaded { root: NodeId },
    DocumentInvalidated,
    ChildrenSet { parent: NodeId, count: usize },
    NodeInserted { parent: NodeId, node: NodeId },
    NodeRemoved { parent: Option<NodeId>, node: NodeId },
    ChildCountUpdated { node: NodeId, count: u32 },
    AttributeChanged { node: NodeId, name: String },
    CharacterDataChanged { node: NodeId },
    ShadowRootsChanged { host: NodeId },
    PseudoElementsChanged { parent: NodeId },
    DistributedNodesChanged { insertion_point: NodeId },
    InlineStyleInvalidated { nodes: Vec<NodeId> },
}
