//! Graph description model
//!
//! The browser editor exports a LiteGraph-shaped JSON document: an array of
//! node descriptors and an array of links. A link is itself an array,
//!
//! ```text
//! [link_id, from_node, from_slot, to_node, to_slot]          // 5 elements
//! [link_id, from_node, from_slot, to_node, to_slot, "TYPE"]  // with type tag
//! ```
//!
//! [`Link`] (de)serializes that heterogeneous array form; [`GraphSpec`] is
//! the parsed document handed to the executor.

use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

use crate::node::{NodeId, Params};

/// One node descriptor from the editor export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDesc {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub type_name: String,
    /// Parameter overrides; overlaid onto the type's `default_params`.
    #[serde(default)]
    pub properties: Params,
}

/// A directed connection from one output slot to one input slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub id: u64,
    pub from_node: NodeId,
    pub from_slot: usize,
    pub to_node: NodeId,
    pub to_slot: usize,
    /// Editor-side type tag; carried through but not trusted for validation.
    pub type_tag: Option<String>,
}

impl Link {
    pub fn new(id: u64, from_node: NodeId, from_slot: usize, to_node: NodeId, to_slot: usize) -> Self {
        Self {
            id,
            from_node,
            from_slot,
            to_node,
            to_slot,
            type_tag: None,
        }
    }
}

impl Serialize for Link {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.type_tag.is_some() { 6 } else { 5 };
        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(&self.id)?;
        seq.serialize_element(&self.from_node)?;
        seq.serialize_element(&self.from_slot)?;
        seq.serialize_element(&self.to_node)?;
        seq.serialize_element(&self.to_slot)?;
        if let Some(tag) = &self.type_tag {
            seq.serialize_element(tag)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Link {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LinkVisitor;

        impl<'de> Visitor<'de> for LinkVisitor {
            type Value = Link;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a link array [id, from, from_slot, to, to_slot, type?]")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Link, A::Error> {
                let id = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let from_node = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                let from_slot = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(2, &self))?;
                let to_node = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(3, &self))?;
                let to_slot = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(4, &self))?;
                // Type tag may be a string or null; anything else is ignored.
                let type_tag = match seq.next_element::<Value>()? {
                    Some(Value::String(s)) => Some(s),
                    _ => None,
                };
                // Drain any trailing elements some editor versions append.
                while seq.next_element::<Value>()?.is_some() {}
                Ok(Link {
                    id,
                    from_node,
                    from_slot,
                    to_node,
                    to_slot,
                    type_tag,
                })
            }
        }

        deserializer.deserialize_seq(LinkVisitor)
    }
}

/// A parsed graph description: ordered node descriptors plus ordered links.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSpec {
    #[serde(default)]
    pub nodes: Vec<NodeDesc>,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl GraphSpec {
    /// Parse the editor export from its JSON value form.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
