//! JSON import/export of the visible graph.
//!
//! File layout:
//!
//! ```json
//! {"DSRModel": {
//!     "symbol": [{"id": 1, "type": "world", "name": "world",
//!                 "attribute": [{"key": "level", "value": {"type": "int", "value": 0}}]}],
//!     "link":   [{"src": 1, "dst": 2, "label": "RT", "linkAttribute": []}]
//! }}
//! ```
//!
//! Ids may also be written as strings, and attribute values as plain strings
//! (read back as `str` attributes).

use crate::attribute::{Attribute, Value};
use crate::error::{GraphError, Result};
use crate::node::{Edge, Node, NodeId};
use crate::store::{GraphStore, Mutation};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DsrFile {
    #[serde(rename = "DSRModel")]
    pub model: DsrModel,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DsrModel {
    #[serde(default)]
    pub symbol: Vec<Symbol>,
    #[serde(default)]
    pub link: Vec<Link>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub id: FileId,
    #[serde(rename = "type")]
    pub node_type: String,
    pub name: String,
    #[serde(default)]
    pub attribute: Vec<AttributeEntry>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub src: FileId,
    pub dst: FileId,
    pub label: String,
    #[serde(default, rename = "linkAttribute")]
    pub link_attribute: Vec<AttributeEntry>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributeEntry {
    pub key: String,
    pub value: FileValue,
}

/// Node id as found in a file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileId {
    Int(NodeId),
    Text(String),
}

impl FileId {
    fn resolve(&self) -> Result<NodeId> {
        match self {
            FileId::Int(id) => Ok(*id),
            FileId::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| GraphError::Serialization(format!("invalid node id: {s}"))),
        }
    }
}

/// Attribute value as found in a file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileValue {
    Typed(Value),
    Plain(String),
}

impl From<FileValue> for Value {
    fn from(v: FileValue) -> Self {
        match v {
            FileValue::Typed(v) => v,
            FileValue::Plain(s) => Value::Str(s),
        }
    }
}

const LEVEL: &str = "level";
const PARENT: &str = "parent";
const TRANSFORM: &str = "RT";

impl GraphStore {
    /// Snapshot of the visible graph in file form.
    pub fn to_model(&self) -> DsrModel {
        let mut model = DsrModel::default();
        for node in self.nodes() {
            model.symbol.push(Symbol {
                id: FileId::Int(node.id),
                node_type: node.node_type.clone(),
                name: node.name.clone(),
                attribute: entries(node.attrs.iter()),
            });
            for edge in self.get_edges(node.id) {
                model.link.push(Link {
                    src: FileId::Int(edge.from),
                    dst: FileId::Int(edge.to),
                    label: edge.edge_type.clone(),
                    link_attribute: entries(edge.attrs.iter()),
                });
            }
        }
        model
    }

    /// Insert every symbol, then every link, through the local mutation path.
    ///
    /// Every symbol starts with `level` and `parent` set to `0` unless the
    /// file says otherwise. An `RT` link makes its target a child of its
    /// source: one level deeper, with the source as parent.
    pub fn load_model(&mut self, model: DsrModel) -> Result<Mutation> {
        let mut mutation = Mutation::default();

        for symbol in model.symbol {
            let mut node = Node::new(symbol.id.resolve()?, symbol.node_type, symbol.name);
            node.set_attribute(LEVEL, 0);
            node.set_attribute(PARENT, 0);
            for entry in symbol.attribute {
                node.set_attribute(entry.key, Value::from(entry.value));
            }
            mutation.extend(self.insert_or_assign_node(node)?);
        }

        for link in model.link {
            let (from, to) = (link.src.resolve()?, link.dst.resolve()?);
            let transform = link.label == TRANSFORM;
            let mut edge = Edge::new(from, to, link.label);
            for entry in link.link_attribute {
                edge.set_attribute(entry.key, Value::from(entry.value));
            }
            match self.insert_or_assign_edge(edge) {
                Ok(m) => mutation.extend(m),
                Err(GraphError::NodeNotFound(id)) => {
                    warn!(%id, "skipping link to unknown node");
                    continue;
                }
                Err(e) => return Err(e),
            }
            if transform {
                mutation.extend(self.adopt(from, to)?);
            }
        }
        Ok(mutation)
    }

    /// Place `child` directly below `parent` in the transform tree.
    fn adopt(&mut self, parent: NodeId, child: NodeId) -> Result<Mutation> {
        let level = self.get_node_level(parent).unwrap_or(0) + 1;
        let mut node = self
            .get_node(child)
            .ok_or_else(|| GraphError::node_not_found(child))?;
        if node.attribute::<i32>(LEVEL).ok().flatten() == Some(level)
            && node.attribute::<i32>(PARENT).ok().flatten() == Some(parent)
        {
            return Ok(Mutation::default());
        }
        node.set_attribute(LEVEL, level);
        node.set_attribute(PARENT, parent);
        self.insert_or_assign_node(node)
    }

    pub fn read_from_json_file(&mut self, path: impl AsRef<Path>) -> Result<Mutation> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let file: DsrFile = serde_json::from_str(&text)?;
        info!(
            path = %path.display(),
            symbols = file.model.symbol.len(),
            links = file.model.link.len(),
            "loading graph"
        );
        self.load_model(file.model)
    }

    pub fn write_to_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = DsrFile {
            model: self.to_model(),
        };
        std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }
}

fn entries<'a>(attrs: impl Iterator<Item = (&'a str, &'a Attribute)>) -> Vec<AttributeEntry> {
    attrs
        .map(|(key, attr)| AttributeEntry {
            key: key.to_string(),
            value: FileValue::Typed(attr.value.clone()),
        })
        .collect()
}
