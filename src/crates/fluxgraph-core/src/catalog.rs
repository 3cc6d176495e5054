//! Node catalog
//!
//! Concrete node implementations are registered explicitly at program
//! startup under stable string identifiers; the executor instantiates graph
//! descriptors by looking their `type` up here. Registration carries the
//! type's default parameters and UI metadata so the transport shell can
//! serve an editor palette without instantiating anything.

use crate::error::{GraphError, GraphResult};
use crate::node::{InputSpec, NodeId, NodeInstance, OutputSpec, ParamMeta, Params};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Builder invoked with `(id, merged params)` to construct a node.
pub type NodeBuilder = Arc<dyn Fn(NodeId, Params) -> GraphResult<NodeInstance> + Send + Sync>;

/// Everything registered for one node type.
#[derive(Clone)]
pub struct NodeTemplate {
    pub default_params: Params,
    pub params_meta: Vec<ParamMeta>,
    pub inputs: Vec<InputSpec>,
    pub outputs: Vec<OutputSpec>,
    builder: NodeBuilder,
}

impl NodeTemplate {
    pub fn new(
        inputs: Vec<InputSpec>,
        outputs: Vec<OutputSpec>,
        builder: impl Fn(NodeId, Params) -> GraphResult<NodeInstance> + Send + Sync + 'static,
    ) -> Self {
        Self {
            default_params: Params::new(),
            params_meta: Vec::new(),
            inputs,
            outputs,
            builder: Arc::new(builder),
        }
    }

    pub fn with_default_params(mut self, params: Params) -> Self {
        self.default_params = params;
        self
    }

    pub fn with_params_meta(mut self, meta: Vec<ParamMeta>) -> Self {
        self.params_meta = meta;
        self
    }
}

/// UI metadata served for one node type.
#[derive(Debug, Serialize)]
pub struct NodeTypeMeta<'a> {
    pub inputs: &'a [InputSpec],
    pub outputs: &'a [OutputSpec],
    pub params: Vec<&'a str>,
    pub params_meta: &'a [ParamMeta],
}

/// Catalog of registered node types.
///
/// Kept ordered by type name so `/nodes` listings and error messages are
/// deterministic.
#[derive(Default)]
pub struct NodeCatalog {
    templates: BTreeMap<String, NodeTemplate>,
}

impl NodeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node type. Later registrations replace earlier ones.
    pub fn register(&mut self, type_name: impl Into<String>, template: NodeTemplate) {
        self.templates.insert(type_name.into(), template);
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.templates.contains_key(type_name)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    /// Instantiate a node: overlay the type's defaults with the descriptor's
    /// properties, then run the registered builder.
    pub fn instantiate(
        &self,
        type_name: &str,
        id: NodeId,
        properties: &Params,
    ) -> GraphResult<NodeInstance> {
        let template = self
            .templates
            .get(type_name)
            .ok_or_else(|| GraphError::UnknownNodeType {
                type_name: type_name.to_string(),
            })?;

        let mut params = template.default_params.clone();
        for (key, value) in properties {
            params.insert(key.clone(), value.clone());
        }
        (template.builder)(id, params)
    }

    /// Metadata for every registered type, for the `/nodes` endpoint.
    pub fn describe(&self) -> BTreeMap<&str, NodeTypeMeta<'_>> {
        self.templates
            .iter()
            .map(|(name, template)| {
                (
                    name.as_str(),
                    NodeTypeMeta {
                        inputs: &template.inputs,
                        outputs: &template.outputs,
                        params: template.default_params.keys().map(String::as_str).collect(),
                        params_meta: &template.params_meta,
                    },
                )
            })
            .collect()
    }
}

/// Convenience for building `default_params` maps from literal pairs.
pub fn params_from(pairs: &[(&str, Value)]) -> Params {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}
