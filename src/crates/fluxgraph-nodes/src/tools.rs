//! Tool nodes: expose registry tool schemas as graph values.

use async_trait::async_trait;
use fluxgraph_core::{
    params_from, BatchNode, GraphError, GraphResult, InputMap, InputSpec, NodeCore, NodeId,
    NodeInstance, NodeTemplate, OutputMap, OutputSpec, ParamMeta, Params, PortType,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tooling::tools::{
    get_tool_schema, list_tool_names, register_credential_provider, CredentialProvider,
};
use tracing::debug;

/// Selects registered tool schemas by name and outputs them as a list.
///
/// Outputs the selected schemas on `tools` and the full set of available
/// names on `available` for UI consumption.
pub struct ToolsSelectorNode {
    id: NodeId,
    selected: Vec<String>,
}

impl ToolsSelectorNode {
    pub fn template() -> NodeTemplate {
        NodeTemplate::new(
            Vec::new(),
            Self::outputs(),
            |id, params: Params| {
                let selected = params
                    .get("selected")
                    .and_then(Value::as_array)
                    .map(|names| {
                        names
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(NodeInstance::Batch(Box::new(ToolsSelectorNode {
                    id,
                    selected,
                })))
            },
        )
        .with_default_params(params_from(&[("selected", json!([]))]))
        .with_params_meta(vec![ParamMeta::new("selected", "multiselect", json!([]))])
    }

    fn outputs() -> Vec<OutputSpec> {
        vec![
            OutputSpec::new("tools", PortType::ToolSpecList),
            OutputSpec::new("available", PortType::Json),
        ]
    }
}

#[async_trait]
impl NodeCore for ToolsSelectorNode {
    fn id(&self) -> NodeId {
        self.id
    }
    fn input_specs(&self) -> Vec<InputSpec> {
        Vec::new()
    }
    fn output_specs(&self) -> Vec<OutputSpec> {
        Self::outputs()
    }
}

#[async_trait]
impl BatchNode for ToolsSelectorNode {
    async fn execute(&self, _inputs: InputMap) -> GraphResult<OutputMap> {
        let available = list_tool_names();
        let schemas: Vec<Value> = self
            .selected
            .iter()
            .filter_map(|name| get_tool_schema(name))
            .collect();

        let mut out = OutputMap::new();
        out.insert("tools".into(), Value::Array(schemas));
        out.insert("available".into(), json!(available));
        Ok(out)
    }
}

/// Atomic tool node emitting the `web_search` schema configured by params.
///
/// Requires an `api_key` input; at execution time the key is registered as
/// the `tavily_api_key` credential provider so the web-search handler can
/// resolve it per call. Parameter defaults (`default_k`, `time_range`,
/// `topic`, `lang`) are injected into the emitted schema.
pub struct WebSearchToolNode {
    id: NodeId,
    params: Params,
}

impl WebSearchToolNode {
    pub fn template() -> NodeTemplate {
        NodeTemplate::new(
            Self::inputs(),
            Self::outputs(),
            |id, params: Params| {
                Ok(NodeInstance::Batch(Box::new(WebSearchToolNode { id, params })))
            },
        )
        .with_default_params(params_from(&[
            ("provider", json!("tavily")),
            ("default_k", json!(5)),
            ("time_range", json!("month")),
            ("topic", json!("general")),
            ("lang", json!("en")),
        ]))
        .with_params_meta(vec![
            ParamMeta::new("provider", "combo", json!("tavily"))
                .with_options(vec![json!("tavily")]),
            ParamMeta::new("default_k", "number", json!(5)).with_range(1.0, 10.0, 1.0),
            ParamMeta::new("time_range", "combo", json!("month")).with_options(vec![
                json!("day"),
                json!("week"),
                json!("month"),
                json!("year"),
            ]),
            ParamMeta::new("topic", "combo", json!("general")).with_options(vec![
                json!("general"),
                json!("news"),
                json!("finance"),
            ]),
            ParamMeta::new("lang", "text", json!("en")),
        ])
    }

    fn inputs() -> Vec<InputSpec> {
        vec![InputSpec::required("api_key", PortType::ApiKey)]
    }

    fn outputs() -> Vec<OutputSpec> {
        vec![OutputSpec::new("tool", PortType::ToolSpec)]
    }

    fn param_str(&self, name: &str, fallback: &str) -> String {
        self.params
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(fallback)
            .to_string()
    }
}

#[async_trait]
impl NodeCore for WebSearchToolNode {
    fn id(&self) -> NodeId {
        self.id
    }
    fn input_specs(&self) -> Vec<InputSpec> {
        Self::inputs()
    }
    fn output_specs(&self) -> Vec<OutputSpec> {
        Self::outputs()
    }
}

#[async_trait]
impl BatchNode for WebSearchToolNode {
    async fn execute(&self, inputs: InputMap) -> GraphResult<OutputMap> {
        let api_key = inputs
            .get("api_key")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        if api_key.is_empty() {
            return Err(GraphError::Node(format!(
                "node {}: Tavily API key is required",
                self.id
            )));
        }

        let provider: CredentialProvider = {
            let api_key = api_key.clone();
            Arc::new(move || Some(api_key.clone()))
        };
        register_credential_provider("tavily_api_key", provider)
            .map_err(|e| GraphError::Node(e.to_string()))?;
        debug!(node = self.id, "registered tavily_api_key credential");

        let mut schema = get_tool_schema("web_search").unwrap_or_else(|| json!({}));
        if let Some(props) = schema
            .pointer_mut("/function/parameters/properties")
            .and_then(Value::as_object_mut)
        {
            let k = self
                .params
                .get("default_k")
                .and_then(Value::as_i64)
                .unwrap_or(5)
                .clamp(1, 10);
            if let Some(spec) = props.get_mut("k") {
                spec["default"] = json!(k);
            }
            let time_range = self.param_str("time_range", "month");
            if let Some(spec) = props.get_mut("time_range") {
                if ["day", "week", "month", "year"].contains(&time_range.as_str()) {
                    spec["default"] = json!(time_range);
                }
            }
            let topic = self.param_str("topic", "general");
            if let Some(spec) = props.get_mut("topic") {
                if ["general", "news", "finance"].contains(&topic.as_str()) {
                    spec["default"] = json!(topic);
                }
            }
            if let Some(spec) = props.get_mut("lang") {
                spec["default"] = json!(self.param_str("lang", "en"));
            }
        }

        let mut out = OutputMap::new();
        out.insert("tool".into(), schema);
        Ok(out)
    }
}
