//! Input nodes: constants fed into the graph from node parameters.

use async_trait::async_trait;
use fluxgraph_core::{
    params_from, AssetClass, AssetSymbol, BatchNode, GraphError, GraphResult, InputMap, InputSpec,
    NodeCore, NodeId, NodeInstance, NodeTemplate, OutputMap, OutputSpec, ParamMeta, Params,
    PortType,
};
use serde_json::{json, Value};

/// Emits its `text` parameter.
pub struct TextNode {
    id: NodeId,
    text: String,
}

impl TextNode {
    pub fn template() -> NodeTemplate {
        NodeTemplate::new(
            Vec::new(),
            vec![OutputSpec::new("text", PortType::Text)],
            |id, params: Params| {
                let text = params
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Ok(NodeInstance::Batch(Box::new(TextNode { id, text })))
            },
        )
        .with_default_params(params_from(&[("text", json!(""))]))
        .with_params_meta(vec![ParamMeta::new("text", "text", json!(""))])
    }
}

#[async_trait]
impl NodeCore for TextNode {
    fn id(&self) -> NodeId {
        self.id
    }
    fn input_specs(&self) -> Vec<InputSpec> {
        Vec::new()
    }
    fn output_specs(&self) -> Vec<OutputSpec> {
        vec![OutputSpec::new("text", PortType::Text)]
    }
}

#[async_trait]
impl BatchNode for TextNode {
    async fn execute(&self, _inputs: InputMap) -> GraphResult<OutputMap> {
        let mut out = OutputMap::new();
        out.insert("text".into(), json!(self.text));
        Ok(out)
    }
}

/// Emits an [`AssetSymbol`] built from `ticker`/`asset_class`/`quote`.
pub struct AssetSymbolNode {
    id: NodeId,
    symbol: AssetSymbol,
}

impl AssetSymbolNode {
    pub fn template() -> NodeTemplate {
        NodeTemplate::new(
            Vec::new(),
            vec![OutputSpec::new("symbol", PortType::AssetSymbol)],
            |id, params: Params| {
                let ticker = params
                    .get("ticker")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if ticker.is_empty() {
                    return Err(GraphError::Node(format!(
                        "node {id}: 'ticker' parameter is required"
                    )));
                }
                let asset_class = match params.get("asset_class").and_then(Value::as_str) {
                    Some("STOCKS") => AssetClass::Stocks,
                    Some("FOREX") => AssetClass::Forex,
                    _ => AssetClass::Crypto,
                };
                let mut symbol = AssetSymbol::new(ticker, asset_class);
                if let Some(quote) = params.get("quote").and_then(Value::as_str) {
                    if !quote.is_empty() {
                        symbol = symbol.with_quote(quote);
                    }
                }
                Ok(NodeInstance::Batch(Box::new(AssetSymbolNode { id, symbol })))
            },
        )
        .with_default_params(params_from(&[
            ("ticker", json!("BTC")),
            ("asset_class", json!("CRYPTO")),
            ("quote", json!("USDT")),
        ]))
        .with_params_meta(vec![
            ParamMeta::new("ticker", "text", json!("BTC")),
            ParamMeta::new("asset_class", "combo", json!("CRYPTO")).with_options(vec![
                json!("CRYPTO"),
                json!("STOCKS"),
                json!("FOREX"),
            ]),
            ParamMeta::new("quote", "text", json!("USDT")),
        ])
    }
}

#[async_trait]
impl NodeCore for AssetSymbolNode {
    fn id(&self) -> NodeId {
        self.id
    }
    fn input_specs(&self) -> Vec<InputSpec> {
        Vec::new()
    }
    fn output_specs(&self) -> Vec<OutputSpec> {
        vec![OutputSpec::new("symbol", PortType::AssetSymbol)]
    }
}

#[async_trait]
impl BatchNode for AssetSymbolNode {
    async fn execute(&self, _inputs: InputMap) -> GraphResult<OutputMap> {
        let mut out = OutputMap::new();
        out.insert("symbol".into(), self.symbol.to_value());
        Ok(out)
    }
}

/// Emits an API key from its `key` param or a named environment variable.
///
/// The key flows through the graph as an `APIKey`-typed value; it is never
/// logged and never persisted by the engine.
pub struct ApiKeyNode {
    id: NodeId,
    key: Option<String>,
    env_var: String,
}

impl ApiKeyNode {
    pub fn template() -> NodeTemplate {
        NodeTemplate::new(
            Vec::new(),
            vec![OutputSpec::new("api_key", PortType::ApiKey)],
            |id, params: Params| {
                let key = params
                    .get("key")
                    .and_then(Value::as_str)
                    .filter(|k| !k.is_empty())
                    .map(str::to_string);
                let env_var = params
                    .get("env_var")
                    .and_then(Value::as_str)
                    .unwrap_or("TAVILY_API_KEY")
                    .to_string();
                Ok(NodeInstance::Batch(Box::new(ApiKeyNode { id, key, env_var })))
            },
        )
        .with_default_params(params_from(&[
            ("key", json!("")),
            ("env_var", json!("TAVILY_API_KEY")),
        ]))
        .with_params_meta(vec![
            ParamMeta::new("key", "text", json!("")),
            ParamMeta::new("env_var", "text", json!("TAVILY_API_KEY")),
        ])
    }
}

#[async_trait]
impl NodeCore for ApiKeyNode {
    fn id(&self) -> NodeId {
        self.id
    }
    fn input_specs(&self) -> Vec<InputSpec> {
        Vec::new()
    }
    fn output_specs(&self) -> Vec<OutputSpec> {
        vec![OutputSpec::new("api_key", PortType::ApiKey)]
    }
}

#[async_trait]
impl BatchNode for ApiKeyNode {
    async fn execute(&self, _inputs: InputMap) -> GraphResult<OutputMap> {
        let key = match &self.key {
            Some(key) => key.clone(),
            None => std::env::var(&self.env_var).map_err(|_| {
                GraphError::Node(format!(
                    "node {}: no API key in params and ${} is unset",
                    self.id, self.env_var
                ))
            })?,
        };
        let mut out = OutputMap::new();
        out.insert("api_key".into(), json!(key));
        Ok(out)
    }
}
