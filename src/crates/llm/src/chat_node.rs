//! Streaming LLM chat node with tool orchestration.
//!
//! Presents an Ollama-backed chat interface as a graph node. The node
//! builds the conversation from its inputs, iterates bounded
//! chat → tool-call → tool-exec rounds against the registry, and emits the
//! final assistant message together with generation metrics, tool history,
//! and thinking history.
//!
//! Call accounting: with tools attached, rounds `0..=max_tool_iters` each
//! issue one backend call; the last round never offers tools, so it always
//! yields the user-facing message and the total number of chat calls is at
//! most `max_tool_iters + 1`. A round whose response carries no tool calls
//! ends the loop early and its response becomes the final message.
//!
//! Every backend call races the node's cancel flag; losing the race fires
//! the external cleanup (`ollama stop`, delayed port kill) and surfaces as
//! a final part with `metrics.error = "Cancelled"` in streaming mode.
//!
//! Backend failures never abort the graph: they are recorded in
//! `metrics.error` and the assistant message comes back empty.

use crate::cleanup;
use crate::config::{env_host, OllamaConfig};
use crate::error::LlmError;
use crate::ollama::{apply_context_window, ChatPayload, OllamaClient};
use async_trait::async_trait;
use fluxgraph_core::{
    params_from, CancelFlag, GraphError, GraphResult, InputMap, InputSpec, NodeCore, NodeId,
    NodeInstance, NodeStream, NodeTemplate, OutputMap, OutputSpec, ParamMeta, Params, PortType,
    StreamPart, StreamingNode,
};
use rand::Rng;
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tooling::timeout::with_timeout;
use tooling::tools::{get_tool_handler, ToolContext};
use tracing::{debug, info, warn};

/// Catalog type id of the chat node.
pub const NODE_TYPE: &str = "OllamaChat";

const NO_INPUT_ERROR: &str = "No messages or prompt provided";

/// Inline tool-invocation marker some models emit instead of structured
/// tool calls. Terminated by `_RESULT_:`, `_TOOL_END_:`, or end of text.
const SEARCH_MARKER: &str = "_TOOL_WEB_SEARCH_:";

/// Streaming chat node backed by an Ollama server.
///
/// Does not pull models; users manage them with the Ollama CLI. Inputs are
/// all optional — `messages`, `prompt`, `system`, `tools`, `tool` (multi),
/// `host`, `model` — and outputs are `message`, `metrics`, `tool_history`,
/// `thinking_history`.
pub struct OllamaChatNode {
    inner: Arc<ChatInner>,
}

struct ChatInner {
    id: NodeId,
    params: Params,
    cancel: CancelFlag,
    /// Internal counter for `seed_mode = "increment"`.
    seed_state: Mutex<Option<i64>>,
    /// Last `(host, model)` used, for CLI cleanup on stop.
    last_target: Mutex<Option<(String, String)>>,
}

impl OllamaChatNode {
    pub fn new(id: NodeId, params: Params) -> Self {
        Self {
            inner: Arc::new(ChatInner {
                id,
                params,
                cancel: CancelFlag::new(),
                seed_state: Mutex::new(None),
                last_target: Mutex::new(None),
            }),
        }
    }

    /// Catalog registration template.
    pub fn template() -> NodeTemplate {
        NodeTemplate::new(Self::input_specs_static(), Self::output_specs_static(), |id, params| {
            Ok(NodeInstance::Streaming(Box::new(OllamaChatNode::new(id, params))))
        })
        .with_default_params(Self::default_params())
        .with_params_meta(Self::params_meta())
    }

    pub fn default_params() -> Params {
        params_from(&[
            ("options", json!("")),
            ("keep_alive", json!(0)),
            ("think", json!(false)),
            ("json_mode", json!(false)),
            ("temperature", json!(0.7)),
            ("seed", json!(0)),
            ("seed_mode", json!("fixed")),
            ("max_tool_iters", json!(2)),
            ("tool_timeout_s", json!(10)),
            ("host", json!(env_host())),
            ("selected_model", json!("")),
        ])
    }

    fn params_meta() -> Vec<ParamMeta> {
        vec![
            ParamMeta::new("host", "text", json!(env_host())),
            ParamMeta::new("selected_model", "combo", json!("")),
            ParamMeta::new("temperature", "number", json!(0.7)).with_range(0.0, 1.5, 0.05),
            ParamMeta::new("seed", "number", json!(0)),
            ParamMeta::new("seed_mode", "combo", json!("fixed"))
                .with_options(vec![json!("fixed"), json!("random"), json!("increment")]),
            ParamMeta::new("max_tool_iters", "number", json!(2)),
            ParamMeta::new("tool_timeout_s", "number", json!(10)),
            ParamMeta::new("think", "combo", json!(false))
                .with_options(vec![json!(false), json!(true)]),
            ParamMeta::new("json_mode", "combo", json!(false))
                .with_options(vec![json!(false), json!(true)]),
        ]
    }

    fn input_specs_static() -> Vec<InputSpec> {
        vec![
            InputSpec::optional("messages", PortType::ChatMessageList),
            InputSpec::optional("prompt", PortType::Text),
            InputSpec::optional("system", PortType::Json),
            InputSpec::optional("tools", PortType::ToolSpecList),
            InputSpec::multi("tool", PortType::ToolSpec),
            InputSpec::optional("host", PortType::Text),
            InputSpec::optional("model", PortType::Text),
        ]
    }

    fn output_specs_static() -> Vec<OutputSpec> {
        vec![
            OutputSpec::new("message", PortType::ChatMessage),
            OutputSpec::new("metrics", PortType::ChatMetrics),
            OutputSpec::new("tool_history", PortType::ToolHistory),
            OutputSpec::new("thinking_history", PortType::ThinkingHistory),
        ]
    }

    /// Batch-shaped evaluation of the node, used directly by tests; the
    /// streaming interface wraps this in a single final part.
    pub async fn run(&self, inputs: &InputMap) -> GraphResult<OutputMap> {
        self.inner.run(inputs).await
    }
}

#[async_trait]
impl NodeCore for OllamaChatNode {
    fn id(&self) -> NodeId {
        self.inner.id
    }

    fn input_specs(&self) -> Vec<InputSpec> {
        Self::input_specs_static()
    }

    fn output_specs(&self) -> Vec<OutputSpec> {
        Self::output_specs_static()
    }

    async fn stop(&self) {
        self.inner.cancel.cancel();
        self.inner.fire_cleanup();
    }
}

#[async_trait]
impl StreamingNode for OllamaChatNode {
    async fn start(&self, inputs: InputMap) -> GraphResult<NodeStream> {
        let inner = self.inner.clone();
        let stream = async_stream::stream! {
            match inner.run(&inputs).await {
                Ok(outputs) => yield Ok(StreamPart::finished(outputs)),
                Err(GraphError::Cancelled) => {
                    yield Ok(StreamPart::finished(error_outputs("Cancelled")));
                }
                Err(err) => yield Err(err),
            }
        };
        Ok(Box::pin(stream))
    }
}

/// Outcome of the bounded tool-orchestration loop.
struct ChatRounds {
    final_message: Value,
    metrics: Map<String, Value>,
    tool_history: Vec<Value>,
    thinking_history: Vec<Value>,
}

enum Halt {
    Cancelled,
    Backend(LlmError),
}

impl ChatInner {
    async fn run(&self, inputs: &InputMap) -> GraphResult<OutputMap> {
        match self.run_inner(inputs).await {
            Ok(outputs) => Ok(outputs),
            Err(Halt::Cancelled) => Err(GraphError::Cancelled),
            Err(Halt::Backend(err @ LlmError::NoLocalModels)) => Err(err.into()),
            Err(Halt::Backend(err)) => {
                warn!(node = self.id, "chat backend failure: {err}");
                Ok(error_outputs(&err.to_string()))
            }
        }
    }

    async fn run_inner(&self, inputs: &InputMap) -> Result<OutputMap, Halt> {
        let host = self.effective_host(inputs);
        let client = OllamaClient::new(OllamaConfig::new(&host));
        let model = self.resolve_model(&client, inputs).await?;
        *self.last_target.lock().unwrap() = Some((host.clone(), model.clone()));

        let messages = build_messages(
            inputs.get("messages").and_then(Value::as_array),
            inputs.get("prompt").and_then(Value::as_str),
            inputs.get("system"),
        );
        let tools = collect_tools(inputs);

        info!(
            node = self.id,
            %model,
            %host,
            messages = messages.len(),
            tools = tools.len(),
            "chat node starting"
        );

        if messages.is_empty() {
            return Ok(error_outputs(NO_INPUT_ERROR));
        }

        let format = self.format_value();
        let keep_alive = self.keep_alive_value();
        let think = self.param_bool("think");
        let (mut options, effective_seed) = self.prepare_generation_options();

        // The context probe is only worthwhile for structured conversations;
        // prompt-only runs skip the extra round-trip.
        let has_message_input = inputs
            .get("messages")
            .and_then(Value::as_array)
            .map_or(false, |m| !m.is_empty());
        if has_message_input {
            options = apply_context_window(&host, &model, options).await;
        }

        let max_iters = self.param_i64("max_tool_iters").max(0) as usize;
        let timeout_s = self.param_i64("tool_timeout_s").max(0) as u64;

        let mut rounds = ChatRounds {
            final_message: json!({"role": "assistant", "content": ""}),
            metrics: Map::new(),
            tool_history: Vec::new(),
            thinking_history: Vec::new(),
        };
        let mut conversation = messages;

        for round in 0..=max_iters {
            let offering_tools = !tools.is_empty() && round < max_iters;
            let payload = ChatPayload {
                model: model.clone(),
                messages: conversation.clone(),
                tools: offering_tools.then(|| tools.clone()),
                stream: false,
                format: format.clone(),
                options: Some(options.clone()),
                keep_alive: keep_alive.clone(),
                think,
            };

            let response = self.chat_or_cancel(&client, &payload).await?;
            for (key, value) in response.metrics() {
                rounds.metrics.insert(key, value);
            }

            let message = response.message.clone();
            if let Some(thinking) = message.get("thinking").and_then(Value::as_str) {
                if !thinking.is_empty() {
                    rounds
                        .thinking_history
                        .push(json!({"thinking": thinking, "iteration": round}));
                }
            }

            let tool_calls = message
                .get("tool_calls")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            if !offering_tools || tool_calls.is_empty() {
                rounds.final_message = message;
                break;
            }

            for call in tool_calls {
                let (tool_message, record) =
                    self.execute_tool_call(&call, &model, &host, timeout_s).await;
                conversation.push(tool_message);
                rounds.tool_history.push(record);
            }
        }

        let mut final_message = rounds.final_message;
        if !final_message.is_object() {
            final_message = json!({"role": "assistant", "content": ""});
        }
        let mut metrics = rounds.metrics;

        self.parse_content_if_json_mode(&mut final_message, &mut metrics);
        parse_tool_calls_from_content(&mut final_message);
        ensure_assistant_role(&mut final_message);

        metrics.insert("seed".to_string(), Value::from(effective_seed));
        if let Some(temperature) = options.get("temperature") {
            metrics.insert("temperature".to_string(), temperature.clone());
        }

        let mut outputs = OutputMap::new();
        outputs.insert("message".into(), final_message);
        outputs.insert("metrics".into(), Value::Object(metrics));
        outputs.insert("tool_history".into(), Value::Array(rounds.tool_history));
        outputs.insert(
            "thinking_history".into(),
            Value::Array(rounds.thinking_history),
        );
        Ok(outputs)
    }

    /// One backend call raced against the cancel flag. Losing the race
    /// fires the external cleanup.
    async fn chat_or_cancel(
        &self,
        client: &OllamaClient,
        payload: &ChatPayload,
    ) -> Result<crate::ollama::ChatResponse, Halt> {
        tokio::select! {
            _ = self.cancel.cancelled() => {
                self.fire_cleanup();
                Err(Halt::Cancelled)
            }
            response = client.chat(payload) => response.map_err(Halt::Backend),
        }
    }

    /// Run a single tool call; returns the tool-role message to append and
    /// the `{call, result}` history record. Never fails: unknown tools,
    /// timeouts, and handler errors become structured result objects.
    async fn execute_tool_call(
        &self,
        call: &Value,
        model: &str,
        host: &str,
        timeout_s: u64,
    ) -> (Value, Value) {
        let name = call
            .pointer("/function/name")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let arguments = call
            .pointer("/function/arguments")
            .cloned()
            .filter(Value::is_object)
            .unwrap_or_else(|| json!({}));

        let result = match get_tool_handler(&name) {
            None => json!({
                "error": "unknown_tool",
                "message": format!("No handler for tool '{name}'"),
            }),
            Some(handler) => {
                let context = ToolContext::new(model, host);
                match with_timeout(Duration::from_secs(timeout_s), handler(arguments, context))
                    .await
                {
                    Ok(value) => value,
                    Err(_) => json!({
                        "error": "timeout",
                        "message": format!("Tool '{name}' timed out after {timeout_s}s"),
                    }),
                }
            }
        };

        debug!(node = self.id, tool = %name, "tool call resolved");
        let content =
            serde_json::to_string(&result).unwrap_or_else(|_| result.to_string());
        let tool_message = json!({
            "role": "tool",
            "tool_name": name,
            "content": content,
        });
        let record = json!({"call": call, "result": result});
        (tool_message, record)
    }

    /// Host precedence: inputs, then params, then environment.
    fn effective_host(&self, inputs: &InputMap) -> String {
        inputs
            .get("host")
            .and_then(Value::as_str)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .or_else(|| {
                self.params
                    .get("host")
                    .and_then(Value::as_str)
                    .filter(|h| !h.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(env_host)
    }

    /// Model precedence: explicit input, then the `selected_model` param if
    /// installed, then the first installed model.
    async fn resolve_model(
        &self,
        client: &OllamaClient,
        inputs: &InputMap,
    ) -> Result<String, Halt> {
        if let Some(model) = inputs.get("model").and_then(Value::as_str) {
            if !model.is_empty() {
                return Ok(model.to_string());
            }
        }

        let installed = match client.list_models().await {
            Ok(models) => models,
            Err(e) => {
                warn!(node = self.id, "model discovery failed: {e}");
                Vec::new()
            }
        };
        if installed.is_empty() {
            return Err(Halt::Backend(LlmError::NoLocalModels));
        }

        let selected = self
            .params
            .get("selected_model")
            .and_then(Value::as_str)
            .unwrap_or("");
        if !selected.is_empty() && installed.iter().any(|m| m == selected) {
            return Ok(selected.to_string());
        }
        let first = installed[0].clone();
        debug!(node = self.id, model = %first, "auto-selected first installed model");
        Ok(first)
    }

    /// Build generation options from the opaque `options` param plus the
    /// exposed temperature/seed controls. Returns `(options, seed)`.
    fn prepare_generation_options(&self) -> (Map<String, Value>, i64) {
        let mut options = self.parse_options_param();

        if let Some(temperature) = self.params.get("temperature").and_then(Value::as_f64) {
            options.insert("temperature".to_string(), json!(temperature));
        }

        let base_seed = self.param_i64("seed");
        let mode = self
            .params
            .get("seed_mode")
            .and_then(Value::as_str)
            .unwrap_or("fixed")
            .trim()
            .to_ascii_lowercase();
        let effective_seed = match mode.as_str() {
            "random" => rand::thread_rng().gen_range(0..=i32::MAX as i64),
            "increment" => {
                let mut state = self.seed_state.lock().unwrap();
                let current = state.unwrap_or(base_seed);
                *state = Some(current + 1);
                current
            }
            _ => base_seed,
        };

        options.insert("seed".to_string(), Value::from(effective_seed));
        (options, effective_seed)
    }

    fn parse_options_param(&self) -> Map<String, Value> {
        match self.params.get("options") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::String(raw)) if !raw.is_empty() => {
                match serde_json::from_str::<Value>(raw) {
                    Ok(Value::Object(map)) => map,
                    _ => Map::new(),
                }
            }
            _ => Map::new(),
        }
    }

    /// Preserve explicit 0 and duration strings; only null/empty unset.
    fn keep_alive_value(&self) -> Option<Value> {
        match self.params.get("keep_alive") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(other) => Some(other.clone()),
        }
    }

    fn format_value(&self) -> Option<String> {
        self.param_bool("json_mode").then(|| "json".to_string())
    }

    fn parse_content_if_json_mode(&self, message: &mut Value, metrics: &mut Map<String, Value>) {
        if !self.param_bool("json_mode") {
            return;
        }
        let Some(content) = message.get("content").and_then(Value::as_str) else {
            return;
        };
        match serde_json::from_str::<Value>(content) {
            Ok(parsed) => {
                message["content"] = parsed;
            }
            Err(e) => {
                metrics.insert("parse_error".to_string(), json!(e.to_string()));
            }
        }
    }

    fn fire_cleanup(&self) {
        let target = self.last_target.lock().unwrap().clone();
        if let Some((host, model)) = target {
            cleanup::unload_model(Some(&host), &model);
        }
    }

    fn param_bool(&self, name: &str) -> bool {
        self.params.get(name).and_then(Value::as_bool).unwrap_or(false)
    }

    fn param_i64(&self, name: &str) -> i64 {
        self.params.get(name).and_then(Value::as_i64).unwrap_or(0)
    }
}

/// Outputs for a run that ended in a recorded (non-fatal) error.
fn error_outputs(message: &str) -> OutputMap {
    let mut outputs = OutputMap::new();
    outputs.insert("message".into(), json!({"role": "assistant", "content": ""}));
    outputs.insert("metrics".into(), json!({"error": message}));
    outputs.insert("tool_history".into(), json!([]));
    outputs.insert("thinking_history".into(), json!([]));
    outputs
}

/// Construct the conversation from structured messages, a trailing prompt,
/// and an optional system message (string or message object). The system
/// message is prepended only when none exists yet.
fn build_messages(
    existing: Option<&Vec<Value>>,
    prompt: Option<&str>,
    system: Option<&Value>,
) -> Vec<Value> {
    let mut result: Vec<Value> = existing.cloned().unwrap_or_default();

    if let Some(system) = system {
        let has_system = result
            .iter()
            .any(|m| m.get("role").and_then(Value::as_str) == Some("system"));
        if !has_system {
            match system {
                Value::String(text) if !text.is_empty() => {
                    result.insert(0, json!({"role": "system", "content": text}));
                }
                Value::Object(_) => result.insert(0, system.clone()),
                _ => {}
            }
        }
    }

    if let Some(prompt) = prompt {
        if !prompt.is_empty() {
            result.push(json!({"role": "user", "content": prompt}));
        }
    }

    result
}

/// Union of the `tools` list input and every `tool` multi-input entry.
fn collect_tools(inputs: &InputMap) -> Vec<Value> {
    let mut result: Vec<Value> = Vec::new();

    if let Some(tools) = inputs.get("tools").and_then(Value::as_array) {
        result.extend(tools.iter().cloned());
    }
    if let Some(single) = inputs.get("tool").and_then(Value::as_array) {
        for spec in single {
            if spec.get("type").and_then(Value::as_str) == Some("function") {
                result.push(spec.clone());
            }
        }
    }

    result
}

fn marker_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Query runs from the marker to the first terminator or end of text.
        regex::Regex::new(r"(?s)_TOOL_WEB_SEARCH_:\s*(.*?)(?:_RESULT_:|_TOOL_END_:|$)")
            .expect("static marker pattern")
    })
}

/// Scan assistant content for the inline `_TOOL_WEB_SEARCH_:` marker and
/// lift it into a structured `web_search` tool call; then populate
/// `tool_name` from the first complete call.
fn parse_tool_calls_from_content(message: &mut Value) {
    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    if content.contains(SEARCH_MARKER) {
        if let Some(captures) = marker_regex().captures(&content) {
            let query = captures.get(1).map_or("", |m| m.as_str()).trim().to_string();
            if let (false, Some(obj)) = (query.is_empty(), message.as_object_mut()) {
                let tool_call = json!({
                    "function": {"name": "web_search", "arguments": {"query": query}}
                });
                let calls = obj.entry("tool_calls").or_insert_with(|| json!([]));
                if let Some(calls) = calls.as_array_mut() {
                    if !calls.contains(&tool_call) {
                        calls.push(tool_call);
                    }
                }
            }
        }
    }

    let first_complete = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .and_then(|calls| {
            calls
                .iter()
                .filter_map(|c| c.pointer("/function/name").and_then(Value::as_str))
                .find(|name| !name.is_empty())
        })
        .map(str::to_string);
    message["tool_name"] = first_complete.map_or(Value::Null, Value::String);
}

fn ensure_assistant_role(message: &mut Value) {
    if let Some(obj) = message.as_object_mut() {
        obj.entry("role").or_insert_with(|| json!("assistant"));
    }
}
