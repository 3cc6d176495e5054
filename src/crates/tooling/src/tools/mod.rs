//! Tool and credential registry
//!
//! A process-wide catalog of callable "tools" (named functions with a JSON
//! schema and an async handler) and credential providers. LLM chat nodes
//! look tools up here at runtime; tool nodes and the server register them at
//! startup and may keep registering dynamically.
//!
//! Three registration shapes are supported, mirroring how tools are
//! authored:
//!
//! - schema + handler pairs ([`register_tool_schema`] /
//!   [`register_tool_handler`])
//! - a [`ToolProvider`] object ([`register_tool_object`])
//! - a factory producing a fresh provider per call
//!   ([`register_tool_factory`]) — registration extracts the schema and
//!   installs an auto-generated handler
//!
//! Handlers never fail across the boundary: errors come back as structured
//! `{"error": kind, "message": ...}` JSON objects. Lookups of absent
//! entries return `None`, never an error. Registration with an empty name
//! or a non-object/empty schema fails with [`RegistryError`].
//!
//! A default `web_search` schema with a `handler_not_configured` handler is
//! installed on first access so graphs referencing it degrade gracefully;
//! real registrations override it.

mod web_search;

pub use web_search::WebSearchTool;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// Async tool handler: `(arguments, context) -> result value`.
pub type ToolHandlerFn =
    Arc<dyn Fn(Value, ToolContext) -> BoxFuture<'static, Value> + Send + Sync>;

/// Factory producing a fresh tool instance per invocation.
pub type ToolFactoryFn = Arc<dyn Fn() -> Arc<dyn ToolProvider> + Send + Sync>;

/// Lazily-evaluated secret: invoked at call time, never persisted.
pub type CredentialProvider = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Errors raised at registration time.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("tool name must be a non-empty string")]
    InvalidName,
    #[error("tool schema must be a non-empty JSON object")]
    InvalidSchema,
}

/// Per-call context handed to tool handlers.
#[derive(Clone, Default)]
pub struct ToolContext {
    pub model: String,
    pub host: String,
    pub credentials: HashMap<String, CredentialProvider>,
}

impl ToolContext {
    pub fn new(model: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            host: host.into(),
            credentials: all_credential_providers(),
        }
    }

    /// Resolve a named credential from this context. Provider failures
    /// yield `None`.
    pub fn credential(&self, name: &str) -> Option<String> {
        self.credentials.get(name).and_then(|provider| provider())
    }
}

/// Standard interface for implementing tool providers.
///
/// Implementations expose a stable tool name, a JSON schema describing the
/// tool, and an async execute taking arguments plus the call context.
#[async_trait::async_trait]
pub trait ToolProvider: Send + Sync {
    fn name(&self) -> &str;

    fn schema(&self) -> Value;

    async fn execute(&self, arguments: Value, context: ToolContext) -> Value;
}

#[derive(Default)]
struct RegistryState {
    schemas: HashMap<String, Value>,
    handlers: HashMap<String, ToolHandlerFn>,
    factories: HashMap<String, ToolFactoryFn>,
    credentials: HashMap<String, CredentialProvider>,
}

fn registry() -> &'static RwLock<RegistryState> {
    static REGISTRY: OnceLock<RwLock<RegistryState>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut state = RegistryState::default();
        install_defaults(&mut state);
        RwLock::new(state)
    })
}

fn install_defaults(state: &mut RegistryState) {
    state
        .schemas
        .insert("web_search".to_string(), default_web_search_schema());
    state.handlers.insert(
        "web_search".to_string(),
        Arc::new(|arguments, _context| {
            Box::pin(async move {
                json!({
                    "error": "handler_not_configured",
                    "message": "No handler is registered for this tool on the server.",
                    "arguments_echo": arguments,
                })
            })
        }),
    );
}

/// The built-in `web_search` schema served before any provider registers.
pub fn default_web_search_schema() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": "web_search",
            "description": "Search the web and return concise findings with sources.",
            "parameters": {
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search query"},
                    "k": {"type": "integer", "minimum": 1, "maximum": 10, "default": 5},
                    "time_range": {
                        "type": "string",
                        "enum": ["day", "week", "month", "year"],
                        "default": "month",
                    },
                    "topic": {
                        "type": "string",
                        "enum": ["general", "news", "finance"],
                        "default": "general",
                        "description": "Search topic category",
                    },
                    "lang": {
                        "type": "string",
                        "description": "Language code like en, fr",
                        "default": "en",
                    },
                },
                "required": ["query"],
            },
        },
    })
}

fn check_name(name: &str) -> Result<(), RegistryError> {
    if name.is_empty() {
        return Err(RegistryError::InvalidName);
    }
    Ok(())
}

fn check_schema(schema: &Value) -> Result<(), RegistryError> {
    match schema.as_object() {
        Some(obj) if !obj.is_empty() => Ok(()),
        _ => Err(RegistryError::InvalidSchema),
    }
}

/// Register (or replace) a tool schema.
pub fn register_tool_schema(name: &str, schema: Value) -> Result<(), RegistryError> {
    check_name(name)?;
    check_schema(&schema)?;
    registry().write().schemas.insert(name.to_string(), schema);
    Ok(())
}

pub fn get_tool_schema(name: &str) -> Option<Value> {
    registry().read().schemas.get(name).cloned()
}

/// Sorted names of every registered tool schema.
pub fn list_tool_names() -> Vec<String> {
    let mut names: Vec<String> = registry().read().schemas.keys().cloned().collect();
    names.sort();
    names
}

pub fn list_tool_schemas() -> Vec<Value> {
    let state = registry().read();
    let mut names: Vec<&String> = state.schemas.keys().collect();
    names.sort();
    names
        .into_iter()
        .filter_map(|name| state.schemas.get(name).cloned())
        .collect()
}

/// Register (or replace) a tool handler.
pub fn register_tool_handler(name: &str, handler: ToolHandlerFn) -> Result<(), RegistryError> {
    check_name(name)?;
    registry().write().handlers.insert(name.to_string(), handler);
    Ok(())
}

pub fn get_tool_handler(name: &str) -> Option<ToolHandlerFn> {
    registry().read().handlers.get(name).cloned()
}

/// Register a tool factory.
///
/// Also registers the schema extracted from a fresh instance and an
/// auto-generated handler that constructs a new instance per call.
pub fn register_tool_factory(name: &str, factory: ToolFactoryFn) -> Result<(), RegistryError> {
    check_name(name)?;

    let instance = factory();
    let schema = instance.schema();
    if check_schema(&schema).is_ok() {
        registry().write().schemas.insert(name.to_string(), schema);
    }

    let handler_factory = factory.clone();
    let handler: ToolHandlerFn = Arc::new(move |arguments, context| {
        let tool = handler_factory();
        Box::pin(async move { tool.execute(arguments, context).await })
    });

    let mut state = registry().write();
    state.factories.insert(name.to_string(), factory);
    state.handlers.insert(name.to_string(), handler);
    Ok(())
}

pub fn get_tool_factory(name: &str) -> Option<ToolFactoryFn> {
    registry().read().factories.get(name).cloned()
}

/// Register schema and a bound handler from one provider object.
pub fn register_tool_object(tool: Arc<dyn ToolProvider>) -> Result<(), RegistryError> {
    let name = tool.name().to_string();
    register_tool_schema(&name, tool.schema())?;
    let handler: ToolHandlerFn = Arc::new(move |arguments, context| {
        let tool = tool.clone();
        Box::pin(async move { tool.execute(arguments, context).await })
    });
    register_tool_handler(&name, handler)
}

/// Register a credential provider under a stable name.
pub fn register_credential_provider(
    name: &str,
    provider: CredentialProvider,
) -> Result<(), RegistryError> {
    check_name(name)?;
    registry()
        .write()
        .credentials
        .insert(name.to_string(), provider);
    Ok(())
}

pub fn get_credential_provider(name: &str) -> Option<CredentialProvider> {
    registry().read().credentials.get(name).cloned()
}

/// Resolve a credential value right now. Provider failures yield `None`.
pub fn get_credential(name: &str) -> Option<String> {
    get_credential_provider(name).and_then(|provider| provider())
}

/// Snapshot of every registered credential provider, for building tool
/// contexts.
pub fn all_credential_providers() -> HashMap<String, CredentialProvider> {
    registry().read().credentials.clone()
}

/// Reset the registry to its default contents. Test fixtures only.
pub fn clear_registry_for_tests() {
    let mut state = registry().write();
    *state = RegistryState::default();
    install_defaults(&mut state);
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    // The registry is process-wide; serialize tests that mutate it.
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    struct EchoTool;

    #[async_trait::async_trait]
    impl ToolProvider for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn schema(&self) -> Value {
            json!({"type": "function", "function": {"name": "echo", "parameters": {}}})
        }

        async fn execute(&self, arguments: Value, _context: ToolContext) -> Value {
            json!({"echo": arguments})
        }
    }

    #[test]
    fn empty_name_is_rejected() {
        let _guard = TEST_LOCK.lock();
        assert_eq!(
            register_tool_schema("", json!({"a": 1})),
            Err(RegistryError::InvalidName)
        );
    }

    #[test]
    fn non_object_schema_is_rejected() {
        let _guard = TEST_LOCK.lock();
        assert_eq!(
            register_tool_schema("t", json!("nope")),
            Err(RegistryError::InvalidSchema)
        );
        assert_eq!(
            register_tool_schema("t", json!({})),
            Err(RegistryError::InvalidSchema)
        );
    }

    #[tokio::test]
    async fn default_web_search_reports_not_configured() {
        let _guard = TEST_LOCK.lock();
        clear_registry_for_tests();
        let handler = get_tool_handler("web_search").expect("default handler");
        let result = handler(json!({"query": "rust"}), ToolContext::default()).await;
        assert_eq!(result["error"], json!("handler_not_configured"));
        assert_eq!(result["arguments_echo"]["query"], json!("rust"));
    }

    #[tokio::test]
    async fn object_registration_overrides_defaults() {
        let _guard = TEST_LOCK.lock();
        clear_registry_for_tests();
        register_tool_object(Arc::new(EchoTool)).unwrap();
        assert!(list_tool_names().contains(&"echo".to_string()));

        let handler = get_tool_handler("echo").unwrap();
        let result = handler(json!({"q": 1}), ToolContext::default()).await;
        assert_eq!(result["echo"]["q"], json!(1));
    }

    #[tokio::test]
    async fn factory_registration_installs_schema_and_handler() {
        let _guard = TEST_LOCK.lock();
        clear_registry_for_tests();
        register_tool_factory("echo", Arc::new(|| Arc::new(EchoTool) as Arc<dyn ToolProvider>))
            .unwrap();
        assert!(get_tool_schema("echo").is_some());
        assert!(get_tool_factory("echo").is_some());
        let handler = get_tool_handler("echo").unwrap();
        let result = handler(json!({}), ToolContext::default()).await;
        assert!(result.get("echo").is_some());
    }

    #[test]
    fn credentials_resolve_lazily_and_swallow_failures() {
        let _guard = TEST_LOCK.lock();
        clear_registry_for_tests();
        register_credential_provider("good_key", Arc::new(|| Some("secret".into()))).unwrap();
        register_credential_provider("bad_key", Arc::new(|| None)).unwrap();

        assert_eq!(get_credential("good_key").as_deref(), Some("secret"));
        assert_eq!(get_credential("bad_key"), None);
        assert_eq!(get_credential("absent"), None);

        let context = ToolContext::new("m", "h");
        assert_eq!(context.credential("good_key").as_deref(), Some("secret"));
    }

    #[test]
    fn lookup_of_absent_tool_is_none_not_error() {
        let _guard = TEST_LOCK.lock();
        clear_registry_for_tests();
        assert!(get_tool_schema("missing").is_none());
        assert!(get_tool_handler("missing").is_none());
    }
}
