//! Semantic port types and market domain values
//!
//! Every node input and output is declared with a [`PortType`]. The type is
//! semantic rather than structural: `ApiKey` and `Text` are both JSON
//! strings on the wire, but a `Text` output cannot be linked into an
//! `ApiKey` input. Link validation uses [`PortType::assignable_from`] and
//! runtime validation uses [`PortType::matches`] against the actual
//! `serde_json::Value` flowing through the slot.
//!
//! Values travel through the graph as plain `serde_json::Value`s; the few
//! domain types the engine itself must understand ([`AssetSymbol`],
//! [`AssetClass`]) round-trip through serde so nodes can re-type them on
//! demand.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Semantic type of a node input or output slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortType {
    /// Accepts anything; used by pass-through and debug nodes.
    Any,
    Text,
    Number,
    Boolean,
    /// A secret string (provider API key). Not assignable from `Text`.
    ApiKey,
    AssetSymbol,
    AssetSymbolList,
    /// A single OHLCV bar (record object).
    Ohlcv,
    /// A record-oriented table of OHLCV bars.
    OhlcvFrame,
    ChatMessage,
    ChatMessageList,
    ToolSpec,
    ToolSpecList,
    ChatMetrics,
    ToolHistory,
    ThinkingHistory,
    /// Arbitrary JSON payload.
    Json,
}

impl PortType {
    /// Stable name used in UI metadata and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            PortType::Any => "Any",
            PortType::Text => "Text",
            PortType::Number => "Number",
            PortType::Boolean => "Boolean",
            PortType::ApiKey => "APIKey",
            PortType::AssetSymbol => "AssetSymbol",
            PortType::AssetSymbolList => "AssetSymbolList",
            PortType::Ohlcv => "OHLCV",
            PortType::OhlcvFrame => "OHLCVFrame",
            PortType::ChatMessage => "LLMChatMessage",
            PortType::ChatMessageList => "LLMChatMessageList",
            PortType::ToolSpec => "LLMToolSpec",
            PortType::ToolSpecList => "LLMToolSpecList",
            PortType::ChatMetrics => "LLMChatMetrics",
            PortType::ToolHistory => "LLMToolHistory",
            PortType::ThinkingHistory => "LLMThinkingHistory",
            PortType::Json => "JSON",
        }
    }

    /// Element type accepted by a list-shaped port, if any.
    pub fn element(&self) -> Option<PortType> {
        match self {
            PortType::AssetSymbolList => Some(PortType::AssetSymbol),
            PortType::ChatMessageList => Some(PortType::ChatMessage),
            PortType::ToolSpecList => Some(PortType::ToolSpec),
            PortType::OhlcvFrame => Some(PortType::Ohlcv),
            _ => None,
        }
    }

    /// Whether a value produced by a `source`-typed output may be bound to
    /// an input of this type.
    ///
    /// Identical types always match, `Any`/`Json` accept everything, and a
    /// list input accepts its own element type (the executor wraps single
    /// values arriving on multi-input slots).
    pub fn assignable_from(&self, source: PortType) -> bool {
        if *self == source || matches!(self, PortType::Any | PortType::Json) {
            return true;
        }
        if source == PortType::Any {
            return true;
        }
        self.element().map_or(false, |elem| elem == source)
    }

    /// Dynamic check of an actual value against this type.
    ///
    /// Checks are shape-based and deliberately lenient: the engine forwards
    /// opaque payloads (indicator outputs, frames) without understanding
    /// them, so only enough structure is verified to catch miswired graphs.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            PortType::Any | PortType::Json => true,
            PortType::Text | PortType::ApiKey => value.is_string(),
            PortType::Number => value.is_number(),
            PortType::Boolean => value.is_boolean(),
            PortType::AssetSymbol => AssetSymbol::from_value(value).is_some(),
            PortType::AssetSymbolList => as_list_of(value, |v| AssetSymbol::from_value(v).is_some()),
            PortType::Ohlcv => value.is_object(),
            PortType::OhlcvFrame => as_list_of(value, Value::is_object),
            PortType::ChatMessage => {
                value.is_object() && value.get("role").map_or(false, Value::is_string)
            }
            PortType::ChatMessageList => as_list_of(value, |v| PortType::ChatMessage.matches(v)),
            PortType::ToolSpec => {
                value.get("type").and_then(Value::as_str) == Some("function")
                    && value.get("function").map_or(false, Value::is_object)
            }
            PortType::ToolSpecList => as_list_of(value, |v| PortType::ToolSpec.matches(v)),
            PortType::ChatMetrics | PortType::ToolHistory | PortType::ThinkingHistory => {
                value.is_object() || value.is_array()
            }
        }
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn as_list_of(value: &Value, pred: impl Fn(&Value) -> bool) -> bool {
    value.as_array().map_or(false, |items| items.iter().all(pred))
}

/// Asset class of a tradable symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssetClass {
    Crypto,
    Stocks,
    Forex,
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AssetClass::Crypto => "CRYPTO",
            AssetClass::Stocks => "STOCKS",
            AssetClass::Forex => "FOREX",
        };
        f.write_str(s)
    }
}

/// A tradable symbol plus the class it belongs to.
///
/// Symbols are produced by input nodes and consumed by market nodes that may
/// declare a `required_asset_class`; validation re-types the JSON value with
/// [`AssetSymbol::from_value`] to enforce that constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetSymbol {
    pub ticker: String,
    pub asset_class: AssetClass,
    /// Quote currency, e.g. `USDT` for `BTC/USDT`. Optional for stocks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
}

impl AssetSymbol {
    pub fn new(ticker: impl Into<String>, asset_class: AssetClass) -> Self {
        Self {
            ticker: ticker.into(),
            asset_class,
            quote: None,
        }
    }

    pub fn with_quote(mut self, quote: impl Into<String>) -> Self {
        self.quote = Some(quote.into());
        self
    }

    /// Re-type a JSON value as an asset symbol, if it has the right shape.
    pub fn from_value(value: &Value) -> Option<AssetSymbol> {
        serde_json::from_value(value.clone()).ok()
    }

    /// Serialize into the JSON form that flows through graph slots.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl fmt::Display for AssetSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.quote {
            Some(quote) => write!(f, "{}/{}", self.ticker, quote),
            None => f.write_str(&self.ticker),
        }
    }
}
