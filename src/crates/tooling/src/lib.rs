//! Tooling utilities for fluxgraph
//!
//! This crate carries the cross-cutting machinery the graph engine and its
//! nodes share:
//!
//! - `tools` - process-wide tool & credential registry plus the web-search
//!   tool implementation
//! - `rate_limit` - sliding-window rate limiter for external APIs
//! - `serialization` - wire serialization of whole-graph results
//! - `timeout` - bounded awaiting of tool handlers
//! - `logging` - structured logging helpers

pub mod logging;
pub mod rate_limit;
pub mod serialization;
pub mod timeout;
pub mod tools;
