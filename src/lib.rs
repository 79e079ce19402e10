//! snippet-sandbox library
//!
//! Runs untrusted code snippets in single-use, locked-down containers:
//! - Language registry mapping language ids to execution profiles
//! - Isolation provider trait and its Docker Engine implementation
//! - Orchestrator that races each run against a deadline and always cleans up
//! - HTTP and MCP front-ends

pub mod backend;
pub mod config;
pub mod error;
pub mod mcp;
pub mod orchestrator;
pub mod output;
pub mod ratelimit;
pub mod registry;
pub mod web;

#[cfg(test)]
mod testing;
