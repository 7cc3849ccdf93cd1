//! # rustact core
//!
//! Domain types, traits, and error definitions for the rustact agent loop.
//! This crate has no runtime wiring of its own: it defines the domain model
//! that the provider, tool, and agent crates implement against.
//!
//! ## Layout
//!
//! - [`message`]: conversation messages and roles
//! - [`provider`]: the streaming completion client contract
//! - [`tool`]: the tool capability contract, parameter schemas, and the registry
//! - [`error`]: per-context error enums built with `thiserror`

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, ToolError};
pub use message::{Message, Role};
pub use provider::{ChunkReceiver, CompletionRequest, Provider, StreamChunk, Usage};
pub use tool::{
    FailureKind, ParamKind, ParamSpec, Tool, ToolArgs, ToolContext, ToolFailure, ToolOutput,
    ToolRegistry, ToolSpec,
};
