//! Completion client implementations for rustact.
//!
//! All providers implement the `rustact_core::Provider` trait. The agent loop
//! only needs incremental text delivery, so a single OpenAI-compatible
//! streaming client covers every hosted and local endpoint we target.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;
