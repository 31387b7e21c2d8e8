//! Plainmark: Markdown documents with executable Lua blocks.
//!
//! ```text
//! text ──extract──▶ blocks ──rewrite──▶ chunks ──run against scope──▶ transcript
//!   └──render──▶ HTML preview (same fence rules)
//! ```
//!
//! [`Engine`] owns the Lua state, the deferred task queue and the
//! [`VariableStore`]; every `execute()` call gets a fresh scope and transcript.

pub mod capabilities;
pub mod config;
pub mod dom;
pub mod error;
pub mod execution;
pub mod extract;
pub mod render;
pub mod rewrite;
pub mod storage;
pub mod tasks;
pub mod transcript;
pub mod variables;

pub use capabilities::{DeviceSensors, Dialogs, Host, Location, Motion};
pub use config::Config;
pub use error::EngineError;
pub use execution::{
    Engine, EngineOptions, ExecutionReport, ExecutionStatus, EMPTY_BLOCK_MESSAGE, NO_BLOCKS_MESSAGE,
    NO_OUTPUT_MESSAGE,
};
pub use extract::{extract, CodeBlock};
pub use render::render;
pub use rewrite::rewrite;
pub use transcript::{Fragment, Transcript};
pub use variables::{Variable, VariableStore};
