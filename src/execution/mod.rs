//! Execution engine: runs the plainmark blocks of a document against one
//! shared scope and collects the transcript.

use std::{
    cell::RefCell,
    rc::Rc,
    time::{Duration, Instant},
};

use mlua::{Function, Lua, LuaOptions, StdLib};

use crate::{
    capabilities::{self, CallContext, CapabilityOptions, Host},
    config::Config,
    error::{describe_lua_error, EngineError, Result},
    extract::{extract, CodeBlock},
    rewrite::rewrite,
    storage::FileStore,
    tasks::{self, TaskQueue},
    transcript::{error_span, Transcript},
    variables::VariableStore,
};

pub const NO_BLOCKS_MESSAGE: &str = "No plainmark code blocks found in the document.";
pub const NO_OUTPUT_MESSAGE: &str = "Code executed successfully (no output).";
pub const EMPTY_BLOCK_MESSAGE: &str = "Empty code block";

#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Print `--- Executing block ... ---` before each block.
    pub block_headers: bool,
    pub capabilities: CapabilityOptions,
}

impl EngineOptions {
    pub fn from_config(cfg: &Config) -> Self {
        let mut capabilities = CapabilityOptions::default();
        if let Some(ms) = cfg.get_u64("FS_DELAY_MS") {
            capabilities.fs_delay = Duration::from_millis(ms);
        }
        if let Some(path) = cfg.get("RESERVED_FILE") {
            capabilities.reserved_file = path;
        }
        Self { block_headers: cfg.get_bool("BLOCK_HEADERS"), capabilities }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// The document has no executable blocks; nothing ran.
    NoBlocks,
    Succeeded,
    /// Every block ran, at least one reported an error.
    CompletedWithErrors,
    /// A block failed to compile; nothing ran.
    CompilationFailed,
}

#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub status: ExecutionStatus,
    /// Flattened, HTML-safe result as handed to callers of [`Engine::execute`].
    pub output: String,
    pub error_count: usize,
    pub blocks_run: usize,
    pub transcript: Transcript,
}

impl ExecutionReport {
    fn fixed(status: ExecutionStatus, output: String, error_count: usize) -> Self {
        Self { status, output, error_count, blocks_run: 0, transcript: Transcript::new() }
    }

    pub fn success(&self) -> bool {
        matches!(self.status, ExecutionStatus::Succeeded)
    }
}

pub struct Engine {
    lua: Lua,
    host: Host,
    options: EngineOptions,
    variables: VariableStore,
    tasks: Rc<RefCell<TaskQueue>>,
}

impl Engine {
    pub fn new(host: Host, options: EngineOptions) -> Result<Self> {
        let lua = Lua::new_with(
            StdLib::MATH | StdLib::STRING | StdLib::TABLE | StdLib::UTF8,
            LuaOptions::default(),
        )?;
        Ok(Self {
            lua,
            host,
            options,
            variables: VariableStore::new(),
            tasks: Rc::new(RefCell::new(TaskQueue::new())),
        })
    }

    /// In-memory collaborators and default options.
    pub fn headless() -> Result<Self> {
        Self::new(Host::headless(), EngineOptions::default())
    }

    /// Durable `localStorage` under the configured storage path.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let store = FileStore::from_config(cfg)?;
        Self::new(Host::new(Rc::new(store)), EngineOptions::from_config(cfg))
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn variables(&self) -> &VariableStore {
        &self.variables
    }

    /// Runs `document` and returns the flattened transcript or fixed message.
    pub fn execute(&mut self, document: &str) -> String {
        match self.run(document) {
            Ok(report) => report.output,
            Err(e) => {
                tracing::error!(error = %e, "engine failure");
                error_span(&format!("Internal error: {}", e))
            }
        }
    }

    /// Runs `document` and reports how it went.
    ///
    /// Compilation and runtime failures of blocks are part of the report;
    /// `Err` is reserved for failures of the engine itself.
    pub fn run(&mut self, document: &str) -> Result<ExecutionReport> {
        let blocks = extract(document);
        if blocks.is_empty() {
            tracing::info!("no plainmark blocks in document");
            return Ok(ExecutionReport::fixed(ExecutionStatus::NoBlocks, NO_BLOCKS_MESSAGE.to_string(), 0));
        }

        self.reclaim_detached_elements()?;

        let transcript = Rc::new(RefCell::new(Transcript::new()));
        let ctx = CallContext { transcript: transcript.clone(), tasks: self.tasks.clone() };
        let caps = capabilities::build(&self.lua, &self.host, &ctx, &self.options.capabilities)?;
        let scope = capabilities::new_scope(&self.lua, &caps)?;

        let compiled = match self.compile_all(&blocks, &scope) {
            Ok(compiled) => compiled,
            Err(EngineError::Compile { block, message }) => {
                tracing::warn!(block, %message, "block failed to compile");
                let message = format!("Compilation error: {}", message);
                let mut report =
                    ExecutionReport::fixed(ExecutionStatus::CompilationFailed, error_span(&message), 1);
                report.transcript.push_error(message);
                return Ok(report);
            }
            Err(e) => return Err(e),
        };

        let mut blocks_run = 0;
        for (index, (block, chunk)) in blocks.iter().zip(compiled).enumerate() {
            if block.code.trim().is_empty() {
                tracing::warn!(block = index + 1, "skipping empty block");
                transcript.borrow_mut().push_error(EMPTY_BLOCK_MESSAGE);
                continue;
            }
            if self.options.block_headers {
                transcript.borrow_mut().push_text(format!("--- Executing block {} ---", block.label()));
            }
            if let Err(e) = chunk.call::<()>(()) {
                let message = describe_lua_error(&e);
                tracing::warn!(block = index + 1, %message, "block raised a runtime error");
                transcript.borrow_mut().push_error(format!("Runtime error: {}", message));
            }
            blocks_run += 1;
            self.variables.merge_scope(&self.lua, &scope, &caps.names);
        }

        let transcript = transcript.borrow().clone();
        let error_count = transcript.error_count();
        let (status, output) = if error_count > 0 {
            (ExecutionStatus::CompletedWithErrors, transcript.to_html())
        } else if transcript.is_empty() {
            (ExecutionStatus::Succeeded, NO_OUTPUT_MESSAGE.to_string())
        } else {
            (ExecutionStatus::Succeeded, transcript.to_html())
        };
        tracing::info!(blocks = blocks_run, errors = error_count, pending = self.pending_tasks(), "document executed");

        Ok(ExecutionReport { status, output, error_count, blocks_run, transcript })
    }

    /// Frees elements that are off the page and no longer held by any script
    /// value. Handles from earlier runs are released by a full Lua collection.
    fn reclaim_detached_elements(&self) -> Result<()> {
        self.lua.gc_collect()?;
        let freed = self.host.document.borrow_mut().collect();
        if freed > 0 {
            tracing::debug!(freed, "reclaimed detached elements");
        }
        Ok(())
    }

    /// Rewrites and compiles every block before any of them runs.
    fn compile_all(&self, blocks: &[CodeBlock], scope: &mlua::Table) -> Result<Vec<Function>> {
        let mut compiled = Vec::with_capacity(blocks.len());
        for (index, block) in blocks.iter().enumerate() {
            let code = rewrite(&block.code);
            tracing::debug!(block = index + 1, label = %block.label(), "compiling block");
            let chunk = self
                .lua
                .load(code.as_str())
                .set_name(format!("=block {}", index + 1))
                .set_environment(scope.clone())
                .into_function()
                .map_err(|e| match e {
                    mlua::Error::SyntaxError { .. } => {
                        EngineError::Compile { block: index + 1, message: describe_lua_error(&e) }
                    }
                    other => EngineError::from(other),
                })?;
            compiled.push(chunk);
        }
        Ok(compiled)
    }

    /// Fires deferred callbacks due at `now` and returns what they printed.
    /// This output is never part of an already returned `execute()` result.
    pub fn run_due(&self, now: Instant) -> Transcript {
        tasks::run_due(&self.tasks, now)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.tasks.borrow().next_deadline()
    }

    pub fn pending_tasks(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Drops pending callbacks, e.g. before an auto-run replaces the document.
    pub fn cancel_pending(&self) {
        self.tasks.borrow_mut().clear();
    }

    pub fn document_html(&self) -> String {
        self.host.document.borrow().body_html()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_errors_name_the_block() -> Result<()> {
        let mut engine = Engine::headless()?;
        let report = engine.run("```plainmark\nprint(1)\n```\n```plainmark\nprint((\n```\n")?;
        assert_eq!(report.status, ExecutionStatus::CompilationFailed);
        assert!(report.output.starts_with("<span class=\"error\">Compilation error: block 2:"));
        assert_eq!(report.blocks_run, 0);
        Ok(())
    }

    #[test]
    fn headers_label_dual_tag_blocks() -> Result<()> {
        let options = EngineOptions { block_headers: true, ..Default::default() };
        let mut engine = Engine::new(Host::headless(), options)?;
        let out = engine.execute("```js plainmark\nprint(1)\n```\n");
        assert_eq!(out, "--- Executing block js+plainmark ---\n1\n");
        Ok(())
    }

    #[test]
    fn options_follow_config() {
        let mut cfg = Config::default();
        cfg.set("FS_DELAY_MS", "5");
        cfg.set("BLOCK_HEADERS", "true");
        let opts = EngineOptions::from_config(&cfg);
        assert!(opts.block_headers);
        assert_eq!(opts.capabilities.fs_delay, Duration::from_millis(5));
        assert_eq!(opts.capabilities.reserved_file, "testfile.txt");
    }
}
