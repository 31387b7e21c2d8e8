pub mod example;
pub mod repl;
pub mod run;
pub mod watch;

use std::rc::Rc;

use anyhow::{Context, Result};
use plainmark::{storage::{FileStore, KeyValueStore, MemoryStore}, Config, Engine, EngineOptions, Host};

use crate::utils::dialogs::TerminalDialogs;

/// Engine wired to the terminal: durable `localStorage` unless `memory` is set.
pub fn build_engine(cfg: &Config, memory: bool) -> Result<Engine> {
    let storage: Rc<dyn KeyValueStore> = if memory {
        Rc::new(MemoryStore::new())
    } else {
        Rc::new(FileStore::from_config(cfg).context("Failed to open the storage directory")?)
    };
    let host = Host::new(storage).with_dialogs(Rc::new(TerminalDialogs));
    Ok(Engine::new(host, EngineOptions::from_config(cfg))?)
}
