//! Host capabilities injected into every execution scope.
//!
//! A fresh capability table is built for each `execute()` call and bound to
//! that call's transcript. Collaborators that outlive a call (persistent
//! storage, the element tree, the deferred task queue) are shared through
//! [`Host`] and the engine.

use std::{cell::RefCell, collections::BTreeSet, rc::Rc, time::Duration};

use chrono::format::{Item, StrftimeItems};
use mlua::{Function, Lua, LuaSerdeExt, Table, Value, Variadic};
use regex::Regex;
use serde::Serialize;

use crate::{
    dom::{document_table, Dom},
    error::to_lua_err,
    storage::{KeyValueStore, MemoryStore},
    tasks::{TaskId, TaskQueue},
    transcript::Transcript,
};

/// Names copied from the Lua base environment. No `os`, `io`, `load`,
/// `require`, `dofile`, `debug` or `rawset` (it would bypass the scope guard).
pub const BUILTIN_NAMES: &[&str] = &[
    "assert",
    "getmetatable",
    "ipairs",
    "math",
    "next",
    "pairs",
    "pcall",
    "rawequal",
    "rawget",
    "rawlen",
    "select",
    "setmetatable",
    "string",
    "table",
    "tonumber",
    "tostring",
    "type",
    "utf8",
    "xpcall",
];

/// Dialog surface behind `alert`, `confirm` and `prompt`.
pub trait Dialogs {
    fn alert(&self, message: &str);
    fn confirm(&self, message: &str) -> bool;
    fn prompt(&self, message: &str, default: Option<&str>) -> Option<String>;
}

/// No UI attached: alerts are logged, confirmations declined, prompts answered with the default.
#[derive(Debug, Default)]
pub struct HeadlessDialogs;

impl Dialogs for HeadlessDialogs {
    fn alert(&self, message: &str) {
        tracing::info!(text = message, "alert");
    }

    fn confirm(&self, _message: &str) -> bool {
        false
    }

    fn prompt(&self, _message: &str, default: Option<&str>) -> Option<String> {
        default.map(str::to_string)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Motion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
}

/// Device surface (sensors, location, camera). Results are passed to scripts as-is.
pub trait DeviceSensors {
    fn read_sensor(&self, kind: &str) -> Option<Motion>;
    fn location(&self) -> Option<Location>;
    fn take_picture(&self) -> Option<String>;
}

#[derive(Debug, Default)]
pub struct NoDevice;

impl DeviceSensors for NoDevice {
    fn read_sensor(&self, _kind: &str) -> Option<Motion> {
        None
    }

    fn location(&self) -> Option<Location> {
        None
    }

    fn take_picture(&self) -> Option<String> {
        None
    }
}

/// Collaborators shared by every run of one engine.
#[derive(Clone)]
pub struct Host {
    pub storage: Rc<dyn KeyValueStore>,
    pub session: Rc<dyn KeyValueStore>,
    pub dialogs: Rc<dyn Dialogs>,
    pub device: Rc<dyn DeviceSensors>,
    pub document: Rc<RefCell<Dom>>,
}

impl Host {
    pub fn new(storage: Rc<dyn KeyValueStore>) -> Self {
        Self {
            storage,
            session: Rc::new(MemoryStore::new()),
            dialogs: Rc::new(HeadlessDialogs),
            device: Rc::new(NoDevice),
            document: Rc::new(RefCell::new(Dom::new())),
        }
    }

    /// In-memory storage, no UI and no device.
    pub fn headless() -> Self {
        Self::new(Rc::new(MemoryStore::new()))
    }

    pub fn with_dialogs(mut self, dialogs: Rc<dyn Dialogs>) -> Self {
        self.dialogs = dialogs;
        self
    }

    pub fn with_device(mut self, device: Rc<dyn DeviceSensors>) -> Self {
        self.device = device;
        self
    }
}

#[derive(Debug, Clone)]
pub struct CapabilityOptions {
    /// Delay before simulated filesystem callbacks fire.
    pub fs_delay: Duration,
    /// The one path `fs.readFile` can read.
    pub reserved_file: String,
    pub reserved_content: String,
}

impl Default for CapabilityOptions {
    fn default() -> Self {
        Self {
            fs_delay: Duration::from_millis(100),
            reserved_file: "testfile.txt".into(),
            reserved_content: "This is the content of the test file.".into(),
        }
    }
}

/// Per-call state the capabilities write into.
#[derive(Clone)]
pub struct CallContext {
    pub transcript: Rc<RefCell<Transcript>>,
    pub tasks: Rc<RefCell<TaskQueue>>,
}

/// The capability table of one call plus the names it reserves.
pub struct Capabilities {
    pub table: Table,
    pub names: BTreeSet<String>,
}

/// `tostring` of every argument, joined by a space.
pub fn display_values(lua: &Lua, values: &[Value]) -> mlua::Result<String> {
    let tostring: Function = lua.globals().get("tostring")?;
    let mut parts = Vec::with_capacity(values.len());
    for v in values {
        parts.push(tostring.call::<String>(v.clone())?);
    }
    Ok(parts.join(" "))
}

pub fn build(lua: &Lua, host: &Host, ctx: &CallContext, opts: &CapabilityOptions) -> mlua::Result<Capabilities> {
    let caps = lua.create_table()?;
    let globals = lua.globals();
    for name in BUILTIN_NAMES {
        let v: Value = globals.get(*name)?;
        if !v.is_nil() {
            caps.set(*name, v)?;
        }
    }

    let print = print_fn(lua, ctx)?;
    let error = error_fn(lua, ctx)?;
    caps.set("print", print.clone())?;
    caps.set("error", error.clone())?;
    caps.set("console", console_table(lua, ctx, print, error)?)?;
    register_dialogs(lua, &caps, host)?;
    caps.set("localStorage", storage_table(lua, host.storage.clone())?)?;
    caps.set("sessionStorage", storage_table(lua, host.session.clone())?)?;
    caps.set("fs", fs_table(lua, ctx, opts)?)?;
    register_timers(lua, &caps, ctx)?;
    caps.set("document", document_table(lua, &host.document)?)?;
    caps.set("JSON", json_table(lua)?)?;
    caps.set("RegExp", regexp_table(lua)?)?;
    caps.set("Date", date_table(lua)?)?;
    register_device(lua, &caps, host)?;

    let mut names = BTreeSet::new();
    for pair in caps.clone().pairs::<String, Value>() {
        let (name, _) = pair?;
        names.insert(name);
    }
    tracing::trace!(count = names.len(), "built capability table");
    Ok(Capabilities { table: caps, names })
}

/// Creates the execution scope for one call.
///
/// The scope starts empty; capability lookups fall through to `caps` via
/// `__index`, and assigning to a capability name is a runtime error.
pub fn new_scope(lua: &Lua, caps: &Capabilities) -> mlua::Result<Table> {
    let scope = lua.create_table()?;
    let meta = lua.create_table()?;
    meta.set("__metatable", "locked")?;
    meta.set("__index", caps.table.clone())?;
    let reserved = caps.names.clone();
    meta.set(
        "__newindex",
        lua.create_function(move |_, (scope, key, value): (Table, Value, Value)| {
            if let Value::String(name) = &key {
                let name = name.to_string_lossy().to_string();
                if reserved.contains(&name) {
                    return Err(mlua::Error::runtime(format!("cannot redefine capability '{}'", name)));
                }
            }
            scope.raw_set(key, value)
        })?,
    )?;
    scope.set_metatable(Some(meta));
    Ok(scope)
}

fn print_fn(lua: &Lua, ctx: &CallContext) -> mlua::Result<Function> {
    let transcript = ctx.transcript.clone();
    lua.create_function(move |lua, args: Variadic<Value>| {
        let line = display_values(lua, &args)?;
        transcript.borrow_mut().push_text(line);
        Ok(args)
    })
}

fn error_fn(lua: &Lua, ctx: &CallContext) -> mlua::Result<Function> {
    let transcript = ctx.transcript.clone();
    lua.create_function(move |lua, args: Variadic<Value>| {
        let message = display_values(lua, &args)?;
        transcript.borrow_mut().push_error(message);
        Ok(Value::Nil)
    })
}

fn console_table(lua: &Lua, ctx: &CallContext, print: Function, error: Function) -> mlua::Result<Table> {
    let console = lua.create_table()?;
    console.set("log", print)?;
    console.set("error", error)?;
    let transcript = ctx.transcript.clone();
    console.set(
        "warn",
        lua.create_function(move |lua, args: Variadic<Value>| {
            let message = display_values(lua, &args)?;
            transcript.borrow_mut().push_text(format!("Warning: {}", message));
            Ok(())
        })?,
    )?;
    Ok(console)
}

fn register_dialogs(lua: &Lua, caps: &Table, host: &Host) -> mlua::Result<()> {
    let dialogs = host.dialogs.clone();
    caps.set(
        "alert",
        lua.create_function(move |lua, args: Variadic<Value>| {
            dialogs.alert(&display_values(lua, &args)?);
            Ok(())
        })?,
    )?;
    let dialogs = host.dialogs.clone();
    caps.set(
        "confirm",
        lua.create_function(move |lua, args: Variadic<Value>| Ok(dialogs.confirm(&display_values(lua, &args)?)))?,
    )?;
    let dialogs = host.dialogs.clone();
    caps.set(
        "prompt",
        lua.create_function(move |_, (message, default): (String, Option<String>)| {
            Ok(dialogs.prompt(&message, default.as_deref()))
        })?,
    )?;
    Ok(())
}

fn storage_table(lua: &Lua, store: Rc<dyn KeyValueStore>) -> mlua::Result<Table> {
    let t = lua.create_table()?;
    let s = store.clone();
    t.set("getItem", lua.create_function(move |_, key: String| s.get(&key).map_err(to_lua_err))?)?;
    let s = store.clone();
    t.set(
        "setItem",
        lua.create_function(move |lua, (key, value): (String, Value)| {
            let value = display_values(lua, &[value])?;
            s.set(&key, &value).map_err(to_lua_err)
        })?,
    )?;
    let s = store;
    t.set("removeItem", lua.create_function(move |_, key: String| s.remove(&key).map_err(to_lua_err))?)?;
    Ok(t)
}

/// Picks the callback out of `(options, callback)` or `(callback)` argument shapes.
fn callback_arg(name: &str, options: Value, callback: Option<Function>) -> mlua::Result<Function> {
    match (options, callback) {
        (Value::Function(f), _) => Ok(f),
        (_, Some(f)) => Ok(f),
        _ => Err(mlua::Error::runtime(format!("fs.{} expects a callback", name))),
    }
}

fn fs_table(lua: &Lua, ctx: &CallContext, opts: &CapabilityOptions) -> mlua::Result<Table> {
    let fs = lua.create_table()?;

    let (transcript, tasks) = (ctx.transcript.clone(), ctx.tasks.clone());
    let (delay, reserved, content) = (opts.fs_delay, opts.reserved_file.clone(), opts.reserved_content.clone());
    fs.set(
        "readFile",
        lua.create_function(move |lua, (path, options, callback): (String, Value, Option<Function>)| {
            let callback = callback_arg("readFile", options, callback)?;
            transcript.borrow_mut().push_text(format!("Simulated read of file: {}", path));
            let args = if path == reserved {
                vec![Value::Nil, Value::String(lua.create_string(&content)?)]
            } else {
                vec![Value::String(lua.create_string(format!("file not found: {}", path))?), Value::Nil]
            };
            Ok(tasks.borrow_mut().schedule(delay, None, callback, args, transcript.clone()))
        })?,
    )?;

    let (transcript, tasks) = (ctx.transcript.clone(), ctx.tasks.clone());
    fs.set(
        "writeFile",
        lua.create_function(
            move |_, (path, _data, options, callback): (String, Value, Value, Option<Function>)| {
                let callback = callback_arg("writeFile", options, callback)?;
                transcript.borrow_mut().push_text(format!("Simulated write to file: {}", path));
                Ok(tasks.borrow_mut().schedule(delay, None, callback, vec![Value::Nil], transcript.clone()))
            },
        )?,
    )?;

    Ok(fs)
}

fn register_timers(lua: &Lua, caps: &Table, ctx: &CallContext) -> mlua::Result<()> {
    for (set_name, clear_name, periodic) in [("setTimeout", "clearTimeout", false), ("setInterval", "clearInterval", true)] {
        let (transcript, tasks) = (ctx.transcript.clone(), ctx.tasks.clone());
        caps.set(
            set_name,
            lua.create_function(move |_, (callback, ms, args): (Function, Option<f64>, Variadic<Value>)| {
                let delay = Duration::from_millis(ms.unwrap_or(0.0).max(0.0) as u64);
                let every = periodic.then_some(delay);
                Ok(tasks.borrow_mut().schedule(delay, every, callback, args.to_vec(), transcript.clone()))
            })?,
        )?;
        let tasks = ctx.tasks.clone();
        caps.set(
            clear_name,
            lua.create_function(move |_, id: Option<TaskId>| {
                if let Some(id) = id {
                    tasks.borrow_mut().cancel(id);
                }
                Ok(())
            })?,
        )?;
    }
    Ok(())
}

fn json_table(lua: &Lua) -> mlua::Result<Table> {
    let json = lua.create_table()?;
    json.set(
        "stringify",
        lua.create_function(|_, value: Value| serde_json::to_string(&value).map_err(mlua::Error::external))?,
    )?;
    json.set(
        "parse",
        lua.create_function(|lua, text: String| {
            let parsed: serde_json::Value = serde_json::from_str(&text).map_err(mlua::Error::external)?;
            lua.to_value(&parsed)
        })?,
    )?;
    Ok(json)
}

fn compile_regex(pattern: &str) -> mlua::Result<Regex> {
    Regex::new(pattern).map_err(mlua::Error::external)
}

fn regexp_table(lua: &Lua) -> mlua::Result<Table> {
    let re = lua.create_table()?;
    re.set(
        "test",
        lua.create_function(|_, (pattern, text): (String, String)| Ok(compile_regex(&pattern)?.is_match(&text)))?,
    )?;
    re.set(
        "match",
        lua.create_function(|_, (pattern, text): (String, String)| {
            let re = compile_regex(&pattern)?;
            Ok(re.captures(&text).map(|caps| {
                caps.iter()
                    .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                    .collect::<Vec<_>>()
            }))
        })?,
    )?;
    re.set(
        "replace",
        lua.create_function(|_, (pattern, text, replacement): (String, String, String)| {
            Ok(compile_regex(&pattern)?.replace_all(&text, replacement.as_str()).into_owned())
        })?,
    )?;
    Ok(re)
}

fn date_table(lua: &Lua) -> mlua::Result<Table> {
    let date = lua.create_table()?;
    date.set("now", lua.create_function(|_, ()| Ok(chrono::Utc::now().timestamp_millis()))?)?;
    date.set("iso", lua.create_function(|_, ()| Ok(chrono::Local::now().to_rfc3339()))?)?;
    date.set(
        "format",
        lua.create_function(|_, fmt: String| {
            if StrftimeItems::new(&fmt).any(|item| matches!(item, Item::Error)) {
                return Err(mlua::Error::runtime(format!("invalid date format: {}", fmt)));
            }
            Ok(chrono::Local::now().format_with_items(StrftimeItems::new(&fmt)).to_string())
        })?,
    )?;
    Ok(date)
}

fn register_device(lua: &Lua, caps: &Table, host: &Host) -> mlua::Result<()> {
    let device = host.device.clone();
    caps.set(
        "readSensor",
        lua.create_function(move |lua, kind: String| match device.read_sensor(&kind) {
            Some(m) => lua.to_value(&m),
            None => Ok(Value::Nil),
        })?,
    )?;
    let device = host.device.clone();
    caps.set(
        "getLocation",
        lua.create_function(move |lua, ()| match device.location() {
            Some(l) => lua.to_value(&l),
            None => Ok(Value::Nil),
        })?,
    )?;
    let device = host.device.clone();
    caps.set("takePicture", lua.create_function(move |_, ()| Ok(device.take_picture()))?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> mlua::Result<(Lua, Capabilities, CallContext, Table)> {
        let lua = Lua::new();
        let ctx = CallContext {
            transcript: Rc::new(RefCell::new(Transcript::new())),
            tasks: Rc::new(RefCell::new(TaskQueue::new())),
        };
        let caps = build(&lua, &Host::headless(), &ctx, &CapabilityOptions::default())?;
        let scope = new_scope(&lua, &caps)?;
        Ok((lua, caps, ctx, scope))
    }

    fn run(lua: &Lua, scope: &Table, code: &str) -> mlua::Result<()> {
        lua.load(code).set_environment(scope.clone()).exec()
    }

    #[test]
    fn print_returns_its_argument() -> mlua::Result<()> {
        let (lua, _, ctx, scope) = setup()?;
        run(&lua, &scope, "x = print(41) + 1\nprint('a', true, nil)")?;
        assert_eq!(ctx.transcript.borrow().to_plain(), "41\na true nil\n");
        assert_eq!(scope.raw_get::<i64>("x")?, 42);
        Ok(())
    }

    #[test]
    fn error_and_console_share_the_transcript() -> mlua::Result<()> {
        let (lua, _, ctx, scope) = setup()?;
        run(&lua, &scope, "r = error('boom')\nconsole.log('ok')\nconsole.warn('careful')\nconsole.error('bad')")?;
        let t = ctx.transcript.borrow();
        assert_eq!(t.error_count(), 2);
        assert_eq!(t.to_plain(), "Error: boom\nok\nWarning: careful\nError: bad\n");
        assert!(scope.raw_get::<Value>("r")?.is_nil());
        Ok(())
    }

    #[test]
    fn capabilities_cannot_be_redefined() -> mlua::Result<()> {
        let (lua, caps, _, scope) = setup()?;
        let err = run(&lua, &scope, "print = 5").unwrap_err();
        assert!(err.to_string().contains("cannot redefine capability 'print'"));
        assert!(caps.names.contains("fs"));
        assert!(caps.names.contains("pairs"));
        run(&lua, &scope, "mine = 1")?;
        assert_eq!(scope.raw_get::<i64>("mine")?, 1);
        Ok(())
    }

    #[test]
    fn scope_guard_cannot_be_bypassed() -> mlua::Result<()> {
        let (lua, _, _, scope) = setup()?;
        assert!(run(&lua, &scope, "rawset(_ENV, 'print', 5)").is_err());
        let err = run(&lua, &scope, "setmetatable(_ENV, nil)").unwrap_err();
        assert!(err.to_string().contains("protected metatable"));
        run(&lua, &scope, "assert(getmetatable(_ENV) == 'locked')")?;
        assert!(scope.raw_get::<Value>("print")?.is_nil());
        run(&lua, &scope, "print('guarded')")?;
        Ok(())
    }

    #[test]
    fn sandbox_has_no_os_or_io() -> mlua::Result<()> {
        let (lua, _, _, scope) = setup()?;
        run(&lua, &scope, "assert(os == nil and io == nil and require == nil and load == nil)")
    }

    #[test]
    fn simulated_fs_defers_callbacks() -> mlua::Result<()> {
        let (lua, _, ctx, scope) = setup()?;
        run(
            &lua,
            &scope,
            "fs.readFile('testfile.txt', function(err, data) print(data) end)\nfs.readFile('other.txt', {}, function(err, data) print(err) end)",
        )?;
        assert_eq!(
            ctx.transcript.borrow().to_plain(),
            "Simulated read of file: testfile.txt\nSimulated read of file: other.txt\n"
        );
        assert_eq!(ctx.tasks.borrow().len(), 2);
        let later = crate::tasks::run_due(&ctx.tasks, std::time::Instant::now() + Duration::from_secs(1));
        assert_eq!(later.to_plain(), "This is the content of the test file.\nfile not found: other.txt\n");
        Ok(())
    }

    #[test]
    fn storage_json_and_regexp() -> mlua::Result<()> {
        let (lua, _, ctx, scope) = setup()?;
        run(
            &lua,
            &scope,
            r#"
            localStorage.setItem("n", 5)
            print(localStorage.getItem("n"))
            print(localStorage.getItem("missing"))
            local t = JSON.parse('{"a": [1, 2]}')
            print(t.a[2])
            print(JSON.stringify({ok = true}))
            print(RegExp.test("^a+$", "aaa"), RegExp.match("(\\d+)-(\\d+)", "10-20")[3])
            print(RegExp.replace("o", "foo", "0"))
            assert(type(Date.now()) == "number")
            "#,
        )?;
        assert_eq!(ctx.transcript.borrow().to_plain(), "5\nnil\n2\n{\"ok\":true}\ntrue 20\nf00\n");
        Ok(())
    }

    #[test]
    fn timers_can_be_cancelled() -> mlua::Result<()> {
        let (lua, _, ctx, scope) = setup()?;
        run(&lua, &scope, "local id = setTimeout(function() print('never') end, 10)\nclearTimeout(id)\nsetTimeout(print, 0, 'soon')")?;
        let later = crate::tasks::run_due(&ctx.tasks, std::time::Instant::now() + Duration::from_secs(1));
        assert_eq!(later.to_plain(), "soon\n");
        Ok(())
    }
}
