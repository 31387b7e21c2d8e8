//! Snapshot of user-created bindings, kept after the scope is gone.

use std::collections::{BTreeMap, BTreeSet};

use mlua::{Lua, LuaSerdeExt, Table, Value};
use serde::Serialize;

use crate::capabilities::display_values;

#[derive(Debug, Clone, PartialEq)]
pub enum Variable {
    Data(serde_json::Value),
    /// A function binding; only its presence is recorded.
    Function,
    /// Anything that has no data form, kept as its `tostring`.
    Opaque(String),
}

impl Serialize for Variable {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Variable::Data(v) => v.serialize(s),
            Variable::Function => s.serialize_str("<function>"),
            Variable::Opaque(text) => s.serialize_str(text),
        }
    }
}

impl std::fmt::Display for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Variable::Data(v) => write!(f, "{}", v),
            Variable::Function => write!(f, "<function>"),
            Variable::Opaque(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    entries: BTreeMap<String, Variable>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Variable)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.entries).unwrap_or_default()
    }

    /// Copies every string-keyed binding of `scope` not named in `excluded`.
    /// Existing entries are overwritten; entries absent from `scope` are kept.
    ///
    /// Never fails: a binding that cannot be read is skipped, and one whose
    /// `__tostring` misbehaves is recorded by its type name.
    pub fn merge_scope(&mut self, lua: &Lua, scope: &Table, excluded: &BTreeSet<String>) {
        for pair in scope.clone().pairs::<Value, Value>() {
            let (key, value) = match pair {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable scope entry");
                    continue;
                }
            };
            let Value::String(name) = key else { continue };
            let name = name.to_string_lossy().to_string();
            if excluded.contains(&name) {
                continue;
            }
            let variable = detach(lua, value);
            self.entries.insert(name, variable);
        }
    }
}

fn detach(lua: &Lua, value: Value) -> Variable {
    match value {
        Value::Function(_) => Variable::Function,
        Value::UserData(_) => opaque(lua, value),
        _ => match lua.from_value::<serde_json::Value>(value.clone()) {
            Ok(data) => Variable::Data(data),
            Err(_) => opaque(lua, value),
        },
    }
}

fn opaque(lua: &Lua, value: Value) -> Variable {
    let type_name = value.type_name();
    match display_values(lua, &[value]) {
        Ok(text) => Variable::Opaque(text),
        Err(e) => {
            tracing::warn!(error = %e, "tostring failed while recording a variable");
            Variable::Opaque(format!("<{}>", type_name))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merges_user_bindings_only() -> mlua::Result<()> {
        let lua = Lua::new();
        let scope = lua.create_table()?;
        lua.load("a = 1; name = 'x'; list = {1, 2}; function f() end; print = 3")
            .set_environment(scope.clone())
            .exec()?;

        let excluded: BTreeSet<String> = ["print".to_string()].into_iter().collect();
        let mut store = VariableStore::new();
        store.merge_scope(&lua, &scope, &excluded);

        assert_eq!(store.get("a"), Some(&Variable::Data(json!(1))));
        assert_eq!(store.get("name"), Some(&Variable::Data(json!("x"))));
        assert_eq!(store.get("list"), Some(&Variable::Data(json!([1, 2]))));
        assert_eq!(store.get("f"), Some(&Variable::Function));
        assert!(store.get("print").is_none());
        assert_eq!(store.to_json()["f"], json!("<function>"));
        Ok(())
    }

    #[test]
    fn later_merges_overwrite_and_keep() -> mlua::Result<()> {
        let lua = Lua::new();
        let mut store = VariableStore::new();
        let first = lua.create_table()?;
        first.set("a", 1)?;
        first.set("b", 2)?;
        store.merge_scope(&lua, &first, &BTreeSet::new());
        let second = lua.create_table()?;
        second.set("a", 10)?;
        store.merge_scope(&lua, &second, &BTreeSet::new());
        assert_eq!(store.get("a").map(|v| v.to_string()).as_deref(), Some("10"));
        assert_eq!(store.len(), 2);
        Ok(())
    }

    #[test]
    fn misbehaving_tostring_is_recorded_by_type() -> mlua::Result<()> {
        let lua = Lua::new();
        let scope = lua.create_table()?;
        lua.load(
            "bad = setmetatable({f = function() end}, {__tostring = function() return {} end})\n\
             raising = setmetatable({f = function() end}, {__tostring = function() error('no') end})\n\
             ok = 1",
        )
        .set_environment(scope.clone())
        .exec()?;

        let mut store = VariableStore::new();
        store.merge_scope(&lua, &scope, &BTreeSet::new());
        assert_eq!(store.get("bad"), Some(&Variable::Opaque("<table>".into())));
        assert_eq!(store.get("raising"), Some(&Variable::Opaque("<table>".into())));
        assert_eq!(store.get("ok"), Some(&Variable::Data(json!(1))));
        Ok(())
    }
}
