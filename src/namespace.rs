//! Namespace binder - publish host values under global names
//!
//! An empty namespace writes straight into the globals table (overwriting);
//! a dotted namespace such as `"gons"` or `"app.util"` is created on demand
//! and refuses to overwrite existing names. Every entry is validated before
//! anything is written, so a failed registration leaves no partial state.

use std::collections::HashSet;

use mlua::{Lua, Table, Value as LuaValue};

use crate::error::{Error, Result};
use crate::interop::{classify_value, push, Rule};
use crate::logging;
use crate::types::Kind;
use crate::value::HostValue;

pub(crate) fn register(lua: &Lua, namespace: &str, entries: &[(String, HostValue)]) -> Result<()> {
    let mut seen = HashSet::with_capacity(entries.len());
    for (name, value) in entries {
        if name.is_empty() {
            return Err(Error::Binding("empty name".into()));
        }
        if !seen.insert(name.as_str()) {
            return Err(Error::Binding(format!("{name} registered twice")));
        }
        match classify_value(value) {
            Rule::Unsupported => return Err(Error::Unsupported(value.ty().to_string())),
            Rule::Nil if matches!(value.ty().kind(), Kind::Func(_)) => {
                return Err(Error::Binding(format!("{name} is a nil function")));
            }
            _ => {}
        }
    }

    let table = if namespace.is_empty() {
        lua.globals()
    } else {
        let table = resolve(lua, namespace, true)?;
        for (name, _) in entries {
            if !table.raw_get::<LuaValue>(name.as_str())?.is_nil() {
                return Err(Error::Binding(format!("{namespace}.{name} is already bound")));
            }
        }
        table
    };

    for (name, value) in entries {
        table.raw_set(name.as_str(), push(lua, value)?)?;
    }
    logging::log_register(namespace, entries.len());
    Ok(())
}

/// Walk (and optionally create) the tables along a dotted path
pub(crate) fn resolve(lua: &Lua, path: &str, create: bool) -> Result<Table> {
    let mut table = lua.globals();
    for segment in path.split('.') {
        if segment.is_empty() {
            return Err(Error::Binding(format!("malformed namespace {path:?}")));
        }
        table = match table.raw_get::<LuaValue>(segment)? {
            LuaValue::Table(next) => next,
            LuaValue::Nil if create => {
                let next = lua.create_table()?;
                table.raw_set(segment, next.clone())?;
                next
            }
            LuaValue::Nil => return Err(Error::Binding(format!("{path}: {segment} is not defined"))),
            other => {
                return Err(Error::Binding(format!(
                    "{path}: {segment} is a {}, not a table",
                    other.type_name()
                )))
            }
        };
    }
    Ok(table)
}

/// Value at a dotted path, nil if any table along it is missing
pub(crate) fn lookup(lua: &Lua, path: &str) -> Result<LuaValue> {
    match path.rsplit_once('.') {
        None => Ok(lua.globals().get::<LuaValue>(path)?),
        Some((parent, name)) => match resolve(lua, parent, false) {
            Ok(table) => Ok(table.get::<LuaValue>(name)?),
            Err(Error::Binding(_)) => Ok(LuaValue::Nil),
            Err(err) => Err(err),
        },
    }
}
