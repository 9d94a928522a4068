//! Host -> Lua conversion
//!
//! Primitives become Lua primitives, functions become Lua functions, and
//! aggregates become proxy handles over the live host storage. Handles are
//! cached per identity, so pushing the same slice twice yields the same
//! userdata and `==` holds in Lua.

use mlua::{Lua, Table, Value as LuaValue};

use super::call;
use super::classify::{classify_value, ProxyKind, Rule};
use super::null::null;
use super::proxy::Proxy;
use crate::error::{Error, Result};
use crate::logging;
use crate::state::Bridge;
use crate::types::{Kind, Signature};
use crate::value::{HostValue, Repr};

/// Registry slot of the per-instance handle cache
pub(crate) const HANDLE_CACHE: &str = "luar.handles";

#[derive(Debug, Clone, Copy)]
pub(crate) struct Placement {
    /// Inside a container: nil travels as the null sentinel
    pub element: bool,
    /// Record the handle in the cache and anchor table
    pub anchor: bool,
}

impl Placement {
    pub const TOP: Self = Self {
        element: false,
        anchor: true,
    };
    pub const ELEMENT: Self = Self {
        element: true,
        anchor: true,
    };
    /// Transient pushes (iteration, materialization)
    pub const TRANSIENT: Self = Self {
        element: true,
        anchor: false,
    };
}

/// Convert a host value for Lua
pub fn push(lua: &Lua, value: &HostValue) -> Result<LuaValue> {
    push_with(lua, value, Placement::TOP)
}

/// Convert a container element (nil becomes the null sentinel)
pub fn push_element(lua: &Lua, value: &HostValue) -> Result<LuaValue> {
    push_with(lua, value, Placement::ELEMENT)
}

pub(crate) fn push_with(lua: &Lua, value: &HostValue, placement: Placement) -> Result<LuaValue> {
    if let Some(inner) = value.interface_inner() {
        let iface = value.ty();
        let caps = (!iface.is_empty_interface()).then_some(iface);
        return push_concrete(lua, inner, placement, caps.cloned());
    }
    push_concrete(lua, value, placement, None)
}

fn push_concrete(
    lua: &Lua,
    value: &HostValue,
    placement: Placement,
    caps: Option<crate::types::Type>,
) -> Result<LuaValue> {
    match classify_value(value) {
        Rule::Unsupported => Err(Error::Unsupported(value.ty().to_string())),
        Rule::Nil | Rule::Dynamic if placement.element => Ok(null()),
        Rule::Nil | Rule::Dynamic => Ok(LuaValue::Nil),
        Rule::Bool => Ok(LuaValue::Boolean(value.as_bool().unwrap_or_default())),
        Rule::Number => Ok(number(value)),
        Rule::Text => Ok(LuaValue::String(
            lua.create_string(value.as_str().unwrap_or_default())?,
        )),
        Rule::Callable => push_function(lua, value),
        Rule::Proxy(kind) => push_proxy(lua, value, kind, caps, placement.anchor),
    }
}

fn number(value: &HostValue) -> LuaValue {
    match value.repr() {
        Repr::Int(i) => LuaValue::Integer(*i),
        // values above i64::MAX wrap; pulling at uint64 restores them
        Repr::Uint(u) => LuaValue::Integer(*u as i64),
        Repr::Float(f) => LuaValue::Number(*f),
        _ => LuaValue::Nil,
    }
}

fn push_function(lua: &Lua, value: &HostValue) -> Result<LuaValue> {
    let Repr::Func(Some(func)) = value.repr() else {
        return Ok(LuaValue::Nil);
    };
    if let Some(origin) = func.origin() {
        return Ok(LuaValue::Function(origin.clone()));
    }
    let sig = match value.ty().kind() {
        Kind::Func(sig) => sig.clone(),
        _ => Signature::default(),
    };
    let func = func.clone();
    let wrapped = lua.create_function(move |lua, args: mlua::MultiValue| {
        call::invoke(lua, &sig, &func, None, args).map_err(mlua::Error::external)
    })?;
    Ok(LuaValue::Function(wrapped))
}

fn handle_cache(lua: &Lua) -> Result<Option<Table>> {
    Ok(lua.named_registry_value::<Option<Table>>(HANDLE_CACHE)?)
}

fn push_proxy(
    lua: &Lua,
    value: &HostValue,
    kind: ProxyKind,
    caps: Option<crate::types::Type>,
    anchor: bool,
) -> Result<LuaValue> {
    let proxy = Proxy::new(value.clone(), kind, caps);
    let type_name = value.ty().to_string();
    logging::log_conversion(&type_name, "userdata");

    let Some(identity) = proxy.identity() else {
        logging::log_proxy(&type_name, false);
        return Ok(LuaValue::UserData(lua.create_userdata(proxy)?));
    };

    let cache = handle_cache(lua)?;
    let key = identity.key();
    if let Some(cache) = &cache {
        if let LuaValue::UserData(handle) = cache.raw_get::<LuaValue>(key.as_str())? {
            logging::log_proxy(&type_name, true);
            return Ok(LuaValue::UserData(handle));
        }
    }

    let handle = lua.create_userdata(proxy)?;
    if anchor {
        if let Some(cache) = cache {
            cache.raw_set(key, handle.clone())?;
        }
        if let Some(bridge) = lua.app_data_ref::<Bridge>() {
            bridge.anchors.anchor(identity, value.clone());
        }
    }
    logging::log_proxy(&type_name, false);
    Ok(LuaValue::UserData(handle))
}
