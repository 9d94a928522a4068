//! The `luar` library table installed into every instance
//!
//! - `luar.null` - the null sentinel
//! - `luar.map2table(m)`, `luar.slice2table(s)` - deep copy a proxy into a table
//! - `luar.slice(n)`, `luar.map()` - fresh host containers of interface values
//! - `luar.append(s, ...)` - append in place, returns `s`
//! - `luar.raw(x)` - underlying primitive of a named scalar
//! - `luar.type(x)` - type handle of a proxy or plain value

use mlua::{Lua, MultiValue, Table, Value as LuaValue};

use crate::error::{Error, Result};
use crate::interop::{
    classify_value, infer, null, proxy_target, pull_element, push, push_with, Placement, Proxy,
    ProxyKind, Rule, TypeHandle,
};
use crate::types::Type;
use crate::value::HostValue;

/// Install the library table as global `name`
pub(crate) fn install(lua: &Lua, name: &str) -> Result<()> {
    let luar = lua.create_table()?;
    luar.set("null", null())?;

    luar.set(
        "map2table",
        lua.create_function(|lua, value: LuaValue| {
            let target = expect_proxy(&value, ProxyKind::Map)?;
            Ok(map_to_table(lua, &target)?)
        })?,
    )?;

    luar.set(
        "slice2table",
        lua.create_function(|lua, value: LuaValue| {
            let target = expect_proxy(&value, ProxyKind::Sequence)?;
            Ok(slice_to_table(lua, &target)?)
        })?,
    )?;

    luar.set(
        "slice",
        lua.create_function(|lua, len: Option<i64>| {
            let len = usize::try_from(len.unwrap_or(0))
                .map_err(|_| Error::conversion_because("number", "[]interface {}", "negative length"))?;
            Ok(push(lua, &HostValue::new_slice(&Type::any(), len))?)
        })?,
    )?;

    luar.set(
        "map",
        lua.create_function(|lua, ()| {
            Ok(push(lua, &HostValue::new_map(&Type::string(), &Type::any()))?)
        })?,
    )?;

    luar.set(
        "append",
        lua.create_function(|_, args: MultiValue| {
            let mut args = args.into_vec().into_iter();
            let seq = args.next().unwrap_or(LuaValue::Nil);
            let target = expect_proxy(&seq, ProxyKind::Sequence)?;
            let elem = target.ty().elem().cloned().unwrap_or_else(Type::any);
            for value in args {
                target.append(pull_element(&value, &elem)?)?;
            }
            Ok(seq)
        })?,
    )?;

    luar.set(
        "raw",
        lua.create_function(|lua, value: LuaValue| match proxy_target(&value) {
            Some(target) if is_scalar(&value) => Ok(push(lua, &target.underlying())?),
            _ => Ok(value),
        })?,
    )?;

    luar.set(
        "type",
        lua.create_function(|_, value: LuaValue| {
            if value.is_nil() || crate::interop::is_null(&value) {
                return Ok(None);
            }
            let host = infer(&value)?;
            Ok(Some(TypeHandle(host.dynamic_type())))
        })?,
    )?;

    lua.globals().set(name, luar)?;
    Ok(())
}

fn is_scalar(value: &LuaValue) -> bool {
    match value {
        LuaValue::UserData(ud) => ud
            .borrow::<Proxy>()
            .map(|p| p.kind() == ProxyKind::Scalar)
            .unwrap_or(false),
        _ => false,
    }
}

fn expect_proxy(value: &LuaValue, kind: ProxyKind) -> Result<HostValue> {
    let found = match value {
        LuaValue::UserData(ud) => match ud.borrow::<Proxy>() {
            Ok(proxy) if proxy.kind() == kind => return Ok(proxy.target().clone()),
            Ok(proxy) => proxy.target().ty().to_string(),
            Err(_) => "userdata".to_string(),
        },
        other => other.type_name().to_string(),
    };
    let expected = match kind {
        ProxyKind::Sequence => "slice",
        ProxyKind::Map => "map",
        ProxyKind::Record => "struct",
        ProxyKind::Scalar => "scalar",
    };
    Err(Error::conversion(found, format!("{expected} proxy")))
}

/// Copy a slice or array into a new table (nil elements become the sentinel)
///
/// Nested slices and maps are copied too, so the table never observes later
/// host mutation.
pub fn slice_to_table(lua: &Lua, value: &HostValue) -> Result<Table> {
    copy_table(lua, value, ProxyKind::Sequence, &mut Vec::new())
}

/// Copy a map into a new table (nil values become the sentinel)
pub fn map_to_table(lua: &Lua, value: &HostValue) -> Result<Table> {
    copy_table(lua, value, ProxyKind::Map, &mut Vec::new())
}

/// `path` holds the storage addresses of the containers being copied
fn copy_table(lua: &Lua, value: &HostValue, kind: ProxyKind, path: &mut Vec<usize>) -> Result<Table> {
    let value = value.interface_inner().unwrap_or(value);
    let addr = value.identity();
    if let Some(addr) = addr {
        if path.contains(&addr) {
            return Err(Error::conversion_because(value.ty(), "table", "value contains itself"));
        }
        path.push(addr);
    }

    let table = lua.create_table()?;
    match kind {
        ProxyKind::Sequence => {
            for (index, item) in value.items().iter().enumerate() {
                table.raw_set(index + 1, copy_element(lua, item, path)?)?;
            }
        }
        _ => {
            for (key, item) in value.entries() {
                table.raw_set(push(lua, &key)?, copy_element(lua, &item, path)?)?;
            }
        }
    }

    if addr.is_some() {
        path.pop();
    }
    Ok(table)
}

fn copy_element(lua: &Lua, item: &HostValue, path: &mut Vec<usize>) -> Result<LuaValue> {
    match classify_value(item) {
        Rule::Proxy(kind @ (ProxyKind::Sequence | ProxyKind::Map)) => {
            Ok(LuaValue::Table(copy_table(lua, item, kind, path)?))
        }
        _ => push_with(lua, item, Placement::TRANSIENT),
    }
}
