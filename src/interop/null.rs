//! Null sentinel - stands for a nil host reference inside Lua containers
//!
//! Lua tables cannot hold nil, so nil elements travel as a NULL light
//! userdata. Every instance shares the same sentinel value.

use mlua::{LightUserData, Value as LuaValue};

/// The sentinel value
#[inline]
pub fn null() -> LuaValue {
    LuaValue::LightUserData(LightUserData(std::ptr::null_mut()))
}

#[inline]
pub fn is_null(value: &LuaValue) -> bool {
    matches!(value, LuaValue::LightUserData(ud) if ud.0.is_null())
}

/// Lua nil or the sentinel
#[inline]
pub fn is_nil_or_null(value: &LuaValue) -> bool {
    value.is_nil() || is_null(value)
}
