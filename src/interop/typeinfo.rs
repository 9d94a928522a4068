//! Type handles returned by `luar.type`

use mlua::{Lua, MetaMethod, UserData, UserDataMethods, Value as LuaValue};

use crate::types::Type;

/// Reflective handle on a host type
#[derive(Debug, Clone)]
pub struct TypeHandle(pub Type);

impl TypeHandle {
    fn member(&self, lua: &Lua, name: &str) -> mlua::Result<LuaValue> {
        let ty = self.0.clone();
        let func = match name {
            "String" => lua.create_function(move |_, ()| Ok(ty.to_string()))?,
            "Name" => lua.create_function(move |_, ()| Ok(ty.name().unwrap_or_default().to_string()))?,
            "Kind" => lua.create_function(move |_, ()| Ok(ty.kind_name()))?,
            "Elem" => lua.create_function(move |_, ()| Ok(ty.elem().cloned().map(TypeHandle)))?,
            _ => return Ok(LuaValue::Nil),
        };
        Ok(LuaValue::Function(func))
    }
}

impl UserData for TypeHandle {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::Index, |lua, this, key: LuaValue| match key {
            LuaValue::String(name) => this.member(lua, &super::pull::lua_text(&name)),
            _ => Ok(LuaValue::Nil),
        });

        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| Ok(this.0.to_string()));

        methods.add_meta_method(MetaMethod::Eq, |_, this, other: LuaValue| {
            Ok(match other {
                LuaValue::UserData(ud) => ud
                    .borrow::<TypeHandle>()
                    .map(|other| other.0 == this.0)
                    .unwrap_or(false),
                _ => false,
            })
        });
    }
}
