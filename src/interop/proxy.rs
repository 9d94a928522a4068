//! Proxy handles - Lua userdata views over live host values
//!
//! Sequence:  `p[i]` (1-based), `p[#p+1] = v` appends to slices, `#p`, pairs
//! Map:       `p[k]`, `p[k] = v`, `p[k] = nil` deletes, `#p`, pairs; a key of
//!            the wrong type is an error unless it names a method
//! Record:    exported fields first, then methods bound to the receiver
//! Scalar:    methods only
//!
//! A proxy over a by-value struct, array or scalar is read-only; writes are
//! access errors. Proxies pushed for an interface value keep their fields but
//! only expose the interface's methods.

use std::sync::atomic::{AtomicUsize, Ordering};

use mlua::{Function, Lua, MetaMethod, MultiValue, UserData, UserDataMethods, Value as LuaValue};

use super::call;
use super::classify::ProxyKind;
use super::pull::{lua_text, positive_index, pull, pull_element};
use super::push::{push, push_with, Placement};
use crate::anchor::Identity;
use crate::error::{Error, Result};
use crate::types::{is_exported, Type};
use crate::value::{HostValue, Repr};

#[derive(Clone)]
pub struct Proxy {
    target: HostValue,
    kind: ProxyKind,
    caps: Option<Type>,
    mutable: bool,
}

impl Proxy {
    pub(crate) fn new(target: HostValue, kind: ProxyKind, caps: Option<Type>) -> Self {
        let mutable = matches!(
            target.repr(),
            Repr::Slice(_) | Repr::Map(_) | Repr::Pointer(_)
        );
        Self {
            target,
            kind,
            caps,
            mutable,
        }
    }

    #[inline]
    pub fn target(&self) -> &HostValue {
        &self.target
    }

    #[inline]
    pub fn kind(&self) -> ProxyKind {
        self.kind
    }

    /// Interface whose method set this handle is restricted to
    #[inline]
    pub fn caps(&self) -> Option<&Type> {
        self.caps.as_ref()
    }

    #[inline]
    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    pub(crate) fn identity(&self) -> Option<Identity> {
        self.target
            .identity()
            .map(|addr| Identity::new(addr, self.target.ty(), self.caps.as_ref()))
    }

    fn ty(&self) -> &Type {
        self.target.ty()
    }

    fn key_error(&self, expected: impl ToString, key: &LuaValue) -> Error {
        Error::KeyType {
            container: self.ty().to_string(),
            expected: expected.to_string(),
            found: key.type_name().to_string(),
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    fn index(&self, lua: &Lua, key: &LuaValue) -> Result<LuaValue> {
        match self.kind {
            ProxyKind::Sequence => {
                if let LuaValue::String(name) = key {
                    return self.method_value(lua, &lua_text(name));
                }
                if !matches!(key, LuaValue::Integer(_) | LuaValue::Number(_)) {
                    return Err(self.key_error("int", key));
                }
                let element = positive_index(key).and_then(|i| self.target.index(i - 1));
                match element {
                    Some(element) => push_with(lua, &element, Placement::ELEMENT),
                    None => Ok(LuaValue::Nil),
                }
            }
            ProxyKind::Map => {
                let key_ty = self.ty().key().cloned().unwrap_or_else(Type::any);
                match pull(key, &key_ty) {
                    Ok(host_key) => match self.target.get(&host_key)? {
                        Some(value) => push_with(lua, &value, Placement::ELEMENT),
                        None => Ok(LuaValue::Nil),
                    },
                    Err(_) => {
                        if let LuaValue::String(name) = key {
                            if let Some(method) = self.bound_method(lua, &lua_text(name))? {
                                return Ok(LuaValue::Function(method));
                            }
                        }
                        Err(self.key_error(&key_ty, key))
                    }
                }
            }
            ProxyKind::Record => {
                let LuaValue::String(name) = key else {
                    return Err(self.key_error("string", key));
                };
                let name = lua_text(name);
                let exported_field = self
                    .target
                    .record_type()
                    .and_then(|ty| ty.field(&name))
                    .is_some_and(|(_, field)| field.exported);
                if exported_field {
                    if let Some(value) = self.target.field(&name) {
                        return push(lua, &value);
                    }
                }
                self.method_value(lua, &name)
            }
            ProxyKind::Scalar => match key {
                LuaValue::String(name) => self.method_value(lua, &lua_text(name)),
                _ => Ok(LuaValue::Nil),
            },
        }
    }

    fn method_value(&self, lua: &Lua, name: &str) -> Result<LuaValue> {
        Ok(self
            .bound_method(lua, name)?
            .map(LuaValue::Function)
            .unwrap_or(LuaValue::Nil))
    }

    /// Method `name` bound to this handle's target, if visible
    fn bound_method(&self, lua: &Lua, name: &str) -> Result<Option<Function>> {
        if !is_exported(name) {
            return Ok(None);
        }
        if let Some(caps) = &self.caps {
            if !caps.interface_methods().iter().any(|m| m.name == name) {
                return Ok(None);
            }
        }
        let Some(method) = self.ty().find_method(name) else {
            return Ok(None);
        };
        let target = self.target.clone();
        let func = lua.create_function(move |lua, args: MultiValue| {
            let receiver = target.receiver_for(&method);
            call::invoke(lua, &method.sig, &method.func, Some(&receiver), args)
                .map_err(mlua::Error::external)
        })?;
        Ok(Some(func))
    }

    fn len(&self) -> Result<usize> {
        match self.kind {
            ProxyKind::Sequence | ProxyKind::Map => Ok(self.target.len()),
            _ => Err(Error::access(self.ty(), "value has no length")),
        }
    }

    // ========================================================================
    // Writes
    // ========================================================================

    fn new_index(&self, key: &LuaValue, value: &LuaValue) -> Result<()> {
        if !self.mutable {
            return Err(Error::access(self.ty(), "read-only value cannot be assigned"));
        }
        match self.kind {
            ProxyKind::Sequence => {
                let Some(index) = positive_index(key) else {
                    return Err(self.key_error("int", key));
                };
                let elem = self.ty().elem().cloned().unwrap_or_else(Type::any);
                let value = pull_element(value, &elem)?;
                let len = self.target.len();
                if index <= len {
                    self.target.set_index(index - 1, value)
                } else if index == len + 1 {
                    self.target.append(value)
                } else {
                    Err(Error::access(
                        self.ty(),
                        format!("index {index} out of range [1, {}]", len + 1),
                    ))
                }
            }
            ProxyKind::Map => {
                let key_ty = self.ty().key().cloned().unwrap_or_else(Type::any);
                let host_key = pull(key, &key_ty).map_err(|_| self.key_error(&key_ty, key))?;
                if value.is_nil() {
                    self.target.remove(&host_key)?;
                    return Ok(());
                }
                let value_ty = self.ty().elem().cloned().unwrap_or_else(Type::any);
                self.target.insert(host_key, pull_element(value, &value_ty)?)
            }
            ProxyKind::Record => {
                let LuaValue::String(name) = key else {
                    return Err(self.key_error("string", key));
                };
                let name = lua_text(name);
                let Some(record_ty) = self.target.record_type() else {
                    return Err(Error::access(self.ty(), "not a struct"));
                };
                match record_ty.field(&name) {
                    Some((_, field)) if field.exported => {
                        let value = pull_element(value, &field.ty)?;
                        self.target.set_field(&name, value)
                    }
                    Some(_) => Err(Error::access(self.ty(), format!("field {name} is unexported"))),
                    None if self.ty().find_method(&name).is_some() => {
                        Err(Error::access(self.ty(), format!("cannot assign to method {name}")))
                    }
                    None => Err(Error::access(self.ty(), format!("no field {name}"))),
                }
            }
            ProxyKind::Scalar => Err(Error::access(self.ty(), "cannot assign to a scalar value")),
        }
    }

    // ========================================================================
    // Iteration, equality, display
    // ========================================================================

    /// Stateful iterator over a snapshot of keys; values are read live
    fn pairs(&self, lua: &Lua) -> Result<Function> {
        let cursor = AtomicUsize::new(0);
        let target = self.target.clone();
        let iter = match self.kind {
            ProxyKind::Sequence => lua.create_function(move |lua, _: MultiValue| {
                let index = cursor.fetch_add(1, Ordering::Relaxed);
                match target.index(index) {
                    Some(element) => Ok((
                        LuaValue::Integer(index as i64 + 1),
                        push_with(lua, &element, Placement::TRANSIENT)?,
                    )),
                    None => Ok((LuaValue::Nil, LuaValue::Nil)),
                }
            })?,
            ProxyKind::Map => {
                let keys = target.keys();
                lua.create_function(move |lua, _: MultiValue| loop {
                    let index = cursor.fetch_add(1, Ordering::Relaxed);
                    let Some(key) = keys.get(index) else {
                        return Ok((LuaValue::Nil, LuaValue::Nil));
                    };
                    if let Some(value) = target.get(key)? {
                        return Ok((push(lua, key)?, push_with(lua, &value, Placement::TRANSIENT)?));
                    }
                })?
            }
            ProxyKind::Record => {
                let names: Vec<String> = target
                    .record_type()
                    .map(|ty| {
                        ty.fields()
                            .iter()
                            .filter(|f| f.exported)
                            .map(|f| f.name.clone())
                            .collect()
                    })
                    .unwrap_or_default();
                lua.create_function(move |lua, _: MultiValue| {
                    let index = cursor.fetch_add(1, Ordering::Relaxed);
                    let Some(name) = names.get(index) else {
                        return Ok((LuaValue::Nil, LuaValue::Nil));
                    };
                    let value = target.field(name).unwrap_or_else(HostValue::nil);
                    Ok((
                        LuaValue::String(lua.create_string(name)?),
                        push_with(lua, &value, Placement::TRANSIENT)?,
                    ))
                })?
            }
            ProxyKind::Scalar => return Err(Error::access(self.ty(), "value is not iterable")),
        };
        Ok(iter)
    }

    fn equals(&self, other: &LuaValue) -> bool {
        match other {
            LuaValue::UserData(ud) => ud
                .borrow::<Proxy>()
                .map(|other| self.target.same(&other.target))
                .unwrap_or(false),
            _ => false,
        }
    }

    /// `String()` method output when the type has one
    fn display(&self) -> Result<String> {
        if let Some(method) = self.ty().find_method("String") {
            if method.sig.params.is_empty() {
                let receiver = self.target.receiver_for(&method);
                let results = method.call(&receiver, &[])?;
                if let Some(text) = results.first().and_then(HostValue::as_str) {
                    return Ok(text.to_string());
                }
            }
        }
        let scalar = match self.target.repr() {
            Repr::Bool(b) => Some(b.to_string()),
            Repr::Int(i) => Some(i.to_string()),
            Repr::Uint(u) => Some(u.to_string()),
            Repr::Float(f) => Some(f.to_string()),
            Repr::Str(s) => Some(s.clone()),
            _ => None,
        };
        Ok(match (scalar, self.target.identity()) {
            (Some(scalar), _) => scalar,
            (None, Some(addr)) => format!("{}: {addr:#x}", self.ty()),
            (None, None) => self.ty().to_string(),
        })
    }
}

impl UserData for Proxy {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::Index, |lua, this, key: LuaValue| {
            this.index(lua, &key).map_err(mlua::Error::external)
        });

        methods.add_meta_method(
            MetaMethod::NewIndex,
            |_, this, (key, value): (LuaValue, LuaValue)| {
                this.new_index(&key, &value).map_err(mlua::Error::external)
            },
        );

        methods.add_meta_method(MetaMethod::Len, |_, this, ()| {
            this.len().map_err(mlua::Error::external)
        });

        methods.add_meta_method(MetaMethod::Pairs, |lua, this, ()| {
            let iter = this.pairs(lua).map_err(mlua::Error::external)?;
            Ok((iter, LuaValue::Nil, LuaValue::Nil))
        });

        methods.add_meta_method(MetaMethod::Eq, |_, this, other: LuaValue| Ok(this.equals(&other)));

        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            this.display().map_err(mlua::Error::external)
        });
    }
}
