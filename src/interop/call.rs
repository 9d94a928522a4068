//! Function adapters in both directions
//!
//! - `invoke`: a host function called from Lua. Arguments are pulled at the
//!   declared parameter types, results pushed back (declared interface
//!   results keep their capability set).
//! - `call_lua`: a Lua function called from the host. Arguments are pushed,
//!   results inferred or pulled at requested types.

use mlua::{Function, IntoLuaMulti, Lua, MultiValue, Value as LuaValue};

use super::pull::{infer, pull, pull_element, table_to_slice};
use super::push::push;
use crate::error::{Error, Result};
use crate::logging;
use crate::state::Bridge;
use crate::types::{Kind, Signature, Type};
use crate::value::{coerce, HostFn, HostValue};

fn strict_arity(lua: &Lua) -> bool {
    lua.app_data_ref::<Bridge>()
        .map(|bridge| bridge.config.strict_arity)
        .unwrap_or(true)
}

/// Call a host function with Lua arguments
pub(crate) fn invoke(
    lua: &Lua,
    sig: &Signature,
    func: &HostFn,
    receiver: Option<&HostValue>,
    args: MultiValue,
) -> Result<MultiValue> {
    let callee = format!("func{sig}");
    let strict = strict_arity(lua);

    let mut host_args = Vec::with_capacity(sig.params.len() + 1);
    if let Some(receiver) = receiver {
        host_args.push(receiver.clone());
    }
    host_args.extend(bind_args(&callee, sig, args.into_vec(), strict)?);
    logging::log_host_call(&callee, host_args.len());

    let results = func
        .call(&host_args)
        .inspect_err(|err| logging::log_host_error(&callee, &err.to_string()))?;

    let mut pushed = Vec::with_capacity(results.len());
    for (index, value) in results.iter().enumerate() {
        let value = match sig.results.get(index) {
            Some(declared) if declared.is_interface() && !value.ty().is_interface() => {
                coerce(value, declared)?
            }
            _ => value.clone(),
        };
        pushed.push(push(lua, &value)?);
    }
    Ok(MultiValue::from_vec(pushed))
}

/// Element types that a single table argument converts to as a whole
fn accepts_table(elem: &Type) -> bool {
    match elem.kind() {
        Kind::Slice(_) | Kind::Array(..) | Kind::Map(..) | Kind::Struct(_) | Kind::Interface(_) => {
            true
        }
        Kind::Pointer(inner) => matches!(inner.kind(), Kind::Struct(_)),
        _ => false,
    }
}

fn bind_args(
    callee: &str,
    sig: &Signature,
    mut args: Vec<LuaValue>,
    strict: bool,
) -> Result<Vec<HostValue>> {
    let fixed = if sig.variadic {
        sig.params.len().saturating_sub(1)
    } else {
        sig.params.len()
    };
    let arity_ok = if sig.variadic {
        args.len() >= fixed
    } else {
        args.len() == fixed
    };
    if !arity_ok {
        if strict {
            return Err(Error::Arity {
                callee: callee.to_string(),
                expected: fixed,
                got: args.len(),
                variadic: sig.variadic,
            });
        }
        let len = if sig.variadic { args.len().max(fixed) } else { fixed };
        args.resize(len, LuaValue::Nil);
    }

    let convert = |value: &LuaValue, ty: &Type| {
        if strict {
            pull(value, ty)
        } else {
            pull_element(value, ty)
        }
    };

    let mut bound = Vec::with_capacity(sig.params.len());
    for (value, ty) in args.iter().zip(&sig.params[..fixed]) {
        bound.push(convert(value, ty)?);
    }

    if sig.variadic {
        let Some(slice_ty) = sig.params.last() else {
            return Ok(bound);
        };
        let elem = slice_ty.elem().cloned().unwrap_or_else(Type::any);
        let rest = &args[fixed..];
        let packed = match rest {
            [LuaValue::Table(table)] if !accepts_table(&elem) => {
                table_to_slice(table, slice_ty, &elem)?
            }
            _ => {
                let items = rest
                    .iter()
                    .map(|value| convert(value, &elem))
                    .collect::<Result<Vec<_>>>()?;
                HostValue::slice_of(slice_ty, items)?
            }
        };
        bound.push(packed);
    }
    Ok(bound)
}

/// Host arguments pushed lazily once the callee's `Lua` is at hand
struct PushArgs<'a>(&'a [HostValue]);

impl IntoLuaMulti for PushArgs<'_> {
    fn into_lua_multi(self, lua: &Lua) -> mlua::Result<MultiValue> {
        let values = self
            .0
            .iter()
            .map(|arg| push(lua, arg).map_err(mlua::Error::external))
            .collect::<mlua::Result<Vec<_>>>()?;
        Ok(MultiValue::from_vec(values))
    }
}

/// Call a Lua function; `results` of `None` infers every returned value
pub(crate) fn call_lua(
    func: &Function,
    name: &str,
    args: &[HostValue],
    results: Option<&[Type]>,
) -> Result<Vec<HostValue>> {
    logging::log_lua_call(name, args.len());
    let returned: MultiValue = func.call(PushArgs(args))?;
    let returned = returned.into_vec();
    match results {
        None => returned.iter().map(infer).collect(),
        Some(types) => types
            .iter()
            .enumerate()
            .map(|(index, ty)| pull_element(returned.get(index).unwrap_or(&LuaValue::Nil), ty))
            .collect(),
    }
}

/// Host handle on a Lua function
#[derive(Clone, Debug)]
pub struct LuaObject {
    func: Function,
    name: String,
}

impl LuaObject {
    pub(crate) fn new(func: Function, name: impl Into<String>) -> Self {
        Self {
            func,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Call with inferred results
    pub fn call(&self, args: &[HostValue]) -> Result<Vec<HostValue>> {
        call_lua(&self.func, &self.name, args, None)
    }

    /// Call and convert results to `results`; missing results are zero values
    pub fn call_typed(&self, results: &[Type], args: &[HostValue]) -> Result<Vec<HostValue>> {
        call_lua(&self.func, &self.name, args, Some(results))
    }

    /// The function as a host value of the untyped function type
    pub fn to_host(&self) -> Result<HostValue> {
        pull(&LuaValue::Function(self.func.clone()), &super::pull::untyped_func())
    }
}
