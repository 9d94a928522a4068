//! Lua -> host conversion
//!
//! Conversion is driven by the target type and is strict: no implicit
//! number/string coercion. Proxy handles convert through `coerce`, so a
//! handle pulled back at its own type yields the same live storage.
//!
//! Nested tables are walked with a `Walk` that tracks the tables on the
//! current path: a table reached again through itself, nesting deeper than
//! `MAX_DEPTH`, or a sequence with more than `MAX_SEQUENCE_GAP` missing slots
//! is a conversion error.

use std::collections::HashMap;

use mlua::{Function, Table, Value as LuaValue};

use super::call;
use super::null::{is_nil_or_null, is_null};
use super::proxy::Proxy;
use crate::error::{Error, Result};
use crate::logging;
use crate::types::{IntWidth, Kind, Signature, Type};
use crate::value::{coerce, shared, HostFn, HostValue, Key, Number, Reflect, Repr};

/// Deepest table nesting a single conversion walks
pub const MAX_DEPTH: usize = 128;

/// Most missing slots tolerated when a table becomes a sequence
pub const MAX_SEQUENCE_GAP: usize = 1 << 16;

/// Tables on the path of the conversion in progress
#[derive(Default)]
struct Walk {
    path: Vec<usize>,
}

impl Walk {
    fn within<T>(
        &mut self,
        table: &Table,
        ty: &Type,
        convert: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let addr = table.to_pointer() as usize;
        if self.path.contains(&addr) {
            return Err(Error::conversion_because("table", ty, "cyclic table"));
        }
        if self.path.len() >= MAX_DEPTH {
            return Err(Error::conversion_because(
                "table",
                ty,
                format!("tables nested deeper than {MAX_DEPTH}"),
            ));
        }
        self.path.push(addr);
        let converted = convert(self);
        self.path.pop();
        converted
    }
}

/// Convert a Lua value to a host value of `ty`
pub fn pull(value: &LuaValue, ty: &Type) -> Result<HostValue> {
    pull_in(value, ty, &mut Walk::default())
}

fn pull_in(value: &LuaValue, ty: &Type, walk: &mut Walk) -> Result<HostValue> {
    logging::log_conversion(value.type_name(), &ty.to_string());
    if let Some(target) = proxy_target(value) {
        return coerce(&target, ty);
    }
    if is_null(value) {
        return Ok(HostValue::zero(ty));
    }
    match ty.kind() {
        Kind::Interface(_) => {
            if value.is_nil() {
                return Ok(HostValue::zero(ty));
            }
            coerce(&infer_in(value, walk)?, ty)
        }
        Kind::Bool => match value {
            LuaValue::Boolean(b) => HostValue::of(ty, *b),
            _ => Err(mismatch(value, ty)),
        },
        Kind::Int(_) | Kind::Uint(_) | Kind::Float(_) => {
            let number = match value {
                // uint64 travels as a two's-complement Lua integer
                LuaValue::Integer(i)
                    if *i < 0 && matches!(ty.kind(), Kind::Uint(IntWidth::W64 | IntWidth::Word)) =>
                {
                    Number::Uint(*i as u64)
                }
                LuaValue::Integer(i) => Number::Int(*i),
                LuaValue::Number(f) => Number::Float(*f),
                _ => return Err(mismatch(value, ty)),
            };
            let repr = number.into_repr(&value.type_name(), ty)?;
            Ok(HostValue::from_parts(ty.clone(), repr))
        }
        Kind::String => match value {
            LuaValue::String(s) => HostValue::of(ty, lua_text(s)),
            _ => Err(mismatch(value, ty)),
        },
        Kind::Slice(elem) => match value {
            LuaValue::Nil => Ok(HostValue::zero(ty)),
            LuaValue::Table(table) => slice_in(table, ty, elem, walk),
            _ => Err(mismatch(value, ty)),
        },
        Kind::Array(elem, len) => match value {
            LuaValue::Table(table) => {
                let items = walk.within(table, ty, |walk| table_items(table, ty, elem, walk))?;
                if items.len() > *len {
                    return Err(Error::conversion_because(
                        "table",
                        ty,
                        format!("{} elements do not fit in {len}", items.len()),
                    ));
                }
                coerce(&HostValue::slice_of(&Type::slice(elem.clone()), items)?, ty)
            }
            _ => Err(mismatch(value, ty)),
        },
        Kind::Map(key_ty, value_ty) => match value {
            LuaValue::Nil => Ok(HostValue::zero(ty)),
            LuaValue::Table(table) => map_in(table, ty, key_ty, value_ty, walk),
            _ => Err(mismatch(value, ty)),
        },
        Kind::Struct(_) => match value {
            LuaValue::Table(table) => struct_in(table, ty, walk),
            _ => Err(mismatch(value, ty)),
        },
        Kind::Pointer(elem) => match value {
            LuaValue::Nil => Ok(HostValue::zero(ty)),
            LuaValue::Table(table) if matches!(elem.kind(), Kind::Struct(_)) => {
                coerce(&HostValue::pointer_to(struct_in(table, elem, walk)?), ty)
            }
            _ => Err(mismatch(value, ty)),
        },
        Kind::Func(sig) => match value {
            LuaValue::Nil => Ok(HostValue::zero(ty)),
            LuaValue::Function(func) => Ok(lua_function(func, ty, Some(sig.results.clone()))),
            _ => Err(mismatch(value, ty)),
        },
        Kind::Native => match value {
            LuaValue::Nil => Ok(HostValue::zero(ty)),
            _ => Err(mismatch(value, ty)),
        },
        Kind::Chan(_) | Kind::UnsafePointer => Err(Error::Unsupported(ty.to_string())),
    }
}

/// Convert a container element: nil and the sentinel become the zero value
pub fn pull_element(value: &LuaValue, ty: &Type) -> Result<HostValue> {
    element_in(value, ty, &mut Walk::default())
}

fn element_in(value: &LuaValue, ty: &Type, walk: &mut Walk) -> Result<HostValue> {
    if is_nil_or_null(value) {
        return Ok(HostValue::zero(ty));
    }
    pull_in(value, ty, walk)
}

/// Convert without a target type
///
/// Integers become `int64`, floats `float64`; tables with only positive
/// integer keys (or none) become `[]interface {}`, tables with only string
/// keys `map[string]interface {}`, anything else `map[interface {}]interface {}`.
pub fn infer(value: &LuaValue) -> Result<HostValue> {
    infer_in(value, &mut Walk::default())
}

fn infer_in(value: &LuaValue, walk: &mut Walk) -> Result<HostValue> {
    if let Some(target) = proxy_target(value) {
        return Ok(target);
    }
    if is_null(value) {
        return Ok(HostValue::nil());
    }
    match value {
        LuaValue::Nil => Ok(HostValue::nil()),
        LuaValue::Boolean(b) => Ok(b.into_host()),
        LuaValue::Integer(i) => Ok(i.into_host()),
        LuaValue::Number(f) => Ok(f.into_host()),
        LuaValue::String(s) => Ok(lua_text(s).into_host()),
        LuaValue::Table(table) => infer_table(table, walk),
        LuaValue::Function(func) => Ok(lua_function(func, &untyped_func(), None)),
        other => Err(Error::conversion(other.type_name(), "host value")),
    }
}

fn infer_table(table: &Table, walk: &mut Walk) -> Result<HostValue> {
    let mut sequence = true;
    let mut strings = true;
    let mut entries = 0;
    let mut largest = 0;
    for pair in table.pairs::<LuaValue, LuaValue>() {
        let (key, _) = pair?;
        entries += 1;
        match &key {
            LuaValue::String(_) => sequence = false,
            other => match positive_index(other) {
                Some(index) => {
                    strings = false;
                    largest = largest.max(index);
                }
                None => {
                    sequence = false;
                    strings = false;
                }
            },
        }
    }
    // very sparse integer keys stay a map
    let sequence = sequence && largest.saturating_sub(entries) <= MAX_SEQUENCE_GAP;
    let any = Type::any();
    if sequence {
        slice_in(table, &Type::slice(any.clone()), &any, walk)
    } else if strings {
        let ty = Type::map(Type::string(), any.clone());
        map_in(table, &ty, &Type::string(), &any, walk)
    } else {
        let ty = Type::map(any.clone(), any.clone());
        map_in(table, &ty, &any, &any, walk)
    }
}

/// Signature given to Lua functions pulled without a target type
pub(crate) fn untyped_func() -> Type {
    Type::func(Signature::new(vec![Type::slice(Type::any())], vec![]).variadic())
}

pub(crate) fn proxy_target(value: &LuaValue) -> Option<HostValue> {
    match value {
        LuaValue::UserData(ud) => ud.borrow::<Proxy>().ok().map(|p| p.target().clone()),
        _ => None,
    }
}

pub(crate) fn lua_text(s: &mlua::String) -> String {
    String::from_utf8_lossy(&s.as_bytes()).into_owned()
}

fn mismatch(value: &LuaValue, ty: &Type) -> Error {
    Error::conversion(value.type_name(), ty)
}

/// Positive integer key of a sequence slot
pub(crate) fn positive_index(key: &LuaValue) -> Option<usize> {
    match key {
        LuaValue::Integer(i) if *i > 0 => usize::try_from(*i).ok(),
        LuaValue::Number(f) if *f >= 1.0 && f.fract() == 0.0 => Some(*f as usize),
        _ => None,
    }
}

/// Elements of a table as a dense sequence sized by its largest index
fn table_items(table: &Table, ty: &Type, elem: &Type, walk: &mut Walk) -> Result<Vec<HostValue>> {
    let mut slots = Vec::new();
    let mut len = 0;
    for pair in table.pairs::<LuaValue, LuaValue>() {
        let (key, value) = pair?;
        if let Some(index) = positive_index(&key) {
            len = len.max(index);
            slots.push((index, value));
        }
    }
    if len.saturating_sub(slots.len()) > MAX_SEQUENCE_GAP {
        return Err(Error::conversion_because(
            "table",
            ty,
            format!("sparse table: index {len} with {} entries", slots.len()),
        ));
    }
    let mut items = Vec::new();
    items
        .try_reserve_exact(len)
        .map_err(|_| Error::conversion_because("table", ty, format!("cannot allocate {len} elements")))?;
    items.resize(len, HostValue::zero(elem));
    for (index, value) in slots {
        items[index - 1] = element_in(&value, elem, walk)?;
    }
    Ok(items)
}

pub(crate) fn table_to_slice(table: &Table, ty: &Type, elem: &Type) -> Result<HostValue> {
    slice_in(table, ty, elem, &mut Walk::default())
}

fn slice_in(table: &Table, ty: &Type, elem: &Type, walk: &mut Walk) -> Result<HostValue> {
    let items = walk.within(table, ty, |walk| table_items(table, ty, elem, walk))?;
    Ok(HostValue::from_parts(ty.clone(), Repr::Slice(Some(shared(items)))))
}

fn map_in(table: &Table, ty: &Type, key_ty: &Type, value_ty: &Type, walk: &mut Walk) -> Result<HostValue> {
    let entries = walk.within(table, ty, |walk| {
        let mut entries = HashMap::new();
        for pair in table.pairs::<LuaValue, LuaValue>() {
            let (key, value) = pair?;
            let host_key = pull_in(&key, key_ty, walk).map_err(|_| Error::KeyType {
                container: ty.to_string(),
                expected: key_ty.to_string(),
                found: key.type_name().to_string(),
            })?;
            entries.insert(Key::from_value(&host_key)?, element_in(&value, value_ty, walk)?);
        }
        Ok(entries)
    })?;
    Ok(HostValue::from_parts(ty.clone(), Repr::Map(Some(shared(entries)))))
}

/// Fill exported fields from string keys; other keys are ignored
fn struct_in(table: &Table, ty: &Type, walk: &mut Walk) -> Result<HostValue> {
    let fields = walk.within(table, ty, |walk| {
        let mut fields = Vec::new();
        for pair in table.pairs::<LuaValue, LuaValue>() {
            let (key, value) = pair?;
            let LuaValue::String(name) = key else {
                continue;
            };
            let name = lua_text(&name);
            if let Some((_, field)) = ty.field(&name) {
                if field.exported {
                    fields.push((name, element_in(&value, &field.ty, walk)?));
                }
            }
        }
        Ok(fields)
    })?;
    HostValue::record(ty, fields)
}

/// Host function calling back into Lua; `results` of `None` infers them
fn lua_function(func: &Function, ty: &Type, results: Option<Vec<Type>>) -> HostValue {
    let origin = func.clone();
    let callee = func.clone();
    let host = HostFn::from_lua(origin, move |args: &[HostValue]| {
        call::call_lua(&callee, "lua function", args, results.as_deref())
    });
    HostValue::from_parts(ty.clone(), Repr::Func(Some(host)))
}
