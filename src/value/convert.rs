//! Host-side conversion between types (`coerce`)
//!
//! Rules:
//! - Identical types share storage (no copy)
//! - Numerics convert across kinds, rejecting out-of-range integers and
//!   non-integral floats for integer targets
//! - Interfaces box and unbox, checking method sets
//! - Slices, arrays and maps copy-convert element by element
//! - Pointer-to-struct and struct convert by copying the pointee

use std::collections::HashMap;

use num_traits::ToPrimitive;

use super::{shared, HostValue, Key, Repr};
use crate::error::{Error, Result};
use crate::types::{FloatWidth, IntWidth, Kind, Type};

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Number {
    Int(i64),
    Uint(u64),
    Float(f64),
}

impl Number {
    pub(crate) fn of(repr: &Repr) -> Option<Self> {
        match repr {
            Repr::Int(i) => Some(Self::Int(*i)),
            Repr::Uint(u) => Some(Self::Uint(*u)),
            Repr::Float(f) => Some(Self::Float(*f)),
            _ => None,
        }
    }

    /// Representation of this number as a value of numeric type `ty`
    pub(crate) fn into_repr(self, from: &dyn std::fmt::Display, ty: &Type) -> Result<Repr> {
        match ty.kind() {
            Kind::Int(width) => narrow_int(self, *width, from, ty).map(Repr::Int),
            Kind::Uint(width) => narrow_uint(self, *width, from, ty).map(Repr::Uint),
            Kind::Float(width) => Ok(Repr::Float(widen_float(self, *width))),
            _ => Err(Error::conversion(from, ty)),
        }
    }
}

fn integral(f: f64, from: &dyn std::fmt::Display, ty: &Type) -> Result<()> {
    if !f.is_finite() || f.fract() != 0.0 {
        return Err(Error::conversion_because(from, ty, format!("{f} is not integral")));
    }
    Ok(())
}

fn narrow_int(n: Number, width: IntWidth, from: &dyn std::fmt::Display, ty: &Type) -> Result<i64> {
    let wide = match n {
        Number::Int(i) => Some(i),
        Number::Uint(u) => u.to_i64(),
        Number::Float(f) => {
            integral(f, from, ty)?;
            f.to_i64()
        }
    };
    let fits = wide.filter(|v| match width {
        IntWidth::W8 => v.to_i8().is_some(),
        IntWidth::W16 => v.to_i16().is_some(),
        IntWidth::W32 => v.to_i32().is_some(),
        IntWidth::W64 | IntWidth::Word => true,
    });
    fits.ok_or_else(|| Error::conversion_because(from, ty, "value out of range"))
}

fn narrow_uint(n: Number, width: IntWidth, from: &dyn std::fmt::Display, ty: &Type) -> Result<u64> {
    let wide = match n {
        Number::Int(i) => i.to_u64(),
        Number::Uint(u) => Some(u),
        Number::Float(f) => {
            integral(f, from, ty)?;
            f.to_u64()
        }
    };
    let fits = wide.filter(|v| match width {
        IntWidth::W8 => v.to_u8().is_some(),
        IntWidth::W16 => v.to_u16().is_some(),
        IntWidth::W32 => v.to_u32().is_some(),
        IntWidth::W64 | IntWidth::Word => true,
    });
    fits.ok_or_else(|| Error::conversion_because(from, ty, "value out of range"))
}

fn widen_float(n: Number, width: FloatWidth) -> f64 {
    let wide = match n {
        Number::Int(i) => i as f64,
        Number::Uint(u) => u as f64,
        Number::Float(f) => f,
    };
    match width {
        FloatWidth::F32 => f64::from(wide as f32),
        FloatWidth::F64 => wide,
    }
}

/// Convert `value` to a value of `ty`
pub fn coerce(value: &HostValue, ty: &Type) -> Result<HostValue> {
    if value.ty == *ty {
        return Ok(value.clone());
    }
    if ty.is_interface() {
        return box_interface(value, ty);
    }
    if let Repr::Interface(inner) = &value.repr {
        return match inner {
            Some(inner) => coerce(inner, ty),
            None if ty.is_nillable() => Ok(HostValue::zero(ty)),
            None => Err(Error::conversion("nil", ty)),
        };
    }

    let mismatch = || Error::conversion(&value.ty, ty);
    let repr = match (ty.kind(), &value.repr) {
        (Kind::Bool, Repr::Bool(b)) => Repr::Bool(*b),
        (Kind::Int(_) | Kind::Uint(_) | Kind::Float(_), repr) => {
            let number = Number::of(repr).ok_or_else(mismatch)?;
            number.into_repr(&value.ty, ty)?
        }
        (Kind::String, Repr::Str(s)) => Repr::Str(s.clone()),
        (Kind::Slice(_), Repr::Slice(None)) => Repr::Slice(None),
        (Kind::Slice(elem), Repr::Slice(Some(_)) | Repr::Array(_)) => {
            Repr::Slice(Some(shared(convert_items(&value.items(), elem)?)))
        }
        (Kind::Array(elem, len), Repr::Slice(_) | Repr::Array(_)) => {
            let mut items = convert_items(&value.items(), elem)?;
            if items.len() > *len {
                return Err(Error::conversion_because(
                    &value.ty,
                    ty,
                    format!("{} elements do not fit in {len}", items.len()),
                ));
            }
            items.resize(*len, HostValue::zero(elem));
            Repr::Array(items)
        }
        (Kind::Map(..), Repr::Map(None)) => Repr::Map(None),
        (Kind::Map(key_ty, value_ty), Repr::Map(Some(_))) => {
            let mut entries = HashMap::with_capacity(value.len());
            for (k, v) in value.entries() {
                let k = coerce(&k, key_ty)?;
                entries.insert(Key::from_value(&k)?, coerce(&v, value_ty)?);
            }
            Repr::Map(Some(shared(entries)))
        }
        (Kind::Struct(fields), Repr::Struct(values)) => {
            let source = value.ty.fields();
            let compatible = source.len() == fields.len()
                && source.iter().zip(fields).all(|(a, b)| a.name == b.name);
            if !compatible {
                return Err(mismatch());
            }
            let converted = values
                .iter()
                .zip(fields)
                .map(|(v, f)| coerce(v, &f.ty))
                .collect::<Result<Vec<_>>>()?;
            Repr::Struct(converted)
        }
        (Kind::Struct(_), Repr::Pointer(Some(cell))) => {
            let pointee = cell.read().clone();
            if pointee.ty != *ty {
                return Err(mismatch());
            }
            pointee.repr
        }
        (Kind::Pointer(elem), Repr::Struct(_)) if value.ty == *elem => {
            Repr::Pointer(Some(shared(value.clone())))
        }
        (Kind::Pointer(_), Repr::Pointer(None)) => Repr::Pointer(None),
        (Kind::Pointer(elem), Repr::Pointer(Some(cell))) if value.ty.elem() == Some(elem) => {
            Repr::Pointer(Some(cell.clone()))
        }
        (Kind::Func(sig), Repr::Func(func)) => match value.ty.kind() {
            Kind::Func(own) if own == sig => Repr::Func(func.clone()),
            _ => return Err(mismatch()),
        },
        (Kind::Native | Kind::Chan(_) | Kind::UnsafePointer, Repr::Native(obj))
            if value.ty.kind() == ty.kind() =>
        {
            Repr::Native(obj.clone())
        }
        _ => return Err(mismatch()),
    };
    Ok(HostValue::from_parts(ty.clone(), repr))
}

fn convert_items(items: &[HostValue], elem: &Type) -> Result<Vec<HostValue>> {
    items.iter().map(|item| coerce(item, elem)).collect()
}

fn box_interface(value: &HostValue, iface: &Type) -> Result<HostValue> {
    let concrete = match &value.repr {
        Repr::Interface(None) => return Ok(HostValue::zero(iface)),
        Repr::Interface(Some(inner)) => (**inner).clone(),
        _ => value.clone(),
    };
    if !concrete.ty.implements(iface) {
        let missing = iface
            .interface_methods()
            .iter()
            .find(|m| concrete.ty.find_method(&m.name).is_none())
            .map(|m| format!("missing method {}", m.name))
            .unwrap_or_else(|| "method signatures differ".into());
        return Err(Error::conversion_because(&concrete.ty, iface, missing));
    }
    Ok(HostValue::from_parts(
        iface.clone(),
        Repr::Interface(Some(Box::new(concrete))),
    ))
}
