//! Host values - the reflective value model the bridge converts from and to
//!
//! Design: a `HostValue` pairs a `Type` with its representation:
//! - Slices, maps and pointers own shared storage (`Arc<RwLock<_>>`), so
//!   every proxy over them observes and performs live mutation
//! - Arrays and structs are held by value and copy on conversion
//! - A nil reference is the `None` variant of its storage

mod convert;
mod reflect;


use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::types::{Kind, Method, Signature, Type};

pub use convert::coerce;
pub(crate) use convert::Number;
pub use reflect::{IntoHostFn, IntoResults, Reflect, Variadic};

/// Shared, lock-protected storage behind reference-like values
pub type Shared<T> = Arc<RwLock<T>>;

#[inline]
pub(crate) fn shared<T>(value: T) -> Shared<T> {
    Arc::new(RwLock::new(value))
}

type RawFn = dyn Fn(&[HostValue]) -> Result<Vec<HostValue>> + Send + Sync;

/// Callable host function
#[derive(Clone)]
pub struct HostFn {
    raw: Arc<RawFn>,
    origin: Option<mlua::Function>,
}

impl HostFn {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&[HostValue]) -> Result<Vec<HostValue>> + Send + Sync + 'static,
    {
        Self {
            raw: Arc::new(func),
            origin: None,
        }
    }

    /// Host function backed by a Lua function; pushing it back yields `origin`
    pub(crate) fn from_lua<F>(origin: mlua::Function, func: F) -> Self
    where
        F: Fn(&[HostValue]) -> Result<Vec<HostValue>> + Send + Sync + 'static,
    {
        Self {
            raw: Arc::new(func),
            origin: Some(origin),
        }
    }

    #[inline]
    pub fn call(&self, args: &[HostValue]) -> Result<Vec<HostValue>> {
        (self.raw)(args)
    }

    pub(crate) fn origin(&self) -> Option<&mlua::Function> {
        self.origin.as_ref()
    }

    #[inline]
    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.raw) as *const () as usize
    }
}

impl fmt::Debug for HostFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostFn({:#x})", self.addr())
    }
}

/// Hashable map key; keys of interface type are stored unwrapped
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(u64),
    Str(String),
}

impl Key {
    pub fn from_value(value: &HostValue) -> Result<Self> {
        match &value.repr {
            Repr::Bool(b) => Ok(Self::Bool(*b)),
            Repr::Int(i) => Ok(Self::Int(*i)),
            Repr::Uint(u) => Ok(Self::Uint(*u)),
            Repr::Float(f) => Ok(Self::Float(f.to_bits())),
            Repr::Str(s) => Ok(Self::Str(s.clone())),
            Repr::Interface(Some(inner)) => Self::from_value(inner),
            _ => Err(Error::Unsupported(format!("{} as map key", value.ty))),
        }
    }

    /// Rebuild the key as a value of `ty`
    pub fn to_value(&self, ty: &Type) -> HostValue {
        if ty.is_interface() {
            let inner = match self {
                Self::Bool(b) => b.into_host(),
                Self::Int(i) => i.into_host(),
                Self::Uint(u) => u.into_host(),
                Self::Float(bits) => f64::from_bits(*bits).into_host(),
                Self::Str(s) => s.clone().into_host(),
            };
            return HostValue::from_parts(ty.clone(), Repr::Interface(Some(Box::new(inner))));
        }
        let repr = match self {
            Self::Bool(b) => Repr::Bool(*b),
            Self::Int(i) => Repr::Int(*i),
            Self::Uint(u) => Repr::Uint(*u),
            Self::Float(bits) => Repr::Float(f64::from_bits(*bits)),
            Self::Str(s) => Repr::Str(s.clone()),
        };
        HostValue::from_parts(ty.clone(), repr)
    }
}

#[derive(Clone)]
pub(crate) enum Repr {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Str(String),
    Slice(Option<Shared<Vec<HostValue>>>),
    Array(Vec<HostValue>),
    Map(Option<Shared<HashMap<Key, HostValue>>>),
    Struct(Vec<HostValue>),
    Pointer(Option<Shared<HostValue>>),
    Interface(Option<Box<HostValue>>),
    Func(Option<HostFn>),
    Native(Option<Arc<dyn Any + Send + Sync>>),
}

/// Typed host value
#[derive(Clone)]
pub struct HostValue {
    ty: Type,
    repr: Repr,
}

impl HostValue {
    #[inline]
    pub(crate) fn from_parts(ty: Type, repr: Repr) -> Self {
        Self { ty, repr }
    }

    #[inline]
    pub(crate) fn repr(&self) -> &Repr {
        &self.repr
    }

    #[inline]
    pub fn ty(&self) -> &Type {
        &self.ty
    }

    // ========================================================================
    // Construction
    // ========================================================================

    /// Nil of the empty interface
    pub fn nil() -> Self {
        Self::zero(&Type::any())
    }

    /// Zero value of `ty`
    pub fn zero(ty: &Type) -> Self {
        let repr = match ty.kind() {
            Kind::Bool => Repr::Bool(false),
            Kind::Int(_) => Repr::Int(0),
            Kind::Uint(_) => Repr::Uint(0),
            Kind::Float(_) => Repr::Float(0.0),
            Kind::String => Repr::Str(String::new()),
            Kind::Slice(_) => Repr::Slice(None),
            Kind::Array(elem, len) => Repr::Array(vec![Self::zero(elem); *len]),
            Kind::Map(..) => Repr::Map(None),
            Kind::Struct(fields) => {
                Repr::Struct(fields.iter().map(|f| Self::zero(&f.ty)).collect())
            }
            Kind::Pointer(_) => Repr::Pointer(None),
            Kind::Interface(_) => Repr::Interface(None),
            Kind::Func(_) => Repr::Func(None),
            Kind::Native | Kind::Chan(_) | Kind::UnsafePointer => Repr::Native(None),
        };
        Self::from_parts(ty.clone(), repr)
    }

    /// Convert a Rust value into a value of `ty`
    pub fn of<T: Reflect>(ty: &Type, value: T) -> Result<Self> {
        coerce(&value.into_host(), ty)
    }

    /// Slice of `slice_ty` holding `items` converted to its element type
    pub fn slice_of(slice_ty: &Type, items: Vec<HostValue>) -> Result<Self> {
        let Kind::Slice(elem) = slice_ty.kind() else {
            return Err(Error::conversion("slice", slice_ty));
        };
        let items = items
            .iter()
            .map(|item| coerce(item, elem))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_parts(slice_ty.clone(), Repr::Slice(Some(shared(items)))))
    }

    /// Non-nil slice of `len` zero elements
    pub fn new_slice(elem: &Type, len: usize) -> Self {
        let items = vec![Self::zero(elem); len];
        Self::from_parts(Type::slice(elem.clone()), Repr::Slice(Some(shared(items))))
    }

    /// Non-nil empty map
    pub fn new_map(key: &Type, value: &Type) -> Self {
        Self::from_parts(
            Type::map(key.clone(), value.clone()),
            Repr::Map(Some(shared(HashMap::new()))),
        )
    }

    /// Struct value with the named fields set, the rest zeroed
    pub fn record<I, K>(ty: &Type, fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, HostValue)>,
        K: AsRef<str>,
    {
        let mut value = Self::zero(ty);
        for (name, field_value) in fields {
            let name = name.as_ref();
            let (index, field) = ty
                .field(name)
                .ok_or_else(|| Error::access(ty, format!("no field {name}")))?;
            let converted = coerce(&field_value, &field.ty)?;
            if let Repr::Struct(slots) = &mut value.repr {
                slots[index] = converted;
            }
        }
        Ok(value)
    }

    /// Pointer to a fresh heap copy of `value`
    pub fn pointer_to(value: HostValue) -> Self {
        let ty = Type::pointer(value.ty.clone());
        Self::from_parts(ty, Repr::Pointer(Some(shared(value))))
    }

    /// Host-native handle of type `ty` (kind `Native`)
    pub fn native<T: Any + Send + Sync>(ty: &Type, object: T) -> Self {
        Self::from_parts(ty.clone(), Repr::Native(Some(Arc::new(object))))
    }

    /// Host function from a typed closure
    pub fn func<Args, Ret, F>(func: F) -> Self
    where
        F: IntoHostFn<Args, Ret>,
    {
        Self::from_parts(Type::func(F::signature()), Repr::Func(Some(func.into_host_fn())))
    }

    /// Host function with an explicit signature
    pub fn raw_func<F>(sig: Signature, func: F) -> Self
    where
        F: Fn(&[HostValue]) -> Result<Vec<HostValue>> + Send + Sync + 'static,
    {
        Self::from_parts(Type::func(sig), Repr::Func(Some(HostFn::new(func))))
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Nil reference, nil interface, or nil function
    pub fn is_nil(&self) -> bool {
        match &self.repr {
            Repr::Slice(s) => s.is_none(),
            Repr::Map(m) => m.is_none(),
            Repr::Pointer(p) => p.is_none(),
            Repr::Interface(i) => i.is_none(),
            Repr::Func(f) => f.is_none(),
            Repr::Native(n) => n.is_none(),
            _ => false,
        }
    }

    /// Concrete value held by an interface
    pub fn interface_inner(&self) -> Option<&HostValue> {
        match &self.repr {
            Repr::Interface(Some(inner)) => Some(inner),
            _ => None,
        }
    }

    /// Type of the concrete value, looking through interfaces
    pub fn dynamic_type(&self) -> Type {
        match &self.repr {
            Repr::Interface(Some(inner)) => inner.dynamic_type(),
            _ => self.ty.clone(),
        }
    }

    /// Storage address of reference-like values
    pub fn identity(&self) -> Option<usize> {
        match &self.repr {
            Repr::Slice(Some(cell)) => Some(Arc::as_ptr(cell) as *const () as usize),
            Repr::Map(Some(cell)) => Some(Arc::as_ptr(cell) as *const () as usize),
            Repr::Pointer(Some(cell)) => Some(Arc::as_ptr(cell) as *const () as usize),
            Repr::Native(Some(obj)) => Some(Arc::as_ptr(obj) as *const () as usize),
            Repr::Func(Some(func)) => Some(func.addr()),
            Repr::Interface(Some(inner)) => inner.identity(),
            _ => None,
        }
    }

    /// Same storage, or equal scalars of equal type
    pub fn same(&self, other: &HostValue) -> bool {
        if let (Some(a), Some(b)) = (self.identity(), other.identity()) {
            return a == b;
        }
        let (lhs, rhs) = (self.concrete(), other.concrete());
        if lhs.ty != rhs.ty {
            return false;
        }
        match (&lhs.repr, &rhs.repr) {
            (Repr::Bool(a), Repr::Bool(b)) => a == b,
            (Repr::Int(a), Repr::Int(b)) => a == b,
            (Repr::Uint(a), Repr::Uint(b)) => a == b,
            (Repr::Float(a), Repr::Float(b)) => a == b,
            (Repr::Str(a), Repr::Str(b)) => a == b,
            _ => lhs.is_nil() && rhs.is_nil(),
        }
    }

    fn concrete(&self) -> &HostValue {
        match &self.repr {
            Repr::Interface(Some(inner)) => inner.concrete(),
            _ => self,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match &self.concrete().repr {
            Repr::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match &self.concrete().repr {
            Repr::Int(i) => Some(*i),
            Repr::Uint(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match &self.concrete().repr {
            Repr::Uint(u) => Some(*u),
            Repr::Int(i) => u64::try_from(*i).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match &self.concrete().repr {
            Repr::Float(f) => Some(*f),
            Repr::Int(i) => Some(*i as f64),
            Repr::Uint(u) => Some(*u as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.concrete().repr {
            Repr::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Downcast a native handle (looking through pointers and interfaces)
    pub fn native_ref<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match &self.repr {
            Repr::Native(Some(obj)) => obj.clone().downcast::<T>().ok(),
            Repr::Interface(Some(inner)) => inner.native_ref(),
            Repr::Pointer(Some(cell)) => cell.read().native_ref(),
            _ => None,
        }
    }

    /// Copy of the pointee or the interface's concrete value
    pub fn elem(&self) -> Option<HostValue> {
        match &self.repr {
            Repr::Pointer(Some(cell)) => Some(cell.read().clone()),
            Repr::Interface(Some(inner)) => Some((**inner).clone()),
            _ => None,
        }
    }

    // ========================================================================
    // Sequences
    // ========================================================================

    pub fn len(&self) -> usize {
        match &self.repr {
            Repr::Slice(Some(cell)) => cell.read().len(),
            Repr::Array(items) => items.len(),
            Repr::Map(Some(cell)) => cell.read().len(),
            Repr::Str(s) => s.len(),
            Repr::Interface(Some(inner)) => inner.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at a 0-based position
    pub fn index(&self, index: usize) -> Option<HostValue> {
        match &self.repr {
            Repr::Slice(Some(cell)) => cell.read().get(index).cloned(),
            Repr::Array(items) => items.get(index).cloned(),
            Repr::Interface(Some(inner)) => inner.index(index),
            _ => None,
        }
    }

    /// Snapshot of the elements of a slice or array
    pub fn items(&self) -> Vec<HostValue> {
        match &self.repr {
            Repr::Slice(Some(cell)) => cell.read().clone(),
            Repr::Array(items) => items.clone(),
            Repr::Interface(Some(inner)) => inner.items(),
            _ => Vec::new(),
        }
    }

    pub fn set_index(&self, index: usize, value: HostValue) -> Result<()> {
        let Repr::Slice(Some(cell)) = &self.repr else {
            return Err(Error::access(&self.ty, "not an assignable sequence"));
        };
        let value = coerce(&value, self.elem_type()?)?;
        let mut items = cell.write();
        let len = items.len();
        let slot = items
            .get_mut(index)
            .ok_or_else(|| Error::access(&self.ty, format!("index {index} out of range ({len})")))?;
        *slot = value;
        Ok(())
    }

    /// Append in place; the slice header is shared by every holder
    pub fn append(&self, value: HostValue) -> Result<()> {
        let Repr::Slice(Some(cell)) = &self.repr else {
            return Err(Error::access(&self.ty, "cannot append to a nil or fixed sequence"));
        };
        let value = coerce(&value, self.elem_type()?)?;
        cell.write().push(value);
        Ok(())
    }

    fn elem_type(&self) -> Result<&Type> {
        self.ty
            .elem()
            .ok_or_else(|| Error::access(&self.ty, "value has no element type"))
    }

    // ========================================================================
    // Maps
    // ========================================================================

    pub fn get(&self, key: &HostValue) -> Result<Option<HostValue>> {
        match &self.repr {
            Repr::Map(Some(cell)) => {
                let key = self.map_key(key)?;
                Ok(cell.read().get(&key).cloned())
            }
            Repr::Map(None) => Ok(None),
            _ => Err(Error::access(&self.ty, "not a map")),
        }
    }

    pub fn insert(&self, key: HostValue, value: HostValue) -> Result<()> {
        let Repr::Map(Some(cell)) = &self.repr else {
            return Err(Error::access(&self.ty, "assignment to entry in nil map"));
        };
        let key = self.map_key(&key)?;
        let value = coerce(&value, self.elem_type()?)?;
        cell.write().insert(key, value);
        Ok(())
    }

    pub fn remove(&self, key: &HostValue) -> Result<Option<HostValue>> {
        match &self.repr {
            Repr::Map(Some(cell)) => {
                let key = self.map_key(key)?;
                Ok(cell.write().remove(&key))
            }
            Repr::Map(None) => Ok(None),
            _ => Err(Error::access(&self.ty, "not a map")),
        }
    }

    /// Snapshot of map keys, typed with the map's key type
    pub fn keys(&self) -> Vec<HostValue> {
        let (Repr::Map(Some(cell)), Some(key_ty)) = (&self.repr, self.ty.key()) else {
            return Vec::new();
        };
        cell.read().keys().map(|k| k.to_value(key_ty)).collect()
    }

    /// Snapshot of map entries
    pub fn entries(&self) -> Vec<(HostValue, HostValue)> {
        let (Repr::Map(Some(cell)), Some(key_ty)) = (&self.repr, self.ty.key()) else {
            return Vec::new();
        };
        cell.read()
            .iter()
            .map(|(k, v)| (k.to_value(key_ty), v.clone()))
            .collect()
    }

    fn map_key(&self, key: &HostValue) -> Result<Key> {
        let key_ty = self
            .ty
            .key()
            .ok_or_else(|| Error::access(&self.ty, "not a map"))?;
        let converted = coerce(key, key_ty).map_err(|_| Error::KeyType {
            container: self.ty.to_string(),
            expected: key_ty.to_string(),
            found: key.dynamic_type().to_string(),
        })?;
        Key::from_value(&converted)
    }

    // ========================================================================
    // Records
    // ========================================================================

    /// Struct type behind a struct value or pointer-to-struct
    pub fn record_type(&self) -> Option<&Type> {
        let ty = match self.ty.kind() {
            Kind::Pointer(elem) => elem,
            _ => &self.ty,
        };
        matches!(ty.kind(), Kind::Struct(_)).then_some(ty)
    }

    pub fn field(&self, name: &str) -> Option<HostValue> {
        match &self.repr {
            Repr::Struct(fields) => {
                let (index, _) = self.ty.field(name)?;
                fields.get(index).cloned()
            }
            Repr::Pointer(Some(cell)) => cell.read().field(name),
            Repr::Interface(Some(inner)) => inner.field(name),
            _ => None,
        }
    }

    /// Assign a field through a pointer; struct values are not addressable
    pub fn set_field(&self, name: &str, value: HostValue) -> Result<()> {
        match &self.repr {
            Repr::Pointer(Some(cell)) => {
                let record_ty = self
                    .record_type()
                    .ok_or_else(|| Error::access(&self.ty, "not a struct pointer"))?;
                let (index, field) = record_ty
                    .field(name)
                    .ok_or_else(|| Error::access(&self.ty, format!("no field {name}")))?;
                let value = coerce(&value, &field.ty)?;
                if let Repr::Struct(fields) = &mut cell.write().repr {
                    fields[index] = value;
                }
                Ok(())
            }
            Repr::Interface(Some(inner)) => inner.set_field(name, value),
            _ => Err(Error::access(&self.ty, format!("cannot assign field {name}"))),
        }
    }

    // ========================================================================
    // Calls
    // ========================================================================

    pub fn call(&self, args: &[HostValue]) -> Result<Vec<HostValue>> {
        match &self.repr {
            Repr::Func(Some(func)) => func.call(args),
            Repr::Interface(Some(inner)) => inner.call(args),
            _ => Err(Error::Invocation(format!("call of nil {}", self.ty))),
        }
    }

    /// Call a method from the value's method set
    pub fn call_method(&self, name: &str, args: &[HostValue]) -> Result<Vec<HostValue>> {
        if let Repr::Interface(Some(inner)) = &self.repr {
            return inner.call_method(name, args);
        }
        let method = self
            .ty
            .find_method(name)
            .ok_or_else(|| Error::access(&self.ty, format!("no method {name}")))?;
        method.call(&self.receiver_for(&method), args)
    }

    /// Receiver passed to `method`: value receivers get a copy of the pointee
    pub(crate) fn receiver_for(&self, method: &Method) -> HostValue {
        if method.pointer_receiver {
            return self.clone();
        }
        match (&self.repr, self.ty.kind()) {
            (Repr::Pointer(Some(_)), Kind::Pointer(_)) => self.elem().unwrap_or_else(|| self.clone()),
            _ => self.clone(),
        }
    }

    /// Same value with the type name stripped
    pub fn underlying(&self) -> HostValue {
        match &self.repr {
            Repr::Interface(Some(inner)) => inner.underlying(),
            _ => Self::from_parts(self.ty.underlying(), self.repr.clone()),
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Bool(b) => write!(f, "{}({b})", self.ty),
            Repr::Int(i) => write!(f, "{}({i})", self.ty),
            Repr::Uint(u) => write!(f, "{}({u})", self.ty),
            Repr::Float(x) => write!(f, "{}({x})", self.ty),
            Repr::Str(s) => write!(f, "{}({s:?})", self.ty),
            Repr::Interface(Some(inner)) => write!(f, "{}({inner:?})", self.ty),
            Repr::Array(items) | Repr::Struct(items) => {
                f.debug_list().entries(items).finish()?;
                write!(f, " as {}", self.ty)
            }
            _ if self.is_nil() => write!(f, "{}(nil)", self.ty),
            _ => write!(f, "{}({:#x})", self.ty, self.identity().unwrap_or(0)),
        }
    }
}
