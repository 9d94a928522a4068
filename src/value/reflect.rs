//! Static reflection: Rust types that know their host `Type`
//!
//! `Reflect` maps plain Rust values to and from `HostValue`, and
//! `IntoHostFn` turns typed closures into host functions with a derived
//! signature, so registering `|a: f64, b: f64| a + b` needs no hand-written
//! descriptor.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::ops::Deref;

use super::{coerce, shared, HostFn, HostValue, Key, Repr};
use crate::error::{Error, Result};
use crate::types::{Signature, Type};

pub trait Reflect: Sized {
    /// Trailing parameter of this type makes a signature variadic
    const VARIADIC: bool = false;

    fn type_of() -> Type;
    fn into_host(self) -> HostValue;
    fn from_host(value: &HostValue) -> Result<Self>;
}

macro_rules! reflect_int {
    ($($t:ty => $ctor:ident),* $(,)?) => {$(
        impl Reflect for $t {
            fn type_of() -> Type {
                Type::$ctor()
            }

            fn into_host(self) -> HostValue {
                HostValue::from_parts(Type::$ctor(), Repr::Int(self as i64))
            }

            fn from_host(value: &HostValue) -> Result<Self> {
                let converted = coerce(value, &Self::type_of())?;
                match converted.repr {
                    Repr::Int(i) => <$t>::try_from(i)
                        .map_err(|_| Error::conversion(value.ty(), Self::type_of())),
                    _ => Err(Error::conversion(value.ty(), Self::type_of())),
                }
            }
        }
    )*};
}

macro_rules! reflect_uint {
    ($($t:ty => $ctor:ident),* $(,)?) => {$(
        impl Reflect for $t {
            fn type_of() -> Type {
                Type::$ctor()
            }

            fn into_host(self) -> HostValue {
                HostValue::from_parts(Type::$ctor(), Repr::Uint(self as u64))
            }

            fn from_host(value: &HostValue) -> Result<Self> {
                let converted = coerce(value, &Self::type_of())?;
                match converted.repr {
                    Repr::Uint(u) => <$t>::try_from(u)
                        .map_err(|_| Error::conversion(value.ty(), Self::type_of())),
                    _ => Err(Error::conversion(value.ty(), Self::type_of())),
                }
            }
        }
    )*};
}

reflect_int!(i8 => int8, i16 => int16, i32 => int32, i64 => int64, isize => int);
reflect_uint!(u8 => uint8, u16 => uint16, u32 => uint32, u64 => uint64, usize => uint);

impl Reflect for f32 {
    fn type_of() -> Type {
        Type::float32()
    }

    fn into_host(self) -> HostValue {
        HostValue::from_parts(Type::float32(), Repr::Float(f64::from(self)))
    }

    fn from_host(value: &HostValue) -> Result<Self> {
        match coerce(value, &Self::type_of())?.repr {
            Repr::Float(f) => Ok(f as f32),
            _ => Err(Error::conversion(value.ty(), Self::type_of())),
        }
    }
}

impl Reflect for f64 {
    fn type_of() -> Type {
        Type::float64()
    }

    fn into_host(self) -> HostValue {
        HostValue::from_parts(Type::float64(), Repr::Float(self))
    }

    fn from_host(value: &HostValue) -> Result<Self> {
        match coerce(value, &Self::type_of())?.repr {
            Repr::Float(f) => Ok(f),
            _ => Err(Error::conversion(value.ty(), Self::type_of())),
        }
    }
}

impl Reflect for bool {
    fn type_of() -> Type {
        Type::bool()
    }

    fn into_host(self) -> HostValue {
        HostValue::from_parts(Type::bool(), Repr::Bool(self))
    }

    fn from_host(value: &HostValue) -> Result<Self> {
        match coerce(value, &Self::type_of())?.repr {
            Repr::Bool(b) => Ok(b),
            _ => Err(Error::conversion(value.ty(), Self::type_of())),
        }
    }
}

impl Reflect for String {
    fn type_of() -> Type {
        Type::string()
    }

    fn into_host(self) -> HostValue {
        HostValue::from_parts(Type::string(), Repr::Str(self))
    }

    fn from_host(value: &HostValue) -> Result<Self> {
        match coerce(value, &Self::type_of())?.repr {
            Repr::Str(s) => Ok(s),
            _ => Err(Error::conversion(value.ty(), Self::type_of())),
        }
    }
}

/// Any host value passes through untouched (the empty interface)
impl Reflect for HostValue {
    fn type_of() -> Type {
        Type::any()
    }

    fn into_host(self) -> HostValue {
        self
    }

    fn from_host(value: &HostValue) -> Result<Self> {
        Ok(value.clone())
    }
}

impl<T: Reflect> Reflect for Vec<T> {
    fn type_of() -> Type {
        Type::slice(T::type_of())
    }

    fn into_host(self) -> HostValue {
        let items = self.into_iter().map(Reflect::into_host).collect();
        HostValue::from_parts(Self::type_of(), Repr::Slice(Some(shared(items))))
    }

    fn from_host(value: &HostValue) -> Result<Self> {
        let converted = coerce(value, &Self::type_of())?;
        converted.items().iter().map(T::from_host).collect()
    }
}

impl<K, V> Reflect for HashMap<K, V>
where
    K: Reflect + Eq + Hash,
    V: Reflect,
{
    fn type_of() -> Type {
        Type::map(K::type_of(), V::type_of())
    }

    fn into_host(self) -> HostValue {
        let mut entries = HashMap::with_capacity(self.len());
        for (k, v) in self {
            let key = k.into_host();
            match Key::from_value(&key) {
                Ok(key) => {
                    entries.insert(key, v.into_host());
                }
                Err(err) => tracing::warn!(event = "map_key_dropped", error = %err),
            }
        }
        HostValue::from_parts(Self::type_of(), Repr::Map(Some(shared(entries))))
    }

    fn from_host(value: &HostValue) -> Result<Self> {
        let converted = coerce(value, &Self::type_of())?;
        converted
            .entries()
            .iter()
            .map(|(k, v)| Ok((K::from_host(k)?, V::from_host(v)?)))
            .collect()
    }
}

/// Trailing variadic parameter: receives every remaining argument
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Variadic<T>(pub Vec<T>);

impl<T> Variadic<T> {
    pub fn into_inner(self) -> Vec<T> {
        self.0
    }
}

impl<T> Deref for Variadic<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

impl<T: Reflect> Reflect for Variadic<T> {
    const VARIADIC: bool = true;

    fn type_of() -> Type {
        Vec::<T>::type_of()
    }

    fn into_host(self) -> HostValue {
        self.0.into_host()
    }

    fn from_host(value: &HostValue) -> Result<Self> {
        Vec::<T>::from_host(value).map(Variadic)
    }
}

// ============================================================================
// Results
// ============================================================================

/// Return types of host functions
pub trait IntoResults {
    fn result_types() -> Vec<Type>;
    fn into_results(self) -> Result<Vec<HostValue>>;
}

impl IntoResults for () {
    fn result_types() -> Vec<Type> {
        Vec::new()
    }

    fn into_results(self) -> Result<Vec<HostValue>> {
        Ok(Vec::new())
    }
}

impl<T: Reflect> IntoResults for T {
    fn result_types() -> Vec<Type> {
        vec![T::type_of()]
    }

    fn into_results(self) -> Result<Vec<HostValue>> {
        Ok(vec![self.into_host()])
    }
}

impl<A: Reflect, B: Reflect> IntoResults for (A, B) {
    fn result_types() -> Vec<Type> {
        vec![A::type_of(), B::type_of()]
    }

    fn into_results(self) -> Result<Vec<HostValue>> {
        Ok(vec![self.0.into_host(), self.1.into_host()])
    }
}

impl<A: Reflect, B: Reflect, C: Reflect> IntoResults for (A, B, C) {
    fn result_types() -> Vec<Type> {
        vec![A::type_of(), B::type_of(), C::type_of()]
    }

    fn into_results(self) -> Result<Vec<HostValue>> {
        Ok(vec![self.0.into_host(), self.1.into_host(), self.2.into_host()])
    }
}

/// A failing host function surfaces as an invocation error
impl<T: IntoResults, E: fmt::Display> IntoResults for std::result::Result<T, E> {
    fn result_types() -> Vec<Type> {
        T::result_types()
    }

    fn into_results(self) -> Result<Vec<HostValue>> {
        match self {
            Ok(value) => value.into_results(),
            Err(err) => Err(Error::Invocation(err.to_string())),
        }
    }
}

// ============================================================================
// Typed closures
// ============================================================================

pub trait IntoHostFn<Args, Ret>: Send + Sync + 'static {
    fn signature() -> Signature;
    fn into_host_fn(self) -> HostFn;
}

macro_rules! count {
    () => { 0usize };
    ($head:ident $($tail:ident)*) => { 1usize + count!($($tail)*) };
}

macro_rules! impl_into_host_fn {
    ($($arg:ident $var:ident),*) => {
        impl<Func, Ret, $($arg,)*> IntoHostFn<($($arg,)*), Ret> for Func
        where
            Func: Fn($($arg),*) -> Ret + Send + Sync + 'static,
            Ret: IntoResults,
            $($arg: Reflect,)*
        {
            fn signature() -> Signature {
                let variadic: &[bool] = &[$($arg::VARIADIC),*];
                Signature {
                    params: vec![$($arg::type_of()),*],
                    results: Ret::result_types(),
                    variadic: variadic.last().copied().unwrap_or(false),
                }
            }

            #[allow(unused_mut, unused_variables)]
            fn into_host_fn(self) -> HostFn {
                let func = self;
                HostFn::new(move |args: &[HostValue]| {
                    let expected = count!($($arg)*);
                    if args.len() != expected {
                        return Err(Error::Arity {
                            callee: "host function".into(),
                            expected,
                            got: args.len(),
                            variadic: false,
                        });
                    }
                    let mut args = args.iter();
                    $(
                        let $var = match args.next() {
                            Some(value) => $arg::from_host(value)?,
                            None => return Err(Error::Invocation("missing argument".into())),
                        };
                    )*
                    func($($var),*).into_results()
                })
            }
        }
    };
}

impl_into_host_fn!();
impl_into_host_fn!(A1 a1);
impl_into_host_fn!(A1 a1, A2 a2);
impl_into_host_fn!(A1 a1, A2 a2, A3 a3);
impl_into_host_fn!(A1 a1, A2 a2, A3 a3, A4 a4);
impl_into_host_fn!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5);
impl_into_host_fn!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6);
