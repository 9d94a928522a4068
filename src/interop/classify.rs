//! Conversion rules - which Lua representation a host type receives

use crate::types::{Kind, Type};
use crate::value::HostValue;

/// Shape of a proxy handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyKind {
    /// Slices and arrays: 1-based integer indexing
    Sequence,
    Map,
    /// Structs and pointers to structs: fields then methods
    Record,
    /// Named scalars, pointers to non-structs, native handles: methods only
    Scalar,
}

/// Conversion rule for a host type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rule {
    Nil,
    Bool,
    Number,
    Text,
    Proxy(ProxyKind),
    Callable,
    /// Interface types: decided by the concrete value
    Dynamic,
    Unsupported,
}

impl Rule {
    #[inline]
    pub fn is_proxy(self) -> bool {
        matches!(self, Self::Proxy(_))
    }
}

/// Rule for values of `ty`
pub fn classify(ty: &Type) -> Rule {
    let has_methods = !ty.method_set().is_empty();
    let plain = |rule: Rule| {
        if has_methods {
            Rule::Proxy(ProxyKind::Scalar)
        } else {
            rule
        }
    };
    match ty.kind() {
        Kind::Bool => plain(Rule::Bool),
        Kind::Int(_) | Kind::Uint(_) | Kind::Float(_) => plain(Rule::Number),
        Kind::String => plain(Rule::Text),
        Kind::Slice(_) | Kind::Array(..) => Rule::Proxy(ProxyKind::Sequence),
        Kind::Map(..) => Rule::Proxy(ProxyKind::Map),
        Kind::Struct(_) => Rule::Proxy(ProxyKind::Record),
        Kind::Pointer(elem) => match elem.kind() {
            Kind::Struct(_) => Rule::Proxy(ProxyKind::Record),
            Kind::Pointer(_) | Kind::Chan(_) | Kind::UnsafePointer => Rule::Unsupported,
            _ => Rule::Proxy(ProxyKind::Scalar),
        },
        Kind::Interface(_) => Rule::Dynamic,
        Kind::Func(_) => Rule::Callable,
        Kind::Native => Rule::Proxy(ProxyKind::Scalar),
        Kind::Chan(_) | Kind::UnsafePointer => Rule::Unsupported,
    }
}

/// Rule for a concrete value; nil references classify as `Nil`
pub fn classify_value(value: &HostValue) -> Rule {
    if let Some(inner) = value.interface_inner() {
        return classify_value(inner);
    }
    match classify(value.ty()) {
        Rule::Unsupported => Rule::Unsupported,
        _ if value.is_nil() => Rule::Nil,
        rule => rule,
    }
}
