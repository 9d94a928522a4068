//! Type descriptors - reflective description of host types
//!
//! Design: every conversion decision is driven by a `Type`:
//! - `Arc` handles, so descriptors clone cheaply into proxies and closures
//! - Named types compare by name, unnamed types structurally
//! - Method sets are attached to named types and follow receiver rules
//!   (value receivers on `T`, all methods on `*T`)

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::value::{HostFn, HostValue, IntoHostFn};


/// Integer width (`Word` is the platform `int`/`uint`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntWidth {
    W8,
    W16,
    W32,
    W64,
    Word,
}

impl IntWidth {
    #[inline]
    pub const fn bits(self) -> u32 {
        match self {
            Self::W8 => 8,
            Self::W16 => 16,
            Self::W32 => 32,
            Self::W64 | Self::Word => 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatWidth {
    F32,
    F64,
}

/// Structural kind of a type
#[derive(Debug, Clone, PartialEq)]
pub enum Kind {
    Bool,
    Int(IntWidth),
    Uint(IntWidth),
    Float(FloatWidth),
    String,
    Slice(Type),
    Array(Type, usize),
    Map(Type, Type),
    Struct(Vec<Field>),
    Pointer(Type),
    Interface(Vec<MethodSig>),
    Func(Signature),
    /// Host-native handle reachable only through methods
    Native,
    Chan(Type),
    UnsafePointer,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: Type,
    pub exported: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        let name = name.into();
        let exported = is_exported(&name);
        Self { name, ty, exported }
    }
}

/// Exported names start with an uppercase letter
#[inline]
pub fn is_exported(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_uppercase)
}

/// Callable signature; when `variadic`, the last parameter is a slice
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Signature {
    pub params: Vec<Type>,
    pub results: Vec<Type>,
    pub variadic: bool,
}

impl Signature {
    pub fn new(params: Vec<Type>, results: Vec<Type>) -> Self {
        Self {
            params,
            results,
            variadic: false,
        }
    }

    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            let last = i + 1 == self.params.len();
            match param.elem() {
                Some(elem) if self.variadic && last => write!(f, "...{elem}")?,
                _ => write!(f, "{param}")?,
            }
        }
        f.write_str(")")?;
        match self.results.as_slice() {
            [] => Ok(()),
            [single] => write!(f, " {single}"),
            many => {
                f.write_str(" (")?;
                for (i, result) in many.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{result}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Interface requirement: a method name and its signature
#[derive(Debug, Clone, PartialEq)]
pub struct MethodSig {
    pub name: String,
    pub sig: Signature,
}

impl MethodSig {
    pub fn new(name: impl Into<String>, sig: Signature) -> Self {
        Self {
            name: name.into(),
            sig,
        }
    }
}

/// Method bound to a named type; `func` receives the receiver first
#[derive(Clone)]
pub struct Method {
    pub name: String,
    pub sig: Signature,
    pub pointer_receiver: bool,
    pub func: HostFn,
}

impl Method {
    /// Method from a raw implementation with an explicit signature
    pub fn new<F>(name: impl Into<String>, sig: Signature, func: F) -> Self
    where
        F: Fn(&HostValue, &[HostValue]) -> Result<Vec<HostValue>> + Send + Sync + 'static,
    {
        let func = HostFn::new(move |args: &[HostValue]| match args.split_first() {
            Some((receiver, rest)) => func(receiver, rest),
            None => Err(crate::Error::Invocation("method called without receiver".into())),
        });
        Self {
            name: name.into(),
            sig,
            pointer_receiver: false,
            func,
        }
    }

    /// Method from a typed closure whose first parameter is the receiver
    pub fn from_fn<Args, Ret, F>(name: impl Into<String>, func: F) -> Self
    where
        F: IntoHostFn<Args, Ret>,
    {
        let mut sig = F::signature();
        if !sig.params.is_empty() {
            sig.params.remove(0);
        }
        Self {
            name: name.into(),
            sig,
            pointer_receiver: false,
            func: func.into_host_fn(),
        }
    }

    pub fn pointer_receiver(mut self) -> Self {
        self.pointer_receiver = true;
        self
    }

    pub fn call(&self, receiver: &HostValue, args: &[HostValue]) -> Result<Vec<HostValue>> {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(receiver.clone());
        full.extend_from_slice(args);
        self.func.call(&full)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let recv = if self.pointer_receiver { "*" } else { "" };
        write!(f, "({recv}T) {}{}", self.name, self.sig)
    }
}

/// Host type descriptor
#[derive(Clone)]
pub struct Type(Arc<TypeInner>);

#[derive(Debug)]
struct TypeInner {
    name: Option<String>,
    kind: Kind,
    methods: Vec<Method>,
}

impl Type {
    pub fn from_kind(kind: Kind) -> Self {
        Self(Arc::new(TypeInner {
            name: None,
            kind,
            methods: Vec::new(),
        }))
    }

    // ========================================================================
    // Constructors
    // ========================================================================

    pub fn bool() -> Self {
        Self::from_kind(Kind::Bool)
    }

    pub fn int() -> Self {
        Self::from_kind(Kind::Int(IntWidth::Word))
    }

    pub fn int8() -> Self {
        Self::from_kind(Kind::Int(IntWidth::W8))
    }

    pub fn int16() -> Self {
        Self::from_kind(Kind::Int(IntWidth::W16))
    }

    pub fn int32() -> Self {
        Self::from_kind(Kind::Int(IntWidth::W32))
    }

    pub fn int64() -> Self {
        Self::from_kind(Kind::Int(IntWidth::W64))
    }

    pub fn uint() -> Self {
        Self::from_kind(Kind::Uint(IntWidth::Word))
    }

    pub fn uint8() -> Self {
        Self::from_kind(Kind::Uint(IntWidth::W8))
    }

    pub fn uint16() -> Self {
        Self::from_kind(Kind::Uint(IntWidth::W16))
    }

    pub fn uint32() -> Self {
        Self::from_kind(Kind::Uint(IntWidth::W32))
    }

    pub fn uint64() -> Self {
        Self::from_kind(Kind::Uint(IntWidth::W64))
    }

    pub fn float32() -> Self {
        Self::from_kind(Kind::Float(FloatWidth::F32))
    }

    pub fn float64() -> Self {
        Self::from_kind(Kind::Float(FloatWidth::F64))
    }

    pub fn string() -> Self {
        Self::from_kind(Kind::String)
    }

    /// The empty interface
    pub fn any() -> Self {
        Self::from_kind(Kind::Interface(Vec::new()))
    }

    pub fn slice(elem: Type) -> Self {
        Self::from_kind(Kind::Slice(elem))
    }

    pub fn array(elem: Type, len: usize) -> Self {
        Self::from_kind(Kind::Array(elem, len))
    }

    pub fn map(key: Type, value: Type) -> Self {
        Self::from_kind(Kind::Map(key, value))
    }

    pub fn pointer(elem: Type) -> Self {
        Self::from_kind(Kind::Pointer(elem))
    }

    pub fn func(sig: Signature) -> Self {
        Self::from_kind(Kind::Func(sig))
    }

    pub fn chan(elem: Type) -> Self {
        Self::from_kind(Kind::Chan(elem))
    }

    pub fn unsafe_pointer() -> Self {
        Self::from_kind(Kind::UnsafePointer)
    }

    pub fn native() -> Self {
        Self::from_kind(Kind::Native)
    }

    /// Named interface type
    pub fn interface(name: impl Into<String>, methods: Vec<MethodSig>) -> Self {
        Self::named(name, &Self::from_kind(Kind::Interface(methods)))
    }

    /// New named type sharing `underlying`'s structure (no methods)
    pub fn named(name: impl Into<String>, underlying: &Type) -> Self {
        Self(Arc::new(TypeInner {
            name: Some(name.into()),
            kind: underlying.0.kind.clone(),
            methods: Vec::new(),
        }))
    }

    /// Named struct type builder
    pub fn record(name: impl Into<String>) -> RecordBuilder {
        RecordBuilder {
            name: name.into(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Copy of this type with one more method attached
    pub fn with_method(&self, method: Method) -> Self {
        let mut methods = self.0.methods.clone();
        methods.retain(|m| m.name != method.name);
        methods.push(method);
        Self(Arc::new(TypeInner {
            name: self.0.name.clone(),
            kind: self.0.kind.clone(),
            methods,
        }))
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    #[inline]
    pub fn kind(&self) -> &Kind {
        &self.0.kind
    }

    /// Element type of slices, arrays, pointers, channels; value type of maps
    pub fn elem(&self) -> Option<&Type> {
        match &self.0.kind {
            Kind::Slice(elem) | Kind::Array(elem, _) | Kind::Pointer(elem) | Kind::Chan(elem) => {
                Some(elem)
            }
            Kind::Map(_, value) => Some(value),
            _ => None,
        }
    }

    pub fn key(&self) -> Option<&Type> {
        match &self.0.kind {
            Kind::Map(key, _) => Some(key),
            _ => None,
        }
    }

    pub fn fields(&self) -> &[Field] {
        match &self.0.kind {
            Kind::Struct(fields) => fields,
            _ => &[],
        }
    }

    pub fn field(&self, name: &str) -> Option<(usize, &Field)> {
        self.fields().iter().enumerate().find(|(_, f)| f.name == name)
    }

    /// Methods declared directly on this type
    pub fn methods(&self) -> &[Method] {
        &self.0.methods
    }

    /// Methods callable on a value of this type
    pub fn method_set(&self) -> Vec<Method> {
        match &self.0.kind {
            Kind::Pointer(elem) if self.0.name.is_none() => elem.methods().to_vec(),
            _ => self
                .0
                .methods
                .iter()
                .filter(|m| !m.pointer_receiver)
                .cloned()
                .collect(),
        }
    }

    pub fn find_method(&self, name: &str) -> Option<Method> {
        self.method_set().into_iter().find(|m| m.name == name)
    }

    /// Required method set of an interface type
    pub fn interface_methods(&self) -> &[MethodSig] {
        match &self.0.kind {
            Kind::Interface(methods) => methods,
            _ => &[],
        }
    }

    /// Does a value of this type satisfy `iface`?
    pub fn implements(&self, iface: &Type) -> bool {
        let Kind::Interface(required) = iface.kind() else {
            return false;
        };
        if required.is_empty() {
            return true;
        }
        if let Kind::Interface(own) = self.kind() {
            return required
                .iter()
                .all(|r| own.iter().any(|m| m.name == r.name && m.sig.params.len() == r.sig.params.len()));
        }
        let available = self.method_set();
        required.iter().all(|r| {
            available
                .iter()
                .any(|m| m.name == r.name && m.sig.params.len() == r.sig.params.len())
        })
    }

    #[inline]
    pub fn is_interface(&self) -> bool {
        matches!(self.0.kind, Kind::Interface(_))
    }

    #[inline]
    pub fn is_empty_interface(&self) -> bool {
        matches!(&self.0.kind, Kind::Interface(methods) if methods.is_empty())
    }

    /// Kinds whose zero value is nil
    pub fn is_nillable(&self) -> bool {
        matches!(
            self.0.kind,
            Kind::Slice(_)
                | Kind::Map(..)
                | Kind::Pointer(_)
                | Kind::Interface(_)
                | Kind::Func(_)
                | Kind::Native
                | Kind::Chan(_)
                | Kind::UnsafePointer
        )
    }

    #[inline]
    pub fn is_numeric(&self) -> bool {
        matches!(self.0.kind, Kind::Int(_) | Kind::Uint(_) | Kind::Float(_))
    }

    /// Same structure with the name and methods stripped
    pub fn underlying(&self) -> Type {
        if self.0.name.is_none() {
            return self.clone();
        }
        Self::from_kind(self.0.kind.clone())
    }

    pub fn kind_name(&self) -> &'static str {
        match self.0.kind {
            Kind::Bool => "bool",
            Kind::Int(_) => "int",
            Kind::Uint(_) => "uint",
            Kind::Float(_) => "float",
            Kind::String => "string",
            Kind::Slice(_) => "slice",
            Kind::Array(..) => "array",
            Kind::Map(..) => "map",
            Kind::Struct(_) => "struct",
            Kind::Pointer(_) => "ptr",
            Kind::Interface(_) => "interface",
            Kind::Func(_) => "func",
            Kind::Native => "native",
            Kind::Chan(_) => "chan",
            Kind::UnsafePointer => "unsafe.Pointer",
        }
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        match (&self.0.name, &other.0.name) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.0.kind == other.0.kind,
            _ => false,
        }
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Type({self})")
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.0.name {
            return f.write_str(name);
        }
        match &self.0.kind {
            Kind::Bool => f.write_str("bool"),
            Kind::Int(IntWidth::Word) => f.write_str("int"),
            Kind::Int(w) => write!(f, "int{}", w.bits()),
            Kind::Uint(IntWidth::Word) => f.write_str("uint"),
            Kind::Uint(w) => write!(f, "uint{}", w.bits()),
            Kind::Float(FloatWidth::F32) => f.write_str("float32"),
            Kind::Float(FloatWidth::F64) => f.write_str("float64"),
            Kind::String => f.write_str("string"),
            Kind::Slice(elem) => write!(f, "[]{elem}"),
            Kind::Array(elem, len) => write!(f, "[{len}]{elem}"),
            Kind::Map(key, value) => write!(f, "map[{key}]{value}"),
            Kind::Struct(fields) if fields.is_empty() => f.write_str("struct {}"),
            Kind::Struct(fields) => {
                f.write_str("struct { ")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{} {}", field.name, field.ty)?;
                }
                f.write_str(" }")
            }
            Kind::Pointer(elem) => write!(f, "*{elem}"),
            Kind::Interface(methods) if methods.is_empty() => f.write_str("interface {}"),
            Kind::Interface(methods) => {
                f.write_str("interface { ")?;
                for (i, m) in methods.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{}{}", m.name, m.sig)?;
                }
                f.write_str(" }")
            }
            Kind::Func(sig) => write!(f, "func{sig}"),
            Kind::Native => f.write_str("native"),
            Kind::Chan(elem) => write!(f, "chan {elem}"),
            Kind::UnsafePointer => f.write_str("unsafe.Pointer"),
        }
    }
}

/// Builder for named struct types
#[derive(Debug)]
pub struct RecordBuilder {
    name: String,
    fields: Vec<Field>,
    methods: Vec<Method>,
}

impl RecordBuilder {
    pub fn field(mut self, name: impl Into<String>, ty: Type) -> Self {
        self.fields.push(Field::new(name, ty));
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.methods.push(method);
        self
    }

    pub fn build(self) -> Type {
        Type(Arc::new(TypeInner {
            name: Some(self.name),
            kind: Kind::Struct(self.fields),
            methods: self.methods,
        }))
    }
}
