//! Host values - primitives inline, objects by owned reference

use super::err::HostResult;
use super::object::ObjRef;
use super::types::HostType;
use std::fmt;
use std::sync::Arc;

/// A host-side value
///
/// Primitives are stored inline. `Obj` owns one reference to a heap record
/// and `Type` names a registered type object.
#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Obj(ObjRef),
    Type(&'static HostType),
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }

    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(*b as i64 as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_obj(&self) -> Option<&ObjRef> {
        match self {
            Value::Obj(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn into_obj(self) -> Option<ObjRef> {
        match self {
            Value::Obj(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_type(&self) -> Option<&'static HostType> {
        match self {
            Value::Type(ty) => Some(ty),
            _ => None,
        }
    }

    /// Name of the value's host type, for error messages
    pub fn type_name(&self) -> &str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Obj(obj) => obj.ty().name(),
            Value::Type(_) => "type",
        }
    }

    /// Identity comparison (`is`)
    pub fn is(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Obj(a), Value::Obj(b)) => a.is(b),
            (Value::Type(a), Value::Type(b)) => std::ptr::eq(*a, *b),
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            _ => false,
        }
    }
}

/// Structural for primitives, identity for objects and types.
/// Host equality (`__eq__`) goes through `host::ops::eq`.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Obj(a), Value::Obj(b)) => a.is(b),
            (Value::Type(a), Value::Type(b)) => std::ptr::eq(*a, *b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Obj(obj) => write!(f, "{obj:?}"),
            Value::Type(ty) => write!(f, "<class '{}'>", ty.name()),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::None
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<ObjRef> for Value {
    fn from(obj: ObjRef) -> Self {
        Value::Obj(obj)
    }
}

impl From<Option<ObjRef>> for Value {
    fn from(obj: Option<ObjRef>) -> Self {
        obj.map_or(Value::None, Value::Obj)
    }
}

impl From<&'static HostType> for Value {
    fn from(ty: &'static HostType) -> Self {
        Value::Type(ty)
    }
}

/// Conversion of a hook's native result into a host value
///
/// Fallible because native class instances become fresh objects.
pub trait IntoValue {
    fn into_value(self) -> HostResult<Value>;
}

macro_rules! into_value_via_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoValue for $ty {
                #[inline]
                fn into_value(self) -> HostResult<Value> {
                    Ok(Value::from(self))
                }
            }
        )*
    };
}

into_value_via_from!(Value, i64, i32, f64, bool, String, ObjRef, Option<ObjRef>, &'static HostType);

impl IntoValue for &'static str {
    fn into_value(self) -> HostResult<Value> {
        Ok(Value::str(self))
    }
}

impl IntoValue for () {
    fn into_value(self) -> HostResult<Value> {
        Ok(Value::None)
    }
}

impl IntoValue for usize {
    fn into_value(self) -> HostResult<Value> {
        i64::try_from(self)
            .map(Value::Int)
            .map_err(|_| super::err::HostError::value_error("integer too large for host int"))
    }
}

impl<T: crate::module::NativeClass> IntoValue for T {
    fn into_value(self) -> HostResult<Value> {
        crate::lifecycle::create(self).map(Value::Obj)
    }
}
