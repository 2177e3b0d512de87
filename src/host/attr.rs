//! Generic attribute access
//!
//! Lookup order for `obj.name`:
//! 1. `__class__` and `__dict__`
//! 2. Data descriptors on the type: public fields, properties, objects whose
//!    type declares `__set__`
//! 3. The instance dict
//! 4. Methods (bound), class constants, non-data descriptors (`__get__`)
//! 5. The type's `__getattr__` hook
//!
//! Assignment goes to a data descriptor if one exists, else to the instance
//! dict. Frozen types reject every assignment and deletion.

use super::builtins::{dict, BoundMethod};
use super::err::{bridge, HostError, HostResult};
use super::object::ObjRef;
use super::types::{ClassAttr, HostType};
use super::value::Value;
use crate::descriptor::{MethodDescriptor, MethodKind};
use crate::lifecycle;
use std::sync::Arc;

fn missing(ty: &HostType, name: &str) -> HostError {
    HostError::attribute_error(format!("'{}' object has no attribute '{name}'", ty.name()))
}

/// Bind a method to the object (or class) it was looked up on
fn bind(receiver: Option<&ObjRef>, ty: &'static HostType, method: &Arc<MethodDescriptor>) -> HostResult<Value> {
    let bound_to = match (method.kind, receiver) {
        (MethodKind::Instance, Some(obj)) => Value::Obj(obj.clone()),
        (MethodKind::Class, _) => Value::Type(ty),
        _ => Value::None,
    };
    BoundMethod::bind(bound_to, ty, Arc::clone(method)).map(Value::Obj)
}

/// A class constant, bound through its type's `__get__` if it has one
fn bind_const(value: &Value, instance: Option<&Value>, ty: &'static HostType) -> HostResult<Value> {
    match value {
        Value::Obj(descr) => match &descr.ty().slots().descr_get {
            Some(get) => bridge(get(descr, instance, ty), "__get__"),
            None => Ok(value.clone()),
        },
        other => Ok(other.clone()),
    }
}

fn is_data_descriptor(value: &Value) -> bool {
    matches!(value, Value::Obj(descr) if descr.ty().slots().descr_set.is_some())
}

/// The instance dict, created on first use
fn ensure_dict(obj: &ObjRef) -> HostResult<Option<ObjRef>> {
    let Some(slot) = obj.dict_slot() else {
        return Ok(None);
    };
    if let Some(existing) = unsafe { slot.as_ref() } {
        return Ok(Some(existing.clone()));
    }
    let created = dict::new()?;
    unsafe { *slot.as_ptr() = Some(created.clone()) };
    Ok(Some(created))
}

fn existing_dict(obj: &ObjRef) -> Option<ObjRef> {
    let slot = obj.dict_slot()?;
    unsafe { slot.as_ref() }.clone()
}

pub fn getattr(obj: &ObjRef, name: &str) -> HostResult<Value> {
    let ty = obj.ty();
    match name {
        "__class__" => return Ok(Value::Type(ty)),
        "__dict__" => {
            return ensure_dict(obj)?
                .map(Value::Obj)
                .ok_or_else(|| missing(ty, name));
        }
        _ => {}
    }

    let class_attr = ty.lookup(name);
    match class_attr {
        Some(ClassAttr::Field(field)) => return lifecycle::read_field(obj, field),
        Some(ClassAttr::Property(property)) => return bridge((property.get)(obj), name),
        Some(ClassAttr::Const(value)) if is_data_descriptor(value) => {
            return bind_const(value, Some(&Value::Obj(obj.clone())), ty);
        }
        _ => {}
    }

    if let Some(dict) = existing_dict(obj) {
        if let Some(value) = dict::get(&dict, &Value::str(name))? {
            return Ok(value);
        }
    }

    match class_attr {
        Some(ClassAttr::Method(method)) => return bind(Some(obj), ty, method),
        Some(ClassAttr::Const(value)) => return bind_const(value, Some(&Value::Obj(obj.clone())), ty),
        _ => {}
    }

    match &ty.slots().getattr {
        Some(hook) => bridge(hook(obj, name), "__getattr__"),
        None => Err(missing(ty, name)),
    }
}

pub fn setattr(obj: &ObjRef, name: &str, value: Value) -> HostResult<()> {
    let ty = obj.ty();
    if ty.flags().is_frozen() {
        return Err(HostError::frozen(format!("cannot assign to field '{name}' of frozen '{}'", ty.name())));
    }

    match ty.lookup(name) {
        Some(ClassAttr::Field(field)) => return lifecycle::write_field(obj, field, &value),
        Some(ClassAttr::Property(property)) => {
            return match &property.set {
                Some(set) => bridge(set(obj, value), name),
                None => Err(HostError::attribute_error(format!(
                    "property '{name}' of '{}' object has no setter",
                    ty.name()
                ))),
            };
        }
        Some(ClassAttr::Const(Value::Obj(descr))) => {
            if let Some(set) = &descr.ty().slots().descr_set {
                return bridge(set(descr, &Value::Obj(obj.clone()), value), "__set__");
            }
        }
        _ => {}
    }

    match ensure_dict(obj)? {
        Some(dict) => dict::set_item(&dict, Value::str(name), value),
        None => match ty.lookup(name) {
            Some(_) => Err(HostError::attribute_error(format!(
                "'{}' object attribute '{name}' is read-only",
                ty.name()
            ))),
            None => Err(missing(ty, name)),
        },
    }
}

pub fn delattr(obj: &ObjRef, name: &str) -> HostResult<()> {
    let ty = obj.ty();
    if ty.flags().is_frozen() {
        return Err(HostError::frozen(format!("cannot delete field '{name}' of frozen '{}'", ty.name())));
    }
    if let Some(ClassAttr::Field(_) | ClassAttr::Property(_)) = ty.lookup(name) {
        return Err(HostError::attribute_error(format!(
            "cannot delete attribute '{name}' of '{}' object",
            ty.name()
        )));
    }
    let removed = match existing_dict(obj) {
        Some(dict) => dict::remove(&dict, &Value::str(name))?,
        None => None,
    };
    removed.map(drop).ok_or_else(|| missing(ty, name))
}

/// Attribute lookup on a type object
pub fn type_getattr(ty: &'static HostType, name: &str) -> HostResult<Value> {
    match name {
        "__name__" => return Ok(Value::str(ty.name())),
        "__doc__" => return Ok(ty.doc().map_or(Value::None, Value::str)),
        "__base__" => return Ok(ty.base().map_or(Value::None, Value::Type)),
        _ => {}
    }
    match ty.lookup(name) {
        Some(ClassAttr::Method(method)) => bind(None, ty, method),
        Some(ClassAttr::Const(value)) => bind_const(value, None, ty),
        Some(ClassAttr::Field(_) | ClassAttr::Property(_)) => Err(HostError::attribute_error(format!(
            "'{name}' of type '{}' is only available on instances",
            ty.name()
        ))),
        None => Err(HostError::attribute_error(format!(
            "type object '{}' has no attribute '{name}'",
            ty.name()
        ))),
    }
}
