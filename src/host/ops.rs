//! Abstract object operations
//!
//! What the host evaluates for `a + b`, `a[i]`, `len(a)`, `hash(a)` and so
//! on. Each operation looks up the slot on the operand's type, calls it, and
//! resolves the hook's failure signal into an exception. Primitive values
//! are handled inline so reflected operators have something to reflect.

use super::buffer::BufferView;
use super::err::{bridge, resolve, HookFailure, HookResult, HostError, HostResult};
use super::gil;
use super::object::ObjRef;
use super::types::HostType;
use super::value::Value;
use super::{attr, ExceptionKind};
use crate::protocol::{wrap_index, BinaryOp, CompareOp, DelItem, GetItem, HashPolicy, IterSlot, SetItem, UnaryOp};
use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Slot result where `NotImplemented` means "try something else"
fn attempt<T>(result: HookResult<T>, hook: &str) -> HostResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(HookFailure::NotImplemented) => Ok(None),
        Err(failure) => Err(resolve(failure, hook)),
    }
}

fn not_supported(what: &str, value: &Value) -> HostError {
    HostError::type_error(format!("'{}' object {what}", value.type_name()))
}

/// Call a type, bound method or callable object
pub fn call(callable: &Value, args: &[Value]) -> HostResult<Value> {
    let _gil = gil::acquire();
    match callable {
        Value::Type(ty) => ty.instantiate(args).map(Value::Obj),
        Value::Obj(obj) => match &obj.ty().slots().call {
            Some(call) => bridge(call(obj, args), "__call__"),
            None => Err(not_supported("is not callable", callable)),
        },
        other => Err(not_supported("is not callable", other)),
    }
}

/// `target.name(*args)`
pub fn call_method(target: &Value, name: &str, args: &[Value]) -> HostResult<Value> {
    let _gil = gil::acquire();
    let method = getattr(target, name)?;
    call(&method, args)
}

pub fn getattr(target: &Value, name: &str) -> HostResult<Value> {
    let _gil = gil::acquire();
    match target {
        Value::Obj(obj) => attr::getattr(obj, name),
        Value::Type(ty) => attr::type_getattr(ty, name),
        other => Err(HostError::attribute_error(format!(
            "'{}' object has no attribute '{name}'",
            other.type_name()
        ))),
    }
}

pub fn setattr(target: &Value, name: &str, value: Value) -> HostResult<()> {
    let _gil = gil::acquire();
    match target {
        Value::Obj(obj) => attr::setattr(obj, name, value),
        other => Err(HostError::attribute_error(format!(
            "'{}' object attribute '{name}' is read-only",
            other.type_name()
        ))),
    }
}

pub fn delattr(target: &Value, name: &str) -> HostResult<()> {
    let _gil = gil::acquire();
    match target {
        Value::Obj(obj) => attr::delattr(obj, name),
        other => Err(HostError::attribute_error(format!(
            "'{}' object has no attribute '{name}'",
            other.type_name()
        ))),
    }
}

fn obj_len(obj: &ObjRef) -> HostResult<Option<usize>> {
    match &obj.ty().slots().len {
        Some(len) => bridge(len(obj), "__len__").map(Some),
        None => Ok(None),
    }
}

pub fn len(value: &Value) -> HostResult<usize> {
    let _gil = gil::acquire();
    match value {
        Value::Str(s) => Ok(s.chars().count()),
        Value::Obj(obj) => obj_len(obj)?.ok_or_else(|| not_supported("has no len()", value)),
        other => Err(not_supported("has no len()", other)),
    }
}

/// Wrap a sequence index against the object's length
fn sequence_index(obj: &ObjRef, key: &Value) -> HostResult<usize> {
    let index = key.as_int().ok_or_else(|| {
        HostError::type_error(format!(
            "'{}' indices must be integers, not '{}'",
            obj.ty().name(),
            key.type_name()
        ))
    })?;
    let len = obj_len(obj)?
        .ok_or_else(|| HostError::system_error(format!("'{}' has sequence indexing but no __len__", obj.ty().name())))?;
    wrap_index(index, len)
}

pub fn getitem(container: &Value, key: &Value) -> HostResult<Value> {
    let _gil = gil::acquire();
    let Value::Obj(obj) = container else {
        return Err(not_supported("is not subscriptable", container));
    };
    match &obj.ty().slots().getitem {
        Some(GetItem::Mapping(get)) => bridge(get(obj, key), "__getitem__"),
        Some(GetItem::Sequence(get)) => {
            let index = sequence_index(obj, key)?;
            bridge(get(obj, index), "__getitem__")
        }
        None => Err(not_supported("is not subscriptable", container)),
    }
}

pub fn setitem(container: &Value, key: &Value, value: Value) -> HostResult<()> {
    let _gil = gil::acquire();
    let Value::Obj(obj) = container else {
        return Err(not_supported("does not support item assignment", container));
    };
    match &obj.ty().slots().setitem {
        Some(SetItem::Mapping(set)) => bridge(set(obj, key, value), "__setitem__"),
        Some(SetItem::Sequence(set)) => {
            let index = sequence_index(obj, key)?;
            bridge(set(obj, index, value), "__setitem__")
        }
        None => Err(not_supported("does not support item assignment", container)),
    }
}

pub fn delitem(container: &Value, key: &Value) -> HostResult<()> {
    let _gil = gil::acquire();
    let Value::Obj(obj) = container else {
        return Err(not_supported("does not support item deletion", container));
    };
    match &obj.ty().slots().delitem {
        Some(DelItem::Mapping(del)) => bridge(del(obj, key), "__delitem__"),
        Some(DelItem::Sequence(del)) => {
            let index = sequence_index(obj, key)?;
            bridge(del(obj, index), "__delitem__")
        }
        None => Err(not_supported("does not support item deletion", container)),
    }
}

/// `item in container`; falls back to iteration when there is no `__contains__`
pub fn contains(container: &Value, item: &Value) -> HostResult<bool> {
    let _gil = gil::acquire();
    match container {
        Value::Str(s) => match item {
            Value::Str(needle) => Ok(s.contains(&**needle)),
            other => Err(HostError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::Obj(obj) => match &obj.ty().slots().contains {
            Some(contains) => bridge(contains(obj, item), "__contains__"),
            None => {
                let iterator = iter(container)?;
                while let Some(candidate) = next(&iterator)? {
                    if eq(&candidate, item)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        },
        other => Err(not_supported("is not a container", other)),
    }
}

pub fn iter(value: &Value) -> HostResult<Value> {
    let _gil = gil::acquire();
    let Value::Obj(obj) = value else {
        return Err(not_supported("is not iterable", value));
    };
    match &obj.ty().slots().iter {
        Some(IterSlot::SelfIter) => Ok(value.clone()),
        Some(IterSlot::Factory(make)) => bridge(make(obj), "__iter__"),
        None => Err(not_supported("is not iterable", value)),
    }
}

/// Advance an iterator; `None` once exhausted
pub fn next(iterator: &Value) -> HostResult<Option<Value>> {
    let _gil = gil::acquire();
    let Value::Obj(obj) = iterator else {
        return Err(not_supported("is not an iterator", iterator));
    };
    let Some(next) = &obj.ty().slots().next else {
        return Err(not_supported("is not an iterator", iterator));
    };
    match bridge(next(obj), "__next__") {
        Err(err) if err.is(ExceptionKind::StopIteration) => Ok(None),
        other => other,
    }
}

/// Drain an iterable into a vector
pub fn collect(iterable: &Value) -> HostResult<Vec<Value>> {
    let iterator = iter(iterable)?;
    let mut items = Vec::new();
    while let Some(item) = next(&iterator)? {
        items.push(item);
    }
    Ok(items)
}

/// `-1` is reserved by the host to signal failure
#[inline]
fn fix_hash(hash: i64) -> i64 {
    if hash == -1 {
        -2
    } else {
        hash
    }
}

fn identity_hash(addr: usize) -> i64 {
    fix_hash((addr >> 4) as i64)
}

fn float_hash(x: f64) -> i64 {
    if x.is_finite() && x.fract() == 0.0 && x.abs() < 9.0e18 {
        return fix_hash(x as i64);
    }
    let mut hasher = DefaultHasher::new();
    x.to_bits().hash(&mut hasher);
    fix_hash(hasher.finish() as i64)
}

pub fn hash(value: &Value) -> HostResult<i64> {
    let _gil = gil::acquire();
    match value {
        Value::None => Ok(0x5f3d_1a2b),
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::Int(i) => Ok(fix_hash(*i)),
        Value::Float(x) => Ok(float_hash(*x)),
        Value::Str(s) => {
            let mut hasher = DefaultHasher::new();
            s.hash(&mut hasher);
            Ok(fix_hash(hasher.finish() as i64))
        }
        Value::Type(ty) => Ok(identity_hash(*ty as *const HostType as usize)),
        Value::Obj(obj) => match obj.ty().slots().hash_policy() {
            HashPolicy::Identity => Ok(identity_hash(obj.address())),
            HashPolicy::Unhashable => Err(HostError::type_error(format!("unhashable type: '{}'", obj.ty().name()))),
            HashPolicy::Custom(hash) => bridge(hash(obj), "__hash__").map(fix_hash),
        },
    }
}

fn primitive_ordering(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        (Value::Float(_), _) | (_, Value::Float(_)) => a.as_float()?.partial_cmp(&b.as_float()?),
        _ => Some(a.as_int()?.cmp(&b.as_int()?)),
    }
}

fn try_compare(obj: &ObjRef, other: &Value, op: CompareOp) -> HostResult<Option<bool>> {
    match obj.ty().slots().compare_slot(op) {
        Some(compare) => attempt(compare(obj, other), op.dunder()),
        None => Ok(None),
    }
}

/// Forward slot, then the swapped slot of the right operand
fn dispatch_compare(a: &Value, b: &Value, op: CompareOp) -> HostResult<Option<bool>> {
    if let Value::Obj(left) = a {
        if let Some(result) = try_compare(left, b, op)? {
            return Ok(Some(result));
        }
    }
    if let Value::Obj(right) = b {
        if let Some(result) = try_compare(right, a, op.swapped())? {
            return Ok(Some(result));
        }
    }
    Ok(None)
}

/// Rich comparison with reflection and the default identity equality
pub fn rich_compare(a: &Value, b: &Value, op: CompareOp) -> HostResult<bool> {
    let _gil = gil::acquire();
    if let Some(result) = dispatch_compare(a, b, op)? {
        return Ok(result);
    }
    if op == CompareOp::Ne {
        if let Some(equal) = dispatch_compare(a, b, CompareOp::Eq)? {
            return Ok(!equal);
        }
    }
    if let Some(ordering) = primitive_ordering(a, b) {
        return Ok(op.matches(ordering));
    }
    match op {
        CompareOp::Eq => Ok(a.is(b) || a == b),
        CompareOp::Ne => Ok(!(a.is(b) || a == b)),
        _ => Err(HostError::type_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            op.symbol(),
            a.type_name(),
            b.type_name()
        ))),
    }
}

/// Host equality (`==`)
pub fn eq(a: &Value, b: &Value) -> HostResult<bool> {
    if a.is(b) {
        return Ok(true);
    }
    rich_compare(a, b, CompareOp::Eq)
}

fn unsupported_operands(symbol: &str, a: &Value, b: &Value) -> HostError {
    HostError::type_error(format!(
        "unsupported operand type(s) for {symbol}: '{}' and '{}'",
        a.type_name(),
        b.type_name()
    ))
}

fn overflow() -> HostError {
    HostError::overflow_error("integer result out of range")
}

fn int_op(a: i64, b: i64, op: BinaryOp) -> HostResult<Option<Value>> {
    let zero = || HostError::zero_division("integer division or modulo by zero");
    let value = match op {
        BinaryOp::Add => Value::Int(a.checked_add(b).ok_or_else(overflow)?),
        BinaryOp::Sub => Value::Int(a.checked_sub(b).ok_or_else(overflow)?),
        BinaryOp::Mul => Value::Int(a.checked_mul(b).ok_or_else(overflow)?),
        BinaryOp::TrueDiv => {
            if b == 0 {
                return Err(HostError::zero_division("division by zero"));
            }
            Value::Float(a as f64 / b as f64)
        }
        BinaryOp::FloorDiv => {
            if b == 0 {
                return Err(zero());
            }
            let quotient = a.checked_div(b).ok_or_else(overflow)?;
            let adjust = a % b != 0 && ((a < 0) != (b < 0));
            Value::Int(if adjust { quotient - 1 } else { quotient })
        }
        BinaryOp::Mod => {
            if b == 0 {
                return Err(zero());
            }
            let rem = a.checked_rem(b).unwrap_or(0);
            Value::Int(if rem != 0 && ((rem < 0) != (b < 0)) { rem + b } else { rem })
        }
        BinaryOp::Pow => match u32::try_from(b) {
            Ok(exp) => Value::Int(a.checked_pow(exp).ok_or_else(overflow)?),
            Err(_) if b < 0 => Value::Float((a as f64).powf(b as f64)),
            Err(_) => return Err(overflow()),
        },
        BinaryOp::LShift => {
            if b < 0 {
                return Err(HostError::value_error("negative shift count"));
            }
            if a == 0 {
                Value::Int(0)
            } else if b >= 63 {
                return Err(overflow());
            } else {
                let shifted = a << b;
                if shifted >> b != a {
                    return Err(overflow());
                }
                Value::Int(shifted)
            }
        }
        BinaryOp::RShift => {
            if b < 0 {
                return Err(HostError::value_error("negative shift count"));
            }
            Value::Int(if b >= 64 { if a < 0 { -1 } else { 0 } } else { a >> b })
        }
        BinaryOp::And => Value::Int(a & b),
        BinaryOp::Or => Value::Int(a | b),
        BinaryOp::Xor => Value::Int(a ^ b),
        BinaryOp::MatMul => return Ok(None),
    };
    Ok(Some(value))
}

fn float_op(a: f64, b: f64, op: BinaryOp) -> HostResult<Option<Value>> {
    let divisor = || {
        if b == 0.0 {
            Err(HostError::zero_division("float division by zero"))
        } else {
            Ok(b)
        }
    };
    let value = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::TrueDiv => a / divisor()?,
        BinaryOp::FloorDiv => (a / divisor()?).floor(),
        BinaryOp::Mod => {
            let b = divisor()?;
            a - b * (a / b).floor()
        }
        BinaryOp::Pow => a.powf(b),
        _ => return Ok(None),
    };
    Ok(Some(Value::Float(value)))
}

fn primitive_binary(a: &Value, b: &Value, op: BinaryOp) -> HostResult<Option<Value>> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) if op == BinaryOp::Add => Ok(Some(Value::from(format!("{x}{y}")))),
        (Value::Str(s), count) | (count, Value::Str(s)) if op == BinaryOp::Mul && count.as_int().is_some() => {
            let times = usize::try_from(count.as_int().unwrap_or(0)).unwrap_or(0);
            Ok(Some(Value::from(s.repeat(times))))
        }
        (Value::Float(_), _) | (_, Value::Float(_)) => match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) => float_op(x, y, op),
            _ => Ok(None),
        },
        _ => match (a.as_int(), b.as_int()) {
            (Some(x), Some(y)) => int_op(x, y, op),
            _ => Ok(None),
        },
    }
}

/// `a op b`: forward slot, reflected slot of `b`, then primitive arithmetic
pub fn binary_op(a: &Value, b: &Value, op: BinaryOp) -> HostResult<Value> {
    let _gil = gil::acquire();
    if let Value::Obj(left) = a {
        if let Some(forward) = left.ty().slots().binary_slot(op) {
            if let Some(result) = attempt(forward(left, b), op.dunder())? {
                return Ok(result);
            }
        }
    }
    if let Value::Obj(right) = b {
        if let Some(reflected) = right.ty().slots().reflected_slot(op) {
            if let Some(result) = attempt(reflected(right, a), op.reflected_dunder())? {
                return Ok(result);
            }
        }
    }
    primitive_binary(a, b, op)?.ok_or_else(|| unsupported_operands(op.symbol(), a, b))
}

/// `a op= b`: mutate `a` in place when it supports it, else rebind to `a op b`
pub fn inplace_op(a: &Value, b: &Value, op: BinaryOp) -> HostResult<Value> {
    let _gil = gil::acquire();
    if let Value::Obj(left) = a {
        if let Some(inplace) = left.ty().slots().inplace_slot(op) {
            if attempt(inplace(left, b), op.inplace_dunder())?.is_some() {
                return Ok(a.clone());
            }
        }
    }
    binary_op(a, b, op)
}

pub fn unary_op(value: &Value, op: UnaryOp) -> HostResult<Value> {
    let _gil = gil::acquire();
    if let Value::Obj(obj) = value {
        return match obj.ty().slots().unary_slot(op) {
            Some(unary) => bridge(unary(obj), op.dunder()),
            None => Err(HostError::type_error(format!(
                "bad operand type for unary {}: '{}'",
                op.symbol(),
                value.type_name()
            ))),
        };
    }
    let result = match (value, op) {
        (Value::Float(x), UnaryOp::Neg) => Some(Value::Float(-x)),
        (Value::Float(x), UnaryOp::Pos) => Some(Value::Float(*x)),
        (Value::Float(x), UnaryOp::Abs) => Some(Value::Float(x.abs())),
        (other, op) => match (other.as_int(), op) {
            (Some(i), UnaryOp::Neg) => Some(Value::Int(i.checked_neg().ok_or_else(overflow)?)),
            (Some(i), UnaryOp::Pos) => Some(Value::Int(i)),
            (Some(i), UnaryOp::Abs) => Some(Value::Int(i.checked_abs().ok_or_else(overflow)?)),
            (Some(i), UnaryOp::Invert) => Some(Value::Int(!i)),
            _ => None,
        },
    };
    result.ok_or_else(|| {
        HostError::type_error(format!(
            "bad operand type for unary {}: '{}'",
            op.symbol(),
            value.type_name()
        ))
    })
}

fn float_repr(x: f64) -> String {
    if x.is_nan() {
        "nan".to_owned()
    } else if x.is_infinite() {
        if x > 0.0 { "inf" } else { "-inf" }.to_owned()
    } else if x.fract() == 0.0 && x.abs() < 1e16 {
        format!("{x:.1}")
    } else {
        format!("{x}")
    }
}

fn str_repr(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

pub fn repr(value: &Value) -> HostResult<String> {
    let _gil = gil::acquire();
    Ok(match value {
        Value::None => "None".to_owned(),
        Value::Bool(true) => "True".to_owned(),
        Value::Bool(false) => "False".to_owned(),
        Value::Int(i) => i.to_string(),
        Value::Float(x) => float_repr(*x),
        Value::Str(s) => str_repr(s),
        Value::Type(ty) => format!("<class '{}'>", ty.name()),
        Value::Obj(obj) => match &obj.ty().slots().repr {
            Some(repr) => bridge(repr(obj), "__repr__")?,
            None => format!("<{} object at {:#x}>", obj.ty().name(), obj.address()),
        },
    })
}

pub fn str(value: &Value) -> HostResult<String> {
    let _gil = gil::acquire();
    match value {
        Value::Str(s) => Ok(s.to_string()),
        Value::Obj(obj) => match &obj.ty().slots().str {
            Some(str) => bridge(str(obj), "__str__"),
            None => repr(value),
        },
        other => repr(other),
    }
}

/// Truth value: `__bool__`, then `__len__`, then true
pub fn truthy(value: &Value) -> HostResult<bool> {
    let _gil = gil::acquire();
    Ok(match value {
        Value::None => false,
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        Value::Float(x) => *x != 0.0,
        Value::Str(s) => !s.is_empty(),
        Value::Type(_) => true,
        Value::Obj(obj) => match &obj.ty().slots().bool {
            Some(boolean) => bridge(boolean(obj), "__bool__")?,
            None => obj_len(obj)?.map_or(true, |len| len > 0),
        },
    })
}

/// Instance check along the value's type chain
pub fn isinstance(value: &Value, ty: &HostType) -> bool {
    match value {
        Value::Obj(obj) => obj.is_instance(ty),
        _ => false,
    }
}

/// Request a validated buffer view from an exporter
pub fn get_buffer(value: &Value) -> HostResult<BufferView> {
    let _gil = gil::acquire();
    match value {
        Value::Obj(obj) => BufferView::new(obj),
        other => Err(not_supported("does not support the buffer protocol", other)),
    }
}
