//! Protocol hook names
//!
//! Dunder names the host dispatches through slots. A plain method declared
//! under one of these names would never be called by the protocol machinery,
//! so registration rejects it.

use super::number::{BinaryOp, CompareOp, UnaryOp};

/// Which slot a hook name maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookSlot {
    Binary(BinaryOp),
    Reflected(BinaryOp),
    Inplace(BinaryOp),
    Unary(UnaryOp),
    Compare(CompareOp),
    Other(&'static str),
}

const OTHER_HOOKS: &[&str] = &[
    "__new__",
    "__init__",
    "__del__",
    "__repr__",
    "__str__",
    "__hash__",
    "__bool__",
    "__len__",
    "__getitem__",
    "__setitem__",
    "__delitem__",
    "__contains__",
    "__iter__",
    "__next__",
    "__call__",
    "__getattr__",
    "__getattribute__",
    "__setattr__",
    "__delattr__",
    "__get__",
    "__set__",
    "__delete__",
    "__missing__",
    "__buffer__",
    "__release_buffer__",
    "__traverse__",
    "__clear__",
];

/// Classify a member name as a protocol hook
pub fn classify(name: &str) -> Option<HookSlot> {
    if !(name.len() > 4 && name.starts_with("__") && name.ends_with("__")) {
        return None;
    }

    for op in BinaryOp::ALL {
        if name == op.dunder() {
            return Some(HookSlot::Binary(op));
        }
        if name == op.reflected_dunder() {
            return Some(HookSlot::Reflected(op));
        }
        if name == op.inplace_dunder() {
            return Some(HookSlot::Inplace(op));
        }
    }
    for op in UnaryOp::ALL {
        if name == op.dunder() {
            return Some(HookSlot::Unary(op));
        }
    }
    for op in CompareOp::ALL {
        if name == op.dunder() {
            return Some(HookSlot::Compare(op));
        }
    }

    OTHER_HOOKS.iter().find(|&&hook| hook == name).map(|&hook| HookSlot::Other(hook))
}

#[inline]
pub fn is_hook_name(name: &str) -> bool {
    classify(name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_names_map_to_their_slots() {
        assert_eq!(classify("__add__"), Some(HookSlot::Binary(BinaryOp::Add)));
        assert_eq!(classify("__rmul__"), Some(HookSlot::Reflected(BinaryOp::Mul)));
        assert_eq!(classify("__iadd__"), Some(HookSlot::Inplace(BinaryOp::Add)));
        assert_eq!(classify("__neg__"), Some(HookSlot::Unary(UnaryOp::Neg)));
        assert_eq!(classify("__le__"), Some(HookSlot::Compare(CompareOp::Le)));
        assert_eq!(classify("__len__"), Some(HookSlot::Other("__len__")));
    }

    #[test]
    fn ordinary_and_private_names_are_not_hooks() {
        assert_eq!(classify("length"), None);
        assert_eq!(classify("_private"), None);
        assert_eq!(classify("__"), None);
        assert_eq!(classify("__custom_thing__"), None);
    }
}
