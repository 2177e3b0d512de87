//! Builtin types implemented by the host itself
//!
//! `object` is the root of every hierarchy. `list` and `dict` carry their
//! contents in builtin storage, which a native subclass inherits at the same
//! offset; `method` and `list_iterator` are ordinary native classes the host
//! creates on demand.

pub mod dict;
pub mod iter;
pub mod list;
pub mod method;

pub use iter::ListIterator;
pub use method::BoundMethod;

use super::err::{HostError, HostResult};
use super::object::ObjRef;
use super::types::{Constructor, HostType, TypeKind, TypeSpec};
use crate::descriptor::{FeatureFlags, MethodDescriptor, Receiver, ReturnConvention};
use crate::host::{ClassAttr, HookResult, Value};
use crate::layout::RecordLayout;
use crate::lifecycle;
use crate::protocol::{HashPolicy, SlotTable};
use once_cell::sync::Lazy;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

static OBJECT: Lazy<&'static HostType> = Lazy::new(|| {
    let slots = SlotTable {
        hash: Some(HashPolicy::Identity),
        ..SlotTable::default()
    };
    let constructor: Constructor = Arc::new(|ty: &'static HostType, args: &[Value]| {
        if !args.is_empty() {
            return Err(HostError::type_error(format!("{}() takes no arguments", ty.name())));
        }
        lifecycle::construct_empty(ty)
    });
    HostType::leak(TypeSpec {
        name: "object",
        kind: TypeKind::Builtin,
        doc: Some("The base class of the class hierarchy."),
        base: None,
        layout: RecordLayout::header_only(),
        flags: FeatureFlags::new(),
        slots,
        attrs: HashMap::new(),
        storage: None,
        payload: None,
        descriptor: None,
        constructor: Some(constructor),
        ctor_fields: Vec::new(),
        gc_fields: Vec::new(),
        strong_ref_fields: Vec::new(),
    })
});

static LIST: Lazy<&'static HostType> = Lazy::new(list::build_type);

static DICT: Lazy<&'static HostType> = Lazy::new(dict::build_type);

/// The root type
pub fn object_type() -> &'static HostType {
    *OBJECT
}

pub fn list_type() -> &'static HostType {
    *LIST
}

pub fn dict_type() -> &'static HostType {
    *DICT
}

/// Create the builtin type objects
///
/// Native builtins (`method`, `list_iterator`, `weakref`) register lazily on
/// first use instead; registering them here would re-enter registration.
pub fn init() {
    Lazy::force(&OBJECT);
    Lazy::force(&LIST);
    Lazy::force(&DICT);
}

/// Everything a builtin container type differs in
pub(crate) struct BuiltinSpec {
    pub name: &'static str,
    pub doc: &'static str,
    pub layout: RecordLayout,
    pub slots: SlotTable,
    pub attrs: HashMap<String, ClassAttr>,
    pub storage: super::types::StorageVTable,
    pub constructor: Constructor,
}

pub(crate) fn leak_container(spec: BuiltinSpec) -> &'static HostType {
    let base = object_type();
    let mut slots = spec.slots;
    slots.inherit(base.slots());
    HostType::leak(TypeSpec {
        name: spec.name,
        kind: TypeKind::Builtin,
        doc: Some(spec.doc),
        base: Some(base),
        layout: spec.layout,
        flags: FeatureFlags::new(),
        slots,
        attrs: spec.attrs,
        storage: Some(spec.storage),
        payload: None,
        descriptor: None,
        constructor: Some(spec.constructor),
        ctor_fields: Vec::new(),
        gc_fields: Vec::new(),
        strong_ref_fields: Vec::new(),
    })
}

/// A builtin method taking the receiver and positional arguments
pub(crate) fn builtin_method<F>(name: &'static str, f: F) -> (String, ClassAttr)
where
    F: Fn(&ObjRef, &[Value]) -> HostResult<Value> + Send + Sync + 'static,
{
    let func = Arc::new(move |receiver: Option<&ObjRef>, _ty: &'static HostType, args: &[Value]| -> HookResult<Value> {
        let receiver = receiver
            .ok_or_else(|| HostError::type_error(format!("'{name}' needs a receiver")))?;
        Ok(f(receiver, args)?)
    });
    let method = MethodDescriptor::new(name, Receiver::Shared, ReturnConvention::Fallible, func);
    (name.to_owned(), ClassAttr::Method(Arc::new(method)))
}

/// Check a builtin method's positional argument count
pub(crate) fn arity(name: &str, args: &[Value], min: usize, max: usize) -> HostResult<()> {
    if (min..=max).contains(&args.len()) {
        return Ok(());
    }
    let expected = if min == max { min.to_string() } else { format!("{min} to {max}") };
    Err(HostError::type_error(format!(
        "{name}() takes {expected} arguments ({} given)",
        args.len()
    )))
}

thread_local! {
    static REPR_ACTIVE: RefCell<HashSet<usize>> = RefCell::new(HashSet::new());
}

/// Marks a container as being rendered so self-references print as `...`
pub(crate) struct ReprGuard(usize);

impl ReprGuard {
    /// `None` if `obj` is already being rendered further up the stack
    pub(crate) fn enter(obj: &ObjRef) -> Option<Self> {
        let address = obj.address();
        REPR_ACTIVE
            .with(|active| active.borrow_mut().insert(address))
            .then_some(ReprGuard(address))
    }
}

impl Drop for ReprGuard {
    fn drop(&mut self) {
        REPR_ACTIVE.with(|active| active.borrow_mut().remove(&self.0));
    }
}
