//! Type registration - one host type per native class
//!
//! `register::<T>()` runs the whole build pipeline for `T`: describe,
//! classify, resolve the base, plan the layout, compose slots and publish the
//! type object. Every structural problem surfaces here as a `BuildError`;
//! nothing is deferred to instance time.

use crate::descriptor::{ClassBuilder, ClassParts, CtorSpec, FeatureFlags};
use crate::error::BuildError;
use crate::host::builtins;
use crate::host::err::bridge;
use crate::host::types::{Constructor, PayloadVTable, TypeSpec};
use crate::host::{gil, registry, HostError, HostResult, HostType, TypeKind, Value};
use crate::inherit;
use crate::layout::{LayoutRequest, RecordLayout, Region};
use crate::lifecycle;
use crate::logging::{debug, log_type_registered};
use crate::protocol::{DelItem, GetItem, SetItem, SlotTable};
use std::any::TypeId;
use std::cell::RefCell;
use std::sync::Arc;

/// A Rust type exposed to the host as a class
///
/// ```ignore
/// struct Point { x: i64, y: i64 }
///
/// impl NativeClass for Point {
///     const NAME: &'static str = "Point";
///
///     fn describe(class: &mut ClassBuilder<Self>) {
///         class
///             .field("x", field!(Point, x))
///             .field("y", field!(Point, y))
///             .fields_constructor();
///     }
/// }
/// ```
pub trait NativeClass: Send + 'static {
    const NAME: &'static str;

    const FLAGS: FeatureFlags = FeatureFlags::new();

    fn describe(class: &mut ClassBuilder<Self>)
    where
        Self: Sized;
}

thread_local! {
    static IN_PROGRESS: RefCell<Vec<TypeId>> = const { RefCell::new(Vec::new()) };
}

/// Marks `T` as being registered for the lifetime of the guard
struct InProgress(TypeId);

impl InProgress {
    fn enter(id: TypeId, ty: &'static str) -> Result<Self, BuildError> {
        IN_PROGRESS.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.contains(&id) {
                return Err(BuildError::RecursiveRegistration { ty });
            }
            stack.push(id);
            Ok(InProgress(id))
        })
    }
}

impl Drop for InProgress {
    fn drop(&mut self) {
        IN_PROGRESS.with(|stack| stack.borrow_mut().retain(|id| *id != self.0));
    }
}

/// Register `T`, returning the existing type object if already registered
pub fn register<T: NativeClass>() -> Result<&'static HostType, BuildError> {
    let _gil = gil::acquire();
    if let Some(ty) = registry::lookup_of::<T>() {
        return Ok(ty);
    }
    let _registering = InProgress::enter(TypeId::of::<T>(), T::NAME)?;
    builtins::init();

    let mut class = ClassBuilder::<T>::new(T::NAME, T::FLAGS);
    T::describe(&mut class);
    let ClassParts {
        mut descriptor,
        base: base_spec,
        slots,
        attrs,
        ctor,
        strong_ref_targets,
    } = class.finish()?;

    let base = inherit::resolve_base(T::NAME, descriptor.flags, base_spec)?;
    let flags = descriptor.flags.inherit(base.flags());
    flags.validate(T::NAME)?;

    for target in &strong_ref_targets {
        if target.type_id != TypeId::of::<T>() && registry::lookup(target.type_id).is_none() {
            return Err(BuildError::UnregisteredRefTarget {
                ty: T::NAME,
                field: target.field,
                target: target.name,
            });
        }
    }

    let slots = inherit::compose_slots(slots, base);
    check_slots(T::NAME, &slots, base)?;

    let parent_layout = (!std::ptr::eq(base, builtins::object_type())).then(|| base.layout());
    let layout = RecordLayout::plan(LayoutRequest {
        ty: T::NAME,
        parent: parent_layout,
        storage: None,
        payload: Some(Region::of::<T>()),
        dict: flags.has_dict(),
        weakref: flags.has_weakref(),
        fields: descriptor.public_fields().map(|field| field.name).collect(),
    })?;

    let ctor_fields = inherit::flatten_ctor_fields(base, &descriptor.fields);
    let gc_fields = inherit::compose_gc_fields(base, &descriptor.fields);
    let strong_ref_fields = inherit::compose_strong_refs(base, &descriptor.fields);
    let constructor = ctor.map(|ctor| make_constructor::<T>(ctor, ctor_fields.clone()));

    descriptor.flags = flags;
    descriptor.parent = inherit::parent_descriptor(base);
    let descriptor = Arc::new(descriptor);

    let size = layout.size;
    let ty = HostType::leak(TypeSpec {
        name: T::NAME,
        kind: TypeKind::Native,
        doc: descriptor.doc,
        base: Some(base),
        layout,
        flags,
        slots,
        attrs,
        storage: base.storage().copied(),
        payload: Some(PayloadVTable::of::<T>()),
        descriptor: Some(descriptor),
        constructor,
        ctor_fields,
        gc_fields,
        strong_ref_fields,
    });
    registry::insert(TypeId::of::<T>(), ty);
    log_type_registered(T::NAME, size, base.name());
    Ok(ty)
}

/// Slot combinations that only make sense together
fn check_slots(ty: &'static str, slots: &SlotTable, base: &HostType) -> Result<(), BuildError> {
    let sequence = matches!(slots.getitem, Some(GetItem::Sequence(_)))
        || matches!(slots.setitem, Some(SetItem::Sequence(_)))
        || matches!(slots.delitem, Some(DelItem::Sequence(_)));
    if sequence && slots.len.is_none() {
        return Err(BuildError::SequenceIndexWithoutLen { ty });
    }
    if slots.missing.is_some() && !base.is_subtype(builtins::dict_type()) {
        return Err(BuildError::MissingWithoutDictBase { ty });
    }
    Ok(())
}

fn make_constructor<T: NativeClass>(
    ctor: CtorSpec<T>,
    fields: Vec<Arc<crate::descriptor::FieldDescriptor>>,
) -> Constructor {
    fn check<T: 'static>(ty: &'static HostType) -> HostResult<()> {
        if ty.native_type_id() == Some(TypeId::of::<T>()) {
            Ok(())
        } else {
            Err(HostError::type_error(format!("constructor of '{}' cannot build '{}'", ty.name(), std::any::type_name::<T>())))
        }
    }

    match ctor {
        CtorSpec::Custom(build) => Arc::new(move |ty: &'static HostType, args: &[Value]| {
            check::<T>(ty)?;
            let raw = lifecycle::allocate(ty)?;
            let payload = bridge(build(args), "__init__")?;
            Ok(raw.finish(payload))
        }),
        CtorSpec::Fields(default) => Arc::new(move |ty: &'static HostType, args: &[Value]| {
            check::<T>(ty)?;
            let raw = lifecycle::allocate(ty)?;
            let mut payload = default();
            lifecycle::fill_fields(&mut payload, &fields, args)?;
            Ok(raw.finish(payload))
        }),
    }
}

/// Type object of `T`, registering it on first use
pub fn type_object<T: NativeClass>() -> HostResult<&'static HostType> {
    register::<T>().map_err(HostError::from)
}

type Registrar = fn() -> Result<&'static HostType, BuildError>;

/// An ordered group of classes registered together
///
/// Classes are registered in the order they were added, so a parent must be
/// added before its children and StrongRef targets before their holders.
pub struct ModuleDef {
    name: &'static str,
    entries: Vec<(&'static str, Registrar)>,
}

impl ModuleDef {
    pub fn new(name: &'static str) -> Self {
        Self { name, entries: Vec::new() }
    }

    pub fn add<T: NativeClass>(&mut self) -> &mut Self {
        self.entries.push((T::NAME, register::<T>));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Register every class, stopping at the first failure
    pub fn init(&self) -> Result<Module, BuildError> {
        let _gil = gil::acquire();
        let mut types = Vec::with_capacity(self.entries.len());
        for (name, register) in &self.entries {
            debug!(module = self.name, class = name, "registering class");
            types.push(register()?);
        }
        Ok(Module { name: self.name, types })
    }
}

/// An initialized module: its classes in registration order
#[derive(Debug)]
pub struct Module {
    name: &'static str,
    types: Vec<&'static HostType>,
}

impl Module {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get(&self, name: &str) -> Option<&'static HostType> {
        self.types.iter().copied().find(|ty| ty.name() == name)
    }

    pub fn types(&self) -> &[&'static HostType] {
        &self.types
    }
}
