//! pybridge - object bridge for native value types
//!
//! Turns plain Rust structs into first-class objects of a reference-counted,
//! garbage-collected dynamic object runtime (CPython-style object model).
//!
//! Pipeline, leaves first:
//! 1. `descriptor` classifies a type's members into a `TypeDescriptor`
//! 2. `layout` plans the per-instance record layout
//! 3. `inherit` resolves and validates the base type
//! 4. `protocol` turns declared hooks into slot tables
//! 5. `module` registers one `HostType` per definition
//!
//! At runtime the host (`host::ops`) dispatches through the slot tables and
//! `lifecycle` owns allocation, construction, finalization and deallocation.

pub mod allocator;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod ffi;
pub mod gc;
pub mod host;
pub mod inherit;
pub mod layout;
pub mod lifecycle;
pub mod logging;
pub mod module;
pub mod protocol;
pub mod strong_ref;

pub use config::RuntimeConfig;
pub use descriptor::{
    ClassBuilder, ClassToken, FeatureFlags, FieldDescriptor, FieldType, FieldValue,
    IntoHookResult, MethodDescriptor, MethodKind, Receiver, ReturnConvention, TypeDescriptor,
    Visibility,
};
pub use error::BuildError;
pub use host::{
    err::{ExceptionKind, HookFailure, HookResult, HostError, HostResult},
    gil::with_gil,
    HostType, ObjRef, PayloadMut, PayloadRef, Value,
};
pub use inherit::{BasePayload, BuiltinBase};
pub use lifecycle::create;
pub use module::{register, type_object, ModuleDef, NativeClass};
pub use protocol::{BinaryOp, BufferSpec, CompareOp, UnaryOp};
pub use strong_ref::StrongRef;

/// Initialize the runtime with an explicit configuration
///
/// Safe to call more than once; the latest configuration wins for the
/// allocator budget, collector threshold and freelist switch.
pub fn init(config: &RuntimeConfig) {
    logging::init();
    let _gil = host::gil::acquire();
    allocator::init(&config.allocator);
    gc::init(&config.gc);
    lifecycle::init(&config.freelist);
    host::builtins::init();
    logging::log_runtime_init();
}

/// Initialize the runtime from environment variables
pub fn init_default() {
    init(&RuntimeConfig::from_env());
}

/// Run a final collection and release pooled allocations
pub fn shutdown() {
    let _gil = host::gil::acquire();
    gc::cleanup();
    lifecycle::drain_freelists();
    logging::log_runtime_shutdown();
}
