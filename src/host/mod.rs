//! Host runtime surface - the dynamic object system the bridge plugs into
//!
//! Design: A CPython-style object model reduced to what the bridge needs:
//! 1. A global interpreter lock serializing every object operation
//! 2. `Value` / `ObjRef` handles with refcount-owning semantics
//! 3. `HostType` type objects with slot tables and class attributes
//! 4. Pending-exception state and the hook error bridge
//! 5. Abstract operations (`ops`) and generic attribute access (`attr`)
//! 6. Builtin types: `object`, `list`, `dict`, `weakref`, `method`

pub mod attr;
pub mod buffer;
pub mod builtins;
pub mod err;
pub mod gil;
pub mod ops;
pub mod weakref;

mod object;
pub(crate) mod types;
pub mod value;

#[cfg(test)]
mod tests;

pub use buffer::BufferView;
pub use err::{ExceptionKind, HookFailure, HookResult, HostError, HostResult};
pub use object::{ObjRef, PayloadMut, PayloadRef};
pub use types::{registry, ClassAttr, Constructor, HostType, PayloadVTable, StorageVTable, TypeKind};
pub use value::{IntoValue, Value};
