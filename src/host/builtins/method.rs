//! Bound methods - a method descriptor paired with its receiver

use crate::descriptor::{ClassBuilder, MethodDescriptor, MethodKind};
use crate::field;
use crate::host::err::{bridge, HostError, HostResult};
use crate::host::{HostType, ObjRef, Value};
use crate::lifecycle;
use crate::module::NativeClass;
use std::sync::Arc;

/// `method`: what attribute lookup returns for a declared method
///
/// Instance methods bind their receiver; class methods bind the class the
/// lookup started from; static methods bind nothing. An instance method
/// looked up on the class itself is unbound and takes the receiver as its
/// first argument.
pub struct BoundMethod {
    receiver: Value,
    owner: &'static HostType,
    method: Arc<MethodDescriptor>,
}

impl BoundMethod {
    pub(crate) fn bind(receiver: Value, owner: &'static HostType, method: Arc<MethodDescriptor>) -> HostResult<ObjRef> {
        lifecycle::create(BoundMethod { receiver, owner, method })
    }

    pub fn name(&self) -> &'static str {
        self.method.name
    }

    pub fn receiver(&self) -> &Value {
        &self.receiver
    }

    fn invoke(&self, args: &[Value]) -> HostResult<Value> {
        let name = self.method.name;
        match (&self.receiver, self.method.kind) {
            (Value::Obj(obj), MethodKind::Instance) => bridge(self.method.call(Some(obj), obj.ty(), args), name),
            (_, MethodKind::Instance) => {
                let Some((Value::Obj(obj), rest)) = args.split_first() else {
                    return Err(HostError::type_error(format!(
                        "unbound method {}.{name}() needs an argument",
                        self.owner.name()
                    )));
                };
                if !obj.is_instance(self.owner) {
                    return Err(HostError::type_error(format!(
                        "descriptor '{name}' for '{}' objects doesn't apply to a '{}' object",
                        self.owner.name(),
                        obj.ty().name()
                    )));
                }
                bridge(self.method.call(Some(obj), obj.ty(), rest), name)
            }
            _ => bridge(self.method.call(None, self.owner, args), name),
        }
    }

    fn repr(&self) -> String {
        match &self.receiver {
            Value::Obj(obj) => format!(
                "<bound method {}.{} of <{} object at {:#x}>>",
                self.owner.name(),
                self.method.name,
                obj.ty().name(),
                obj.address()
            ),
            Value::Type(ty) => format!("<bound method {}.{} of <class '{}'>>", self.owner.name(), self.method.name, ty.name()),
            _ => format!("<function {}.{}>", self.owner.name(), self.method.name),
        }
    }
}

impl NativeClass for BoundMethod {
    const NAME: &'static str = "method";

    fn describe(class: &mut ClassBuilder<Self>) {
        class
            .field("_receiver", field!(BoundMethod, receiver))
            .call(BoundMethod::invoke)
            .repr(BoundMethod::repr);
    }
}
