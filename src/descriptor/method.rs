//! Method descriptors, receiver classification and return conventions

use crate::host::value::IntoValue;
use crate::host::{HookFailure, HookResult, HostError, HostResult, HostType, ObjRef, Value};
use crate::module::NativeClass;
use crate::protocol::BufferSpec;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// How a method or hook reports failure, inferred from its return type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnConvention {
    /// Plain value: cannot fail
    Always,
    /// `Result<T, E>`: `Err` becomes the raised exception
    Fallible,
    /// `Option<T>`: `None` means an exception is already pending
    Optional,
}

/// Member classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    Instance,
    Class,
    Static,
    Constructor,
    /// Protocol hook installed in the slot table
    Magic,
    Property,
}

/// Shape of a method's first parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Receiver {
    /// `&T`
    Shared,
    /// `&mut T`
    Exclusive,
    /// `ClassToken`
    Type,
    /// No receiver
    None,
}

impl Receiver {
    pub const fn kind(self) -> MethodKind {
        match self {
            Receiver::Shared | Receiver::Exclusive => MethodKind::Instance,
            Receiver::Type => MethodKind::Class,
            Receiver::None => MethodKind::Static,
        }
    }
}

/// Conversion of a hook's return value into the bridge's failure signal
pub trait IntoHookResult {
    type Output;

    const CONVENTION: ReturnConvention;

    fn into_hook_result(self) -> HookResult<Self::Output>;
}

macro_rules! always_succeeds {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoHookResult for $ty {
                type Output = $ty;

                const CONVENTION: ReturnConvention = ReturnConvention::Always;

                #[inline]
                fn into_hook_result(self) -> HookResult<$ty> {
                    Ok(self)
                }
            }
        )*
    };
}

always_succeeds!(
    (),
    bool,
    i32,
    i64,
    usize,
    f64,
    String,
    &'static str,
    Value,
    ObjRef,
    &'static HostType,
    BufferSpec,
);

impl<T: NativeClass> IntoHookResult for T {
    type Output = T;

    const CONVENTION: ReturnConvention = ReturnConvention::Always;

    #[inline]
    fn into_hook_result(self) -> HookResult<T> {
        Ok(self)
    }
}

impl<T, E: Into<HostError>> IntoHookResult for Result<T, E> {
    type Output = T;

    const CONVENTION: ReturnConvention = ReturnConvention::Fallible;

    #[inline]
    fn into_hook_result(self) -> HookResult<T> {
        self.map_err(|err| HookFailure::Raised(err.into()))
    }
}

impl<T> IntoHookResult for Result<T, HookFailure> {
    type Output = T;

    const CONVENTION: ReturnConvention = ReturnConvention::Fallible;

    #[inline]
    fn into_hook_result(self) -> HookResult<T> {
        self
    }
}

impl<T> IntoHookResult for Option<T> {
    type Output = T;

    const CONVENTION: ReturnConvention = ReturnConvention::Optional;

    #[inline]
    fn into_hook_result(self) -> HookResult<T> {
        self.ok_or(HookFailure::Pending)
    }
}

/// Finish a hook: apply the convention, then convert to a host value
#[inline]
pub(crate) fn finish<R>(result: R) -> HookResult<Value>
where
    R: IntoHookResult,
    R::Output: IntoValue,
{
    Ok(result.into_hook_result()?.into_value()?)
}

/// Handle to the class a class method was invoked on
#[derive(Clone, Copy)]
pub struct ClassToken {
    ty: &'static HostType,
}

impl ClassToken {
    pub(crate) fn new(ty: &'static HostType) -> Self {
        Self { ty }
    }

    pub fn ty(&self) -> &'static HostType {
        self.ty
    }

    pub fn name(&self) -> &'static str {
        self.ty.name()
    }

    /// Construct an instance of the class (or subclass) the method was called on
    pub fn instantiate(&self, args: &[Value]) -> HostResult<ObjRef> {
        self.ty.instantiate(args)
    }
}

impl fmt::Debug for ClassToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassToken({})", self.ty.name())
    }
}

/// Erased callable: (receiver, class it was looked up on, arguments)
pub type MethodFn =
    Arc<dyn Fn(Option<&ObjRef>, &'static HostType, &[Value]) -> HookResult<Value> + Send + Sync>;

#[inline]
fn erase<F>(f: F) -> MethodFn
where
    F: Fn(Option<&ObjRef>, &'static HostType, &[Value]) -> HookResult<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A classified member of a native class
pub struct MethodDescriptor {
    pub name: &'static str,
    pub kind: MethodKind,
    pub receiver: Receiver,
    pub convention: ReturnConvention,
    pub(crate) func: Option<MethodFn>,
}

impl MethodDescriptor {
    pub(crate) fn new(name: &'static str, receiver: Receiver, convention: ReturnConvention, func: MethodFn) -> Self {
        Self {
            name,
            kind: receiver.kind(),
            receiver,
            convention,
            func: Some(func),
        }
    }

    pub(crate) fn constructor(convention: ReturnConvention) -> Self {
        Self {
            name: "__init__",
            kind: MethodKind::Constructor,
            receiver: Receiver::None,
            convention,
            func: None,
        }
    }

    pub(crate) fn hook(name: &'static str, receiver: Receiver, convention: ReturnConvention) -> Self {
        Self {
            name,
            kind: MethodKind::Magic,
            receiver,
            convention,
            func: None,
        }
    }

    /// Invoke a callable method
    pub fn call(&self, receiver: Option<&ObjRef>, ty: &'static HostType, args: &[Value]) -> HookResult<Value> {
        match &self.func {
            Some(func) => func(receiver, ty, args),
            None => Err(HostError::type_error(format!("'{}' is not directly callable", self.name)).into()),
        }
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("receiver", &self.receiver)
            .field("convention", &self.convention)
            .finish()
    }
}

/// Marker for `Fn(&T, &[Value])` methods
pub struct SharedSelf;
/// Marker for `Fn(&mut T, &[Value])` methods
pub struct ExclusiveSelf;
/// Marker for `Fn(ClassToken, &[Value])` methods
pub struct ClassSelf;
/// Marker for `Fn(&[Value])` methods
pub struct NoSelf;

/// A Rust callable usable as a method of `T`, classified by its first parameter
pub trait IntoMethod<T, Marker>: Send + Sync + 'static {
    const RECEIVER: Receiver;
    const CONVENTION: ReturnConvention;

    fn into_method_fn(self) -> MethodFn;
}

fn receiver<'a>(receiver: Option<&'a ObjRef>, ty: &HostType) -> HookResult<&'a ObjRef> {
    receiver.ok_or_else(|| {
        HostError::type_error(format!("method of '{}' needs an instance receiver", ty.name())).into()
    })
}

impl<T, F, R> IntoMethod<T, (SharedSelf, R)> for F
where
    T: 'static,
    F: Fn(&T, &[Value]) -> R + Send + Sync + 'static,
    R: IntoHookResult,
    R::Output: IntoValue,
{
    const RECEIVER: Receiver = Receiver::Shared;
    const CONVENTION: ReturnConvention = R::CONVENTION;

    fn into_method_fn(self) -> MethodFn {
        erase(move |obj, ty, args| {
            let obj = receiver(obj, ty)?;
            let result = {
                let this = obj.borrow::<T>()?;
                self(&*this, args).into_hook_result()?
            };
            Ok(result.into_value()?)
        })
    }
}

impl<T, F, R> IntoMethod<T, (ExclusiveSelf, R)> for F
where
    T: 'static,
    F: Fn(&mut T, &[Value]) -> R + Send + Sync + 'static,
    R: IntoHookResult,
    R::Output: IntoValue,
{
    const RECEIVER: Receiver = Receiver::Exclusive;
    const CONVENTION: ReturnConvention = R::CONVENTION;

    fn into_method_fn(self) -> MethodFn {
        erase(move |obj, ty, args| {
            let obj = receiver(obj, ty)?;
            let result = {
                let mut this = obj.borrow_mut::<T>()?;
                self(&mut *this, args).into_hook_result()?
            };
            Ok(result.into_value()?)
        })
    }
}

impl<T, F, R> IntoMethod<T, (ClassSelf, R)> for F
where
    T: 'static,
    F: Fn(ClassToken, &[Value]) -> R + Send + Sync + 'static,
    R: IntoHookResult,
    R::Output: IntoValue,
{
    const RECEIVER: Receiver = Receiver::Type;
    const CONVENTION: ReturnConvention = R::CONVENTION;

    fn into_method_fn(self) -> MethodFn {
        erase(move |_, ty, args| finish(self(ClassToken::new(ty), args)))
    }
}

impl<T, F, R> IntoMethod<T, (NoSelf, R)> for F
where
    T: 'static,
    F: Fn(&[Value]) -> R + Send + Sync + 'static,
    R: IntoHookResult,
    R::Output: IntoValue,
{
    const RECEIVER: Receiver = Receiver::None;
    const CONVENTION: ReturnConvention = R::CONVENTION;

    fn into_method_fn(self) -> MethodFn {
        erase(move |_, _, args| finish(self(args)))
    }
}

/// Getter of a computed attribute
pub type PropertyGet = Arc<dyn Fn(&ObjRef) -> HookResult<Value> + Send + Sync>;
/// Setter of a computed attribute
pub type PropertySet = Arc<dyn Fn(&ObjRef, Value) -> HookResult<()> + Send + Sync>;

/// A computed attribute (data descriptor)
pub struct PropertyDescriptor {
    pub name: &'static str,
    pub(crate) get: PropertyGet,
    pub(crate) set: Option<PropertySet>,
}

impl PropertyDescriptor {
    pub fn is_writable(&self) -> bool {
        self.set.is_some()
    }
}

impl fmt::Debug for PropertyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyDescriptor")
            .field("name", &self.name)
            .field("writable", &self.is_writable())
            .finish()
    }
}
