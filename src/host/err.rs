//! Host exceptions and the hook error bridge
//!
//! Hooks never raise directly. They signal failure through `HookResult`:
//! - `Raised(err)`: the failure carries its exception
//! - `Pending`: the hook already raised via [`raise`]; take it from the thread state
//! - `NotImplemented`: operand not supported, let the host try the other side
//!
//! [`resolve`] turns any of those into the `HostError` the caller sees.

use crate::logging::{log_hook_failure, log_invariant_violation};
use std::cell::RefCell;
use std::fmt;

/// Exception classes known to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    Exception,
    TypeError,
    ValueError,
    IndexError,
    KeyError,
    AttributeError,
    FrozenInstanceError,
    ArithmeticError,
    OverflowError,
    ZeroDivisionError,
    MemoryError,
    BufferError,
    RuntimeError,
    NotImplementedError,
    SystemError,
    StopIteration,
}

impl ExceptionKind {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Exception => "Exception",
            Self::TypeError => "TypeError",
            Self::ValueError => "ValueError",
            Self::IndexError => "IndexError",
            Self::KeyError => "KeyError",
            Self::AttributeError => "AttributeError",
            Self::FrozenInstanceError => "FrozenInstanceError",
            Self::ArithmeticError => "ArithmeticError",
            Self::OverflowError => "OverflowError",
            Self::ZeroDivisionError => "ZeroDivisionError",
            Self::MemoryError => "MemoryError",
            Self::BufferError => "BufferError",
            Self::RuntimeError => "RuntimeError",
            Self::NotImplementedError => "NotImplementedError",
            Self::SystemError => "SystemError",
            Self::StopIteration => "StopIteration",
        }
    }

    /// Direct base class in the exception hierarchy
    pub const fn base(self) -> Option<Self> {
        match self {
            Self::Exception => None,
            Self::FrozenInstanceError => Some(Self::AttributeError),
            Self::NotImplementedError => Some(Self::RuntimeError),
            Self::OverflowError | Self::ZeroDivisionError => Some(Self::ArithmeticError),
            _ => Some(Self::Exception),
        }
    }

    pub fn is_subclass_of(self, other: Self) -> bool {
        let mut current = Some(self);
        while let Some(kind) = current {
            if kind == other {
                return true;
            }
            current = kind.base();
        }
        false
    }
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A host exception instance
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct HostError {
    pub kind: ExceptionKind,
    pub message: String,
}

pub type HostResult<T> = Result<T, HostError>;

impl HostError {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::ValueError, message)
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::IndexError, message)
    }

    pub fn key_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::KeyError, message)
    }

    pub fn attribute_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::AttributeError, message)
    }

    pub fn frozen(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::FrozenInstanceError, message)
    }

    pub fn memory_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::MemoryError, message)
    }

    pub fn buffer_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::BufferError, message)
    }

    pub fn runtime_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::RuntimeError, message)
    }

    pub fn system_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::SystemError, message)
    }

    pub fn overflow_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::OverflowError, message)
    }

    pub fn zero_division(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::ZeroDivisionError, message)
    }

    pub fn stop_iteration() -> Self {
        Self::new(ExceptionKind::StopIteration, "")
    }

    /// True if this exception is an instance of `kind` (subclass-aware)
    pub fn is(&self, kind: ExceptionKind) -> bool {
        self.kind.is_subclass_of(kind)
    }
}

thread_local! {
    static PENDING: RefCell<Option<HostError>> = const { RefCell::new(None) };
}

/// Set the pending exception, replacing any previous one
pub fn raise(err: HostError) {
    PENDING.with(|pending| *pending.borrow_mut() = Some(err));
}

/// True if an exception is pending on this thread
pub fn occurred() -> bool {
    PENDING.with(|pending| pending.borrow().is_some())
}

/// Take the pending exception, leaving none
pub fn take() -> Option<HostError> {
    PENDING.with(|pending| pending.borrow_mut().take())
}

/// Discard the pending exception
pub fn clear() {
    take();
}

/// Failure signaled by a hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookFailure {
    Raised(HostError),
    Pending,
    NotImplemented,
}

pub type HookResult<T> = Result<T, HookFailure>;

impl From<HostError> for HookFailure {
    fn from(err: HostError) -> Self {
        Self::Raised(err)
    }
}

/// Convert a hook failure into the exception the host raises
pub fn resolve(failure: HookFailure, hook: &str) -> HostError {
    let err = match failure {
        HookFailure::Raised(err) => err,
        HookFailure::Pending => match take() {
            Some(err) => err,
            None => {
                let detail = format!("{hook} returned no value without setting an exception");
                log_invariant_violation("missing pending exception", &detail);
                HostError::system_error(detail)
            }
        },
        HookFailure::NotImplemented => {
            HostError::new(ExceptionKind::NotImplementedError, format!("{hook} is not implemented for this operand"))
        }
    };
    log_hook_failure(hook, &err.to_string());
    err
}

/// Resolve a hook result into a host result
#[inline]
pub fn bridge<T>(result: HookResult<T>, hook: &str) -> HostResult<T> {
    result.map_err(|failure| resolve(failure, hook))
}
