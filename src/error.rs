//! Registration errors
//!
//! Structural problems with a class definition surface here, when the type is
//! registered at module load, and never at instance time. The checks Rust can
//! express statically (`FeatureFlags::checked`, `base_payload!`) fail
//! compilation instead.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("type '{ty}': a freelist cannot be combined with a dict slot")]
    FreelistWithDict { ty: &'static str },

    #[error("type '{ty}': a freelist cannot be combined with a weakref slot")]
    FreelistWithWeakref { ty: &'static str },

    #[error("type '{ty}': base payload must be the first field, found at offset {offset}")]
    BasePayloadNotFirst { ty: &'static str, offset: usize },

    #[error("type '{child}': parent type '{parent}' must be registered first")]
    ParentNotRegistered { child: &'static str, parent: &'static str },

    #[error("type '{ty}': base declared more than once")]
    MultipleBases { ty: &'static str },

    #[error("type '{child}': cannot inherit a mutable type from frozen '{parent}'")]
    FrozenParent { child: &'static str, parent: &'static str },

    #[error("type '{ty}': member '{name}' declared more than once")]
    DuplicateMember { ty: &'static str, name: String },

    #[error("type '{ty}': '{name}' is a protocol hook; declare it through its typed hook")]
    ReservedMagicName { ty: &'static str, name: String },

    #[error("type '{ty}': sequence indexing requires __len__")]
    SequenceIndexWithoutLen { ty: &'static str },

    #[error("type '{ty}': '{member}' mutates instances of a frozen type")]
    MutationOnFrozen { ty: &'static str, member: &'static str },

    #[error("type '{ty}': __missing__ requires a dict base")]
    MissingWithoutDictBase { ty: &'static str },

    #[error("type '{ty}': strong reference field '{field}' targets unregistered type '{target}'")]
    UnregisteredRefTarget {
        ty: &'static str,
        field: &'static str,
        target: &'static str,
    },

    #[error("type '{ty}': class attribute '{name}' could not be created: {detail}")]
    ClassAttr { ty: &'static str, name: String, detail: String },

    #[error("type '{ty}': registration re-entered while describing the type")]
    RecursiveRegistration { ty: &'static str },

    #[error("type '{ty}': layout incompatible with its base: {detail}")]
    LayoutMismatch { ty: &'static str, detail: String },

    #[error("type '{ty}': record too large")]
    LayoutOverflow { ty: &'static str },
}

impl BuildError {
    /// Name of the type whose registration failed
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::FreelistWithDict { ty }
            | Self::FreelistWithWeakref { ty }
            | Self::BasePayloadNotFirst { ty, .. }
            | Self::MultipleBases { ty }
            | Self::DuplicateMember { ty, .. }
            | Self::ReservedMagicName { ty, .. }
            | Self::SequenceIndexWithoutLen { ty }
            | Self::MutationOnFrozen { ty, .. }
            | Self::MissingWithoutDictBase { ty }
            | Self::UnregisteredRefTarget { ty, .. }
            | Self::ClassAttr { ty, .. }
            | Self::RecursiveRegistration { ty }
            | Self::LayoutMismatch { ty, .. }
            | Self::LayoutOverflow { ty } => *ty,
            Self::ParentNotRegistered { child, .. } | Self::FrozenParent { child, .. } => *child,
        }
    }
}

impl From<BuildError> for crate::host::HostError {
    fn from(err: BuildError) -> Self {
        crate::host::HostError::system_error(err.to_string())
    }
}
