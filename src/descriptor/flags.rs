//! Declared per-type features

use crate::error::BuildError;

/// Feature flags a native class declares through `NativeClass::FLAGS`
///
/// All constructors are `const`, and [`FeatureFlags::checked`] rejects invalid
/// combinations during constant evaluation, so
///
/// ```compile_fail
/// use pybridge::FeatureFlags;
/// const BAD: FeatureFlags = FeatureFlags::new().freelist(8).dict().checked();
/// ```
///
/// fails to compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct FeatureFlags {
    frozen: bool,
    dict: bool,
    weakref: bool,
    freelist: usize,
}

impl FeatureFlags {
    pub const fn new() -> Self {
        Self {
            frozen: false,
            dict: false,
            weakref: false,
            freelist: 0,
        }
    }

    /// Reject attribute mutation after construction
    pub const fn frozen(mut self) -> Self {
        self.frozen = true;
        self
    }

    /// Per-instance dynamic attribute dict
    pub const fn dict(mut self) -> Self {
        self.dict = true;
        self
    }

    /// Weak reference support
    pub const fn weakref(mut self) -> Self {
        self.weakref = true;
        self
    }

    /// Recycle up to `capacity` records through a freelist (0 disables)
    pub const fn freelist(mut self, capacity: usize) -> Self {
        self.freelist = capacity;
        self
    }

    /// Const-evaluated validation; panics (a compile error in const context)
    /// on combinations the layout cannot support
    pub const fn checked(self) -> Self {
        if self.freelist > 0 && self.dict {
            panic!("a freelist cannot be combined with a dict slot");
        }
        if self.freelist > 0 && self.weakref {
            panic!("a freelist cannot be combined with a weakref slot");
        }
        self
    }

    pub const fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub const fn has_dict(&self) -> bool {
        self.dict
    }

    pub const fn has_weakref(&self) -> bool {
        self.weakref
    }

    pub const fn freelist_capacity(&self) -> usize {
        self.freelist
    }

    /// Flags of a subclass: dict and weakref slots are inherited
    pub(crate) const fn inherit(self, parent: FeatureFlags) -> Self {
        Self {
            frozen: self.frozen,
            dict: self.dict || parent.dict,
            weakref: self.weakref || parent.weakref,
            freelist: self.freelist,
        }
    }

    /// Registration-time validation for flags that were not `checked()`
    pub fn validate(&self, ty: &'static str) -> Result<(), BuildError> {
        if self.freelist > 0 && self.dict {
            return Err(BuildError::FreelistWithDict { ty });
        }
        if self.freelist > 0 && self.weakref {
            return Err(BuildError::FreelistWithWeakref { ty });
        }
        Ok(())
    }
}
