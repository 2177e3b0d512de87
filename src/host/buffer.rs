//! Buffer consumer side
//!
//! A `BufferView` keeps the exporter alive and counted as exported until it is
//! dropped. While any view is live, `borrow_mut` on the exporter fails with
//! `BufferError`, so the region cannot move or change under a reader.

use super::err::{bridge, HostError, HostResult};
use super::gil;
use super::object::ObjRef;
use crate::logging::trace;
use crate::protocol::{BufferSpec, Dims};
use std::fmt;

pub struct BufferView {
    obj: ObjRef,
    spec: BufferSpec,
    strides: Dims,
}

impl BufferView {
    /// Ask `obj` to export its buffer and validate what it returns
    pub fn new(obj: &ObjRef) -> HostResult<Self> {
        let _gil = gil::acquire();
        let Some(export) = &obj.ty().slots().buffer else {
            return Err(HostError::type_error(format!(
                "a bytes-like object is required, not '{}': type does not support the buffer protocol",
                obj.ty().name()
            )));
        };
        let spec = bridge(export(obj), "__buffer__")?;
        let valid = spec.validate()?;
        obj.header().add_export();
        trace!(ty = obj.ty().name(), exports = obj.header().exports(), "buffer exported");
        Ok(Self {
            obj: obj.clone(),
            spec,
            strides: valid.strides,
        })
    }

    pub fn exporter(&self) -> &ObjRef {
        &self.obj
    }

    /// The whole exported region
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.spec.data().as_ptr(), self.spec.len()) }
    }

    /// Bytes of the element at `index`, one coordinate per dimension
    pub fn element(&self, index: &[isize]) -> HostResult<&[u8]> {
        if index.len() != self.shape().len() {
            return Err(HostError::index_error(format!(
                "buffer has {} dimensions, got {} indices",
                self.shape().len(),
                index.len()
            )));
        }
        let mut position = self.spec.offset() as isize;
        for ((&i, &dim), &stride) in index.iter().zip(self.shape()).zip(&self.strides) {
            if !(0..dim).contains(&i) {
                return Err(HostError::index_error("buffer index out of range"));
            }
            position += i * stride;
        }
        let start = position as usize;
        Ok(&self.as_bytes()[start..start + self.itemsize()])
    }

    pub fn len(&self) -> usize {
        self.spec.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spec.is_empty()
    }

    pub fn shape(&self) -> &[isize] {
        self.spec.shape()
    }

    pub fn strides(&self) -> &[isize] {
        &self.strides
    }

    pub fn itemsize(&self) -> usize {
        self.spec.itemsize()
    }

    pub fn format(&self) -> &str {
        self.spec.format()
    }

    pub fn readonly(&self) -> bool {
        self.spec.readonly()
    }
}

impl Drop for BufferView {
    fn drop(&mut self) {
        let _gil = gil::acquire();
        self.obj.header().release_export();
    }
}

impl fmt::Debug for BufferView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferView")
            .field("exporter", &self.obj)
            .field("format", &self.format())
            .field("shape", &self.shape())
            .field("strides", &self.strides())
            .finish()
    }
}
