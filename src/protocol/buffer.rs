//! Buffer export metadata and its validation
//!
//! An exporter describes a region it owns plus shape/stride metadata. Nothing
//! is handed to a consumer until `validate` has checked that every reachable
//! element lies inside the region.

use crate::host::{HostError, HostResult};
use core::ptr::NonNull;
use smallvec::SmallVec;
use std::borrow::Cow;

/// Element types with a struct-module format code
pub trait BufferElement: Copy + 'static {
    const FORMAT: &'static str;
}

macro_rules! buffer_element {
    ($($ty:ty => $code:literal),* $(,)?) => {
        $(impl BufferElement for $ty {
            const FORMAT: &'static str = $code;
        })*
    };
}

buffer_element!(
    u8 => "B", i8 => "b", u16 => "H", i16 => "h", u32 => "I",
    i32 => "i", u64 => "Q", i64 => "q", f32 => "f", f64 => "d",
);

pub type Dims = SmallVec<[isize; 4]>;

/// Metadata returned by a `__buffer__` hook
#[derive(Debug, Clone)]
pub struct BufferSpec {
    data: NonNull<u8>,
    len: usize,
    /// Byte offset of element `[0, 0, ..]` inside the region
    offset: usize,
    itemsize: usize,
    format: Cow<'static, str>,
    shape: Dims,
    strides: Option<Dims>,
    readonly: bool,
    negative_strides: bool,
}

impl BufferSpec {
    /// One-dimensional, contiguous, read-only view of a slice
    pub fn from_slice<E: BufferElement>(items: &[E]) -> Self {
        let itemsize = core::mem::size_of::<E>();
        Self {
            data: NonNull::new(items.as_ptr() as *mut u8).unwrap_or(NonNull::dangling()),
            len: core::mem::size_of_val(items),
            offset: 0,
            itemsize,
            format: Cow::Borrowed(E::FORMAT),
            shape: SmallVec::from_slice(&[items.len() as isize]),
            strides: None,
            readonly: true,
            negative_strides: false,
        }
    }

    /// Replace the shape; strides default to C-contiguous
    pub fn with_shape(mut self, shape: &[isize]) -> Self {
        self.shape = SmallVec::from_slice(shape);
        self
    }

    pub fn with_strides(mut self, strides: &[isize]) -> Self {
        self.strides = Some(SmallVec::from_slice(strides));
        self
    }

    /// Start the view `offset` bytes into the region
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_format(mut self, format: impl Into<Cow<'static, str>>, itemsize: usize) -> Self {
        self.format = format.into();
        self.itemsize = itemsize;
        self
    }

    /// Accept negative strides (views walking memory backwards)
    pub fn allow_negative_strides(mut self) -> Self {
        self.negative_strides = true;
        self
    }

    pub fn writable(mut self) -> Self {
        self.readonly = false;
        self
    }

    /// Check the metadata against the exported region
    pub fn validate(&self) -> HostResult<ValidBuffer> {
        if self.itemsize == 0 {
            return Err(HostError::buffer_error("buffer itemsize must be positive"));
        }

        if let Some(dim) = self.shape.iter().find(|&&dim| dim < 0) {
            return Err(HostError::buffer_error(format!(
                "buffer shape contains negative dimension {dim}"
            )));
        }

        let strides = match &self.strides {
            Some(strides) if strides.len() != self.shape.len() => {
                return Err(HostError::buffer_error(format!(
                    "buffer has {} strides for {} dimensions",
                    strides.len(),
                    self.shape.len()
                )));
            }
            Some(strides) => strides.clone(),
            None => contiguous_strides(&self.shape, self.itemsize)?,
        };

        if !self.negative_strides {
            if let Some(stride) = strides.iter().find(|&&stride| stride < 0) {
                return Err(HostError::buffer_error(format!(
                    "negative stride {stride} not supported by this exporter"
                )));
            }
        }

        if self.offset > self.len {
            return Err(HostError::buffer_error("buffer offset past the end of the exported region"));
        }

        if !self.shape.contains(&0) {
            let (low, high) = extent(&self.shape, &strides);
            let start = self.offset as i128 + low;
            let end = self.offset as i128 + high + self.itemsize as i128;
            if start < 0 || end > self.len as i128 {
                return Err(HostError::buffer_error(format!(
                    "buffer extent [{start}, {end}) exceeds exported region of {} bytes",
                    self.len
                )));
            }
        }

        Ok(ValidBuffer { strides })
    }

    pub(crate) fn data(&self) -> NonNull<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn itemsize(&self) -> usize {
        self.itemsize
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn shape(&self) -> &[isize] {
        &self.shape
    }

    pub fn readonly(&self) -> bool {
        self.readonly
    }
}

/// Result of successful validation
#[derive(Debug, Clone)]
pub struct ValidBuffer {
    pub strides: Dims,
}

fn contiguous_strides(shape: &[isize], itemsize: usize) -> HostResult<Dims> {
    let mut strides: Dims = SmallVec::from_elem(0, shape.len());
    let mut step = itemsize as isize;
    for (stride, &dim) in strides.iter_mut().zip(shape).rev() {
        *stride = step;
        step = step
            .checked_mul(dim.max(1))
            .ok_or_else(|| HostError::buffer_error("buffer shape overflows the address space"))?;
    }
    Ok(strides)
}

/// Lowest and highest byte offsets reached relative to element zero
fn extent(shape: &[isize], strides: &[isize]) -> (i128, i128) {
    shape.iter().zip(strides).fold((0i128, 0i128), |(low, high), (&dim, &stride)| {
        let reach = stride as i128 * (dim as i128 - 1);
        if reach < 0 {
            (low + reach, high)
        } else {
            (low, high + reach)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ExceptionKind;

    #[test]
    fn contiguous_slice_is_valid() {
        let data = [1u32, 2, 3, 4];
        let spec = BufferSpec::from_slice(&data);
        let valid = spec.validate().unwrap();
        assert_eq!(spec.shape(), &[4]);
        assert_eq!(spec.format(), "I");
        assert_eq!(valid.strides.as_slice(), &[4]);
    }

    #[test]
    fn negative_shape_is_a_buffer_error() {
        let data = [0u8; 4];
        let err = BufferSpec::from_slice(&data).with_shape(&[-1]).validate().unwrap_err();
        assert_eq!(err.kind, ExceptionKind::BufferError);
        assert!(err.message.contains("negative dimension"));
    }

    #[test]
    fn negative_stride_requires_opt_in() {
        let data = [1u8, 2, 3, 4];
        let backwards = BufferSpec::from_slice(&data).with_strides(&[-1]).with_offset(3);
        assert_eq!(backwards.validate().unwrap_err().kind, ExceptionKind::BufferError);
        assert!(backwards.allow_negative_strides().validate().is_ok());
    }

    #[test]
    fn extent_past_region_is_rejected() {
        let data = [0u8; 6];
        let too_big = BufferSpec::from_slice(&data).with_shape(&[2, 4]);
        assert_eq!(too_big.validate().unwrap_err().kind, ExceptionKind::BufferError);

        let fits = BufferSpec::from_slice(&data).with_shape(&[2, 3]);
        assert_eq!(fits.validate().unwrap().strides.as_slice(), &[3, 1]);
    }

    #[test]
    fn mismatched_stride_count_is_rejected() {
        let data = [0u8; 6];
        let spec = BufferSpec::from_slice(&data).with_shape(&[2, 3]).with_strides(&[3]);
        assert_eq!(spec.validate().unwrap_err().kind, ExceptionKind::BufferError);
    }

    #[test]
    fn zero_length_dimension_is_empty_and_valid() {
        let data: [u8; 0] = [];
        assert!(BufferSpec::from_slice(&data).validate().is_ok());
    }
}
