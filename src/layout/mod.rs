//! Memory Layout Planner
//!
//! One record per instance:
//!
//! ```text
//! [ObjectHeader][builtin storage][native payload][dict slot][weaklist slot]
//! ```
//!
//! Every region is optional except the header. Offsets are fixed per type at
//! registration. A subclass keeps its base's storage and payload offsets,
//! so code compiled against the base reads a subclass record unchanged.

use crate::allocator::{HEADER_ALIGN, HEADER_SIZE};
use crate::error::BuildError;
use std::alloc::Layout;

const SLOT_SIZE: usize = core::mem::size_of::<usize>();
const SLOT_ALIGN: usize = core::mem::align_of::<usize>();

/// Size and alignment of one record region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Region {
    pub size: usize,
    pub align: usize,
}

impl Region {
    pub const fn of<T>() -> Self {
        Self {
            size: core::mem::size_of::<T>(),
            align: core::mem::align_of::<T>(),
        }
    }
}

/// Inputs to [`RecordLayout::plan`]
#[derive(Debug, Clone, Default)]
pub struct LayoutRequest<'a> {
    pub ty: &'static str,
    pub parent: Option<&'a RecordLayout>,
    /// Builtin container storage; subclasses inherit the parent's
    pub storage: Option<Region>,
    pub payload: Option<Region>,
    pub dict: bool,
    pub weakref: bool,
    /// Own field names in declaration order
    pub fields: Vec<&'static str>,
}

/// Planned record layout of one type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLayout {
    pub size: usize,
    pub align: usize,
    pub storage_offset: usize,
    pub storage_size: usize,
    pub payload_offset: usize,
    pub payload_size: usize,
    pub dict_offset: Option<usize>,
    pub weaklist_offset: Option<usize>,
    /// Parent fields first, then own
    pub field_order: Vec<&'static str>,
    alloc: Layout,
}

#[inline]
fn align_up(offset: usize, align: usize) -> Option<usize> {
    offset.checked_add(align - 1).map(|end| end & !(align - 1))
}

impl RecordLayout {
    /// Layout of a bare header record (`object`)
    pub fn header_only() -> Self {
        Self {
            size: HEADER_SIZE,
            align: HEADER_ALIGN,
            storage_offset: HEADER_SIZE,
            storage_size: 0,
            payload_offset: HEADER_SIZE,
            payload_size: 0,
            dict_offset: None,
            weaklist_offset: None,
            field_order: Vec::new(),
            alloc: Layout::new::<crate::allocator::ObjectHeader>(),
        }
    }

    /// Layout of a builtin container: header followed by storage `S`
    pub(crate) fn builtin<S>() -> Self {
        #[repr(C)]
        struct Record<S> {
            header: crate::allocator::ObjectHeader,
            storage: S,
        }

        let alloc = Layout::new::<Record<S>>();
        let storage = Region::of::<S>();
        let storage_offset = (HEADER_SIZE + storage.align - 1) & !(storage.align - 1);
        Self {
            size: alloc.size(),
            align: alloc.align(),
            storage_offset,
            storage_size: storage.size,
            payload_offset: storage_offset + storage.size,
            payload_size: 0,
            dict_offset: None,
            weaklist_offset: None,
            field_order: Vec::new(),
            alloc,
        }
    }

    pub fn plan(request: LayoutRequest<'_>) -> Result<Self, BuildError> {
        let ty = request.ty;
        let overflow = || BuildError::LayoutOverflow { ty };
        let mismatch = |detail: String| BuildError::LayoutMismatch { ty, detail };

        let payload = request.payload.unwrap_or(Region { size: 0, align: 1 });
        let mut align = HEADER_ALIGN.max(payload.align);

        let (storage_offset, storage_size, payload_offset) = match request.parent {
            Some(parent) => {
                if request.storage.is_some_and(|storage| storage.size != parent.storage_size) {
                    return Err(mismatch("builtin storage differs from the base".to_owned()));
                }
                if payload.size < parent.payload_size {
                    return Err(mismatch(format!(
                        "payload of {} bytes cannot embed the base payload of {} bytes",
                        payload.size, parent.payload_size
                    )));
                }
                let payload_offset = if parent.payload_size > 0 {
                    parent.payload_offset
                } else {
                    align_up(parent.storage_offset + parent.storage_size, payload.align).ok_or_else(overflow)?
                };
                if payload_offset % payload.align != 0 {
                    return Err(mismatch(format!(
                        "payload alignment {} does not fit the inherited offset {payload_offset}",
                        payload.align
                    )));
                }
                align = align.max(parent.align);
                (parent.storage_offset, parent.storage_size, payload_offset)
            }
            None => {
                let storage = request.storage.unwrap_or(Region { size: 0, align: 1 });
                align = align.max(storage.align);
                let storage_offset = align_up(HEADER_SIZE, storage.align).ok_or_else(overflow)?;
                let storage_end = storage_offset.checked_add(storage.size).ok_or_else(overflow)?;
                let payload_offset = align_up(storage_end, payload.align).ok_or_else(overflow)?;
                (storage_offset, storage.size, payload_offset)
            }
        };

        let mut end = payload_offset.checked_add(payload.size).ok_or_else(overflow)?;

        let mut slot = |enabled: bool| -> Result<Option<usize>, BuildError> {
            if !enabled {
                return Ok(None);
            }
            let offset = align_up(end, SLOT_ALIGN).ok_or_else(overflow)?;
            end = offset.checked_add(SLOT_SIZE).ok_or_else(overflow)?;
            Ok(Some(offset))
        };
        let dict_offset = slot(request.dict)?;
        let weaklist_offset = slot(request.weakref)?;

        align = align.max(if dict_offset.is_some() || weaklist_offset.is_some() { SLOT_ALIGN } else { 1 });
        let size = align_up(end, align).ok_or_else(overflow)?;
        let alloc = Layout::from_size_align(size, align).map_err(|_| overflow())?;

        let mut field_order = request.parent.map(|parent| parent.field_order.clone()).unwrap_or_default();
        field_order.extend(request.fields);

        Ok(Self {
            size,
            align,
            storage_offset,
            storage_size,
            payload_offset,
            payload_size: payload.size,
            dict_offset,
            weaklist_offset,
            field_order,
            alloc,
        })
    }

    /// Allocation layout of one record
    #[inline]
    pub fn alloc_layout(&self) -> Layout {
        self.alloc
    }
}
