//! Slot: one cell of an operand stack or local-variable table
//!
//! A slot is a tag plus a 64 bit payload. The payload is only ever read through
//! the accessor matching the tag, so a reference can never be reinterpreted as a
//! number and the other way around.
//!
//! RefHandle: the target of a reference slot, pairs the class of an object with
//! its storage. Handles live in the handle pool, slots only alias them by id.
use std::num::NonZeroUsize;

use crate::ClassId;

const NULL_HANDLE: u64 = u64::MAX;

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SlotTag {
    Int = 0,
    Long = 1,
    Float = 2,
    Double = 3,
    Reference = 4,
}

/// Index of a [`RefHandle`] inside the handle pool.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct HandleId(pub u32);

/// Opaque address of object storage, owned by the heap.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef(pub NonZeroUsize);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Slot {
    tag: SlotTag,
    payload: u64,
}

#[derive(Debug, Clone, Default)]
pub struct RefHandle {
    pub class: Option<ClassId>,
    pub object: Option<ObjectRef>,
}

impl Slot {
    pub fn int(value: i32) -> Self {
        Self {
            tag: SlotTag::Int,
            payload: value as u32 as u64,
        }
    }

    pub fn long(value: i64) -> Self {
        Self {
            tag: SlotTag::Long,
            payload: value.cast_unsigned(),
        }
    }

    pub fn float(value: f32) -> Self {
        Self {
            tag: SlotTag::Float,
            payload: value.to_bits() as u64,
        }
    }

    pub fn double(value: f64) -> Self {
        Self {
            tag: SlotTag::Double,
            payload: value.to_bits(),
        }
    }

    pub fn reference(handle: HandleId) -> Self {
        Self {
            tag: SlotTag::Reference,
            payload: handle.0 as u64,
        }
    }

    pub fn null() -> Self {
        Self {
            tag: SlotTag::Reference,
            payload: NULL_HANDLE,
        }
    }

    #[inline]
    pub fn tag(&self) -> SlotTag {
        self.tag
    }

    #[inline]
    pub fn is_reference(&self) -> bool {
        self.tag == SlotTag::Reference
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.is_reference() && self.payload == NULL_HANDLE
    }

    pub fn as_int(&self) -> Option<i32> {
        (self.tag == SlotTag::Int).then_some(self.payload as u32 as i32)
    }

    pub fn as_long(&self) -> Option<i64> {
        (self.tag == SlotTag::Long).then_some(self.payload.cast_signed())
    }

    pub fn as_float(&self) -> Option<f32> {
        (self.tag == SlotTag::Float).then(|| f32::from_bits(self.payload as u32))
    }

    pub fn as_double(&self) -> Option<f64> {
        (self.tag == SlotTag::Double).then(|| f64::from_bits(self.payload))
    }

    /// `None` for primitives and for null.
    pub fn as_reference(&self) -> Option<HandleId> {
        if self.is_reference() && self.payload != NULL_HANDLE {
            return Some(HandleId(self.payload as u32));
        }
        None
    }
}

impl Default for Slot {
    fn default() -> Self {
        Slot::int(0)
    }
}

impl RefHandle {
    pub fn new(class: ClassId, object: ObjectRef) -> Self {
        Self {
            class: Some(class),
            object: Some(object),
        }
    }

    /// A handle is live once both halves are set.
    pub fn is_live(&self) -> bool {
        self.class.is_some() && self.object.is_some()
    }

    pub fn clear(&mut self) {
        self.class = None;
        self.object = None;
    }
}

impl ObjectRef {
    pub fn new(address: usize) -> Option<Self> {
        NonZeroUsize::new(address).map(Self)
    }
}
