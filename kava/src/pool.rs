//! Fixed-capacity recycling pools for the per-call objects.
//!
//! Everything a call needs (a frame, two slot buffers, reference handles) is
//! allocated once when the VM starts. Acquire and release are free-list pops and
//! pushes, so a call never touches the allocator unless a buffer has to grow.
use std::fmt;

use crate::{EngineError, EngineResult, Frame, HandleId, RefHandle, SlotBuffer};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PoolKind {
    Frame,
    SlotBuffer,
    Handle,
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PoolKind::Frame => "stack frame",
            PoolKind::SlotBuffer => "slot buffer",
            PoolKind::Handle => "reference handle",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct FrameId(pub u32);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

pub trait PoolId: Copy {
    fn from_index(index: usize) -> Self;
    fn index(self) -> usize;
}

macro_rules! pool_id {
    ($($ty:ty),*) => {
        $(
            impl PoolId for $ty {
                #[inline]
                fn from_index(index: usize) -> Self {
                    Self(index as u32)
                }

                #[inline]
                fn index(self) -> usize {
                    self.0 as usize
                }
            }
        )*
    };
}

pool_id!(FrameId, BufferId, HandleId);

/// Resets an instance when it goes back into its pool.
pub trait Recycle {
    fn recycle(&mut self);
}

impl Recycle for SlotBuffer {
    fn recycle(&mut self) {
        self.clear();
    }
}

impl Recycle for RefHandle {
    fn recycle(&mut self) {
        self.clear();
    }
}

impl<T> Recycle for Option<T> {
    fn recycle(&mut self) {
        self.take();
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub capacity: usize,
    pub in_use: usize,
    pub high_water: usize,
}

#[derive(Debug)]
struct Entry<T> {
    value: T,
    serial: u64,
    in_use: bool,
}

#[derive(Debug)]
pub struct Pool<I, T> {
    kind: PoolKind,
    entries: Vec<Entry<T>>,
    free: Vec<usize>,
    next_serial: u64,
    high_water: usize,
    _id: std::marker::PhantomData<I>,
}

impl<I: PoolId, T: Recycle> Pool<I, T> {
    pub fn new(
        kind: PoolKind,
        capacity: usize,
        mut init: impl FnMut() -> T,
    ) -> Self {
        let entries = (0..capacity)
            .map(|_| Entry {
                value: init(),
                serial: 0,
                in_use: false,
            })
            .collect();
        // lowest index is handed out first
        let free = (0..capacity).rev().collect();
        Self {
            kind,
            entries,
            free,
            next_serial: 0,
            high_water: 0,
            _id: std::marker::PhantomData,
        }
    }

    pub fn acquire(&mut self) -> EngineResult<I> {
        let index = self
            .free
            .pop()
            .ok_or(EngineError::PoolExhausted(self.kind))?;
        let entry = &mut self.entries[index];
        entry.in_use = true;
        entry.serial = self.next_serial;
        self.next_serial += 1;
        self.high_water = self.high_water.max(self.in_use());
        Ok(I::from_index(index))
    }

    /// The instance must already be unlinked from every frame and the stack.
    pub fn release(&mut self, id: I) -> EngineResult<()> {
        let index = id.index();
        let kind = self.kind;
        match self.entries.get_mut(index) {
            Some(entry) if entry.in_use => {
                entry.in_use = false;
                entry.value.recycle();
                self.free.push(index);
                Ok(())
            }
            _ => Err(EngineError::DoubleRelease { pool: kind, index }),
        }
    }

    pub fn get(&self, id: I) -> Option<&T> {
        self.entries
            .get(id.index())
            .filter(|e| e.in_use)
            .map(|e| &e.value)
    }

    pub fn get_mut(&mut self, id: I) -> Option<&mut T> {
        self.entries
            .get_mut(id.index())
            .filter(|e| e.in_use)
            .map(|e| &mut e.value)
    }

    /// Two distinct live instances at once.
    pub fn get_pair_mut(&mut self, a: I, b: I) -> Option<(&mut T, &mut T)> {
        let [x, y] = self.entries.get_disjoint_mut([a.index(), b.index()]).ok()?;
        if !(x.in_use && y.in_use) {
            return None;
        }
        Some((&mut x.value, &mut y.value))
    }

    /// Debug identifier handed out when the instance was acquired.
    pub fn serial(&self, id: I) -> Option<u64> {
        self.entries
            .get(id.index())
            .filter(|e| e.in_use)
            .map(|e| e.serial)
    }

    #[inline]
    pub fn in_use(&self) -> usize {
        self.entries.len() - self.free.len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.entries.len(),
            in_use: self.in_use(),
            high_water: self.high_water,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolCreateInfo {
    pub frames: usize,
    pub buffers: usize,
    pub handles: usize,
    /// initial capacity of every pooled buffer
    pub buffer_capacity: usize,
    pub max_buffer_capacity: usize,
}

impl PoolCreateInfo {
    /// Sizes every pool from the maximum call depth.
    pub fn for_depth(max_depth: usize) -> Self {
        Self {
            frames: max_depth,
            // two per frame, one for the entry operand stack
            buffers: 2 * max_depth + 1,
            handles: max_depth,
            buffer_capacity: 16,
            max_buffer_capacity: u16::MAX as usize,
        }
    }
}

impl Default for PoolCreateInfo {
    fn default() -> Self {
        Self::for_depth(crate::DEFAULT_MAX_DEPTH)
    }
}

/// The three pools of an execution environment.
#[derive(Debug)]
pub struct Pools {
    pub frames: Pool<FrameId, Option<Frame>>,
    pub buffers: Pool<BufferId, SlotBuffer>,
    pub handles: Pool<HandleId, RefHandle>,
    max_buffer_capacity: usize,
}

impl Pools {
    pub fn new(info: &PoolCreateInfo) -> Self {
        let capacity = info.buffer_capacity;
        Self {
            frames: Pool::new(PoolKind::Frame, info.frames, || None),
            buffers: Pool::new(PoolKind::SlotBuffer, info.buffers, || {
                SlotBuffer::with_capacity(capacity)
            }),
            handles: Pool::new(PoolKind::Handle, info.handles, RefHandle::default),
            max_buffer_capacity: info.max_buffer_capacity,
        }
    }

    /// Acquires an empty buffer holding at least `capacity` slots.
    pub fn acquire_buffer(&mut self, capacity: usize) -> EngineResult<BufferId> {
        let id = self.buffers.acquire()?;
        if let Err(err) = self.ensure_capacity(id, capacity) {
            self.buffers.release(id)?;
            return Err(err);
        }
        Ok(id)
    }

    pub fn ensure_capacity(&mut self, id: BufferId, capacity: usize) -> EngineResult<()> {
        if capacity > self.max_buffer_capacity {
            return Err(EngineError::CapacityExceeded {
                requested: capacity,
                limit: self.max_buffer_capacity,
            });
        }
        let buffer = self.buffers.get_mut(id).ok_or(EngineError::NotAcquired {
            pool: PoolKind::SlotBuffer,
            index: id.index(),
        })?;
        buffer.grow(capacity);
        Ok(())
    }

    pub fn acquire_handle(&mut self, handle: RefHandle) -> EngineResult<HandleId> {
        let id = self.handles.acquire()?;
        if let Some(slot) = self.handles.get_mut(id) {
            *slot = handle;
        }
        Ok(id)
    }

    pub fn handle(&self, id: HandleId) -> Option<&RefHandle> {
        self.handles.get(id)
    }
}
