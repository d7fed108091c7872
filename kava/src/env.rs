use std::collections::HashSet;

use crate::{
    BufferId, CallStack, ClassId, ClassRegistry, EngineError, EngineResult, Frame, FrameId,
    HandleId, MethodId, NativeRegistry, ObjectRef, PoolCreateInfo, PoolKind, PoolStats, Pools,
    RefHandle, ResolutionFailure, Slot, SlotBuffer, Ticket,
};

#[derive(Debug, Clone)]
pub struct EnvCreateInfo {
    pub max_depth: usize,
    pub pools: PoolCreateInfo,
}

impl Default for EnvCreateInfo {
    fn default() -> Self {
        Self {
            max_depth: crate::DEFAULT_MAX_DEPTH,
            pools: PoolCreateInfo::default(),
        }
    }
}

/// Everything guarded by the VM mutex.
#[derive(Debug)]
pub struct ExecEnv {
    pub classes: ClassRegistry,
    pub natives: NativeRegistry,
    pub pools: Pools,
    pub stack: CallStack,
    /// program counter register
    pub pc: usize,
    /// entry method, kept as a GC root
    pub main_method: Option<MethodId>,
    /// caller operand stack for invocations made with an empty call stack
    pub(crate) entry_operands: BufferId,
    pub(crate) resolution_failures: Vec<ResolutionFailure>,
    awaited: HashSet<Ticket, ahash::RandomState>,
    completed: HashSet<Ticket, ahash::RandomState>,
    pub(crate) native_args: Vec<Slot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvStats {
    pub frames: PoolStats,
    pub buffers: PoolStats,
    pub handles: PoolStats,
    pub depth: usize,
}

impl ExecEnv {
    pub fn new(info: &EnvCreateInfo, natives: NativeRegistry) -> EngineResult<Self> {
        let mut pools = Pools::new(&info.pools);
        let entry_operands = pools.acquire_buffer(info.pools.buffer_capacity)?;
        Ok(Self {
            classes: ClassRegistry::new(),
            natives,
            pools,
            stack: CallStack::new(info.max_depth),
            pc: 0,
            main_method: None,
            entry_operands,
            resolution_failures: Vec::new(),
            awaited: HashSet::default(),
            completed: HashSet::default(),
            native_args: Vec::new(),
        })
    }

    pub fn frame(&self, id: FrameId) -> EngineResult<&Frame> {
        self.pools
            .frames
            .get(id)
            .and_then(Option::as_ref)
            .ok_or(EngineError::NotAcquired {
                pool: PoolKind::Frame,
                index: id.0 as usize,
            })
    }

    pub fn buffer(&self, id: BufferId) -> EngineResult<&SlotBuffer> {
        self.pools.buffers.get(id).ok_or(EngineError::NotAcquired {
            pool: PoolKind::SlotBuffer,
            index: id.0 as usize,
        })
    }

    pub fn buffer_mut(&mut self, id: BufferId) -> EngineResult<&mut SlotBuffer> {
        self.pools.buffers.get_mut(id).ok_or(EngineError::NotAcquired {
            pool: PoolKind::SlotBuffer,
            index: id.0 as usize,
        })
    }

    /// Operand stack of the top frame, or the entry operand stack when no frame
    /// is active.
    pub fn caller_operands(&self) -> EngineResult<BufferId> {
        match self.stack.peek() {
            Some(top) => Ok(self.frame(top)?.operands),
            None => Ok(self.entry_operands),
        }
    }

    pub fn entry_operands_mut(&mut self) -> EngineResult<&mut SlotBuffer> {
        self.buffer_mut(self.entry_operands)
    }

    /// Wraps a heap object into a pooled handle and returns a slot aliasing it.
    pub fn new_reference(&mut self, class: ClassId, object: ObjectRef) -> EngineResult<Slot> {
        let id = self.pools.acquire_handle(RefHandle::new(class, object))?;
        Ok(Slot::reference(id))
    }

    /// Every slot aliasing the handle must be dead by now.
    pub fn release_reference(&mut self, handle: HandleId) -> EngineResult<()> {
        self.pools.handles.release(handle)
    }

    /// Unlinks the top frame and returns it together with its buffers to the
    /// pools.
    pub fn pop_frame(&mut self) -> EngineResult<Frame> {
        let id = self.stack.pop()?;
        let frame = self
            .pools
            .frames
            .get_mut(id)
            .and_then(Option::take)
            .ok_or(EngineError::NotAcquired {
                pool: PoolKind::Frame,
                index: id.0 as usize,
            })?;
        self.pools.buffers.release(frame.operands)?;
        self.pools.buffers.release(frame.locals)?;
        self.pools.frames.release(id)?;
        self.pc = frame.return_pc;
        self.complete(frame.ticket());
        log::trace!("popped frame {} (depth {})", frame.id, self.stack.depth());
        Ok(frame)
    }

    pub fn resolution_failures(&self) -> &[ResolutionFailure] {
        &self.resolution_failures
    }

    pub fn stats(&self) -> EnvStats {
        EnvStats {
            frames: self.pools.frames.stats(),
            buffers: self.pools.buffers.stats(),
            handles: self.pools.handles.stats(),
            depth: self.stack.depth(),
        }
    }

    /// Registers interest in a ticket, must happen before the lock is dropped.
    pub(crate) fn await_ticket(&mut self, ticket: Ticket) {
        self.awaited.insert(ticket);
    }

    pub(crate) fn take_completed(&mut self, ticket: Ticket) -> bool {
        self.completed.remove(&ticket)
    }

    fn complete(&mut self, ticket: Ticket) {
        if self.awaited.remove(&ticket) {
            self.completed.insert(ticket);
        }
    }
}
