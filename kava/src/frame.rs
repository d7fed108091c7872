use std::sync::Arc;

use crate::{BufferId, ConstantPool, MethodId};

/// One in-flight method call.
///
/// A frame only exists in the pool as `Some` once every field is set, so a
/// half-built activation can never be linked onto the call stack.
#[derive(Debug, Clone)]
pub struct Frame {
    /// debug identifier, assigned by the frame pool
    pub id: u64,
    pub return_pc: usize,
    pub method: MethodId,
    pub locals: BufferId,
    pub operands: BufferId,
    pub constant_pool: Arc<ConstantPool>,
}

/// Handed back by an interpreted invocation; completes when the engine has
/// executed and released the frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Ticket(pub u64);

impl Frame {
    #[inline]
    pub fn ticket(&self) -> Ticket {
        Ticket(self.id)
    }
}
