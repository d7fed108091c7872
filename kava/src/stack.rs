use crate::{EngineError, EngineResult, FrameId};

/// Bounded LIFO of the active frames.
#[derive(Debug)]
pub struct CallStack {
    frames: Vec<FrameId>,
    max_depth: usize,
}

impl CallStack {
    pub fn new(max_depth: usize) -> Self {
        Self {
            frames: Vec::with_capacity(max_depth),
            max_depth,
        }
    }

    pub fn push(&mut self, frame: FrameId) -> EngineResult<()> {
        if self.frames.len() >= self.max_depth {
            return Err(EngineError::StackOverflow {
                max_depth: self.max_depth,
            });
        }
        self.frames.push(frame);
        Ok(())
    }

    pub fn pop(&mut self) -> EngineResult<FrameId> {
        self.frames.pop().ok_or(EngineError::StackUnderflow)
    }

    #[must_use]
    pub fn peek(&self) -> Option<FrameId> {
        self.frames.last().copied()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Bottom to top.
    pub fn iter(&self) -> impl Iterator<Item = FrameId> + '_ {
        self.frames.iter().copied()
    }
}
