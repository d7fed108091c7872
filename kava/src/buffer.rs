use crate::{EngineError, EngineResult, Slot};

/// Slots with a fixed allocated capacity and a valid prefix.
///
/// Used both as an operand stack (push/pop at `valid`) and as a local-variable
/// table (indexed `0..valid`).
#[derive(Debug, Clone)]
pub struct SlotBuffer {
    slots: Vec<Slot>,
    valid: usize,
}

impl SlotBuffer {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![Slot::default(); capacity],
            valid: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn valid_count(&self) -> usize {
        self.valid
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.valid == 0
    }

    /// The valid portion of the buffer.
    #[must_use]
    pub fn as_slice(&self) -> &[Slot] {
        &self.slots[..self.valid]
    }

    pub fn push(&mut self, slot: Slot) -> EngineResult<()> {
        if self.valid == self.slots.len() {
            return Err(EngineError::BufferOverflow {
                capacity: self.slots.len(),
            });
        }
        self.slots[self.valid] = slot;
        self.valid += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Slot> {
        if self.valid == 0 {
            return None;
        }
        self.valid -= 1;
        Some(self.slots[self.valid])
    }

    #[must_use]
    pub fn peek(&self) -> Option<Slot> {
        self.peek_nth(0)
    }

    /// Gets the nth slot from the top (0-indexed)
    #[must_use]
    pub fn peek_nth(&self, n: usize) -> Option<Slot> {
        if n >= self.valid {
            return None;
        }
        Some(self.slots[self.valid - 1 - n])
    }

    /// The top `n` slots, ordered bottom to top.
    #[must_use]
    pub fn peek_slice(&self, n: usize) -> Option<&[Slot]> {
        if self.valid < n {
            return None;
        }
        Some(&self.slots[self.valid - n..self.valid])
    }

    /// Drops the top `n` slots.
    pub fn truncate_top(&mut self, n: usize) -> Option<()> {
        if self.valid < n {
            return None;
        }
        self.valid -= n;
        Some(())
    }

    pub fn get(&self, index: usize) -> EngineResult<Slot> {
        self.as_slice()
            .get(index)
            .copied()
            .ok_or(EngineError::LocalOutOfRange {
                index,
                valid: self.valid,
            })
    }

    pub fn set(&mut self, index: usize, slot: Slot) -> EngineResult<()> {
        if index >= self.valid {
            return Err(EngineError::LocalOutOfRange {
                index,
                valid: self.valid,
            });
        }
        self.slots[index] = slot;
        Ok(())
    }

    /// Marks the first `count` slots valid, as a local table filled by a call.
    pub fn set_valid_count(&mut self, count: usize) -> EngineResult<()> {
        if count > self.slots.len() {
            return Err(EngineError::BufferOverflow {
                capacity: self.slots.len(),
            });
        }
        self.valid = count;
        Ok(())
    }

    pub(crate) fn grow(&mut self, capacity: usize) {
        if capacity > self.slots.len() {
            self.slots.resize(capacity, Slot::default());
        }
    }

    pub fn clear(&mut self) {
        self.valid = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HandleId;

    #[test]
    fn push_pop_is_lifo() {
        let mut buf = SlotBuffer::with_capacity(4);
        buf.push(Slot::int(1)).unwrap();
        buf.push(Slot::int(2)).unwrap();
        assert_eq!(buf.valid_count(), 2);
        assert_eq!(buf.pop(), Some(Slot::int(2)));
        assert_eq!(buf.pop(), Some(Slot::int(1)));
        assert_eq!(buf.pop(), None);
    }

    #[test]
    fn push_past_capacity_fails_instead_of_truncating() {
        let mut buf = SlotBuffer::with_capacity(1);
        buf.push(Slot::int(1)).unwrap();
        assert_eq!(
            buf.push(Slot::int(2)),
            Err(EngineError::BufferOverflow { capacity: 1 })
        );
        assert_eq!(buf.as_slice(), &[Slot::int(1)]);
    }

    #[test]
    fn peek_nth_counts_from_the_top() {
        let mut buf = SlotBuffer::with_capacity(3);
        buf.push(Slot::int(10)).unwrap();
        buf.push(Slot::reference(HandleId(4))).unwrap();
        assert_eq!(buf.peek(), Some(Slot::reference(HandleId(4))));
        assert_eq!(buf.peek_nth(1), Some(Slot::int(10)));
        assert_eq!(buf.peek_nth(2), None);
        assert_eq!(
            buf.peek_slice(2),
            Some(&[Slot::int(10), Slot::reference(HandleId(4))][..])
        );
    }

    #[test]
    fn locals_are_indexed_within_the_valid_prefix() {
        let mut buf = SlotBuffer::with_capacity(3);
        buf.set_valid_count(2).unwrap();
        buf.set(1, Slot::long(5)).unwrap();
        assert_eq!(buf.get(1), Ok(Slot::long(5)));
        assert_eq!(
            buf.get(2),
            Err(EngineError::LocalOutOfRange { index: 2, valid: 2 })
        );
        assert!(buf.set_valid_count(4).is_err());
    }

    #[test]
    fn grow_keeps_contents() {
        let mut buf = SlotBuffer::with_capacity(1);
        buf.push(Slot::int(3)).unwrap();
        buf.grow(8);
        assert_eq!(buf.capacity(), 8);
        assert_eq!(buf.peek(), Some(Slot::int(3)));
        buf.grow(2);
        assert_eq!(buf.capacity(), 8);
    }
}
