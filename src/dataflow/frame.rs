use anyhow::{Context, Result};

/// Abstract values that can be merged where control flow meets.
pub trait Join: Clone + PartialEq {
    fn join(&self, other: &Self) -> Self;
}

/// Locals and operand stack at one program point, one entry per JVM slot:
/// long and double values occupy two consecutive entries.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame<V> {
    locals: Vec<V>,
    stack: Vec<V>,
}

impl<V: Join> Frame<V> {
    pub fn new(locals: Vec<V>) -> Self {
        Self {
            locals,
            stack: Vec::new(),
        }
    }

    pub fn push(&mut self, value: V) {
        self.stack.push(value);
    }

    /// Pushes `value` into `size` slots.
    pub fn push_sized(&mut self, value: V, size: usize) {
        for _ in 0..size {
            self.stack.push(value.clone());
        }
    }

    pub fn pop(&mut self) -> Result<V> {
        self.stack.pop().context("operand stack underflow")
    }

    /// Pops `count` slots, returned bottom first.
    pub fn pop_n(&mut self, count: usize) -> Result<Vec<V>> {
        if count > self.stack.len() {
            anyhow::bail!(
                "operand stack underflow: need {count}, have {}",
                self.stack.len()
            );
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    /// Slot `depth` positions below the top; 0 is the top.
    pub fn peek(&self, depth: usize) -> Result<&V> {
        self.stack
            .len()
            .checked_sub(depth + 1)
            .and_then(|index| self.stack.get(index))
            .with_context(|| format!("operand stack has no slot at depth {depth}"))
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    pub fn clear_stack(&mut self) {
        self.stack.clear();
    }

    pub fn load(&self, index: usize) -> Result<V> {
        self.locals
            .get(index)
            .cloned()
            .with_context(|| format!("local variable {index} out of range"))
    }

    /// Stores `value` into `size` consecutive locals starting at `index`.
    pub fn store(&mut self, index: usize, value: V, size: usize) -> Result<()> {
        if index + size > self.locals.len() {
            anyhow::bail!("local variable {index} out of range");
        }
        for slot in &mut self.locals[index..index + size] {
            *slot = value.clone();
        }
        Ok(())
    }

    /// Merges `other` into `self` slot by slot; returns whether `self` changed.
    pub fn join_from(&mut self, other: &Frame<V>) -> Result<bool> {
        if self.stack.len() != other.stack.len() {
            anyhow::bail!(
                "operand stack height mismatch at merge: {} vs {}",
                self.stack.len(),
                other.stack.len()
            );
        }
        if self.locals.len() != other.locals.len() {
            anyhow::bail!("local variable count mismatch at merge");
        }
        let mut changed = false;
        for (mine, theirs) in self
            .locals
            .iter_mut()
            .chain(self.stack.iter_mut())
            .zip(other.locals.iter().chain(other.stack.iter()))
        {
            let joined = mine.join(theirs);
            if joined != *mine {
                *mine = joined;
                changed = true;
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    struct Bits(u8);

    impl Join for Bits {
        fn join(&self, other: &Self) -> Self {
            Bits(self.0 | other.0)
        }
    }

    #[test]
    fn pop_n_returns_bottom_first() {
        let mut frame = Frame::new(vec![]);
        frame.push(Bits(1));
        frame.push(Bits(2));
        frame.push(Bits(3));

        let popped = frame.pop_n(2).expect("pop");

        assert_eq!(popped, vec![Bits(2), Bits(3)]);
        assert_eq!(frame.stack_len(), 1);
        assert!(frame.pop_n(2).is_err());
    }

    #[test]
    fn join_merges_slots_and_reports_change() {
        let mut left = Frame::new(vec![Bits(1), Bits(0)]);
        left.push(Bits(4));
        let mut right = Frame::new(vec![Bits(2), Bits(0)]);
        right.push(Bits(4));

        assert!(left.join_from(&right).expect("join"));
        assert!(!left.join_from(&right).expect("join"));
        assert_eq!(left.load(0).expect("local"), Bits(3));
    }

    #[test]
    fn join_rejects_stack_height_mismatch() {
        let mut left: Frame<Bits> = Frame::new(vec![]);
        let mut right = Frame::new(vec![]);
        right.push(Bits(1));

        assert!(left.join_from(&right).is_err());
    }

    #[test]
    fn wide_store_fills_two_locals() {
        let mut frame = Frame::new(vec![Bits(0); 3]);

        frame.store(1, Bits(7), 2).expect("store");

        assert_eq!(frame.load(2).expect("local"), Bits(7));
        assert!(frame.store(2, Bits(1), 2).is_err());
    }
}
