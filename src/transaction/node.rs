//! Reusable stack slots for open transactions.

use super::callback::CloseCallback;
use super::state::Lifecycle;

/// One slot of a manager's transaction stack.
///
/// Slots are never removed from the stack. Closing a transaction resets its slot in
/// place so the next transaction opened at the same depth can reuse it.
pub(crate) struct TransactionNode {
    /// Bumped on every open so handles from an earlier use of the slot go stale.
    generation: u64,
    lifecycle: Lifecycle,
    callbacks: Vec<CloseCallback>,
}

impl TransactionNode {
    pub(crate) fn new() -> Self {
        Self {
            generation: 0,
            lifecycle: Lifecycle::None,
            callbacks: Vec::new(),
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub(crate) fn set_lifecycle(&mut self, lifecycle: Lifecycle) {
        self.lifecycle = lifecycle;
    }

    pub(crate) fn open(&mut self, generation: u64) {
        debug_assert!(self.lifecycle.is_none());
        debug_assert!(self.callbacks.is_empty());
        self.generation = generation;
        self.lifecycle = Lifecycle::Open;
    }

    pub(crate) fn push_callback(&mut self, callback: CloseCallback) {
        self.callbacks.push(callback);
    }

    pub(crate) fn take_callbacks(&mut self) -> Vec<CloseCallback> {
        std::mem::take(&mut self.callbacks)
    }

    #[cfg(test)]
    pub(crate) fn callback_count(&self) -> usize {
        self.callbacks.len()
    }

    /// Returns the slot to `NONE`, keeping its generation so stale handles stay stale.
    pub(crate) fn reset(&mut self) {
        self.callbacks.clear();
        self.lifecycle = Lifecycle::None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_open_and_reset() {
        let mut node = TransactionNode::new();
        assert_eq!(node.lifecycle(), Lifecycle::None);

        node.open(7);
        assert_eq!(node.generation(), 7);
        assert_eq!(node.lifecycle(), Lifecycle::Open);

        node.push_callback(Box::new(|_, _| Ok(())));
        node.push_callback(Box::new(|_, _| Ok(())));
        assert_eq!(node.callback_count(), 2);

        node.set_lifecycle(Lifecycle::Closing);
        let callbacks = node.take_callbacks();
        assert_eq!(callbacks.len(), 2);
        assert_eq!(node.callback_count(), 0);

        node.reset();
        assert_eq!(node.lifecycle(), Lifecycle::None);
        assert_eq!(node.generation(), 7);
        assert_eq!(node.callback_count(), 0);
    }

    #[test]
    fn test_node_reuse_takes_new_generation() {
        let mut node = TransactionNode::new();
        node.open(1);
        node.reset();
        node.open(2);
        assert_eq!(node.generation(), 2);
        assert!(node.lifecycle().is_open());
    }
}
