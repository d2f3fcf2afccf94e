//! Handles through which participants use a transaction.

use std::ops::Deref;

use log::warn;

use super::error::Result;
use super::manager::TransactionManager;
use super::state::{Lifecycle, TransactionResult};

/// A view of one open transaction.
///
/// Contexts are handed to close callbacks and returned by
/// [`get_open_transaction`](Self::get_open_transaction). They cannot close the
/// transaction; only the owning [`Transaction`] can.
#[derive(Clone)]
pub struct TransactionContext {
    manager: TransactionManager,
    depth: usize,
    generation: u64,
}

impl TransactionContext {
    pub(crate) fn new(manager: TransactionManager, depth: usize, generation: u64) -> Self {
        Self {
            manager,
            depth,
            generation,
        }
    }

    pub(crate) fn depth(&self) -> usize {
        self.depth
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the manager this transaction belongs to.
    pub fn manager(&self) -> &TransactionManager {
        &self.manager
    }

    /// Returns the nesting depth of this transaction; 0 is the outer transaction.
    pub fn nesting_depth(&self) -> Result<usize> {
        self.manager.validate_thread()?;
        Ok(self.depth)
    }

    /// Returns the lifecycle of this transaction, `NONE` once it has closed.
    pub fn lifecycle(&self) -> Result<Lifecycle> {
        self.manager.lifecycle_of(self)
    }

    /// Opens a transaction nested in this one.
    ///
    /// Only the current, open transaction may be nested into.
    pub fn open_nested(&self) -> Result<Transaction> {
        self.manager.open_nested(self)
    }

    /// Returns the open transaction at `depth`, which must be between 0 and the
    /// current depth inclusive.
    pub fn get_open_transaction(&self, depth: usize) -> Result<TransactionContext> {
        self.manager.get_open_transaction(depth)
    }

    /// Registers a callback to run when this transaction closes.
    ///
    /// The transaction must be open, but need not be the current one: a participant
    /// may register on an ancestor obtained through
    /// [`get_open_transaction`](Self::get_open_transaction). Callbacks run in reverse
    /// order of registration. A participant typically uses
    /// one to revert its changes when the result is [`TransactionResult::Aborted`].
    pub fn add_close_callback<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(&TransactionContext, TransactionResult) -> anyhow::Result<()> + Send + 'static,
    {
        self.manager.add_close_callback(self, Box::new(callback))
    }

    /// Registers a callback to run once the outer transaction has fully closed.
    ///
    /// May be called from inside a close callback.
    pub fn add_outer_close_callback<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(TransactionResult) -> anyhow::Result<()> + Send + 'static,
    {
        self.manager.add_outer_close_callback(Box::new(callback))
    }
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("owner", &self.manager.owner())
            .field("depth", &self.depth)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Two contexts are equal when they refer to the same lifetime of the same slot of
/// the same manager.
impl PartialEq for TransactionContext {
    fn eq(&self, other: &Self) -> bool {
        self.manager.ptr_eq(&other.manager)
            && self.depth == other.depth
            && self.generation == other.generation
    }
}

impl Eq for TransactionContext {}

/// An owning handle to an open transaction.
///
/// Dropping a handle whose transaction is still open aborts it, so an early return
/// or a panic never leaves the thread's stack open.
#[derive(Debug)]
pub struct Transaction {
    context: TransactionContext,
}

impl Transaction {
    pub(crate) fn new(context: TransactionContext) -> Self {
        Self { context }
    }

    /// Returns the non-owning view of this transaction.
    pub fn context(&self) -> &TransactionContext {
        &self.context
    }

    /// Commits the transaction.
    pub fn commit(&self) -> Result<()> {
        self.context
            .manager
            .close(&self.context, TransactionResult::Committed)
    }

    /// Aborts the transaction.
    pub fn abort(&self) -> Result<()> {
        self.context
            .manager
            .close(&self.context, TransactionResult::Aborted)
    }

    /// Aborts the transaction if it is still the current, open one; otherwise does
    /// nothing.
    pub fn close(&self) -> Result<()> {
        self.context.manager.validate_thread()?;
        if self.context.manager.is_live(&self.context) {
            self.abort()
        } else {
            Ok(())
        }
    }
}

impl Deref for Transaction {
    type Target = TransactionContext;

    fn deref(&self) -> &Self::Target {
        &self.context
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.context.manager.is_live(&self.context) {
            if let Err(e) = self.abort() {
                warn!(
                    "Failed to abort transaction at depth {} on drop: {}",
                    self.context.depth, e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_nested_open_requires_current() {
        let manager = TransactionManager::new();
        let outer = manager.open_outer().unwrap();
        let nested = outer.open_nested().unwrap();

        let err = outer.open_nested().unwrap_err();
        assert!(err.is_state());
        let err = outer.commit().unwrap_err();
        assert!(err.is_state());
        let err = outer.abort().unwrap_err();
        assert!(err.is_state());

        nested.commit().unwrap();
        outer.commit().unwrap();
    }

    #[test]
    fn test_callbacks_on_ancestor_run_at_ancestor_close() {
        let manager = TransactionManager::new();
        let results = Arc::new(Mutex::new(Vec::new()));

        let outer = manager.open_outer().unwrap();
        let nested = outer.open_nested().unwrap();
        {
            let results = Arc::clone(&results);
            nested
                .get_open_transaction(0)
                .unwrap()
                .add_close_callback(move |tx, result| {
                    results.lock().unwrap().push((tx.nesting_depth()?, result));
                    Ok(())
                })
                .unwrap();
        }

        nested.commit().unwrap();
        assert!(results.lock().unwrap().is_empty());
        outer.abort().unwrap();
        assert_eq!(*results.lock().unwrap(), vec![(0, TransactionResult::Aborted)]);
    }

    #[test]
    fn test_close_aborts_open_transaction() {
        let manager = TransactionManager::new();
        let results = Arc::new(Mutex::new(Vec::new()));

        let tx = manager.open_outer().unwrap();
        {
            let results = Arc::clone(&results);
            tx.add_close_callback(move |_, result| {
                results.lock().unwrap().push(result);
                Ok(())
            })
            .unwrap();
        }
        tx.close().unwrap();
        // A second close is a no-op.
        tx.close().unwrap();

        assert_eq!(*results.lock().unwrap(), vec![TransactionResult::Aborted]);
        assert!(!manager.is_open().unwrap());
    }

    #[test]
    fn test_close_is_noop_after_commit() {
        let manager = TransactionManager::new();
        let tx = manager.open_outer().unwrap();
        tx.commit().unwrap();
        tx.close().unwrap();
        assert!(!manager.is_open().unwrap());
    }

    #[test]
    fn test_drop_aborts() {
        let manager = TransactionManager::new();
        let results = Arc::new(Mutex::new(Vec::new()));

        let record = |tx: &TransactionContext, label: &'static str| {
            let results = Arc::clone(&results);
            tx.add_close_callback(move |_, result| {
                results.lock().unwrap().push((label, result));
                Ok(())
            })
            .unwrap();
        };

        {
            let outer = manager.open_outer().unwrap();
            record(outer.context(), "outer");
            let nested = outer.open_nested().unwrap();
            record(nested.context(), "nested");
            // `nested` is dropped first, then `outer`.
        }

        assert_eq!(
            *results.lock().unwrap(),
            vec![
                ("nested", TransactionResult::Aborted),
                ("outer", TransactionResult::Aborted)
            ]
        );
        assert!(!manager.is_open().unwrap());
    }

    #[test]
    fn test_drop_after_commit_does_nothing() {
        let manager = TransactionManager::new();
        let calls = Arc::new(Mutex::new(0));

        {
            let tx = manager.open_outer().unwrap();
            let calls = Arc::clone(&calls);
            tx.add_close_callback(move |_, _| {
                *calls.lock().unwrap() += 1;
                Ok(())
            })
            .unwrap();
            tx.commit().unwrap();
        }

        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_get_open_transaction() {
        let manager = TransactionManager::new();
        let outer = manager.open_outer().unwrap();
        let nested = outer.open_nested().unwrap();

        let root = nested.get_open_transaction(0).unwrap();
        assert_eq!(root.nesting_depth().unwrap(), 0);
        assert_eq!(root.lifecycle().unwrap(), Lifecycle::Open);

        let err = nested.get_open_transaction(2).unwrap_err();
        assert!(matches!(
            err,
            crate::transaction::TransactionError::Index { depth: 2, open: 2 }
        ));

        nested.commit().unwrap();
        outer.commit().unwrap();
    }

    #[test]
    fn test_closing_transaction_rejects_operations() {
        let manager = TransactionManager::new();
        let observed = Arc::new(Mutex::new(Vec::new()));

        let outer = Arc::new(manager.open_outer().unwrap());
        let nested = Arc::new(outer.open_nested().unwrap());
        {
            let observed = Arc::clone(&observed);
            let handle = Arc::clone(&nested);
            nested
                .add_close_callback(move |tx, _| {
                    let mut observed = observed.lock().unwrap();
                    observed.push(("open_nested", tx.open_nested().unwrap_err().is_state()));
                    observed.push((
                        "add_close_callback",
                        tx.add_close_callback(|_, _| Ok(())).unwrap_err().is_state(),
                    ));
                    observed.push(("commit", handle.commit().unwrap_err().is_state()));
                    observed.push(("abort", handle.abort().unwrap_err().is_state()));
                    observed.push(("lifecycle", tx.lifecycle()? == Lifecycle::Closing));
                    observed.push(("depth", tx.manager().current_depth()? == Some(1)));
                    Ok(())
                })
                .unwrap();
        }

        nested.commit().unwrap();
        assert_eq!(
            *observed.lock().unwrap(),
            vec![
                ("open_nested", true),
                ("add_close_callback", true),
                ("commit", true),
                ("abort", true),
                ("lifecycle", true),
                ("depth", true),
            ]
        );
        assert_eq!(manager.current_depth().unwrap(), Some(0));
        assert_eq!(outer.lifecycle().unwrap(), Lifecycle::Open);
        assert_eq!(nested.lifecycle().unwrap(), Lifecycle::None);
        outer.commit().unwrap();
        assert!(!manager.is_open().unwrap());
    }

    #[test]
    fn test_context_debug() {
        let manager = TransactionManager::new();
        let tx = manager.open_outer().unwrap();
        let debug = format!("{:?}", tx.context());
        assert!(debug.contains("depth: 0"));
        tx.commit().unwrap();
    }
}
