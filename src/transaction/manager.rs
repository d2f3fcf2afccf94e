//! Transaction manager for coordinating the transaction stack of one thread.

use std::sync::Arc;

use log::{debug, trace};
use parking_lot::{Mutex, MutexGuard};

use super::callback::{self, CloseCallback, OuterCloseCallback};
use super::error::{CallbackErrors, Result, TransactionError};
use super::handle::{Transaction, TransactionContext};
use super::node::TransactionNode;
use super::owner::{self, OwnerToken};
use super::state::{Lifecycle, TransactionResult};

thread_local! {
    static THREAD_MANAGER: TransactionManager = TransactionManager::new();
}

/// The mutable part of a manager: the slot stack and the outer-close callbacks.
struct StackState {
    nodes: Vec<TransactionNode>,
    /// Depth of the innermost open transaction, `None` when nothing is open.
    current: Option<usize>,
    outer_callbacks: Vec<OuterCloseCallback>,
    next_generation: u64,
}

impl StackState {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            current: None,
            outer_callbacks: Vec::new(),
            next_generation: 0,
        }
    }

    fn open_count(&self) -> usize {
        self.current.map_or(0, |depth| depth + 1)
    }

    /// Opens the slot above the current one, growing the stack if needed.
    fn push(&mut self) -> (usize, u64) {
        let depth = self.open_count();
        if self.nodes.len() == depth {
            self.nodes.push(TransactionNode::new());
        }
        self.next_generation += 1;
        let generation = self.next_generation;
        self.nodes[depth].open(generation);
        self.current = Some(depth);
        (depth, generation)
    }

    fn is_current(&self, context: &TransactionContext) -> bool {
        let depth = context.depth();
        self.current == Some(depth) && self.nodes[depth].generation() == context.generation()
    }

    fn check_current_open(&self, context: &TransactionContext) -> Result<()> {
        let depth = context.depth();
        if !self.is_current(context) {
            return Err(TransactionError::state(format!(
                "Transaction at depth {} is not the current transaction",
                depth
            )));
        }
        let lifecycle = self.nodes[depth].lifecycle();
        if !lifecycle.is_open() {
            return Err(TransactionError::state(format!(
                "Transaction at depth {} is not open (lifecycle {})",
                depth, lifecycle
            )));
        }
        Ok(())
    }

    fn current_open_node(&mut self, context: &TransactionContext) -> Result<&mut TransactionNode> {
        self.check_current_open(context)?;
        Ok(&mut self.nodes[context.depth()])
    }

    /// Finds the node behind `context` if it is open, current or not.
    fn open_node(&mut self, context: &TransactionContext) -> Result<&mut TransactionNode> {
        let depth = context.depth();
        match self.nodes.get_mut(depth) {
            Some(node) if node.generation() == context.generation() && node.lifecycle().is_open() => {
                Ok(node)
            }
            Some(node) if node.generation() == context.generation() => {
                Err(TransactionError::state(format!(
                    "Transaction at depth {} is not open (lifecycle {})",
                    depth,
                    node.lifecycle()
                )))
            }
            _ => Err(TransactionError::state(format!(
                "Transaction at depth {} has already closed",
                depth
            ))),
        }
    }
}

struct Inner {
    owner: OwnerToken,
    owner_name: String,
    state: Mutex<StackState>,
}

/// Owns the transaction stack of a single thread.
///
/// A manager is bound to the thread that created it. Every operation first checks
/// that it is called from that thread and fails with
/// [`TransactionError::ThreadAffinity`] otherwise, before anything is touched.
///
/// Use [`TransactionManager::new`] to pass a manager around explicitly, or
/// [`TransactionManager::for_current_thread`] for the lazily created thread-local one.
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<Inner>,
}

impl TransactionManager {
    /// Creates a new manager owned by the calling thread.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                owner: OwnerToken::current(),
                owner_name: owner::describe_current_thread(),
                state: Mutex::new(StackState::new()),
            }),
        }
    }

    /// Returns the calling thread's own manager, creating it on first use.
    pub fn for_current_thread() -> Self {
        THREAD_MANAGER.with(|manager| manager.clone())
    }

    /// Returns the token of the thread this manager belongs to.
    pub fn owner(&self) -> OwnerToken {
        self.inner.owner
    }

    /// Returns true if both values refer to the same manager.
    pub fn ptr_eq(&self, other: &TransactionManager) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Fails unless called from the owning thread.
    pub fn validate_thread(&self) -> Result<()> {
        if OwnerToken::current() == self.inner.owner {
            Ok(())
        } else {
            Err(TransactionError::ThreadAffinity {
                owner: self.inner.owner_name.clone(),
                caller: owner::describe_current_thread(),
            })
        }
    }

    fn state(&self) -> MutexGuard<'_, StackState> {
        self.inner.state.lock()
    }

    fn context(&self, depth: usize, generation: u64) -> TransactionContext {
        TransactionContext::new(self.clone(), depth, generation)
    }

    /// Opens a new outer transaction.
    ///
    /// Fails with [`TransactionError::State`] if a transaction is already open; nested
    /// transactions must be opened through [`TransactionContext::open_nested`].
    pub fn open_outer(&self) -> Result<Transaction> {
        self.validate_thread()?;
        let (depth, generation) = {
            let mut state = self.state();
            if let Some(depth) = state.current {
                return Err(TransactionError::state(format!(
                    "An outer transaction is already open on this thread (current depth {}); use open_nested instead",
                    depth
                )));
            }
            state.push()
        };
        debug!("Opened outer transaction on {}", self.inner.owner);
        Ok(Transaction::new(self.context(depth, generation)))
    }

    pub(crate) fn open_nested(&self, parent: &TransactionContext) -> Result<Transaction> {
        self.validate_thread()?;
        let (depth, generation) = {
            let mut state = self.state();
            state.check_current_open(parent)?;
            state.push()
        };
        trace!("Opened nested transaction at depth {}", depth);
        Ok(Transaction::new(self.context(depth, generation)))
    }

    /// Returns the innermost open transaction, or `None` when nothing is open.
    ///
    /// Fails with [`TransactionError::State`] while the innermost transaction is
    /// closing: a close callback must not see a half-closed transaction as active.
    pub fn current_unsafe(&self) -> Result<Option<TransactionContext>> {
        self.validate_thread()?;
        let state = self.state();
        let Some(depth) = state.current else {
            return Ok(None);
        };
        let node = &state.nodes[depth];
        match node.lifecycle() {
            Lifecycle::Open => Ok(Some(self.context(depth, node.generation()))),
            lifecycle => Err(TransactionError::state(format!(
                "May not query the current transaction from within a close callback (lifecycle {})",
                lifecycle
            ))),
        }
    }

    /// Returns true if a transaction is open on this manager.
    pub fn is_open(&self) -> Result<bool> {
        self.validate_thread()?;
        Ok(self.state().current.is_some())
    }

    /// Returns the depth of the innermost open transaction.
    pub fn current_depth(&self) -> Result<Option<usize>> {
        self.validate_thread()?;
        Ok(self.state().current)
    }

    /// Returns the lifecycle of the innermost transaction, `NONE` when nothing is open.
    pub fn lifecycle(&self) -> Result<Lifecycle> {
        self.validate_thread()?;
        let state = self.state();
        Ok(state
            .current
            .map_or(Lifecycle::None, |depth| state.nodes[depth].lifecycle()))
    }

    /// Returns the lifecycle of every slot allocated so far, outermost first.
    pub fn node_lifecycles(&self) -> Result<Vec<Lifecycle>> {
        self.validate_thread()?;
        Ok(self
            .state()
            .nodes
            .iter()
            .map(TransactionNode::lifecycle)
            .collect())
    }

    pub(crate) fn lifecycle_of(&self, context: &TransactionContext) -> Result<Lifecycle> {
        self.validate_thread()?;
        let state = self.state();
        Ok(state
            .nodes
            .get(context.depth())
            .filter(|node| node.generation() == context.generation())
            .map_or(Lifecycle::None, TransactionNode::lifecycle))
    }

    pub(crate) fn get_open_transaction(&self, depth: usize) -> Result<TransactionContext> {
        self.validate_thread()?;
        let state = self.state();
        let open = state.open_count();
        if depth >= open {
            return Err(TransactionError::Index { depth, open });
        }
        let node = &state.nodes[depth];
        if !node.lifecycle().is_open() {
            return Err(TransactionError::state(format!(
                "Transaction at depth {} is not open (lifecycle {})",
                depth,
                node.lifecycle()
            )));
        }
        Ok(self.context(depth, node.generation()))
    }

    pub(crate) fn add_close_callback(
        &self,
        context: &TransactionContext,
        callback: CloseCallback,
    ) -> Result<()> {
        self.validate_thread()?;
        let mut state = self.state();
        state.open_node(context)?.push_callback(callback);
        Ok(())
    }

    pub(crate) fn add_outer_close_callback(&self, callback: OuterCloseCallback) -> Result<()> {
        self.validate_thread()?;
        let mut state = self.state();
        if state.current.is_none() {
            return Err(TransactionError::state(
                "No transaction is open on this thread",
            ));
        }
        if state.nodes[0].lifecycle() == Lifecycle::OuterClosing {
            return Err(TransactionError::state(
                "May not register an outer close callback while outer close callbacks are running",
            ));
        }
        state.outer_callbacks.push(callback);
        Ok(())
    }

    /// True while the handle's transaction is the current, open one. No thread check.
    pub(crate) fn is_live(&self, context: &TransactionContext) -> bool {
        self.state().check_current_open(context).is_ok()
    }

    /// Closes the transaction behind `context`, running its callbacks.
    ///
    /// The manager lock is never held while a callback runs, so callbacks may call
    /// back into the manager.
    pub(crate) fn close(&self, context: &TransactionContext, result: TransactionResult) -> Result<()> {
        self.validate_thread()?;
        let depth = context.depth();
        let callbacks = {
            let mut state = self.state();
            let node = state.current_open_node(context)?;
            node.set_lifecycle(Lifecycle::Closing);
            node.take_callbacks()
        };
        trace!(
            "Closing transaction at depth {} ({}), {} close callback(s)",
            depth,
            result,
            callbacks.len()
        );

        let mut errors = CallbackErrors::default();
        callback::drain_close_callbacks(callbacks, context, result, &mut errors);

        if depth == 0 {
            let outer_callbacks = {
                let mut state = self.state();
                state.nodes[0].set_lifecycle(Lifecycle::OuterClosing);
                std::mem::take(&mut state.outer_callbacks)
            };
            callback::drain_outer_close_callbacks(outer_callbacks, result, &mut errors);
        }

        {
            let mut state = self.state();
            state.nodes[depth].reset();
            state.current = depth.checked_sub(1);
        }

        if depth == 0 {
            debug!("Outer transaction on {} closed: {}", self.inner.owner, result);
        }
        errors.into_result()
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("owner", &self.inner.owner)
            .finish_non_exhaustive()
    }
}
