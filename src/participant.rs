//! Snapshot-based transaction participants.
//!
//! A [`SnapshotParticipant`] wraps some state that can be cheaply captured and
//! restored. The first time the state is touched in a transaction, a snapshot is
//! taken; if that transaction aborts the snapshot is restored. Committing a nested
//! transaction hands its snapshot to the parent, so an abort further out still
//! restores the state from before the whole change.

use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::Mutex;

use crate::transaction::{Result, TransactionContext, TransactionError, TransactionResult};

/// State that a [`SnapshotParticipant`] can capture and restore.
pub trait Snapshot: Send + 'static {
    /// The captured form of the state.
    type State: Send + 'static;

    /// Captures the current state.
    fn create_snapshot(&self) -> Self::State;

    /// Restores the state captured in `snapshot`.
    fn read_snapshot(&mut self, snapshot: Self::State);

    /// Called when a snapshot is no longer needed.
    fn release_snapshot(&mut self, _snapshot: Self::State) {}

    /// Called once the outer transaction that changed this state has committed.
    fn on_final_commit(&mut self) {}
}

/// A snapshot together with the transaction whose close will consume it.
struct Entry<S> {
    owner: TransactionContext,
    snapshot: S,
}

struct Journal<T: Snapshot> {
    target: T,
    /// One slot per nesting depth; `Some` once the state was touched at that depth.
    snapshots: Vec<Option<Entry<T::State>>>,
}

impl<T: Snapshot> Journal<T> {
    /// Fails if `tx` may not change the state, returns true if it still needs a
    /// snapshot.
    fn needs_snapshot(&self, tx: &TransactionContext, depth: usize) -> Result<bool> {
        let foreign = self
            .snapshots
            .iter()
            .flatten()
            .any(|entry| !entry.owner.manager().ptr_eq(tx.manager()));
        if foreign {
            return Err(TransactionError::state(
                "State is already being changed by a transaction of another manager",
            ));
        }
        match self.snapshots.get(depth).and_then(Option::as_ref) {
            None => Ok(true),
            Some(entry) if entry.owner == *tx => Ok(false),
            Some(_) => Err(TransactionError::state(format!(
                "State was snapshotted by another transaction at depth {}",
                depth
            ))),
        }
    }

    /// Removes the snapshot recorded by `tx`.
    fn take_snapshot(&mut self, tx: &TransactionContext, depth: usize) -> Option<T::State> {
        let slot = self.snapshots.get_mut(depth)?;
        if slot.as_ref().map_or(false, |entry| entry.owner == *tx) {
            slot.take().map(|entry| entry.snapshot)
        } else {
            None
        }
    }
}

/// Makes changes to `T` revertible by transactions.
pub struct SnapshotParticipant<T: Snapshot> {
    journal: Arc<Mutex<Journal<T>>>,
}

impl<T: Snapshot> SnapshotParticipant<T> {
    pub fn new(target: T) -> Self {
        Self {
            journal: Arc::new(Mutex::new(Journal {
                target,
                snapshots: Vec::new(),
            })),
        }
    }

    /// Takes a snapshot for `tx` unless it already took one.
    ///
    /// Must be called before the state is changed inside `tx`. Fails with
    /// [`TransactionError::State`] unless `tx` is open and is the only transaction
    /// changing this state at its depth.
    pub fn update_snapshots(&self, tx: &TransactionContext) -> Result<()> {
        let depth = tx.nesting_depth()?;
        let lifecycle = tx.lifecycle()?;
        if !lifecycle.is_open() {
            return Err(TransactionError::state(format!(
                "Cannot change state through transaction at depth {} (lifecycle {})",
                depth, lifecycle
            )));
        }
        if !self.journal.lock().needs_snapshot(tx, depth)? {
            return Ok(());
        }

        let journal = Arc::clone(&self.journal);
        tx.add_close_callback(move |tx, result| on_close(&journal, tx, result))?;

        let mut journal = self.journal.lock();
        if journal.snapshots.len() <= depth {
            journal.snapshots.resize_with(depth + 1, || None);
        }
        let snapshot = journal.target.create_snapshot();
        journal.snapshots[depth] = Some(Entry {
            owner: tx.clone(),
            snapshot,
        });
        Ok(())
    }

    /// Snapshots the state for `tx`, then applies `change` to it.
    pub fn modify<R>(&self, tx: &TransactionContext, change: impl FnOnce(&mut T) -> R) -> Result<R> {
        self.update_snapshots(tx)?;
        let mut journal = self.journal.lock();
        Ok(change(&mut journal.target))
    }

    /// Reads the current state, including uncommitted changes.
    pub fn read<R>(&self, view: impl FnOnce(&T) -> R) -> R {
        view(&self.journal.lock().target)
    }
}

impl<T: Snapshot> Clone for SnapshotParticipant<T> {
    fn clone(&self) -> Self {
        Self {
            journal: Arc::clone(&self.journal),
        }
    }
}

fn on_close<T: Snapshot>(
    journal: &Arc<Mutex<Journal<T>>>,
    tx: &TransactionContext,
    result: TransactionResult,
) -> anyhow::Result<()> {
    let depth = tx.nesting_depth()?;
    let mut guard = journal.lock();
    let snapshot = guard
        .take_snapshot(tx, depth)
        .ok_or_else(|| anyhow!("no snapshot recorded at depth {}", depth))?;

    if result.was_aborted() {
        guard.target.read_snapshot(snapshot);
    } else if depth > 0 {
        if guard.snapshots[depth - 1].is_none() {
            // The parent has not seen this state yet; it inherits our snapshot.
            let parent = tx.get_open_transaction(depth - 1)?;
            guard.snapshots[depth - 1] = Some(Entry {
                owner: parent.clone(),
                snapshot,
            });
            drop(guard);
            let journal = Arc::clone(journal);
            parent.add_close_callback(move |tx, result| on_close(&journal, tx, result))?;
        } else {
            guard.target.release_snapshot(snapshot);
        }
    } else {
        guard.target.release_snapshot(snapshot);
        drop(guard);
        let journal = Arc::clone(journal);
        tx.add_outer_close_callback(move |result| {
            if result.was_committed() {
                journal.lock().target.on_final_commit();
            }
            Ok(())
        })?;
    }
    Ok(())
}
