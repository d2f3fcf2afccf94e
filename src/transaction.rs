//! Nested, thread-confined transactions.
//!
//! This module lets independent storage participants make tentative changes and
//! commit or roll them back together:
//! - Per-thread transaction stacks with nested transactions
//! - Close callbacks that revert or finalize a participant's changes
//! - Outer-close callbacks that run once the outermost transaction has closed
//! - Thread confinement: a transaction may only be used on the thread that opened it
//!
//! ```
//! use transfer_txn::transaction::{self, TransactionResult};
//!
//! let tx = transaction::open_outer()?;
//! tx.add_close_callback(|_, result| {
//!     if result == TransactionResult::Aborted {
//!         // revert the change made above
//!     }
//!     Ok(())
//! })?;
//! tx.commit()?;
//! # Ok::<(), transfer_txn::transaction::TransactionError>(())
//! ```

pub mod callback;
pub mod error;
pub mod handle;
pub mod manager;
mod node;
pub mod owner;
pub mod state;

// Re-export commonly used types
pub use callback::{CloseCallback, OuterCloseCallback};
pub use error::{CallbackError, Result, TransactionError};
pub use handle::{Transaction, TransactionContext};
pub use manager::TransactionManager;
pub use owner::OwnerToken;
pub use state::{Lifecycle, TransactionResult};

/// Opens an outer transaction on the calling thread's manager.
pub fn open_outer() -> Result<Transaction> {
    TransactionManager::for_current_thread().open_outer()
}

/// Returns true if a transaction is open on the calling thread.
pub fn is_open() -> Result<bool> {
    TransactionManager::for_current_thread().is_open()
}

/// Returns the calling thread's innermost open transaction.
///
/// See [`TransactionManager::current_unsafe`].
pub fn current_unsafe() -> Result<Option<TransactionContext>> {
    TransactionManager::for_current_thread().current_unsafe()
}

/// Returns the lifecycle of the calling thread's innermost transaction.
pub fn lifecycle() -> Result<Lifecycle> {
    TransactionManager::for_current_thread().lifecycle()
}
