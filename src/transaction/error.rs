//! Error types for transaction operations.

use thiserror::Error;

/// Errors raised by transaction operations.
///
/// `State`, `ThreadAffinity` and `Index` are raised before any state is touched and
/// indicate caller misuse. `Callback` is raised only after a close has fully finished.
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Invalid transaction state: {0}")]
    State(String),

    #[error("Transaction accessed from thread {caller}, but it may only be used on thread {owner}")]
    ThreadAffinity { owner: String, caller: String },

    #[error("Nesting depth {depth} is out of bounds ({open} transaction(s) open)")]
    Index { depth: usize, open: usize },

    #[error(transparent)]
    Callback(#[from] CallbackError),
}

impl TransactionError {
    pub(crate) fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Returns true for errors caused by calling an operation in the wrong state.
    pub fn is_state(&self) -> bool {
        matches!(self, Self::State(_))
    }

    pub fn is_thread_affinity(&self) -> bool {
        matches!(self, Self::ThreadAffinity { .. })
    }

    pub fn is_index(&self) -> bool {
        matches!(self, Self::Index { .. })
    }

    pub fn is_callback(&self) -> bool {
        matches!(self, Self::Callback(_))
    }
}

/// Result type for transaction operations.
pub type Result<T> = std::result::Result<T, TransactionError>;

/// One or more close callbacks failed while a transaction was closing.
///
/// The first failure is the primary error; every later one is kept as suppressed.
#[derive(Debug)]
pub struct CallbackError {
    primary: anyhow::Error,
    suppressed: Vec<anyhow::Error>,
}

impl CallbackError {
    /// Returns the first error raised during the close.
    pub fn primary(&self) -> &anyhow::Error {
        &self.primary
    }

    /// Returns the errors raised after the primary one, in the order they occurred.
    pub fn suppressed(&self) -> &[anyhow::Error] {
        &self.suppressed
    }

    /// Returns the total number of failed callbacks.
    pub fn len(&self) -> usize {
        1 + self.suppressed.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Consumes the error, returning every failure in the order it occurred.
    pub fn into_errors(self) -> Vec<anyhow::Error> {
        let mut errors = Vec::with_capacity(self.len());
        errors.push(self.primary);
        errors.extend(self.suppressed);
        errors
    }
}

impl std::fmt::Display for CallbackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Encountered an exception while invoking transaction close callbacks: {}",
            self.primary
        )?;
        if !self.suppressed.is_empty() {
            write!(f, " ({} more suppressed)", self.suppressed.len())?;
        }
        Ok(())
    }
}

impl std::error::Error for CallbackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let primary: &(dyn std::error::Error + 'static) = &*self.primary;
        Some(primary)
    }
}

/// Collects callback failures while a close drains its callbacks.
#[derive(Debug, Default)]
pub(crate) struct CallbackErrors {
    errors: Vec<anyhow::Error>,
}

impl CallbackErrors {
    pub(crate) fn record(&mut self, result: anyhow::Result<()>) {
        if let Err(e) = result {
            log::warn!("Transaction close callback failed: {:#}", e);
            self.errors.push(e);
        }
    }

    pub(crate) fn into_result(self) -> Result<()> {
        let mut errors = self.errors.into_iter();
        match errors.next() {
            None => Ok(()),
            Some(primary) => Err(TransactionError::Callback(CallbackError {
                primary,
                suppressed: errors.collect(),
            })),
        }
    }
}
