//! Transaction lifecycle and close results.

use serde::{Deserialize, Serialize};

/// The lifecycle of a single transaction slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lifecycle {
    /// The slot is not in use.
    None,
    /// The transaction is open and accepts callbacks and nested transactions.
    Open,
    /// The transaction is running its close callbacks.
    Closing,
    /// The outer transaction is running its outer-close callbacks.
    OuterClosing,
}

impl Lifecycle {
    /// Returns true if the slot is unused.
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Returns true if the transaction is open.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns true if the transaction is in the middle of its close.
    pub fn is_closing(&self) -> bool {
        matches!(self, Self::Closing | Self::OuterClosing)
    }
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "NONE"),
            Self::Open => write!(f, "OPEN"),
            Self::Closing => write!(f, "CLOSING"),
            Self::OuterClosing => write!(f, "OUTER_CLOSING"),
        }
    }
}

/// How a transaction was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionResult {
    /// The transaction was committed.
    Committed,
    /// The transaction was aborted and its changes should be reverted.
    Aborted,
}

impl TransactionResult {
    pub fn was_committed(&self) -> bool {
        matches!(self, Self::Committed)
    }

    pub fn was_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

impl std::fmt::Display for TransactionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Committed => write!(f, "Committed"),
            Self::Aborted => write!(f, "Aborted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_predicates() {
        assert!(Lifecycle::None.is_none());
        assert!(!Lifecycle::None.is_open());
        assert!(!Lifecycle::None.is_closing());

        assert!(Lifecycle::Open.is_open());
        assert!(!Lifecycle::Open.is_closing());

        assert!(Lifecycle::Closing.is_closing());
        assert!(Lifecycle::OuterClosing.is_closing());
        assert!(!Lifecycle::OuterClosing.is_open());
    }

    #[test]
    fn test_lifecycle_display() {
        assert_eq!(format!("{}", Lifecycle::None), "NONE");
        assert_eq!(format!("{}", Lifecycle::Open), "OPEN");
        assert_eq!(format!("{}", Lifecycle::Closing), "CLOSING");
        assert_eq!(format!("{}", Lifecycle::OuterClosing), "OUTER_CLOSING");
    }

    #[test]
    fn test_transaction_result() {
        assert!(TransactionResult::Committed.was_committed());
        assert!(!TransactionResult::Committed.was_aborted());
        assert!(TransactionResult::Aborted.was_aborted());
        assert!(!TransactionResult::Aborted.was_committed());

        assert_eq!(format!("{}", TransactionResult::Committed), "Committed");
        assert_eq!(format!("{}", TransactionResult::Aborted), "Aborted");
    }
}
