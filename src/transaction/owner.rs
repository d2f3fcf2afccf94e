//! Owner tokens used to confine a transaction manager to one thread.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Next token to hand out; tokens start at 1.
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: OwnerToken = OwnerToken(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed));
}

/// A comparable identity for an executing thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OwnerToken(pub u64);

impl OwnerToken {
    /// Creates a token with the given value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the token of the calling thread, assigning one on first use.
    pub fn current() -> Self {
        CURRENT.with(|token| *token)
    }

    /// Returns the inner u64 value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Owner{}", self.0)
    }
}

/// Describes the calling thread for error messages, e.g. `'main' (Owner1)`.
pub(crate) fn describe_current_thread() -> String {
    let thread = std::thread::current();
    let name = thread.name().unwrap_or("<unnamed>");
    format!("'{}' ({})", name, OwnerToken::current())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_token_display() {
        assert_eq!(format!("{}", OwnerToken::new(7)), "Owner7");
        assert_eq!(OwnerToken::new(7).value(), 7);
    }

    #[test]
    fn test_current_token_is_stable_per_thread() {
        let first = OwnerToken::current();
        let second = OwnerToken::current();
        assert_eq!(first, second);

        let other = std::thread::spawn(OwnerToken::current).join().unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn test_current_tokens_unique_across_threads() {
        use std::thread;

        let handles: Vec<_> = (0..10)
            .map(|_| thread::spawn(OwnerToken::current))
            .collect();

        let mut tokens: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();
        tokens.push(OwnerToken::current());
        tokens.sort();
        tokens.dedup();

        assert_eq!(tokens.len(), 11);
    }

    #[test]
    fn test_describe_current_thread() {
        let description = thread_describe("worker-7");
        assert!(description.starts_with("'worker-7' (Owner"));
    }

    fn thread_describe(name: &str) -> String {
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(describe_current_thread)
            .unwrap()
            .join()
            .unwrap()
    }
}
