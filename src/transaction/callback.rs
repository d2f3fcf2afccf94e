//! Close callbacks and the guarded draining loop that runs them.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use anyhow::anyhow;

use super::error::CallbackErrors;
use super::handle::TransactionContext;
use super::state::TransactionResult;

/// Invoked once when the transaction it was registered on closes.
pub type CloseCallback =
    Box<dyn FnOnce(&TransactionContext, TransactionResult) -> anyhow::Result<()> + Send>;

/// Invoked once when the outer transaction has fully closed.
pub type OuterCloseCallback = Box<dyn FnOnce(TransactionResult) -> anyhow::Result<()> + Send>;

/// Runs close callbacks newest first, recording failures and continuing.
pub(crate) fn drain_close_callbacks(
    callbacks: Vec<CloseCallback>,
    context: &TransactionContext,
    result: TransactionResult,
    errors: &mut CallbackErrors,
) {
    for callback in callbacks.into_iter().rev() {
        errors.record(guarded(|| callback(context, result)));
    }
}

/// Runs outer-close callbacks newest first, recording failures and continuing.
pub(crate) fn drain_outer_close_callbacks(
    callbacks: Vec<OuterCloseCallback>,
    result: TransactionResult,
    errors: &mut CallbackErrors,
) {
    for callback in callbacks.into_iter().rev() {
        errors.record(guarded(|| callback(result)));
    }
}

/// Runs a callback, turning a panic into an error.
fn guarded<F>(callback: F) -> anyhow::Result<()>
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(result) => result,
        Err(payload) => Err(anyhow!(
            "close callback panicked: {}",
            panic_message(payload.as_ref())
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        *msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "<non-string panic payload>"
    }
}
