use std::sync::{Mutex, PoisonError};

/// Ordered list of commands replayed after every successful reconnect.
///
/// Commands represent connection-scoped setup (re-subscribe messages and the
/// like) that must be redone each time the connection epoch changes, so
/// replay never removes them.
#[derive(Debug, Default)]
pub(crate) struct RecoveryLedger {
    commands: Mutex<Vec<String>>,
}

impl RecoveryLedger {
    pub(crate) fn register(&self, command: String) {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command);
    }

    /// Ordered copy of the ledger. Cloned under the lock so replay can run
    /// without holding it across any write.
    pub(crate) fn snapshot(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
