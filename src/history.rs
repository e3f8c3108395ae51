use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::result::ShellResult;

/// Append-only record of a session's results. Readers always see a whole
/// snapshot, never a half-applied reset.
#[derive(Debug, Default)]
pub struct History {
    entries: RwLock<Vec<ShellResult>>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<ShellResult>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<ShellResult>> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn append(&self, result: ShellResult) {
        self.write().push(result);
    }

    pub fn snapshot(&self) -> Vec<ShellResult> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn last(&self) -> Option<ShellResult> {
        self.read().last().cloned()
    }

    /// Empties the history, returning how many entries were dropped.
    pub fn clear(&self) -> usize {
        let mut entries = self.write();
        let count = entries.len();
        entries.clear();
        count
    }
}
