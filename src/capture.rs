//! Scoped redirection of script-visible stdout and stderr.
//!
//! Script output (`print`, `sys.stdout.write`, `sys.stderr.write`) goes
//! through [`write_stdout`] and [`write_stderr`]. While a [`CaptureGuard`] is
//! alive on the current thread, that output lands in shared in-memory
//! buffers; otherwise it reaches the process streams.

use std::{
    cell::RefCell,
    io::Write,
    sync::{Arc, Mutex, MutexGuard},
};

/// A pair of output buffers that can be read from another thread while a
/// script is still writing to them.
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffers {
    stdout: Arc<Mutex<String>>,
    stderr: Arc<Mutex<String>>,
}

fn lock(buffer: &Mutex<String>) -> MutexGuard<'_, String> {
    buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CaptureBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stdout(&self) -> String {
        lock(&self.stdout).clone()
    }

    pub fn stderr(&self) -> String {
        lock(&self.stderr).clone()
    }

    fn push_stdout(&self, text: &str) {
        lock(&self.stdout).push_str(text);
    }

    fn push_stderr(&self, text: &str) {
        lock(&self.stderr).push_str(text);
    }
}

thread_local! {
    static ACTIVE: RefCell<Option<CaptureBuffers>> = const { RefCell::new(None) };
}

/// Routes script output on this thread into a set of buffers until dropped,
/// then restores whatever was active before.
#[must_use = "output is only captured while the guard is alive"]
pub struct CaptureGuard {
    previous: Option<CaptureBuffers>,
}

impl CaptureGuard {
    pub fn install(buffers: CaptureBuffers) -> Self {
        let previous = ACTIVE.with(|active| active.replace(Some(buffers)));
        Self { previous }
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        ACTIVE.with(|active| *active.borrow_mut() = previous);
    }
}

pub fn write_stdout(text: &str) {
    ACTIVE.with(|active| match &*active.borrow() {
        Some(buffers) => buffers.push_stdout(text),
        None => {
            let mut out = std::io::stdout().lock();
            let _ = out.write_all(text.as_bytes());
            let _ = out.flush();
        }
    });
}

pub fn write_stderr(text: &str) {
    ACTIVE.with(|active| match &*active.borrow() {
        Some(buffers) => buffers.push_stderr(text),
        None => {
            let _ = std::io::stderr().write_all(text.as_bytes());
        }
    });
}

/// Runs `f` with output captured and returns its result together with the
/// captured stdout and stderr.
pub fn with_capture<T>(f: impl FnOnce() -> T) -> (T, String, String) {
    let buffers = CaptureBuffers::new();
    let value = {
        let _guard = CaptureGuard::install(buffers.clone());
        f()
    };
    (value, buffers.stdout(), buffers.stderr())
}
