use std::time::Duration;

use crate::{
    diagnostics::{FaultKind, Frame, LotusError},
    result::ErrorInfo,
};

/// Why an execution did not complete.
#[derive(Debug, Clone, Copy)]
pub enum Failure<'a> {
    Fault(&'a LotusError),
    TimedOut(Duration),
    /// The engine itself panicked while running the job.
    Panicked(&'a str),
}

/// Converts a failure into the error payload of a result. Only frames from
/// submitted code survive; engine-internal frames are dropped.
pub fn normalize(failure: Failure<'_>) -> ErrorInfo {
    match failure {
        Failure::TimedOut(limit) => ErrorInfo {
            error_kind: FaultKind::Timeout.name().to_string(),
            error_message: format!(
                "Execution exceeded timeout of {}",
                describe_duration(limit)
            ),
            frames: Vec::new(),
        },
        Failure::Panicked(message) => ErrorInfo {
            error_kind: "RuntimeError".to_string(),
            error_message: format!("internal error: {message}"),
            frames: Vec::new(),
        },
        Failure::Fault(LotusError::Diagnostic(diag)) => ErrorInfo {
            error_kind: diag.kind.name().to_string(),
            error_message: diag.message.clone(),
            frames: submitted_frames(&diag.frames),
        },
        Failure::Fault(LotusError::Io(err)) => host_fault(FaultKind::Os, err.to_string()),
        Failure::Fault(LotusError::Json(err)) => host_fault(FaultKind::Value, err.to_string()),
        Failure::Fault(other) => ErrorInfo {
            error_kind: "RuntimeError".to_string(),
            error_message: other.to_string(),
            frames: Vec::new(),
        },
    }
}

pub fn submitted_frames(frames: &[Frame]) -> Vec<Frame> {
    frames
        .iter()
        .filter(|frame| frame.is_submitted())
        .cloned()
        .collect()
}

fn host_fault(kind: FaultKind, message: String) -> ErrorInfo {
    ErrorInfo {
        error_kind: kind.name().to_string(),
        error_message: message,
        frames: Vec::new(),
    }
}

fn describe_duration(limit: Duration) -> String {
    let millis = limit.as_millis();
    if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{millis}ms")
    }
}
