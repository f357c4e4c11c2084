// Compile job seam.
//
// Membership is evaluated by an external asynchronous compile job. The
// engine only fires the trigger; it never waits for, cancels or retries it.

use parking_lot::Mutex;

use crate::audience_metadata::AudienceId;

/// Fire-and-forget trigger for the external compile job.
pub trait CompileTrigger: Send + Sync {
    /// Requests a compile run. Implementations report their own failures;
    /// nothing is returned to the engine.
    fn run_compile(&self, audience_id: AudienceId, start: bool, full: bool, audience_name: &str);
}

/// Trigger that drops every request
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCompileTrigger;

impl CompileTrigger for NoopCompileTrigger {
    fn run_compile(&self, audience_id: AudienceId, _start: bool, _full: bool, audience_name: &str) {
        log::debug!("compile skipped for '{}' ({})", audience_name, audience_id);
    }
}

/// One recorded compile request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileRequest {
    pub audience_id: AudienceId,
    pub audience_name: String,
    pub start: bool,
    pub full: bool,
}

/// Trigger that keeps every request in memory
#[derive(Debug, Default)]
pub struct RecordingCompileTrigger {
    requests: Mutex<Vec<CompileRequest>>,
}

impl RecordingCompileTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<CompileRequest> {
        self.requests.lock().clone()
    }

    pub fn take(&self) -> Vec<CompileRequest> {
        std::mem::take(&mut *self.requests.lock())
    }
}

impl CompileTrigger for RecordingCompileTrigger {
    fn run_compile(&self, audience_id: AudienceId, start: bool, full: bool, audience_name: &str) {
        self.requests.lock().push(CompileRequest {
            audience_id,
            audience_name: audience_name.to_string(),
            start,
            full,
        });
    }
}
