//! Diagnostic events, their delivery, and run-status accumulation.

use std::rc::Rc;

use crate::policy::{DiagnosticPolicy, Disposition};

/// Receives rendered diagnostic lines. Defaults to standard error.
pub type DiagnosticEmitter = Rc<dyn Fn(&str)>;

/// One diagnostic event raised during evaluation.
///
/// Ephemeral: produced at the point a suspicious construct is actually
/// evaluated and handed straight to the sink.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    /// Policy category, e.g. [`crate::policy::UNDEF`]
    pub category: &'static str,
    /// Message body without severity framing
    pub message: String,
    /// File the construct was evaluated in
    pub file: String,
    /// 1-based line
    pub line: usize,
    /// 1-based column
    pub column: usize,
}

/// Cumulative outcome of one preprocessing run.
///
/// Counts only increase. Error-classified diagnostics do not stop
/// processing, but any nonzero count makes the run unsuccessful.
#[derive(Clone, Copy, Debug, Default)]
pub struct RunStatus {
    /// Number of diagnostics classified as errors
    pub error_count: u64,
    /// Whether a fatal structural error stopped processing
    pub had_fatal: bool,
}

impl RunStatus {
    /// Whether the run completed cleanly.
    #[must_use]
    pub fn success(&self) -> bool {
        self.error_count == 0 && !self.had_fatal
    }
}

/// Applies the diagnostic policy to events and accumulates the run status.
pub struct DiagnosticSink {
    policy: DiagnosticPolicy,
    emitter: Option<DiagnosticEmitter>,
    status: RunStatus,
}

impl DiagnosticSink {
    /// Create a sink that writes to standard error.
    #[must_use]
    pub fn new(policy: DiagnosticPolicy) -> Self {
        DiagnosticSink {
            policy,
            emitter: None,
            status: RunStatus::default(),
        }
    }

    /// Route rendered lines through `emitter` instead of standard error.
    #[must_use]
    pub fn with_emitter(mut self, emitter: DiagnosticEmitter) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Record one event: classify it, emit at most one line, update status.
    pub fn record(&mut self, event: &Diagnostic) {
        match self.policy.classify(event.category) {
            Disposition::Suppressed => {
                log::trace!("suppressed {} diagnostic: {}", event.category, event.message);
            }
            Disposition::Warn => {
                self.emit(&format!(
                    "{}:{}:{}: warning: {} [-W{}]",
                    event.file, event.line, event.column, event.message, event.category
                ));
            }
            Disposition::Error => {
                self.emit(&format!(
                    "{}:{}:{}: error: {} [-Werror={}]",
                    event.file, event.line, event.column, event.message, event.category
                ));
                self.status.error_count += 1;
            }
        }
    }

    /// Emit a line outside the category policy, e.g. for `#warning`.
    pub fn emit(&self, line: &str) {
        match &self.emitter {
            Some(emitter) => emitter(line),
            None => eprintln!("{line}"),
        }
    }

    /// Note that processing stopped on a structural error.
    pub fn mark_fatal(&mut self) {
        self.status.had_fatal = true;
    }

    /// Current accumulated status.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.status
    }
}
