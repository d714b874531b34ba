use std::rc::Rc;

use crate::diag::DiagnosticEmitter;
use crate::policy::WarningFlag;

/// Kind of include directive
#[derive(Clone, Debug, PartialEq)]
pub enum IncludeKind {
    /// Local include with quotes: #include "file.h"
    Local,
    /// System include with angles: #include <file.h>
    System,
}

/// Context for include resolution
#[derive(Clone, Debug, Default)]
pub struct IncludeContext {
    /// Stack of currently included files for cycle detection and context
    pub include_stack: Vec<String>,
    /// List of include directories to search
    pub include_dirs: Vec<String>,
}

/// Type alias for include resolver function
pub type IncludeResolver = Rc<dyn Fn(&str, IncludeKind, &IncludeContext) -> Option<String>>;

/// Configuration for one preprocessing run.
///
/// The warning flags are kept in the exact order they were supplied;
/// order decides the outcome when flags contradict each other.
pub struct PreprocessorConfig {
    /// Ordered warning-control flags (the text after each `-W`)
    pub warning_flags: Vec<WarningFlag>,
    /// Macros to predefine before processing, as `(name, body)`
    pub defines: Vec<(String, String)>,
    /// Macro names to remove after predefinition
    pub undefines: Vec<String>,
    /// Maximum recursion depth for macro expansion
    pub recursion_limit: usize,
    /// Custom include file resolver function
    pub include_resolver: Option<IncludeResolver>,
    /// Where rendered diagnostic lines go; standard error when unset
    pub diagnostic_emitter: Option<DiagnosticEmitter>,
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PreprocessorConfig {
    /// Create a configuration with defaults: no flags, no predefines, a
    /// recursion limit of 128.
    #[must_use]
    pub fn new() -> Self {
        Self {
            warning_flags: Vec::new(),
            defines: Vec::new(),
            undefines: Vec::new(),
            recursion_limit: 128,
            include_resolver: None,
            diagnostic_emitter: None,
        }
    }

    /// Append one warning flag.
    #[must_use]
    pub fn with_warning_flag(mut self, flag: WarningFlag) -> Self {
        self.warning_flags.push(flag);
        self
    }

    /// Append warning flags, preserving their order.
    #[must_use]
    pub fn with_warning_flags<I: IntoIterator<Item = WarningFlag>>(mut self, flags: I) -> Self {
        self.warning_flags.extend(flags);
        self
    }

    /// Predefine an object-like macro.
    #[must_use]
    pub fn with_define<S: Into<String>>(mut self, name: S, body: S) -> Self {
        self.defines.push((name.into(), body.into()));
        self
    }

    /// Remove a macro after predefinition.
    #[must_use]
    pub fn with_undef<S: Into<String>>(mut self, name: S) -> Self {
        self.undefines.push(name.into());
        self
    }

    /// Override the macro-expansion recursion limit.
    #[must_use]
    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    /// Set a custom include resolver.
    #[must_use]
    pub fn with_include_resolver<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, IncludeKind, &IncludeContext) -> Option<String> + 'static,
    {
        self.include_resolver = Some(Rc::new(f));
        self
    }

    /// Route diagnostic lines somewhere other than standard error.
    #[must_use]
    pub fn with_diagnostic_emitter(mut self, emitter: DiagnosticEmitter) -> Self {
        self.diagnostic_emitter = Some(emitter);
        self
    }
}
