use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::conditional::ConditionalStack;
use crate::config::{IncludeResolver, PreprocessorConfig};
use crate::diag::DiagnosticSink;
use crate::lexer;
use crate::macro_def::MacroDef;
use crate::policy::DiagnosticPolicy;

/// All mutable state of one preprocessing run.
///
/// Kept separate from the driver so the directive logic can borrow fields
/// independently (the macro table read-only while the sink records).
pub(crate) struct PreprocessorContext {
    /// Defined macros
    pub macros: HashMap<String, MacroDef>,

    /// Macros temporarily disabled during their own expansion
    pub disabled_macros: HashSet<String>,

    /// Files guarded by `#pragma once` that were already included
    pub included_once: HashSet<String>,

    /// Stack of currently included files for cycle detection
    pub include_stack: Vec<String>,

    /// Custom include resolver function
    pub include_resolver: Option<IncludeResolver>,

    /// Open conditional regions
    pub conditionals: ConditionalStack,

    /// Diagnostic classification and delivery
    pub sink: DiagnosticSink,

    /// Current file name for diagnostics and `__FILE__`
    pub current_file: String,

    /// Current line number for diagnostics and `__LINE__`
    pub current_line: usize,

    /// Maximum recursion depth for macro expansion
    pub recursion_limit: usize,
}

impl Default for PreprocessorContext {
    fn default() -> Self {
        Self::new()
    }
}

impl PreprocessorContext {
    /// Create a context with defaults and an all-suppressing policy.
    #[must_use]
    pub fn new() -> Self {
        PreprocessorContext {
            macros: HashMap::new(),
            disabled_macros: HashSet::new(),
            included_once: HashSet::new(),
            include_stack: Vec::new(),
            include_resolver: None,
            conditionals: ConditionalStack::default(),
            sink: DiagnosticSink::new(DiagnosticPolicy::default()),
            current_file: "<stdin>".to_string(),
            current_line: 1,
            recursion_limit: 128,
        }
    }

    /// Apply a configuration: compile the warning policy, install the
    /// resolver and emitter, apply `-D`/`-U` style predefinitions.
    pub fn apply_config(&mut self, config: &PreprocessorConfig) {
        self.recursion_limit = config.recursion_limit;
        self.include_resolver.clone_from(&config.include_resolver);

        let policy = DiagnosticPolicy::compile(&config.warning_flags);
        self.sink = match &config.diagnostic_emitter {
            Some(emitter) => DiagnosticSink::new(policy).with_emitter(Rc::clone(emitter)),
            None => DiagnosticSink::new(policy),
        };

        for (name, body) in &config.defines {
            self.define(name, None, body, false);
        }
        for name in &config.undefines {
            self.undef(name);
        }
    }

    /// Define a macro with no source location (predefinition).
    pub fn define<S: AsRef<str>>(
        &mut self,
        name: S,
        params: Option<Vec<String>>,
        body: S,
        is_variadic: bool,
    ) {
        let stripped = lexer::strip_comments(body.as_ref());
        let body_tokens = lexer::tokenize_line(stripped.trim());
        self.macros.insert(
            name.as_ref().to_string(),
            MacroDef {
                params,
                body: Rc::new(body_tokens),
                is_variadic,
                location: None,
            },
        );
    }

    /// Remove a macro definition
    pub fn undef(&mut self, name: &str) {
        self.macros.remove(name);
    }

    /// Check if a macro is defined
    #[must_use]
    pub fn is_defined(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }
}
