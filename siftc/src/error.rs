use thiserror::Error;

/// Errors that abort preprocessing of the current input.
///
/// These are structural failures: malformed directives, unbalanced
/// conditionals, bad controlling expressions. They are distinct from the
/// policy-driven diagnostics in [`crate::diag`], which never stop
/// processing on their own.
#[derive(Debug, Error)]
pub enum PreprocessError {
    /// Include file could not be resolved
    #[error("{file}:{line}: include not found: {path}")]
    IncludeNotFound {
        /// File containing the `#include`
        file: String,
        /// Line of the `#include`
        line: usize,
        /// The requested path
        path: String,
    },

    /// Malformed preprocessor directive
    #[error("{file}:{line}: malformed #{directive} directive")]
    MalformedDirective {
        /// File containing the directive
        file: String,
        /// Line of the directive
        line: usize,
        /// Directive name without the `#`
        directive: String,
    },

    /// Macro invoked with the wrong number of arguments
    #[error("{file}:{line}: {details}")]
    MacroArgMismatch {
        /// File of the invocation
        file: String,
        /// Line of the invocation
        line: usize,
        /// Human-readable mismatch description
        details: String,
    },

    /// Macro expansion recursed past the configured limit
    #[error("{file}:{line}: macro expansion recursion limit exceeded")]
    RecursionLimit {
        /// File of the expansion site
        file: String,
        /// Line of the expansion site
        line: usize,
    },

    /// Unbalanced or misplaced conditional directive
    #[error("{file}:{line}: {details}")]
    Conditional {
        /// File of the offending directive
        file: String,
        /// Line of the offending directive
        line: usize,
        /// What was unbalanced
        details: String,
    },

    /// Invalid `#if`/`#elif` controlling expression
    #[error("{file}:{line}:{column}: {details}")]
    Expression {
        /// File of the directive
        file: String,
        /// Line of the directive
        line: usize,
        /// Column within the directive line
        column: usize,
        /// What was wrong with the expression
        details: String,
    },

    /// `#error` directive reached in an active branch, or another
    /// directive-level failure
    #[error("{file}:{line}: {message}")]
    Directive {
        /// File of the directive
        file: String,
        /// Line of the directive
        line: usize,
        /// Directive message
        message: String,
    },

    /// I/O error while reading or writing files
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
