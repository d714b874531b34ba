#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # siftc
//!
//! A C-style source preprocessor built around conditional compilation and
//! a configurable diagnostic policy. It processes `#define`, `#undef`,
//! `#include`, the full `#if`/`#ifdef`/`#elif`/`#else`/`#endif` family,
//! `#error`, `#warning`, `#line` and `#pragma once`, expanding object-like
//! and function-like macros along the way.
//!
//! Controlling expressions are evaluated lazily: the right operand of a
//! short-circuited `&&`/`||` is never visited, and an undefined identifier
//! is only reported when its value is actually demanded. Whether such a
//! report is silence, a warning, or an error that fails the run is decided
//! by warning flags compiled into a [`DiagnosticPolicy`]:
//!
//! ```
//! use siftc::{preprocess, PreprocessorConfig, WarningFlag};
//!
//! let config = PreprocessorConfig::new()
//!     .with_warning_flags(WarningFlag::parse("undef"));
//! let output = preprocess("#if FOO == 0\nint a;\n#endif\n", &config).unwrap();
//! assert!(output.text.contains("int a;"));
//! assert!(output.status.success()); // a warning was printed, not an error
//! ```

mod conditional;
mod config;
mod context;
mod date_time;
mod diag;
mod driver;
mod error;
mod expr;
mod lexer;
mod macro_def;
mod policy;
mod token;

pub use config::{IncludeContext, IncludeKind, IncludeResolver, PreprocessorConfig};
pub use diag::{Diagnostic, DiagnosticEmitter, DiagnosticSink, RunStatus};
pub use driver::Preprocessor;
pub use error::PreprocessError;
pub use macro_def::MacroDef;
pub use policy::{CategoryState, DiagnosticPolicy, Disposition, UNDEF, WarningFlag};

use std::path::Path;

/// Result of a completed preprocessing run.
pub struct PreprocessOutput {
    /// The preprocessed source text
    pub text: String,
    /// Accumulated diagnostic totals; consult [`RunStatus::success`] for
    /// the final verdict
    pub status: RunStatus,
}

/// Preprocess source text with the given configuration.
///
/// # Errors
/// Returns `PreprocessError` on malformed directives, invalid controlling
/// expressions, unbalanced conditionals, or include failures. Diagnostics
/// subject to the warning policy never produce an `Err`; they are reported
/// in the returned [`RunStatus`].
pub fn preprocess<S: AsRef<str>>(
    input: S,
    config: &PreprocessorConfig,
) -> Result<PreprocessOutput, PreprocessError> {
    let mut pp = Preprocessor::with_config(config);
    let text = pp.process(input.as_ref())?;
    Ok(PreprocessOutput {
        text,
        status: pp.status(),
    })
}

/// Preprocess a file and return the result.
///
/// # Errors
/// Returns `PreprocessError` if the file cannot be read or preprocessing
/// fails.
pub fn preprocess_file<P: AsRef<Path>>(
    input_path: P,
    config: &PreprocessorConfig,
) -> Result<PreprocessOutput, PreprocessError> {
    let input = std::fs::read_to_string(&input_path)?;
    let mut pp = Preprocessor::with_config(config);
    pp.set_current_file(input_path.as_ref().display().to_string());
    let text = pp.process(&input)?;
    Ok(PreprocessOutput {
        text,
        status: pp.status(),
    })
}

impl WarningFlag {
    /// Parse a sequence of `-W` specs in order, dropping malformed ones,
    /// convenient for feeding
    /// [`PreprocessorConfig::with_warning_flags`] directly.
    #[must_use]
    pub fn parse_all<'a, I: IntoIterator<Item = &'a str>>(specs: I) -> Vec<WarningFlag> {
        specs.into_iter().filter_map(WarningFlag::parse).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    /// The canonical suspicious input: FOO is nowhere defined.
    const UNDEF_INPUT: &str = "#if FOO == 0\nint a;\n#endif\n";

    fn run_with_flags(
        src: &str,
        specs: &[&str],
    ) -> (Result<String, PreprocessError>, Vec<String>, RunStatus) {
        let lines = Rc::new(RefCell::new(Vec::new()));
        let captured = Rc::clone(&lines);
        let config = PreprocessorConfig::new()
            .with_warning_flags(WarningFlag::parse_all(specs.iter().copied()))
            .with_diagnostic_emitter(Rc::new(move |line: &str| {
                captured.borrow_mut().push(line.to_string());
            }));
        let mut pp = Preprocessor::with_config(&config);
        let result = pp.process(src);
        let status = pp.status();
        let lines = lines.borrow().clone();
        (result, lines, status)
    }

    // ---- warning policy scenarios -----------------------------------------

    const WARN_LINE: &str =
        "<stdin>:1:5: warning: \"FOO\" is not defined, evaluates to 0 [-Wundef]";
    const ERROR_LINE: &str =
        "<stdin>:1:5: error: \"FOO\" is not defined, evaluates to 0 [-Werror=undef]";

    #[test]
    fn wundef_warns_and_succeeds() {
        let (result, lines, status) = run_with_flags(UNDEF_INPUT, &["undef"]);
        assert!(result.unwrap().contains("int a;"));
        assert_eq!(lines, [WARN_LINE]);
        assert!(status.success());
    }

    #[test]
    fn wundef_then_no_undef_is_silent() {
        let (result, lines, status) = run_with_flags(UNDEF_INPUT, &["undef", "no-undef"]);
        assert!(result.is_ok());
        assert!(lines.is_empty());
        assert!(status.success());
    }

    #[test]
    fn no_undef_then_wundef_warns() {
        let (_, lines, status) = run_with_flags(UNDEF_INPUT, &["no-undef", "undef"]);
        assert_eq!(lines, [WARN_LINE]);
        assert!(status.success());
    }

    #[test]
    fn werror_undef_fails_the_run() {
        let (result, lines, status) = run_with_flags(UNDEF_INPUT, &["error=undef"]);
        // Processing still runs to completion; only the status flips.
        assert!(result.unwrap().contains("int a;"));
        assert_eq!(lines, [ERROR_LINE]);
        assert_eq!(status.error_count, 1);
        assert!(!status.success());
    }

    #[test]
    fn werror_undef_then_wundef_still_errors() {
        let (_, lines, status) = run_with_flags(UNDEF_INPUT, &["error=undef", "undef"]);
        assert_eq!(lines, [ERROR_LINE]);
        assert!(!status.success());
    }

    #[test]
    fn werror_undef_then_no_error_undef_is_silent() {
        let (_, lines, status) = run_with_flags(UNDEF_INPUT, &["error=undef", "no-error=undef"]);
        assert!(lines.is_empty());
        assert!(status.success());
    }

    #[test]
    fn no_error_undef_then_werror_undef_errors() {
        let (_, lines, status) = run_with_flags(UNDEF_INPUT, &["no-error=undef", "error=undef"]);
        assert_eq!(lines, [ERROR_LINE]);
        assert!(!status.success());
    }

    #[test]
    fn wundef_with_global_werror_errors() {
        let (_, lines, status) = run_with_flags(UNDEF_INPUT, &["undef", "error"]);
        assert_eq!(lines, [ERROR_LINE]);
        assert!(!status.success());
    }

    #[test]
    fn global_werror_alone_is_silent() {
        let (_, lines, status) = run_with_flags(UNDEF_INPUT, &["error"]);
        assert!(lines.is_empty());
        assert!(status.success());
    }

    #[test]
    fn category_pin_survives_later_global_werror() {
        let (_, lines, status) =
            run_with_flags(UNDEF_INPUT, &["no-error=undef", "error", "undef"]);
        assert_eq!(lines, [WARN_LINE]);
        assert!(status.success());
    }

    // ---- laziness ---------------------------------------------------------

    #[test]
    fn defined_guard_suppresses_undef_report() {
        let src = "#if defined(FOO) && FOO == 0\nint a;\n#endif\n";
        for specs in [&["undef"][..], &["error=undef"][..], &["undef", "error"][..]] {
            let (result, lines, status) = run_with_flags(src, specs);
            assert!(!result.unwrap().contains("int a;"));
            assert!(lines.is_empty(), "no diagnostic under {specs:?}");
            assert!(status.success());
        }
    }

    #[test]
    fn or_short_circuit_suppresses_undef_report() {
        let src = "#if 1 || FOO\nint a;\n#endif\n";
        let (result, lines, status) = run_with_flags(src, &["undef"]);
        assert!(result.unwrap().contains("int a;"));
        assert!(lines.is_empty());
        assert!(status.success());
    }

    #[test]
    fn evaluated_operand_is_reported() {
        let src = "#if 1 && BAR\nint a;\n#endif\n";
        let (_, lines, status) = run_with_flags(src, &["undef"]);
        assert_eq!(
            lines,
            ["<stdin>:1:10: warning: \"BAR\" is not defined, evaluates to 0 [-Wundef]"]
        );
        assert!(status.success());
    }

    #[test]
    fn skipped_branch_raises_no_diagnostics() {
        let src = "#if 1\nint a;\n#elif FOO\nint b;\n#endif\n";
        let (result, lines, _) = run_with_flags(src, &["undef"]);
        assert!(result.unwrap().contains("int a;"));
        assert!(lines.is_empty(), "#elif after a taken branch is dead");

        let src = "#if 0\nint a;\n#elif FOO\nint b;\n#endif\n";
        let (_, lines, _) = run_with_flags(src, &["undef"]);
        assert_eq!(lines.len(), 1, "a live #elif is evaluated");
    }

    #[test]
    fn region_inside_dead_branch_is_inert() {
        let src = "#if 0\n#if FOO\nint a;\n#endif\n#else\nint b;\n#endif\n";
        let (result, lines, status) = run_with_flags(src, &["error=undef"]);
        let text = result.unwrap();
        assert!(text.contains("int b;"));
        assert!(!text.contains("int a;"));
        assert!(lines.is_empty());
        assert!(status.success());
    }

    #[test]
    fn ifdef_never_reports_undef() {
        let src = "#ifdef FOO\nint a;\n#endif\n#ifndef FOO\nint b;\n#endif\n";
        let (result, lines, status) = run_with_flags(src, &["undef", "error"]);
        let text = result.unwrap();
        assert!(!text.contains("int a;"));
        assert!(text.contains("int b;"));
        assert!(lines.is_empty());
        assert!(status.success());
    }

    #[test]
    fn each_evaluation_reports_once() {
        let src = "#if FOO + FOO\nint a;\n#endif\n";
        let (_, lines, _) = run_with_flags(src, &["undef"]);
        assert_eq!(lines.len(), 2, "two demanded evaluations, two reports");
        assert!(lines.iter().all(|l| l.contains("warning:")));
    }

    // ---- structural errors ------------------------------------------------

    #[test]
    fn unterminated_if_is_fatal() {
        let (result, _, status) = run_with_flags("#if 1\nint a;\n", &[]);
        assert!(matches!(
            result,
            Err(PreprocessError::Conditional { .. })
        ));
        assert!(!status.success());
    }

    #[test]
    fn dangling_directives_are_fatal() {
        for src in ["#endif\n", "#elif 1\n", "#else\n"] {
            let (result, _, _) = run_with_flags(src, &[]);
            assert!(matches!(result, Err(PreprocessError::Conditional { .. })), "{src:?}");
        }
    }

    #[test]
    fn else_after_else_is_fatal() {
        let (result, _, _) = run_with_flags("#if 1\n#else\n#else\n#endif\n", &[]);
        assert!(matches!(result, Err(PreprocessError::Conditional { .. })));
    }

    #[test]
    fn division_by_zero_is_fatal_despite_policy() {
        // Not a category diagnostic: no flag ordering can soften it.
        for specs in [&[][..], &["no-undef"][..]] {
            let (result, _, status) = run_with_flags("#if 1 / 0\n#endif\n", specs);
            assert!(matches!(result, Err(PreprocessError::Expression { .. })));
            assert!(!status.success());
        }
    }

    #[test]
    fn malformed_expression_is_fatal() {
        let (result, _, _) = run_with_flags("#if 1 +\n#endif\n", &[]);
        assert!(matches!(result, Err(PreprocessError::Expression { .. })));
    }

    // ---- preprocessing proper ---------------------------------------------

    #[test]
    fn simple_object_macro() {
        let src = "#define PI 3.14\nfloat x = PI;\n";
        let mut pp = Preprocessor::new();
        let out = pp.process(src).unwrap();
        assert!(out.contains("3.14"));
    }

    #[test]
    fn function_like_macro() {
        let src = "#define ADD(a, b) ((a)+(b))\nint z = ADD(1, 2);\n";
        let mut pp = Preprocessor::new();
        let out = pp.process(src).unwrap();
        assert!(out.contains("((1)+(2))"));
    }

    #[test]
    fn function_like_macro_without_call_stays() {
        let src = "#define F(x) x\nint (*p)(int) = F;\n";
        let mut pp = Preprocessor::new();
        let out = pp.process(src).unwrap();
        assert!(out.contains("= F;"));
    }

    #[test]
    fn macro_in_condition() {
        let src = "#define LEVEL 2\n#if LEVEL == 1\nint x = 1;\n#elif LEVEL == 2\nint x = 2;\n#else\nint x = 3;\n#endif\n";
        let mut pp = Preprocessor::new();
        let out = pp.process(src).unwrap();
        assert!(out.contains("int x = 2;"));
        assert!(!out.contains("int x = 1;"));
        assert!(!out.contains("int x = 3;"));
    }

    #[test]
    fn function_like_macro_in_condition() {
        let src = "#define ADD(a, b) ((a)+(b))\n#if ADD(1, 2) == 3\nyes\n#endif\n";
        let mut pp = Preprocessor::new();
        let out = pp.process(src).unwrap();
        assert!(out.contains("yes"));
    }

    #[test]
    fn defined_operand_survives_expansion() {
        // FOO expands to 1; the defined() operand must not.
        let src = "#define FOO 1\n#if defined(FOO) && FOO\nyes\n#endif\n";
        let mut pp = Preprocessor::new();
        let out = pp.process(src).unwrap();
        assert!(out.contains("yes"));
    }

    #[test]
    fn defined_without_parens() {
        let src = "#define FOO 1\n#if defined FOO\nyes\n#endif\n";
        let mut pp = Preprocessor::new();
        let out = pp.process(src).unwrap();
        assert!(out.contains("yes"));
    }

    #[test]
    fn conditional_compilation_ifdef() {
        let src = "#define DEBUG 1\n#ifdef DEBUG\nint x = 1;\n#else\nint x = 0;\n#endif\n";
        let mut pp = Preprocessor::new();
        let out = pp.process(src).unwrap();
        assert!(out.contains("int x = 1;"));
        assert!(!out.contains("int x = 0;"));
    }

    #[test]
    fn expression_arithmetic() {
        let src = "#if 1 + 2 * 3 == 7\nint x = 1;\n#endif\n";
        let mut pp = Preprocessor::new();
        assert!(pp.process(src).unwrap().contains("int x = 1;"));
    }

    #[test]
    fn expression_logical() {
        let src = "#if (1 && 0) || (0 && 1) || (1 && 1)\nint x = 1;\n#endif\n";
        let mut pp = Preprocessor::new();
        assert!(pp.process(src).unwrap().contains("int x = 1;"));
    }

    #[test]
    fn expression_comparison() {
        let src = "#if 5 > 3 && 10 >= 10 && 2 < 4 && 5 <= 5 && 3 != 4 && 5 == 5\nint x = 1;\n#endif\n";
        let mut pp = Preprocessor::new();
        assert!(pp.process(src).unwrap().contains("int x = 1;"));
    }

    #[test]
    fn expression_unary() {
        let src = "#if !0 && !!1 && -(-5) == 5\nint x = 1;\n#endif\n";
        let mut pp = Preprocessor::new();
        assert!(pp.process(src).unwrap().contains("int x = 1;"));
    }

    #[test]
    fn expression_bitwise() {
        let src = "#if (0xF0 | 0x0F) == 0xFF && (1 << 4) == 16\nint x = 1;\n#endif\n";
        let mut pp = Preprocessor::new();
        assert!(pp.process(src).unwrap().contains("int x = 1;"));
    }

    #[test]
    fn include_example() {
        let src = "#include \"inc.h\"\nint x = FOO;\n";
        let mut pp = Preprocessor::new().with_include_resolver(|path, _, _| {
            (path == "inc.h").then(|| "#define FOO 42\n".to_string())
        });
        let out = pp.process(src).unwrap();
        assert!(out.contains("42"));
    }

    #[test]
    fn include_cycle_is_fatal() {
        let src = "#include \"a.h\"\n";
        let mut pp = Preprocessor::new().with_include_resolver(|path, _, _| {
            match path {
                "a.h" => Some("#include \"b.h\"\n".to_string()),
                "b.h" => Some("#include \"a.h\"\n".to_string()),
                _ => None,
            }
        });
        assert!(pp.process(src).is_err());
    }

    #[test]
    fn pragma_once() {
        let src = "#include \"header.h\"\n#include \"header.h\"\nint y = x;\n";
        let mut pp = Preprocessor::new().with_include_resolver(|path, _, _| {
            (path == "header.h").then(|| "#pragma once\nint x = 42;".to_string())
        });
        let out = pp.process(src).unwrap();
        assert_eq!(out.matches("int x = 42;").count(), 1);
        assert!(out.contains("int y = x;"));
    }

    #[test]
    fn comment_stripping() {
        let src = "// This is a comment\nint x = 1; /* inline comment */\n#define MACRO // comment after define\nint y = MACRO;\n";
        let mut pp = Preprocessor::new();
        let out = pp.process(src).unwrap();
        assert!(out.contains("int x = 1; "));
        assert!(out.contains("int y = ;"));
    }

    #[test]
    fn dynamic_macros() {
        let src = "#define LINE __LINE__\n#define FILE __FILE__\nint line = LINE;\nconst char* file = FILE;\n";
        let mut pp = Preprocessor::new();
        pp.set_current_file("test.c");
        let out = pp.process(src).unwrap();
        assert!(out.contains("int line = 3;"));
        assert!(out.contains("const char* file = \"test.c\";"));
    }

    #[test]
    fn error_directive() {
        let src = "#if 0\n#else\n#error This should error\n#endif\n";
        let mut pp = Preprocessor::new();
        assert!(pp.process(src).is_err());
    }

    #[test]
    fn error_directive_in_dead_branch_is_ignored() {
        let src = "#if 1\nint a;\n#else\n#error never reached\n#endif\n";
        let mut pp = Preprocessor::new();
        assert!(pp.process(src).unwrap().contains("int a;"));
    }

    #[test]
    fn line_directive_renumbers() {
        let lines = Rc::new(RefCell::new(Vec::new()));
        let captured = Rc::clone(&lines);
        let config = PreprocessorConfig::new()
            .with_warning_flags(WarningFlag::parse_all(["undef"]))
            .with_diagnostic_emitter(Rc::new(move |line: &str| {
                captured.borrow_mut().push(line.to_string());
            }));
        let src = "#line 100 \"moved.c\"\n#if FOO\n#endif\n";
        let mut pp = Preprocessor::with_config(&config);
        pp.process(src).unwrap();
        assert_eq!(
            lines.borrow().as_slice(),
            ["moved.c:100:5: warning: \"FOO\" is not defined, evaluates to 0 [-Wundef]"]
        );
    }

    #[test]
    fn undef_directive() {
        let src = "#define FOO 1\n#undef FOO\nint x = FOO;\n";
        let mut pp = Preprocessor::new();
        let out = pp.process(src).unwrap();
        assert!(out.contains("FOO"));
    }

    #[test]
    fn variadic_macro() {
        let src = "#define LOG(fmt, ...) printf(fmt, __VA_ARGS__)\nLOG(\"hello %s\\n\", \"world\");\n";
        let mut pp = Preprocessor::new();
        let out = pp.process(src).unwrap();
        assert!(out.contains("printf(\"hello %s\\n\", \"world\")"));
    }

    #[test]
    fn nested_macros() {
        let src = "#define ADD(a, b) ((a)+(b))\n#define MUL(a, b) ((a)*(b))\nint x = ADD(ADD(1, 2), MUL(3, 4));\n";
        let mut pp = Preprocessor::new();
        let out = pp.process(src).unwrap();
        assert!(out.contains("((1)+(2))"));
        assert!(out.contains("((3)*(4))"));
        assert!(out.contains("int x ="));
    }

    #[test]
    fn macro_with_stringification() {
        let src = "#define STR(x) #x\nconst char* s = STR(hello);\n";
        let mut pp = Preprocessor::new();
        let out = pp.process(src).unwrap();
        assert!(out.contains("\"hello\""));
    }

    #[test]
    fn token_pasting_basic() {
        let src = "#define PASTE(a,b) a##b\nint x1 = PASTE(x, 1);\n";
        let mut pp = Preprocessor::new();
        let out = pp.process(src).unwrap();
        assert!(out.contains("x1"));
    }

    #[test]
    fn self_referential_macro_terminates() {
        let src = "#define FOO FOO + 1\nint x = FOO;\n";
        let mut pp = Preprocessor::new();
        let out = pp.process(src).unwrap();
        assert!(out.contains("FOO + 1"));
    }

    #[test]
    fn line_continuation() {
        let src = "#define LONG \\\n 42\nint x = LONG;\n";
        let mut pp = Preprocessor::new();
        let out = pp.process(src).unwrap();
        assert!(out.contains("42"));
    }

    #[test]
    fn config_predefines_apply() {
        let config = PreprocessorConfig::new()
            .with_define("VERSION", "3")
            .with_define("GONE", "1")
            .with_undef("GONE");
        let src = "#if VERSION == 3 && !defined(GONE)\nyes\n#endif\n";
        let output = preprocess(src, &config).unwrap();
        assert!(output.text.contains("yes"));
    }

    #[test]
    fn status_accumulates_across_inputs() {
        let config = PreprocessorConfig::new()
            .with_warning_flags(WarningFlag::parse_all(["error=undef"]))
            .with_diagnostic_emitter(Rc::new(|_: &str| {}));
        let mut pp = Preprocessor::with_config(&config);
        pp.process(UNDEF_INPUT).unwrap();
        pp.process(UNDEF_INPUT).unwrap();
        assert_eq!(pp.status().error_count, 2);
        assert!(!pp.status().success());
    }
}
