#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # siftc CLI
//!
//! Command-line front end for the siftc preprocessor library.

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use siftc::{
    DiagnosticEmitter, IncludeContext, IncludeKind, Preprocessor, PreprocessorConfig, RunStatus,
    WarningFlag,
};
use std::path::PathBuf;
use std::rc::Rc;

/// Exit codes for different error conditions
mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const DIAGNOSTIC_ERROR: i32 = 1;
    pub const IO_ERROR: i32 = 2;
    pub const PREPROCESS_ERROR: i32 = 3;
}

/// Command-line interface for the siftc preprocessor
#[derive(Parser)]
#[command(
    name = "siftc",
    version,
    author,
    about = "A C-style preprocessor with configurable conditional diagnostics",
    long_about = "siftc preprocesses C-style source: macro definition and expansion, \
includes, and #if/#elif conditional compilation, with gcc-compatible -W flags \
controlling how suspicious controlling expressions are reported.",
    after_help = "EXAMPLES:
  # Preprocess a file to stdout
  $ siftc input.c

  # Warn about undefined identifiers in #if expressions
  $ siftc input.c -W undef

  # Make those warnings fail the run
  $ siftc input.c -W error=undef

  # Flag order matters; the later flag wins
  $ siftc input.c -W undef -W no-undef     # silent again

  # Predefine macros and add include directories
  $ siftc input.c -D DEBUG -D VERSION=3 -I include -o output.i

  # Read from stdin
  $ cat input.c | siftc -"
)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Input file to preprocess (use '-' for stdin)
    input: PathBuf,

    /// Output file (use '-' for stdout, default: stdout)
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Predefine an object-like macro
    #[arg(short = 'D', long = "define", value_name = "NAME[=VALUE]")]
    defines: Vec<String>,

    /// Remove a macro definition after predefinitions are applied
    #[arg(short = 'U', long = "undef", value_name = "NAME")]
    undefines: Vec<String>,

    /// Add a directory to the include search path
    #[arg(short = 'I', long = "include", value_name = "DIR")]
    include_dirs: Vec<PathBuf>,

    /// Warning control, applied in the order given: <cat>, no-<cat>,
    /// error, no-error, error=<cat>, no-error=<cat>
    #[arg(short = 'W', value_name = "SPEC")]
    warnings: Vec<String>,

    /// Maximum recursion depth for macro expansion
    #[arg(long, default_value = "128")]
    recursion_limit: usize,

    /// Suppress informational output
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Show processing details on completion
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Disable colored diagnostics
    #[arg(long)]
    no_color: bool,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let code = match execute(&cli) {
        Ok(status) => {
            if status.success() {
                exit_code::SUCCESS
            } else {
                exit_code::DIAGNOSTIC_ERROR
            }
        }
        Err(err) => {
            eprintln!("siftc: error: {err:#}");
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

/// Map an error to the process exit code
fn exit_code_for(error: &anyhow::Error) -> i32 {
    if error.downcast_ref::<std::io::Error>().is_some() {
        exit_code::IO_ERROR
    } else if let Some(pp_error) = error.downcast_ref::<siftc::PreprocessError>() {
        match pp_error {
            siftc::PreprocessError::Io(_) => exit_code::IO_ERROR,
            _ => exit_code::PREPROCESS_ERROR,
        }
    } else {
        exit_code::DIAGNOSTIC_ERROR
    }
}

/// Run one preprocessing job and return its accumulated status
fn execute(cli: &Cli) -> Result<RunStatus> {
    if cli.recursion_limit == 0 {
        anyhow::bail!("recursion limit must be greater than 0");
    }

    let input_text = read_input(&cli.input)?;
    let config = build_config(cli)?;

    let mut pp = Preprocessor::with_config(&config);
    pp.set_current_file(display_path(&cli.input));

    let started = std::time::Instant::now();
    let text = pp.process(&input_text)?;
    let elapsed = started.elapsed();

    write_output(cli, &text)?;

    if cli.verbose && !cli.quiet {
        eprintln!(
            "siftc: {} -> {} in {elapsed:?}",
            display_path(&cli.input),
            cli.output.as_ref().map_or("stdout".to_string(), |p| display_path(p))
        );
        let status = pp.status();
        if status.error_count > 0 {
            eprintln!("siftc: {} diagnostic error(s)", status.error_count);
        }
    }

    Ok(pp.status())
}

/// Build the library configuration from command-line arguments
fn build_config(cli: &Cli) -> Result<PreprocessorConfig> {
    let mut flags = Vec::with_capacity(cli.warnings.len());
    for spec in &cli.warnings {
        let flag = WarningFlag::parse(spec)
            .ok_or_else(|| anyhow::anyhow!("unrecognized warning option: -W{spec}"))?;
        flags.push(flag);
    }

    let mut config = PreprocessorConfig::new()
        .with_warning_flags(flags)
        .with_recursion_limit(cli.recursion_limit)
        .with_diagnostic_emitter(diagnostic_emitter(cli));

    for define in &cli.defines {
        let (name, body) = match define.split_once('=') {
            Some((name, body)) => (name, body),
            None => (define.as_str(), "1"),
        };
        if name.is_empty() {
            anyhow::bail!("invalid macro definition: -D{define}");
        }
        config = config.with_define(name, body);
    }
    for name in &cli.undefines {
        config = config.with_undef(name.as_str());
    }

    Ok(config.with_include_resolver(include_resolver(cli)))
}

/// Resolver searching the input file's directory (quote form only) and
/// then the `-I` directories, in order.
fn include_resolver(
    cli: &Cli,
) -> impl Fn(&str, IncludeKind, &IncludeContext) -> Option<String> + 'static {
    let input_dir = (cli.input != PathBuf::from("-"))
        .then(|| cli.input.parent().map(PathBuf::from))
        .flatten();
    let search_dirs = cli.include_dirs.clone();

    move |path, kind, _context| {
        let local = (kind == IncludeKind::Local)
            .then_some(input_dir.as_ref())
            .flatten();
        for dir in local.into_iter().chain(search_dirs.iter()) {
            let candidate = dir.join(path);
            if let Ok(content) = std::fs::read_to_string(&candidate) {
                log::debug!("resolved include {path} -> {}", candidate.display());
                return Some(content);
            }
        }
        None
    }
}

/// Emitter that colors severity prefixes when writing to a terminal
fn diagnostic_emitter(cli: &Cli) -> DiagnosticEmitter {
    let colorize = !cli.no_color && atty::is(atty::Stream::Stderr);
    Rc::new(move |line: &str| {
        if !colorize {
            eprintln!("{line}");
        } else if let Some((head, tail)) = line.split_once("warning:") {
            eprintln!("{head}{}{tail}", "warning:".magenta().bold());
        } else if let Some((head, tail)) = line.split_once("error:") {
            eprintln!("{head}{}{tail}", "error:".red().bold());
        } else {
            eprintln!("{line}");
        }
    })
}

/// Read input from file or stdin
fn read_input(input_path: &PathBuf) -> Result<String> {
    if input_path == &PathBuf::from("-") {
        use std::io::Read;
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("failed to read from stdin")?;
        Ok(buffer)
    } else {
        std::fs::read_to_string(input_path)
            .with_context(|| format!("failed to read input file: {}", input_path.display()))
    }
}

/// Write output to file or stdout
fn write_output(cli: &Cli, content: &str) -> Result<()> {
    match &cli.output {
        Some(output_path) if output_path != &PathBuf::from("-") => {
            std::fs::write(output_path, content).with_context(|| {
                format!("failed to write output file: {}", output_path.display())
            })?;
        }
        _ => {
            print!("{content}");
            if !content.ends_with('\n') {
                println!();
            }
        }
    }
    Ok(())
}

/// Render a path for display, mapping '-' to the conventional pseudo-name
fn display_path(path: &PathBuf) -> String {
    if path == &PathBuf::from("-") {
        "<stdin>".to_string()
    } else {
        path.display().to_string()
    }
}
