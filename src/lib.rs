// ABOUTME: Library root exposing the three external entry points
// (`validate`, `execute`, `debug`) spec.md §6 defines, plus every
// internal module needed to build them.

pub mod ast;
pub mod config;
pub mod debug;
pub mod doc;
pub mod error;
pub mod eval;
pub mod lexer;
pub mod modules;
pub mod parser;
pub mod sandbox;
pub mod scope;
pub mod stdlib;
pub mod value;

use config::ResourceLimits;
use error::HplError;
use sandbox::{BreakpointSpec, RunRequest, SandboxResult};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One entry of a `validate` result (spec.md §6).
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub line: u32,
    pub column: u32,
    pub severity: String,
    pub message: String,
    pub error_key: Option<String>,
}

/// Input bundle for `execute`/`debug` (spec.md §6). `call_target` and
/// `call_args` are accepted for API-surface completeness; the evaluator
/// only ever legally runs the document's own `main`, so a `call_target`
/// other than `"main"` surfaces as the evaluator's own
/// `UnknownCallTarget` error rather than being dispatched to an arbitrary
/// function (see DESIGN.md).
#[derive(Default)]
pub struct ExecuteOptions {
    pub input: Option<Vec<String>>,
    pub call_target: Option<String>,
    pub call_args: Vec<String>,
    pub limits: Option<ResourceLimits>,
    pub breakpoints: Vec<BreakpointSpec>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ExecuteResult {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    pub error_type: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub execution_time: f64,
}

#[derive(Serialize, Deserialize, Default)]
pub struct DebugResult {
    #[serde(flatten)]
    pub execute: ExecuteResult,
    pub debug_info: Option<debug::DebugInfo>,
}

/// Writes `source` to a scratch file under `dir` so the document loader
/// (which is path-based) can be reused as-is. Named after the source's
/// own conventional extension rather than a fixed literal, so include
/// resolution inside the source still works if it references siblings
/// by relative path from the same directory.
fn stage_source(dir: &std::path::Path, source: &str) -> std::io::Result<PathBuf> {
    let path = dir.join("__validate_source__.hpl");
    std::fs::write(&path, source)?;
    Ok(path)
}

/// Checks `source` for structural and syntax errors without running it.
/// Because the parser and document loader both stop at the first error
/// (spec.md has no multi-error recovery mode), this returns at most one
/// diagnostic today; the `Vec` return shape matches spec.md §6 so a
/// future recovering parser can add more without changing callers.
pub fn validate(source: &str) -> Vec<Diagnostic> {
    let scratch_dir = std::env::temp_dir().join(format!("hpl-validate-{}", std::process::id()));
    if std::fs::create_dir_all(&scratch_dir).is_err() {
        return vec![Diagnostic {
            line: 0,
            column: 0,
            severity: "error".to_string(),
            message: "cannot allocate scratch directory for validation".to_string(),
            error_key: Some("SANDBOX_ERROR".to_string()),
        }];
    }

    let result = match stage_source(&scratch_dir, source) {
        Ok(path) => match doc::load_document(&path) {
            Ok(document) => check_document(&document),
            Err(e) => vec![diagnostic_from_error(&e)],
        },
        Err(e) => vec![Diagnostic {
            line: 0,
            column: 0,
            severity: "error".to_string(),
            message: format!("cannot stage source for validation: {}", e),
            error_key: Some("SANDBOX_ERROR".to_string()),
        }],
    };

    let _ = std::fs::remove_dir_all(&scratch_dir);
    result
}

fn check_document(document: &doc::Document) -> Vec<Diagnostic> {
    if let Some(src) = &document.main_func_source {
        if let Err(e) = doc::parse_function_source("main", src) {
            return vec![diagnostic_from_error(&e)];
        }
    }
    for (class_name, decl) in &document.classes {
        for (method_name, src) in &decl.methods {
            if let Err(e) = doc::parse_function_source(method_name, src) {
                let mut d = diagnostic_from_error(&e);
                d.message = format!("in class '{}': {}", class_name, d.message);
                return vec![d];
            }
        }
    }
    Vec::new()
}

fn diagnostic_from_error(e: &HplError) -> Diagnostic {
    Diagnostic {
        line: e.line().unwrap_or(0),
        column: e.column().unwrap_or(0),
        severity: "error".to_string(),
        message: e.message(),
        error_key: e.error_key().map(str::to_string),
    }
}

/// Runs `source` inside the sandboxed worker (spec.md §4.8, §6).
pub fn execute(source: &str, options: ExecuteOptions) -> ExecuteResult {
    run(source, options, false).execute
}

/// Runs `source` under the instrumented debug evaluator and returns the
/// execution trace alongside the usual result envelope (spec.md §4.7,
/// §6).
pub fn debug(source: &str, options: ExecuteOptions) -> DebugResult {
    run(source, options, true)
}

fn run(source: &str, options: ExecuteOptions, debug_run: bool) -> DebugResult {
    let scratch_dir = std::env::temp_dir().join(format!("hpl-execute-{}", std::process::id()));
    if let Err(e) = std::fs::create_dir_all(&scratch_dir) {
        return DebugResult {
            execute: ExecuteResult {
                success: false,
                error: Some(format!("cannot allocate scratch directory: {}", e)),
                error_type: Some("SandboxError".to_string()),
                ..Default::default()
            },
            debug_info: None,
        };
    }

    let entry_path = match stage_source(&scratch_dir, source) {
        Ok(path) => path,
        Err(e) => {
            let _ = std::fs::remove_dir_all(&scratch_dir);
            return DebugResult {
                execute: ExecuteResult {
                    success: false,
                    error: Some(format!("cannot stage source: {}", e)),
                    error_type: Some("SandboxError".to_string()),
                    ..Default::default()
                },
                debug_info: None,
            };
        }
    };

    let request = RunRequest {
        entry_file: &entry_path,
        includes: &[],
        call_target: options.call_target,
        stdin_input: options.input,
        debug: debug_run,
        breakpoints: options.breakpoints,
        limits: options.limits.unwrap_or_default(),
    };

    let result: SandboxResult = sandbox::run_sandboxed(request);
    let _ = std::fs::remove_dir_all(&scratch_dir);

    DebugResult {
        execute: ExecuteResult {
            success: result.success,
            output: result.output,
            error: result.error,
            error_type: result.error_type,
            line: result.line,
            column: result.column,
            execution_time: result.execution_time,
        },
        debug_info: result.debug_info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_well_formed_source() {
        let diagnostics = validate("main: (x) => { echo 1 }\ncall: main()\n");
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn validate_reports_broken_yaml_structure() {
        let diagnostics = validate("not: [valid: {\n");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, "error");
    }

    #[test]
    fn execute_runs_and_reports_success() {
        let result = execute(
            "main: (x) => { echo 1 + 2 }\ncall: main()\n",
            ExecuteOptions::default(),
        );
        assert!(result.success);
    }
}
