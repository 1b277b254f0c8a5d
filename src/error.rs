// ABOUTME: Error taxonomy for the HPL interpreter, covering the document
// loader, lexer, parser, evaluator, module loader, and sandbox runner.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HplError {
    #[error("{message}")]
    SyntaxError {
        message: String,
        line: Option<u32>,
        column: Option<u32>,
        error_key: &'static str,
    },

    #[error("{message}")]
    ImportError {
        message: String,
        line: Option<u32>,
        column: Option<u32>,
        error_key: &'static str,
    },

    #[error("{message}")]
    NameError {
        message: String,
        line: Option<u32>,
        column: Option<u32>,
        call_stack: Vec<String>,
        error_key: &'static str,
    },

    #[error("{message}")]
    TypeError {
        message: String,
        line: Option<u32>,
        column: Option<u32>,
        call_stack: Vec<String>,
        error_key: &'static str,
    },

    #[error("{message}")]
    IndexError {
        message: String,
        line: Option<u32>,
        column: Option<u32>,
        call_stack: Vec<String>,
        error_key: &'static str,
    },

    #[error("{message}")]
    ArithmeticError {
        message: String,
        line: Option<u32>,
        column: Option<u32>,
        call_stack: Vec<String>,
        error_key: &'static str,
    },

    #[error("{message}")]
    MethodNotFound {
        message: String,
        line: Option<u32>,
        column: Option<u32>,
        call_stack: Vec<String>,
        error_key: &'static str,
    },

    #[error("{message}")]
    RuntimeError {
        message: String,
        line: Option<u32>,
        column: Option<u32>,
        call_stack: Vec<String>,
        error_key: &'static str,
    },

    /// Only ever produced by the sandbox runner, never by the evaluator
    /// itself; `try/catch` cannot catch this (spec.md §7).
    #[error("{message}")]
    TimeoutError { message: String },

    /// Only ever produced by the sandbox runner; see `TimeoutError`.
    #[error("{message}")]
    MemoryLimitExceeded { message: String },

    #[error("{message}")]
    SandboxError { message: String },
}

impl HplError {
    pub fn kind(&self) -> &'static str {
        match self {
            HplError::SyntaxError { .. } => "SyntaxError",
            HplError::ImportError { .. } => "ImportError",
            HplError::NameError { .. } => "NameError",
            HplError::TypeError { .. } => "TypeError",
            HplError::IndexError { .. } => "IndexError",
            HplError::ArithmeticError { .. } => "ArithmeticError",
            HplError::MethodNotFound { .. } => "MethodNotFound",
            HplError::RuntimeError { .. } => "RuntimeError",
            HplError::TimeoutError { .. } => "TimeoutError",
            HplError::MemoryLimitExceeded { .. } => "MemoryLimitExceeded",
            HplError::SandboxError { .. } => "SandboxError",
        }
    }

    pub fn line(&self) -> Option<u32> {
        match self {
            HplError::SyntaxError { line, .. }
            | HplError::ImportError { line, .. }
            | HplError::NameError { line, .. }
            | HplError::TypeError { line, .. }
            | HplError::IndexError { line, .. }
            | HplError::ArithmeticError { line, .. }
            | HplError::MethodNotFound { line, .. }
            | HplError::RuntimeError { line, .. } => *line,
            _ => None,
        }
    }

    pub fn column(&self) -> Option<u32> {
        match self {
            HplError::SyntaxError { column, .. }
            | HplError::ImportError { column, .. }
            | HplError::NameError { column, .. }
            | HplError::TypeError { column, .. }
            | HplError::IndexError { column, .. }
            | HplError::ArithmeticError { column, .. }
            | HplError::MethodNotFound { column, .. }
            | HplError::RuntimeError { column, .. } => *column,
            _ => None,
        }
    }

    pub fn call_stack(&self) -> Vec<String> {
        match self {
            HplError::NameError { call_stack, .. }
            | HplError::TypeError { call_stack, .. }
            | HplError::IndexError { call_stack, .. }
            | HplError::ArithmeticError { call_stack, .. }
            | HplError::MethodNotFound { call_stack, .. }
            | HplError::RuntimeError { call_stack, .. } => call_stack.clone(),
            _ => Vec::new(),
        }
    }

    pub fn error_key(&self) -> Option<&'static str> {
        match self {
            HplError::SyntaxError { error_key, .. }
            | HplError::ImportError { error_key, .. }
            | HplError::NameError { error_key, .. }
            | HplError::TypeError { error_key, .. }
            | HplError::IndexError { error_key, .. }
            | HplError::ArithmeticError { error_key, .. }
            | HplError::MethodNotFound { error_key, .. }
            | HplError::RuntimeError { error_key, .. } => Some(error_key),
            _ => None,
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Attaches call-stack context to an error built deeper in the
    /// evaluator, before the current frame's label was known. A no-op if
    /// the error already carries one.
    pub fn with_call_stack(mut self, stack: Vec<String>) -> Self {
        match &mut self {
            HplError::NameError { call_stack, .. }
            | HplError::TypeError { call_stack, .. }
            | HplError::IndexError { call_stack, .. }
            | HplError::ArithmeticError { call_stack, .. }
            | HplError::MethodNotFound { call_stack, .. }
            | HplError::RuntimeError { call_stack, .. } => {
                if call_stack.is_empty() {
                    *call_stack = stack;
                }
            }
            _ => {}
        }
        self
    }

    pub fn syntax(message: impl Into<String>, line: u32, column: u32, error_key: &'static str) -> Self {
        HplError::SyntaxError {
            message: message.into(),
            line: Some(line),
            column: Some(column),
            error_key,
        }
    }

    pub fn import(message: impl Into<String>, error_key: &'static str) -> Self {
        HplError::ImportError {
            message: message.into(),
            line: None,
            column: None,
            error_key,
        }
    }

    pub fn name(message: impl Into<String>, line: u32, error_key: &'static str) -> Self {
        HplError::NameError {
            message: message.into(),
            line: Some(line),
            column: None,
            call_stack: Vec::new(),
            error_key,
        }
    }

    pub fn type_error(message: impl Into<String>, line: u32, error_key: &'static str) -> Self {
        HplError::TypeError {
            message: message.into(),
            line: Some(line),
            column: None,
            call_stack: Vec::new(),
            error_key,
        }
    }

    pub fn index(message: impl Into<String>, line: u32) -> Self {
        HplError::IndexError {
            message: message.into(),
            line: Some(line),
            column: None,
            call_stack: Vec::new(),
            error_key: "INDEX_OUT_OF_RANGE",
        }
    }

    pub fn arithmetic(message: impl Into<String>, line: u32) -> Self {
        HplError::ArithmeticError {
            message: message.into(),
            line: Some(line),
            column: None,
            call_stack: Vec::new(),
            error_key: "ARITHMETIC_ERROR",
        }
    }

    pub fn method_not_found(message: impl Into<String>, line: u32) -> Self {
        HplError::MethodNotFound {
            message: message.into(),
            line: Some(line),
            column: None,
            call_stack: Vec::new(),
            error_key: "METHOD_NOT_FOUND",
        }
    }

    pub fn runtime(message: impl Into<String>, line: u32, error_key: &'static str) -> Self {
        HplError::RuntimeError {
            message: message.into(),
            line: Some(line),
            column: None,
            call_stack: Vec::new(),
            error_key,
        }
    }

    pub fn stack_overflow(line: u32) -> Self {
        HplError::runtime("maximum recursion depth exceeded", line, "STACK_OVERFLOW")
    }

    pub fn timeout(seconds: f64) -> Self {
        HplError::TimeoutError {
            message: format!("execution exceeded {:.1}s wall-clock limit", seconds),
        }
    }

    pub fn memory_limit(limit_mb: u64) -> Self {
        HplError::MemoryLimitExceeded {
            message: format!("code used more than {}MB of memory", limit_mb),
        }
    }

    pub fn sandbox(message: impl Into<String>) -> Self {
        HplError::SandboxError {
            message: message.into(),
        }
    }

    /// Whether `try/catch` may intercept this error (spec.md §7).
    pub fn is_catchable(&self) -> bool {
        !matches!(
            self,
            HplError::TimeoutError { .. } | HplError::MemoryLimitExceeded { .. }
        )
    }
}

/// Composes the one-line summary, a 3-line source window around the
/// error line with a caret under the column, and the call stack
/// deepest-frame-first. Named and ordered after `format_error_for_user`
/// in the original implementation's execution service.
pub fn format_error_for_user(err: &HplError, source: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}: {}", err.kind(), err.message()));

    if let Some(line) = err.line() {
        let lines: Vec<&str> = source.lines().collect();
        let idx = line as usize;
        out.push('\n');
        let start = idx.saturating_sub(2).max(1);
        let end = (idx + 1).min(lines.len());
        for n in start..=end {
            if n == 0 || n > lines.len() {
                continue;
            }
            let text = lines[n - 1];
            out.push_str(&format!("{:>5} | {}\n", n, text));
            if n == idx {
                let col = err.column().unwrap_or(1).max(1) as usize;
                out.push_str(&format!("      | {}^\n", " ".repeat(col - 1)));
            }
        }
    }

    let stack = err.call_stack();
    if !stack.is_empty() {
        out.push_str("call stack (innermost first):\n");
        for frame in stack.iter().rev() {
            out.push_str(&format!("  at {}\n", frame));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        let err = HplError::index("index 5 out of range for array of length 3", 1);
        assert_eq!(err.kind(), "IndexError");
    }

    #[test]
    fn timeout_and_memory_errors_are_not_catchable() {
        assert!(!HplError::timeout(1.0).is_catchable());
        assert!(!HplError::memory_limit(100).is_catchable());
        assert!(HplError::index("x", 1).is_catchable());
    }

    #[test]
    fn formatter_includes_source_window_and_caret() {
        let err = HplError::TypeError {
            message: "expected Bool".to_string(),
            line: Some(2),
            column: Some(4),
            call_stack: vec!["main()".to_string()],
            error_key: "IF_CONDITION_NOT_BOOL",
        };
        let source = "x = 1\nif x: echo x\necho \"done\"";
        let formatted = format_error_for_user(&err, source);
        assert!(formatted.contains("TypeError: expected Bool"));
        assert!(formatted.contains("if x: echo x"));
        assert!(formatted.contains('^'));
        assert!(formatted.contains("main()"));
    }
}
