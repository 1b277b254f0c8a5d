// ABOUTME: End-to-end scenarios over the three library entry points
// (`validate`, `execute`, `debug`), covering arithmetic, error
// reporting, inheritance, timeouts, module imports, and debug traces.

use hpl_rs::debug::TraceEntryType;
use hpl_rs::{self as lib, sandbox::BreakpointSpec, ExecuteOptions};

#[test]
fn arithmetic_and_echo() {
    let result = lib::execute(
        "main: \"() => { x = 3 + 4 * 2; echo x }\"\n",
        ExecuteOptions::default(),
    );
    assert!(result.success);
    assert_eq!(result.output.as_deref(), Some("11\n"));
}

#[test]
fn index_error_reports_type_and_output() {
    let result = lib::execute(
        "main: \"() => { a = [1,2,3]; echo a[5] }\"\n",
        ExecuteOptions::default(),
    );
    assert!(!result.success);
    assert_eq!(result.error_type.as_deref(), Some("IndexError"));
    assert!(result.output.unwrap_or_default().is_empty());
}

#[test]
fn class_inheritance_dispatches_to_parent_method() {
    let source = r#"
classes:
  Base: { greet: "() => { return \"hi\" }" }
  Child: { parent: Base }
objects: { c: "Child()" }
main: "() => { echo c.greet() }"
"#;
    let result = lib::execute(source, ExecuteOptions::default());
    assert!(result.success);
    assert_eq!(result.output.as_deref(), Some("hi\n"));
}

#[test]
fn infinite_loop_times_out() {
    let limits = hpl_rs::config::ResourceLimits {
        wall_clock_seconds: 1,
        ..Default::default()
    };
    let result = lib::execute(
        "main: \"() => { while(true){} }\"\n",
        ExecuteOptions {
            limits: Some(limits),
            ..Default::default()
        },
    );
    assert!(!result.success);
    assert_eq!(result.error_type.as_deref(), Some("TimeoutError"));
    assert!(result.execution_time >= 0.5);
    assert!(result.output.unwrap_or_default().is_empty());
}

#[test]
fn math_module_import_and_call() {
    let result = lib::execute(
        "imports: [math]\nmain: \"() => { echo math.sqrt(16) }\"\n",
        ExecuteOptions::default(),
    );
    assert!(result.success);
    let output = result.output.unwrap_or_default();
    assert!(output == "4\n" || output == "4.0\n");
}

#[test]
fn debug_trace_covers_loop_variable_assignments() {
    let result = lib::debug(
        "main: \"() => { for(i=0;i<3;i=i+1){ echo i } }\"\n",
        ExecuteOptions::default(),
    );
    assert!(result.execute.success);
    let info = result.debug_info.expect("debug run must produce debug info");
    let assigns: Vec<_> = info
        .execution_trace
        .iter()
        .filter(|e| e.entry_type == TraceEntryType::VariableAssign)
        .collect();
    assert!(assigns.len() >= 3);
    assert!(!info.coverage.is_empty());
}

#[test]
fn validate_reports_no_diagnostics_for_well_formed_source() {
    let diagnostics = lib::validate("main: \"() => { echo 1 }\"\n");
    assert!(diagnostics.is_empty());
}

#[test]
fn validate_reports_a_diagnostic_for_malformed_source() {
    let diagnostics = lib::validate("main: [this is not closed\n");
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].severity, "error");
}

#[test]
fn debug_breakpoint_is_reported_hit() {
    let result = lib::debug(
        "main: \"() => { a = 1\necho a }\"\n",
        ExecuteOptions {
            breakpoints: vec![BreakpointSpec { line: 1, condition: None }],
            ..Default::default()
        },
    );
    assert!(result.execute.success);
    let info = result.debug_info.unwrap();
    assert_eq!(info.breakpoint_hits.len(), 1);
}
