// ABOUTME: CLI entry point — `run`/`validate`/`debug` subcommands over
// the sandboxed evaluator, plus the hidden `--sandbox-worker` mode that
// re-execs this same binary as an isolated child process (spec.md §4.8,
// §6).

use clap::{Parser, Subcommand};
use hpl_rs::config::ResourceLimits;
use hpl_rs::{self as lib, sandbox, ExecuteOptions};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "hpl")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sandboxed runner for the host programming language")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Hidden: re-exec target used by the sandbox runner itself. Takes
    /// the worker's temporary directory, reads `request.json`, and
    /// writes `response.json` there.
    #[arg(long = "sandbox-worker", hide = true, value_name = "DIR")]
    sandbox_worker: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a source file inside the sandbox.
    Run {
        file: PathBuf,
        #[arg(long)]
        json: bool,
        #[arg(long = "call", value_name = "NAME")]
        call_target: Option<String>,
        #[arg(long = "timeout", value_name = "SECONDS")]
        wall_clock_seconds: Option<u64>,
    },
    /// Check a source file for syntax/structural errors without running it.
    Validate {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Execute a source file under the instrumented debug evaluator.
    Debug {
        file: PathBuf,
        #[arg(long)]
        json: bool,
        #[arg(long = "break", value_name = "LINE", action = clap::ArgAction::Append)]
        breakpoints: Vec<u32>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(work_dir) = cli.sandbox_worker {
        return match sandbox::run_worker(&work_dir) {
            Ok(()) => ExitCode::from(0),
            Err(e) => {
                eprintln!("sandbox worker error: {}", e);
                ExitCode::from(2)
            }
        };
    }

    match cli.command {
        Some(Command::Run {
            file,
            json,
            call_target,
            wall_clock_seconds,
        }) => run_command(&file, json, call_target, wall_clock_seconds),
        Some(Command::Validate { file, json }) => validate_command(&file, json),
        Some(Command::Debug {
            file,
            json,
            breakpoints,
        }) => debug_command(&file, json, breakpoints),
        None => {
            eprintln!("usage: hpl <run|validate|debug> <file> [--json]");
            ExitCode::from(2)
        }
    }
}

fn read_source(file: &PathBuf) -> Result<String, ExitCode> {
    std::fs::read_to_string(file).map_err(|e| {
        eprintln!("cannot read '{}': {}", file.display(), e);
        ExitCode::from(2)
    })
}

fn run_command(
    file: &PathBuf,
    json: bool,
    call_target: Option<String>,
    wall_clock_seconds: Option<u64>,
) -> ExitCode {
    let source = match read_source(file) {
        Ok(s) => s,
        Err(code) => return code,
    };

    let limits = wall_clock_seconds.map(|seconds| ResourceLimits {
        wall_clock_seconds: seconds,
        ..ResourceLimits::default()
    });

    let result = lib::execute(
        &source,
        ExecuteOptions {
            call_target,
            limits,
            ..Default::default()
        },
    );

    if json {
        print_json(&result);
    } else if let Some(output) = &result.output {
        print!("{}", output);
    }

    if !result.success {
        if !json {
            eprintln!(
                "{}: {}",
                result.error_type.as_deref().unwrap_or("Error"),
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
        return exit_code_for(&result.error_type);
    }
    ExitCode::from(0)
}

fn validate_command(file: &PathBuf, json: bool) -> ExitCode {
    let source = match read_source(file) {
        Ok(s) => s,
        Err(code) => return code,
    };

    let diagnostics = lib::validate(&source);

    if json {
        print_json(&diagnostics);
    } else {
        for d in &diagnostics {
            println!("{}:{}: {}: {}", d.line, d.column, d.severity, d.message);
        }
    }

    if diagnostics.is_empty() {
        ExitCode::from(0)
    } else {
        ExitCode::from(2)
    }
}

fn debug_command(file: &PathBuf, json: bool, breakpoint_lines: Vec<u32>) -> ExitCode {
    let source = match read_source(file) {
        Ok(s) => s,
        Err(code) => return code,
    };

    let breakpoints = breakpoint_lines
        .into_iter()
        .map(|line| sandbox::BreakpointSpec { line, condition: None })
        .collect();

    let result = lib::debug(
        &source,
        ExecuteOptions {
            breakpoints,
            ..Default::default()
        },
    );

    if json {
        print_json(&result);
    } else {
        if let Some(output) = &result.execute.output {
            print!("{}", output);
        }
        if let Some(info) = &result.debug_info {
            println!("--- execution trace ---");
            for entry in &info.execution_trace {
                println!("{:>6} {:?} {}", entry.line, entry.entry_type, entry.details);
            }
            println!("--- function stats ---");
            for (name, stats) in &info.function_stats {
                println!("{}: {} call(s), avg {:.1}us", name, stats.calls, stats.avg_time_us());
            }
        }
    }

    if !result.execute.success {
        if !json {
            eprintln!(
                "{}: {}",
                result.execute.error_type.as_deref().unwrap_or("Error"),
                result.execute.error.as_deref().unwrap_or("unknown error")
            );
        }
        return exit_code_for(&result.execute.error_type);
    }
    ExitCode::from(0)
}

fn exit_code_for(error_type: &Option<String>) -> ExitCode {
    match error_type.as_deref() {
        Some("TimeoutError") => ExitCode::from(124),
        Some("SyntaxError") | Some("ImportError") => ExitCode::from(2),
        _ => ExitCode::from(1),
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("failed to serialize result: {}", e),
    }
}
