// ABOUTME: Sandbox runner — spawns an isolated worker process per
// program, applies OS resource limits before it loads user code, and
// marshals the result envelope back to the host (spec.md §4.8). The
// teacher's own `sandbox.rs` covered only I/O capability restriction;
// that logic now lives in `stdlib::io`. Process isolation itself has no
// teacher counterpart and is built fresh here, in the teacher's idiom
// (typed errors, `Result`-first, small focused functions).

use crate::config::ResourceLimits;
use crate::debug::{Breakpoint, DebugEvaluator, DebugInfo};
use crate::error::HplError;
use crate::eval::Evaluator;
use crate::modules::ModuleLoader;
use crate::doc;

use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Grace period between SIGTERM and SIGKILL on timeout (spec.md §4.8 step 5).
const KILL_GRACE: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Everything the worker needs, written to `request.json` in its
/// temporary directory before it is spawned.
#[derive(Serialize, Deserialize)]
pub struct WorkerRequest {
    pub entry_file: PathBuf,
    pub call_target: Option<String>,
    pub stdin_input: Option<String>,
    pub debug: bool,
    pub breakpoints: Vec<BreakpointSpec>,
    pub limits: ResourceLimits,
}

#[derive(Serialize, Deserialize, Clone)]
pub struct BreakpointSpec {
    pub line: u32,
    pub condition: Option<String>,
}

/// The result envelope (spec.md §4.8, §6). `output` holds the worker's
/// captured standard output; the HPL return value itself is not part of
/// the contract.
#[derive(Serialize, Deserialize, Default)]
pub struct SandboxResult {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    pub error_type: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub call_stack: Option<Vec<String>>,
    pub execution_time: f64,
    pub debug_info: Option<DebugInfo>,
}

/// What the host asks the sandbox to run.
pub struct RunRequest<'a> {
    pub entry_file: &'a Path,
    pub includes: &'a [PathBuf],
    pub call_target: Option<String>,
    pub stdin_input: Option<Vec<String>>,
    pub debug: bool,
    pub breakpoints: Vec<BreakpointSpec>,
    pub limits: ResourceLimits,
}

/// Spawns a worker process, waits up to `limits.wall_clock_seconds`, and
/// returns the result envelope. Always succeeds in the sense of
/// returning a `SandboxResult`; worker-side failures are reported inside
/// the envelope (`success: false`), not as a host-side `Err`.
pub fn run_sandboxed(request: RunRequest) -> SandboxResult {
    let started = Instant::now();

    let work_dir = match new_worker_dir() {
        Ok(dir) => dir,
        Err(e) => return sandbox_failure(e, started),
    };

    if let Err(e) = stage_files(&work_dir, request.entry_file, request.includes) {
        let _ = std::fs::remove_dir_all(&work_dir);
        return sandbox_failure(e, started);
    }

    let entry_name = request
        .entry_file
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("main.hpl"));

    let worker_request = WorkerRequest {
        entry_file: entry_name,
        call_target: request.call_target,
        stdin_input: request.stdin_input.map(|lines| lines.join("\n")),
        debug: request.debug,
        breakpoints: request.breakpoints,
        limits: request.limits,
    };

    let request_path = work_dir.join("request.json");
    let response_path = work_dir.join("response.json");
    if let Err(e) = write_json(&request_path, &worker_request) {
        let _ = std::fs::remove_dir_all(&work_dir);
        return sandbox_failure(e, started);
    }

    let exe = match std::env::current_exe() {
        Ok(p) => p,
        Err(e) => {
            let _ = std::fs::remove_dir_all(&work_dir);
            return sandbox_failure(
                HplError::sandbox(format!("cannot locate own executable: {}", e)),
                started,
            );
        }
    };

    let spawn_result = Command::new(exe)
        .arg("--sandbox-worker")
        .arg(&work_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn();

    let mut child = match spawn_result {
        Ok(c) => c,
        Err(e) => {
            let _ = std::fs::remove_dir_all(&work_dir);
            return sandbox_failure(
                HplError::sandbox(format!("cannot spawn sandbox worker: {}", e)),
                started,
            );
        }
    };

    if let Some(mut stdin) = child.stdin.take() {
        if let Some(lines) = &worker_request.stdin_input {
            let _ = stdin.write_all(lines.as_bytes());
        }
    }

    let stdout_reader = spawn_pipe_reader(child.stdout.take());
    let stderr_reader = spawn_pipe_reader(child.stderr.take());

    let wall_clock = Duration::from_secs(request.limits.wall_clock_seconds.max(1));
    let outcome = wait_with_timeout(&mut child, wall_clock);

    let output = stdout_reader.join().unwrap_or_default();
    let stderr_text = stderr_reader.join().unwrap_or_default();
    let execution_time = started.elapsed().as_secs_f64();

    let result = match outcome {
        WaitOutcome::Exited(status) => {
            if status.success() {
                match read_json::<SandboxResult>(&response_path) {
                    Ok(mut result) => {
                        result.output = Some(output);
                        result.execution_time = execution_time;
                        result
                    }
                    Err(_) => SandboxResult {
                        success: false,
                        output: Some(output),
                        error: Some(if stderr_text.is_empty() {
                            "sandbox worker produced no result".to_string()
                        } else {
                            stderr_text
                        }),
                        error_type: Some("SandboxError".to_string()),
                        execution_time,
                        ..Default::default()
                    },
                }
            } else {
                SandboxResult {
                    success: false,
                    output: Some(output),
                    error: Some(format!(
                        "sandbox worker exited with status {}: {}",
                        status, stderr_text
                    )),
                    error_type: Some("SandboxError".to_string()),
                    execution_time,
                    ..Default::default()
                }
            }
        }
        WaitOutcome::TimedOut => SandboxResult {
            success: false,
            output: Some(output),
            error: Some(format!(
                "execution exceeded {:.1}s wall-clock limit",
                wall_clock.as_secs_f64()
            )),
            error_type: Some("TimeoutError".to_string()),
            execution_time,
            ..Default::default()
        },
    };

    let _ = std::fs::remove_dir_all(&work_dir);
    result
}

fn sandbox_failure(e: HplError, started: Instant) -> SandboxResult {
    SandboxResult {
        success: false,
        error: Some(e.message()),
        error_type: Some("SandboxError".to_string()),
        execution_time: started.elapsed().as_secs_f64(),
        ..Default::default()
    }
}

fn new_worker_dir() -> Result<PathBuf, HplError> {
    let unique = format!(
        "hpl-sandbox-{}-{}",
        std::process::id(),
        Instant::now().elapsed().as_nanos()
    );
    let dir = std::env::temp_dir().join(unique);
    std::fs::create_dir_all(&dir)
        .map_err(|e| HplError::sandbox(format!("cannot create worker directory: {}", e)))?;
    Ok(dir)
}

fn stage_files(work_dir: &Path, entry_file: &Path, includes: &[PathBuf]) -> Result<(), HplError> {
    let entry_name = entry_file.file_name().ok_or_else(|| {
        HplError::sandbox(format!("entry file '{}' has no file name", entry_file.display()))
    })?;
    std::fs::copy(entry_file, work_dir.join(entry_name))
        .map_err(|e| HplError::sandbox(format!("cannot stage entry file: {}", e)))?;
    for include in includes {
        let name = include.file_name().ok_or_else(|| {
            HplError::sandbox(format!("include file '{}' has no file name", include.display()))
        })?;
        std::fs::copy(include, work_dir.join(name))
            .map_err(|e| HplError::sandbox(format!("cannot stage include '{}': {}", include.display(), e)))?;
    }
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), HplError> {
    let text = serde_json::to_string(value)
        .map_err(|e| HplError::sandbox(format!("cannot serialize sandbox request: {}", e)))?;
    std::fs::write(path, text).map_err(|e| HplError::sandbox(format!("cannot write sandbox request: {}", e)))
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, HplError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| HplError::sandbox(format!("cannot read sandbox response: {}", e)))?;
    serde_json::from_str(&text)
        .map_err(|e| HplError::sandbox(format!("cannot parse sandbox response: {}", e)))
}

fn spawn_pipe_reader<R: Read + Send + 'static>(pipe: Option<R>) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut buf);
        }
        buf
    })
}

enum WaitOutcome {
    Exited(std::process::ExitStatus),
    TimedOut,
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> WaitOutcome {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return WaitOutcome::Exited(status),
            Ok(None) => {}
            Err(_) => return WaitOutcome::TimedOut,
        }
        if start.elapsed() >= timeout {
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    send_sigterm(child.id());
    let grace_start = Instant::now();
    while grace_start.elapsed() < KILL_GRACE {
        if let Ok(Some(status)) = child.try_wait() {
            return WaitOutcome::Exited(status);
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    let _ = child.kill();
    let _ = child.wait();
    WaitOutcome::TimedOut
}

#[cfg(unix)]
fn send_sigterm(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32) {}

/// Applies `limits` as OS resource limits to the current process. Unix
/// only; on other platforms only the wall-clock limit the host already
/// enforces by polling applies (spec.md §4.8 step 2).
#[cfg(unix)]
pub fn apply_resource_limits(limits: &ResourceLimits) -> Result<(), HplError> {
    unsafe fn set(resource: libc::c_int, value: u64) -> Result<(), HplError> {
        let rl = libc::rlimit {
            rlim_cur: value as libc::rlim_t,
            rlim_max: value as libc::rlim_t,
        };
        if libc::setrlimit(resource, &rl) != 0 {
            return Err(HplError::sandbox(format!(
                "setrlimit failed for resource {}: {}",
                resource,
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }

    unsafe {
        set(libc::RLIMIT_AS, limits.memory_limit_mb * 1024 * 1024)?;
        set(libc::RLIMIT_CPU, limits.cpu_seconds)?;
        set(libc::RLIMIT_FSIZE, limits.max_file_size_mb * 1024 * 1024)?;
        set(libc::RLIMIT_NPROC, limits.max_processes)?;
        set(libc::RLIMIT_NOFILE, limits.max_open_files)?;
        set(libc::RLIMIT_CORE, 0)?;
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn apply_resource_limits(_limits: &ResourceLimits) -> Result<(), HplError> {
    Ok(())
}

/// Entry point for the `--sandbox-worker <dir>` hidden subcommand
/// (spec.md §4.8 steps 2-4). Runs entirely inside the spawned child:
/// applies resource limits, loads the staged document, executes it,
/// and writes `response.json` before returning.
pub fn run_worker(work_dir: &Path) -> Result<(), HplError> {
    let request: WorkerRequest = read_json(&work_dir.join("request.json"))?;
    apply_resource_limits(&request.limits)?;

    let entry_path = work_dir.join(&request.entry_file);
    let result = execute_document(&entry_path, work_dir, request.call_target.as_deref(), request.debug, &request.breakpoints);

    write_json(&work_dir.join("response.json"), &result)
}

fn execute_document(
    entry_path: &Path,
    current_file_dir: &Path,
    call_target: Option<&str>,
    debug: bool,
    breakpoints: &[BreakpointSpec],
) -> SandboxResult {
    let document = match doc::load_document(entry_path) {
        Ok(d) => d,
        Err(e) => return error_result(&e),
    };

    // Only "main" is a legal call target (eval.rs's own constraint); a
    // different request is reported the same way the evaluator itself
    // would report it, without special-casing arbitrary function calls.
    if let Some(target) = call_target {
        if target != "main" && document.call_target.as_deref() != Some(target) {
            return error_result(&HplError::name(
                format!("unknown call target: {}", target),
                0,
                "UNKNOWN_CALL_TARGET",
            ));
        }
    }

    let loader = Rc::new(ModuleLoader::new(Vec::new()));

    if debug {
        let parsed_breakpoints: Result<Vec<Breakpoint>, HplError> = breakpoints
            .iter()
            .map(|b| Breakpoint::new(b.line, b.condition.as_deref()))
            .collect();
        let parsed_breakpoints = match parsed_breakpoints {
            Ok(b) => b,
            Err(e) => return error_result(&e),
        };
        let evaluator = match DebugEvaluator::new(
            &document,
            loader,
            Some(current_file_dir.to_path_buf()),
            parsed_breakpoints,
        ) {
            Ok(e) => e,
            Err(e) => return error_result(&e),
        };
        match evaluator.run() {
            Ok((_, debug_info)) => SandboxResult {
                success: true,
                debug_info: Some(debug_info),
                ..Default::default()
            },
            Err(e) => error_result(&e),
        }
    } else {
        let evaluator = match Evaluator::new(&document, loader, Some(current_file_dir.to_path_buf())) {
            Ok(e) => e,
            Err(e) => return error_result(&e),
        };
        match evaluator.run() {
            Ok(_) => SandboxResult {
                success: true,
                ..Default::default()
            },
            Err(e) => error_result(&e),
        }
    }
}

fn error_result(e: &HplError) -> SandboxResult {
    SandboxResult {
        success: false,
        error: Some(e.message()),
        error_type: Some(e.kind().to_string()),
        line: e.line(),
        column: e.column(),
        call_stack: {
            let stack = e.call_stack();
            if stack.is_empty() {
                None
            } else {
                Some(stack)
            }
        },
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write as _;

    fn write_script(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    #[serial]
    fn execute_document_runs_simple_main() {
        let dir = std::env::temp_dir().join("hpl_sandbox_test_simple");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let entry = write_script(&dir, "main.hpl", "main: (x) => { echo 1 + 2 }\ncall: main()\n");
        let result = execute_document(&entry, &dir, Some("main"), false, &[]);
        assert!(result.success);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    #[serial]
    fn execute_document_reports_syntax_errors() {
        let dir = std::env::temp_dir().join("hpl_sandbox_test_bad");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let entry = write_script(&dir, "main.hpl", "not: [valid yaml: {\n");
        let result = execute_document(&entry, &dir, None, false, &[]);
        assert!(!result.success);
        assert_eq!(result.error_type.as_deref(), Some("SyntaxError"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    #[serial]
    fn debug_run_produces_debug_info() {
        let dir = std::env::temp_dir().join("hpl_sandbox_test_debug");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let entry = write_script(
            &dir,
            "main.hpl",
            "main: (x) => { x = 1 return x }\ncall: main()\n",
        );
        let result = execute_document(&entry, &dir, None, true, &[]);
        assert!(result.success);
        assert!(result.debug_info.is_some());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
