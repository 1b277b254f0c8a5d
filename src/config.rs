// ABOUTME: Static configuration for the I/O capability layer and the
// sandbox runner's resource limits.

use std::path::PathBuf;

/// Filesystem sandbox configuration, consumed by `stdlib::io`.
#[derive(Debug, Clone)]
pub struct FsConfig {
    pub allowed_paths: Vec<PathBuf>,
    pub max_file_size: usize,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            allowed_paths: vec![
                PathBuf::from("./data"),
                PathBuf::from("./scripts"),
            ],
            max_file_size: 10 * 1024 * 1024,
        }
    }
}

/// Network sandbox configuration, consumed by `stdlib::io`.
#[derive(Debug, Clone, Default)]
pub struct NetConfig {
    pub enabled: bool,
    /// Allowed network addresses (host:port format). Empty means no
    /// restrictions when `enabled` is true.
    pub allowed_addresses: Vec<String>,
}

/// Combined I/O capability configuration handed to the stdlib modules at
/// registration time.
#[derive(Debug, Clone, Default)]
pub struct IoConfig {
    pub filesystem: FsConfig,
    pub network: NetConfig,
}

/// OS-process resource limits applied by the sandbox runner before a
/// worker loads user code (spec.md §4.8). On non-Unix targets only
/// `wall_clock_seconds` is enforceable; the others are recorded in the
/// result envelope's `resourceLimits` field but not applied.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct ResourceLimits {
    pub memory_limit_mb: u64,
    pub cpu_seconds: u64,
    pub wall_clock_seconds: u64,
    pub max_file_size_mb: u64,
    pub max_processes: u64,
    pub max_open_files: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_limit_mb: 256,
            cpu_seconds: 10,
            wall_clock_seconds: 10,
            max_file_size_mb: 10,
            max_processes: 1,
            max_open_files: 32,
        }
    }
}
