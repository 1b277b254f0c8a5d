// ABOUTME: `io` stdlib module — sandboxed file access (cap-std) and
// outbound HTTP (ureq), the two capabilities `spec.md`'s host-I/O story
// grants script code. Grounded on the teacher's own `sandbox.rs`, which
// provided this logic directly on a `Sandbox` struct; here it is exposed
// as a `NativeModule` instead, since `sandbox.rs` itself becomes the
// OS-process isolation layer.

use crate::config::{FsConfig, NetConfig};
use crate::error::HplError;
use crate::modules::NativeModule;
use crate::value::Value;

use cap_std::fs::Dir;

pub struct IoModule {
    fs_roots: Vec<Dir>,
    fs_config: FsConfig,
    net_config: NetConfig,
}

impl IoModule {
    pub fn new(fs_config: FsConfig, net_config: NetConfig) -> Result<Self, HplError> {
        let mut fs_roots = Vec::new();
        for path in &fs_config.allowed_paths {
            std::fs::create_dir_all(path).map_err(|e| {
                HplError::sandbox(format!("cannot create {}: {}", path.display(), e))
            })?;
            let dir = Dir::open_ambient_dir(path, cap_std::ambient_authority()).map_err(|e| {
                HplError::sandbox(format!("cannot open {}: {}", path.display(), e))
            })?;
            fs_roots.push(dir);
        }
        Ok(IoModule {
            fs_roots,
            fs_config,
            net_config,
        })
    }

    fn validate_relative(path: &str) -> Result<(), HplError> {
        if path.starts_with('/') || path.starts_with('\\') || path.contains("..") {
            return Err(HplError::runtime(
                format!("path '{}' is outside the sandboxed roots", path),
                0,
                "PATH_NOT_ALLOWED",
            ));
        }
        Ok(())
    }

    fn root_for(&self, path: &str, write_mode: bool) -> Result<&Dir, HplError> {
        if self.fs_roots.is_empty() {
            return Err(HplError::runtime(
                "no sandboxed filesystem roots are configured",
                0,
                "NO_FS_ROOTS",
            ));
        }
        if write_mode {
            return Ok(&self.fs_roots[0]);
        }
        for root in &self.fs_roots {
            if root.metadata(path).is_ok() {
                return Ok(root);
            }
        }
        Ok(&self.fs_roots[0])
    }

    fn read_file(&self, args: &[Value]) -> Result<Value, HplError> {
        let path = expect_string(args, 0, "read_file")?;
        Self::validate_relative(&path)?;
        let root = self.root_for(&path, false)?;
        root.read_to_string(&path)
            .map(Value::String)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    HplError::runtime(format!("file not found: {}", path), 0, "FILE_NOT_FOUND")
                } else {
                    HplError::runtime(format!("cannot read {}: {}", path, e), 0, "IO_ERROR")
                }
            })
    }

    fn write_file(&self, args: &[Value]) -> Result<Value, HplError> {
        let path = expect_string(args, 0, "write_file")?;
        let contents = expect_string(args, 1, "write_file")?;
        Self::validate_relative(&path)?;
        if contents.len() > self.fs_config.max_file_size {
            return Err(HplError::runtime(
                format!(
                    "{} bytes exceeds the {}-byte file size limit",
                    contents.len(),
                    self.fs_config.max_file_size
                ),
                0,
                "FILE_TOO_LARGE",
            ));
        }
        let root = self.root_for(&path, true)?;
        root.write(&path, &contents)
            .map(|_| Value::Null)
            .map_err(|e| HplError::runtime(format!("cannot write {}: {}", path, e), 0, "IO_ERROR"))
    }

    fn file_exists(&self, args: &[Value]) -> Result<Value, HplError> {
        let path = expect_string(args, 0, "file_exists")?;
        Self::validate_relative(&path)?;
        let root = self.root_for(&path, false)?;
        Ok(Value::Bool(root.metadata(&path).is_ok()))
    }

    fn file_size(&self, args: &[Value]) -> Result<Value, HplError> {
        let path = expect_string(args, 0, "file_size")?;
        Self::validate_relative(&path)?;
        let root = self.root_for(&path, false)?;
        root.metadata(&path)
            .map(|m| Value::Int(m.len() as i64))
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    HplError::runtime(format!("file not found: {}", path), 0, "FILE_NOT_FOUND")
                } else {
                    HplError::runtime(format!("cannot stat {}: {}", path, e), 0, "IO_ERROR")
                }
            })
    }

    fn list_files(&self, args: &[Value]) -> Result<Value, HplError> {
        let dir = expect_string(args, 0, "list_files")?;
        Self::validate_relative(&dir)?;
        let root = self.root_for(&dir, false)?;
        let entries = root
            .read_dir(&dir)
            .map_err(|e| HplError::runtime(format!("cannot list {}: {}", dir, e), 0, "IO_ERROR"))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| HplError::runtime(e.to_string(), 0, "IO_ERROR"))?;
            let name = entry.file_name().to_str().map(|s| s.to_string()).ok_or_else(|| {
                HplError::runtime("non-UTF-8 file name", 0, "IO_ERROR")
            })?;
            names.push(Value::String(name));
        }
        Ok(Value::array(names))
    }

    fn http_request(&self, method: &str, args: &[Value]) -> Result<Value, HplError> {
        if !self.net_config.enabled {
            return Err(HplError::runtime(
                "network access is disabled for this run",
                0,
                "NETWORK_DISABLED",
            ));
        }
        let url = expect_string(args, 0, method)?;
        if !self.net_config.allowed_addresses.is_empty()
            && !self.net_config.allowed_addresses.iter().any(|a| url.contains(a))
        {
            return Err(HplError::runtime(
                format!("address not allowed: {}", url),
                0,
                "ADDRESS_NOT_ALLOWED",
            ));
        }
        let body = args.get(1).map(|v| v.to_string());

        let request = if method == "http_get" {
            ureq::get(&url)
        } else {
            ureq::post(&url)
        };
        let response = match body {
            Some(b) => request
                .send_string(&b)
                .map_err(|e| HplError::runtime(format!("HTTP request failed: {}", e), 0, "HTTP_ERROR"))?,
            None => request
                .call()
                .map_err(|e| HplError::runtime(format!("HTTP request failed: {}", e), 0, "HTTP_ERROR"))?,
        };

        let status = response.status();
        let response_body = response
            .into_string()
            .map_err(|e| HplError::runtime(format!("cannot read response body: {}", e), 0, "HTTP_ERROR"))?;

        Ok(Value::array(vec![
            Value::Int(status as i64),
            Value::String(response_body),
        ]))
    }
}

fn expect_string(args: &[Value], index: usize, fn_name: &str) -> Result<String, HplError> {
    match args.get(index) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(HplError::type_error(
            format!("'{}' expects a string argument, got '{}'", fn_name, other.type_name()),
            0,
            "IO_ARGUMENT_TYPE",
        )),
        None => Err(HplError::type_error(
            format!("'{}' requires an argument at position {}", fn_name, index),
            0,
            "IO_ARITY",
        )),
    }
}

impl NativeModule for IoModule {
    fn name(&self) -> &str {
        "io"
    }

    fn call_function(&self, name: &str, args: &[Value]) -> Result<Value, HplError> {
        match name {
            "read_file" => self.read_file(args),
            "write_file" => self.write_file(args),
            "file_exists" => self.file_exists(args),
            "file_size" => self.file_size(args),
            "list_files" => self.list_files(args),
            "http_get" => self.http_request("http_get", args),
            "http_post" => self.http_request("http_post", args),
            other => Err(HplError::method_not_found(
                format!("module 'io' has no function '{}'", other),
                0,
            )),
        }
    }

    fn get_constant(&self, _name: &str) -> Option<Value> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::path::PathBuf;

    fn test_module() -> (IoModule, PathBuf) {
        let dir = PathBuf::from("./test_io_stdlib_temp");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let fs_config = FsConfig {
            allowed_paths: vec![dir.clone()],
            ..Default::default()
        };
        let module = IoModule::new(fs_config, NetConfig::default()).unwrap();
        (module, dir)
    }

    #[test]
    #[serial]
    fn write_then_read_round_trips() {
        let (module, dir) = test_module();
        module
            .call_function("write_file", &[Value::String("out.txt".into()), Value::String("hi".into())])
            .unwrap();
        let result = module.call_function("read_file", &[Value::String("out.txt".into())]).unwrap();
        assert!(matches!(result, Value::String(s) if s == "hi"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    #[serial]
    fn path_traversal_is_rejected() {
        let (module, dir) = test_module();
        let err = module
            .call_function("read_file", &[Value::String("../../etc/passwd".into())])
            .unwrap_err();
        assert_eq!(err.kind(), "RuntimeError");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    #[serial]
    fn network_disabled_by_default() {
        let (module, dir) = test_module();
        let err = module
            .call_function("http_get", &[Value::String("https://example.com".into())])
            .unwrap_err();
        assert_eq!(err.kind(), "RuntimeError");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
