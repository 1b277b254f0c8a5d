// ABOUTME: `os` stdlib module — process/environment introspection. File
// and network access live in `stdlib::io` (DESIGN.md's Standard library
// entry); this module is left with what that split leaves over, the
// same division `hpl_runtime/module_loader.py::init_stdlib`'s separate
// `os`/`io` registrations imply.

use crate::error::HplError;
use crate::modules::NativeModule;
use crate::value::Value;

pub struct OsModule;

impl NativeModule for OsModule {
    fn name(&self) -> &str {
        "os"
    }

    fn call_function(&self, name: &str, args: &[Value]) -> Result<Value, HplError> {
        match name {
            "getenv" => {
                let key = match args.first() {
                    Some(Value::String(s)) => s,
                    Some(other) => {
                        return Err(HplError::type_error(
                            format!("'getenv' expects a string argument, got '{}'", other.type_name()),
                            0,
                            "OS_ARGUMENT_TYPE",
                        ))
                    }
                    None => {
                        return Err(HplError::type_error(
                            "'getenv' requires a variable name argument",
                            0,
                            "OS_ARITY",
                        ))
                    }
                };
                Ok(match std::env::var(key) {
                    Ok(value) => Value::String(value),
                    Err(_) => Value::Null,
                })
            }
            "cwd" => {
                let cwd = std::env::current_dir().map_err(|e| {
                    HplError::runtime(format!("cannot read working directory: {}", e), 0, "IO_ERROR")
                })?;
                Ok(Value::String(cwd.display().to_string()))
            }
            "platform" => Ok(Value::String(std::env::consts::OS.to_string())),
            "arch" => Ok(Value::String(std::env::consts::ARCH.to_string())),
            other => Err(HplError::method_not_found(
                format!("module 'os' has no function '{}'", other),
                0,
            )),
        }
    }

    fn get_constant(&self, name: &str) -> Option<Value> {
        match name {
            "PATH_SEP" => Some(Value::String(std::path::MAIN_SEPARATOR.to_string())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_returns_a_non_empty_string() {
        let m = OsModule;
        let result = m.call_function("platform", &[]).unwrap();
        assert!(matches!(result, Value::String(s) if !s.is_empty()));
    }

    #[test]
    fn getenv_missing_variable_returns_null() {
        let m = OsModule;
        let result = m
            .call_function("getenv", &[Value::String("HPL_DEFINITELY_UNSET_VAR".into())])
            .unwrap();
        assert!(matches!(result, Value::Null));
    }
}
