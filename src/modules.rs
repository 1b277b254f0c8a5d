// ABOUTME: Module resolution: stdlib registry, registered native modules,
// and local `.hpl` script modules, memoized by name.

use crate::doc;
use crate::error::HplError;
use crate::value::{HplClass, ModuleRef, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// A Rust-native module backing `module.function(args)` calls and
/// `module.CONST` constant access. The stdlib modules (`io`, `math`,
/// `json`, `os`, `time`) and any embedder-registered native modules all
/// implement this trait.
pub trait NativeModule {
    fn name(&self) -> &str;
    fn call_function(&self, name: &str, args: &[Value]) -> Result<Value, HplError>;
    fn get_constant(&self, name: &str) -> Option<Value>;
}

/// A `.hpl` script loaded as a module: its top-level classes are exposed
/// as constants (`ClassRef`), matching the original implementation's
/// "register class as constructor" step, simplified to constant access
/// since construction in HPL is always lazy and driven by an `objects:`
/// declaration or a direct `new`-style call the evaluator resolves, not
/// by the module loader.
pub struct ScriptModule {
    name: String,
    classes: HashMap<String, Rc<HplClass>>,
}

impl NativeModule for ScriptModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn call_function(&self, name: &str, _args: &[Value]) -> Result<Value, HplError> {
        Err(HplError::method_not_found(
            format!(
                "module '{}' has no callable function '{}' (script modules expose classes as constants)",
                self.name, name
            ),
            0,
        ))
    }

    fn get_constant(&self, name: &str) -> Option<Value> {
        self.classes.get(name).map(|c| Value::ClassRef(c.clone()))
    }
}

pub struct ModuleLoader {
    cache: RefCell<HashMap<String, Rc<ModuleRef>>>,
    native_registry: RefCell<HashMap<String, Rc<dyn NativeModule>>>,
    /// Extra package directories searched after the current-file and
    /// working-directory locations (Open Question resolution #2).
    package_dirs: Vec<PathBuf>,
}

impl ModuleLoader {
    pub fn new(package_dirs: Vec<PathBuf>) -> Self {
        let loader = ModuleLoader {
            cache: RefCell::new(HashMap::new()),
            native_registry: RefCell::new(HashMap::new()),
            package_dirs,
        };
        crate::stdlib::register_stdlib(&loader);
        loader
    }

    pub fn register_native(&self, module: Rc<dyn NativeModule>) {
        self.native_registry
            .borrow_mut()
            .insert(module.name().to_string(), module);
    }

    /// Resolves `module_name`, searching in order: stdlib/native-module
    /// registry, then a local `.hpl` script relative to
    /// `current_file_dir` -> current working directory -> configured
    /// package directories.
    pub fn load(
        &self,
        module_name: &str,
        current_file_dir: Option<&Path>,
    ) -> Result<Rc<ModuleRef>, HplError> {
        if let Some(cached) = self.cache.borrow().get(module_name) {
            return Ok(cached.clone());
        }

        if let Some(native) = self.native_registry.borrow().get(module_name) {
            let module_ref = Rc::new(ModuleRef {
                name: module_name.to_string(),
                native: native.clone(),
            });
            self.cache.borrow_mut().insert(module_name.to_string(), module_ref.clone());
            return Ok(module_ref);
        }

        if let Some(script) = self.load_script_module(module_name, current_file_dir)? {
            let native: Rc<dyn NativeModule> = Rc::new(script);
            let module_ref = Rc::new(ModuleRef {
                name: module_name.to_string(),
                native,
            });
            self.cache.borrow_mut().insert(module_name.to_string(), module_ref.clone());
            return Ok(module_ref);
        }

        let available: Vec<&str> = self.native_registry.borrow().keys().map(|s| s.as_str()).collect::<Vec<_>>();
        Err(HplError::import(
            format!(
                "module '{}' not found (available: {})",
                module_name,
                available.join(", ")
            ),
            "MODULE_NOT_FOUND",
        ))
    }

    fn search_dirs(&self, current_file_dir: Option<&Path>) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if let Some(dir) = current_file_dir {
            dirs.push(dir.to_path_buf());
        }
        if let Ok(cwd) = std::env::current_dir() {
            dirs.push(cwd);
        }
        dirs.extend(self.package_dirs.iter().cloned());
        dirs
    }

    fn load_script_module(
        &self,
        module_name: &str,
        current_file_dir: Option<&Path>,
    ) -> Result<Option<ScriptModule>, HplError> {
        for dir in self.search_dirs(current_file_dir) {
            let direct = dir.join(format!("{}.hpl", module_name));
            if direct.is_file() {
                return Ok(Some(self.parse_script_module(module_name, &direct)?));
            }
            let index = dir.join(module_name).join("index.hpl");
            if index.is_file() {
                return Ok(Some(self.parse_script_module(module_name, &index)?));
            }
        }
        Ok(None)
    }

    fn parse_script_module(&self, module_name: &str, path: &Path) -> Result<ScriptModule, HplError> {
        let document = doc::load_document(path)?;
        let mut classes = HashMap::new();
        crate::eval::build_classes(&document.classes, &mut classes)?;
        Ok(ScriptModule {
            name: module_name.to_string(),
            classes,
        })
    }

    pub fn clear_cache(&self) {
        self.cache.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ConstModule;
    impl NativeModule for ConstModule {
        fn name(&self) -> &str {
            "const_test"
        }
        fn call_function(&self, name: &str, _args: &[Value]) -> Result<Value, HplError> {
            if name == "double" {
                Ok(Value::Int(84))
            } else {
                Err(HplError::method_not_found("no such function", 0))
            }
        }
        fn get_constant(&self, name: &str) -> Option<Value> {
            if name == "ANSWER" {
                Some(Value::Int(42))
            } else {
                None
            }
        }
    }

    #[test]
    fn registered_native_module_is_resolved_and_cached() {
        let loader = ModuleLoader::new(Vec::new());
        loader.register_native(Rc::new(ConstModule));
        let module = loader.load("const_test", None).unwrap();
        assert_eq!(module.native.get_constant("ANSWER"), Some(Value::Int(42)));
        let again = loader.load("const_test", None).unwrap();
        assert!(Rc::ptr_eq(&module, &again));
    }

    #[test]
    fn unknown_module_is_import_error() {
        let loader = ModuleLoader::new(Vec::new());
        let err = loader.load("does_not_exist", None).unwrap_err();
        assert_eq!(err.kind(), "ImportError");
    }
}
