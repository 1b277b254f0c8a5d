// ABOUTME: Standard library registry — the five modules spec.md §4.6
// resolves before anything else (`io, math, json, os, time`), registered
// into a `ModuleLoader` as plain native modules.

use crate::config::IoConfig;
use crate::modules::ModuleLoader;
use std::rc::Rc;

pub mod io;
pub mod json;
pub mod math;
pub mod os;
pub mod time;

/// Registers the stdlib modules into `loader`. Called once from
/// `ModuleLoader::new`. A module that fails to initialize (currently
/// only `io`, whose sandboxed roots may fail to open) is skipped with a
/// warning rather than aborting construction, matching the teacher's
/// own tolerance for a stdlib module that doesn't load.
pub fn register_stdlib(loader: &ModuleLoader) {
    let io_config = IoConfig::default();
    match io::IoModule::new(io_config.filesystem, io_config.network) {
        Ok(module) => loader.register_native(Rc::new(module)),
        Err(e) => eprintln!("warning: failed to register stdlib module 'io': {}", e),
    }
    loader.register_native(Rc::new(math::MathModule));
    loader.register_native(Rc::new(json::JsonModule));
    loader.register_native(Rc::new(os::OsModule));
    loader.register_native(Rc::new(time::TimeModule));
}
