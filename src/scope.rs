// ABOUTME: Variable scope for the evaluator: a flat local frame over a
// shared global table, replacing the arbitrary-depth parent-chain
// environment the function-scoping redesign in spec.md §9 rules out.

use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// The global table, shared by every function activation and never
/// shadowed by a local frame.
#[derive(Debug, Default)]
pub struct Globals {
    bindings: RefCell<HashMap<String, Value>>,
}

impl Globals {
    pub fn new() -> Rc<Self> {
        Rc::new(Globals {
            bindings: RefCell::new(HashMap::new()),
        })
    }

    pub fn define(&self, name: String, value: Value) {
        self.bindings.borrow_mut().insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.bindings.borrow().get(name).cloned()
    }

    pub fn set(&self, name: &str, value: Value) -> bool {
        let mut bindings = self.bindings.borrow_mut();
        if bindings.contains_key(name) {
            bindings.insert(name.to_string(), value);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.borrow().contains_key(name)
    }

    /// Key list for a debug variable snapshot's `globalKeys` field.
    pub fn names(&self) -> Vec<String> {
        self.bindings.borrow().keys().cloned().collect()
    }
}

/// One function activation: a flat map of local bindings plus a handle
/// to the single shared `Globals` table. There is no parent chain —
/// a function body sees exactly its own locals and the globals, never
/// an enclosing call's locals (spec.md §3, §9).
#[derive(Debug)]
pub struct Scope {
    locals: RefCell<HashMap<String, Value>>,
    globals: Rc<Globals>,
}

impl Scope {
    pub fn new(globals: Rc<Globals>) -> Self {
        Scope {
            locals: RefCell::new(HashMap::new()),
            globals,
        }
    }

    /// Always binds in the local frame, never in globals, matching
    /// assignment-creates-a-local semantics inside a function body.
    pub fn define_local(&self, name: String, value: Value) {
        self.locals.borrow_mut().insert(name, value);
    }

    /// Local frame first, then the global table.
    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.locals.borrow().get(name) {
            return Some(v.clone());
        }
        self.globals.get(name)
    }

    /// Updates an existing binding wherever it lives (local if already
    /// local, else global if already global); creates a new local
    /// binding if the name is unbound anywhere, matching top-level
    /// assignment semantics.
    pub fn assign(&self, name: &str, value: Value) {
        if self.locals.borrow().contains_key(name) {
            self.locals.borrow_mut().insert(name.to_string(), value);
            return;
        }
        if self.globals.set(name, value.clone()) {
            return;
        }
        self.locals.borrow_mut().insert(name.to_string(), value);
    }

    pub fn globals(&self) -> &Rc<Globals> {
        &self.globals
    }

    /// Local binding names for a debug variable snapshot's shallow copy.
    pub fn local_names(&self) -> Vec<String> {
        self.locals.borrow().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_shadows_global() {
        let globals = Globals::new();
        globals.define("x".to_string(), Value::Int(1));
        let scope = Scope::new(globals);
        scope.define_local("x".to_string(), Value::Int(2));
        assert!(matches!(scope.get("x"), Some(Value::Int(2))));
    }

    #[test]
    fn sibling_scopes_do_not_see_each_others_locals() {
        let globals = Globals::new();
        let a = Scope::new(globals.clone());
        a.define_local("x".to_string(), Value::Int(1));
        let b = Scope::new(globals);
        assert!(b.get("x").is_none());
    }

    #[test]
    fn global_visible_from_any_scope() {
        let globals = Globals::new();
        globals.define("g".to_string(), Value::Int(9));
        let scope = Scope::new(globals);
        assert!(matches!(scope.get("g"), Some(Value::Int(9))));
    }

    #[test]
    fn assign_updates_existing_global_in_place() {
        let globals = Globals::new();
        globals.define("counter".to_string(), Value::Int(0));
        let scope = Scope::new(globals.clone());
        scope.assign("counter", Value::Int(1));
        assert!(matches!(globals.get("counter"), Some(Value::Int(1))));
    }

    #[test]
    fn assign_with_no_existing_binding_creates_local() {
        let globals = Globals::new();
        let scope = Scope::new(globals.clone());
        scope.assign("fresh", Value::Int(7));
        assert!(globals.get("fresh").is_none());
        assert!(matches!(scope.get("fresh"), Some(Value::Int(7))));
    }
}
