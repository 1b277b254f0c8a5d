// ABOUTME: Value types representing HPL's runtime data and the records
// backing classes, objects, functions, and modules.

use crate::ast::Stmt;
use crate::modules::NativeModule;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// A mutable, reference-counted array. Shared identity matters for the
/// debug evaluator's snapshot-by-reference rule (see `debug.rs`).
pub type ArrayRef = Rc<RefCell<Vec<Value>>>;

#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    Array(ArrayRef),
    ClassRef(Rc<HplClass>),
    ObjectInstance(Rc<ObjectInstance>),
    FunctionRef(Rc<HplFunction>),
    ModuleRef(Rc<ModuleRef>),
    Null,
}

impl Value {
    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    /// Canonical type tag used by the `type` builtin and TypeMismatch messages.
    pub fn type_name(&self) -> String {
        match self {
            Value::Int(_) => "int".to_string(),
            Value::Float(_) => "float".to_string(),
            Value::Bool(_) => "boolean".to_string(),
            Value::String(_) => "string".to_string(),
            Value::Array(_) => "array".to_string(),
            Value::ClassRef(c) => c.name.clone(),
            Value::ObjectInstance(o) => o.class.name.clone(),
            Value::FunctionRef(_) => "function".to_string(),
            Value::ModuleRef(_) => "module".to_string(),
            Value::Null => "null".to_string(),
        }
    }

    pub fn is_truthy_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Type-and-value equality per spec.md §3.
    pub fn value_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::ObjectInstance(a), Value::ObjectInstance(b)) => Rc::ptr_eq(a, b),
            (Value::ClassRef(a), Value::ClassRef(b)) => Rc::ptr_eq(a, b),
            (Value::ModuleRef(a), Value::ModuleRef(b)) => Rc::ptr_eq(a, b),
            (Value::Null, Value::Null) => true,
            _ => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(n) => {
                // Integer-valued floats print without a decimal point; see
                // DESIGN.md's Open Question resolution #1.
                if n.fract() == 0.0 && n.is_finite() {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::Bool(b) => write!(f, "{}", if *b { "true" } else { "false" }),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::ClassRef(c) => write!(f, "<class {}>", c.name),
            Value::ObjectInstance(o) => write!(f, "<{} instance>", o.class.name),
            Value::FunctionRef(func) => write!(f, "<function {}>", func.name),
            Value::ModuleRef(m) => write!(f, "<module {}>", m.name),
            Value::Null => write!(f, "null"),
        }
    }
}

/// A class definition: own methods plus a late-bound parent name.
#[derive(Debug)]
pub struct HplClass {
    pub name: String,
    pub methods: HashMap<String, Rc<HplFunction>>,
    pub parent: RefCell<Option<Rc<HplClass>>>,
    pub parent_name: Option<String>,
}

impl HplClass {
    /// Own methods first, then the single-inheritance parent chain.
    pub fn resolve_method(&self, name: &str) -> Option<Rc<HplFunction>> {
        if let Some(m) = self.methods.get(name) {
            return Some(m.clone());
        }
        if let Some(parent) = self.parent.borrow().as_ref() {
            return parent.resolve_method(name);
        }
        None
    }
}

/// A live object instance. Construction is lazy: `init_args` holds the
/// unevaluated constructor argument expressions until first dereference
/// (spec.md §4.5).
#[derive(Debug)]
pub struct ObjectInstance {
    pub name: String,
    pub class: Rc<HplClass>,
    pub attributes: RefCell<HashMap<String, Value>>,
    pub init_args: Vec<crate::ast::Expr>,
    pub constructed: Cell<bool>,
}

/// A function or method record: positional parameters, AST body, and the
/// name used in call-stack labels and error messages.
#[derive(Debug)]
pub struct HplFunction {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

/// A resolved module: either a native Rust module (stdlib or a
/// registered host module) backing `call_function`/`get_constant`.
pub struct ModuleRef {
    pub name: String,
    pub native: Rc<dyn NativeModule>,
}

impl fmt::Debug for ModuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRef").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_valued_float_prints_without_decimal() {
        assert_eq!(format!("{}", Value::Float(4.0)), "4");
        assert_eq!(format!("{}", Value::Float(4.5)), "4.5");
    }

    #[test]
    fn bool_prints_true_false() {
        assert_eq!(format!("{}", Value::Bool(true)), "true");
        assert_eq!(format!("{}", Value::Bool(false)), "false");
    }

    #[test]
    fn array_prints_bracketed_comma_list() {
        let arr = Value::array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(format!("{}", arr), "[1, 2, 3]");
    }

    #[test]
    fn value_eq_is_type_and_value() {
        assert!(Value::Int(1).value_eq(&Value::Int(1)));
        assert!(!Value::Int(1).value_eq(&Value::String("1".into())));
    }
}
