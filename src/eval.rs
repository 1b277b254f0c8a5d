// ABOUTME: Tree-walking evaluator: control flow via `Flow`, operator
// semantics, built-in dispatch, method/constructor dispatch, and class
// construction from a loaded document.

use crate::ast::{BinOp, Expr, Stmt, UnOp};
use crate::doc::{self, ClassDecl, Document};
use crate::error::HplError;
use crate::lexer;
use crate::modules::ModuleLoader;
use crate::parser::Parser;
use crate::scope::{Globals, Scope};
use crate::value::{HplClass, HplFunction, ObjectInstance, Value};

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

/// Matches the original's implicit constructor method name.
pub(crate) const CONSTRUCTOR_NAME: &str = "__init__";

/// Activations beyond this depth raise `STACK_OVERFLOW` (spec.md §9).
pub(crate) const MAX_CALL_DEPTH: usize = 1000;

/// Non-local control transfer produced by executing a statement.
/// Replaces the original's exception-based
/// `ReturnValue`/`BreakException`/`ContinueException` trio, per the
/// required divergence in spec.md §9.
#[derive(Debug, Clone)]
pub enum Flow {
    Next,
    Return(Value),
    Break,
    Continue,
}

/// Parses each class's raw method source into `HplFunction` bodies and
/// wires up the `parent`/`parent_name` links in a second pass, since a
/// class may name a parent declared later in the same map.
pub fn build_classes(
    decls: &HashMap<String, ClassDecl>,
    out: &mut HashMap<String, Rc<HplClass>>,
) -> Result<(), HplError> {
    for (name, decl) in decls {
        let mut methods = HashMap::new();
        for (method_name, source) in &decl.methods {
            methods.insert(
                method_name.clone(),
                doc::parse_function_source(method_name, source)?,
            );
        }
        out.insert(
            name.clone(),
            Rc::new(HplClass {
                name: name.clone(),
                methods,
                parent: RefCell::new(None),
                parent_name: decl.parent.clone(),
            }),
        );
    }

    for name in decls.keys() {
        let parent_name = match &out[name].parent_name {
            Some(p) => p.clone(),
            None => continue,
        };
        let parent = out.get(&parent_name).cloned().ok_or_else(|| {
            HplError::name(
                format!("class '{}' has unknown parent '{}'", name, parent_name),
                0,
                "UNKNOWN_PARENT_CLASS",
            )
        })?;
        *out[name].parent.borrow_mut() = Some(parent);
    }
    Ok(())
}

/// Parses a raw, already-comma-split constructor argument (see
/// `doc::ObjectDecl::init_args`) into a full expression, so an argument
/// like `counter.value() + 1` evaluates correctly rather than being
/// treated as an opaque token.
pub(crate) fn parse_arg_expr(raw: &str) -> Result<Expr, HplError> {
    let tokens = lexer::tokenize(raw)?;
    Parser::new(tokens).parse_expression()
}

pub(crate) struct DepthGuard<'a> {
    pub(crate) depth: &'a Cell<usize>,
}

impl<'a> Drop for DepthGuard<'a> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get() - 1);
    }
}

pub(crate) struct CallFrameGuard<'a> {
    pub(crate) stack: &'a RefCell<Vec<String>>,
}

impl<'a> Drop for CallFrameGuard<'a> {
    fn drop(&mut self) {
        self.stack.borrow_mut().pop();
    }
}

/// Execution state for one loaded program. Holds the class table, the
/// shared global scope (pre-populated with declared objects and
/// top-level imports), and the call-stack/recursion-depth bookkeeping
/// shared across every activation.
pub struct Evaluator {
    #[allow(dead_code)]
    classes: HashMap<String, Rc<HplClass>>,
    globals: Rc<Globals>,
    main_func: Option<Rc<HplFunction>>,
    call_target: Option<String>,
    loader: Rc<ModuleLoader>,
    current_file_dir: Option<PathBuf>,
    call_stack: RefCell<Vec<String>>,
    depth: Cell<usize>,
}

impl Evaluator {
    pub fn new(
        document: &Document,
        loader: Rc<ModuleLoader>,
        current_file_dir: Option<PathBuf>,
    ) -> Result<Self, HplError> {
        let mut classes = HashMap::new();
        build_classes(&document.classes, &mut classes)?;

        let globals = Globals::new();

        for import in &document.imports {
            let module = loader.load(&import.module, current_file_dir.as_deref())?;
            let alias = import.alias.clone().unwrap_or_else(|| import.module.clone());
            globals.define(alias, Value::ModuleRef(module));
        }

        for (name, decl) in &document.objects {
            let class = classes.get(&decl.class_name).cloned().ok_or_else(|| {
                HplError::name(
                    format!(
                        "class '{}' not found for object '{}'",
                        decl.class_name, name
                    ),
                    0,
                    "UNKNOWN_CLASS",
                )
            })?;
            let init_args = decl
                .init_args
                .iter()
                .map(|raw| parse_arg_expr(raw))
                .collect::<Result<Vec<_>, _>>()?;
            let instance = Rc::new(ObjectInstance {
                name: name.clone(),
                class,
                attributes: RefCell::new(HashMap::new()),
                init_args,
                constructed: Cell::new(false),
            });
            globals.define(name.clone(), Value::ObjectInstance(instance));
        }

        let main_func = match &document.main_func_source {
            Some(src) => Some(doc::parse_function_source("main", src)?),
            None => None,
        };

        Ok(Evaluator {
            classes,
            globals,
            main_func,
            call_target: document.call_target.clone(),
            loader,
            current_file_dir,
            call_stack: RefCell::new(Vec::new()),
            depth: Cell::new(0),
        })
    }

    /// Runs the document's declared entry point: its own `call`
    /// directive if present (only `"main"` is a legal target, matching
    /// `evaluator.py::run`), otherwise `main` if defined.
    pub fn run(&self) -> Result<Value, HplError> {
        match (&self.call_target, &self.main_func) {
            (Some(target), Some(main_func)) if target == "main" => {
                self.call_function(main_func, Vec::new())
            }
            (Some(target), _) => Err(HplError::name(
                format!("unknown call target: {}", target),
                0,
                "UNKNOWN_CALL_TARGET",
            )),
            (None, Some(main_func)) => self.call_function(main_func, Vec::new()),
            (None, None) => Ok(Value::Null),
        }
    }

    fn call_function(&self, func: &Rc<HplFunction>, args: Vec<Value>) -> Result<Value, HplError> {
        if self.depth.get() >= MAX_CALL_DEPTH {
            return Err(HplError::stack_overflow(0));
        }
        self.depth.set(self.depth.get() + 1);
        let _depth_guard = DepthGuard { depth: &self.depth };

        let scope = Scope::new(self.globals.clone());
        for (i, param) in func.params.iter().enumerate() {
            scope.define_local(param.clone(), args.get(i).cloned().unwrap_or(Value::Null));
        }

        self.call_stack.borrow_mut().push(format!("{}()", func.name));
        let _frame_guard = CallFrameGuard {
            stack: &self.call_stack,
        };

        match self.exec_block(&func.body, &scope) {
            Ok(Flow::Return(v)) => Ok(v),
            Ok(_) => Ok(Value::Null),
            Err(e) => Err(e.with_call_stack(self.call_stack.borrow().clone())),
        }
    }

    fn call_method(
        &self,
        obj: &Rc<ObjectInstance>,
        method_name: &str,
        args: Vec<Value>,
        line: u32,
    ) -> Result<Value, HplError> {
        let method = obj.class.resolve_method(method_name).ok_or_else(|| {
            HplError::method_not_found(
                format!(
                    "method '{}' not found in class '{}'",
                    method_name, obj.class.name
                ),
                line,
            )
        })?;

        if self.depth.get() >= MAX_CALL_DEPTH {
            return Err(HplError::stack_overflow(line));
        }
        self.depth.set(self.depth.get() + 1);
        let _depth_guard = DepthGuard { depth: &self.depth };

        let scope = Scope::new(self.globals.clone());
        for (i, param) in method.params.iter().enumerate() {
            scope.define_local(param.clone(), args.get(i).cloned().unwrap_or(Value::Null));
        }
        scope.define_local("this".to_string(), Value::ObjectInstance(obj.clone()));

        self.call_stack
            .borrow_mut()
            .push(format!("{}.{}()", obj.name, method_name));
        let _frame_guard = CallFrameGuard {
            stack: &self.call_stack,
        };

        match self.exec_block(&method.body, &scope) {
            Ok(Flow::Return(v)) => Ok(v),
            Ok(_) => Ok(Value::Null),
            Err(e) => Err(e.with_call_stack(self.call_stack.borrow().clone())),
        }
    }

    /// Lazily runs `__init__` on first dereference (spec.md §4.5). A
    /// class with no constructor leaves `attributes` empty, matching
    /// the original's dead (never populated) `HPLObject.attributes`
    /// field — see DESIGN.md Open Question resolution #5.
    fn ensure_constructed(&self, obj: &Rc<ObjectInstance>) -> Result<(), HplError> {
        if obj.constructed.get() {
            return Ok(());
        }
        obj.constructed.set(true);
        if obj.class.resolve_method(CONSTRUCTOR_NAME).is_none() {
            return Ok(());
        }
        let init_scope = Scope::new(self.globals.clone());
        let mut args = Vec::with_capacity(obj.init_args.len());
        for expr in &obj.init_args {
            args.push(self.eval_expr(expr, &init_scope, 0)?);
        }
        self.call_method(obj, CONSTRUCTOR_NAME, args, 0)?;
        Ok(())
    }

    fn exec_block(&self, stmts: &[Stmt], scope: &Scope) -> Result<Flow, HplError> {
        for stmt in stmts {
            match self.exec_stmt(stmt, scope)? {
                Flow::Next => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Next)
    }

    fn exec_stmt(&self, stmt: &Stmt, scope: &Scope) -> Result<Flow, HplError> {
        match stmt {
            Stmt::Assignment { name, expr, line } => {
                let value = self.eval_expr(expr, scope, *line)?;
                scope.assign(name, value);
                Ok(Flow::Next)
            }
            Stmt::ArrayAssignment {
                array,
                index,
                value,
                line,
            } => {
                let array_value = self.eval_expr(array, scope, *line)?;
                let index_value = self.eval_expr(index, scope, *line)?;
                let new_value = self.eval_expr(value, scope, *line)?;
                let items = match &array_value {
                    Value::Array(items) => items,
                    other => {
                        return Err(HplError::type_error(
                            format!("cannot index into a value of type '{}'", other.type_name()),
                            *line,
                            "NOT_INDEXABLE",
                        ))
                    }
                };
                let idx = expect_int(&index_value, *line)?;
                let mut items = items.borrow_mut();
                if idx < 0 || idx as usize >= items.len() {
                    return Err(HplError::index(
                        format!("index {} out of range for array of length {}", idx, items.len()),
                        *line,
                    ));
                }
                items[idx as usize] = new_value;
                Ok(Flow::Next)
            }
            Stmt::Return { expr, line } => {
                let value = match expr {
                    Some(e) => self.eval_expr(e, scope, *line)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Break { .. } => Ok(Flow::Break),
            Stmt::Continue { .. } => Ok(Flow::Continue),
            Stmt::Echo { expr, line } => {
                let value = self.eval_expr(expr, scope, *line)?;
                println!("{}", value);
                Ok(Flow::Next)
            }
            Stmt::Import { module, alias, .. } => {
                let resolved = self.loader.load(module, self.current_file_dir.as_deref())?;
                let bound_name = alias.clone().unwrap_or_else(|| module.clone());
                scope.define_local(bound_name, Value::ModuleRef(resolved));
                Ok(Flow::Next)
            }
            Stmt::If {
                condition,
                then_block,
                else_block,
                line,
            } => {
                if expect_bool(&self.eval_expr(condition, scope, *line)?, *line, "IF_CONDITION_NOT_BOOL")? {
                    self.exec_block(then_block, scope)
                } else if let Some(else_block) = else_block {
                    self.exec_block(else_block, scope)
                } else {
                    Ok(Flow::Next)
                }
            }
            Stmt::For {
                init,
                condition,
                increment,
                body,
                line,
            } => {
                if let Some(init) = init {
                    self.exec_stmt(init, scope)?;
                }
                loop {
                    let keep_going = match condition {
                        Some(cond) => expect_bool(
                            &self.eval_expr(cond, scope, *line)?,
                            *line,
                            "LOOP_CONDITION_NOT_BOOL",
                        )?,
                        None => true,
                    };
                    if !keep_going {
                        break;
                    }
                    match self.exec_block(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Next | Flow::Continue => {}
                    }
                    if let Some(increment) = increment {
                        self.exec_stmt(increment, scope)?;
                    }
                }
                Ok(Flow::Next)
            }
            Stmt::While {
                condition,
                body,
                line,
            } => {
                loop {
                    let keep_going = expect_bool(
                        &self.eval_expr(condition, scope, *line)?,
                        *line,
                        "LOOP_CONDITION_NOT_BOOL",
                    )?;
                    if !keep_going {
                        break;
                    }
                    match self.exec_block(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Next | Flow::Continue => {}
                    }
                }
                Ok(Flow::Next)
            }
            Stmt::TryCatch {
                try_block,
                catch_var,
                catch_block,
                ..
            } => match self.exec_block(try_block, scope) {
                Ok(flow) => Ok(flow),
                Err(e) if e.is_catchable() => {
                    scope.define_local(catch_var.clone(), Value::String(e.message()));
                    self.exec_block(catch_block, scope)
                }
                Err(e) => Err(e),
            },
            Stmt::Increment { name, line } => {
                let current = scope
                    .get(name)
                    .ok_or_else(|| HplError::name(format!("undefined variable '{}'", name), *line, "UNDEFINED_VARIABLE"))?;
                scope.assign(name, increment_value(&current, *line)?);
                Ok(Flow::Next)
            }
            Stmt::ExprStmt { expr, line } => {
                self.eval_expr(expr, scope, *line)?;
                Ok(Flow::Next)
            }
        }
    }

    fn eval_expr(&self, expr: &Expr, scope: &Scope, line: u32) -> Result<Value, HplError> {
        match expr {
            Expr::IntLiteral(n) => Ok(Value::Int(*n)),
            Expr::FloatLiteral(n) => Ok(Value::Float(*n)),
            Expr::StringLiteral(s) => Ok(Value::String(s.clone())),
            Expr::BoolLiteral(b) => Ok(Value::Bool(*b)),
            Expr::Variable(name) => scope
                .get(name)
                .ok_or_else(|| HplError::name(format!("undefined variable '{}'", name), line, "UNDEFINED_VARIABLE")),
            Expr::BinaryOp { left, op, right } => self.eval_binary_op(left, *op, right, scope, line),
            Expr::UnaryOp { op, operand } => {
                let value = self.eval_expr(operand, scope, line)?;
                match op {
                    UnOp::Neg => match value {
                        Value::Int(n) => Ok(Value::Int(-n)),
                        Value::Float(n) => Ok(Value::Float(-n)),
                        other => Err(HplError::type_error(
                            format!("unary '-' requires a number, got '{}'", other.type_name()),
                            line,
                            "UNARY_OPERAND_TYPE",
                        )),
                    },
                    UnOp::Not => match value {
                        Value::Bool(b) => Ok(Value::Bool(!b)),
                        other => Err(HplError::type_error(
                            format!("unary '!' requires a boolean, got '{}'", other.type_name()),
                            line,
                            "UNARY_OPERAND_TYPE",
                        )),
                    },
                }
            }
            Expr::FunctionCall { name, args } => {
                let values = args
                    .iter()
                    .map(|a| self.eval_expr(a, scope, line))
                    .collect::<Result<Vec<_>, _>>()?;
                call_builtin(name, &values, line)
            }
            Expr::MethodCall { receiver, name, args } => {
                let receiver_value = self.eval_expr(receiver, scope, line)?;
                let values = args
                    .iter()
                    .map(|a| self.eval_expr(a, scope, line))
                    .collect::<Result<Vec<_>, _>>()?;
                match receiver_value {
                    Value::ModuleRef(module) => module.native.call_function(name, &values),
                    Value::ObjectInstance(obj) => {
                        self.ensure_constructed(&obj)?;
                        self.call_method(&obj, name, values, line)
                    }
                    other => Err(HplError::type_error(
                        format!(
                            "cannot call method '{}' on a value of type '{}'",
                            name,
                            other.type_name()
                        ),
                        line,
                        "METHOD_CALL_RECEIVER_TYPE",
                    )),
                }
            }
            Expr::MemberAccess { receiver, name } => {
                let receiver_value = self.eval_expr(receiver, scope, line)?;
                match receiver_value {
                    Value::ModuleRef(module) => match module.native.get_constant(name) {
                        Some(v) => Ok(v),
                        None => module.native.call_function(name, &[]),
                    },
                    Value::ObjectInstance(obj) => {
                        self.ensure_constructed(&obj)?;
                        self.call_method(&obj, name, Vec::new(), line)
                    }
                    other => Err(HplError::type_error(
                        format!(
                            "cannot access member '{}' on a value of type '{}'",
                            name,
                            other.type_name()
                        ),
                        line,
                        "MEMBER_ACCESS_RECEIVER_TYPE",
                    )),
                }
            }
            Expr::PostfixIncrement(inner) => {
                let name = match inner.as_ref() {
                    Expr::Variable(name) => name,
                    _ => {
                        return Err(HplError::type_error(
                            "'++' may only be applied to a variable",
                            line,
                            "INCREMENT_TARGET",
                        ))
                    }
                };
                let current = scope
                    .get(name)
                    .ok_or_else(|| HplError::name(format!("undefined variable '{}'", name), line, "UNDEFINED_VARIABLE"))?;
                scope.assign(name, increment_value(&current, line)?);
                Ok(current)
            }
            Expr::ArrayLiteral(items) => {
                let values = items
                    .iter()
                    .map(|e| self.eval_expr(e, scope, line))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::array(values))
            }
            Expr::ArrayAccess { array, index } => {
                let array_value = self.eval_expr(array, scope, line)?;
                let index_value = self.eval_expr(index, scope, line)?;
                let items = match &array_value {
                    Value::Array(items) => items,
                    other => {
                        return Err(HplError::type_error(
                            format!("cannot index into a value of type '{}'", other.type_name()),
                            line,
                            "NOT_INDEXABLE",
                        ))
                    }
                };
                let idx = expect_int(&index_value, line)?;
                let items = items.borrow();
                if idx < 0 || idx as usize >= items.len() {
                    return Err(HplError::index(
                        format!("index {} out of range for array of length {}", idx, items.len()),
                        line,
                    ));
                }
                Ok(items[idx as usize].clone())
            }
        }
    }

    /// `&&`/`||` short-circuit per spec.md §5 (a deliberate divergence
    /// from `evaluator.py::_eval_binary_op`, which evaluates both
    /// operands unconditionally regardless of operator).
    fn eval_binary_op(
        &self,
        left: &Expr,
        op: BinOp,
        right: &Expr,
        scope: &Scope,
        line: u32,
    ) -> Result<Value, HplError> {
        if matches!(op, BinOp::And | BinOp::Or) {
            let left_value = expect_bool_value(self.eval_expr(left, scope, line)?, line)?;
            if op == BinOp::And && !left_value {
                return Ok(Value::Bool(false));
            }
            if op == BinOp::Or && left_value {
                return Ok(Value::Bool(true));
            }
            let right_value = expect_bool_value(self.eval_expr(right, scope, line)?, line)?;
            return Ok(Value::Bool(right_value));
        }

        let left_value = self.eval_expr(left, scope, line)?;
        let right_value = self.eval_expr(right, scope, line)?;

        match op {
            BinOp::Add => Ok(eval_add(left_value, right_value)),
            BinOp::Sub => eval_numeric(left_value, right_value, line, "-", |a, b| a - b, |a, b| a - b),
            BinOp::Mul => eval_numeric(left_value, right_value, line, "*", |a, b| a * b, |a, b| a * b),
            BinOp::Div => eval_div(left_value, right_value, line),
            BinOp::Mod => eval_mod(left_value, right_value, line),
            BinOp::Eq => Ok(Value::Bool(left_value.value_eq(&right_value))),
            BinOp::NotEq => Ok(Value::Bool(!left_value.value_eq(&right_value))),
            BinOp::Lt => eval_compare(left_value, right_value, line, "<", |o| o.is_lt()),
            BinOp::LtEq => eval_compare(left_value, right_value, line, "<=", |o| o.is_le()),
            BinOp::Gt => eval_compare(left_value, right_value, line, ">", |o| o.is_gt()),
            BinOp::GtEq => eval_compare(left_value, right_value, line, ">=", |o| o.is_ge()),
            BinOp::And | BinOp::Or => unreachable!("handled above"),
        }
    }
}

pub(crate) fn expect_bool(value: &Value, line: u32, error_key: &'static str) -> Result<bool, HplError> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => Err(HplError::type_error(
            format!("expected a boolean condition, got '{}'", other.type_name()),
            line,
            error_key,
        )),
    }
}

pub(crate) fn expect_bool_value(value: Value, line: u32) -> Result<bool, HplError> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(HplError::type_error(
            format!("'&&'/'||' require boolean operands, got '{}'", other.type_name()),
            line,
            "LOGICAL_OPERAND_TYPE",
        )),
    }
}

pub(crate) fn expect_int(value: &Value, line: u32) -> Result<i64, HplError> {
    match value {
        Value::Int(n) => Ok(*n),
        other => Err(HplError::type_error(
            format!("expected an integer index, got '{}'", other.type_name()),
            line,
            "INDEX_NOT_INT",
        )),
    }
}

pub(crate) fn increment_value(value: &Value, line: u32) -> Result<Value, HplError> {
    match value {
        Value::Int(n) => Ok(Value::Int(n + 1)),
        Value::Float(n) => Ok(Value::Float(n + 1.0)),
        other => Err(HplError::type_error(
            format!("'++' requires a number, got '{}'", other.type_name()),
            line,
            "INCREMENT_OPERAND_TYPE",
        )),
    }
}

/// `+` with any non-numeric operand falls back to string concatenation
/// via the canonical `Display` formatting (spec.md §3).
pub(crate) fn eval_add(left: Value, right: Value) -> Value {
    match (&left, &right) {
        (Value::Int(a), Value::Int(b)) => Value::Int(a + b),
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => Value::Float(*a as f64 + b),
        (Value::Float(a), Value::Float(b)) => Value::Float(a + b),
        _ => Value::String(format!("{}{}", left, right)),
    }
}

pub(crate) fn eval_numeric(
    left: Value,
    right: Value,
    line: u32,
    op: &str,
    int_op: fn(i64, i64) -> i64,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, HplError> {
    match (&left, &right) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(int_op(*a, *b))),
        _ => {
            let (a, b) = check_numeric_operands(&left, &right, line, op)?;
            Ok(Value::Float(float_op(a, b)))
        }
    }
}

/// Division is always true (float) division, matching the original's
/// Python `/` operator regardless of operand types.
pub(crate) fn eval_div(left: Value, right: Value, line: u32) -> Result<Value, HplError> {
    let (a, b) = check_numeric_operands(&left, &right, line, "/")?;
    if b == 0.0 {
        return Err(HplError::arithmetic("division by zero", line));
    }
    Ok(Value::Float(a / b))
}

pub(crate) fn eval_mod(left: Value, right: Value, line: u32) -> Result<Value, HplError> {
    match (&left, &right) {
        (Value::Int(a), Value::Int(b)) => {
            if *b == 0 {
                return Err(HplError::arithmetic("modulo by zero", line));
            }
            Ok(Value::Int(a % b))
        }
        _ => {
            let (a, b) = check_numeric_operands(&left, &right, line, "%")?;
            if b == 0.0 {
                return Err(HplError::arithmetic("modulo by zero", line));
            }
            Ok(Value::Float(a % b))
        }
    }
}

pub(crate) fn check_numeric_operands(left: &Value, right: &Value, line: u32, op: &str) -> Result<(f64, f64), HplError> {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(HplError::type_error(
            format!(
                "operator '{}' requires numeric operands, got '{}' and '{}'",
                op,
                left.type_name(),
                right.type_name()
            ),
            line,
            "BINARY_OPERAND_TYPE",
        )),
    }
}

pub(crate) fn eval_compare(
    left: Value,
    right: Value,
    line: u32,
    op: &str,
    accept: fn(std::cmp::Ordering) -> bool,
) -> Result<Value, HplError> {
    let ordering = match (&left, &right) {
        (Value::String(a), Value::String(b)) => a.partial_cmp(b),
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    };
    match ordering {
        Some(o) => Ok(Value::Bool(accept(o))),
        None => Err(HplError::type_error(
            format!(
                "operator '{}' cannot compare '{}' and '{}'",
                op,
                left.type_name(),
                right.type_name()
            ),
            line,
            "BINARY_OPERAND_TYPE",
        )),
    }
}

/// Built-in functions, resolved before any user-defined dispatch —
/// HPL has no general free-function calls beyond these (spec.md §4.4).
pub(crate) fn call_builtin(name: &str, args: &[Value], line: u32) -> Result<Value, HplError> {
    match name {
        "echo" => {
            let value = args.get(0).ok_or_else(|| arity_error("echo", 1, args.len(), line))?;
            println!("{}", value);
            Ok(Value::Null)
        }
        "len" => match args.get(0) {
            Some(Value::Array(items)) => Ok(Value::Int(items.borrow().len() as i64)),
            Some(Value::String(s)) => Ok(Value::Int(s.chars().count() as i64)),
            Some(other) => Err(HplError::type_error(
                format!("'len' requires an array or string, got '{}'", other.type_name()),
                line,
                "BUILTIN_ARGUMENT_TYPE",
            )),
            None => Err(arity_error("len", 1, args.len(), line)),
        },
        "int" => match args.get(0) {
            Some(Value::Int(n)) => Ok(Value::Int(*n)),
            Some(Value::Float(n)) => Ok(Value::Int(*n as i64)),
            Some(Value::Bool(b)) => Ok(Value::Int(if *b { 1 } else { 0 })),
            Some(Value::String(s)) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                HplError::type_error(format!("cannot convert '{}' to int", s), line, "INT_CONVERSION")
            }),
            Some(other) => Err(HplError::type_error(
                format!("cannot convert '{}' to int", other.type_name()),
                line,
                "INT_CONVERSION",
            )),
            None => Err(arity_error("int", 1, args.len(), line)),
        },
        "str" => args
            .get(0)
            .map(|v| Value::String(v.to_string()))
            .ok_or_else(|| arity_error("str", 1, args.len(), line)),
        "type" => args
            .get(0)
            .map(|v| Value::String(v.type_name()))
            .ok_or_else(|| arity_error("type", 1, args.len(), line)),
        "abs" => match args.get(0) {
            Some(Value::Int(n)) => Ok(Value::Int(n.abs())),
            Some(Value::Float(n)) => Ok(Value::Float(n.abs())),
            Some(other) => Err(HplError::type_error(
                format!("'abs' requires a number, got '{}'", other.type_name()),
                line,
                "BUILTIN_ARGUMENT_TYPE",
            )),
            None => Err(arity_error("abs", 1, args.len(), line)),
        },
        "max" => extremum(args, line, "max", std::cmp::Ordering::Greater),
        "min" => extremum(args, line, "min", std::cmp::Ordering::Less),
        other => Err(HplError::name(
            format!("unknown function '{}'", other),
            line,
            "UNKNOWN_FUNCTION",
        )),
    }
}

pub(crate) fn extremum(args: &[Value], line: u32, name: &str, favor: std::cmp::Ordering) -> Result<Value, HplError> {
    if args.is_empty() {
        return Err(arity_error(name, 1, 0, line));
    }
    let mut best = args[0].clone();
    let mut best_f64 = best.as_f64().ok_or_else(|| {
        HplError::type_error(
            format!("'{}' requires numeric arguments, got '{}'", name, best.type_name()),
            line,
            "BUILTIN_ARGUMENT_TYPE",
        )
    })?;
    for candidate in &args[1..] {
        let candidate_f64 = candidate.as_f64().ok_or_else(|| {
            HplError::type_error(
                format!(
                    "'{}' requires numeric arguments, got '{}'",
                    name,
                    candidate.type_name()
                ),
                line,
                "BUILTIN_ARGUMENT_TYPE",
            )
        })?;
        if candidate_f64.partial_cmp(&best_f64) == Some(favor) {
            best = candidate.clone();
            best_f64 = candidate_f64;
        }
    }
    Ok(best)
}

pub(crate) fn arity_error(name: &str, expected: usize, got: usize, line: u32) -> HplError {
    HplError::type_error(
        format!("'{}' expects {} argument(s), got {}", name, expected, got),
        line,
        "BUILTIN_ARITY",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Stmt;

    #[test]
    fn addition_promotes_int_and_float() {
        let result = eval_add(Value::Int(1), Value::Float(2.5));
        assert!(matches!(result, Value::Float(f) if f == 3.5));
    }

    #[test]
    fn addition_falls_back_to_string_concat() {
        let result = eval_add(Value::Int(1), Value::String("a".to_string()));
        assert!(matches!(result, Value::String(s) if s == "1a"));
    }

    #[test]
    fn division_is_always_float() {
        let result = eval_div(Value::Int(7), Value::Int(2), 1).unwrap();
        assert!(matches!(result, Value::Float(f) if (f - 3.5).abs() < 1e-9));
    }

    #[test]
    fn division_by_zero_is_arithmetic_error() {
        let err = eval_div(Value::Int(1), Value::Int(0), 1).unwrap_err();
        assert_eq!(err.kind(), "ArithmeticError");
    }

    #[test]
    fn modulo_preserves_int_type() {
        let result = eval_mod(Value::Int(7), Value::Int(2), 1).unwrap();
        assert!(matches!(result, Value::Int(1)));
    }

    #[test]
    fn comparison_orders_strings_lexicographically() {
        let result = eval_compare(
            Value::String("apple".to_string()),
            Value::String("banana".to_string()),
            1,
            "<",
            |o| o.is_lt(),
        )
        .unwrap();
        assert!(matches!(result, Value::Bool(true)));
    }

    #[test]
    fn comparison_rejects_mismatched_types() {
        let err = eval_compare(Value::Int(1), Value::String("x".to_string()), 1, "<", |o| o.is_lt()).unwrap_err();
        assert_eq!(err.kind(), "TypeError");
    }

    #[test]
    fn builtin_len_reports_array_length() {
        let arr = Value::array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let result = call_builtin("len", &[arr], 1).unwrap();
        assert!(matches!(result, Value::Int(3)));
    }

    #[test]
    fn builtin_type_reports_boolean() {
        let result = call_builtin("type", &[Value::Bool(true)], 1).unwrap();
        assert!(matches!(result, Value::String(s) if s == "boolean"));
    }

    #[test]
    fn builtin_max_preserves_winning_values_type() {
        let result = call_builtin("max", &[Value::Int(3), Value::Float(2.5)], 1).unwrap();
        assert!(matches!(result, Value::Int(3)));
    }

    #[test]
    fn unknown_function_is_name_error() {
        let err = call_builtin("bogus", &[], 1).unwrap_err();
        assert_eq!(err.kind(), "NameError");
    }

    #[test]
    fn resolve_method_walks_parent_chain() {
        let parent = Rc::new(HplClass {
            name: "Base".to_string(),
            methods: {
                let mut m = HashMap::new();
                m.insert(
                    "greet".to_string(),
                    Rc::new(HplFunction {
                        name: "greet".to_string(),
                        params: Vec::new(),
                        body: Vec::<Stmt>::new(),
                    }),
                );
                m
            },
            parent: RefCell::new(None),
            parent_name: None,
        });
        let child = HplClass {
            name: "Child".to_string(),
            methods: HashMap::new(),
            parent: RefCell::new(Some(parent)),
            parent_name: Some("Base".to_string()),
        };
        assert!(child.resolve_method("greet").is_some());
    }

    #[test]
    fn evaluator_runs_simple_main_and_returns_value() {
        let document = Document {
            classes: HashMap::new(),
            objects: HashMap::new(),
            main_func_source: Some("(x) => { return 1 + 2 }".to_string()),
            call_target: Some("main".to_string()),
            imports: Vec::new(),
        };
        let loader = Rc::new(ModuleLoader::new(Vec::new()));
        let evaluator = Evaluator::new(&document, loader, None).unwrap();
        let result = evaluator.run().unwrap();
        assert!(matches!(result, Value::Int(3)));
    }

    #[test]
    fn evaluator_short_circuits_and_without_evaluating_right_side() {
        let document = Document {
            classes: HashMap::new(),
            objects: HashMap::new(),
            main_func_source: Some(
                "(x) => { if false && (1 / 0 == 0) { return 1 } return 0 }".to_string(),
            ),
            call_target: Some("main".to_string()),
            imports: Vec::new(),
        };
        let loader = Rc::new(ModuleLoader::new(Vec::new()));
        let evaluator = Evaluator::new(&document, loader, None).unwrap();
        let result = evaluator.run().unwrap();
        assert!(matches!(result, Value::Int(0)));
    }

    #[test]
    fn evaluator_for_loop_accumulates() {
        let document = Document {
            classes: HashMap::new(),
            objects: HashMap::new(),
            main_func_source: Some(
                "(x) => { total = 0 for (i = 0; i < 5; i++) { total = total + i } return total }"
                    .to_string(),
            ),
            call_target: Some("main".to_string()),
            imports: Vec::new(),
        };
        let loader = Rc::new(ModuleLoader::new(Vec::new()));
        let evaluator = Evaluator::new(&document, loader, None).unwrap();
        let result = evaluator.run().unwrap();
        assert!(matches!(result, Value::Int(10)));
    }

    #[test]
    fn evaluator_recursion_hits_stack_overflow() {
        let mut classes = HashMap::new();
        let mut methods = HashMap::new();
        methods.insert(
            "bottomless".to_string(),
            "(n) => { return this.bottomless(n + 1) }".to_string(),
        );
        classes.insert(
            "Recurser".to_string(),
            ClassDecl {
                parent: None,
                methods,
            },
        );
        let mut objects = HashMap::new();
        objects.insert(
            "r".to_string(),
            doc::ObjectDecl {
                class_name: "Recurser".to_string(),
                init_args: Vec::new(),
            },
        );
        let document = Document {
            classes,
            objects,
            main_func_source: Some("(x) => { return r.bottomless(0) }".to_string()),
            call_target: Some("main".to_string()),
            imports: Vec::new(),
        };
        let loader = Rc::new(ModuleLoader::new(Vec::new()));
        let evaluator = Evaluator::new(&document, loader, None).unwrap();
        let err = evaluator.run().unwrap_err();
        assert_eq!(err.kind(), "RuntimeError");
    }
}
