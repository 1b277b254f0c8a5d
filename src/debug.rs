// ABOUTME: Instrumented evaluator variant producing an execution trace,
// variable snapshots, call-stack history, per-function timing, line
// coverage, and advisory breakpoint hits (spec.md §4.7).

use crate::ast::{BinOp, Expr, Stmt, UnOp};
use crate::doc::{self, Document};
use crate::error::HplError;
use crate::eval::{
    self, call_builtin, eval_add, eval_compare, eval_div, eval_mod, eval_numeric, expect_bool,
    expect_bool_value, expect_int, increment_value, parse_arg_expr, CallFrameGuard, DepthGuard,
    Flow, CONSTRUCTOR_NAME, MAX_CALL_DEPTH,
};
use crate::modules::ModuleLoader;
use crate::scope::{Globals, Scope};
use crate::value::{ArrayRef, HplClass, HplFunction, ObjectInstance, Value};

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Instant;

/// Trace/snapshot lists are capped so a runaway loop under `Debug` cannot
/// exhaust the host's memory the way the unbounded original services do
/// (the Python sources never bound either list — an oversight this port
/// fixes). On overflow the first half and last half are kept with a
/// single gap marker in between.
const MAX_TRACE_ENTRIES: usize = 2000;
const TRACE_HEAD: usize = MAX_TRACE_ENTRIES / 2;
const TRACE_TAIL: usize = MAX_TRACE_ENTRIES / 2;

const MAX_SNAPSHOTS: usize = 1000;
const SNAPSHOT_HEAD: usize = MAX_SNAPSHOTS / 2;
const SNAPSHOT_TAIL: usize = MAX_SNAPSHOTS / 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum TraceEntryType {
    FunctionCall,
    FunctionReturn,
    VariableAssign,
    ArrayAssign,
    IfBranch,
    LoopIter,
    ErrorCatch,
    Import,
    /// Synthetic marker inserted where trimmed entries were dropped.
    TraceTruncated,
}

impl TraceEntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceEntryType::FunctionCall => "FUNCTION_CALL",
            TraceEntryType::FunctionReturn => "FUNCTION_RETURN",
            TraceEntryType::VariableAssign => "VARIABLE_ASSIGN",
            TraceEntryType::ArrayAssign => "ARRAY_ASSIGN",
            TraceEntryType::IfBranch => "IF_BRANCH",
            TraceEntryType::LoopIter => "LOOP_ITER",
            TraceEntryType::ErrorCatch => "ERROR_CATCH",
            TraceEntryType::Import => "IMPORT",
            TraceEntryType::TraceTruncated => "TRACE_TRUNCATED",
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TraceEntry {
    pub entry_type: TraceEntryType,
    pub line: u32,
    pub details: String,
    /// Microseconds since the debug run started; monotonic.
    pub timestamp_us: u128,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct VariableSnapshot {
    pub line: u32,
    /// Shallow copy of the local frame: arrays are rendered by reference
    /// identity + length rather than full contents (spec.md §4.7, §9).
    pub locals: HashMap<String, String>,
    pub global_keys: Vec<String>,
    pub timestamp_us: u128,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct FunctionStats {
    pub calls: u64,
    pub total_time_us: u128,
    pub min_time_us: u128,
    pub max_time_us: u128,
}

impl FunctionStats {
    pub fn avg_time_us(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_time_us as f64 / self.calls as f64
        }
    }
}

/// A breakpoint registered before a debug run. `condition` is parsed once
/// at registration time rather than on every hit check.
pub struct Breakpoint {
    pub line: u32,
    pub condition: Option<Expr>,
    pub enabled: bool,
    hit_count: Cell<u32>,
}

impl Breakpoint {
    pub fn new(line: u32, condition_src: Option<&str>) -> Result<Self, HplError> {
        let condition = match condition_src {
            Some(src) => Some(parse_arg_expr(src)?),
            None => None,
        };
        Ok(Breakpoint {
            line,
            condition,
            enabled: true,
            hit_count: Cell::new(0),
        })
    }

    pub fn hit_count(&self) -> u32 {
        self.hit_count.get()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BreakpointHit {
    pub line: u32,
    pub hit_count: u32,
}

#[derive(serde::Serialize)]
pub struct DebugInfo {
    pub execution_trace: Vec<TraceEntry>,
    pub variable_snapshots: Vec<VariableSnapshot>,
    pub function_stats: HashMap<String, FunctionStats>,
    pub coverage: Vec<u32>,
    pub breakpoint_hits: Vec<BreakpointHit>,
}

/// Head/tail ring with a gap-marker finalization, shared by the trace and
/// snapshot buffers (spec.md §9 "cap the trace length and snapshot
/// count... retain the first N and last M entries with a gap marker").
struct Capped<T> {
    head: Vec<T>,
    tail: VecDeque<T>,
    head_cap: usize,
    tail_cap: usize,
    total: usize,
}

impl<T> Capped<T> {
    fn new(head_cap: usize, tail_cap: usize) -> Self {
        Capped {
            head: Vec::new(),
            tail: VecDeque::new(),
            head_cap,
            tail_cap,
            total: 0,
        }
    }

    fn push(&mut self, item: T) {
        self.total += 1;
        if self.head.len() < self.head_cap {
            self.head.push(item);
            return;
        }
        self.tail.push_back(item);
        if self.tail.len() > self.tail_cap {
            self.tail.pop_front();
        }
    }

    fn dropped(&self) -> usize {
        self.total.saturating_sub(self.head.len() + self.tail.len())
    }
}

struct TraceRecorder {
    buf: Capped<TraceEntry>,
    start: Instant,
    coverage: HashSet<u32>,
}

impl TraceRecorder {
    fn new() -> Self {
        TraceRecorder {
            buf: Capped::new(TRACE_HEAD, TRACE_TAIL),
            start: Instant::now(),
            coverage: HashSet::new(),
        }
    }

    fn now_us(&self) -> u128 {
        self.start.elapsed().as_micros()
    }

    fn record(&mut self, entry_type: TraceEntryType, line: u32, details: impl Into<String>) {
        self.coverage.insert(line);
        let timestamp_us = self.now_us();
        self.buf.push(TraceEntry {
            entry_type,
            line,
            details: details.into(),
            timestamp_us,
        });
    }

    fn finalize(mut self) -> (Vec<TraceEntry>, Vec<u32>) {
        let dropped = self.buf.dropped();
        let mut out = std::mem::take(&mut self.buf.head);
        if dropped > 0 {
            out.push(TraceEntry {
                entry_type: TraceEntryType::TraceTruncated,
                line: 0,
                details: format!("{} entries omitted", dropped),
                timestamp_us: self.now_us(),
            });
        }
        out.extend(self.buf.tail.drain(..));
        let mut coverage: Vec<u32> = self.coverage.into_iter().collect();
        coverage.sort_unstable();
        (out, coverage)
    }
}

struct SnapshotRecorder {
    buf: Capped<VariableSnapshot>,
}

impl SnapshotRecorder {
    fn new() -> Self {
        SnapshotRecorder {
            buf: Capped::new(SNAPSHOT_HEAD, SNAPSHOT_TAIL),
        }
    }

    fn record(&mut self, snapshot: VariableSnapshot) {
        self.buf.push(snapshot);
    }

    fn finalize(mut self) -> Vec<VariableSnapshot> {
        let dropped = self.buf.dropped();
        let mut out = std::mem::take(&mut self.buf.head);
        if dropped > 0 {
            out.push(VariableSnapshot {
                line: 0,
                locals: HashMap::new(),
                global_keys: vec![format!("<{} snapshots omitted>", dropped)],
                timestamp_us: 0,
            });
        }
        out.extend(self.buf.tail.drain(..));
        out
    }
}

/// Shallow string rendering of a value for a snapshot: arrays are
/// captured by reference identity + length, never their full contents,
/// to keep a snapshot O(1) regardless of array size.
fn snapshot_repr(value: &Value) -> String {
    match value {
        Value::Array(items) => array_repr(items),
        other => other.to_string(),
    }
}

fn array_repr(items: &ArrayRef) -> String {
    format!("<array#{:p} len={}>", Rc::as_ptr(items), items.borrow().len())
}

/// The debug-instrumented twin of `eval::Evaluator`. Kept as a separate
/// implementation (not a wrapper) since every statement/expression site
/// needs its own trace/snapshot hook, mirroring how the original
/// implementation's debug path is a distinct evaluator rather than the
/// plain one with callbacks bolted on.
pub struct DebugEvaluator {
    classes: HashMap<String, Rc<HplClass>>,
    globals: Rc<Globals>,
    main_func: Option<Rc<HplFunction>>,
    call_target: Option<String>,
    loader: Rc<ModuleLoader>,
    current_file_dir: Option<PathBuf>,
    call_stack: RefCell<Vec<String>>,
    depth: Cell<usize>,

    trace: RefCell<TraceRecorder>,
    snapshots: RefCell<SnapshotRecorder>,
    stats: RefCell<HashMap<String, FunctionStats>>,
    call_started_at: RefCell<Vec<Instant>>,
    breakpoints: Vec<Breakpoint>,
    breakpoint_hits: RefCell<Vec<BreakpointHit>>,
}

impl DebugEvaluator {
    pub fn new(
        document: &Document,
        loader: Rc<ModuleLoader>,
        current_file_dir: Option<PathBuf>,
        breakpoints: Vec<Breakpoint>,
    ) -> Result<Self, HplError> {
        let mut classes = HashMap::new();
        eval::build_classes(&document.classes, &mut classes)?;

        let globals = Globals::new();

        for import in &document.imports {
            let module = loader.load(&import.module, current_file_dir.as_deref())?;
            let alias = import.alias.clone().unwrap_or_else(|| import.module.clone());
            globals.define(alias, Value::ModuleRef(module));
        }

        for (name, decl) in &document.objects {
            let class = classes.get(&decl.class_name).cloned().ok_or_else(|| {
                HplError::name(
                    format!("class '{}' not found for object '{}'", decl.class_name, name),
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

        Ok(DebugEvaluator {
            classes,
            globals,
            main_func,
            call_target: document.call_target.clone(),
            loader,
            current_file_dir,
            call_stack: RefCell::new(Vec::new()),
            depth: Cell::new(0),
            trace: RefCell::new(TraceRecorder::new()),
            snapshots: RefCell::new(SnapshotRecorder::new()),
            stats: RefCell::new(HashMap::new()),
            call_started_at: RefCell::new(Vec::new()),
            breakpoints,
            breakpoint_hits: RefCell::new(Vec::new()),
        })
    }

    pub fn run(self) -> Result<(Value, DebugInfo), HplError> {
        let result = match (&self.call_target, &self.main_func) {
            (Some(target), Some(main_func)) if target == "main" => {
                let func = main_func.clone();
                self.call_function(&func, Vec::new())
            }
            (Some(target), _) => Err(HplError::name(
                format!("unknown call target: {}", target),
                0,
                "UNKNOWN_CALL_TARGET",
            )),
            (None, Some(main_func)) => {
                let func = main_func.clone();
                self.call_function(&func, Vec::new())
            }
            (None, None) => Ok(Value::Null),
        };

        let (execution_trace, coverage) = self.trace.into_inner().finalize();
        let variable_snapshots = self.snapshots.into_inner().finalize();
        let function_stats = self.stats.into_inner();
        let breakpoint_hits = self.breakpoint_hits.into_inner();
        let info = DebugInfo {
            execution_trace,
            variable_snapshots,
            function_stats,
            coverage,
            breakpoint_hits,
        };
        result.map(|v| (v, info))
    }

    fn snapshot(&self, scope: &Scope, line: u32) {
        let locals: HashMap<String, String> = scope
            .local_names()
            .into_iter()
            .map(|name| {
                let value = scope.get(&name).unwrap_or(Value::Null);
                (name, snapshot_repr(&value))
            })
            .collect();
        let global_keys = self.globals.names();
        let timestamp_us = self.trace.borrow().now_us();
        self.snapshots.borrow_mut().record(VariableSnapshot {
            line,
            locals,
            global_keys,
            timestamp_us,
        });
    }

    fn check_breakpoints(&self, scope: &Scope, line: u32) -> Result<(), HplError> {
        for bp in &self.breakpoints {
            if !bp.enabled || bp.line != line {
                continue;
            }
            let hit = match &bp.condition {
                None => true,
                Some(expr) => matches!(self.eval_expr(expr, scope, line)?, Value::Bool(true)),
            };
            if hit {
                bp.hit_count.set(bp.hit_count.get() + 1);
                self.breakpoint_hits.borrow_mut().push(BreakpointHit {
                    line,
                    hit_count: bp.hit_count(),
                });
            }
        }
        Ok(())
    }

    fn record_function_enter(&self, name: &str) {
        self.call_started_at.borrow_mut().push(Instant::now());
        self.trace
            .borrow_mut()
            .record(TraceEntryType::FunctionCall, 0, format!("call {}()", name));
    }

    fn record_function_exit(&self, name: &str, line: u32) {
        let started = self.call_started_at.borrow_mut().pop();
        let elapsed_us = started.map(|t| t.elapsed().as_micros()).unwrap_or(0);
        self.trace
            .borrow_mut()
            .record(TraceEntryType::FunctionReturn, line, format!("return from {}()", name));

        let mut stats = self.stats.borrow_mut();
        let entry = stats.entry(name.to_string()).or_default();
        entry.calls += 1;
        entry.total_time_us += elapsed_us;
        entry.min_time_us = if entry.calls == 1 {
            elapsed_us
        } else {
            entry.min_time_us.min(elapsed_us)
        };
        entry.max_time_us = entry.max_time_us.max(elapsed_us);
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
        self.record_function_enter(&func.name);
        self.snapshot(&scope, 0);

        let outcome = self.exec_block(&func.body, &scope);
        self.record_function_exit(&func.name, 0);

        match outcome {
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
                format!("method '{}' not found in class '{}'", method_name, obj.class.name),
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

        let label = format!("{}.{}()", obj.name, method_name);
        self.call_stack.borrow_mut().push(label.clone());
        let _frame_guard = CallFrameGuard {
            stack: &self.call_stack,
        };
        let stat_key = format!("{}.{}", obj.class.name, method_name);
        self.record_function_enter(&stat_key);
        self.snapshot(&scope, line);

        let outcome = self.exec_block(&method.body, &scope);
        self.record_function_exit(&stat_key, line);

        match outcome {
            Ok(Flow::Return(v)) => Ok(v),
            Ok(_) => Ok(Value::Null),
            Err(e) => Err(e.with_call_stack(self.call_stack.borrow().clone())),
        }
    }

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
        self.check_breakpoints(scope, stmt.line())?;
        match stmt {
            Stmt::Assignment { name, expr, line } => {
                let value = self.eval_expr(expr, scope, *line)?;
                scope.assign(name, value);
                self.trace.borrow_mut().record(
                    TraceEntryType::VariableAssign,
                    *line,
                    format!("{} = {}", name, scope.get(name).map(|v| v.to_string()).unwrap_or_default()),
                );
                self.snapshot(scope, *line);
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
                {
                    let mut items_mut = items.borrow_mut();
                    if idx < 0 || idx as usize >= items_mut.len() {
                        return Err(HplError::index(
                            format!("index {} out of range for array of length {}", idx, items_mut.len()),
                            *line,
                        ));
                    }
                    items_mut[idx as usize] = new_value;
                }
                self.trace.borrow_mut().record(
                    TraceEntryType::ArrayAssign,
                    *line,
                    format!("{}[{}] = ...", array_repr(items), idx),
                );
                self.snapshot(scope, *line);
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
            Stmt::Import { module, alias, line } => {
                let resolved = self.loader.load(module, self.current_file_dir.as_deref())?;
                let bound_name = alias.clone().unwrap_or_else(|| module.clone());
                scope.define_local(bound_name.clone(), Value::ModuleRef(resolved));
                self.trace.borrow_mut().record(
                    TraceEntryType::Import,
                    *line,
                    format!("import {} as {}", module, bound_name),
                );
                Ok(Flow::Next)
            }
            Stmt::If {
                condition,
                then_block,
                else_block,
                line,
            } => {
                let taken = expect_bool(&self.eval_expr(condition, scope, *line)?, *line, "IF_CONDITION_NOT_BOOL")?;
                self.trace.borrow_mut().record(
                    TraceEntryType::IfBranch,
                    *line,
                    format!("branch={}", if taken { "then" } else { "else" }),
                );
                if taken {
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
                let mut iteration = 0u64;
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
                    self.trace
                        .borrow_mut()
                        .record(TraceEntryType::LoopIter, *line, format!("iteration {}", iteration));
                    iteration += 1;
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
            Stmt::While { condition, body, line } => {
                let mut iteration = 0u64;
                loop {
                    let keep_going =
                        expect_bool(&self.eval_expr(condition, scope, *line)?, *line, "LOOP_CONDITION_NOT_BOOL")?;
                    if !keep_going {
                        break;
                    }
                    self.trace
                        .borrow_mut()
                        .record(TraceEntryType::LoopIter, *line, format!("iteration {}", iteration));
                    iteration += 1;
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
                line,
            } => match self.exec_block(try_block, scope) {
                Ok(flow) => Ok(flow),
                Err(e) if e.is_catchable() => {
                    self.trace
                        .borrow_mut()
                        .record(TraceEntryType::ErrorCatch, *line, e.message());
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
                self.trace.borrow_mut().record(
                    TraceEntryType::VariableAssign,
                    *line,
                    format!("{}++", name),
                );
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
                        format!("cannot call method '{}' on a value of type '{}'", name, other.type_name()),
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
                        format!("cannot access member '{}' on a value of type '{}'", name, other.type_name()),
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

    fn eval_binary_op(&self, left: &Expr, op: BinOp, right: &Expr, scope: &Scope, line: u32) -> Result<Value, HplError> {
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

#[cfg(test)]
mod tests {
    use super::*;

    fn run_debug(main_src: &str) -> (Value, DebugInfo) {
        let document = Document {
            classes: HashMap::new(),
            objects: HashMap::new(),
            main_func_source: Some(main_src.to_string()),
            call_target: Some("main".to_string()),
            imports: Vec::new(),
        };
        let loader = Rc::new(ModuleLoader::new(Vec::new()));
        let evaluator = DebugEvaluator::new(&document, loader, None, Vec::new()).unwrap();
        evaluator.run().unwrap()
    }

    #[test]
    fn trace_records_variable_assignments_in_a_loop() {
        let (_, info) = run_debug("(x) => { for(i=0;i<3;i=i+1){ echo i } }");
        let assigns: Vec<&TraceEntry> = info
            .execution_trace
            .iter()
            .filter(|e| e.entry_type == TraceEntryType::VariableAssign)
            .collect();
        assert!(assigns.len() >= 3);
    }

    #[test]
    fn coverage_includes_loop_body_line() {
        let (_, info) = run_debug("(x) => { for(i=0;i<3;i=i+1){ echo i } }");
        assert!(!info.coverage.is_empty());
    }

    #[test]
    fn function_stats_aggregate_calls() {
        let (_, info) = run_debug("(x) => { return 1 + 1 }");
        let main_stats = info.function_stats.get("main").unwrap();
        assert_eq!(main_stats.calls, 1);
    }

    #[test]
    fn breakpoint_on_matching_line_is_hit() {
        let document = Document {
            classes: HashMap::new(),
            objects: HashMap::new(),
            main_func_source: Some("(x) => { a = 1\necho a }".to_string()),
            call_target: Some("main".to_string()),
            imports: Vec::new(),
        };
        let loader = Rc::new(ModuleLoader::new(Vec::new()));
        let bp = Breakpoint::new(1, None).unwrap();
        let evaluator = DebugEvaluator::new(&document, loader, None, vec![bp]).unwrap();
        let (_, info) = evaluator.run().unwrap();
        assert_eq!(info.breakpoint_hits.len(), 1);
    }

    #[test]
    fn overflowing_trace_is_truncated_with_marker() {
        let (_, info) = run_debug("(x) => { for(i=0;i<5000;i=i+1){ a = i } }");
        assert!(info
            .execution_trace
            .iter()
            .any(|e| e.entry_type == TraceEntryType::TraceTruncated));
    }
}
