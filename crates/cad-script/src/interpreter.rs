use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::{Rc, Weak};
use std::time::Instant;

use cad_mesh::SceneObject;

use crate::ast::{
    BinaryOp, Binding, DeclKind, Element, Expr, ExprKind, FunctionBody, FunctionDef, LogicalOp,
    Pattern, Program, Property, PropertyKey, Stmt, StmtKind, TemplatePart, UnaryOp,
};
use crate::capabilities::Capabilities;
use crate::error::ExecutionError;
use crate::host::{self, Host, MaterialData, Node};
use crate::stdlib;
use crate::value::{
    AssignError, Closure, Items, Object, Scope, Shared, Value, format_number, shared,
};
use crate::Limits;

/// Bound on nested statement/expression evaluation across all active calls.
const MAX_EVAL_DEPTH: usize = 4096;
pub(crate) const MAX_ARRAY_LENGTH: usize = 10_000_000;
pub(crate) const MAX_STRING_LENGTH: usize = 1 << 24;
const TRACK_PRUNE_THRESHOLD: usize = 1024;
const RANDOM_SEED: u64 = 0x9E37_79B9_7F4A_7C15;

/// Non-local exit from evaluation. Only `Throw` is visible to `try/catch`.
pub(crate) enum Interrupt {
    Throw { value: Value, line: usize },
    Fatal(ExecutionError),
}

pub(crate) type Flow<T> = Result<T, Interrupt>;

enum Completion {
    Normal,
    Break,
    Continue,
    Return(Value),
}

enum BindMode<'s> {
    Declare { scope: &'s Rc<Scope>, mutable: bool },
    Assign { scope: &'s Rc<Scope> },
}

enum Reference {
    Name(Rc<str>),
    Property(Value, Rc<str>),
    Index(Value, Value),
}

/// Heap cells that may take part in reference cycles or deep chains. They
/// are emptied when the run ends so nothing outlives the sandbox.
enum Tracked {
    Scope(Weak<Scope>),
    Array(Weak<RefCell<Items>>),
    Object(Weak<RefCell<Object>>),
    Node(Weak<RefCell<Node>>),
    Material(Weak<RefCell<MaterialData>>),
}

enum Alive {
    Scope(Rc<Scope>),
    Array(Shared<Items>),
    Object(Shared<Object>),
    Node(Shared<Node>),
    Material(Shared<MaterialData>),
}

impl Tracked {
    fn upgrade(&self) -> Option<Alive> {
        match self {
            Tracked::Scope(weak) => weak.upgrade().map(Alive::Scope),
            Tracked::Array(weak) => weak.upgrade().map(Alive::Array),
            Tracked::Object(weak) => weak.upgrade().map(Alive::Object),
            Tracked::Node(weak) => weak.upgrade().map(Alive::Node),
            Tracked::Material(weak) => weak.upgrade().map(Alive::Material),
        }
    }

    fn is_alive(&self) -> bool {
        match self {
            Tracked::Scope(weak) => weak.strong_count() > 0,
            Tracked::Array(weak) => weak.strong_count() > 0,
            Tracked::Object(weak) => weak.strong_count() > 0,
            Tracked::Node(weak) => weak.strong_count() > 0,
            Tracked::Material(weak) => weak.strong_count() > 0,
        }
    }
}

pub(crate) struct Interpreter<'a> {
    limits: &'a Limits,
    capabilities: &'a Capabilities,
    steps: u64,
    call_depth: usize,
    eval_depth: usize,
    line: usize,
    vertices: usize,
    closures_created: u64,
    rng: u64,
    started: Instant,
    tracked: Vec<Tracked>,
    prune_at: usize,
}

/// Runs a parsed program and extracts the `mesh`/`group` result.
pub(crate) fn execute(
    program: &Program,
    limits: &Limits,
    capabilities: &Capabilities,
) -> Result<SceneObject, ExecutionError> {
    let mut interpreter = Interpreter::new(limits, capabilities);
    let globals = Scope::root();
    capabilities.seed(&globals);
    globals.declare("mesh".into(), Value::Undefined, true);
    globals.declare("group".into(), Value::Undefined, true);
    interpreter.track(Tracked::Scope(Rc::downgrade(&globals)));

    let scope = Scope::child(&globals, true);
    interpreter.track(Tracked::Scope(Rc::downgrade(&scope)));

    let result = match interpreter.run_program(program, &scope) {
        Ok(returned) => interpreter.result_object(returned, &scope),
        Err(interrupt) => Err(interpreter.into_error(interrupt)),
    };

    tracing::debug!(
        steps = interpreter.steps,
        vertices = interpreter.vertices,
        ok = result.is_ok(),
        "script finished"
    );
    // Clears tracked cells while `scope` and `globals` still hold them.
    drop(interpreter);
    result
}

impl<'a> Interpreter<'a> {
    fn new(limits: &'a Limits, capabilities: &'a Capabilities) -> Self {
        Self {
            limits,
            capabilities,
            steps: 0,
            call_depth: 0,
            eval_depth: 0,
            line: 1,
            vertices: 0,
            closures_created: 0,
            rng: RANDOM_SEED,
            started: Instant::now(),
            tracked: Vec::new(),
            prune_at: TRACK_PRUNE_THRESHOLD,
        }
    }

    pub fn limits(&self) -> &Limits {
        self.limits
    }

    pub fn capabilities(&self) -> &Capabilities {
        self.capabilities
    }

    pub fn throw_error(&self, class: &'static str, message: impl Into<String>) -> Interrupt {
        Interrupt::Throw {
            value: Value::error(class, message),
            line: self.line,
        }
    }

    pub fn type_error(&self, message: impl Into<String>) -> Interrupt {
        self.throw_error("TypeError", message)
    }

    pub fn range_error(&self, message: impl Into<String>) -> Interrupt {
        self.throw_error("RangeError", message)
    }

    /// Uncatchable failure, used for resource limits.
    pub fn fatal(&self, message: impl Into<String>) -> Interrupt {
        Interrupt::Fatal(ExecutionError::at(message, self.line))
    }

    pub fn tick(&mut self) -> Flow<()> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            return Err(self.fatal(format!(
                "RangeError: execution exceeded {} steps",
                self.limits.max_steps
            )));
        }
        if self.steps % 4096 == 0 && self.started.elapsed() > self.limits.max_duration {
            return Err(self.fatal(format!(
                "RangeError: execution exceeded {:?}",
                self.limits.max_duration
            )));
        }
        Ok(())
    }

    pub fn charge_vertices(&mut self, count: usize) -> Flow<()> {
        self.vertices = self.vertices.saturating_add(count);
        if self.vertices > self.limits.max_vertices {
            return Err(self.fatal(format!(
                "RangeError: geometry exceeded {} vertices",
                self.limits.max_vertices
            )));
        }
        Ok(())
    }

    /// xorshift64*; deterministic across runs.
    pub fn random(&mut self) -> f64 {
        let mut x = self.rng;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.rng = x;
        let bits = x.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 11;
        bits as f64 / (1u64 << 53) as f64
    }

    fn track(&mut self, item: Tracked) {
        self.tracked.push(item);
        if self.tracked.len() >= self.prune_at {
            self.tracked.retain(Tracked::is_alive);
            self.prune_at = (self.tracked.len() * 2).max(TRACK_PRUNE_THRESHOLD);
        }
    }

    pub fn new_array(&mut self, items: Vec<Value>) -> Value {
        let cell = shared(Items(items));
        self.track_array(&cell);
        Value::Array(cell)
    }

    pub fn track_array(&mut self, cell: &Shared<Items>) {
        self.track(Tracked::Array(Rc::downgrade(cell)));
    }

    pub fn new_object(&mut self, props: Vec<(Rc<str>, Value)>) -> Value {
        let cell = shared(Object { props, class: None });
        self.track(Tracked::Object(Rc::downgrade(&cell)));
        Value::Object(cell)
    }

    pub fn new_error(&mut self, class: &'static str, message: String) -> Value {
        let value = Value::error(class, message);
        if let Value::Object(cell) = &value {
            self.track(Tracked::Object(Rc::downgrade(cell)));
        }
        value
    }

    pub fn track_node(&mut self, node: &Shared<Node>) {
        self.track(Tracked::Node(Rc::downgrade(node)));
    }

    pub fn track_material(&mut self, material: &Shared<MaterialData>) {
        self.track(Tracked::Material(Rc::downgrade(material)));
    }

    fn enter(&mut self) -> Flow<()> {
        self.eval_depth += 1;
        if self.eval_depth > MAX_EVAL_DEPTH {
            return Err(self.fatal("RangeError: Maximum call stack size exceeded"));
        }
        Ok(())
    }

    fn run_program(&mut self, program: &Program, scope: &Rc<Scope>) -> Flow<Option<Value>> {
        self.hoist(&program.body, scope);
        for stmt in &program.body {
            match self.exec_stmt(stmt, scope)? {
                Completion::Normal => {}
                Completion::Return(value) => return Ok(Some(value)),
                Completion::Break | Completion::Continue => {
                    return Err(Interrupt::Fatal(ExecutionError::at(
                        "SyntaxError: illegal break or continue outside a loop",
                        stmt.line,
                    )));
                }
            }
        }
        Ok(None)
    }

    fn result_object(
        &self,
        returned: Option<Value>,
        scope: &Rc<Scope>,
    ) -> Result<SceneObject, ExecutionError> {
        if let Some(Value::Host(Host::Object3D(node))) = returned {
            return host::to_scene(&node);
        }
        for name in ["mesh", "group"] {
            match scope.lookup(name) {
                None | Some(Value::Undefined | Value::Null) => continue,
                Some(Value::Host(Host::Object3D(node))) => return host::to_scene(&node),
                Some(other) => {
                    return Err(ExecutionError::new(format!(
                        "'{name}' must be a Mesh or Group, found {}",
                        other.type_name()
                    )));
                }
            }
        }
        Err(ExecutionError::new("script did not define 'mesh' or 'group'"))
    }

    fn into_error(&self, interrupt: Interrupt) -> ExecutionError {
        match interrupt {
            Interrupt::Fatal(error) => error,
            Interrupt::Throw { value, line } => {
                let message = match &value {
                    Value::Object(object) if object.borrow().class.is_some() => value.to_js_string(),
                    other => format!("Uncaught {}", other.to_js_string()),
                };
                ExecutionError::at(message, line)
            }
        }
    }

    // ---- statements ---------------------------------------------------

    fn hoist(&mut self, body: &[Stmt], scope: &Rc<Scope>) {
        let mut names = Vec::new();
        collect_var_names(body, &mut names);
        for name in names {
            if !scope.has_own(&name) {
                scope.declare(name, Value::Undefined, true);
            }
        }
        self.hoist_functions(body, scope);
    }

    fn hoist_functions(&mut self, body: &[Stmt], scope: &Rc<Scope>) {
        for stmt in body {
            if let StmtKind::Function(def) = &stmt.kind
                && let Some(name) = &def.name
            {
                let closure = self.make_closure(def, scope);
                scope.declare(name.clone(), closure, true);
            }
        }
    }

    fn make_closure(&mut self, def: &Rc<FunctionDef>, scope: &Rc<Scope>) -> Value {
        self.closures_created += 1;
        self.track(Tracked::Scope(Rc::downgrade(scope)));
        Value::Function(Rc::new(Closure {
            def: Rc::clone(def),
            env: Rc::clone(scope),
        }))
    }

    fn exec_block(&mut self, body: &[Stmt], scope: &Rc<Scope>) -> Flow<Completion> {
        let block = Scope::child(scope, false);
        self.hoist_functions(body, &block);
        for stmt in body {
            match self.exec_stmt(stmt, &block)? {
                Completion::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Completion::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, scope: &Rc<Scope>) -> Flow<Completion> {
        self.line = stmt.line;
        self.tick()?;
        self.enter()?;
        let result = self.exec_stmt_inner(stmt, scope);
        self.eval_depth -= 1;
        result
    }

    fn exec_stmt_inner(&mut self, stmt: &Stmt, scope: &Rc<Scope>) -> Flow<Completion> {
        match &stmt.kind {
            StmtKind::Var { kind, decls } => {
                for (pattern, init) in decls {
                    self.exec_declaration(*kind, pattern, init.as_ref(), scope)?;
                }
                Ok(Completion::Normal)
            }
            StmtKind::Function(_) | StmtKind::Empty => Ok(Completion::Normal),
            StmtKind::Expr(expr) => {
                self.eval(expr, scope)?;
                Ok(Completion::Normal)
            }
            StmtKind::Block(body) => self.exec_block(body, scope),
            StmtKind::If {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, scope)?.truthy() {
                    self.exec_stmt(consequent, scope)
                } else if let Some(alternate) = alternate {
                    self.exec_stmt(alternate, scope)
                } else {
                    Ok(Completion::Normal)
                }
            }
            StmtKind::For {
                init,
                test,
                update,
                body,
            } => self.exec_for(init.as_deref(), test.as_ref(), update.as_ref(), body, scope),
            StmtKind::ForEach {
                decl,
                pattern,
                iterable,
                keys,
                body,
            } => self.exec_for_each(*decl, pattern, iterable, *keys, body, scope),
            StmtKind::While { test, body } => {
                loop {
                    self.tick()?;
                    if !self.eval(test, scope)?.truthy() {
                        break;
                    }
                    match self.exec_stmt(body, scope)? {
                        Completion::Break => break,
                        Completion::Return(value) => return Ok(Completion::Return(value)),
                        Completion::Continue | Completion::Normal => {}
                    }
                }
                Ok(Completion::Normal)
            }
            StmtKind::DoWhile { body, test } => {
                loop {
                    self.tick()?;
                    match self.exec_stmt(body, scope)? {
                        Completion::Break => break,
                        Completion::Return(value) => return Ok(Completion::Return(value)),
                        Completion::Continue | Completion::Normal => {}
                    }
                    if !self.eval(test, scope)?.truthy() {
                        break;
                    }
                }
                Ok(Completion::Normal)
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::Undefined,
                };
                Ok(Completion::Return(value))
            }
            StmtKind::Break => Ok(Completion::Break),
            StmtKind::Continue => Ok(Completion::Continue),
            StmtKind::Throw(expr) => {
                let value = self.eval(expr, scope)?;
                Err(Interrupt::Throw {
                    value,
                    line: stmt.line,
                })
            }
            StmtKind::Try {
                block,
                param,
                handler,
                finalizer,
            } => self.exec_try(block, param.as_ref(), handler.as_deref(), finalizer.as_deref(), scope),
            StmtKind::Switch {
                discriminant,
                cases,
            } => {
                let value = self.eval(discriminant, scope)?;
                let block = Scope::child(scope, false);
                for case in cases {
                    self.hoist_functions(&case.body, &block);
                }

                let mut start = None;
                for (index, case) in cases.iter().enumerate() {
                    if let Some(test) = &case.test
                        && self.eval(test, &block)?.strict_equals(&value)
                    {
                        start = Some(index);
                        break;
                    }
                }
                let start = start.or_else(|| cases.iter().position(|case| case.test.is_none()));

                if let Some(start) = start {
                    for case in &cases[start..] {
                        for stmt in &case.body {
                            match self.exec_stmt(stmt, &block)? {
                                Completion::Normal => {}
                                Completion::Break => return Ok(Completion::Normal),
                                other => return Ok(other),
                            }
                        }
                    }
                }
                Ok(Completion::Normal)
            }
        }
    }

    fn exec_declaration(
        &mut self,
        kind: DeclKind,
        pattern: &Pattern,
        init: Option<&Expr>,
        scope: &Rc<Scope>,
    ) -> Flow<()> {
        match kind {
            DeclKind::Var => {
                let target = scope.function_scope();
                match init {
                    Some(init) => {
                        let value = self.eval(init, scope)?;
                        self.bind_pattern(
                            pattern,
                            value,
                            &BindMode::Declare {
                                scope: &target,
                                mutable: true,
                            },
                            scope,
                        )
                    }
                    None => {
                        let mut names = Vec::new();
                        pattern_names(pattern, &mut names);
                        for name in names {
                            if !target.has_own(&name) {
                                target.declare(name, Value::Undefined, true);
                            }
                        }
                        Ok(())
                    }
                }
            }
            DeclKind::Let | DeclKind::Const => {
                let value = match init {
                    Some(init) => self.eval(init, scope)?,
                    None => Value::Undefined,
                };
                self.bind_pattern(
                    pattern,
                    value,
                    &BindMode::Declare {
                        scope,
                        mutable: kind == DeclKind::Let,
                    },
                    scope,
                )
            }
        }
    }

    fn exec_for(
        &mut self,
        init: Option<&Stmt>,
        test: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
        scope: &Rc<Scope>,
    ) -> Flow<Completion> {
        let per_iteration = matches!(
            init.map(|stmt| &stmt.kind),
            Some(StmtKind::Var {
                kind: DeclKind::Let | DeclKind::Const,
                ..
            })
        );
        let mut iteration = Scope::child(scope, false);
        if let Some(init) = init {
            self.exec_stmt(init, &iteration)?;
        }

        loop {
            self.tick()?;
            if let Some(test) = test
                && !self.eval(test, &iteration)?.truthy()
            {
                break;
            }
            let closures_before = self.closures_created;
            match self.exec_stmt(body, &iteration)? {
                Completion::Break => break,
                Completion::Return(value) => return Ok(Completion::Return(value)),
                Completion::Continue | Completion::Normal => {}
            }
            // Closures created in the body keep this iteration's bindings.
            if per_iteration && self.closures_created != closures_before {
                iteration = iteration.fork();
            }
            if let Some(update) = update {
                self.eval(update, &iteration)?;
            }
        }
        Ok(Completion::Normal)
    }

    fn exec_for_each(
        &mut self,
        decl: Option<DeclKind>,
        pattern: &Pattern,
        iterable: &Expr,
        keys: bool,
        body: &Stmt,
        scope: &Rc<Scope>,
    ) -> Flow<Completion> {
        let source = self.eval(iterable, scope)?;
        let items = if keys {
            self.own_keys(&source)
        } else {
            self.iterate(&source)?
        };

        for item in items {
            self.tick()?;
            let iteration = Scope::child(scope, false);
            match decl {
                Some(DeclKind::Var) => {
                    let target = scope.function_scope();
                    let mode = BindMode::Declare {
                        scope: &target,
                        mutable: true,
                    };
                    self.bind_pattern(pattern, item, &mode, &iteration)?;
                }
                Some(kind) => {
                    let mode = BindMode::Declare {
                        scope: &iteration,
                        mutable: kind == DeclKind::Let,
                    };
                    self.bind_pattern(pattern, item, &mode, &iteration)?;
                }
                None => {
                    self.bind_pattern(pattern, item, &BindMode::Assign { scope }, &iteration)?;
                }
            }
            match self.exec_stmt(body, &iteration)? {
                Completion::Break => break,
                Completion::Return(value) => return Ok(Completion::Return(value)),
                Completion::Continue | Completion::Normal => {}
            }
        }
        Ok(Completion::Normal)
    }

    fn exec_try(
        &mut self,
        block: &[Stmt],
        param: Option<&Pattern>,
        handler: Option<&[Stmt]>,
        finalizer: Option<&[Stmt]>,
        scope: &Rc<Scope>,
    ) -> Flow<Completion> {
        let mut result = self.exec_block(block, scope);

        if let Some(handler) = handler
            && let Err(Interrupt::Throw { value, .. }) = result
        {
            result = self.exec_catch(param, value, handler, scope);
        }

        if let Some(finalizer) = finalizer {
            if matches!(result, Err(Interrupt::Fatal(_))) {
                return result;
            }
            match self.exec_block(finalizer, scope)? {
                Completion::Normal => {}
                abrupt => return Ok(abrupt),
            }
        }
        result
    }

    fn exec_catch(
        &mut self,
        param: Option<&Pattern>,
        value: Value,
        handler: &[Stmt],
        scope: &Rc<Scope>,
    ) -> Flow<Completion> {
        let catch_scope = Scope::child(scope, false);
        if let Some(param) = param {
            let mode = BindMode::Declare {
                scope: &catch_scope,
                mutable: true,
            };
            self.bind_pattern(param, value, &mode, &catch_scope)?;
        }
        self.exec_block(handler, &catch_scope)
    }

    fn bind_pattern(
        &mut self,
        pattern: &Pattern,
        value: Value,
        mode: &BindMode<'_>,
        eval_scope: &Rc<Scope>,
    ) -> Flow<()> {
        match pattern {
            Pattern::Ident(name) => match mode {
                BindMode::Declare { scope, mutable } => {
                    scope.declare(name.clone(), value, *mutable);
                    Ok(())
                }
                BindMode::Assign { scope } => self.assign_name(scope, name, value),
            },
            Pattern::Array { items, rest } => {
                let values = self.iterate(&value)?;
                for (index, item) in items.iter().enumerate() {
                    if let Some(binding) = item {
                        let element = values.get(index).cloned().unwrap_or(Value::Undefined);
                        self.bind_element(binding, element, mode, eval_scope)?;
                    }
                }
                if let Some(rest) = rest {
                    let remaining = values.get(items.len()..).unwrap_or_default().to_vec();
                    let remaining = self.new_array(remaining);
                    self.bind_pattern(rest, remaining, mode, eval_scope)?;
                }
                Ok(())
            }
            Pattern::Object { props } => {
                if value.is_nullish() {
                    return Err(self.type_error(format!(
                        "Cannot destructure '{}' as it is {}.",
                        value.to_js_string(),
                        value.type_name()
                    )));
                }
                for (key, binding) in props {
                    let element = self.get_property(&value, key)?;
                    self.bind_element(binding, element, mode, eval_scope)?;
                }
                Ok(())
            }
        }
    }

    fn bind_element(
        &mut self,
        binding: &Binding,
        value: Value,
        mode: &BindMode<'_>,
        eval_scope: &Rc<Scope>,
    ) -> Flow<()> {
        let value = match (&value, &binding.default) {
            (Value::Undefined, Some(default)) => self.eval(default, eval_scope)?,
            _ => value,
        };
        self.bind_pattern(&binding.pattern, value, mode, eval_scope)
    }

    fn assign_name(&mut self, scope: &Rc<Scope>, name: &str, value: Value) -> Flow<()> {
        match scope.assign(name, value) {
            Ok(()) => Ok(()),
            Err(AssignError::Constant) => Err(self.type_error(format!(
                "Assignment to constant variable '{name}'."
            ))),
            Err(AssignError::Undeclared) => {
                Err(self.throw_error("ReferenceError", format!("{name} is not defined")))
            }
        }
    }

    // ---- expressions --------------------------------------------------

    pub(crate) fn eval(&mut self, expr: &Expr, scope: &Rc<Scope>) -> Flow<Value> {
        self.enter()?;
        let result = self.eval_inner(expr, scope);
        self.eval_depth -= 1;
        result
    }

    fn eval_inner(&mut self, expr: &Expr, scope: &Rc<Scope>) -> Flow<Value> {
        match &expr.kind {
            ExprKind::Number(value) => Ok(Value::Number(*value)),
            ExprKind::Str(text) => Ok(Value::Str(text.clone())),
            ExprKind::Bool(value) => Ok(Value::Bool(*value)),
            ExprKind::Null => Ok(Value::Null),
            ExprKind::Undefined => Ok(Value::Undefined),
            ExprKind::Template(parts) => {
                let mut text = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(chunk) => text.push_str(chunk),
                        TemplatePart::Expr(expr) => {
                            let value = self.eval(expr, scope)?;
                            text.push_str(&value.to_js_string());
                        }
                    }
                    self.check_string_length(text.len())?;
                }
                Ok(Value::from(text))
            }
            ExprKind::Ident(name) => self.lookup(scope, name),
            ExprKind::This => Ok(scope.lookup("this").unwrap_or(Value::Undefined)),
            ExprKind::Array(elements) => {
                let items = self.eval_elements(elements, scope)?;
                Ok(self.new_array(items))
            }
            ExprKind::Object(props) => self.eval_object(props, scope),
            ExprKind::Function(def) => Ok(self.make_closure(def, scope)),
            ExprKind::Unary { op, expr } => self.eval_unary(*op, expr, scope),
            ExprKind::Update {
                increment,
                prefix,
                target,
            } => {
                let reference = self.resolve(target, scope)?;
                let old = self.read_reference(&reference, scope)?.to_number();
                let new = if *increment { old + 1.0 } else { old - 1.0 };
                self.write_reference(reference, Value::Number(new), scope)?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs, scope)?;
                let rhs = self.eval(rhs, scope)?;
                self.binary(*op, &lhs, &rhs)
            }
            ExprKind::Logical { op, lhs, rhs } => {
                let lhs = self.eval(lhs, scope)?;
                let short_circuit = match op {
                    LogicalOp::And => !lhs.truthy(),
                    LogicalOp::Or => lhs.truthy(),
                    LogicalOp::Nullish => !lhs.is_nullish(),
                };
                if short_circuit {
                    Ok(lhs)
                } else {
                    self.eval(rhs, scope)
                }
            }
            ExprKind::Assign { op, target, value } => {
                let reference = self.resolve(target, scope)?;
                let value = match op {
                    None => self.eval(value, scope)?,
                    Some(op) => {
                        let current = self.read_reference(&reference, scope)?;
                        let rhs = self.eval(value, scope)?;
                        self.binary(*op, &current, &rhs)?
                    }
                };
                self.write_reference(reference, value.clone(), scope)?;
                Ok(value)
            }
            ExprKind::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, scope)?.truthy() {
                    self.eval(consequent, scope)
                } else {
                    self.eval(alternate, scope)
                }
            }
            ExprKind::Call {
                callee,
                args,
                optional,
            } => self.eval_call(expr.line, callee, args, *optional, scope),
            ExprKind::New { callee, args } => {
                let constructor = self.eval(callee, scope)?;
                let args = self.eval_elements(args, scope)?;
                self.line = expr.line;
                self.construct(&constructor, callee, args)
            }
            ExprKind::Member {
                object,
                property,
                optional,
            } => {
                let object = self.eval(object, scope)?;
                if *optional && object.is_nullish() {
                    return Ok(Value::Undefined);
                }
                self.get_property(&object, property)
            }
            ExprKind::Index {
                object,
                index,
                optional,
            } => {
                let object = self.eval(object, scope)?;
                if *optional && object.is_nullish() {
                    return Ok(Value::Undefined);
                }
                let key = self.eval(index, scope)?;
                self.get_index(&object, &key)
            }
            ExprKind::Sequence(items) => {
                let mut last = Value::Undefined;
                for item in items {
                    last = self.eval(item, scope)?;
                }
                Ok(last)
            }
        }
    }

    fn lookup(&mut self, scope: &Rc<Scope>, name: &str) -> Flow<Value> {
        if let Some(value) = scope.lookup(name) {
            return Ok(value);
        }
        let candidates = scope.names();
        let message = match suggest_name(name, candidates.iter().map(|n| n.as_ref())) {
            Some(suggestion) => format!("{name} is not defined. Did you mean '{suggestion}'?"),
            None => format!("{name} is not defined"),
        };
        Err(self.throw_error("ReferenceError", message))
    }

    fn eval_elements(&mut self, elements: &[Element], scope: &Rc<Scope>) -> Flow<Vec<Value>> {
        let mut items = Vec::with_capacity(elements.len());
        for element in elements {
            match element {
                Element::Value(expr) => items.push(self.eval(expr, scope)?),
                Element::Spread(expr) => {
                    let value = self.eval(expr, scope)?;
                    items.extend(self.iterate(&value)?);
                }
                Element::Hole => items.push(Value::Undefined),
            }
            if items.len() > MAX_ARRAY_LENGTH {
                return Err(self.range_error("Invalid array length"));
            }
        }
        Ok(items)
    }

    fn eval_object(&mut self, props: &[Property], scope: &Rc<Scope>) -> Flow<Value> {
        let mut object = Object::default();
        for prop in props {
            match prop {
                Property::Value(key, expr) => {
                    let key = match key {
                        PropertyKey::Static(name) => name.clone(),
                        PropertyKey::Computed(expr) => {
                            let key = self.eval(expr, scope)?;
                            property_key(&key)
                        }
                    };
                    let value = self.eval(expr, scope)?;
                    object.set(key, value);
                }
                Property::Spread(expr) => {
                    let source = self.eval(expr, scope)?;
                    match &source {
                        Value::Object(other) => {
                            let entries = other.borrow().props.clone();
                            for (key, value) in entries {
                                object.set(key, value);
                            }
                        }
                        Value::Array(items) => {
                            let items = items.borrow().clone();
                            for (index, value) in items.into_iter().enumerate() {
                                object.set(index.to_string().into(), value);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
        let value = self.new_object(Vec::new());
        if let Value::Object(cell) = &value {
            *cell.borrow_mut() = object;
        }
        Ok(value)
    }

    fn eval_unary(&mut self, op: UnaryOp, expr: &Expr, scope: &Rc<Scope>) -> Flow<Value> {
        match op {
            UnaryOp::TypeOf => {
                if let ExprKind::Ident(name) = &expr.kind
                    && scope.lookup(name).is_none()
                {
                    return Ok(Value::from("undefined"));
                }
                let value = self.eval(expr, scope)?;
                Ok(Value::from(value.type_of()))
            }
            UnaryOp::Delete => {
                match &expr.kind {
                    ExprKind::Member { object, property, .. } => {
                        let object = self.eval(object, scope)?;
                        self.delete_property(&object, property);
                    }
                    ExprKind::Index { object, index, .. } => {
                        let object = self.eval(object, scope)?;
                        let key = self.eval(index, scope)?;
                        self.delete_property(&object, &property_key(&key));
                    }
                    _ => {}
                }
                Ok(Value::Bool(true))
            }
            _ => {
                let value = self.eval(expr, scope)?;
                Ok(match op {
                    UnaryOp::Neg => Value::Number(-value.to_number()),
                    UnaryOp::Plus => Value::Number(value.to_number()),
                    UnaryOp::Not => Value::Bool(!value.truthy()),
                    UnaryOp::BitNot => Value::Number(f64::from(!to_int32(value.to_number()))),
                    _ => Value::Undefined,
                })
            }
        }
    }

    fn delete_property(&mut self, object: &Value, key: &str) {
        match object {
            Value::Object(cell) => {
                cell.borrow_mut().remove(key);
            }
            Value::Array(items) => {
                if let Some(index) = array_index(key)
                    && let Some(slot) = items.borrow_mut().get_mut(index)
                {
                    *slot = Value::Undefined;
                }
            }
            _ => {}
        }
    }

    fn eval_call(
        &mut self,
        line: usize,
        callee: &Expr,
        args: &[Element],
        optional: bool,
        scope: &Rc<Scope>,
    ) -> Flow<Value> {
        let (function, this) = match &callee.kind {
            ExprKind::Member {
                object,
                property,
                optional: member_optional,
            } => {
                let object = self.eval(object, scope)?;
                if *member_optional && object.is_nullish() {
                    return Ok(Value::Undefined);
                }
                let function = self.get_property(&object, property)?;
                (function, object)
            }
            ExprKind::Index {
                object,
                index,
                optional: member_optional,
            } => {
                let object = self.eval(object, scope)?;
                if *member_optional && object.is_nullish() {
                    return Ok(Value::Undefined);
                }
                let key = self.eval(index, scope)?;
                let function = self.get_index(&object, &key)?;
                (function, object)
            }
            _ => (self.eval(callee, scope)?, Value::Undefined),
        };

        if optional && function.is_nullish() {
            return Ok(Value::Undefined);
        }
        let args = self.eval_elements(args, scope)?;
        self.line = line;
        if !function.is_callable() {
            return Err(self.type_error(format!("{} is not a function", describe_expr(callee))));
        }
        self.call_function(&function, this, args)
    }

    fn construct(&mut self, constructor: &Value, callee: &Expr, args: Vec<Value>) -> Flow<Value> {
        match constructor {
            Value::Builtin(builtin) => stdlib::call_builtin(self, *builtin, Value::Undefined, args),
            Value::Function(closure) if !closure.def.arrow => {
                let instance = self.new_object(Vec::new());
                let result = self.call_closure(closure, instance.clone(), args)?;
                Ok(match result {
                    Value::Object(_) | Value::Array(_) | Value::Host(_) => result,
                    _ => instance,
                })
            }
            _ => Err(self.type_error(format!("{} is not a constructor", describe_expr(callee)))),
        }
    }

    pub fn call_function(&mut self, callee: &Value, this: Value, args: Vec<Value>) -> Flow<Value> {
        match callee {
            Value::Function(closure) => self.call_closure(closure, this, args),
            Value::Builtin(builtin) => stdlib::call_builtin(self, *builtin, this, args),
            Value::Method(method) => {
                let receiver = method.receiver.clone();
                let name = Rc::clone(&method.name);
                self.call_method(&receiver, &name, args)
            }
            other => Err(self.type_error(format!("{} is not a function", other.type_name()))),
        }
    }

    fn call_method(&mut self, receiver: &Value, name: &str, args: Vec<Value>) -> Flow<Value> {
        self.tick()?;
        match receiver {
            Value::Array(items) => stdlib::array_method(self, receiver, items, name, args),
            Value::Str(text) => stdlib::string_method(self, text, name, &args),
            Value::Number(value) => stdlib::number_method(self, *value, name, &args),
            Value::Object(_) => stdlib::object_method(self, receiver, name, &args),
            Value::Host(host) => host::call_method(self, receiver, host, name, &args),
            Value::Function(_) | Value::Builtin(_) | Value::Method(_) => {
                stdlib::function_method(self, receiver, name, args)
            }
            other => Err(self.type_error(format!(
                "{}.{name} is not a function",
                other.type_name()
            ))),
        }
    }

    fn call_closure(&mut self, closure: &Rc<Closure>, this: Value, args: Vec<Value>) -> Flow<Value> {
        self.tick()?;
        if self.call_depth >= self.limits.max_call_depth {
            return Err(self.fatal(format!(
                "RangeError: Maximum call stack size exceeded ({} nested calls)",
                self.limits.max_call_depth
            )));
        }
        self.call_depth += 1;
        let saved_line = self.line;
        let result = self.invoke(closure, this, args);
        self.call_depth -= 1;
        self.line = saved_line;
        result
    }

    fn invoke(&mut self, closure: &Rc<Closure>, this: Value, args: Vec<Value>) -> Flow<Value> {
        let def = &closure.def;
        let scope = Scope::child(&closure.env, true);
        if !def.arrow {
            scope.declare("this".into(), this, false);
            if let Some(name) = &def.name {
                scope.declare(name.clone(), Value::Function(Rc::clone(closure)), true);
            }
        }

        let mut args = args.into_iter();
        let mode = BindMode::Declare {
            scope: &scope,
            mutable: true,
        };
        for param in &def.params {
            let value = args.next().unwrap_or(Value::Undefined);
            self.bind_element(param, value, &mode, &scope)?;
        }
        if let Some(rest) = &def.rest {
            let remaining = self.new_array(args.collect());
            self.bind_pattern(rest, remaining, &mode, &scope)?;
        }

        match &def.body {
            FunctionBody::Expr(expr) => self.eval(expr, &scope),
            FunctionBody::Block(body) => {
                self.hoist(body, &scope);
                for stmt in body {
                    if let Completion::Return(value) = self.exec_stmt(stmt, &scope)? {
                        return Ok(value);
                    }
                }
                Ok(Value::Undefined)
            }
        }
    }

    // ---- references and properties -------------------------------------

    fn resolve(&mut self, target: &Expr, scope: &Rc<Scope>) -> Flow<Reference> {
        match &target.kind {
            ExprKind::Ident(name) => Ok(Reference::Name(name.clone())),
            ExprKind::Member {
                object, property, ..
            } => {
                let object = self.eval(object, scope)?;
                Ok(Reference::Property(object, property.clone()))
            }
            ExprKind::Index { object, index, .. } => {
                let object = self.eval(object, scope)?;
                let key = self.eval(index, scope)?;
                Ok(Reference::Index(object, key))
            }
            _ => Err(Interrupt::Fatal(ExecutionError::at(
                "SyntaxError: invalid assignment target",
                target.line,
            ))),
        }
    }

    fn read_reference(&mut self, reference: &Reference, scope: &Rc<Scope>) -> Flow<Value> {
        match reference {
            Reference::Name(name) => self.lookup(scope, name),
            Reference::Property(object, key) => self.get_property(object, key),
            Reference::Index(object, key) => self.get_index(object, key),
        }
    }

    fn write_reference(&mut self, reference: Reference, value: Value, scope: &Rc<Scope>) -> Flow<()> {
        match reference {
            Reference::Name(name) => self.assign_name(scope, &name, value),
            Reference::Property(object, key) => self.set_property(&object, &key, value),
            Reference::Index(object, key) => self.set_index(&object, &key, value),
        }
    }

    pub fn get_property(&mut self, object: &Value, key: &str) -> Flow<Value> {
        match object {
            Value::Undefined | Value::Null => Err(self.type_error(format!(
                "Cannot read properties of {} (reading '{key}')",
                object.type_name()
            ))),
            Value::Object(cell) => {
                if let Some(value) = cell.borrow().get(key) {
                    return Ok(value);
                }
                Ok(self.method_or_undefined(object, stdlib::is_object_method(key), key))
            }
            Value::Array(items) => {
                if key == "length" {
                    return Ok(Value::Number(items.borrow().len() as f64));
                }
                if let Some(index) = array_index(key) {
                    return Ok(items.borrow().get(index).cloned().unwrap_or(Value::Undefined));
                }
                Ok(self.method_or_undefined(object, stdlib::is_array_method(key), key))
            }
            Value::Str(text) => {
                if key == "length" {
                    return Ok(Value::Number(text.chars().count() as f64));
                }
                if let Some(index) = array_index(key) {
                    return Ok(text
                        .chars()
                        .nth(index)
                        .map(|ch| Value::from(ch.to_string()))
                        .unwrap_or(Value::Undefined));
                }
                Ok(self.method_or_undefined(object, stdlib::is_string_method(key), key))
            }
            Value::Number(_) => {
                Ok(self.method_or_undefined(object, stdlib::is_number_method(key), key))
            }
            Value::Bool(_) => Ok(Value::Undefined),
            Value::Builtin(builtin) => Ok(stdlib::builtin_property(self, *builtin, key)),
            Value::Function(closure) => Ok(match key {
                "name" => Value::from(closure.def.name.as_deref().unwrap_or("")),
                "length" => Value::Number(closure.def.params.len() as f64),
                _ => self.method_or_undefined(object, stdlib::is_function_method(key), key),
            }),
            Value::Method(_) => {
                Ok(self.method_or_undefined(object, stdlib::is_function_method(key), key))
            }
            Value::Host(host) => Ok(host::get_property(self, object, host, key)),
        }
    }

    fn method_or_undefined(&self, receiver: &Value, exists: bool, key: &str) -> Value {
        if exists {
            stdlib::bind_method(receiver, key)
        } else {
            Value::Undefined
        }
    }

    pub fn get_index(&mut self, object: &Value, key: &Value) -> Flow<Value> {
        if let (Value::Array(items), Value::Number(index)) = (object, key)
            && let Some(index) = number_index(*index)
        {
            return Ok(items.borrow().get(index).cloned().unwrap_or(Value::Undefined));
        }
        let key = property_key(key);
        self.get_property(object, &key)
    }

    pub fn set_property(&mut self, object: &Value, key: &str, value: Value) -> Flow<()> {
        match object {
            Value::Undefined | Value::Null => Err(self.type_error(format!(
                "Cannot set properties of {} (setting '{key}')",
                object.type_name()
            ))),
            Value::Object(cell) => {
                cell.borrow_mut().set(key.into(), value);
                Ok(())
            }
            Value::Array(items) => {
                if key == "length" {
                    let length = value.to_number();
                    let Some(length) = number_index(length).filter(|n| *n <= MAX_ARRAY_LENGTH)
                    else {
                        return Err(self.range_error("Invalid array length"));
                    };
                    items.borrow_mut().resize(length, Value::Undefined);
                    return Ok(());
                }
                match array_index(key) {
                    Some(index) => self.set_array_item(items, index, value),
                    None => Ok(()),
                }
            }
            Value::Host(host) => host::set_property(self, host, key, value),
            _ => Ok(()),
        }
    }

    pub fn set_index(&mut self, object: &Value, key: &Value, value: Value) -> Flow<()> {
        if let (Value::Array(items), Value::Number(index)) = (object, key)
            && let Some(index) = number_index(*index)
        {
            return self.set_array_item(items, index, value);
        }
        let key = property_key(key);
        self.set_property(object, &key, value)
    }

    fn set_array_item(&mut self, items: &Shared<Items>, index: usize, value: Value) -> Flow<()> {
        if index >= MAX_ARRAY_LENGTH {
            return Err(self.range_error("Invalid array length"));
        }
        let mut items = items.borrow_mut();
        if index >= items.len() {
            items.resize(index + 1, Value::Undefined);
        }
        items[index] = value;
        Ok(())
    }

    /// Values produced by spreading or `for...of` over `value`.
    pub fn iterate(&mut self, value: &Value) -> Flow<Vec<Value>> {
        match value {
            Value::Array(items) => Ok(items.borrow().clone()),
            Value::Str(text) => Ok(text.chars().map(|ch| Value::from(ch.to_string())).collect()),
            other => Err(self.type_error(format!("{} is not iterable", other.type_name()))),
        }
    }

    /// Keys visited by `for...in`.
    pub fn own_keys(&self, value: &Value) -> Vec<Value> {
        match value {
            Value::Object(cell) => cell
                .borrow()
                .props
                .iter()
                .map(|(key, _)| Value::Str(key.clone()))
                .collect(),
            Value::Array(items) => (0..items.borrow().len())
                .map(|index| Value::from(index.to_string()))
                .collect(),
            Value::Str(text) => (0..text.chars().count())
                .map(|index| Value::from(index.to_string()))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn check_string_length(&self, length: usize) -> Flow<()> {
        if length > MAX_STRING_LENGTH {
            return Err(self.range_error("Invalid string length"));
        }
        Ok(())
    }

    fn binary(&mut self, op: BinaryOp, lhs: &Value, rhs: &Value) -> Flow<Value> {
        let number = |value: f64| Ok(Value::Number(value));
        match op {
            BinaryOp::Add => {
                if let (Value::Number(a), Value::Number(b)) = (lhs, rhs) {
                    return number(a + b);
                }
                let lhs = to_primitive(lhs);
                let rhs = to_primitive(rhs);
                if matches!(lhs, Value::Str(_)) || matches!(rhs, Value::Str(_)) {
                    let mut text = lhs.to_js_string();
                    text.push_str(&rhs.to_js_string());
                    self.check_string_length(text.len())?;
                    Ok(Value::from(text))
                } else {
                    number(lhs.to_number() + rhs.to_number())
                }
            }
            BinaryOp::Sub => number(lhs.to_number() - rhs.to_number()),
            BinaryOp::Mul => number(lhs.to_number() * rhs.to_number()),
            BinaryOp::Div => number(lhs.to_number() / rhs.to_number()),
            BinaryOp::Rem => number(lhs.to_number() % rhs.to_number()),
            BinaryOp::Pow => number(lhs.to_number().powf(rhs.to_number())),
            BinaryOp::Eq => Ok(Value::Bool(lhs.loose_equals(rhs))),
            BinaryOp::NotEq => Ok(Value::Bool(!lhs.loose_equals(rhs))),
            BinaryOp::StrictEq => Ok(Value::Bool(lhs.strict_equals(rhs))),
            BinaryOp::StrictNotEq => Ok(Value::Bool(!lhs.strict_equals(rhs))),
            BinaryOp::Lt => Ok(Value::Bool(compare(lhs, rhs) == Some(Ordering::Less))),
            BinaryOp::Le => Ok(Value::Bool(matches!(
                compare(lhs, rhs),
                Some(Ordering::Less | Ordering::Equal)
            ))),
            BinaryOp::Gt => Ok(Value::Bool(compare(lhs, rhs) == Some(Ordering::Greater))),
            BinaryOp::Ge => Ok(Value::Bool(matches!(
                compare(lhs, rhs),
                Some(Ordering::Greater | Ordering::Equal)
            ))),
            BinaryOp::BitAnd => number(f64::from(to_int32(lhs.to_number()) & to_int32(rhs.to_number()))),
            BinaryOp::BitOr => number(f64::from(to_int32(lhs.to_number()) | to_int32(rhs.to_number()))),
            BinaryOp::BitXor => number(f64::from(to_int32(lhs.to_number()) ^ to_int32(rhs.to_number()))),
            BinaryOp::Shl => {
                let shift = to_int32(rhs.to_number()) as u32 & 31;
                number(f64::from(to_int32(lhs.to_number()).wrapping_shl(shift)))
            }
            BinaryOp::Shr => {
                let shift = to_int32(rhs.to_number()) as u32 & 31;
                number(f64::from(to_int32(lhs.to_number()) >> shift))
            }
            BinaryOp::UShr => {
                let shift = to_int32(rhs.to_number()) as u32 & 31;
                number(f64::from((to_int32(lhs.to_number()) as u32) >> shift))
            }
            BinaryOp::In => {
                let key = property_key(lhs);
                let found = match rhs {
                    Value::Object(cell) => cell.borrow().get(&key).is_some(),
                    Value::Array(items) => {
                        key.as_ref() == "length"
                            || array_index(&key).is_some_and(|index| index < items.borrow().len())
                    }
                    Value::Host(_) | Value::Builtin(_) => {
                        !matches!(self.get_property(rhs, &key)?, Value::Undefined)
                    }
                    other => {
                        return Err(self.type_error(format!(
                            "Cannot use 'in' operator to search for '{key}' in {}",
                            other.type_name()
                        )));
                    }
                };
                Ok(Value::Bool(found))
            }
            BinaryOp::InstanceOf => match rhs {
                Value::Builtin(builtin) => Ok(Value::Bool(stdlib::instance_of(lhs, *builtin))),
                Value::Function(_) => Ok(Value::Bool(false)),
                other => Err(self.type_error(format!(
                    "Right-hand side of 'instanceof' is not callable ({})",
                    other.type_name()
                ))),
            },
        }
    }
}

impl Drop for Interpreter<'_> {
    /// Empties every tracked cell while all of them are still alive, so the
    /// final drops neither leak cycles nor recurse through long chains.
    fn drop(&mut self) {
        let alive: Vec<Alive> = self.tracked.drain(..).filter_map(|t| t.upgrade()).collect();
        for cell in &alive {
            match cell {
                Alive::Scope(scope) => scope.clear(),
                Alive::Array(items) => drop(std::mem::take(&mut *items.borrow_mut())),
                Alive::Object(object) => drop(std::mem::take(&mut object.borrow_mut().props)),
                Alive::Node(node) => host::clear_node(node),
                Alive::Material(material) => {
                    drop(std::mem::take(&mut material.borrow_mut().props));
                }
            }
        }
    }
}

fn to_primitive(value: &Value) -> Value {
    match value {
        Value::Array(_)
        | Value::Object(_)
        | Value::Function(_)
        | Value::Builtin(_)
        | Value::Method(_)
        | Value::Host(_) => Value::from(value.to_js_string()),
        other => other.clone(),
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    let lhs = to_primitive(lhs);
    let rhs = to_primitive(rhs);
    if let (Value::Str(a), Value::Str(b)) = (&lhs, &rhs) {
        return Some(a.cmp(b));
    }
    lhs.to_number().partial_cmp(&rhs.to_number())
}

pub(crate) fn to_int32(value: f64) -> i32 {
    if !value.is_finite() {
        return 0;
    }
    (value.trunc() % 4_294_967_296.0) as i64 as u32 as i32
}

pub(crate) fn property_key(value: &Value) -> Rc<str> {
    match value {
        Value::Str(text) => text.clone(),
        Value::Number(number) => format_number(*number).into(),
        other => other.to_js_string().into(),
    }
}

/// Canonical array index, e.g. `"3"` but not `"03"` or `"-1"`.
pub(crate) fn array_index(key: &str) -> Option<usize> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    if !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok()
}

pub(crate) fn number_index(value: f64) -> Option<usize> {
    (value >= 0.0 && value.fract() == 0.0 && value < usize::MAX as f64).then_some(value as usize)
}

fn describe_expr(expr: &Expr) -> String {
    match &expr.kind {
        ExprKind::Ident(name) => name.to_string(),
        ExprKind::Member {
            object, property, ..
        } => format!("{}.{property}", describe_expr(object)),
        ExprKind::Index { object, .. } => format!("{}[...]", describe_expr(object)),
        ExprKind::This => "this".to_string(),
        ExprKind::Call { callee, .. } => format!("{}(...)", describe_expr(callee)),
        _ => "expression".to_string(),
    }
}

fn collect_var_names(body: &[Stmt], names: &mut Vec<Rc<str>>) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Var {
                kind: DeclKind::Var,
                decls,
            } => {
                for (pattern, _) in decls {
                    pattern_names(pattern, names);
                }
            }
            StmtKind::Block(inner) => collect_var_names(inner, names),
            StmtKind::If {
                consequent,
                alternate,
                ..
            } => {
                collect_var_names(std::slice::from_ref(consequent.as_ref()), names);
                if let Some(alternate) = alternate {
                    collect_var_names(std::slice::from_ref(alternate.as_ref()), names);
                }
            }
            StmtKind::For { init, body, .. } => {
                if let Some(init) = init {
                    collect_var_names(std::slice::from_ref(init.as_ref()), names);
                }
                collect_var_names(std::slice::from_ref(body.as_ref()), names);
            }
            StmtKind::ForEach {
                decl,
                pattern,
                body,
                ..
            } => {
                if *decl == Some(DeclKind::Var) {
                    pattern_names(pattern, names);
                }
                collect_var_names(std::slice::from_ref(body.as_ref()), names);
            }
            StmtKind::While { body, .. } | StmtKind::DoWhile { body, .. } => {
                collect_var_names(std::slice::from_ref(body.as_ref()), names);
            }
            StmtKind::Try {
                block,
                handler,
                finalizer,
                ..
            } => {
                collect_var_names(block, names);
                if let Some(handler) = handler {
                    collect_var_names(handler, names);
                }
                if let Some(finalizer) = finalizer {
                    collect_var_names(finalizer, names);
                }
            }
            StmtKind::Switch { cases, .. } => {
                for case in cases {
                    collect_var_names(&case.body, names);
                }
            }
            _ => {}
        }
    }
}

fn pattern_names(pattern: &Pattern, names: &mut Vec<Rc<str>>) {
    match pattern {
        Pattern::Ident(name) => names.push(name.clone()),
        Pattern::Array { items, rest } => {
            for binding in items.iter().flatten() {
                pattern_names(&binding.pattern, names);
            }
            if let Some(rest) = rest {
                pattern_names(rest, names);
            }
        }
        Pattern::Object { props } => {
            for (_, binding) in props {
                pattern_names(&binding.pattern, names);
            }
        }
    }
}

fn suggest_name<'n>(name: &str, candidates: impl Iterator<Item = &'n str>) -> Option<&'n str> {
    let max_distance = (name.len() / 3).max(2);
    candidates
        .filter(|candidate| *candidate != "this")
        .map(|candidate| (levenshtein(name, candidate), candidate))
        .filter(|(distance, _)| *distance <= max_distance)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, candidate)| candidate)
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            current[j + 1] = (previous[j + 1] + 1)
                .min(current[j] + 1)
                .min(previous[j] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::{array_index, levenshtein, suggest_name, to_int32};

    #[test]
    fn int32_conversion_wraps() {
        assert_eq!(to_int32(4_294_967_297.0), 1);
        assert_eq!(to_int32(-1.5), -1);
        assert_eq!(to_int32(f64::NAN), 0);
        assert_eq!(to_int32(2_147_483_648.0), i32::MIN);
    }

    #[test]
    fn canonical_array_indices_only() {
        assert_eq!(array_index("12"), Some(12));
        assert_eq!(array_index("0"), Some(0));
        assert_eq!(array_index("01"), None);
        assert_eq!(array_index("x"), None);
    }

    #[test]
    fn suggests_close_names() {
        assert_eq!(levenshtein("Vector3", "vector3"), 0);
        let names = ["BoxGeometry", "SphereGeometry", "Mesh"];
        assert_eq!(
            suggest_name("BoxGeometri", names.into_iter()),
            Some("BoxGeometry")
        );
        assert_eq!(suggest_name("Torus", names.into_iter()), None);
    }
}
