use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::io::{self, Write};
use std::path::PathBuf;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use thiserror::Error;
use tracing::debug;

use crate::ast::{Expr, ExprKind, FunctionDecl, Program, Stmt, StmtKind, UnaryOp};
use crate::diagnostics::Diagnostic;
use crate::modules::ScriptModule;
use crate::parser::Parser;
use crate::tokenizer::{Span, Tokenizer};
use crate::value::{self, FunctionValue, NativeFunction, UserFunction, Value};

/// A runtime failure carrying the span of the failing node. Errors crossing
/// a call site are wrapped, keeping the inner error so diagnostics can point
/// at the actual fault.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct RuntimeError {
    pub message: String,
    pub span: Span,
    #[source]
    pub cause: Option<Box<RuntimeError>>,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            cause: None,
        }
    }

    fn wrap(inner: RuntimeError, span: Span) -> Self {
        Self {
            message: inner.message.clone(),
            span,
            cause: Some(Box::new(inner)),
        }
    }

    /// Follows the cause chain to the error closest to the fault site.
    pub fn innermost(&self) -> &RuntimeError {
        let mut err = self;
        while let Some(cause) = &err.cause {
            err = cause;
        }
        err
    }
}

/// Non-local control flow travels through the same channel as errors but is
/// a distinct variant set: loops and calls translate the first three back
/// into normal completion, and only `Error` ever reaches the user.
#[derive(Debug)]
pub enum Signal {
    Break(Span),
    Continue(Span),
    Return { value: Value, span: Span },
    Error(RuntimeError),
}

type Flow = Result<Value, Signal>;

fn fail(message: impl Into<String>, span: Span) -> Signal {
    Signal::Error(RuntimeError::new(message, span))
}

// ------------------------------------
// Environment
// ------------------------------------

pub type EnvRef = Rc<RefCell<Frame>>;

/// One lexical scope: a mapping plus an optional parent link.
#[derive(Debug, Default)]
pub struct Frame {
    vars: HashMap<String, Value>,
    parent: Option<EnvRef>,
}

pub fn new_env() -> EnvRef {
    Rc::new(RefCell::new(Frame::default()))
}

pub fn child_env(parent: &EnvRef) -> EnvRef {
    Rc::new(RefCell::new(Frame {
        vars: HashMap::new(),
        parent: Some(parent.clone()),
    }))
}

/// Declaring a name twice in the same frame is an error; shadowing an outer
/// frame is fine.
pub fn env_declare(env: &EnvRef, name: &str, value: Value) -> Result<(), String> {
    let mut frame = env.borrow_mut();
    if frame.vars.contains_key(name) {
        return Err(format!("cannot redeclare variable {}", name));
    }
    frame.vars.insert(name.to_string(), value);
    Ok(())
}

pub fn env_assign(env: &EnvRef, name: &str, value: Value) -> Result<(), String> {
    let mut frame = env.borrow_mut();
    if frame.vars.contains_key(name) {
        frame.vars.insert(name.to_string(), value);
        return Ok(());
    }
    match &frame.parent {
        Some(parent) => env_assign(parent, name, value),
        None => Err(format!("variable not declared {}", name)),
    }
}

/// Lexical chain first; the process-wide globals table is consulted only
/// after the whole chain misses.
pub fn env_get(env: &EnvRef, name: &str) -> Result<Value, String> {
    let frame = env.borrow();
    if let Some(value) = frame.vars.get(name) {
        return Ok(value.clone());
    }
    match &frame.parent {
        Some(parent) => env_get(parent, name),
        None => lookup_native(name)
            .map(|native| Value::Function(FunctionValue::Native(native)))
            .ok_or_else(|| format!("variable not declared {}", name)),
    }
}

// ------------------------------------
// Native functions
// ------------------------------------

/// Globals registry, built once at startup and read-only afterwards.
static NATIVES: Lazy<HashMap<&'static str, NativeFunction>> = Lazy::new(|| {
    let natives = [
        // Time
        native("sleep", 1, false, native_sleep),
        native("time", 0, false, native_time),
        // Math
        native("abs", 1, false, native_abs),
        native("max", 2, false, native_max),
        native("min", 2, false, native_min),
        native("avg", 1, false, native_avg),
        native("sqrt", 1, false, native_sqrt),
        // Collections
        native("len", 1, false, native_len),
        native("append", 2, false, native_append),
        // IO
        native("print", 0, true, native_print),
        native("println", 0, true, native_println),
        // Modules
        native("import", 1, false, native_import),
        // Misc
        native("type", 1, false, native_type),
        native("zen", 0, false, native_zen),
    ];
    natives.into_iter().map(|f| (f.name, f)).collect()
});

fn native(
    name: &'static str,
    arity: usize,
    variadic: bool,
    handler: value::NativeHandler,
) -> NativeFunction {
    NativeFunction {
        name,
        arity,
        variadic,
        handler,
    }
}

pub fn lookup_native(name: &str) -> Option<&'static NativeFunction> {
    NATIVES.get(name)
}

const ZEN: &str = r#"
        ----------------
        The Zen of Radish
        ----------------
    Donut is better than Bagel.
    Cat is better than Dog.
    Gin is better than Beer.
    Tarkovsky is better than Bergman.
    Rust is better than almost everything else.

Interpreters are slower than the time it takes to build them.
Although speed counts, the principles you learn building them are invaluable.
"#;

// ------------------------------------
// Interpreter
// ------------------------------------

/// Tree-walking evaluator. Owns the environment chain, the pending-defer
/// frames, and the output stream the IO natives write to.
pub struct Interpreter {
    env: EnvRef,
    output: Box<dyn Write>,
    defer_frames: Vec<Vec<Expr>>,
    imported: HashSet<PathBuf>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_output(Box::new(io::stdout()))
    }

    pub fn with_output(output: Box<dyn Write>) -> Self {
        Self {
            env: new_env(),
            output,
            defer_frames: Vec::new(),
            imported: HashSet::new(),
        }
    }

    /// Runs a whole program. The top level owns a defer frame of its own, so
    /// deferred calls queued outside any function fire when the program ends.
    pub fn run_program(&mut self, program: &Program) -> Result<Value, RuntimeError> {
        debug!(declarations = program.declarations.len(), "running program");
        self.defer_frames.push(Vec::new());
        let mut outcome = Ok(Value::Nil);
        for stmt in &program.declarations {
            if let Err(signal) = self.eval_stmt(stmt) {
                outcome = Err(self.escape(signal));
                break;
            }
        }
        self.drain_defers(outcome.map(|_| Value::Nil))
    }

    /// Evaluates a bare expression in the current environment.
    pub fn eval_expression(&mut self, expr: &Expr) -> Result<Value, RuntimeError> {
        self.eval_expr(expr).map_err(|signal| self.escape(signal))
    }

    /// A sentinel that reaches a scope with no loop or call to absorb it is
    /// a runtime error at the point of escape.
    fn escape(&self, signal: Signal) -> RuntimeError {
        match signal {
            Signal::Break(span) => RuntimeError::new("break outside loop", span),
            Signal::Continue(span) => RuntimeError::new("continue outside loop", span),
            Signal::Return { span, .. } => RuntimeError::new("return outside function", span),
            Signal::Error(err) => err,
        }
    }

    /// Pops the current defer frame and runs its calls in LIFO order. The
    /// incoming outcome wins over any failure in a deferred call, but every
    /// deferred call still runs.
    fn drain_defers(
        &mut self,
        outcome: Result<Value, RuntimeError>,
    ) -> Result<Value, RuntimeError> {
        let frame = self.defer_frames.pop().unwrap_or_default();
        let mut result = outcome;
        for call in frame.iter().rev() {
            if let Err(signal) = self.eval_expr(call) {
                let err = self.escape(signal);
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }

    // ------------------------------------
    // Statements
    // ------------------------------------

    fn eval_stmt(&mut self, stmt: &Stmt) -> Flow {
        match &stmt.kind {
            StmtKind::Expr(expr) => self.eval_expr(expr),
            StmtKind::Var { name, value } => {
                let value = self.eval_expr(value)?;
                env_declare(&self.env, &name.name, value)
                    .map_err(|msg| fail(msg, stmt.span))?;
                Ok(Value::Nil)
            }
            StmtKind::If {
                cond,
                then_stmt,
                else_stmt,
            } => {
                let cond = self.eval_expr(cond)?;
                if cond.is_truthy() {
                    self.eval_stmt(then_stmt)
                } else if let Some(else_stmt) = else_stmt {
                    self.eval_stmt(else_stmt)
                } else {
                    Ok(Value::Nil)
                }
            }
            StmtKind::While { cond, body } => {
                loop {
                    let cond = self.eval_expr(cond)?;
                    if !cond.is_truthy() {
                        break;
                    }
                    match self.eval_stmt(body) {
                        Ok(_) => {}
                        Err(Signal::Break(_)) => break,
                        Err(Signal::Continue(_)) => continue,
                        Err(other) => return Err(other),
                    }
                }
                Ok(Value::Nil)
            }
            StmtKind::Break => Err(Signal::Break(stmt.span)),
            StmtKind::Continue => Err(Signal::Continue(stmt.span)),
            StmtKind::Return(expr) => {
                let value = self.eval_expr(expr)?;
                Err(Signal::Return {
                    value,
                    span: stmt.span,
                })
            }
            StmtKind::Defer(call) => {
                if let Some(frame) = self.defer_frames.last_mut() {
                    frame.push(call.clone());
                }
                Ok(Value::Nil)
            }
            StmtKind::Assert(expr) => {
                let value = self.eval_expr(expr)?;
                if value.is_truthy() {
                    Ok(Value::Nil)
                } else {
                    Err(fail(format!("assert failed: {}", expr), stmt.span))
                }
            }
            StmtKind::Block(declarations) => self.eval_block(declarations),
            StmtKind::Function(decl) => self.eval_function_decl(decl, stmt.span),
        }
    }

    /// Blocks run in a fresh child frame; the previous frame is restored on
    /// every exit path, sentinel or error included.
    fn eval_block(&mut self, declarations: &[Stmt]) -> Flow {
        let new_env = child_env(&self.env);
        let prev = std::mem::replace(&mut self.env, new_env);
        let mut outcome = Ok(Value::Nil);
        for stmt in declarations {
            if let Err(signal) = self.eval_stmt(stmt) {
                outcome = Err(signal);
                break;
            }
        }
        self.env = prev;
        outcome.map(|_| Value::Nil)
    }

    /// Declares the function in the current frame and also yields it as a
    /// value, so named declarations and function literals share one path.
    fn eval_function_decl(&mut self, decl: &Rc<FunctionDecl>, span: Span) -> Flow {
        let function = Value::Function(FunctionValue::User(Rc::new(UserFunction {
            decl: decl.clone(),
            env: self.env.clone(),
        })));
        env_declare(&self.env, &decl.name.name, function.clone())
            .map_err(|msg| fail(msg, span))?;
        Ok(function)
    }

    // ------------------------------------
    // Expressions
    // ------------------------------------

    fn eval_expr(&mut self, expr: &Expr) -> Flow {
        match &expr.kind {
            ExprKind::Nil => Ok(Value::Nil),
            ExprKind::Number(text) => text
                .parse::<f64>()
                .map(Value::Number)
                .map_err(|err| fail(format!("invalid number literal: {}", err), expr.span)),
            ExprKind::Str(text) => Ok(Value::Str(text.clone())),
            ExprKind::Boolean(text) => Ok(Value::Bool(text == "true")),
            ExprKind::Identifier(name) => {
                env_get(&self.env, name).map_err(|msg| fail(msg, expr.span))
            }
            ExprKind::Comment(_) => Ok(Value::Nil),
            ExprKind::List(elements) => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    items.push(self.eval_expr(element)?);
                }
                Ok(Value::List(items))
            }
            ExprKind::Map(entries) => {
                let mut map = value::MapValue::new();
                for (key_expr, value_expr) in entries {
                    let key = self.eval_expr(key_expr)?;
                    let value = self.eval_expr(value_expr)?;
                    map.insert(key, value).map_err(|msg| fail(msg, expr.span))?;
                }
                Ok(Value::Map(map))
            }
            ExprKind::Paren(inner) => self.eval_expr(inner),
            ExprKind::Unary { op, operand } => {
                let value = self.eval_expr(operand)?;
                match op {
                    UnaryOp::Negate => {
                        value::negate(&value).map_err(|msg| fail(msg, expr.span))
                    }
                    UnaryOp::Not => Ok(value::not(&value)),
                }
            }
            ExprKind::Binary { lhs, op, rhs } => {
                let left = self.eval_expr(lhs)?;
                let right = self.eval_expr(rhs)?;
                self.apply_binary(*op, &left, &right, expr.span)
            }
            ExprKind::LogicalAnd { lhs, rhs } => {
                let left = self.eval_expr(lhs)?;
                if !left.is_truthy() {
                    return Ok(Value::Bool(false));
                }
                let right = self.eval_expr(rhs)?;
                Ok(Value::Bool(right.is_truthy()))
            }
            ExprKind::LogicalOr { lhs, rhs } => {
                let left = self.eval_expr(lhs)?;
                if left.is_truthy() {
                    return Ok(Value::Bool(true));
                }
                let right = self.eval_expr(rhs)?;
                Ok(Value::Bool(right.is_truthy()))
            }
            ExprKind::Ternary {
                cond,
                then_expr,
                else_expr,
            } => {
                let cond = self.eval_expr(cond)?;
                if cond.is_truthy() {
                    self.eval_expr(then_expr)
                } else {
                    self.eval_expr(else_expr)
                }
            }
            ExprKind::Assign { name, value } => {
                let value = self.eval_expr(value)?;
                env_assign(&self.env, &name.name, value)
                    .map_err(|msg| fail(msg, expr.span))?;
                Ok(Value::Nil)
            }
            ExprKind::Call { callee, args } => self.eval_call(callee, args, expr.span),
            ExprKind::Index { sequence, index } => {
                let sequence = self.eval_expr(sequence)?;
                let index = self.eval_expr(index)?;
                value::item_at_index(&sequence, &index).map_err(|msg| fail(msg, expr.span))
            }
            ExprKind::Function(decl) => self.eval_function_decl(decl, expr.span),
        }
    }

    fn apply_binary(
        &self,
        op: crate::ast::BinaryOp,
        left: &Value,
        right: &Value,
        span: Span,
    ) -> Flow {
        use crate::ast::BinaryOp::*;
        let result = match op {
            Add => value::add(left, right),
            Subtract => value::subtract(left, right),
            Multiply => value::multiply(left, right),
            Divide => value::divide(left, right),
            Modulo => value::modulo(left, right),
            Eq => return Ok(value::equal_to(left, right)),
            Neq => return Ok(value::not_equal_to(left, right)),
            Lt => return Ok(value::less_than(left, right)),
            Lte => return Ok(value::less_than_eq(left, right)),
            Gt => return Ok(value::greater_than(left, right)),
            Gte => return Ok(value::greater_than_eq(left, right)),
        };
        result.map_err(|msg| fail(msg, span))
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Expr], span: Span) -> Flow {
        let callee_value = self.eval_expr(callee)?;
        let function = match callee_value {
            Value::Function(function) => function,
            other => {
                // Not callable itself; fall back to a name lookup on its
                // rendering before giving up.
                match env_get(&self.env, &other.to_string()) {
                    Ok(Value::Function(function)) => function,
                    _ => {
                        return Err(fail(
                            format!("{} is not callable", other.type_tag()),
                            span,
                        ))
                    }
                }
            }
        };

        if !function.variadic() && function.arity() != args.len() {
            return Err(fail(
                format!(
                    "incorrect number of arguments to {} - {} expected {} provided",
                    function,
                    function.arity(),
                    args.len()
                ),
                span,
            ));
        }

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval_expr(arg)?);
        }

        match function {
            FunctionValue::User(func) => self.call_user_function(&func, values, span),
            FunctionValue::Native(func) => (func.handler)(self, &values)
                .map_err(|msg| fail(msg, span)),
        }
    }

    /// Calls a user function: arguments bind positionally in a frame whose
    /// parent is the *captured* environment, the body runs with its own
    /// defer frame, and `Return` unwinds here. Errors get wrapped with the
    /// call-site span, preserving the inner error.
    fn call_user_function(
        &mut self,
        func: &Rc<UserFunction>,
        args: Vec<Value>,
        call_span: Span,
    ) -> Flow {
        let env = child_env(&func.env);
        for (param, arg) in func.decl.params.iter().zip(args) {
            env_declare(&env, &param.name, arg).map_err(|msg| fail(msg, call_span))?;
        }

        let prev = std::mem::replace(&mut self.env, env);
        self.defer_frames.push(Vec::new());

        let mut outcome = Ok(Value::Nil);
        for stmt in &func.decl.body {
            if let Err(signal) = self.eval_stmt(stmt) {
                outcome = Err(signal);
                break;
            }
        }
        let outcome = match outcome {
            // A body that runs off the end returns nil.
            Ok(_) => Ok(Value::Nil),
            Err(Signal::Return { value, .. }) => Ok(value),
            Err(other) => Err(self.escape(other)),
        };

        // Deferred calls run before the environment switches back so they
        // still see the function's locals.
        let result = self.drain_defers(outcome);
        self.env = prev;

        result.map_err(|err| Signal::Error(RuntimeError::wrap(err, call_span)))
    }

    fn out(&mut self) -> &mut dyn Write {
        self.output.as_mut()
    }
}

// ------------------------------------
// Native handlers
// ------------------------------------

fn expect_number(args: &[Value], index: usize, who: &str) -> Result<f64, String> {
    match args.get(index) {
        Some(Value::Number(n)) => Ok(*n),
        _ => Err(format!("{}() expects a number", who)),
    }
}

fn native_sleep(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, String> {
    let ms = expect_number(args, 0, "sleep")?;
    if ms > 0.0 {
        thread::sleep(Duration::from_millis(ms as u64));
    }
    Ok(Value::Nil)
}

fn native_time(_interp: &mut Interpreter, _args: &[Value]) -> Result<Value, String> {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|err| err.to_string())?
        .as_millis();
    Ok(Value::Number(ms as f64))
}

fn native_abs(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, String> {
    Ok(Value::Number(expect_number(args, 0, "abs")?.abs()))
}

fn native_max(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, String> {
    let a = expect_number(args, 0, "max")?;
    let b = expect_number(args, 1, "max")?;
    Ok(Value::Number(a.max(b)))
}

fn native_min(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, String> {
    let a = expect_number(args, 0, "min")?;
    let b = expect_number(args, 1, "min")?;
    Ok(Value::Number(a.min(b)))
}

fn native_avg(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, String> {
    let elements = args[0]
        .sequence_elements()
        .ok_or("avg() expects a sequence")?;
    let mut sum = 0.0;
    for element in &elements {
        match element {
            Value::Number(n) => sum += n,
            _ => return Err("avg() expects numbers".to_string()),
        }
    }
    value::divide(&Value::Number(sum), &Value::Number(elements.len() as f64))
}

fn native_sqrt(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, String> {
    Ok(Value::Number(expect_number(args, 0, "sqrt")?.sqrt()))
}

fn native_len(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, String> {
    args[0]
        .sequence_len()
        .map(|n| Value::Number(n as f64))
        .ok_or_else(|| "len() expects a sequence".to_string())
}

fn native_append(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, String> {
    let sequence = &args[0];
    // Appending a list appends its elements one by one; anything else is a
    // single append (maps merge, strings concatenate).
    match (&args[0], &args[1]) {
        (Value::List(_), Value::List(elements)) => {
            let mut result = sequence.clone();
            for element in elements {
                result = result.append_one(element)?;
            }
            Ok(result)
        }
        (_, item) => sequence.append_one(item),
    }
}

fn native_print(interp: &mut Interpreter, args: &[Value]) -> Result<Value, String> {
    let joined: String = args.iter().map(Value::to_string).collect();
    write!(interp.out(), "{}", joined).map_err(|err| err.to_string())?;
    interp.out().flush().map_err(|err| err.to_string())?;
    Ok(Value::Nil)
}

fn native_println(interp: &mut Interpreter, args: &[Value]) -> Result<Value, String> {
    let joined: String = args.iter().map(Value::to_string).collect();
    writeln!(interp.out(), "{}", joined).map_err(|err| err.to_string())?;
    Ok(Value::Nil)
}

fn native_type(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, String> {
    Ok(Value::Type(args[0].type_tag()))
}

fn native_zen(interp: &mut Interpreter, _args: &[Value]) -> Result<Value, String> {
    writeln!(interp.out(), "{}", ZEN).map_err(|err| err.to_string())?;
    Ok(Value::Nil)
}

/// Reads, parses, and evaluates another script in the current environment.
/// A module imported twice runs once.
fn native_import(interp: &mut Interpreter, args: &[Value]) -> Result<Value, String> {
    let name = match &args[0] {
        Value::Str(name) => name,
        _ => return Err("import() expects a string".to_string()),
    };

    let module = ScriptModule::resolve(name);
    if interp.imported.contains(module.path()) {
        return Ok(Value::Nil);
    }

    let source = module
        .data()
        .map_err(|err| format!("cannot import '{}': {}", name, err))?;
    debug!(module = %module.path().display(), "importing module");
    interp.imported.insert(module.path().to_path_buf());

    let tokens = Tokenizer::new(&source).tokenize();
    let program = match Parser::new(tokens).parse() {
        Ok(program) => program,
        Err(err) => {
            let report = Diagnostic::from_syntax_error(&err).render(&module.display_path(), &source);
            eprint!("{}", report);
            return Err(format!("import of '{}' failed", name));
        }
    };

    if let Err(err) = interp.run_program(&program) {
        let report = Diagnostic::from_runtime_error(&err).render(&module.display_path(), &source);
        eprint!("{}", report);
        return Err(format!("import of '{}' failed", name));
    }
    Ok(Value::Nil)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::tokenizer::Tokenizer;

    #[derive(Clone, Default)]
    struct SharedBuf(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.borrow().clone()).expect("output was not utf-8")
        }
    }

    fn run(source: &str) -> (Result<Value, RuntimeError>, String) {
        let buf = SharedBuf::default();
        let mut interp = Interpreter::with_output(Box::new(buf.clone()));
        let tokens = Tokenizer::new(source).tokenize();
        let program = Parser::new(tokens).parse().expect("parse failed");
        let result = interp.run_program(&program);
        (result, buf.contents())
    }

    fn run_ok(source: &str) -> String {
        let (result, output) = run(source);
        result.expect("runtime error");
        output
    }

    fn run_err(source: &str) -> RuntimeError {
        let (result, _) = run(source);
        result.expect_err("expected runtime error")
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(run_ok("println(1 + 2 * 3 - 4 / 2)"), "5\n");
    }

    #[test]
    fn variables_and_assignment() {
        assert_eq!(run_ok("var x = 42 x = x + 1 println(x)"), "43\n");
    }

    #[test]
    fn block_scoping_and_shadowing() {
        let output = run_ok(
            "var foo = 42 { var foo = 24 println(foo) } println(foo)",
        );
        assert_eq!(output, "24\n42\n");
    }

    #[test]
    fn inner_block_assigns_outer_variable() {
        assert_eq!(run_ok("var x = 2 { x = x + 1 } println(x)"), "3\n");
    }

    #[test]
    fn redeclaring_in_same_frame_fails() {
        let err = run_err("var x = 1 var x = 2");
        assert_eq!(err.message, "cannot redeclare variable x");
    }

    #[test]
    fn undeclared_variable_fails() {
        let err = run_err("println(ghost)");
        assert_eq!(err.innermost().message, "variable not declared ghost");
    }

    #[test]
    fn if_else_branches() {
        assert_eq!(
            run_ok("var x = 0 if (2 + 2 == 4) x = 1 else x = 2 println(x)"),
            "1\n"
        );
        assert_eq!(
            run_ok("var x = 0 if (2 + 2 != 4) x = 1 else x = 2 println(x)"),
            "2\n"
        );
    }

    #[test]
    fn while_loop_with_break_and_continue() {
        let source = r#"
            var s = 0
            var i = 0
            while (i < 5) {
                if (i == 2) { i = i + 1 continue }
                s = s + i
                i = i + 1
            }
            println(s)
        "#;
        assert_eq!(run_ok(source), "8\n");

        let source = r#"
            var i = 0
            while (true) {
                if (i == 3) { break }
                i = i + 1
            }
            println(i)
        "#;
        assert_eq!(run_ok(source), "3\n");
    }

    #[test]
    fn break_outside_loop_is_a_runtime_error() {
        assert_eq!(run_err("break").message, "break outside loop");
        assert_eq!(run_err("continue").message, "continue outside loop");
    }

    #[test]
    fn functions_and_returns() {
        let source = r#"
            fun max_of(x, y) {
                if (x > y) { return x } else { return y }
            }
            println(max_of(10, 20))
        "#;
        assert_eq!(run_ok(source), "20\n");
    }

    #[test]
    fn implicit_return_is_nil() {
        assert_eq!(run_ok("fun f() {} println(f())"), "nil\n");
    }

    #[test]
    fn closures_capture_their_environment() {
        let source = r#"
            fun make() {
                var i = 0
                fun inc() { i = i + 1 return i }
                return inc
            }
            var f = make()
            println(f())
            println(f())
            println(f())
        "#;
        assert_eq!(run_ok(source), "1\n2\n3\n");
    }

    #[test]
    fn immediately_invoked_function_literal() {
        assert_eq!(run_ok("var x = fun(n) { return n * 2 }(21) println(x)"), "42\n");
    }

    #[test]
    fn arity_is_enforced() {
        let err = run_err("fun f(a, b) { return a } f(1)");
        assert_eq!(
            err.message,
            "incorrect number of arguments to <fun-f> - 2 expected 1 provided"
        );
    }

    #[test]
    fn calling_a_non_function_fails() {
        let err = run_err("var x = 5 x(1)");
        assert_eq!(err.message, "number is not callable");
    }

    #[test]
    fn defer_runs_lifo_at_program_end() {
        let source = r#"
            defer println("a")
            defer println("b")
            println("c")
        "#;
        assert_eq!(run_ok(source), "c\nb\na\n");
    }

    #[test]
    fn defer_is_function_scoped() {
        let source = r#"
            fun work() {
                defer println("cleanup")
                println("body")
            }
            work()
            println("after")
        "#;
        assert_eq!(run_ok(source), "body\ncleanup\nafter\n");
    }

    #[test]
    fn defer_sees_function_locals() {
        let source = r#"
            fun work() {
                var tag = "inner"
                defer println(tag)
                println("body")
            }
            work()
        "#;
        assert_eq!(run_ok(source), "body\ninner\n");
    }

    #[test]
    fn defer_runs_on_error_paths() {
        let source = r#"
            fun work() {
                defer println("cleanup")
                var x = 1 / 0
            }
            work()
        "#;
        let (result, output) = run(source);
        assert!(result.is_err());
        assert_eq!(output, "cleanup\n");
    }

    #[test]
    fn assert_passes_and_fails() {
        assert_eq!(run_ok("assert 1 < 2 println(\"ok\")"), "ok\n");
        let err = run_err("assert 1 == 2");
        assert_eq!(err.message, "assert failed: 1 == 2");
    }

    #[test]
    fn logical_operators_short_circuit() {
        // boom() would divide by zero if evaluated.
        let source = r#"
            fun boom() { return 1 / 0 }
            println(false && boom())
            println(true || boom())
        "#;
        assert_eq!(run_ok(source), "false\ntrue\n");
    }

    #[test]
    fn logical_operators_return_booleans() {
        assert_eq!(run_ok("println(1 && \"x\")"), "true\n");
        assert_eq!(run_ok("println(0 || \"\")"), "false\n");
    }

    #[test]
    fn ternary_expression() {
        assert_eq!(run_ok("var x = 5 println(x > 3 ? \"big\" : \"small\")"), "big\n");
    }

    #[test]
    fn list_literals_and_indexing() {
        assert_eq!(run_ok("var xs = [10, 20, 30] println(xs[1])"), "20\n");
        let err = run_err("var xs = [1] println(xs[5])");
        assert_eq!(err.innermost().message, "list index out of range");
    }

    #[test]
    fn string_indexing() {
        assert_eq!(run_ok("var s = \"abc\" println(s[0])"), "a\n");
    }

    #[test]
    fn map_literals_lookup_and_misses() {
        assert_eq!(
            run_ok("var m = {\"k\": 1, \"v\": 2} println(m[\"k\"]) println(m[\"nope\"])"),
            "1\nnil\n"
        );
    }

    #[test]
    fn map_len_after_merge() {
        assert_eq!(
            run_ok("var m = {\"k\": 1, \"v\": 2} m = append(m, {\"w\": 3}) println(len(m))"),
            "3\n"
        );
    }

    #[test]
    fn composites_are_value_like() {
        let source = r#"
            var a = [1]
            var b = a
            b = append(b, 2)
            println(len(a))
            println(len(b))
        "#;
        assert_eq!(run_ok(source), "1\n2\n");
    }

    #[test]
    fn list_concatenation_with_plus() {
        assert_eq!(run_ok("println([1, 2] + [3])"), "[1, 2, 3]\n");
    }

    #[test]
    fn builtin_math() {
        assert_eq!(run_ok("println(abs(0 - 3))"), "3\n");
        assert_eq!(run_ok("println(max(2, 7))"), "7\n");
        assert_eq!(run_ok("println(min(2, 7))"), "2\n");
        assert_eq!(run_ok("println(sqrt(9))"), "3\n");
        assert_eq!(run_ok("println(avg([1, 2, 3]))"), "2\n");
    }

    #[test]
    fn builtin_len() {
        assert_eq!(run_ok("println(len(\"hello\"))"), "5\n");
        assert_eq!(run_ok("println(len([1, 2]))"), "2\n");
    }

    #[test]
    fn builtin_type_round_trips() {
        assert_eq!(run_ok("println(type(1))"), "number\n");
        assert_eq!(run_ok("println(type(\"s\"))"), "string\n");
        assert_eq!(run_ok("println(type(nil))"), "nil\n");
        assert_eq!(run_ok("println(type(type(1)))"), "type\n");
        assert_eq!(run_ok("println(type(1) == type(2))"), "true\n");
    }

    #[test]
    fn print_is_variadic() {
        assert_eq!(run_ok("print(1, \" and \", 2)"), "1 and 2");
    }

    #[test]
    fn division_by_zero_reports_at_fault_site() {
        let err = run_err("var x = 1 / 0");
        assert_eq!(err.innermost().message, "divide by zero error");
    }

    #[test]
    fn nested_call_errors_unwind_to_innermost_span() {
        let source = "fun inner() { return 1 / 0 }\nfun outer() { return inner() }\nouter()";
        let err = run_err(source);
        assert_eq!(err.message, "divide by zero error");
        // The outermost error sits at the call site, the innermost at the
        // division itself on line 1.
        assert!(err.cause.is_some());
        assert_eq!(err.innermost().span.begin.line, 1);
    }

    #[test]
    fn modulo_is_integer_modulo() {
        assert_eq!(run_ok("println(7 % 3)"), "1\n");
        assert_eq!(run_ok("println(7.9 % 3.2)"), "1\n");
    }

    #[test]
    fn string_comparison_is_lexicographic() {
        assert_eq!(run_ok("println(\"abc\" < \"abd\")"), "true\n");
        assert_eq!(run_ok("println(\"b\" > \"a\")"), "true\n");
    }

    #[test]
    fn cross_type_comparison_is_false() {
        assert_eq!(run_ok("println(1 == \"1\")"), "false\n");
        assert_eq!(run_ok("println(1 < \"2\")"), "false\n");
    }

    #[test]
    fn string_concatenation() {
        assert_eq!(run_ok("println(\"foo\" + \"bar\")"), "foobar\n");
    }

    #[test]
    fn locals_shadow_globals_table() {
        // A local binding named like a native wins on lookup.
        assert_eq!(run_ok("var len = 5 println(len + 1)"), "6\n");
    }

    #[test]
    fn comments_evaluate_to_nothing() {
        assert_eq!(run_ok("// a note\nprintln(1)"), "1\n");
    }

    #[test]
    fn return_outside_function_is_a_runtime_error() {
        assert_eq!(run_err("return 1").message, "return outside function");
    }

    #[test]
    fn nil_equality() {
        assert_eq!(run_ok("println(nil == nil)"), "true\n");
        assert_eq!(run_ok("println(nil == 0)"), "false\n");
        assert_eq!(run_ok("println(nil != 1)"), "true\n");
    }

    #[test]
    fn maps_take_primitive_keys() {
        assert_eq!(run_ok("var m = {1: \"one\", true: \"yes\"} println(m[1])"), "one\n");
        assert_eq!(run_ok("var m = {nil: \"n\"} println(m[nil])"), "n\n");
        let err = run_err("var m = {[1]: 2}");
        assert_eq!(err.message, "key type 'list' is not hashable");
    }

    #[test]
    fn unhashable_index_into_map_fails() {
        let err = run_err("var m = {\"k\": 1} println(m[[1]])");
        assert_eq!(err.innermost().message, "key must be hashable, was list");
    }

    #[test]
    fn negating_a_non_number_fails() {
        let err = run_err("var x = -\"s\"");
        assert_eq!(err.innermost().message, "cannot negate type string");
    }

    #[test]
    fn not_works_on_any_value_via_truthiness() {
        assert_eq!(run_ok("println(!0) println(!\"x\") println(!nil)"), "true\nfalse\ntrue\n");
    }

    #[test]
    fn anonymous_functions_as_values() {
        let source = r#"
            var twice = fun(f, x) { return f(f(x)) }
            var inc = fun(n) { return n + 1 }
            println(twice(inc, 5))
        "#;
        assert_eq!(run_ok(source), "7\n");
    }
}
