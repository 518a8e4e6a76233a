//! Tree-walking interpreter.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::ast::{BinOp, Expr, FnDef, Stmt, StmtKind, UnaryOp};
use super::value::Value;
use crate::{CancelToken, EvalFault, OutputCapture};

/// Deepest user-function call chain before a runtime error.
pub const MAX_CALL_DEPTH: usize = 64;

/// Deepest combined nesting of blocks and expressions while running, across
/// all active calls.
pub const MAX_EVAL_DEPTH: usize = 256;

/// Granularity at which `sleep` re-checks the cancel token.
const SLEEP_SLICE: Duration = Duration::from_millis(10);

type Scope = HashMap<String, Value>;

/// Control flow out of a statement.
enum Flow {
    Normal(Value),
    Return(Value),
}

/// State for one evaluation call. Globals outlive it; locals do not.
pub(crate) struct Run<'a> {
    globals: &'a mut Scope,
    frames: Vec<Scope>,
    depth: usize,
    out: &'a mut OutputCapture,
    cancel: &'a CancelToken,
}

impl<'a> Run<'a> {
    pub(crate) fn new(globals: &'a mut Scope, out: &'a mut OutputCapture, cancel: &'a CancelToken) -> Self {
        Self {
            globals,
            frames: Vec::new(),
            depth: 0,
            out,
            cancel,
        }
    }

    /// Execute a top-level snippet and return the value of its last statement.
    pub(crate) fn program(&mut self, stmts: &[Stmt]) -> Result<Value, EvalFault> {
        match self.block(stmts)? {
            Flow::Normal(v) | Flow::Return(v) => Ok(v),
        }
    }

    fn checkpoint(&self) -> Result<(), EvalFault> {
        if self.cancel.is_cancelled() {
            return Err(EvalFault::Interrupted);
        }
        Ok(())
    }

    fn descend(&mut self) -> Result<(), EvalFault> {
        if self.depth >= MAX_EVAL_DEPTH {
            return Err(EvalFault::runtime("maximum nesting depth exceeded"));
        }
        self.depth += 1;
        Ok(())
    }

    fn block(&mut self, stmts: &[Stmt]) -> Result<Flow, EvalFault> {
        self.descend()?;
        let result = self.statements(stmts);
        self.depth -= 1;
        result
    }

    fn statements(&mut self, stmts: &[Stmt]) -> Result<Flow, EvalFault> {
        let mut last = Value::Nil;
        for stmt in stmts {
            self.checkpoint()?;
            match self.statement(stmt).map_err(|e| at_line(e, stmt.line))? {
                Flow::Normal(v) => last = v,
                ret @ Flow::Return(_) => return Ok(ret),
            }
        }
        Ok(Flow::Normal(last))
    }

    fn statement(&mut self, stmt: &Stmt) -> Result<Flow, EvalFault> {
        match &stmt.kind {
            StmtKind::Let(name, expr) => {
                let value = self.eval(expr)?;
                self.define(name, value);
            }
            StmtKind::Assign(name, expr) => {
                let value = self.eval(expr)?;
                self.assign(name, value)?;
            }
            StmtKind::Fn(def) => {
                self.define(&def.name, Value::Func(def.clone()));
            }
            StmtKind::If { cond, then, otherwise } => {
                if self.eval(cond)?.truthy() {
                    return self.block(then);
                }
                if let Some(otherwise) = otherwise {
                    return self.block(otherwise);
                }
            }
            StmtKind::While { cond, body } => {
                while self.eval(cond)?.truthy() {
                    self.checkpoint()?;
                    if let ret @ Flow::Return(_) = self.block(body)? {
                        return Ok(ret);
                    }
                }
            }
            StmtKind::Return(expr) => {
                let value = match expr {
                    Some(e) => self.eval(e)?,
                    None => Value::Nil,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Expr(expr) => return Ok(Flow::Normal(self.eval(expr)?)),
        }
        Ok(Flow::Normal(Value::Nil))
    }

    fn define(&mut self, name: &str, value: Value) {
        let scope = match self.frames.last_mut() {
            Some(frame) => frame,
            None => &mut *self.globals,
        };
        scope.insert(name.to_owned(), value);
    }

    fn assign(&mut self, name: &str, value: Value) -> Result<(), EvalFault> {
        if let Some(slot) = self.frames.last_mut().and_then(|f| f.get_mut(name)) {
            *slot = value;
            return Ok(());
        }
        match self.globals.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(EvalFault::runtime(format!("assignment to undefined variable `{name}`"))),
        }
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.frames
            .last()
            .and_then(|f| f.get(name))
            .or_else(|| self.globals.get(name))
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, EvalFault> {
        self.descend()?;
        let result = self.eval_expr(expr);
        self.depth -= 1;
        result
    }

    fn eval_expr(&mut self, expr: &Expr) -> Result<Value, EvalFault> {
        match expr {
            Expr::Int(n) => Ok(Value::Int(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Nil => Ok(Value::Nil),
            Expr::Var(name) => self
                .lookup(name)
                .cloned()
                .ok_or_else(|| EvalFault::runtime(format!("undefined variable `{name}`"))),
            Expr::Unary(op, inner) => {
                let value = self.eval(inner)?;
                unary(*op, value)
            }
            Expr::Binary(BinOp::And, lhs, rhs) => {
                let l = self.eval(lhs)?;
                if !l.truthy() {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(self.eval(rhs)?.truthy()))
            }
            Expr::Binary(BinOp::Or, lhs, rhs) => {
                let l = self.eval(lhs)?;
                if l.truthy() {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(self.eval(rhs)?.truthy()))
            }
            Expr::Binary(op, lhs, rhs) => {
                let l = self.eval(lhs)?;
                let r = self.eval(rhs)?;
                binary(*op, l, r)
            }
            Expr::Call(name, args) => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                self.call(name, values)
            }
        }
    }

    fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value, EvalFault> {
        self.checkpoint()?;
        match self.lookup(name) {
            Some(Value::Func(def)) => {
                let def = def.clone();
                self.call_user(&def, args)
            }
            Some(other) => Err(EvalFault::runtime(format!(
                "`{name}` is a {}, not a function",
                other.type_name()
            ))),
            None => self.call_builtin(name, args),
        }
    }

    fn call_user(&mut self, def: &Arc<FnDef>, args: Vec<Value>) -> Result<Value, EvalFault> {
        if args.len() != def.params.len() {
            return Err(arity(&def.name, def.params.len(), args.len()));
        }
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(EvalFault::runtime("maximum call depth exceeded"));
        }
        let frame: Scope = def.params.iter().cloned().zip(args).collect();
        self.frames.push(frame);
        let result = self.block(&def.body);
        self.frames.pop();
        match result? {
            Flow::Normal(v) | Flow::Return(v) => Ok(v),
        }
    }

    fn call_builtin(&mut self, name: &str, args: Vec<Value>) -> Result<Value, EvalFault> {
        match name {
            "print" => {
                let mut first = true;
                for arg in &args {
                    if !first {
                        self.out.push_str(" ");
                    }
                    first = false;
                    let _ = write!(self.out, "{arg}");
                }
                self.out.push_str("\n");
                Ok(Value::Nil)
            }
            "len" => match one_arg(name, args)? {
                Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                other => Err(type_error("len", &other)),
            },
            "str" => Ok(Value::Str(one_arg(name, args)?.to_string())),
            "sleep" => match one_arg(name, args)? {
                Value::Int(ms) if ms >= 0 => {
                    self.sleep(Duration::from_millis(ms as u64))?;
                    Ok(Value::Nil)
                }
                other => Err(type_error("sleep", &other)),
            },
            _ => Err(EvalFault::runtime(format!("undefined function `{name}`"))),
        }
    }

    fn sleep(&self, total: Duration) -> Result<(), EvalFault> {
        let deadline = Instant::now() + total;
        loop {
            self.checkpoint()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

fn unary(op: UnaryOp, value: Value) -> Result<Value, EvalFault> {
    match (op, value) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.truthy())),
        (UnaryOp::Neg, Value::Int(n)) => n.checked_neg().map(Value::Int).ok_or_else(overflow),
        (UnaryOp::Neg, other) => Err(EvalFault::runtime(format!(
            "cannot negate a {}",
            other.type_name()
        ))),
    }
}

fn binary(op: BinOp, l: Value, r: Value) -> Result<Value, EvalFault> {
    use Value::{Int, Str};
    match (op, l, r) {
        (BinOp::Eq, l, r) => Ok(Value::Bool(l == r)),
        (BinOp::Ne, l, r) => Ok(Value::Bool(l != r)),
        (BinOp::Add, Int(a), Int(b)) => a.checked_add(b).map(Int).ok_or_else(overflow),
        (BinOp::Add, l @ Str(_), r) | (BinOp::Add, l, r @ Str(_)) => Ok(Str(format!("{l}{r}"))),
        (BinOp::Sub, Int(a), Int(b)) => a.checked_sub(b).map(Int).ok_or_else(overflow),
        (BinOp::Mul, Int(a), Int(b)) => a.checked_mul(b).map(Int).ok_or_else(overflow),
        (BinOp::Div | BinOp::Rem, Int(_), Int(0)) => Err(EvalFault::runtime("division by zero")),
        (BinOp::Div, Int(a), Int(b)) => a.checked_div(b).map(Int).ok_or_else(overflow),
        (BinOp::Rem, Int(a), Int(b)) => a.checked_rem(b).map(Int).ok_or_else(overflow),
        (BinOp::Lt, Int(a), Int(b)) => Ok(Value::Bool(a < b)),
        (BinOp::Le, Int(a), Int(b)) => Ok(Value::Bool(a <= b)),
        (BinOp::Gt, Int(a), Int(b)) => Ok(Value::Bool(a > b)),
        (BinOp::Ge, Int(a), Int(b)) => Ok(Value::Bool(a >= b)),
        (BinOp::Lt, Str(a), Str(b)) => Ok(Value::Bool(a < b)),
        (BinOp::Le, Str(a), Str(b)) => Ok(Value::Bool(a <= b)),
        (BinOp::Gt, Str(a), Str(b)) => Ok(Value::Bool(a > b)),
        (BinOp::Ge, Str(a), Str(b)) => Ok(Value::Bool(a >= b)),
        (op, l, r) => Err(EvalFault::runtime(format!(
            "unsupported operand types for {op:?}: {} and {}",
            l.type_name(),
            r.type_name()
        ))),
    }
}

fn one_arg(name: &str, args: Vec<Value>) -> Result<Value, EvalFault> {
    let got = args.len();
    let mut iter = args.into_iter();
    match (iter.next(), iter.next()) {
        (Some(v), None) => Ok(v),
        _ => Err(arity(name, 1, got)),
    }
}

fn arity(name: &str, expected: usize, got: usize) -> EvalFault {
    let plural = if expected == 1 { "" } else { "s" };
    EvalFault::runtime(format!("`{name}` expects {expected} argument{plural}, got {got}"))
}

fn type_error(name: &str, value: &Value) -> EvalFault {
    EvalFault::runtime(format!("`{name}` does not accept a {}", value.type_name()))
}

fn overflow() -> EvalFault {
    EvalFault::runtime("integer overflow")
}

/// Prefix a runtime error with the line of the statement that raised it.
/// Nested statements tag first, so the innermost line wins.
fn at_line(fault: EvalFault, line: usize) -> EvalFault {
    match fault {
        EvalFault::Runtime(msg) if !msg.starts_with("line ") => {
            EvalFault::Runtime(format!("line {line}: {msg}"))
        }
        other => other,
    }
}
