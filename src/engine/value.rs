// src/engine/value.rs

//! Values, variables and expressions seen by tasks.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::engine::ActionError;

/// A dynamically typed value: process arguments, variables, RETURN values.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Interpret a literal from a config file: integers, floats and booleans
    /// are recognised, anything else stays text.
    pub fn parse_literal(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            return Value::Int(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            return Value::Float(f);
        }
        match trimmed {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::Text(raw.to_string()),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// One row produced by a FOR loop's source.
pub type Row = Vec<Value>;

/// Variables of one process execution. Cloning shares the same storage.
#[derive(Debug, Clone, Default)]
pub struct Variables {
    inner: Arc<Mutex<HashMap<String, Value>>>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.lock().get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.lock().insert(name.into(), value.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.lock().clone()
    }
}

impl FromIterator<(String, Value)> for Variables {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            inner: Arc::new(Mutex::new(iter.into_iter().collect())),
        }
    }
}

/// What an expression can see while it is evaluated.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub vars: &'a Variables,
    pub args: &'a [Value],
}

impl EvalContext<'_> {
    pub fn var(&self, name: &str) -> Option<Value> {
        self.vars.get(name)
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }
}

type ExprFn<T> = dyn Fn(&EvalContext<'_>) -> Result<T, ActionError> + Send + Sync;

/// A guard, loop condition or value computed from variables and arguments.
pub struct Expr<T> {
    eval: Arc<ExprFn<T>>,
}

impl<T> Expr<T> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&EvalContext<'_>) -> Result<T, ActionError> + Send + Sync + 'static,
    {
        Self { eval: Arc::new(f) }
    }

    pub fn eval(&self, ctx: &EvalContext<'_>) -> Result<T, ActionError> {
        (self.eval)(ctx)
    }
}

impl<T: Clone + Send + Sync + 'static> Expr<T> {
    pub fn constant(value: T) -> Self {
        Self::new(move |_| Ok(value.clone()))
    }
}

impl Expr<Value> {
    /// The current value of a variable, `Null` if unset.
    pub fn var(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(move |ctx| Ok(ctx.var(&name).unwrap_or_default()))
    }

    /// Positional process argument, `Null` if absent.
    pub fn arg(index: usize) -> Self {
        Self::new(move |ctx| Ok(ctx.arg(index).cloned().unwrap_or_default()))
    }

    pub fn text(s: impl Into<String>) -> Self {
        Self::constant(Value::Text(s.into()))
    }
}

impl<T> Clone for Expr<T> {
    fn clone(&self) -> Self {
        Self {
            eval: Arc::clone(&self.eval),
        }
    }
}

impl<T> fmt::Debug for Expr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Expr(..)")
    }
}

pub type BoolExpr = Expr<bool>;
pub type ValueExpr = Expr<Value>;
