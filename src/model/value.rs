//! Runtime values flowing through scripts and stored on scope nodes.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures::FutureExt;
use futures::future::LocalBoxFuture;

use super::{Fields, NodeRef, Origin};
use crate::error::Result;
use crate::processor::ast::Lambda;

#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<Value>),
    Object(Fields),
    /// Handle to a live scope node; mutations go straight to the tree.
    Node(NodeRef),
    Closure(Rc<Closure>),
    Builtin(Builtin),
    /// A verb looked up by name in the registry at call time.
    Verb(String),
    Deferred(Deferred),
    /// The tree handle (`S` / `__S`).
    Tree,
    /// The vars accessor (`G`), always reading the current mapping.
    Vars,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) | Value::Float(_) => "number",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Node(_) => "node",
            Value::Closure(_) | Value::Builtin(_) | Value::Verb(_) => "function",
            Value::Deferred(_) => "deferred",
            Value::Tree => "tree",
            Value::Vars => "vars",
        }
    }

    /// `null`, `false`, `0` and `""` are falsy; everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0 && !f.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Closure(_) | Value::Builtin(_) | Value::Verb(_))
    }

    /// String form used by concatenation and name coercion.
    pub fn to_display(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => s.clone(),
            Value::Array(items) => items
                .iter()
                .map(Value::to_display)
                .collect::<Vec<_>>()
                .join(","),
            other => format!("[{}]", other.type_name()),
        }
    }

    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Structural equality for data, identity for handles and functions.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (Value::Object(a), Value::Object(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| {
                        super::get_field(b, k).is_some_and(|other| v.loose_eq(other))
                    })
            }
            (Value::Node(a), Value::Node(b)) => Rc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Verb(a), Value::Verb(b)) => a == b,
            (Value::Tree, Value::Tree) | (Value::Vars, Value::Vars) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Array(items) => f.debug_list().entries(items).finish(),
            Value::Object(fields) => f
                .debug_map()
                .entries(fields.iter().map(|(k, v)| (k, v)))
                .finish(),
            Value::Node(node) => write!(f, "<node {}>", node.borrow().tag),
            Value::Closure(c) => write!(f, "<closure from {}>", c.origin.path.display()),
            Value::Builtin(b) => write!(f, "<builtin {}>", b.name()),
            Value::Verb(name) => write!(f, "<verb {name}>"),
            Value::Deferred(d) => write!(f, "<deferred {}>", d.label()),
            Value::Tree => write!(f, "<tree>"),
            Value::Vars => write!(f, "<vars>"),
        }
    }
}

/// Functions the binder can place in a script's root environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Global,
    TargetTemplate,
    Project,
    Include,
    ToLocal,
    FromBase,
    ToAbsolute,
    Glob,
    Defer,
}

impl Builtin {
    /// The name scripts see.
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Global => "global",
            Builtin::TargetTemplate => "target_template",
            Builtin::Project => "project",
            Builtin::Include => "$gen",
            Builtin::ToLocal => "base2local",
            Builtin::FromBase => "frombase",
            Builtin::ToAbsolute => "absolute",
            Builtin::Glob => "glob",
            Builtin::Defer => "defer",
        }
    }
}

/// A script lambda bound to the environment and script it was created in.
pub struct Closure {
    pub lambda: Rc<Lambda>,
    pub env: Env,
    pub origin: Rc<Origin>,
}

pub type DeferredFuture = LocalBoxFuture<'static, Result<Value>>;

/// A value only known at materialization time.
#[derive(Clone)]
pub struct Deferred {
    label: Rc<str>,
    thunk: Rc<dyn Fn() -> DeferredFuture>,
}

impl Deferred {
    pub fn new<F, Fut>(label: impl AsRef<str>, f: F) -> Self
    where
        F: Fn() -> Fut + 'static,
        Fut: Future<Output = Result<Value>> + 'static,
    {
        Self {
            label: Rc::from(label.as_ref()),
            thunk: Rc::new(move || f().boxed_local()),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn resolve(&self) -> DeferredFuture {
        (self.thunk)()
    }
}

/// Lexical environment: a chain of frames, innermost first.
#[derive(Clone, Default)]
pub struct Env(Rc<RefCell<Frame>>);

#[derive(Default)]
struct Frame {
    vars: HashMap<String, Value>,
    parent: Option<Env>,
}

impl Env {
    pub fn root(bindings: impl IntoIterator<Item = (String, Value)>) -> Self {
        Env(Rc::new(RefCell::new(Frame {
            vars: bindings.into_iter().collect(),
            parent: None,
        })))
    }

    pub fn child(&self) -> Self {
        Env(Rc::new(RefCell::new(Frame {
            vars: HashMap::new(),
            parent: Some(self.clone()),
        })))
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        let frame = self.0.borrow();
        match frame.vars.get(name) {
            Some(v) => Some(v.clone()),
            None => frame.parent.as_ref().and_then(|p| p.get(name)),
        }
    }

    pub fn define(&self, name: &str, value: Value) {
        self.0.borrow_mut().vars.insert(name.to_string(), value);
    }

    /// Rebinds an existing name in the frame that declared it.
    pub fn assign(&self, name: &str, value: Value) -> bool {
        let mut frame = self.0.borrow_mut();
        if let Some(slot) = frame.vars.get_mut(name) {
            *slot = value;
            return true;
        }
        match frame.parent.clone() {
            Some(parent) => {
                drop(frame);
                parent.assign(name, value)
            }
            None => false,
        }
    }
}
