//! Runs build scripts against the shared scope tree.
//!
//! Each script gets a fresh root environment holding only its bindings;
//! nothing else is reachable from script code. The script (origin) that
//! is executing is tracked explicitly: running a script pushes its
//! origin and calling a closure pushes the origin the closure was
//! created in, so path helpers always anchor to the defining script.

use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};

use super::ast::{BinOp, Expr, LambdaBody, Program, Stmt, StmtKind, UnaryOp};
use super::paths;
use super::scope::Scope;
use crate::error::{Error, Result};
use crate::model::{Builtin, Closure, Env, NodeRef, Origin, Value, get_field, set_field};

/// Closure calls allowed to be in progress at once.
const MAX_CALL_DEPTH: usize = 64;

/// Which set of names a script is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptRole {
    /// The configuration script a run starts from: orchestrates inclusion.
    Root,
    /// Any script reached through `$gen`: declares projects.
    Included,
}

#[derive(Clone)]
pub(crate) struct WeakInterpreter(Weak<Runtime>);

impl WeakInterpreter {
    pub(crate) fn upgrade(&self) -> Option<Interpreter> {
        self.0.upgrade().map(|rt| Interpreter { rt })
    }
}

/// Cheap handle to one generation run's interpreter state.
#[derive(Clone)]
pub struct Interpreter {
    rt: Rc<Runtime>,
}

struct Runtime {
    cwd: PathBuf,
    scope: RefCell<Scope>,
    /// Origins of the code currently executing, innermost last.
    origins: RefCell<Vec<Rc<Origin>>>,
    /// Script files currently being run, for cycle detection.
    running: RefCell<Vec<PathBuf>>,
    /// Line of the statement being executed.
    line: Cell<usize>,
    /// Closure calls in progress.
    depth: Cell<usize>,
}

impl Interpreter {
    /// Starts a run rooted at `cwd` with `vars` as the initial vars mapping.
    pub fn new(cwd: &Path, vars: Value) -> Self {
        let mut scope = Scope::new(vars);
        super::builders::register_core_verbs(&mut scope);
        Self {
            rt: Rc::new(Runtime {
                cwd: PathBuf::from(paths::normalize(&paths::path_str(cwd))),
                scope: RefCell::new(scope),
                origins: RefCell::new(Vec::new()),
                running: RefCell::new(Vec::new()),
                line: Cell::new(0),
                depth: Cell::new(0),
            }),
        }
    }

    pub fn cwd(&self) -> &Path {
        &self.rt.cwd
    }

    pub fn root(&self) -> NodeRef {
        self.rt.scope.borrow().root()
    }

    pub fn vars(&self) -> Value {
        self.rt.scope.borrow().vars().clone()
    }

    /// Reads and runs the script at `path` (relative to the working
    /// directory unless absolute).
    pub fn run_file(&self, path: &Path, role: ScriptRole) -> Result<()> {
        let path = self.absolute(path);
        tracing::info!(path = %path.display(), ?role, "running script");
        let program = crate::parser::load_script(&path)?;
        self.run_program(&program, &path, role)
    }

    /// Runs in-memory `source` as if it had been read from `path`.
    pub fn run_script(&self, source: &str, path: &Path, role: ScriptRole) -> Result<()> {
        let path = self.absolute(path);
        let program = crate::parser::parse_source(source, &path)?;
        self.run_program(&program, &path, role)
    }

    fn run_program(&self, program: &Program, path: &Path, role: ScriptRole) -> Result<()> {
        let origin = Rc::new(Origin::new(path.to_path_buf()));
        if self.rt.running.borrow().contains(&origin.path) {
            return self.fail(format!(
                "circular inclusion of {}",
                origin.path.display()
            ));
        }

        let env = Env::root(self.bindings(role, &origin));
        let saved_line = self.rt.line.get();
        self.rt.running.borrow_mut().push(origin.path.clone());
        self.rt.origins.borrow_mut().push(origin);

        let result = self.exec_block(&program.body, &env);

        self.rt.origins.borrow_mut().pop();
        self.rt.running.borrow_mut().pop();
        if result.is_ok() {
            self.rt.line.set(saved_line);
        }
        result
    }

    fn bindings(&self, role: ScriptRole, origin: &Origin) -> Vec<(String, Value)> {
        let mut bindings = match role {
            ScriptRole::Root => vec![
                ("__S".to_string(), Value::Tree),
                ("G".to_string(), Value::Vars),
                builtin(Builtin::Global),
                builtin(Builtin::TargetTemplate),
                builtin(Builtin::Include),
            ],
            ScriptRole::Included => vec![
                ("S".to_string(), Value::Tree),
                ("G".to_string(), Value::Vars),
                builtin(Builtin::TargetTemplate),
                builtin(Builtin::Global),
                builtin(Builtin::Project),
                ("__curr".to_string(), Value::Str(origin.stem())),
            ],
        };
        bindings.extend(
            [
                Builtin::ToLocal,
                Builtin::FromBase,
                Builtin::ToAbsolute,
                Builtin::Glob,
                Builtin::Defer,
            ]
            .map(builtin),
        );
        bindings
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        PathBuf::from(paths::resolve(&self.rt.cwd, &paths::path_str(path)))
    }

    /// The origin of the code running right now.
    ///
    /// Outside any script (a deferred builtin resolved during
    /// materialization) this is a synthetic origin in the working directory.
    pub(crate) fn origin(&self) -> Rc<Origin> {
        self.rt
            .origins
            .borrow()
            .last()
            .cloned()
            .unwrap_or_else(|| Rc::new(Origin::new(self.rt.cwd.join("<host>"))))
    }

    pub(crate) fn line(&self) -> usize {
        self.rt.line.get()
    }

    pub(crate) fn fail<T>(&self, message: impl Into<String>) -> Result<T> {
        Err(Error::Eval {
            path: self.origin().path.clone(),
            line: self.rt.line.get(),
            message: message.into(),
        })
    }

    pub(crate) fn scope_mut(&self) -> std::cell::RefMut<'_, Scope> {
        self.rt.scope.borrow_mut()
    }

    /// A handle that does not keep the run alive; deferred values stored
    /// in the tree hold one of these.
    pub(crate) fn downgrade(&self) -> WeakInterpreter {
        WeakInterpreter(Rc::downgrade(&self.rt))
    }

    /// Creates a child of the current node, runs `define` with it as the
    /// current node, then appends it to its parent.
    pub(crate) fn with_child(
        &self,
        tag: &str,
        define: impl FnOnce(&NodeRef) -> Result<()>,
    ) -> Result<NodeRef> {
        let node = self.rt.scope.borrow_mut().open_child(tag);
        self.define_open(node, define)
    }

    /// `with_child` for nodes that always hang off the root.
    pub(crate) fn with_root_child(
        &self,
        tag: &str,
        define: impl FnOnce(&NodeRef) -> Result<()>,
    ) -> Result<NodeRef> {
        let node = self.rt.scope.borrow_mut().open_root_child(tag);
        self.define_open(node, define)
    }

    fn define_open(
        &self,
        node: NodeRef,
        define: impl FnOnce(&NodeRef) -> Result<()>,
    ) -> Result<NodeRef> {
        let result = define(&node);
        self.rt.scope.borrow_mut().close_child(result.is_ok());
        result.map(|()| node)
    }

    fn exec_block(&self, stmts: &[Stmt], env: &Env) -> Result<()> {
        for stmt in stmts {
            self.rt.line.set(stmt.line);
            self.exec(stmt, env)?;
        }
        Ok(())
    }

    fn exec(&self, stmt: &Stmt, env: &Env) -> Result<()> {
        match &stmt.kind {
            StmtKind::Let(name, expr) => {
                let value = self.eval(expr, env)?;
                env.define(name, value);
            }
            StmtKind::Assign(place, expr) => {
                let value = self.eval(expr, env)?;
                self.assign(place, value, env)?;
            }
            StmtKind::Expr(expr) => {
                self.eval(expr, env)?;
            }
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.eval(condition, env)?.is_truthy() {
                    self.exec_block(then_branch, &env.child())?;
                } else if let Some(else_branch) = else_branch {
                    self.exec_block(else_branch, &env.child())?;
                }
            }
            StmtKind::For {
                var,
                iterable,
                body,
            } => {
                let items = match self.eval(iterable, env)? {
                    Value::Array(items) => items,
                    Value::Object(fields) => fields.into_iter().map(|(k, _)| Value::Str(k)).collect(),
                    Value::Vars => match self.vars() {
                        Value::Object(fields) => {
                            fields.into_iter().map(|(k, _)| Value::Str(k)).collect()
                        }
                        _ => Vec::new(),
                    },
                    Value::Null => Vec::new(),
                    other => return self.fail(format!("cannot iterate over a {}", other.type_name())),
                };
                for item in items {
                    let scope = env.child();
                    scope.define(var, item);
                    self.exec_block(body, &scope)?;
                }
            }
        }
        Ok(())
    }

    fn eval(&self, expr: &Expr, env: &Env) -> Result<Value> {
        let value = match expr {
            Expr::Null => Value::Null,
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Int(n) => Value::Int(*n),
            Expr::Float(f) => Value::Float(*f),
            Expr::Str(s) => Value::Str(s.clone()),
            Expr::Ident(name) => self.lookup(name, env)?,
            Expr::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.eval(item, env))
                    .collect::<Result<_>>()?,
            ),
            Expr::Object(fields) => {
                let mut object = Vec::with_capacity(fields.len());
                for (key, value) in fields {
                    set_field(&mut object, key, self.eval(value, env)?);
                }
                Value::Object(object)
            }
            Expr::Member(object, name) => {
                let object = self.eval(object, env)?;
                self.get_member(object, name)?
            }
            Expr::Index(object, index) => {
                let object = self.eval(object, env)?;
                let index = self.eval(index, env)?;
                self.get_index(object, index)?
            }
            Expr::Call(callee, args) => {
                if let Expr::Member(receiver, name) = callee.as_ref() {
                    let receiver = self.eval(receiver, env)?;
                    let args = self.eval_args(args, env)?;
                    return self.call_method(receiver, name, args);
                }
                let callee = self.eval(callee, env)?;
                let args = self.eval_args(args, env)?;
                self.call(&callee, args)?
            }
            Expr::Unary(op, operand) => {
                let operand = self.eval(operand, env)?;
                match (op, operand) {
                    (UnaryOp::Not, v) => Value::Bool(!v.is_truthy()),
                    (UnaryOp::Neg, Value::Int(n)) => {
                        n.checked_neg().map_or(Value::Float(-(n as f64)), Value::Int)
                    }
                    (UnaryOp::Neg, Value::Float(f)) => Value::Float(-f),
                    (UnaryOp::Neg, v) => {
                        return self.fail(format!("cannot negate a {}", v.type_name()));
                    }
                }
            }
            Expr::Binary(op, lhs, rhs) => self.eval_binary(*op, lhs, rhs, env)?,
            Expr::Lambda(lambda) => Value::Closure(Rc::new(Closure {
                lambda: lambda.clone(),
                env: env.clone(),
                origin: self.origin(),
            })),
        };
        Ok(value)
    }

    fn eval_args(&self, args: &[Expr], env: &Env) -> Result<Vec<Value>> {
        args.iter().map(|arg| self.eval(arg, env)).collect()
    }

    /// Lexical bindings first, then the live template registry.
    fn lookup(&self, name: &str, env: &Env) -> Result<Value> {
        if let Some(value) = env.get(name) {
            return Ok(value);
        }
        let is_template = self
            .rt
            .scope
            .borrow()
            .verb(name)
            .is_some_and(|verb| verb.is_template());
        if is_template {
            return Ok(Value::Verb(name.to_string()));
        }
        self.fail(format!("`{name}` is not defined"))
    }

    fn eval_binary(&self, op: BinOp, lhs: &Expr, rhs: &Expr, env: &Env) -> Result<Value> {
        let lhs = self.eval(lhs, env)?;
        match op {
            BinOp::And if !lhs.is_truthy() => return Ok(lhs),
            BinOp::Or if lhs.is_truthy() => return Ok(lhs),
            BinOp::And | BinOp::Or => return self.eval(rhs, env),
            _ => {}
        }
        let rhs = self.eval(rhs, env)?;
        let value = match (op, lhs, rhs) {
            (BinOp::Eq, l, r) => Value::Bool(l.loose_eq(&r)),
            (BinOp::NotEq, l, r) => Value::Bool(!l.loose_eq(&r)),
            (BinOp::Add, Value::Int(a), Value::Int(b)) => {
                a.checked_add(b).map_or(Value::Float(a as f64 + b as f64), Value::Int)
            }
            (BinOp::Sub, Value::Int(a), Value::Int(b)) => {
                a.checked_sub(b).map_or(Value::Float(a as f64 - b as f64), Value::Int)
            }
            (BinOp::Add, Value::Array(mut a), Value::Array(b)) => {
                a.extend(b);
                Value::Array(a)
            }
            (BinOp::Add, Value::Str(a), r) => Value::Str(a + &r.to_display()),
            (BinOp::Add, l, Value::Str(b)) => Value::Str(l.to_display() + &b),
            (op @ (BinOp::Add | BinOp::Sub), l, r) => match (as_float(&l), as_float(&r)) {
                (Some(a), Some(b)) if op == BinOp::Add => Value::Float(a + b),
                (Some(a), Some(b)) => Value::Float(a - b),
                _ => {
                    return self.fail(format!(
                        "unsupported operands {} and {} for {op:?}",
                        l.type_name(),
                        r.type_name()
                    ));
                }
            },
            (BinOp::And | BinOp::Or, ..) => unreachable!("short-circuited above"),
        };
        Ok(value)
    }

    fn get_member(&self, object: Value, name: &str) -> Result<Value> {
        let value = match object {
            Value::Node(node) => node.borrow().get(name).cloned().unwrap_or(Value::Null),
            Value::Object(fields) => get_field(&fields, name).cloned().unwrap_or(Value::Null),
            Value::Vars => match self.rt.scope.borrow().vars() {
                Value::Object(fields) => get_field(fields, name).cloned().unwrap_or(Value::Null),
                _ => Value::Null,
            },
            Value::Tree if name == "vars" => self.vars(),
            Value::Tree => {
                if self.rt.scope.borrow().verb(name).is_none() {
                    return self.fail(format!("no verb named `{name}`"));
                }
                Value::Verb(name.to_string())
            }
            Value::Array(items) if name == "length" => Value::Int(items.len() as i64),
            Value::Str(s) if name == "length" => Value::Int(s.chars().count() as i64),
            other => {
                return self.fail(format!(
                    "cannot read `{name}` of a {}",
                    other.type_name()
                ));
            }
        };
        Ok(value)
    }

    fn get_index(&self, object: Value, index: Value) -> Result<Value> {
        match (object, index) {
            (Value::Array(items), Value::Int(i)) => Ok(usize::try_from(i)
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(Value::Null)),
            (object, Value::Str(key)) => self.get_member(object, &key),
            (object, index) => self.fail(format!(
                "cannot index a {} with a {}",
                object.type_name(),
                index.type_name()
            )),
        }
    }

    /// `receiver.name(args)`.
    ///
    /// On a node, a one-argument call of a non-function property is a
    /// setter returning the node, so definitions can be chained.
    fn call_method(&self, receiver: Value, name: &str, args: Vec<Value>) -> Result<Value> {
        if let Value::Node(node) = &receiver {
            let existing = node.borrow().get(name).cloned();
            match existing {
                Some(f) if f.is_callable() => return self.call(&f, args),
                _ if args.len() == 1 => {
                    let value = args.into_iter().next().unwrap_or(Value::Null);
                    node.borrow_mut().set(name, value);
                    return Ok(receiver);
                }
                _ => return self.fail(format!("`{name}` is not a function")),
            }
        }
        let method = self.get_member(receiver, name)?;
        self.call(&method, args)
    }

    pub(crate) fn call(&self, callee: &Value, args: Vec<Value>) -> Result<Value> {
        match callee {
            Value::Closure(closure) => self.call_closure(closure, args),
            Value::Builtin(builtin) => self.call_builtin(*builtin, args),
            Value::Verb(name) => self.call_verb(name, args),
            other => self.fail(format!("a {} value is not callable", other.type_name())),
        }
    }

    pub(crate) fn call_verb(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        let verb = self.rt.scope.borrow().verb(name);
        match verb {
            Some(verb) => self.invoke_verb(name, verb, args),
            None => self.fail(format!("no verb named `{name}`")),
        }
    }

    fn call_closure(&self, closure: &Closure, args: Vec<Value>) -> Result<Value> {
        let depth = self.rt.depth.get();
        if depth >= MAX_CALL_DEPTH {
            return self.fail(format!("calls nested deeper than {MAX_CALL_DEPTH} levels"));
        }
        let env = closure.env.child();
        let mut args = args.into_iter();
        for param in &closure.lambda.params {
            env.define(param, args.next().unwrap_or(Value::Null));
        }

        let saved_line = self.rt.line.get();
        self.rt.depth.set(depth + 1);
        self.rt.origins.borrow_mut().push(closure.origin.clone());
        let result = match &closure.lambda.body {
            LambdaBody::Block(stmts) => self.exec_block(stmts, &env).map(|()| Value::Null),
            LambdaBody::Expr(expr) => self.eval(expr, &env),
        };
        self.rt.origins.borrow_mut().pop();
        self.rt.depth.set(depth);
        if result.is_ok() {
            self.rt.line.set(saved_line);
        }
        result
    }

    fn assign(&self, place: &Expr, value: Value, env: &Env) -> Result<()> {
        match place {
            Expr::Ident(name) => {
                if !env.assign(name, value) {
                    return self.fail(format!("assignment to undeclared `{name}`, use let"));
                }
                Ok(())
            }
            Expr::Member(object, name) => {
                let container = self.eval(object, env)?;
                self.store(object, container, Value::Str(name.clone()), value, env)
            }
            Expr::Index(object, index) => {
                let container = self.eval(object, env)?;
                let key = self.eval(index, env)?;
                self.store(object, container, key, value, env)
            }
            _ => self.fail("invalid assignment target"),
        }
    }

    /// Writes `container[key] = value`, then writes a plain container
    /// back to where it came from.
    fn store(&self, place: &Expr, container: Value, key: Value, value: Value, env: &Env) -> Result<()> {
        match container {
            Value::Node(node) => {
                let key = self.key_name(key)?;
                node.borrow_mut().set(&key, value);
                Ok(())
            }
            Value::Vars => {
                let key = self.key_name(key)?;
                let mut scope = self.rt.scope.borrow_mut();
                let vars = scope.vars_mut();
                if !matches!(vars, Value::Object(_)) {
                    *vars = Value::Object(Vec::new());
                }
                if let Value::Object(fields) = vars {
                    set_field(fields, &key, value);
                }
                Ok(())
            }
            Value::Tree => self.fail("cannot assign through the tree handle"),
            mut plain => {
                self.set_in(&mut plain, key, value)?;
                self.assign(place, plain, env)
            }
        }
    }

    fn set_in(&self, container: &mut Value, key: Value, value: Value) -> Result<()> {
        if matches!(container, Value::Null) {
            *container = Value::Object(Vec::new());
        }
        match (container, key) {
            (Value::Object(fields), Value::Str(key)) => {
                set_field(fields, &key, value);
                Ok(())
            }
            (Value::Array(items), Value::Int(i)) => match usize::try_from(i) {
                Ok(i) if i < items.len() => {
                    items[i] = value;
                    Ok(())
                }
                Ok(i) if i == items.len() => {
                    items.push(value);
                    Ok(())
                }
                _ => self.fail(format!("index {i} out of bounds")),
            },
            (container, key) => self.fail(format!(
                "cannot set a {} key on a {}",
                key.type_name(),
                container.type_name()
            )),
        }
    }

    fn key_name(&self, key: Value) -> Result<String> {
        match key {
            Value::Str(s) => Ok(s),
            Value::Int(n) => Ok(n.to_string()),
            other => self.fail(format!("a {} cannot be used as a key", other.type_name())),
        }
    }
}

fn builtin(builtin: Builtin) -> (String, Value) {
    (builtin.name().to_string(), Value::Builtin(builtin))
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Int(n) => Some(*n as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::materialize::materialize_value;
    use serde_json::json;

    fn run(source: &str) -> Result<Interpreter> {
        let interpreter = Interpreter::new(Path::new("/w"), Value::Object(Vec::new()));
        interpreter.run_script(source, Path::new("/w/.ggyp"), ScriptRole::Root)?;
        Ok(interpreter)
    }

    #[tokio::test]
    async fn test_language_semantics() {
        let interpreter = run(r#"
let total = 0;
for x in [1, 2, 3] { total = total + x; }
let o = {};
o.a.b = total;
let arr = [1] + [2];
if 0 || "" || 0.0 || null { G.falsy = "taken"; } else { G.falsy = !null; }
let pick = |a, b| a && b;
G.total = total;
G.o = o;
G.label = "n" + 1 + "-" + 2.5;
G.arr = arr;
G.len = arr.length;
G.pick = pick("x", "y");
G.keys = [];
for k in { first: 1, second: 2 } { G.keys = G.keys + [k]; }
"#)
        .unwrap();

        let vars = materialize_value(interpreter.vars(), "vars").await.unwrap();
        assert_eq!(
            vars,
            json!({
                "falsy": true,
                "total": 6,
                "o": {"a": {"b": 6}},
                "label": "n1-2.5",
                "arr": [1, 2],
                "len": 2,
                "pick": "y",
                "keys": ["first", "second"],
            })
        );
    }

    #[test]
    fn test_eval_errors() {
        let test_cases = [
            ("let a = 1;\nb = 2;\n", 2, "assignment to undeclared `b`, use let"),
            ("\n\nmissing();", 3, "`missing` is not defined"),
            ("let f = || {\n  let x = 1;\n  x.y();\n};\nf();", 3, "cannot read `y` of a number"),
            ("__S.nope();", 1, "no verb named `nope`"),
            ("global(1);", 1, "global expects an object, got a number"),
            ("target_template(\"project\", || null);", 1, "`project` is a built-in verb and cannot be a template"),
            ("let f = null;\nf = || f();\nf();", 3, "calls nested deeper than 64 levels"),
            ("let g = null;\ng = |n| {\n  g(n + 1);\n};\ng(0);", 3, "calls nested deeper than 64 levels"),
        ];

        for (source, line, message) in test_cases {
            let err = run(source).err().unwrap();
            let Error::Eval {
                line: err_line,
                message: err_message,
                ..
            } = err
            else {
                panic!("unexpected error {err:?} for {source}");
            };
            assert_eq!((err_line, err_message.as_str()), (line, message), "source: {source}");
        }
    }

    #[test]
    fn test_closures_keep_their_origin() {
        let interpreter = Interpreter::new(Path::new("/w"), Value::Object(Vec::new()));
        interpreter
            .run_script(
                "G.f = || absolute(\"x.c\");",
                Path::new("/w/sub/BUILD.ggyp"),
                ScriptRole::Included,
            )
            .unwrap();
        interpreter
            .run_script("G.out = G.f();", Path::new("/w/.ggyp"), ScriptRole::Root)
            .unwrap();

        let Value::Object(vars) = interpreter.vars() else {
            panic!("vars is not an object");
        };
        assert!(matches!(get_field(&vars, "out"), Some(Value::Str(s)) if s == "/w/sub/x.c"));
    }
}
