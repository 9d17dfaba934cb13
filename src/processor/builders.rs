//! The project/target verbs built on top of the scope tree.

use super::interpreter::Interpreter;
use super::paths::path_str;
use super::scope::{Scope, Verb};
use crate::error::Result;
use crate::model::{ScriptKind, Value};

const CORE_VERBS: [&str; 3] = ["global", "project", "target_template"];

/// Registers `global`, `project`, `target_template` and the default
/// `target` template on a fresh scope.
pub fn register_core_verbs(scope: &mut Scope) {
    scope.define_verb("global", Verb::Global);
    scope.define_verb("project", Verb::Project);
    scope.define_verb("target_template", Verb::TargetTemplate);
    scope.define_verb("target", Verb::Template { definition: None });
}

impl Interpreter {
    pub(crate) fn invoke_verb(&self, name: &str, verb: Verb, args: Vec<Value>) -> Result<Value> {
        match verb {
            Verb::Global => self.replace_vars(args),
            Verb::Project => self.define_project(args),
            Verb::TargetTemplate => self.define_template(args),
            Verb::Template { definition } => self.define_target(name, definition, args),
        }
    }

    /// `global(vars)`: last writer wins, no merging.
    fn replace_vars(&self, args: Vec<Value>) -> Result<Value> {
        let vars = match args.into_iter().next() {
            Some(vars @ Value::Object(_)) => vars,
            Some(other) => {
                return self.fail(format!("global expects an object, got a {}", other.type_name()));
            }
            None => return self.fail("global expects an object"),
        };
        tracing::debug!(?vars, "replacing global vars");
        self.scope_mut().set_vars(vars);
        Ok(Value::Null)
    }

    /// `project(name, definition)`.
    ///
    /// `project_path`, `project_name` and `project_is_includable` belong to
    /// the verb: whatever the definition sets for them is overwritten.
    /// Projects are always top-level, even when declared from inside
    /// another definition.
    fn define_project(&self, args: Vec<Value>) -> Result<Value> {
        let mut args = args.into_iter();
        let name = match args.next() {
            Some(Value::Null) | None => return self.fail("project expects a name"),
            Some(name) => name.to_display(),
        };
        let definition = args.next().unwrap_or(Value::Null);

        let origin = self.origin();
        let project_path = path_str(origin.dir());
        let includable = origin.kind == ScriptKind::Fragment;

        tracing::debug!(%name, %project_path, includable, "defining project");
        self.with_root_child("project", |project| {
            {
                let mut project = project.borrow_mut();
                project.set("project_path", Value::Str(String::new()));
                project.set("project_name", Value::Str(String::new()));
                project.set("variables", Value::Object(Vec::new()));
            }

            if !matches!(definition, Value::Null) {
                self.call(&definition, vec![Value::Node(project.clone())])?;
            }

            let mut project = project.borrow_mut();
            project.set("project_path", Value::Str(project_path));
            project.set("project_name", Value::Str(name));
            project.set("project_is_includable", Value::Bool(includable));
            Ok(())
        })?;
        Ok(Value::Null)
    }

    /// `target_template(name, definition)`: registers `name` as a new verb.
    fn define_template(&self, args: Vec<Value>) -> Result<Value> {
        let mut args = args.into_iter();
        let name = match args.next() {
            Some(Value::Str(name)) => name,
            _ => return self.fail("target_template expects a template name"),
        };
        if CORE_VERBS.contains(&name.as_str()) {
            return self.fail(format!("`{name}` is a built-in verb and cannot be a template"));
        }
        let definition = match args.next() {
            Some(definition) if definition.is_callable() => definition,
            _ => return self.fail(format!("target_template `{name}` expects a definition function")),
        };

        self.scope_mut().define_verb(
            &name,
            Verb::Template {
                definition: Some(definition),
            },
        );
        Ok(Value::Null)
    }

    /// `template(target_name, author_definition)`.
    ///
    /// The template's definition decides if and when the author's
    /// definition runs; it receives `(target, author_definition)`.
    fn define_target(
        &self,
        template: &str,
        definition: Option<Value>,
        args: Vec<Value>,
    ) -> Result<Value> {
        let mut args = args.into_iter();
        let target_name = match args.next() {
            Some(Value::Null) | None => return self.fail(format!("{template} expects a target name")),
            Some(name) => name,
        };
        let author = args.next().unwrap_or(Value::Null);

        tracing::debug!(template, target = %target_name.to_display(), "defining target");
        self.with_child("target", |target| {
            target.borrow_mut().set("target_name", target_name);
            let handle = Value::Node(target.clone());
            match &definition {
                Some(definition) => {
                    self.call(definition, vec![handle, author])?;
                }
                None if !matches!(author, Value::Null) => {
                    self.call(&author, vec![handle])?;
                }
                None => {}
            }
            Ok(())
        })?;
        Ok(Value::Null)
    }
}
