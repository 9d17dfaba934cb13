//! Functions placed in script environments besides the verbs.

use std::path::PathBuf;

use super::interpreter::{Interpreter, ScriptRole};
use super::paths::{self, PathResolver};
use crate::error::{Error, Result};
use crate::model::{Builtin, DEFAULT_SCRIPT, Deferred, FRAGMENT_EXT, PRIMARY_EXT, Value};

impl Interpreter {
    pub(crate) fn call_builtin(&self, builtin: Builtin, args: Vec<Value>) -> Result<Value> {
        match builtin {
            // These go through the registry so they always reach the live verb.
            Builtin::Global => self.call_verb("global", args),
            Builtin::TargetTemplate => self.call_verb("target_template", args),
            Builtin::Project => self.call_verb("project", args),
            Builtin::Include => self.include(args),
            Builtin::ToLocal => {
                let target = self.string_arg(builtin, &args)?;
                Ok(Value::Str(self.with_resolver(|r| r.to_local(&target))))
            }
            Builtin::FromBase => {
                let target = self.string_arg(builtin, &args)?;
                Ok(Value::Str(self.with_resolver(|r| r.from_base(&target))))
            }
            Builtin::ToAbsolute => {
                let target = self.string_arg(builtin, &args)?;
                Ok(Value::Str(self.with_resolver(|r| r.to_absolute(&target))))
            }
            Builtin::Glob => {
                let patterns = self.strings_arg(builtin, args)?;
                match self.with_resolver(|r| r.glob(&patterns)) {
                    Ok(matches) => Ok(Value::Array(matches.into_iter().map(Value::Str).collect())),
                    Err(message) => self.fail(message),
                }
            }
            Builtin::Defer => self.defer(args),
        }
    }

    fn with_resolver<T>(&self, f: impl FnOnce(PathResolver<'_>) -> T) -> T {
        let origin = self.origin();
        f(PathResolver::new(self.cwd(), origin.dir()))
    }

    /// `$gen(dir)` / `$gen([dir, ...])`: runs `<dir>/BUILD.ggyp` for each
    /// entry, in order, against the same tree. Entries naming a script
    /// file directly run that file. Relative entries are taken from the
    /// working directory.
    fn include(&self, args: Vec<Value>) -> Result<Value> {
        let entries = self.strings_arg(Builtin::Include, args)?;
        for entry in entries {
            let target = paths::resolve(self.cwd(), &entry);
            let is_script = [PRIMARY_EXT, FRAGMENT_EXT]
                .iter()
                .any(|ext| target.ends_with(&format!(".{ext}")));
            let script = if is_script {
                PathBuf::from(target)
            } else {
                PathBuf::from(paths::join(&[target.as_str(), DEFAULT_SCRIPT]))
            };
            tracing::debug!(entry, script = %script.display(), "including script");
            self.run_file(&script, ScriptRole::Included)?;
        }
        Ok(Value::Null)
    }

    /// `defer(fn)`: `fn` runs during materialization, anchored to the
    /// script that defined it.
    fn defer(&self, args: Vec<Value>) -> Result<Value> {
        let computation = match args.into_iter().next() {
            Some(f) if f.is_callable() => f,
            _ => return self.fail("defer expects a function"),
        };
        let label = format!("{}:{}", self.origin().path.display(), self.line());
        let run = self.downgrade();

        let deferred = Deferred::new(label, move || {
            let run = run.clone();
            let computation = computation.clone();
            async move {
                let interpreter = run.upgrade().ok_or_else(|| Error::Materialize {
                    node_path: String::new(),
                    message: "the generation run has already finished".to_string(),
                    source: None,
                })?;
                interpreter.call(&computation, Vec::new())
            }
        });
        Ok(Value::Deferred(deferred))
    }

    fn string_arg(&self, builtin: Builtin, args: &[Value]) -> Result<String> {
        match args.first() {
            Some(Value::Str(s)) => Ok(s.clone()),
            _ => self.fail(format!("{} expects a path string", builtin.name())),
        }
    }

    /// A string or an array of strings.
    fn strings_arg(&self, builtin: Builtin, args: Vec<Value>) -> Result<Vec<String>> {
        match args.into_iter().next() {
            Some(Value::Str(s)) => Ok(vec![s]),
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::Str(s) => Ok(s),
                    other => self.fail(format!(
                        "{} expects strings, got a {}",
                        builtin.name(),
                        other.type_name()
                    )),
                })
                .collect(),
            _ => self.fail(format!("{} expects a string or an array of strings", builtin.name())),
        }
    }
}
