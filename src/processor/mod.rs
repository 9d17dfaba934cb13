//! The functional core: run the scripts, then materialize the tree.
pub mod ast;
pub mod builders;
pub mod builtins;
pub mod interpreter;
pub mod lexer;
pub mod materialize;
pub mod paths;
pub mod scope;
pub mod script_parser;

use std::path::Path;

pub use interpreter::{Interpreter, ScriptRole};

use crate::error::Result;
use crate::model::Value;

/// The plain, JSON-safe result of running a configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// The materialized root node.
    pub tree: serde_json::Value,
    /// The vars mapping as it stood when the scripts finished.
    pub vars: serde_json::Value,
}

/// Runs the root script at `config` and materializes everything it built.
pub async fn evaluate(cwd: &Path, config: &Path, vars: Value) -> Result<Evaluation> {
    let interpreter = Interpreter::new(cwd, vars);
    interpreter.run_file(config, ScriptRole::Root)?;

    let tree = materialize::materialize(&interpreter.root()).await?;
    let vars = materialize::materialize_value(interpreter.vars(), "vars").await?;
    Ok(Evaluation { tree, vars })
}
