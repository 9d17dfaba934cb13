pub mod cli;
pub mod error;
pub mod model;
pub mod parser;
pub mod processor;
pub mod writer;

pub use error::Error;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use serde_json::Value as Json;

use model::{Fields, GypFile, Value};

/// Runs `config` and returns the documents it describes without writing
/// anything. `config` is resolved against `cwd` unless absolute.
pub async fn plan(
    cwd: &Path,
    config: &Path,
    defines: impl IntoIterator<Item = (String, Json)>,
) -> error::Result<Vec<GypFile>> {
    let mut vars = Fields::new();
    for (key, value) in defines {
        model::set_field(&mut vars, &key, Value::from_json(value));
    }
    let evaluation = processor::evaluate(cwd, &cwd.join(config), Value::Object(vars)).await?;
    tracing::debug!(vars = %evaluation.vars, "scripts finished");
    Ok(writer::gyp::assemble(&evaluation.tree, cwd))
}

/// Runs `config` with `cwd` as the working directory and writes one
/// `.gyp`/`.gypi` per project. Returns the written paths in tree order.
pub async fn generate_in(
    cwd: &Path,
    config: &Path,
    defines: impl IntoIterator<Item = (String, Json)>,
) -> error::Result<Vec<PathBuf>> {
    let files = plan(cwd, config, defines).await?;
    writer::gyp::emit(&files)?;
    Ok(files.into_iter().map(|file| file.path).collect())
}

/// [`generate_in`] from the process working directory.
pub async fn generate(
    config: &Path,
    defines: impl IntoIterator<Item = (String, Json)>,
) -> anyhow::Result<Vec<PathBuf>> {
    let cwd = std::env::current_dir().context("Resolving the working directory")?;
    Ok(generate_in(&cwd, config, defines).await?)
}

pub async fn run() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let cwd = std::env::current_dir().context("Resolving the working directory")?;

    // 1. ── Evaluate ───────────────────────────────────────────────────
    let files = plan(&cwd, &args.config, args.defines)
        .await
        .with_context(|| format!("Generating from {}", args.config.display()))?;

    if files.is_empty() {
        tracing::warn!(config = %args.config.display(), "no projects declared");
    }

    // 2. ── Write outputs ──────────────────────────────────────────────
    if args.dry_run {
        for file in &files {
            let text = writer::gyp::render(&file.document)
                .with_context(|| format!("Rendering {}", file.path.display()))?;
            println!("# {}\n{text}", file.path.display());
        }
        return Ok(());
    }

    writer::gyp::emit(&files).with_context(|| "Writing gyp files")?;

    Ok(())
}
