//! Loading build scripts from disk.

use std::path::Path;

use crate::error::{Error, Result};
use crate::processor::ast::Program;
use crate::processor::script_parser;

/// Reads and parses the script at `path`.
pub fn load_script(path: &Path) -> Result<Program> {
    let source = std::fs::read_to_string(path).map_err(|source| Error::Load {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), bytes = source.len(), "script loaded");
    parse_source(&source, path)
}

/// Parses `source`, attributing errors to `path`.
pub fn parse_source(source: &str, path: &Path) -> Result<Program> {
    script_parser::parse_script(source).map_err(|e| Error::Syntax {
        path: path.to_path_buf(),
        line: e.line,
        message: e.message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_script_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_script(&dir.path().join("BUILD.ggyp")).unwrap_err();
        assert!(matches!(err, Error::Load { .. }), "{err:?}");
    }

    #[test]
    fn test_syntax_errors_name_the_script() {
        let err = parse_source("let = 1;", Path::new("/w/A/BUILD.ggyp")).unwrap_err();
        assert_eq!(err.to_string(), "/w/A/BUILD.ggyp:1: syntax error: expected identifier after let, found Assign");
    }
}
