use std::path::PathBuf;

/// Everything that can stop a generation run.
///
/// Nothing is recovered locally; each variant carries enough context to
/// point the author at the failing script, line or node.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read script {}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}:{line}: syntax error: {message}", path.display())]
    Syntax {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("{}:{line}: {message}", path.display())]
    Eval {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("materializing `{node_path}`: {message}")]
    Materialize {
        node_path: String,
        message: String,
        #[source]
        source: Option<Box<Error>>,
    },

    #[error("failed to write {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
