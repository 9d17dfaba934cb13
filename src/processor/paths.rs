//! Path helpers anchored to the directory of the running script.
//!
//! Everything here is lexical and POSIX-style (`/` separators): the
//! strings end up in gyp files, not in syscalls.

use std::collections::BTreeSet;
use std::path::Path;

use globset::{Glob, GlobBuilder, GlobSetBuilder};
use walkdir::WalkDir;

/// Lexically normalizes `path`, resolving `.` and `..`.
///
/// An empty result becomes `.` and a trailing slash is kept.
pub fn normalize(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let absolute = path.starts_with('/');
    let trailing = path.ends_with('/');

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ if absolute => {}
                _ => segments.push(".."),
            },
            other => segments.push(other),
        }
    }

    let mut out = segments.join("/");
    if absolute {
        out.insert(0, '/');
    } else if out.is_empty() {
        out.push('.');
    }
    if trailing && !out.ends_with('/') {
        out.push('/');
    }
    out
}

/// Joins the non-empty `parts` with `/` and normalizes the result.
pub fn join<S: AsRef<str>>(parts: &[S]) -> String {
    let joined = parts
        .iter()
        .map(AsRef::as_ref)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    normalize(&joined)
}

/// Relative path from absolute `from` to absolute `to`; empty when equal.
pub fn relative(from: &str, to: &str) -> String {
    let from = normalize(from);
    let to = normalize(to);
    let from: Vec<&str> = from.split('/').filter(|s| !s.is_empty()).collect();
    let to: Vec<&str> = to.split('/').filter(|s| !s.is_empty()).collect();

    let common = from
        .iter()
        .zip(&to)
        .take_while(|(a, b)| a == b)
        .count();

    let mut out: Vec<&str> = vec![".."; from.len() - common];
    out.extend(&to[common..]);
    out.join("/")
}

/// `target` itself when absolute, otherwise `target` joined onto `base`.
pub fn resolve(base: &Path, target: &str) -> String {
    if target.starts_with('/') {
        normalize(target)
    } else {
        join(&[path_str(base).as_str(), target])
    }
}

pub fn path_str(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Prefix every path recorded by a project's script must receive so it
/// stays valid next to the emitted project file.
///
/// This is the round trip `project -> cwd -> project`; for a project in
/// the working directory it is `.`.
pub fn assets_base(project_dir: &Path, cwd: &Path) -> String {
    let project_dir = path_str(project_dir);
    let cwd = path_str(cwd);
    join(&[relative(&project_dir, &cwd), relative(&cwd, &project_dir)])
}

/// Resolves paths for one script: `base` is the script's directory.
#[derive(Debug, Clone, Copy)]
pub struct PathResolver<'a> {
    cwd: &'a Path,
    base: &'a Path,
}

impl<'a> PathResolver<'a> {
    pub fn new(cwd: &'a Path, base: &'a Path) -> Self {
        Self { cwd, base }
    }

    /// A working-directory path re-expressed relative to the script.
    pub fn to_local(&self, target: &str) -> String {
        let absolute = resolve(self.cwd, target);
        relative(&path_str(self.base), &absolute)
    }

    /// A script-relative path re-expressed from the working directory,
    /// prefixed so it composes with `to_local` outputs.
    pub fn from_base(&self, target: &str) -> String {
        let base = path_str(self.base);
        let cwd = path_str(self.cwd);
        let absolute = resolve(self.base, target);
        join(&[relative(&base, &cwd), relative(&cwd, &absolute)])
    }

    pub fn to_absolute(&self, target: &str) -> String {
        resolve(self.base, target)
    }

    /// Files matching `patterns`, sorted and relative to the script's
    /// directory (absolute patterns report absolute paths).
    ///
    /// Patterns starting with `!` exclude matches. Names starting with a
    /// dot are only matched by pattern segments that start with a dot.
    pub fn glob<S: AsRef<str>>(&self, patterns: &[S]) -> Result<Vec<String>, String> {
        let mut includes = Vec::new();
        let mut exclude = GlobSetBuilder::new();
        for pattern in patterns {
            match pattern.as_ref().strip_prefix('!') {
                Some(negated) => {
                    exclude.add(GlobPattern::new(self.base, negated)?.glob);
                }
                None => includes.push(GlobPattern::new(self.base, pattern.as_ref())?),
            }
        }
        let exclude = exclude
            .build()
            .map_err(|e| format!("invalid glob set: {e}"))?;

        let base = path_str(self.base);
        let mut matches = BTreeSet::new();
        for pattern in &includes {
            let root = Path::new(&pattern.root);
            if !root.is_dir() {
                continue;
            }
            let matcher = pattern.glob.compile_matcher();
            let mut walk = WalkDir::new(root).min_depth(1);
            if let Some(depth) = pattern.depth {
                walk = walk.max_depth(depth);
            }
            let entries = walk
                .into_iter()
                .filter_entry(|e| pattern.dotted || e.depth() == 0 || !is_hidden(e));
            for entry in entries {
                let entry = entry.map_err(|e| format!("walking {}: {e}", pattern.root))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = path_str(entry.path());
                if !matcher.is_match(&path) || exclude.is_match(&path) {
                    continue;
                }
                matches.insert(if pattern.absolute {
                    path
                } else {
                    relative(&base, &path)
                });
            }
        }
        tracing::trace!(base = ?self.base, count = matches.len(), "expanded globs");
        Ok(matches.into_iter().collect())
    }
}

/// One glob split into the literal directory it starts from and the
/// absolute pattern matched below it.
struct GlobPattern {
    root: String,
    glob: Glob,
    /// Some segment below `root` starts with a dot.
    dotted: bool,
    absolute: bool,
    /// Walk depth, unbounded when the pattern contains `**`.
    depth: Option<usize>,
}

impl GlobPattern {
    fn new(base: &Path, pattern: &str) -> Result<Self, String> {
        let resolved = resolve(base, pattern);
        let segments: Vec<&str> = resolved.split('/').filter(|s| !s.is_empty()).collect();
        let split = segments
            .iter()
            .position(|s| is_magic(s))
            .unwrap_or(segments.len().saturating_sub(1));
        let (literal, rest) = segments.split_at(split);

        let root = format!("/{}", literal.join("/"));
        let full = format!(
            "{}/{}",
            globset::escape(root.trim_end_matches('/')),
            rest.join("/")
        );
        let glob = GlobBuilder::new(&full)
            .literal_separator(true)
            .build()
            .map_err(|e| format!("invalid glob {pattern:?}: {e}"))?;

        Ok(Self {
            root,
            glob,
            dotted: rest.iter().any(|s| s.starts_with('.')),
            absolute: pattern.starts_with('/'),
            depth: (!rest.contains(&"**")).then_some(rest.len()),
        })
    }
}

fn is_magic(segment: &str) -> bool {
    segment.contains(['*', '?', '[', '{'])
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}
