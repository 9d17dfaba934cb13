pub mod value;

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde::Serialize;

pub use value::{Builtin, Closure, Deferred, Env, Value};

/// Extension of a primary project descriptor script.
pub const PRIMARY_EXT: &str = "ggyp";
/// Extension of an includable fragment script.
pub const FRAGMENT_EXT: &str = "ggypi";
/// Script run by `$gen` when it is handed a directory.
pub const DEFAULT_SCRIPT: &str = "BUILD.ggyp";

pub const PRIMARY_SUFFIX: &str = ".gyp";
pub const FRAGMENT_SUFFIX: &str = ".gypi";

pub const CHILDREN_KEY: &str = "$children";

/// Which kind of descriptor a script file declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    Primary,
    Fragment,
}

impl ScriptKind {
    pub fn of(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(FRAGMENT_EXT) => ScriptKind::Fragment,
            _ => ScriptKind::Primary,
        }
    }

    pub fn output_suffix(self) -> &'static str {
        match self {
            ScriptKind::Primary => PRIMARY_SUFFIX,
            ScriptKind::Fragment => FRAGMENT_SUFFIX,
        }
    }
}

/// The script a piece of code was defined in.
///
/// Every closure remembers its origin, and path helpers anchor to the
/// origin of whatever code is running when they are called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    /// Absolute, normalized path of the script file.
    pub path: PathBuf,
    pub kind: ScriptKind,
}

impl Origin {
    pub fn new(path: PathBuf) -> Self {
        let kind = ScriptKind::of(&path);
        Self { path, kind }
    }

    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("/"))
    }

    /// File name with the script extension stripped (`BUILD.ggyp` -> `BUILD`).
    pub fn stem(&self) -> String {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        for ext in [FRAGMENT_EXT, PRIMARY_EXT] {
            if let Some(stem) = name.strip_suffix(&format!(".{ext}")) {
                return stem.to_string();
            }
        }
        name
    }
}

/// Insertion-ordered `key -> value` list used for node properties and
/// script objects.
pub type Fields = Vec<(String, Value)>;

pub fn get_field<'a>(fields: &'a Fields, key: &str) -> Option<&'a Value> {
    fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

/// Overwrites in place so the key keeps its original position.
pub fn set_field(fields: &mut Fields, key: &str, value: Value) {
    match fields.iter_mut().find(|(k, _)| k == key) {
        Some((_, slot)) => *slot = value,
        None => fields.push((key.to_string(), value)),
    }
}

pub type NodeRef = Rc<RefCell<ScopeNode>>;

/// A tagged entry of the scope tree.
///
/// Children are append-only: nothing is removed once added.
#[derive(Debug)]
pub struct ScopeNode {
    pub tag: String,
    pub properties: Fields,
    pub children: Vec<(String, NodeRef)>,
}

impl ScopeNode {
    pub fn new(tag: impl Into<String>) -> NodeRef {
        Rc::new(RefCell::new(ScopeNode {
            tag: tag.into(),
            properties: Fields::new(),
            children: Vec::new(),
        }))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        get_field(&self.properties, key)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        set_field(&mut self.properties, key, value);
    }

    pub fn append_child(&mut self, node: NodeRef) {
        let tag = node.borrow().tag.clone();
        self.children.push((tag, node));
    }
}

/// One emitted project file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GypDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub includes: Option<serde_json::Value>,
}

/// A document together with where it goes.
#[derive(Debug, Clone, PartialEq)]
pub struct GypFile {
    pub path: PathBuf,
    pub document: GypDocument,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_kinds_and_stems() {
        let test_cases = vec![
            ("/w/A/BUILD.ggyp", ScriptKind::Primary, "BUILD", ".gyp"),
            ("/w/lib/common.ggypi", ScriptKind::Fragment, "common", ".gypi"),
            ("/w/.ggyp", ScriptKind::Primary, "", ".gyp"),
        ];

        for (path, kind, stem, suffix) in test_cases {
            let origin = Origin::new(PathBuf::from(path));
            assert_eq!(origin.kind, kind, "{path}");
            assert_eq!(origin.stem(), stem, "{path}");
            assert_eq!(origin.kind.output_suffix(), suffix, "{path}");
        }
    }

    #[test]
    fn test_set_field_keeps_position() {
        let mut fields = Fields::new();
        set_field(&mut fields, "project_path", Value::Str(String::new()));
        set_field(&mut fields, "other", Value::Int(1));
        set_field(&mut fields, "project_path", Value::Str("/w".into()));

        let keys: Vec<_> = fields.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["project_path", "other"]);
        assert!(matches!(get_field(&fields, "project_path"), Some(Value::Str(s)) if s == "/w"));
    }
}
