//! Assemble one gyp/gypi document per project and write it beside the
//! script that declared it.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value as Json};

use crate::error::{Error, Result};
use crate::model::{CHILDREN_KEY, GypDocument, GypFile, ScriptKind};
use crate::processor::paths;

/// Field names whose array elements are paths.
const PATH_KEY_SUFFIXES: [&str; 3] = ["sources", "dirs", "files"];

/// Builds the documents for every project directly under `tree`.
pub fn assemble(tree: &Json, cwd: &Path) -> Vec<GypFile> {
    children(tree, "project")
        .map(|project| assemble_project(project, cwd))
        .collect()
}

fn assemble_project(project: &Json, cwd: &Path) -> GypFile {
    let project_path = project
        .get("project_path")
        .and_then(Json::as_str)
        .map(PathBuf::from)
        .unwrap_or_else(|| cwd.to_path_buf());
    let project_name = project
        .get("project_name")
        .and_then(Json::as_str)
        .unwrap_or_default();
    let kind = match project.get("project_is_includable") {
        Some(Json::Bool(true)) => ScriptKind::Fragment,
        _ => ScriptKind::Primary,
    };

    let assets_base = paths::assets_base(&project_path, cwd);

    let variables = project
        .get("variables")
        .filter(|v| v.as_object().is_some_and(|m| !m.is_empty()))
        .cloned();

    let targets: Vec<Json> = children(project, "target")
        .map(|target| strip_target(rebase_paths(target, &assets_base)))
        .collect();

    let includes = project.get("includes").filter(|v| !is_falsy(v)).cloned();

    let file_name = format!("{project_name}{}", kind.output_suffix());
    GypFile {
        path: project_path.join(file_name),
        document: GypDocument {
            variables,
            targets: (!targets.is_empty()).then_some(targets),
            includes,
        },
    }
}

/// Materialized children of `node` carrying `tag`.
fn children<'a>(node: &'a Json, tag: &'a str) -> impl Iterator<Item = &'a Json> + 'a {
    node.get(CHILDREN_KEY)
        .and_then(Json::as_array)
        .into_iter()
        .flatten()
        .filter_map(move |pair| match pair.as_array().map(Vec::as_slice) {
            Some([Json::String(t), child]) if t == tag => Some(child),
            _ => None,
        })
}

/// Joins every element of `*sources`, `*dirs` and `*files` arrays onto
/// `prefix`, recursing into nested objects. Everything else is untouched.
pub fn rebase_paths(value: &Json, prefix: &str) -> Json {
    let Json::Object(fields) = value else {
        return value.clone();
    };
    let rebased = fields
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Json::Array(items) if is_path_key(key) => Json::Array(
                    items
                        .iter()
                        .map(|item| match item {
                            Json::String(path) => Json::String(paths::join(&[prefix, path])),
                            other => other.clone(),
                        })
                        .collect(),
                ),
                Json::Object(_) => rebase_paths(value, prefix),
                other => other.clone(),
            };
            (key.clone(), value)
        })
        .collect::<Map<_, _>>();
    Json::Object(rebased)
}

fn is_path_key(key: &str) -> bool {
    PATH_KEY_SUFFIXES.iter().any(|suffix| key.ends_with(suffix))
}

/// Drops `$children` and every falsy property.
fn strip_target(target: Json) -> Json {
    match target {
        Json::Object(fields) => Json::Object(
            fields
                .into_iter()
                .filter(|(key, value)| key != CHILDREN_KEY && !is_falsy(value))
                .collect(),
        ),
        other => other,
    }
}

fn is_falsy(value: &Json) -> bool {
    match value {
        Json::Null => true,
        Json::Bool(b) => !b,
        Json::Number(n) => n.as_f64() == Some(0.0),
        Json::String(s) => s.is_empty(),
        Json::Array(_) | Json::Object(_) => false,
    }
}

/// Indented JSON text of a document (2 spaces, no trailing newline).
pub fn render(document: &GypDocument) -> serde_json::Result<String> {
    serde_json::to_string_pretty(document)
}

/// Writes every file. The first failure aborts; earlier files stay written.
pub fn emit(files: &[GypFile]) -> Result<()> {
    for file in files {
        let write_error = |source: std::io::Error| Error::Write {
            path: file.path.clone(),
            source,
        };
        let text = render(&file.document).map_err(|e| write_error(e.into()))?;
        fs::write(&file.path, text).map_err(write_error)?;
        tracing::info!(path = %file.path.display(), "wrote project");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rebase_only_path_fields() {
        let target = json!({
            "target_name": "main",
            "sources": ["a.c", "src/b.c"],
            "include_dirs": ["include"],
            "libraries": ["-lm"],
            "copies_files": [1, "x"],
            "defines": ["A=1"],
            "xcode_settings": {"framework_dirs": ["fw"], "OTHER": ["o"]},
            "conditions": [{"sources": ["nested.c"]}],
        });

        let rebased = rebase_paths(&target, "../A");
        assert_eq!(
            rebased,
            json!({
                "target_name": "main",
                "sources": ["../A/a.c", "../A/src/b.c"],
                "include_dirs": ["../A/include"],
                "libraries": ["-lm"],
                "copies_files": [1, "../A/x"],
                "defines": ["A=1"],
                "xcode_settings": {"framework_dirs": ["../A/fw"], "OTHER": ["o"]},
                "conditions": [{"sources": ["nested.c"]}],
            })
        );
    }

    #[test]
    fn test_rebase_identity_in_working_directory() {
        let target = json!({"sources": ["a.c", "sub/b.c"], "dirs": ["inc/"]});
        assert_eq!(rebase_paths(&target, "."), target);
    }

    #[test]
    fn test_assemble_projects() {
        let tree = json!({
            "$children": [
                ["target", {"target_name": "stray", "$children": []}],
                ["project", {
                    "project_path": "/w/A",
                    "project_name": "app",
                    "variables": {},
                    "project_is_includable": false,
                    "$children": [
                        ["target", {
                            "target_name": "main",
                            "type": "executable",
                            "sources": ["a.c"],
                            "standalone_static_library": 0,
                            "msvs_guid": "",
                            "dependencies": [],
                            "$children": [],
                        }],
                    ],
                }],
                ["project", {
                    "project_path": "/w/lib",
                    "project_name": "common",
                    "variables": {"x": 1},
                    "includes": ["../base.gypi"],
                    "project_is_includable": true,
                    "$children": [],
                }],
            ],
        });

        let files = assemble(&tree, Path::new("/w"));
        assert_eq!(files.len(), 2);

        assert_eq!(files[0].path, PathBuf::from("/w/A/app.gyp"));
        assert_eq!(
            serde_json::to_value(&files[0].document).unwrap(),
            json!({
                "targets": [{
                    "target_name": "main",
                    "type": "executable",
                    "sources": ["../A/a.c"],
                    "dependencies": [],
                }],
            })
        );

        assert_eq!(files[1].path, PathBuf::from("/w/lib/common.gypi"));
        assert_eq!(
            render(&files[1].document).unwrap(),
            "{\n  \"variables\": {\n    \"x\": 1\n  },\n  \"includes\": [\n    \"../base.gypi\"\n  ]\n}"
        );
    }

    #[test]
    fn test_emit_reports_write_failures() {
        let dir = tempfile::tempdir().unwrap();
        let file = GypFile {
            path: dir.path().join("missing").join("app.gyp"),
            document: GypDocument {
                variables: None,
                targets: None,
                includes: None,
            },
        };
        let err = emit(&[file]).unwrap_err();
        assert!(matches!(err, Error::Write { .. }), "{err:?}");

        let file = GypFile {
            path: dir.path().join("app.gyp"),
            document: GypDocument {
                variables: None,
                targets: None,
                includes: None,
            },
        };
        emit(&[file]).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("app.gyp")).unwrap(), "{}");
    }
}
