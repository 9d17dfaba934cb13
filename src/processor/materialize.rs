//! Turns the live scope tree into plain JSON.
//!
//! Deferred values are awaited here and nowhere else. Sibling properties
//! and children are resolved concurrently, but results are always
//! collected in insertion order.

use futures::FutureExt;
use futures::future::{LocalBoxFuture, try_join_all};
use serde_json::{Map, Value as Json};

use crate::error::{Error, Result};
use crate::model::{CHILDREN_KEY, NodeRef, Value};

/// Materializes `node` and everything below it.
///
/// The result mirrors the node's properties plus a `$children` array of
/// `[tag, child]` pairs. Any failure aborts the whole walk.
pub async fn materialize(node: &NodeRef) -> Result<Json> {
    let path = node.borrow().tag.clone();
    materialize_node(node.clone(), path).await
}

/// Materializes a free-standing value (e.g. the vars mapping).
pub async fn materialize_value(value: Value, path: &str) -> Result<Json> {
    resolve(value, path.to_string()).await
}

fn materialize_node(node: NodeRef, path: String) -> LocalBoxFuture<'static, Result<Json>> {
    async move {
        // Snapshot under a short borrow; nothing is held across an await.
        let (properties, children) = {
            let node = node.borrow();
            (node.properties.clone(), node.children.clone())
        };

        let properties = try_join_all(properties.into_iter().map(|(key, value)| {
            let path = format!("{path}.{key}");
            async move { Ok::<_, Error>((key, resolve(value, path).await?)) }
        }));
        let children = try_join_all(children.into_iter().enumerate().map(|(i, (tag, child))| {
            let path = format!("{path}.{CHILDREN_KEY}[{i}].{tag}");
            async move {
                let child = materialize_node(child, path).await?;
                Ok::<_, Error>(Json::Array(vec![Json::String(tag), child]))
            }
        }));
        let (properties, children) = futures::try_join!(properties, children)?;

        let mut map: Map<String, Json> = properties.into_iter().collect();
        map.insert(CHILDREN_KEY.to_string(), Json::Array(children));
        Ok(Json::Object(map))
    }
    .boxed_local()
}

fn resolve(value: Value, path: String) -> LocalBoxFuture<'static, Result<Json>> {
    async move {
        let json = match value {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(b),
            Value::Int(n) => Json::from(n),
            Value::Float(f) => float_to_json(f),
            Value::Str(s) => Json::String(s),
            Value::Array(items) => {
                let items = try_join_all(
                    items
                        .into_iter()
                        .enumerate()
                        .map(|(i, item)| resolve(item, format!("{path}[{i}]"))),
                )
                .await?;
                Json::Array(items)
            }
            Value::Object(fields) => {
                let fields = try_join_all(fields.into_iter().map(|(key, value)| {
                    let path = format!("{path}.{key}");
                    async move { Ok::<_, Error>((key, resolve(value, path).await?)) }
                }))
                .await?;
                Json::Object(fields.into_iter().collect())
            }
            Value::Node(node) => materialize_node(node, path).await?,
            Value::Deferred(deferred) => {
                tracing::trace!(%path, label = deferred.label(), "resolving deferred value");
                let resolved = deferred.resolve().await.map_err(|e| Error::Materialize {
                    node_path: path.clone(),
                    message: format!("deferred `{}` failed", deferred.label()),
                    source: Some(Box::new(e)),
                })?;
                resolve(resolved, path).await?
            }
            other => {
                return Err(Error::Materialize {
                    node_path: path,
                    message: format!("a {} value cannot be materialized", other.type_name()),
                    source: None,
                });
            }
        };
        Ok(json)
    }
    .boxed_local()
}

/// Whole floats in `i64` range are written as integers (`1.0` -> `1`);
/// non-finite values become `null`.
fn float_to_json(f: f64) -> Json {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if f.fract() == 0.0 && f.abs() < LIMIT {
        return Json::from(f as i64);
    }
    serde_json::Number::from_f64(f).map_or(Json::Null, Json::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Deferred, ScopeNode};
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[tokio::test]
    async fn test_materializes_in_insertion_order() {
        let root = ScopeNode::new("root");
        let project = ScopeNode::new("project");
        project.borrow_mut().set("project_name", Value::Str("app".into()));
        for name in ["a", "b", "c"] {
            let target = ScopeNode::new("target");
            target.borrow_mut().set("target_name", Value::Str(name.into()));
            project.borrow_mut().append_child(target);
        }
        root.borrow_mut().append_child(project);

        let data = materialize(&root).await.unwrap();
        assert_eq!(
            data,
            json!({
                "$children": [["project", {
                    "project_name": "app",
                    "$children": [
                        ["target", {"target_name": "a", "$children": []}],
                        ["target", {"target_name": "b", "$children": []}],
                        ["target", {"target_name": "c", "$children": []}],
                    ],
                }]],
            })
        );
    }

    #[tokio::test]
    async fn test_deferred_values_keep_order_regardless_of_completion() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let node = ScopeNode::new("target");

        // The first deferred yields several times before finishing, so
        // the second one completes first.
        let slow_log = log.clone();
        node.borrow_mut().set(
            "slow",
            Value::Deferred(Deferred::new("slow", move || {
                let log = slow_log.clone();
                async move {
                    for _ in 0..3 {
                        tokio::task::yield_now().await;
                    }
                    log.borrow_mut().push("slow");
                    Ok(Value::Int(1))
                }
            })),
        );
        let fast_log = log.clone();
        node.borrow_mut().set(
            "fast",
            Value::Deferred(Deferred::new("fast", move || {
                let log = fast_log.clone();
                async move {
                    log.borrow_mut().push("fast");
                    Ok(Value::Array(vec![Value::Str("x".into())]))
                }
            })),
        );

        let data = materialize(&node).await.unwrap();
        let keys: Vec<_> = data.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["slow", "fast", "$children"]);
        assert_eq!(data["slow"], json!(1));
        assert_eq!(data["fast"], json!(["x"]));
        assert_eq!(*log.borrow(), vec!["fast", "slow"]);
    }

    #[tokio::test]
    async fn test_deferred_may_yield_nodes_and_deferred() {
        let inner = ScopeNode::new("settings");
        inner.borrow_mut().set("flag", Value::Bool(true));
        let node = ScopeNode::new("target");
        node.borrow_mut().set(
            "nested",
            Value::Deferred(Deferred::new("outer", move || {
                let inner = inner.clone();
                async move {
                    Ok(Value::Deferred(Deferred::new("inner", move || {
                        let inner = inner.clone();
                        async move { Ok(Value::Node(inner)) }
                    })))
                }
            })),
        );

        let data = materialize(&node).await.unwrap();
        assert_eq!(data["nested"], json!({"flag": true, "$children": []}));
    }

    #[tokio::test]
    async fn test_failure_names_node_path() {
        let root = ScopeNode::new("root");
        let project = ScopeNode::new("project");
        let target = ScopeNode::new("target");
        target.borrow_mut().set(
            "sources",
            Value::Deferred(Deferred::new("lookup", || async {
                Err(Error::Materialize {
                    node_path: String::new(),
                    message: "backend unavailable".into(),
                    source: None,
                })
            })),
        );
        project.borrow_mut().append_child(target);
        root.borrow_mut().append_child(project);

        let err = materialize(&root).await.unwrap_err();
        let Error::Materialize {
            node_path, message, ..
        } = err
        else {
            panic!("unexpected error {err:?}");
        };
        assert_eq!(node_path, "root.$children[0].project.$children[0].target.sources");
        assert!(message.contains("lookup"));
    }

    #[tokio::test]
    async fn test_whole_floats_become_integers() {
        let test_cases = vec![
            (Value::Float(1.0), json!(1)),
            (Value::Float(-3.0), json!(-3)),
            (Value::Float(-0.0), json!(0)),
            (Value::Float(2.5), json!(2.5)),
            (Value::Float(1e300), json!(1e300)),
            (Value::Float(f64::NAN), json!(null)),
        ];

        for (value, expected) in test_cases {
            let debug = format!("{value:?}");
            assert_eq!(materialize_value(value, "v").await.unwrap(), expected, "{debug}");
        }
    }

    #[tokio::test]
    async fn test_functions_are_not_materializable() {
        let node = ScopeNode::new("target");
        node.borrow_mut().set("cb", Value::Verb("exe".into()));
        let err = materialize(&node).await.unwrap_err();
        assert!(err.to_string().contains("target.cb"), "{err}");
    }
}
