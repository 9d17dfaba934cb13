//! The scope tree: one root node, a stack of nodes currently being
//! defined, the verb registry and the free-form `vars` mapping.

use std::collections::HashMap;

use crate::model::{NodeRef, ScopeNode, Value};

pub const ROOT_TAG: &str = "root";

/// What invoking a registered verb does.
#[derive(Debug, Clone)]
pub enum Verb {
    /// `global(vars)`: replace the vars mapping.
    Global,
    /// `project(name, definition)`.
    Project,
    /// `target_template(name, definition)`: register a new `Template`.
    TargetTemplate,
    /// `name(target_name, author_definition)`: create a `target` node.
    ///
    /// Without a definition the author's callback runs directly on the
    /// target; this is how the default `target` verb behaves.
    Template { definition: Option<Value> },
}

impl Verb {
    pub fn is_template(&self) -> bool {
        matches!(self, Verb::Template { .. })
    }
}

/// A node whose definition callback is running, and where it goes once
/// the callback succeeds.
struct OpenNode {
    node: NodeRef,
    parent: NodeRef,
}

pub struct Scope {
    root: NodeRef,
    /// Innermost last.
    open: Vec<OpenNode>,
    verbs: HashMap<String, Verb>,
    vars: Value,
}

impl Scope {
    pub fn new(vars: Value) -> Self {
        Self {
            root: ScopeNode::new(ROOT_TAG),
            open: Vec::new(),
            verbs: HashMap::new(),
            vars,
        }
    }

    pub fn root(&self) -> NodeRef {
        self.root.clone()
    }

    /// The node new children attach to.
    pub fn current(&self) -> NodeRef {
        self.open.last().map_or(&self.root, |open| &open.node).clone()
    }

    /// Registers (or replaces) a verb. It is visible to the very next lookup.
    pub fn define_verb(&mut self, name: &str, verb: Verb) {
        tracing::debug!(name, ?verb, "defined verb");
        self.verbs.insert(name.to_string(), verb);
    }

    pub fn verb(&self, name: &str) -> Option<Verb> {
        self.verbs.get(name).cloned()
    }

    /// Starts a child of the current node. It becomes the current node
    /// until `close_child`.
    pub fn open_child(&mut self, tag: &str) -> NodeRef {
        let parent = self.current();
        self.open_under(tag, parent)
    }

    /// Like `open_child`, but the node is appended to the root no matter
    /// which node is being defined.
    pub fn open_root_child(&mut self, tag: &str) -> NodeRef {
        let parent = self.root();
        self.open_under(tag, parent)
    }

    fn open_under(&mut self, tag: &str, parent: NodeRef) -> NodeRef {
        tracing::debug!(tag, depth = self.open.len(), "opening node");
        let node = ScopeNode::new(tag);
        self.open.push(OpenNode {
            node: node.clone(),
            parent,
        });
        node
    }

    /// Finishes the innermost open node, appending it to its parent when
    /// its definition succeeded.
    pub fn close_child(&mut self, keep: bool) {
        let Some(OpenNode { node, parent }) = self.open.pop() else {
            return;
        };
        if keep {
            parent.borrow_mut().append_child(node);
        }
    }

    pub fn vars(&self) -> &Value {
        &self.vars
    }

    pub fn vars_mut(&mut self) -> &mut Value {
        &mut self.vars
    }

    /// Replaces the vars mapping wholesale; no merging.
    pub fn set_vars(&mut self, vars: Value) {
        self.vars = vars;
    }
}
