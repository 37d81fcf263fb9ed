//! Dotted path resolution over parsed resources.
//!
//! Paths are FHIRPath-like (`category.coding.code`, `effective`, `value[x]`).
//! Repeating elements fan out into one node per item, and a segment that names
//! a choice head (`effective`) resolves to whichever concrete variant
//! (`effectiveDateTime`, `effectivePeriod`, ...) is populated. A path that does
//! not exist yields an empty result, never an error.

use serde_json::Value;

use crate::model::choice::ChoiceType;
use crate::model::resource::ParsedResource;

/// One value reached by a path, tagged with the property it was read from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedNode<'a> {
    /// JSON property name the value was read from (`valueQuantity`, `coding`).
    pub field: &'a str,
    /// Concrete variant when the segment was a choice head.
    pub choice: Option<ChoiceType>,
    pub value: &'a Value,
}

impl<'a> ResolvedNode<'a> {
    pub fn root(value: &'a Value) -> Self {
        Self {
            field: "",
            choice: None,
            value,
        }
    }

    pub fn as_str(&self) -> Option<&'a str> {
        self.value.as_str()
    }

    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.value.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&'a str> {
        self.value.get(key).and_then(Value::as_str)
    }

    /// Scalar rendering used for fixed-value comparison and messages.
    pub fn scalar_text(&self) -> Option<String> {
        match self.value {
            Value::String(s) => Some(s.clone()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Stateless resolver; all methods borrow their input and never mutate it.
#[derive(Debug, Default, Clone, Copy)]
pub struct PathResolver;

impl PathResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve `path` against a single JSON element.
    pub fn resolve<'a>(&self, value: &'a Value, path: &str) -> Vec<ResolvedNode<'a>> {
        self.resolve_node(ResolvedNode::root(value), path)
    }

    /// Resolve `path` starting from an already resolved node.
    pub fn resolve_node<'a>(&self, node: ResolvedNode<'a>, path: &str) -> Vec<ResolvedNode<'a>> {
        let segments = split_path(path, node.value);
        if segments.is_empty() {
            return fan_out(node);
        }

        let mut current = vec![node];
        for segment in segments {
            current = current
                .into_iter()
                .flat_map(|node| step(node, segment))
                .collect();
            if current.is_empty() {
                break;
            }
        }
        current
    }

    pub fn resolve_resource<'a>(&self, resource: &'a ParsedResource, path: &str) -> Vec<ResolvedNode<'a>> {
        self.resolve(resource.body(), path)
    }

    /// Resolve `path` against every resource and concatenate the results.
    pub fn resolve_all<'a, I>(&self, resources: I, path: &str) -> Vec<ResolvedNode<'a>>
    where
        I: IntoIterator<Item = &'a ParsedResource>,
    {
        resources
            .into_iter()
            .flat_map(|resource| self.resolve_resource(resource, path))
            .collect()
    }

    /// First node at `path` satisfying `filter`.
    pub fn find<'a, F>(&self, value: &'a Value, path: &str, filter: F) -> Option<ResolvedNode<'a>>
    where
        F: Fn(&ResolvedNode<'a>) -> bool,
    {
        self.resolve(value, path)
            .into_iter()
            .find(|node| filter(node))
    }

    pub fn exists(&self, value: &Value, path: &str) -> bool {
        !self.resolve(value, path).is_empty()
    }
}

/// Split a path into segments, dropping a leading resource type
/// (`Observation.code` -> `code`) and `[x]` suffixes.
fn split_path<'p>(path: &'p str, root: &Value) -> Vec<&'p str> {
    let mut segments: Vec<&str> = path
        .split('.')
        .map(|s| s.trim().trim_end_matches("[x]"))
        .filter(|s| !s.is_empty())
        .collect();

    if let Some(&first) = segments.first()
        && root.get("resourceType").and_then(Value::as_str) == Some(first)
    {
        segments.remove(0);
    }
    segments
}

fn step<'a>(node: ResolvedNode<'a>, segment: &str) -> Vec<ResolvedNode<'a>> {
    let Value::Object(object) = node.value else {
        return Vec::new();
    };

    if let Some((key, child)) = object.get_key_value(segment)
        && !child.is_null()
    {
        return fan_out(ResolvedNode {
            field: key.as_str(),
            choice: None,
            value: child,
        });
    }

    match ChoiceType::populated(object, segment) {
        Some((choice, key, child)) => fan_out(ResolvedNode {
            field: key,
            choice: Some(choice),
            value: child,
        }),
        None => Vec::new(),
    }
}

fn fan_out(node: ResolvedNode<'_>) -> Vec<ResolvedNode<'_>> {
    match node.value {
        Value::Array(items) => items
            .iter()
            .filter(|item| !item.is_null())
            .map(|item| ResolvedNode { value: item, ..node })
            .collect(),
        _ => vec![node],
    }
}
