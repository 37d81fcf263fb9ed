//! Per-type predicates deciding whether resolved values satisfy a requested
//! search value.
//!
//! Each predicate takes the nodes a parameter's path resolved to and one
//! requested alternative. Comma-joined alternatives are OR-ed by [`matches`].

use serde_json::Value;

use crate::error::Result;
use crate::model::resource::ReferenceTarget;
use crate::model::spec::{SearchParamType, SearchParameterSpec};
use crate::path::{PathResolver, ResolvedNode};
use crate::search::date::{DateRange, SearchPrefix};
use crate::search::request::{split_composite, split_multi_value};

/// A `(system, code)` pair extracted from a coded element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodedValue<'a> {
    pub system: Option<&'a str>,
    pub code: &'a str,
}

/// Extract coded values from a code, Coding, CodeableConcept, Identifier or
/// Quantity element.
pub fn coded_values<'a>(value: &'a Value) -> Vec<CodedValue<'a>> {
    match value {
        Value::String(code) => vec![CodedValue {
            system: None,
            code: code.as_str(),
        }],
        Value::Object(object) => {
            if let Some(codings) = object.get("coding").and_then(Value::as_array) {
                return codings.iter().flat_map(coded_values).collect();
            }
            let system = object.get("system").and_then(Value::as_str);
            object
                .get("code")
                .or_else(|| object.get("value"))
                .and_then(Value::as_str)
                .map(|code| vec![CodedValue { system, code }])
                .unwrap_or_default()
        }
        _ => Vec::new(),
    }
}

/// Split a token into system and code.
///
/// - `system|code` - both must match
/// - `system|` - any code in that system
/// - `|code` - code with no system
/// - `code` - code in any system
pub fn parse_token_value(value: &str) -> (Option<&str>, &str) {
    match value.split_once('|') {
        Some((system, code)) => (Some(system), code),
        None => (None, value),
    }
}

pub fn token_matches(nodes: &[ResolvedNode<'_>], requested: &str) -> bool {
    let (system, code) = parse_token_value(requested);
    let any_code = code.is_empty() && system.is_some_and(|s| !s.is_empty());
    nodes.iter().any(|node| match node.value {
        Value::Bool(b) => system.is_none() && b.to_string() == code,
        value => coded_values(value).iter().any(|coded| {
            (any_code || coded.code == code)
                && match system {
                    None => true,
                    Some("") => coded.system.is_none(),
                    Some(system) => coded.system == Some(system),
                }
        }),
    })
}

pub fn date_matches(nodes: &[ResolvedNode<'_>], requested: &str) -> Result<bool> {
    let (prefix, date) = SearchPrefix::split(requested);
    let requested_range = DateRange::parse(date)?;
    Ok(nodes.iter().any(|node| {
        DateRange::from_element(node.value)
            .is_some_and(|range| range.satisfies(prefix, &requested_range))
    }))
}

pub fn reference_matches(nodes: &[ResolvedNode<'_>], requested: &str) -> bool {
    let requested_target = ReferenceTarget::parse(requested);
    nodes.iter().any(|node| {
        let Some(literal) = node.as_str().or_else(|| node.get_str("reference")) else {
            return false;
        };
        if literal == requested {
            return true;
        }
        let Some(target) = ReferenceTarget::parse(literal) else {
            return false;
        };
        match &requested_target {
            Some(requested) => {
                requested.resource_type == target.resource_type && requested.id == target.id
            }
            None => target.id == requested,
        }
    })
}

/// Case-insensitive substring match on text and on name/address parts.
pub fn string_matches(nodes: &[ResolvedNode<'_>], requested: &str) -> bool {
    let needle = requested.to_lowercase();
    nodes
        .iter()
        .flat_map(|node| string_parts(node.value))
        .any(|part| part.to_lowercase().contains(&needle))
}

const STRING_PART_FIELDS: &[&str] = &[
    "text",
    "family",
    "given",
    "prefix",
    "suffix",
    "line",
    "city",
    "district",
    "state",
    "postalCode",
    "country",
];

fn string_parts(value: &Value) -> Vec<&str> {
    match value {
        Value::String(s) => vec![s.as_str()],
        Value::Object(object) => STRING_PART_FIELDS
            .iter()
            .filter_map(|field| object.get(*field))
            .flat_map(|part| match part {
                Value::String(s) => vec![s.as_str()],
                Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
                _ => Vec::new(),
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Apply the predicate for `param_type` to one requested alternative.
pub fn value_matches(
    param_type: SearchParamType,
    nodes: &[ResolvedNode<'_>],
    requested: &str,
) -> Result<bool> {
    Ok(match param_type {
        SearchParamType::Token | SearchParamType::Composite => token_matches(nodes, requested),
        SearchParamType::Date => date_matches(nodes, requested)?,
        SearchParamType::Reference => reference_matches(nodes, requested),
        SearchParamType::String => string_matches(nodes, requested),
    })
}

/// Result of checking one resource against one requested parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    Matched,
    /// No alternative matched; carries the resolved values rendered as JSON.
    Mismatch { resolved: Vec<String> },
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchResult::Matched)
    }
}

/// Check `resource` against a raw requested value for `spec`.
///
/// Comma-joined alternatives are OR-ed. Composite parameters with declared
/// components split each alternative on `$` and require one node at the
/// parameter's path to satisfy every component.
pub fn matches(
    resolver: &PathResolver,
    spec: &SearchParameterSpec,
    resource: &Value,
    raw: &str,
) -> Result<MatchResult> {
    let nodes = resolver.resolve(resource, &spec.path);
    for alternative in split_multi_value(raw) {
        let matched = if spec.components.is_empty() {
            value_matches(spec.param_type, &nodes, &alternative)?
        } else {
            composite_matches(resolver, spec, &nodes, &alternative)?
        };
        if matched {
            return Ok(MatchResult::Matched);
        }
    }

    Ok(MatchResult::Mismatch {
        resolved: nodes.iter().map(|node| node.value.to_string()).collect(),
    })
}

fn composite_matches(
    resolver: &PathResolver,
    spec: &SearchParameterSpec,
    nodes: &[ResolvedNode<'_>],
    alternative: &str,
) -> Result<bool> {
    let parts = split_composite(alternative);
    if parts.len() != spec.components.len() {
        return Ok(false);
    }

    for node in nodes {
        let mut all = true;
        for (component, part) in spec.components.iter().zip(&parts) {
            let component_nodes = resolver.resolve_node(*node, &component.path);
            if !value_matches(component.param_type, &component_nodes, part)? {
                all = false;
                break;
            }
        }
        if all {
            return Ok(true);
        }
    }
    Ok(false)
}
