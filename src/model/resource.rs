use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::error::{ConformanceError, Result};

static REFERENCE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:(?P<base>https?://.+?)/)?(?P<type>[A-Z][A-Za-z]+)/(?P<id>[A-Za-z0-9\-\.]{1,64})(?:/_history/(?P<version>[A-Za-z0-9\-\.]{1,64}))?$",
    )
    .expect("reference pattern is valid")
});

/// A resource received from the server under test.
///
/// The JSON body is shared and never mutated after construction.
#[derive(Debug, Clone)]
pub struct ParsedResource {
    resource_type: String,
    id: Option<String>,
    body: Arc<Value>,
}

impl ParsedResource {
    pub fn from_value(body: Value) -> Result<Self> {
        let resource_type = body
            .get("resourceType")
            .and_then(Value::as_str)
            .ok_or_else(|| ConformanceError::invalid_resource("missing resourceType"))?
            .to_string();
        let id = body.get("id").and_then(Value::as_str).map(str::to_string);

        Ok(Self {
            resource_type,
            id,
            body: Arc::new(body),
        })
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    /// `Type/id` label used in outcome messages.
    pub fn label(&self) -> String {
        match &self.id {
            Some(id) => format!("{}/{}", self.resource_type, id),
            None => format!("{}/<no id>", self.resource_type),
        }
    }

    pub fn is_type(&self, resource_type: &str) -> bool {
        self.resource_type == resource_type
    }

    /// Look up a contained resource by its local id (without the leading `#`).
    pub fn contained(&self, local_id: &str) -> Option<&Value> {
        self.body
            .get("contained")
            .and_then(Value::as_array)?
            .iter()
            .find(|entry| entry.get("id").and_then(Value::as_str) == Some(local_id))
    }

    /// Every literal `reference` string found anywhere in the resource outside
    /// of `contained`.
    pub fn references(&self) -> Vec<&str> {
        let mut found = Vec::new();
        collect_references(&self.body, &mut found);
        found
    }
}

fn collect_references<'a>(value: &'a Value, found: &mut Vec<&'a str>) {
    match value {
        Value::Object(object) => {
            for (key, child) in object {
                if key == "reference"
                    && let Some(literal) = child.as_str()
                {
                    found.push(literal);
                } else if key != "contained" {
                    collect_references(child, found);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_references(item, found);
            }
        }
        _ => {}
    }
}

impl fmt::Display for ParsedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// A literal reference split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceTarget {
    pub base: Option<String>,
    pub resource_type: String,
    pub id: String,
    pub version: Option<String>,
}

impl ReferenceTarget {
    /// Parse `Type/id`, `Type/id/_history/v`, or an absolute URL ending in `Type/id`.
    pub fn parse(literal: &str) -> Option<Self> {
        let captures = REFERENCE_PATTERN.captures(literal.trim())?;
        Some(Self {
            base: captures.name("base").map(|m| m.as_str().to_string()),
            resource_type: captures.name("type")?.as_str().to_string(),
            id: captures.name("id")?.as_str().to_string(),
            version: captures.name("version").map(|m| m.as_str().to_string()),
        })
    }

    pub fn relative(&self) -> String {
        format!("{}/{}", self.resource_type, self.id)
    }

    pub fn is_absolute(&self) -> bool {
        self.base.is_some()
    }
}

/// Resources grouped by a logical key (usually the patient id the search was
/// issued for). Group order is preserved.
#[derive(Debug, Clone, Default)]
pub struct ResourceCollection {
    groups: IndexMap<String, Vec<ParsedResource>>,
}

impl ResourceCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_group(group: impl Into<String>, resources: Vec<ParsedResource>) -> Self {
        let mut collection = Self::new();
        collection.extend(group, resources);
        collection
    }

    pub fn push(&mut self, group: impl Into<String>, resource: ParsedResource) {
        self.groups.entry(group.into()).or_default().push(resource);
    }

    pub fn extend(&mut self, group: impl Into<String>, resources: Vec<ParsedResource>) {
        self.groups.entry(group.into()).or_default().extend(resources);
    }

    /// Merge another collection, appending to groups that already exist.
    pub fn merge(&mut self, other: ResourceCollection) {
        for (group, resources) in other.groups {
            self.extend(group, resources);
        }
    }

    pub fn group(&self, group: &str) -> &[ParsedResource] {
        self.groups.get(group).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn groups(&self) -> impl Iterator<Item = (&str, &[ParsedResource])> {
        self.groups
            .iter()
            .map(|(group, resources)| (group.as_str(), resources.as_slice()))
    }

    /// All resources across every group, ignoring group boundaries.
    pub fn iter(&self) -> impl Iterator<Item = &ParsedResource> {
        self.groups.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_relative_and_absolute_references() {
        let relative = ReferenceTarget::parse("Patient/85").unwrap();
        assert_eq!(relative.resource_type, "Patient");
        assert_eq!(relative.id, "85");
        assert!(!relative.is_absolute());

        let absolute =
            ReferenceTarget::parse("https://fhir.example.org/r4/Practitioner/p-1/_history/2")
                .unwrap();
        assert_eq!(absolute.base.as_deref(), Some("https://fhir.example.org/r4"));
        assert_eq!(absolute.relative(), "Practitioner/p-1");
        assert_eq!(absolute.version.as_deref(), Some("2"));

        assert!(ReferenceTarget::parse("#contained-1").is_none());
        assert!(ReferenceTarget::parse("urn:uuid:1234").is_none());
    }

    #[test]
    fn collects_references_outside_contained() {
        let resource = ParsedResource::from_value(json!({
            "resourceType": "MedicationRequest",
            "id": "mr-1",
            "contained": [{"resourceType": "Medication", "id": "m1",
                           "manufacturer": {"reference": "Organization/hidden"}}],
            "subject": {"reference": "Patient/85"},
            "medicationReference": {"reference": "#m1"},
            "requester": {"reference": "Practitioner/p-1", "display": "Dr. Who"}
        }))
        .unwrap();

        let mut references = resource.references();
        references.sort_unstable();
        assert_eq!(references, vec!["#m1", "Patient/85", "Practitioner/p-1"]);
        assert!(resource.contained("m1").is_some());
        assert_eq!(resource.label(), "MedicationRequest/mr-1");
    }

    #[test]
    fn rejects_body_without_resource_type() {
        assert!(ParsedResource::from_value(json!({"id": "x"})).is_err());
    }

    #[test]
    fn collection_spans_groups() {
        let make = |id: &str| {
            ParsedResource::from_value(json!({"resourceType": "Condition", "id": id})).unwrap()
        };
        let mut collection = ResourceCollection::from_group("85", vec![make("a"), make("b")]);
        collection.push("355", make("c"));

        assert_eq!(collection.len(), 3);
        assert_eq!(collection.group("355").len(), 1);
        assert_eq!(collection.group("missing").len(), 0);
        let ids: Vec<_> = collection.iter().filter_map(ParsedResource::id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
