//! Slice membership tests.

use serde_json::Value;

use crate::model::spec::{Discriminator, FixedValue};
use crate::path::{PathResolver, ResolvedNode};

/// Finds an element belonging to a profile slice.
#[derive(Debug, Default, Clone, Copy)]
pub struct SliceDiscriminator {
    resolver: PathResolver,
}

impl SliceDiscriminator {
    pub fn new() -> Self {
        Self::default()
    }

    /// First element at `path` that satisfies `discriminator`, or `None`.
    pub fn find_slice<'a>(
        &self,
        resource: &'a Value,
        path: &str,
        discriminator: &Discriminator,
    ) -> Option<ResolvedNode<'a>> {
        self.resolver
            .find(resource, path, |candidate| self.is_member(*candidate, discriminator))
    }

    pub fn is_member(&self, candidate: ResolvedNode<'_>, discriminator: &Discriminator) -> bool {
        match discriminator {
            Discriminator::Pattern { path, code, system } => self
                .resolver
                .resolve_node(candidate, path)
                .iter()
                .any(|node| pattern_matches(node, code, system.as_deref())),
            Discriminator::FixedValues { values } => values
                .iter()
                .all(|fixed| self.fixed_value_matches(candidate, fixed)),
            Discriminator::Datatype { code } => match candidate.choice {
                Some(choice) => choice == *code,
                // Concrete property named directly, e.g. `valueQuantity`.
                None => candidate.field.len() > code.suffix().len() && candidate.field.ends_with(code.suffix()),
            },
        }
    }

    fn fixed_value_matches(&self, candidate: ResolvedNode<'_>, fixed: &FixedValue) -> bool {
        self.resolver
            .resolve_node(candidate, &fixed.path)
            .iter()
            .any(|node| node.scalar_text().as_deref() == Some(fixed.value.as_str()))
    }
}

/// Code must match; system must match only when the pattern carries one.
fn pattern_matches(node: &ResolvedNode<'_>, code: &str, system: Option<&str>) -> bool {
    let node_code = node.as_str().or_else(|| node.get_str("code"));
    node_code == Some(code)
        && system.is_none_or(|system| node.get_str("system") == Some(system))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::choice::ChoiceType;
    use serde_json::json;

    const CATEGORY_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/observation-category";

    fn vital_signs() -> Discriminator {
        Discriminator::Pattern {
            path: "coding".to_string(),
            code: "vital-signs".to_string(),
            system: Some(CATEGORY_SYSTEM.to_string()),
        }
    }

    #[test]
    fn pattern_requires_code_and_system() {
        let slicer = SliceDiscriminator::new();
        let matching = json!({"resourceType": "Observation", "category": [
            {"coding": [{"system": "http://example.org/local", "code": "vitals"}]},
            {"coding": [{"system": CATEGORY_SYSTEM, "code": "vital-signs"}]}
        ]});
        let other_system = json!({"resourceType": "Observation", "category": [
            {"coding": [{"system": "http://example.org/local", "code": "vital-signs"}]}
        ]});

        let found = slicer.find_slice(&matching, "category", &vital_signs()).unwrap();
        assert_eq!(found.field, "category");
        assert!(slicer.find_slice(&other_system, "category", &vital_signs()).is_none());
    }

    #[test]
    fn fixed_values_must_all_match() {
        let slicer = SliceDiscriminator::new();
        let patient = json!({"resourceType": "Patient", "extension": [
            {"url": "http://hl7.org/fhir/us/core/StructureDefinition/us-core-race", "valueString": "x"},
            {"url": "http://hl7.org/fhir/us/core/StructureDefinition/us-core-ethnicity", "valueString": "y"}
        ]});
        let ethnicity = Discriminator::FixedValues {
            values: vec![FixedValue {
                path: "url".to_string(),
                value: "http://hl7.org/fhir/us/core/StructureDefinition/us-core-ethnicity".to_string(),
            }],
        };
        let found = slicer.find_slice(&patient, "extension", &ethnicity).unwrap();
        assert_eq!(found.get_str("valueString"), Some("y"));

        let both = Discriminator::FixedValues {
            values: vec![
                FixedValue {
                    path: "url".to_string(),
                    value: "http://hl7.org/fhir/us/core/StructureDefinition/us-core-ethnicity".to_string(),
                },
                FixedValue {
                    path: "valueString".to_string(),
                    value: "x".to_string(),
                },
            ],
        };
        assert!(slicer.find_slice(&patient, "extension", &both).is_none());
    }

    #[test]
    fn datatype_tests_the_populated_variant() {
        let slicer = SliceDiscriminator::new();
        let quantity = json!({"resourceType": "Observation", "valueQuantity": {"value": 120}});
        let text = json!({"resourceType": "Observation", "valueString": "high"});
        let discriminator = Discriminator::Datatype {
            code: ChoiceType::Quantity,
        };

        assert!(slicer.find_slice(&quantity, "value", &discriminator).is_some());
        assert!(slicer.find_slice(&text, "value", &discriminator).is_none());
        assert!(slicer.find_slice(&quantity, "valueQuantity", &discriminator).is_some());
    }
}
