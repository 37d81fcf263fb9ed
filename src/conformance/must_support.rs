//! Must-support coverage over a whole result collection.
//!
//! Coverage is "any one": an element or slice counts as supported as soon as a
//! single resource anywhere in the collection shows it.

use serde::Serialize;

use crate::conformance::slicing::SliceDiscriminator;
use crate::model::outcome::ValidationOutcome;
use crate::model::resource::ResourceCollection;
use crate::model::spec::{MustSupportElement, MustSupportSpec, SliceDefinition};
use crate::path::PathResolver;

/// Elements and slices no resource demonstrated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MissingMustSupport {
    pub elements: Vec<String>,
    pub slices: Vec<String>,
}

impl MissingMustSupport {
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty() && self.slices.is_empty()
    }

    /// Pass when nothing is missing, otherwise skip: the server may support
    /// the element even though no sample showed it.
    pub fn to_outcome(&self, resource_type: &str) -> ValidationOutcome {
        if self.is_empty() {
            return ValidationOutcome::pass(format!(
                "All must-support elements and slices were found in {resource_type} resources"
            ));
        }
        let missing: Vec<&str> = self
            .elements
            .iter()
            .chain(&self.slices)
            .map(String::as_str)
            .collect();
        ValidationOutcome::skip(format!(
            "Could not find {} in the {resource_type} resources returned",
            missing.join(", ")
        ))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MustSupportTracker {
    resolver: PathResolver,
    slicer: SliceDiscriminator,
}

impl MustSupportTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report the elements and slices of `spec` absent from every resource in
    /// `collection`, ignoring grouping.
    pub fn coverage(&self, collection: &ResourceCollection, spec: &MustSupportSpec) -> MissingMustSupport {
        let elements = spec
            .elements
            .iter()
            .filter(|element| !collection.iter().any(|r| self.element_present(r.body(), element)))
            .map(|element| match &element.fixed_value {
                Some(value) => format!("{}:{}", element.path, value),
                None => element.path.clone(),
            })
            .collect();

        let slices = spec
            .slices
            .iter()
            .filter(|slice| !collection.iter().any(|r| self.slice_present(r.body(), slice)))
            .map(|slice| slice.name.clone())
            .collect();

        let missing = MissingMustSupport { elements, slices };
        tracing::debug!(
            "must-support coverage over {} resources: {} elements, {} slices missing",
            collection.len(),
            missing.elements.len(),
            missing.slices.len()
        );
        missing
    }

    fn element_present(&self, body: &serde_json::Value, element: &MustSupportElement) -> bool {
        match &element.fixed_value {
            None => self.resolver.exists(body, &element.path),
            Some(value) => self
                .resolver
                .find(body, &element.path, |node| node.scalar_text().as_deref() == Some(value.as_str()))
                .is_some(),
        }
    }

    fn slice_present(&self, body: &serde_json::Value, slice: &SliceDefinition) -> bool {
        self.slicer
            .find_slice(body, &slice.path, &slice.discriminator)
            .is_some()
    }
}
