//! Checks for resources returned inline through `_revinclude` and `_include`.

use std::collections::BTreeSet;

use crate::client::CapabilityStatement;
use crate::model::outcome::ValidationOutcome;
use crate::model::resource::{ParsedResource, ReferenceTarget};
use crate::path::PathResolver;

pub const PROVENANCE_REVINCLUDE: &str = "Provenance:target";

fn relative_key(resource: &ParsedResource) -> Option<String> {
    resource
        .id()
        .map(|id| format!("{}/{}", resource.resource_type(), id))
}

/// `_revinclude=Provenance:target`: returned Provenance resources must target
/// at least one of the matched resources. No Provenance at all is a skip.
pub fn check_provenance_revinclude(
    resolver: &PathResolver,
    resources: &[ParsedResource],
    included: &[ParsedResource],
) -> ValidationOutcome {
    let provenances: Vec<&ParsedResource> = included
        .iter()
        .filter(|r| r.is_type("Provenance"))
        .collect();
    if provenances.is_empty() {
        return ValidationOutcome::skip(format!(
            "No Provenance resources were returned with _revinclude={PROVENANCE_REVINCLUDE}"
        ));
    }

    let returned: BTreeSet<String> = resources.iter().filter_map(relative_key).collect();
    let targeted: BTreeSet<String> = provenances
        .iter()
        .flat_map(|provenance| resolver.resolve_resource(provenance, "target.reference"))
        .filter_map(|node| node.as_str())
        .filter_map(ReferenceTarget::parse)
        .map(|target| target.relative())
        .filter(|key| returned.contains(key))
        .collect();

    if targeted.is_empty() {
        ValidationOutcome::fail(format!(
            "{} Provenance resources were returned but none targets a returned resource",
            provenances.len()
        ))
    } else {
        ValidationOutcome::pass(format!(
            "{} Provenance resources target {} returned resources",
            provenances.len(),
            targeted.len()
        ))
    }
}

/// `_include={include}`: every `target_type` reference found at `path` in
/// `resources` must be returned inline. No such reference is a skip, as is an
/// include the CapabilityStatement does not list for its source type.
pub fn check_include(
    resolver: &PathResolver,
    capabilities: Option<&CapabilityStatement>,
    resources: &[ParsedResource],
    included: &[ParsedResource],
    include: &str,
    path: &str,
    target_type: &str,
) -> ValidationOutcome {
    let source_type = include.split_once(':').map_or(include, |(source, _)| source);
    if let Some(capabilities) = capabilities
        && !capabilities.documents_search_include(source_type, include)
    {
        return ValidationOutcome::skip(format!(
            "_include={include} is not documented in the CapabilityStatement; not checked"
        ));
    }

    let referenced: BTreeSet<String> = resolver
        .resolve_all(resources, path)
        .iter()
        .filter_map(|node| node.as_str().or_else(|| node.get_str("reference")))
        .filter_map(ReferenceTarget::parse)
        .filter(|target| target.resource_type == target_type)
        .map(|target| target.relative())
        .collect();
    if referenced.is_empty() {
        return ValidationOutcome::skip(format!(
            "No {target_type} references at {path}; _include could not be checked"
        ));
    }

    let inlined: BTreeSet<String> = included
        .iter()
        .filter(|r| r.is_type(target_type))
        .filter_map(relative_key)
        .collect();
    let missing: Vec<&str> = referenced
        .iter()
        .filter(|key| !inlined.contains(*key))
        .map(String::as_str)
        .collect();

    if missing.is_empty() {
        ValidationOutcome::pass(format!(
            "All {} referenced {target_type} resources were included",
            referenced.len()
        ))
    } else {
        ValidationOutcome::fail(format!(
            "Referenced {target_type} resources were not included: {}",
            missing.join(", ")
        ))
    }
}
