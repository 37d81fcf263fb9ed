//! Derive search values from resources returned by earlier searches, so that
//! follow-up searches use data the server is known to hold.

use serde_json::Value;

use crate::error::Result;
use crate::model::resource::{ParsedResource, ReferenceTarget};
use crate::model::spec::{SearchParamType, SearchParameterSpec};
use crate::path::{PathResolver, ResolvedNode};
use crate::search::date::{SearchPrefix, comparator_value};
use crate::search::predicates::coded_values;

/// `system|code` when the coding carries a system, otherwise the bare code.
pub fn token_search_value(node: &ResolvedNode<'_>) -> Option<String> {
    if let Value::Bool(b) = node.value {
        return Some(b.to_string());
    }
    let coded = coded_values(node.value);
    let preferred = coded
        .iter()
        .find(|c| c.system.is_some())
        .or_else(|| coded.first())?;
    Some(match preferred.system {
        Some(system) => format!("{system}|{}", preferred.code),
        None => preferred.code.to_string(),
    })
}

/// The date of a date-like element; Periods use their start, then their end.
pub fn date_search_value(node: &ResolvedNode<'_>) -> Option<String> {
    match node.value {
        Value::String(s) => Some(s.clone()),
        Value::Object(object) => object
            .get("start")
            .or_else(|| object.get("end"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

/// `Type/id` for literal references, the literal itself otherwise.
pub fn reference_search_value(node: &ResolvedNode<'_>) -> Option<String> {
    let literal = node.as_str().or_else(|| node.get_str("reference"))?;
    Some(
        ReferenceTarget::parse(literal)
            .map(|target| target.relative())
            .unwrap_or_else(|| literal.to_string()),
    )
}

/// First text part of a string-like element (family name before given names).
pub fn string_search_value(node: &ResolvedNode<'_>) -> Option<String> {
    match node.value {
        Value::String(s) => Some(s.clone()),
        Value::Object(object) => ["family", "text", "given", "city", "line"]
            .iter()
            .filter_map(|field| object.get(*field))
            .find_map(|part| match part {
                Value::String(s) => Some(s.clone()),
                Value::Array(items) => items.iter().find_map(Value::as_str).map(str::to_string),
                _ => None,
            }),
        _ => None,
    }
}

fn value_for(param_type: SearchParamType, node: &ResolvedNode<'_>) -> Option<String> {
    match param_type {
        SearchParamType::Token | SearchParamType::Composite => token_search_value(node),
        SearchParamType::Date => date_search_value(node),
        SearchParamType::Reference => reference_search_value(node),
        SearchParamType::String => string_search_value(node),
    }
}

/// Derive a value for `spec` from `resource`. `None` means the value cannot be
/// resolved from this resource and the dependent search should be skipped.
pub fn derive_search_value(
    resolver: &PathResolver,
    spec: &SearchParameterSpec,
    resource: &ParsedResource,
) -> Option<String> {
    let nodes = resolver.resolve_resource(resource, &spec.path);

    if spec.components.is_empty() {
        return nodes.iter().find_map(|node| value_for(spec.param_type, node));
    }

    nodes.iter().find_map(|node| {
        let parts: Option<Vec<String>> = spec
            .components
            .iter()
            .map(|component| {
                resolver
                    .resolve_node(*node, &component.path)
                    .iter()
                    .find_map(|inner| value_for(component.param_type, inner))
                    .map(|value| value.replace('$', "\\$"))
            })
            .collect();
        parts.map(|parts| parts.join("$"))
    })
}

/// Derive a value from the first resource in `resources` that has one.
pub fn derive_from_any<'a, I>(
    resolver: &PathResolver,
    spec: &SearchParameterSpec,
    resources: I,
) -> Option<String>
where
    I: IntoIterator<Item = &'a ParsedResource>,
{
    resources
        .into_iter()
        .find_map(|resource| derive_search_value(resolver, spec, resource))
}

/// Prefixed variants of a date value: `gt`, `ge`, `lt`, `le`, each excluding
/// the reference date.
pub fn comparator_search_values(date: &str) -> Result<Vec<String>> {
    [
        SearchPrefix::Gt,
        SearchPrefix::Ge,
        SearchPrefix::Lt,
        SearchPrefix::Le,
    ]
    .into_iter()
    .map(|prefix| comparator_value(prefix, date))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn observation() -> ParsedResource {
        ParsedResource::from_value(json!({
            "resourceType": "Observation",
            "id": "obs-1",
            "status": "final",
            "code": {"coding": [{"code": "local-1"}, {"system": "http://loinc.org", "code": "2708-6"}]},
            "subject": {"reference": "https://fhir.example.org/r4/Patient/85"},
            "effectivePeriod": {"start": "2020-05-05"},
            "component": [{"code": {"coding": [{"system": "http://loinc.org", "code": "8480-6"}]},
                           "valueQuantity": {"value": 120, "system": "http://unitsofmeasure.org", "code": "mm[Hg]"}}]
        }))
        .unwrap()
    }

    #[test]
    fn token_values_are_system_qualified() {
        let resolver = PathResolver::new();
        let spec = SearchParameterSpec::new("code", SearchParamType::Token, "code");
        assert_eq!(
            derive_search_value(&resolver, &spec, &observation()).as_deref(),
            Some("http://loinc.org|2708-6")
        );

        let status = SearchParameterSpec::new("status", SearchParamType::Token, "status");
        assert_eq!(
            derive_search_value(&resolver, &status, &observation()).as_deref(),
            Some("final")
        );
    }

    #[test]
    fn references_and_periods_are_normalised() {
        let resolver = PathResolver::new();
        let patient = SearchParameterSpec::new("patient", SearchParamType::Reference, "subject");
        assert_eq!(
            derive_search_value(&resolver, &patient, &observation()).as_deref(),
            Some("Patient/85")
        );

        let date = SearchParameterSpec::new("date", SearchParamType::Date, "effective");
        assert_eq!(
            derive_search_value(&resolver, &date, &observation()).as_deref(),
            Some("2020-05-05")
        );
    }

    #[test]
    fn composite_values_join_components() {
        let resolver = PathResolver::new();
        let spec = SearchParameterSpec::new(
            "component-code-value-quantity",
            SearchParamType::Composite,
            "component",
        )
        .with_component(SearchParamType::Token, "code")
        .with_component(SearchParamType::Token, "value");

        assert_eq!(
            derive_search_value(&resolver, &spec, &observation()).as_deref(),
            Some("http://loinc.org|8480-6$http://unitsofmeasure.org|mm[Hg]")
        );
    }

    #[test]
    fn unresolvable_values_yield_none() {
        let resolver = PathResolver::new();
        let spec = SearchParameterSpec::new("category", SearchParamType::Token, "category");
        assert!(derive_search_value(&resolver, &spec, &observation()).is_none());
        assert!(derive_from_any(&resolver, &spec, Vec::<&ParsedResource>::new()).is_none());
    }

    #[test]
    fn comparator_values_bracket_the_date() {
        assert_eq!(
            comparator_search_values("2020-05-05").unwrap(),
            vec!["gt2020-05-04", "ge2020-05-04", "lt2020-05-06", "le2020-05-06"]
        );
    }
}
