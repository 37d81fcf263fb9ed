// Integration tests for must-support coverage, profile validation and bindings

mod common;

use async_trait::async_trait;
use octofhir_conformance::terminology::{CodeValidationResult, TerminologyResult};
use octofhir_conformance::*;
use serde_json::json;
use std::sync::Arc;

const BP_PROFILE: &str = r#"{
    "resourceType": "Observation",
    "profileUrl": "http://hl7.org/fhir/StructureDefinition/bp",
    "mandatoryElements": ["status", "category", "code", "subject"],
    "bindings": [
        {
            "path": "status",
            "type": "code",
            "strength": "required",
            "valueSet": "http://hl7.org/fhir/ValueSet/observation-status"
        },
        {
            "path": "interpretation",
            "type": "CodeableConcept",
            "strength": "extensible",
            "valueSet": "http://hl7.org/fhir/ValueSet/observation-interpretation",
            "codeSystem": "http://terminology.hl7.org/CodeSystem/v3-ObservationInterpretation"
        }
    ],
    "mustSupport": {
        "elements": [
            {"path": "status"},
            {"path": "effective"},
            {"path": "component.code.coding.code", "fixedValue": "8480-6"}
        ],
        "slices": [
            {
                "name": "Observation.category:VSCat",
                "path": "category",
                "discriminator": {"type": "pattern", "path": "coding", "code": "vital-signs"}
            },
            {
                "name": "Observation.component:diastolic",
                "path": "component",
                "discriminator": {
                    "type": "fixedValues",
                    "values": [{"path": "code.coding.code", "value": "8462-4"}]
                }
            }
        ]
    }
}"#;

fn blood_pressure(id: &str, status: &str, components: &[&str]) -> ParsedResource {
    ParsedResource::from_value(json!({
        "resourceType": "Observation",
        "id": id,
        "status": status,
        "category": [{"coding": [{
            "system": "http://terminology.hl7.org/CodeSystem/observation-category",
            "code": "vital-signs"
        }]}],
        "code": {"coding": [{"system": "http://loinc.org", "code": "85354-9"}]},
        "subject": {"reference": "Patient/85"},
        "effectiveDateTime": "2020-05-05",
        "component": components
            .iter()
            .map(|code| json!({
                "code": {"coding": [{"system": "http://loinc.org", "code": code}]},
                "valueQuantity": {"value": 120, "unit": "mm[Hg]"}
            }))
            .collect::<Vec<_>>()
    }))
    .unwrap()
}

fn terminology() -> InMemoryTerminologyService {
    let mut service = InMemoryTerminologyService::new();
    service.add_codes(
        "http://hl7.org/fhir/ValueSet/observation-status",
        &[("final", None), ("amended", None), ("preliminary", None)],
    );
    service.add_code(
        "http://hl7.org/fhir/ValueSet/observation-interpretation",
        "N",
        Some("http://terminology.hl7.org/CodeSystem/v3-ObservationInterpretation"),
        Some("Normal"),
    );
    service.add_system_code(
        "http://terminology.hl7.org/CodeSystem/v3-ObservationInterpretation",
        "HX",
    );
    service
}

#[test]
fn test_must_support_is_satisfied_across_groups() {
    let profile = ProfileSpec::from_json(BP_PROFILE).unwrap();

    let mut collection = ResourceCollection::new();
    collection.push("85", blood_pressure("a", "final", &["8480-6"]));
    collection.push("355", blood_pressure("b", "final", &["8462-4"]));

    let missing = MustSupportTracker::new().coverage(&collection, &profile.must_support);
    assert!(missing.is_empty(), "unexpected gaps: {missing:?}");
}

#[test]
fn test_must_support_reports_missing_slices_and_fixed_values() {
    let profile = ProfileSpec::from_json(BP_PROFILE).unwrap();
    let collection = ResourceCollection::from_group("85", vec![blood_pressure("a", "final", &["8867-4"])]);

    let missing = MustSupportTracker::new().coverage(&collection, &profile.must_support);
    assert_eq!(missing.elements, vec!["component.code.coding.code:8480-6"]);
    assert_eq!(missing.slices, vec!["Observation.component:diastolic"]);
    assert_eq!(missing.to_outcome("Observation").kind, OutcomeKind::Skip);
}

#[tokio::test]
async fn test_mandatory_elements_and_required_binding() -> Result<()> {
    let profile = ProfileSpec::from_json(BP_PROFILE)?;
    let terminology = terminology();
    let validator = MandatoryElementValidator::new();
    let checker = ConformanceProfileChecker::new(&validator, Some(&terminology));

    let mut incomplete = blood_pressure("no-subject", "final", &["8480-6"]).body().clone();
    incomplete.as_object_mut().unwrap().remove("subject");
    let collection = ResourceCollection::from_group(
        "85",
        vec![
            blood_pressure("ok", "final", &["8480-6"]),
            blood_pressure("bad-status", "made-up", &["8480-6"]),
            ParsedResource::from_value(incomplete)?,
        ],
    );

    let report = checker.check(&profile, &collection).await;
    let failures: Vec<&str> = report.failures().map(|o| o.message.as_str()).collect();
    assert_eq!(failures.len(), 2, "{failures:?}");
    assert!(failures.iter().any(|m| m.contains("Observation/no-subject")
        && m.contains("Observation.subject")
        && m.contains("minimum required = 1")));
    assert!(failures.iter().any(|m| m.starts_with("1 resources have no code from required ValueSet")
        && m.contains("Observation/bad-status")));
    assert_eq!(report.verdict(), OutcomeKind::Fail);
    Ok(())
}

#[tokio::test]
async fn test_extensible_binding_falls_back_to_the_code_system() -> Result<()> {
    let profile = ProfileSpec::from_json(BP_PROFILE)?;
    let terminology = terminology();

    let mut in_value_set = blood_pressure("normal", "final", &["8480-6"]).body().clone();
    in_value_set["interpretation"] = json!([{"coding": [{
        "system": "http://terminology.hl7.org/CodeSystem/v3-ObservationInterpretation",
        "code": "N"
    }]}]);
    let mut in_code_system = in_value_set.clone();
    in_code_system["id"] = json!("high");
    in_code_system["interpretation"][0]["coding"][0]["code"] = json!("HX");
    let mut unknown = in_value_set.clone();
    unknown["id"] = json!("local");
    unknown["interpretation"] = json!([{"coding": [{"system": "http://example.org/local", "code": "weird"}]}]);

    let collection = ResourceCollection::from_group(
        "85",
        vec![
            ParsedResource::from_value(in_value_set)?,
            ParsedResource::from_value(in_code_system)?,
            ParsedResource::from_value(unknown)?,
        ],
    );

    let validator = MandatoryElementValidator::new();
    let checker = ConformanceProfileChecker::new(&validator, Some(&terminology));
    let outcomes = checker.check_bindings(&profile.bindings[1..], &collection).await;

    let warnings: Vec<&str> = outcomes
        .iter()
        .filter(|o| o.kind == OutcomeKind::Warn)
        .map(|o| o.message.as_str())
        .collect();
    assert_eq!(warnings.len(), 2, "{warnings:?}");
    assert!(warnings.iter().any(|m| m.contains("but defined in") && m.contains("Observation/high")));
    assert!(warnings.iter().any(|m| m.contains("nor code system") && m.contains("Observation/local")));
    assert!(outcomes.iter().all(|o| o.kind != OutcomeKind::Fail));
    Ok(())
}

#[tokio::test]
async fn test_extensible_binding_with_an_unknown_value_set_warns() -> Result<()> {
    let mut profile = ProfileSpec::from_json(BP_PROFILE)?;
    let mut binding = profile.bindings.remove(1);
    binding.value_set = "http://example.org/ValueSet/not-loaded".to_string();
    let terminology = terminology();

    let mut interpreted = blood_pressure("high", "final", &["8480-6"]).body().clone();
    interpreted["interpretation"] = json!([{"coding": [{
        "system": "http://terminology.hl7.org/CodeSystem/v3-ObservationInterpretation",
        "code": "HX"
    }]}]);
    let collection = ResourceCollection::from_group("85", vec![ParsedResource::from_value(interpreted)?]);

    let validator = MandatoryElementValidator::new();
    let checker = ConformanceProfileChecker::new(&validator, Some(&terminology));
    let outcomes = checker.check_bindings(&[binding], &collection).await;

    assert_eq!(outcomes.len(), 1, "{outcomes:?}");
    assert_eq!(outcomes[0].kind, OutcomeKind::Warn);
    assert!(outcomes[0].message.contains("http://example.org/ValueSet/not-loaded is unknown"));
    assert!(outcomes[0].message.contains("extensible binding at interpretation"));
    Ok(())
}

/// A terminology server that is down for every lookup.
struct UnavailableTerminology;

#[async_trait]
impl TerminologyService for UnavailableTerminology {
    async fn validate_code(
        &self,
        _value_set_url: &str,
        _code: &str,
        _system: Option<&str>,
    ) -> TerminologyResult<CodeValidationResult> {
        Err(TerminologyError::ServiceUnavailable {
            message: "connection refused".to_string(),
        })
    }

    async fn code_system_contains(&self, _system_url: &str, _code: &str) -> TerminologyResult<CodeValidationResult> {
        Err(TerminologyError::ServiceUnavailable {
            message: "connection refused".to_string(),
        })
    }
}

#[tokio::test]
async fn test_terminology_lookup_errors_are_warnings() -> Result<()> {
    let profile = ProfileSpec::from_json(BP_PROFILE)?;
    let validator = MandatoryElementValidator::new();
    let checker = ConformanceProfileChecker::new(&validator, Some(&UnavailableTerminology));
    let collection = ResourceCollection::from_group(
        "85",
        vec![
            blood_pressure("a", "made-up", &["8480-6"]),
            blood_pressure("b", "final", &["8480-6"]),
        ],
    );

    let outcomes = checker.check_bindings(&profile.bindings[..1], &collection).await;
    assert_eq!(outcomes.len(), 1, "{outcomes:?}");
    assert_eq!(outcomes[0].kind, OutcomeKind::Warn);
    assert_eq!(
        outcomes[0].message,
        "Could not check required binding at status: Terminology service unavailable: connection refused"
    );
    Ok(())
}

#[tokio::test]
async fn test_bindings_are_skipped_without_terminology() -> Result<()> {
    let profile = ProfileSpec::from_json(BP_PROFILE)?;
    let validator = MandatoryElementValidator::new();
    let checker = ConformanceProfileChecker::new(&validator, None);
    let collection = ResourceCollection::from_group("85", vec![blood_pressure("a", "final", &[])]);

    let outcomes = checker.check_bindings(&profile.bindings, &collection).await;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].kind, OutcomeKind::Skip);
    Ok(())
}

/// Reports every resource lacking a performer as a warning.
struct PerformerAdvisor;

#[async_trait]
impl StructuralValidator for PerformerAdvisor {
    async fn validate(&self, resource: &ParsedResource, _profile: &ProfileSpec) -> Result<Vec<StructuralFinding>> {
        if resource.body().get("performer").is_some() {
            return Ok(Vec::new());
        }
        Ok(vec![StructuralFinding::warning(
            "Observation.performer",
            "performer is recommended",
        )])
    }
}

#[tokio::test]
async fn test_session_uses_a_custom_structural_validator() -> Result<()> {
    let mut profile = ProfileSpec::from_json(BP_PROFILE)?;
    // Keep only the status binding; the samples carry no interpretation.
    profile.bindings.truncate(1);
    let session = SessionContext::builder(Arc::new(common::MockFhirClient::new()))
        .with_structural_validator(Arc::new(PerformerAdvisor))
        .with_terminology(Arc::new(terminology()))
        .build()?;

    let collection = ResourceCollection::from_group("85", vec![blood_pressure("a", "final", &["8480-6"])]);
    let report = ConformanceProfileChecker::from_session(&session)
        .check(&profile, &collection)
        .await;

    assert_eq!(report.count(OutcomeKind::Fail), 0);
    assert_eq!(report.count(OutcomeKind::Warn), 1);
    assert_eq!(report.verdict(), OutcomeKind::Warn);
    Ok(())
}

#[tokio::test]
async fn test_cached_terminology_answers_repeat_lookups() -> Result<()> {
    let profile = ProfileSpec::from_json(BP_PROFILE)?;
    let cached = CachedTerminologyService::new(Arc::new(terminology()), CacheConfig::default());
    let validator = MandatoryElementValidator::new();
    let checker = ConformanceProfileChecker::new(&validator, Some(&cached));

    let collection = ResourceCollection::from_group(
        "85",
        (0..5)
            .map(|i| blood_pressure(&format!("o{i}"), "final", &["8480-6"]))
            .collect(),
    );
    let outcomes = checker.check_bindings(&profile.bindings[..1], &collection).await;

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].kind, OutcomeKind::Pass);
    assert_eq!(cached.entry_count().await, 1);
    Ok(())
}
