//! Profile conformance and terminology bindings.
//!
//! Structural conformance is delegated to a [`StructuralValidator`] whose
//! findings are reported as-is. Bindings are checked here: required bindings
//! fail, extensible bindings fall back to a code system check and only warn,
//! and a failed terminology lookup always becomes a warning carrying the
//! lookup error. A ValueSet the service does not know is reported once as a
//! warning instead of counting every coded resource as invalid.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::outcome::{CheckReport, ValidationOutcome};
use crate::model::resource::{ParsedResource, ResourceCollection};
use crate::model::spec::{Binding, BindingStrength, ProfileSpec};
use crate::path::PathResolver;
use crate::search::predicates::{CodedValue, coded_values};
use crate::session::SessionContext;
use crate::terminology::{TerminologyError, TerminologyService};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingSeverity {
    Error,
    Warning,
    Information,
}

/// One issue raised by a structural validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralFinding {
    pub severity: FindingSeverity,
    pub location: Option<String>,
    pub message: String,
}

impl StructuralFinding {
    pub fn error(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: FindingSeverity::Error,
            location: Some(location.into()),
            message: message.into(),
        }
    }

    pub fn warning(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: FindingSeverity::Warning,
            location: Some(location.into()),
            message: message.into(),
        }
    }
}

/// External validator for cardinality and structural profile rules.
#[async_trait]
pub trait StructuralValidator: Send + Sync {
    async fn validate(&self, resource: &ParsedResource, profile: &ProfileSpec) -> Result<Vec<StructuralFinding>>;
}

/// Checks that every mandatory element path of the profile is populated.
#[derive(Debug, Default, Clone, Copy)]
pub struct MandatoryElementValidator {
    resolver: PathResolver,
}

impl MandatoryElementValidator {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StructuralValidator for MandatoryElementValidator {
    async fn validate(&self, resource: &ParsedResource, profile: &ProfileSpec) -> Result<Vec<StructuralFinding>> {
        let mut findings = Vec::new();
        if !resource.is_type(&profile.resource_type) {
            findings.push(StructuralFinding::error(
                resource.resource_type(),
                format!("expected a {} resource", profile.resource_type),
            ));
            return Ok(findings);
        }

        for path in &profile.mandatory_elements {
            if !self.resolver.exists(resource.body(), path) {
                findings.push(StructuralFinding::error(
                    format!("{}.{}", profile.resource_type, path),
                    "minimum required = 1, but only found 0",
                ));
            }
        }
        Ok(findings)
    }
}

enum Membership {
    Member,
    NotMember,
    LookupFailed(TerminologyError),
}

/// Tallies for one binding across a collection.
#[derive(Default)]
struct BindingTally {
    checked: usize,
    invalid: Vec<String>,
    fallback_found: Vec<String>,
    lookup_errors: Vec<String>,
    unknown_value_set: bool,
}

impl BindingTally {
    fn lookup_failed(&mut self, error: TerminologyError) {
        let text = error.to_string();
        if !self.lookup_errors.contains(&text) {
            self.lookup_errors.push(text);
        }
    }
}

pub struct ConformanceProfileChecker<'a> {
    resolver: PathResolver,
    validator: &'a dyn StructuralValidator,
    terminology: Option<&'a dyn TerminologyService>,
}

impl<'a> ConformanceProfileChecker<'a> {
    pub fn new(validator: &'a dyn StructuralValidator, terminology: Option<&'a dyn TerminologyService>) -> Self {
        Self {
            resolver: PathResolver::new(),
            validator,
            terminology,
        }
    }

    pub fn from_session(session: &'a SessionContext) -> Self {
        Self::new(
            session.structural_validator.as_ref(),
            session.terminology.as_deref(),
        )
    }

    /// Profile conformance followed by every binding of `profile`.
    pub async fn check(&self, profile: &ProfileSpec, collection: &ResourceCollection) -> CheckReport {
        let mut report = CheckReport::new(format!("{} conformance", profile.profile_url));
        report.extend(self.check_profile(profile, collection).await);
        if !collection.is_empty() {
            report.extend(self.check_bindings(&profile.bindings, collection).await);
        }
        report
    }

    /// Run the structural validator over every resource of the profile's
    /// type and report its findings verbatim.
    pub async fn check_profile(&self, profile: &ProfileSpec, collection: &ResourceCollection) -> Vec<ValidationOutcome> {
        let resources: Vec<&ParsedResource> = collection
            .iter()
            .filter(|r| r.is_type(&profile.resource_type))
            .collect();
        if resources.is_empty() {
            return vec![ValidationOutcome::skip(format!(
                "No {} resources to validate against {}",
                profile.resource_type, profile.profile_url
            ))];
        }

        let mut outcomes = Vec::new();
        let mut failed = 0;
        for resource in &resources {
            let findings = match self.validator.validate(resource, profile).await {
                Ok(findings) => findings,
                Err(e) => {
                    failed += 1;
                    outcomes.push(ValidationOutcome::fail(format!(
                        "{} could not be validated against {}: {e}",
                        resource.label(),
                        profile.profile_url
                    )));
                    continue;
                }
            };

            let mut resource_failed = false;
            for finding in findings {
                let text = match &finding.location {
                    Some(location) => format!("{}: {}: {}", resource.label(), location, finding.message),
                    None => format!("{}: {}", resource.label(), finding.message),
                };
                match finding.severity {
                    FindingSeverity::Error => {
                        resource_failed = true;
                        outcomes.push(ValidationOutcome::fail(text));
                    }
                    FindingSeverity::Warning => outcomes.push(ValidationOutcome::warn(text)),
                    FindingSeverity::Information => {}
                }
            }
            if resource_failed {
                failed += 1;
            }
        }

        if failed == 0 {
            outcomes.push(ValidationOutcome::pass(format!(
                "{} {} resources conform to {}",
                resources.len(),
                profile.resource_type,
                profile.profile_url
            )));
        }
        tracing::info!(
            "{}: {} of {} resources failed profile validation",
            profile.profile_url,
            failed,
            resources.len()
        );
        outcomes
    }

    /// Check each binding over the whole collection.
    pub async fn check_bindings(&self, bindings: &[Binding], collection: &ResourceCollection) -> Vec<ValidationOutcome> {
        if bindings.is_empty() {
            return Vec::new();
        }
        let Some(terminology) = self.terminology else {
            return vec![ValidationOutcome::skip(
                "No terminology service configured; bindings were not checked",
            )];
        };

        let mut outcomes = Vec::new();
        for binding in bindings {
            let tally = self.tally_binding(terminology, binding, collection).await;
            outcomes.extend(binding_outcomes(binding, &tally));
        }
        outcomes
    }

    async fn tally_binding(
        &self,
        terminology: &dyn TerminologyService,
        binding: &Binding,
        collection: &ResourceCollection,
    ) -> BindingTally {
        let mut tally = BindingTally::default();

        for resource in collection.iter() {
            let nodes = self.resolver.resolve_resource(resource, &binding.path);
            let coded: Vec<CodedValue<'_>> = nodes.iter().flat_map(|n| coded_values(n.value)).collect();
            if coded.is_empty() {
                continue;
            }
            tally.checked += 1;
            if tally.checked == 1 && !value_set_known(terminology, &binding.value_set).await {
                tally.unknown_value_set = true;
                break;
            }

            match value_set_membership(terminology, &binding.value_set, &coded).await {
                Membership::Member => continue,
                Membership::LookupFailed(e) => {
                    tally.lookup_failed(e);
                    continue;
                }
                Membership::NotMember => {}
            }

            if binding.strength == BindingStrength::Required {
                tally.invalid.push(resource.label());
                continue;
            }

            let Some(code_system) = &binding.code_system else {
                tally.invalid.push(resource.label());
                continue;
            };
            match code_system_membership(terminology, code_system, &coded).await {
                Membership::Member => tally.fallback_found.push(resource.label()),
                Membership::NotMember => tally.invalid.push(resource.label()),
                Membership::LookupFailed(e) => tally.lookup_failed(e),
            }
        }
        tally
    }
}

/// An unknown ValueSet cannot tell "not a member" from "not defined", so the
/// binding is not checked. Other existence errors leave membership to decide.
async fn value_set_known(terminology: &dyn TerminologyService, value_set: &str) -> bool {
    match terminology.value_set_exists(value_set).await {
        Ok(exists) => exists,
        Err(e) if e.is_unknown_terminology() => false,
        Err(e) => {
            tracing::debug!("Could not confirm ValueSet {}: {}", value_set, e);
            true
        }
    }
}

async fn value_set_membership(
    terminology: &dyn TerminologyService,
    value_set: &str,
    coded: &[CodedValue<'_>],
) -> Membership {
    let mut lookup_error = None;
    for value in coded {
        match terminology.validate_code(value_set, value.code, value.system).await {
            Ok(result) if result.valid => return Membership::Member,
            Ok(_) => {}
            Err(e) => lookup_error = Some(e),
        }
    }
    lookup_error.map_or(Membership::NotMember, Membership::LookupFailed)
}

/// Only codings in `code_system`, or without a system, are considered.
async fn code_system_membership(
    terminology: &dyn TerminologyService,
    code_system: &str,
    coded: &[CodedValue<'_>],
) -> Membership {
    let mut lookup_error = None;
    for value in coded.iter().filter(|v| v.system.is_none_or(|s| s == code_system)) {
        match terminology.code_system_contains(code_system, value.code).await {
            Ok(result) if result.valid => return Membership::Member,
            Ok(_) => {}
            Err(e) => lookup_error = Some(e),
        }
    }
    lookup_error.map_or(Membership::NotMember, Membership::LookupFailed)
}

fn binding_outcomes(binding: &Binding, tally: &BindingTally) -> Vec<ValidationOutcome> {
    let mut outcomes: Vec<ValidationOutcome> = tally
        .lookup_errors
        .iter()
        .map(|error| {
            tracing::warn!("Terminology lookup for {} failed: {}", binding.path, error);
            ValidationOutcome::warn(format!(
                "Could not check {} binding at {}: {error}",
                binding_label(binding),
                binding.path
            ))
        })
        .collect();

    if tally.unknown_value_set {
        outcomes.push(ValidationOutcome::warn(format!(
            "ValueSet {} is unknown to the terminology service; {} binding at {} was not checked",
            binding.value_set,
            binding_label(binding),
            binding.path
        )));
        return outcomes;
    }
    if tally.checked == 0 {
        outcomes.push(ValidationOutcome::skip(format!(
            "No coded values found at {} for {} binding",
            binding.path,
            binding_label(binding)
        )));
        return outcomes;
    }

    match binding.strength {
        BindingStrength::Required if !tally.invalid.is_empty() => {
            outcomes.push(ValidationOutcome::fail(format!(
                "{} resources have no code from required ValueSet {} at {}: {}",
                tally.invalid.len(),
                binding.value_set,
                binding.path,
                tally.invalid.join(", ")
            )));
        }
        BindingStrength::Extensible => {
            if !tally.fallback_found.is_empty() {
                outcomes.push(ValidationOutcome::warn(format!(
                    "{} resources use codes at {} outside extensible ValueSet {} but defined in {}: {}",
                    tally.fallback_found.len(),
                    binding.path,
                    binding.value_set,
                    binding.code_system.as_deref().unwrap_or_default(),
                    tally.fallback_found.join(", ")
                )));
            }
            if !tally.invalid.is_empty() {
                let fallback = match &binding.code_system {
                    Some(code_system) => format!("nor code system {code_system}"),
                    None => "and the binding names no code system".to_string(),
                };
                outcomes.push(ValidationOutcome::warn(format!(
                    "{} resources use codes at {} not in extensible ValueSet {} {}: {}",
                    tally.invalid.len(),
                    binding.path,
                    binding.value_set,
                    fallback,
                    tally.invalid.join(", ")
                )));
            }
        }
        BindingStrength::Required => {}
    }

    if outcomes.is_empty() {
        outcomes.push(ValidationOutcome::pass(format!(
            "Codes at {} in {} resources are from ValueSet {}",
            binding.path, tally.checked, binding.value_set
        )));
    }
    outcomes
}

fn binding_label(binding: &Binding) -> &'static str {
    match binding.strength {
        BindingStrength::Required => "required",
        BindingStrength::Extensible => "extensible",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::outcome::OutcomeKind;
    use crate::terminology::InMemoryTerminologyService;
    use serde_json::json;

    const CLINICAL_VS: &str = "http://hl7.org/fhir/ValueSet/condition-clinical";
    const CLINICAL_CS: &str = "http://terminology.hl7.org/CodeSystem/condition-clinical";

    fn condition(id: &str, code: &str) -> ParsedResource {
        ParsedResource::from_value(json!({
            "resourceType": "Condition",
            "id": id,
            "clinicalStatus": {"coding": [{"system": CLINICAL_CS, "code": code}]}
        }))
        .unwrap()
    }

    fn terminology() -> InMemoryTerminologyService {
        let mut service = InMemoryTerminologyService::new();
        service.add_codes(CLINICAL_VS, &[("active", Some(CLINICAL_CS)), ("resolved", Some(CLINICAL_CS))]);
        service.add_system_code(CLINICAL_CS, "remission");
        service
    }

    fn kinds(outcomes: &[ValidationOutcome]) -> Vec<OutcomeKind> {
        outcomes.iter().map(|o| o.kind).collect()
    }

    #[tokio::test]
    async fn required_binding_failures_are_aggregated() {
        let validator = MandatoryElementValidator::new();
        let service = terminology();
        let checker = ConformanceProfileChecker::new(&validator, Some(&service));
        let collection = ResourceCollection::from_group(
            "85",
            vec![condition("c1", "active"), condition("c2", "bogus"), condition("c3", "other")],
        );

        let outcomes = checker
            .check_bindings(&[Binding::required("clinicalStatus", "CodeableConcept", CLINICAL_VS)], &collection)
            .await;
        assert_eq!(kinds(&outcomes), vec![OutcomeKind::Fail]);
        assert!(outcomes[0].message.starts_with("2 resources"));
        assert!(outcomes[0].message.contains("Condition/c2"));
    }

    #[tokio::test]
    async fn extensible_binding_falls_back_to_code_system() {
        let validator = MandatoryElementValidator::new();
        let service = terminology();
        let checker = ConformanceProfileChecker::new(&validator, Some(&service));
        let binding =
            Binding::extensible("clinicalStatus", "CodeableConcept", CLINICAL_VS).with_code_system(CLINICAL_CS);

        let fallback = ResourceCollection::from_group("85", vec![condition("c1", "remission")]);
        let outcomes = checker.check_bindings(std::slice::from_ref(&binding), &fallback).await;
        assert_eq!(kinds(&outcomes), vec![OutcomeKind::Warn]);
        assert!(outcomes[0].message.contains("but defined in"));

        let unknown = ResourceCollection::from_group("85", vec![condition("c2", "bogus")]);
        let outcomes = checker.check_bindings(std::slice::from_ref(&binding), &unknown).await;
        assert_eq!(kinds(&outcomes), vec![OutcomeKind::Warn]);
        assert!(outcomes[0].message.contains("nor code system"));

        let valid = ResourceCollection::from_group("85", vec![condition("c3", "active")]);
        let outcomes = checker.check_bindings(&[binding], &valid).await;
        assert_eq!(kinds(&outcomes), vec![OutcomeKind::Pass]);
    }

    #[tokio::test]
    async fn unknown_value_set_is_a_single_warning() {
        let validator = MandatoryElementValidator::new();
        let service = terminology();
        let checker = ConformanceProfileChecker::new(&validator, Some(&service));
        let collection =
            ResourceCollection::from_group("85", vec![condition("c1", "bogus"), condition("c2", "other")]);

        let outcomes = checker
            .check_bindings(
                &[Binding::required("clinicalStatus", "CodeableConcept", "http://example.org/vs/missing")],
                &collection,
            )
            .await;
        assert_eq!(kinds(&outcomes), vec![OutcomeKind::Warn]);
        assert!(outcomes[0].message.contains("ValueSet http://example.org/vs/missing is unknown"));
        assert!(outcomes[0].message.contains("required binding at clinicalStatus"));
    }

    #[tokio::test]
    async fn profile_findings_are_reported_verbatim() {
        let validator = MandatoryElementValidator::new();
        let checker = ConformanceProfileChecker::new(&validator, None);
        let mut profile = ProfileSpec::new("Condition", "http://example.org/StructureDefinition/condition");
        profile.mandatory_elements = vec!["clinicalStatus".to_string(), "code".to_string()];

        let collection = ResourceCollection::from_group("85", vec![condition("c1", "active")]);
        let outcomes = checker.check_profile(&profile, &collection).await;
        assert_eq!(kinds(&outcomes), vec![OutcomeKind::Fail]);
        assert_eq!(
            outcomes[0].message,
            "Condition/c1: Condition.code: minimum required = 1, but only found 0"
        );

        let outcomes = checker.check_profile(&profile, &ResourceCollection::new()).await;
        assert_eq!(kinds(&outcomes), vec![OutcomeKind::Skip]);
    }

    #[tokio::test]
    async fn bindings_skip_without_terminology() {
        let validator = MandatoryElementValidator::new();
        let checker = ConformanceProfileChecker::new(&validator, None);
        let collection = ResourceCollection::from_group("85", vec![condition("c1", "active")]);
        let outcomes = checker
            .check_bindings(&[Binding::required("clinicalStatus", "CodeableConcept", CLINICAL_VS)], &collection)
            .await;
        assert_eq!(kinds(&outcomes), vec![OutcomeKind::Skip]);
    }
}
