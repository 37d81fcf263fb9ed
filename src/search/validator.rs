//! Checks that every resource a search returned satisfies every requested
//! parameter.

use crate::client::FhirReply;
use crate::model::outcome::{CheckReport, ValidationOutcome};
use crate::model::resource::{ParsedResource, ResourceCollection};
use crate::model::spec::ProfileSpec;
use crate::search::paginator::{BundlePaginator, PaginatedResults};
use crate::search::predicates::{MatchResult, matches};
use crate::search::request::SearchRequest;
use crate::search::status_retry::{NegotiationState, StatusRetryNegotiator};
use crate::session::SessionContext;

/// Result of validating one search.
#[derive(Debug)]
pub struct SearchValidation {
    pub resource_type: String,
    /// The request as finally issued, including any negotiated status value.
    pub request: SearchRequest,
    pub state: NegotiationState,
    pub outcomes: Vec<ValidationOutcome>,
    pub resources: Vec<ParsedResource>,
    pub included: Vec<ParsedResource>,
    pub truncated: bool,
}

impl SearchValidation {
    fn new(resource_type: &str, request: &SearchRequest) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            request: request.clone(),
            state: NegotiationState::Initial,
            outcomes: Vec::new(),
            resources: Vec::new(),
            included: Vec::new(),
            truncated: false,
        }
    }

    pub fn report(&self) -> CheckReport {
        CheckReport::with_outcomes(
            format!("{}?{}", self.resource_type, self.request),
            self.outcomes.clone(),
        )
    }

    /// Returned resources grouped under `group`, for coverage checks that span
    /// several searches.
    pub fn collection(&self, group: impl Into<String>) -> ResourceCollection {
        ResourceCollection::from_group(group, self.resources.clone())
    }
}

pub struct SearchReplyValidator<'a> {
    session: &'a SessionContext,
    profile: &'a ProfileSpec,
    reject_data_absent_reasons: bool,
}

impl<'a> SearchReplyValidator<'a> {
    pub fn new(session: &'a SessionContext, profile: &'a ProfileSpec) -> Self {
        Self {
            session,
            profile,
            reject_data_absent_reasons: false,
        }
    }

    /// Leave resources carrying data-absent-reasons out of the checked set.
    pub fn rejecting_data_absent_reasons(mut self) -> Self {
        self.reject_data_absent_reasons = true;
        self
    }

    /// Issue the search (negotiating a status value on HTTP 400) and validate
    /// the reply. A negotiated status value is merged into `request`.
    pub async fn search_and_validate(&self, request: &mut SearchRequest) -> SearchValidation {
        let resource_type = self.profile.resource_type.as_str();
        let negotiator = StatusRetryNegotiator::new(
            self.session.client(),
            self.session.capabilities.as_ref(),
            &self.session.status_values,
        );

        let negotiation = match negotiator.negotiate(resource_type, request).await {
            Ok(negotiation) => negotiation,
            Err(e) => {
                let mut validation = SearchValidation::new(resource_type, request);
                validation.outcomes.push(ValidationOutcome::fail(format!(
                    "Search {resource_type}?{request} failed: {e}"
                )));
                return validation;
            }
        };

        if negotiation.state == (NegotiationState::StatusRetried { matched: None })
            && negotiation.reply.status != 200
        {
            let mut validation = SearchValidation::new(resource_type, request);
            validation.state = negotiation.state;
            validation.outcomes = negotiation.outcomes;
            validation.outcomes.push(ValidationOutcome::skip(format!(
                "No {resource_type} resources found for {request} after retrying with every status value"
            )));
            return validation;
        }

        // A rejected reply the negotiator already failed is reported once.
        if negotiation.reply.status != 200
            && negotiation.outcomes.iter().any(ValidationOutcome::is_fail)
        {
            let mut validation = SearchValidation::new(resource_type, request);
            validation.state = negotiation.state;
            validation.outcomes = negotiation.outcomes;
            return validation;
        }

        let mut validation = self.validate(request, &negotiation.reply).await;
        validation.state = negotiation.state;
        let mut outcomes = negotiation.outcomes;
        outcomes.append(&mut validation.outcomes);
        validation.outcomes = outcomes;
        validation
    }

    /// Validate a reply already obtained for `request`, following its
    /// pagination links.
    pub async fn validate(&self, request: &SearchRequest, reply: &FhirReply) -> SearchValidation {
        let resource_type = self.profile.resource_type.as_str();
        let mut validation = SearchValidation::new(resource_type, request);

        if reply.status != 200 {
            validation.outcomes.push(ValidationOutcome::fail(format!(
                "Search {resource_type}?{request} returned HTTP {}, expected 200",
                reply.status
            )));
            return validation;
        }
        if !reply.is_bundle() {
            validation.outcomes.push(ValidationOutcome::fail(format!(
                "Search {resource_type}?{request} returned {} instead of a Bundle",
                reply.resource_type().unwrap_or("no resource")
            )));
            return validation;
        }

        let mut paginator = BundlePaginator::new(self.session.client(), self.session.config.limits.max_pages);
        if self.reject_data_absent_reasons {
            paginator = paginator.rejecting_data_absent_reasons();
        }
        let PaginatedResults {
            resources,
            included,
            filtered,
            truncated,
            outcomes,
            pages_fetched,
        } = paginator.fetch_all(reply, resource_type).await;

        tracing::debug!(
            "{}?{}: {} resources, {} included, {} filtered over {} pages",
            resource_type,
            request,
            resources.len(),
            included.len(),
            filtered,
            pages_fetched
        );

        validation.outcomes = outcomes;
        validation.truncated = truncated;
        self.record_delayed_references(resources.iter().chain(&included));

        if resources.is_empty() {
            validation.outcomes.push(ValidationOutcome::skip(format!(
                "No {resource_type} resources found for {request}"
            )));
        } else {
            validation
                .outcomes
                .extend(self.check_resources(request, &resources));
        }

        validation.resources = resources;
        validation.included = included;
        validation
    }

    /// Check each resource against each non-control parameter of `request`.
    ///
    /// Every resource failing one or more parameters yields exactly one
    /// failure listing all of its mismatches.
    pub fn check_resources(&self, request: &SearchRequest, resources: &[ParsedResource]) -> Vec<ValidationOutcome> {
        let resolver = &self.session.resolver;
        let mut outcomes = Vec::new();
        let mut checked = Vec::new();

        for (name, value) in request.matching_params() {
            match self.profile.search_parameter(name) {
                Some(spec) => checked.push((spec, value)),
                None => outcomes.push(ValidationOutcome::skip(format!(
                    "No search parameter definition for {name} on {}; its values were not checked",
                    self.profile.resource_type
                ))),
            }
        }

        let mut invalid_params = Vec::new();
        let mut failures = 0;
        for resource in resources {
            let mut mismatches = Vec::new();
            for (spec, value) in &checked {
                if invalid_params.contains(&spec.name) {
                    continue;
                }
                match matches(resolver, spec, resource.body(), value) {
                    Ok(MatchResult::Matched) => {}
                    Ok(MatchResult::Mismatch { resolved }) if resolved.is_empty() => {
                        mismatches.push(format!("{}={} (nothing at {})", spec.name, value, spec.path))
                    }
                    Ok(MatchResult::Mismatch { resolved }) => mismatches.push(format!(
                        "{}={} (found [{}] at {})",
                        spec.name,
                        value,
                        resolved.join(", "),
                        spec.path
                    )),
                    Err(e) => {
                        outcomes.push(ValidationOutcome::skip(format!(
                            "Requested {}={} cannot be compared: {e}",
                            spec.name, value
                        )));
                        invalid_params.push(spec.name.clone());
                    }
                }
            }
            if !mismatches.is_empty() {
                failures += 1;
                outcomes.push(ValidationOutcome::fail(format!(
                    "{} does not match the search: {}",
                    resource.label(),
                    mismatches.join("; ")
                )));
            }
        }

        if failures == 0 && !checked.is_empty() {
            outcomes.push(ValidationOutcome::pass(format!(
                "All {} {} resources match {}",
                resources.len(),
                self.profile.resource_type,
                request
            )));
        }
        tracing::info!(
            "{}?{}: {} of {} resources failed",
            self.profile.resource_type,
            request,
            failures,
            resources.len()
        );
        outcomes
    }

    fn record_delayed_references<'r>(&self, resources: impl Iterator<Item = &'r ParsedResource>) {
        for resource in resources {
            if self.session.config.is_delayed_type(resource.resource_type())
                && let Some(id) = resource.id()
            {
                self.session.references.record(resource.resource_type(), id);
            }
            for literal in resource.references() {
                self.session.record_delayed_reference(literal);
            }
        }
    }
}
