//! Retry protocol for servers that answer a search with HTTP 400 because a
//! status parameter is mandatory.
//!
//! The negotiator starts in [`NegotiationState::Initial`]. A reply other than
//! 400 ends negotiation immediately. A 400 must carry an OperationOutcome;
//! the search is then re-issued once per known status value until one returns
//! a non-empty Bundle, and that value is merged into the caller's request so
//! related searches reuse it. A retry the server rejects is recorded as a
//! warning. Attempts run strictly one after another.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::{CapabilityStatement, FhirClient, FhirReply};
use crate::error::{ConformanceError, Result};
use crate::model::outcome::ValidationOutcome;
use crate::search::request::SearchRequest;

/// Status search parameter and its enumerated values for one resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusParam {
    pub param: String,
    pub values: Vec<String>,
}

/// Status values the negotiator tries per resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusValueTable {
    entries: IndexMap<String, StatusParam>,
}

impl Default for StatusValueTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl StatusValueTable {
    pub fn empty() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    /// Required-binding status codes of the common clinical resource types.
    pub fn builtin() -> Self {
        let mut table = Self::empty();
        table.insert(
            "Observation",
            "status",
            &[
                "registered",
                "preliminary",
                "final",
                "amended",
                "corrected",
                "cancelled",
                "entered-in-error",
                "unknown",
            ],
        );
        table.insert(
            "Condition",
            "clinical-status",
            &["active", "recurrence", "relapse", "inactive", "remission", "resolved"],
        );
        table.insert("AllergyIntolerance", "clinical-status", &["active", "inactive", "resolved"]);
        table.insert(
            "Encounter",
            "status",
            &[
                "planned",
                "arrived",
                "triaged",
                "in-progress",
                "onleave",
                "finished",
                "cancelled",
                "entered-in-error",
                "unknown",
            ],
        );
        table.insert(
            "Procedure",
            "status",
            &[
                "preparation",
                "in-progress",
                "not-done",
                "on-hold",
                "stopped",
                "completed",
                "entered-in-error",
                "unknown",
            ],
        );
        table.insert(
            "DiagnosticReport",
            "status",
            &[
                "registered",
                "partial",
                "preliminary",
                "final",
                "amended",
                "corrected",
                "appended",
                "cancelled",
                "entered-in-error",
                "unknown",
            ],
        );
        table.insert("Immunization", "status", &["completed", "entered-in-error", "not-done"]);
        table.insert(
            "MedicationRequest",
            "status",
            &[
                "active",
                "on-hold",
                "cancelled",
                "completed",
                "entered-in-error",
                "stopped",
                "draft",
                "unknown",
            ],
        );
        table.insert("DocumentReference", "status", &["current", "superseded", "entered-in-error"]);
        table.insert(
            "Goal",
            "lifecycle-status",
            &[
                "proposed",
                "planned",
                "accepted",
                "active",
                "on-hold",
                "completed",
                "cancelled",
                "entered-in-error",
                "rejected",
            ],
        );
        for resource_type in ["CarePlan", "ServiceRequest"] {
            table.insert(
                resource_type,
                "status",
                &["draft", "active", "on-hold", "revoked", "completed", "entered-in-error", "unknown"],
            );
        }
        table.insert(
            "CareTeam",
            "status",
            &["proposed", "active", "suspended", "inactive", "entered-in-error"],
        );
        table
    }

    /// Add or replace the entry for `resource_type`.
    pub fn insert(&mut self, resource_type: &str, param: &str, values: &[&str]) {
        self.entries.insert(
            resource_type.to_string(),
            StatusParam {
                param: param.to_string(),
                values: values.iter().map(|v| v.to_string()).collect(),
            },
        );
    }

    pub fn get(&self, resource_type: &str) -> Option<&StatusParam> {
        self.entries.get(resource_type)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let table: Self = serde_json::from_str(json)?;
        if let Some((resource_type, _)) = table.entries.iter().find(|(_, p)| p.values.is_empty()) {
            return Err(ConformanceError::config(format!(
                "status table entry for {resource_type} lists no values"
            )));
        }
        Ok(table)
    }
}

/// Where negotiation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationState {
    /// The first reply was kept.
    Initial,
    /// The search was retried with status values; `matched` is the value that
    /// produced results, if any did.
    StatusRetried { matched: Option<String> },
}

#[derive(Debug, Clone)]
pub struct Negotiation {
    pub reply: FhirReply,
    pub state: NegotiationState,
    pub attempts: usize,
    pub outcomes: Vec<ValidationOutcome>,
}

impl Negotiation {
    fn done(reply: FhirReply, attempts: usize, outcomes: Vec<ValidationOutcome>) -> Self {
        Self {
            reply,
            state: NegotiationState::Initial,
            attempts,
            outcomes,
        }
    }
}

pub struct StatusRetryNegotiator<'a> {
    client: &'a dyn FhirClient,
    capabilities: Option<&'a CapabilityStatement>,
    table: &'a StatusValueTable,
}

impl<'a> StatusRetryNegotiator<'a> {
    pub fn new(
        client: &'a dyn FhirClient,
        capabilities: Option<&'a CapabilityStatement>,
        table: &'a StatusValueTable,
    ) -> Self {
        Self {
            client,
            capabilities,
            table,
        }
    }

    /// Issue `request`, retrying with status values on HTTP 400.
    ///
    /// Transport errors propagate; the caller reports them as a failed search.
    pub async fn negotiate(&self, resource_type: &str, request: &mut SearchRequest) -> Result<Negotiation> {
        let reply = self.client.search(resource_type, request).await?;
        if reply.status != 400 {
            return Ok(Negotiation::done(reply, 1, Vec::new()));
        }

        let mut outcomes = Vec::new();
        if !reply.is_operation_outcome() {
            outcomes.push(ValidationOutcome::fail(format!(
                "Server returned HTTP 400 for {resource_type}?{request} without an OperationOutcome body (got {})",
                reply.resource_type().unwrap_or("no resource")
            )));
            return Ok(Negotiation::done(reply, 1, outcomes));
        }

        if !self
            .capabilities
            .is_some_and(|c| c.documents_search(resource_type))
        {
            outcomes.push(ValidationOutcome::warn(format!(
                "Server returned HTTP 400 with an OperationOutcome, but search for {resource_type} \
                 is not documented in the CapabilityStatement"
            )));
        }

        let Some(status) = self.table.get(resource_type) else {
            tracing::debug!("No status values known for {}, not retrying", resource_type);
            return Ok(Negotiation::done(reply, 1, outcomes));
        };
        if request.contains(&status.param) {
            return Ok(Negotiation::done(reply, 1, outcomes));
        }
        if let Some(capabilities) = self.capabilities
            && !capabilities.documents_search_param(resource_type, &status.param)
        {
            outcomes.push(ValidationOutcome::warn(format!(
                "{resource_type} search parameter {} is not documented in the CapabilityStatement",
                status.param
            )));
        }

        let mut attempts = 1;
        let mut last = reply;
        for value in &status.values {
            let candidate = request.clone().with(status.param.as_str(), value.as_str());
            tracing::debug!("Retrying {} search with {}={}", resource_type, status.param, value);
            last = self.client.search(resource_type, &candidate).await?;
            attempts += 1;

            if last.status != 200 {
                outcomes.push(ValidationOutcome::warn(format!(
                    "Retry {resource_type}?{candidate} was rejected with HTTP {}",
                    last.status
                )));
                continue;
            }
            if matching_entries(&last, resource_type) > 0 && matching_entries(&last, resource_type) > 0 {
                tracing::info!(
                    "{} search returned results with {}={}",
                    resource_type,
                    status.param,
                    value
                );
                request.insert(status.param.as_str(), value.as_str());
                return Ok(Negotiation {
                    reply: last,
                    state: NegotiationState::StatusRetried {
                        matched: Some(value.clone()),
                    },
                    attempts,
                    outcomes,
                });
            }
        }

        Ok(Negotiation {
            reply: last,
            state: NegotiationState::StatusRetried { matched: None },
            attempts,
            outcomes,
        })
    }
}

fn matching_entries(reply: &FhirReply, resource_type: &str) -> usize {
    reply
        .body
        .get("entry")
        .and_then(Value::as_array)
        .map_or(0, |entries| {
            entries
                .iter()
                .filter(|e| e.pointer("/resource/resourceType").and_then(Value::as_str) == Some(resource_type))
                .count()
        })
}
