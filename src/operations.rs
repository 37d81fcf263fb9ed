//! Named operations and access control checks.

use crate::client::FhirClient;
use crate::model::outcome::ValidationOutcome;
use crate::search::request::SearchRequest;
use crate::session::SessionContext;

/// `GET DocumentReference/$docref?patient={id}` must answer HTTP 200 with a
/// Bundle.
pub async fn invoke_docref(client: &dyn FhirClient, patient_id: &str) -> ValidationOutcome {
    let params = vec![("patient".to_string(), patient_id.to_string())];
    match client.operation("DocumentReference/$docref", &params).await {
        Ok(reply) if reply.status == 200 && reply.is_bundle() => ValidationOutcome::pass(format!(
            "$docref for patient {patient_id} returned {} entries",
            reply.entry_count()
        )),
        Ok(reply) if reply.status == 200 => ValidationOutcome::fail(format!(
            "$docref for patient {patient_id} returned {} instead of a Bundle",
            reply.resource_type().unwrap_or("no resource")
        )),
        Ok(reply) => ValidationOutcome::fail(format!(
            "$docref for patient {patient_id} returned HTTP {}, expected 200",
            reply.status
        )),
        Err(e) => ValidationOutcome::fail(format!("$docref for patient {patient_id} failed: {e}")),
    }
}

/// A search without credentials must be refused with 401 or 403; both are
/// accepted since the standard does not settle on one. Without an
/// unauthenticated client the check is omitted.
pub async fn check_access_denied(
    session: &SessionContext,
    resource_type: &str,
    request: &SearchRequest,
) -> ValidationOutcome {
    let Some(client) = session.unauthenticated_client.as_deref() else {
        return ValidationOutcome::omit("No unauthenticated client available; access control not tested");
    };

    match client.search(resource_type, request).await {
        Ok(reply) if matches!(reply.status, 401 | 403) => ValidationOutcome::pass(format!(
            "Unauthenticated {resource_type} search was refused with HTTP {}",
            reply.status
        )),
        Ok(reply) => ValidationOutcome::fail(format!(
            "Unauthenticated {resource_type} search returned HTTP {}, expected 401 or 403",
            reply.status
        )),
        Err(e) => ValidationOutcome::fail(format!("Unauthenticated {resource_type} search failed: {e}")),
    }
}
