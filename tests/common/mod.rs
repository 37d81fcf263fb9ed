use async_trait::async_trait;
use octofhir_conformance::*;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Scripted FHIR server. Replies are keyed by the request they answer:
/// `Type?query` for searches, `Type/id` for reads, the URL for fetches and
/// `path?query` for operations. Queued replies are served in order and the
/// last one repeats; unscripted requests get a 404 OperationOutcome.
#[derive(Default)]
pub struct MockFhirClient {
    replies: Mutex<HashMap<String, VecDeque<FhirReply>>>,
    calls: Mutex<Vec<String>>,
    reads: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    read_delay: Option<Duration>,
}

#[allow(dead_code)]
impl MockFhirClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every read open for `delay` so overlapping reads can be observed.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    pub fn on_search(&self, resource_type: &str, request: &SearchRequest, status: u16, body: Value) {
        self.script(format!("{resource_type}?{request}"), status, body);
    }

    pub fn on_read(&self, resource_type: &str, id: &str, status: u16, body: Value) {
        self.script(format!("{resource_type}/{id}"), status, body);
    }

    pub fn on_fetch(&self, url: &str, status: u16, body: Value) {
        self.script(url.to_string(), status, body);
    }

    pub fn on_operation(&self, path: &str, params: &[(&str, &str)], status: u16, body: Value) {
        let params: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.script(operation_key(path, &params), status, body);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn script(&self, key: String, status: u16, body: Value) {
        self.replies
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .push_back(FhirReply::new(status, body));
    }

    fn answer(&self, key: String) -> Result<FhirReply> {
        self.calls.lock().unwrap().push(key.clone());
        let mut replies = self.replies.lock().unwrap();
        let reply = match replies.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        Ok(reply.unwrap_or_else(|| FhirReply::new(404, operation_outcome("not-found"))))
    }
}

#[async_trait]
impl FhirClient for MockFhirClient {
    async fn search(&self, resource_type: &str, request: &SearchRequest) -> Result<FhirReply> {
        self.answer(format!("{resource_type}?{request}"))
    }

    async fn read(&self, resource_type: &str, id: &str) -> Result<FhirReply> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        let reply = self.answer(format!("{resource_type}/{id}"));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        reply
    }

    async fn fetch(&self, url: &str) -> Result<FhirReply> {
        self.answer(url.to_string())
    }

    async fn operation(&self, path: &str, params: &[(String, String)]) -> Result<FhirReply> {
        self.answer(operation_key(path, params))
    }
}

fn operation_key(path: &str, params: &[(String, String)]) -> String {
    let query: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{path}?{}", query.join("&"))
}

#[allow(dead_code)]
pub fn operation_outcome(code: &str) -> Value {
    json!({
        "resourceType": "OperationOutcome",
        "issue": [{"severity": "error", "code": code}]
    })
}

/// A searchset Bundle of `resources`, optionally linking to a next page.
#[allow(dead_code)]
pub fn bundle(resources: Vec<Value>, next: Option<&str>) -> Value {
    let mut link = vec![json!({"relation": "self", "url": "http://example.org/fhir/self"})];
    if let Some(url) = next {
        link.push(json!({"relation": "next", "url": url}));
    }
    json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "link": link,
        "entry": resources
            .into_iter()
            .map(|resource| json!({"resource": resource, "search": {"mode": "match"}}))
            .collect::<Vec<_>>()
    })
}

#[allow(dead_code)]
pub fn observation(id: &str, patient: &str, category: &str, status: &str) -> Value {
    json!({
        "resourceType": "Observation",
        "id": id,
        "status": status,
        "category": [{"coding": [{
            "system": "http://terminology.hl7.org/CodeSystem/observation-category",
            "code": category
        }]}],
        "code": {"coding": [{"system": "http://loinc.org", "code": "2708-6"}]},
        "subject": {"reference": format!("Patient/{patient}")},
        "effectiveDateTime": "2020-05-05T10:00:00Z"
    })
}

/// A trimmed laboratory Observation profile.
#[allow(dead_code)]
pub fn observation_profile() -> ProfileSpec {
    ProfileSpec::new(
        "Observation",
        "http://hl7.org/fhir/us/core/StructureDefinition/us-core-observation-lab",
    )
    .with_search_parameter(SearchParameterSpec::new("patient", SearchParamType::Reference, "subject"))
    .with_search_parameter(SearchParameterSpec::new("category", SearchParamType::Token, "category"))
    .with_search_parameter(SearchParameterSpec::new("code", SearchParamType::Token, "code"))
    .with_search_parameter(SearchParameterSpec::new("status", SearchParamType::Token, "status"))
    .with_search_parameter(SearchParameterSpec::new("date", SearchParamType::Date, "effective"))
}

#[allow(dead_code)]
pub fn capability_statement(resource_type: &str, params: &[&str]) -> CapabilityStatement {
    CapabilityStatement::new(json!({
        "resourceType": "CapabilityStatement",
        "rest": [{
            "mode": "server",
            "resource": [{
                "type": resource_type,
                "interaction": [{"code": "read"}, {"code": "search-type"}],
                "searchParam": params
                    .iter()
                    .map(|name| json!({"name": name, "type": "token"}))
                    .collect::<Vec<_>>()
            }]
        }]
    }))
}
