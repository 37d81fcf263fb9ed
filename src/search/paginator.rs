//! Walks a searchset Bundle and its `next` links into flat resource lists.

use serde_json::Value;
use std::collections::HashSet;

use crate::client::{FhirClient, FhirReply};
use crate::model::outcome::ValidationOutcome;
use crate::model::resource::ParsedResource;

const DATA_ABSENT_REASON_URL: &str = "http://hl7.org/fhir/StructureDefinition/data-absent-reason";

/// Resource-level filter applied before resources are returned.
pub type ResourceFilter = Box<dyn Fn(&ParsedResource) -> bool + Send + Sync>;

/// Everything collected while following a result set.
#[derive(Debug, Default)]
pub struct PaginatedResults {
    /// Entries of the searched resource type that passed the filter.
    pub resources: Vec<ParsedResource>,
    /// Entries of other types (`_include`, `_revinclude`).
    pub included: Vec<ParsedResource>,
    /// Entries of the searched type rejected by the filter.
    pub filtered: usize,
    pub pages_fetched: usize,
    /// A `next` link remained when the page bound was reached.
    pub truncated: bool,
    /// Failures while fetching later pages or reading entries.
    pub outcomes: Vec<ValidationOutcome>,
}

impl PaginatedResults {
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

pub struct BundlePaginator<'a> {
    client: &'a dyn FhirClient,
    max_pages: usize,
    filter: Option<ResourceFilter>,
}

impl<'a> BundlePaginator<'a> {
    pub fn new(client: &'a dyn FhirClient, max_pages: usize) -> Self {
        Self {
            client,
            max_pages,
            filter: None,
        }
    }

    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&ParsedResource) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Drop resources carrying a data-absent-reason anywhere in their body.
    pub fn rejecting_data_absent_reasons(self) -> Self {
        self.with_filter(|resource| !contains_data_absent_reason(resource.body()))
    }

    /// Collect entries from `first` and up to `max_pages - 1` following pages.
    ///
    /// Reaching the page bound is not a failure; the result is marked
    /// `truncated` and a warning is logged.
    pub async fn fetch_all(&self, first: &FhirReply, resource_type: &str) -> PaginatedResults {
        let mut results = PaginatedResults::default();
        let mut seen = HashSet::new();

        self.collect_page(&first.body, resource_type, &mut results);
        results.pages_fetched = 1;
        let mut next = next_link(&first.body).map(str::to_string);

        while let Some(url) = next.take() {
            if results.pages_fetched >= self.max_pages {
                tracing::warn!(
                    "Stopped following {} results after {} pages",
                    resource_type,
                    self.max_pages
                );
                results.truncated = true;
                break;
            }
            if !seen.insert(url.clone()) {
                tracing::warn!("Bundle next link {} repeats, stopping pagination", url);
                break;
            }

            tracing::debug!("Fetching page {} of {} results", results.pages_fetched + 1, resource_type);
            let page = match self.client.fetch(&url).await {
                Ok(page) => page,
                Err(e) => {
                    results
                        .outcomes
                        .push(ValidationOutcome::fail(format!("Failed to fetch next page {url}: {e}")));
                    break;
                }
            };
            if page.status != 200 || !page.is_bundle() {
                results.outcomes.push(ValidationOutcome::fail(format!(
                    "Next page {url} returned HTTP {} with {} instead of a Bundle",
                    page.status,
                    page.resource_type().unwrap_or("no resource")
                )));
                break;
            }

            self.collect_page(&page.body, resource_type, &mut results);
            results.pages_fetched += 1;
            next = next_link(&page.body).map(str::to_string);
        }

        results
    }

    fn collect_page(&self, bundle: &Value, resource_type: &str, results: &mut PaginatedResults) {
        let entries = bundle
            .get("entry")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for entry in entries {
            let Some(body) = entry.get("resource") else {
                continue;
            };
            if entry.pointer("/search/mode").and_then(Value::as_str) == Some("outcome") {
                continue;
            }
            let resource = match ParsedResource::from_value(body.clone()) {
                Ok(resource) => resource,
                Err(e) => {
                    results
                        .outcomes
                        .push(ValidationOutcome::fail(format!("Unreadable Bundle entry: {e}")));
                    continue;
                }
            };

            if !resource.is_type(resource_type) {
                results.included.push(resource);
            } else if self.filter.as_ref().is_none_or(|keep| keep(&resource)) {
                results.resources.push(resource);
            } else {
                results.filtered += 1;
            }
        }
    }
}

fn next_link(bundle: &Value) -> Option<&str> {
    bundle
        .get("link")
        .and_then(Value::as_array)?
        .iter()
        .find(|link| link.get("relation").and_then(Value::as_str) == Some("next"))
        .and_then(|link| link.get("url"))
        .and_then(Value::as_str)
}

/// True when the element tree carries a data-absent-reason extension or a
/// `dataAbsentReason` element.
pub fn contains_data_absent_reason(value: &Value) -> bool {
    match value {
        Value::Object(object) => {
            if object.contains_key("dataAbsentReason")
                || object.get("url").and_then(Value::as_str) == Some(DATA_ABSENT_REASON_URL)
            {
                return true;
            }
            object.values().any(contains_data_absent_reason)
        }
        Value::Array(items) => items.iter().any(contains_data_absent_reason),
        _ => false,
    }
}
