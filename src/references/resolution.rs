//! Bounded resolution of the references found in a result collection.

use futures::stream::{self, StreamExt};
use std::collections::HashSet;

use crate::client::FhirClient;
use crate::model::outcome::ValidationOutcome;
use crate::model::resource::{ParsedResource, ReferenceTarget, ResourceCollection};
use crate::references::cache::DelayedReferenceCache;
use crate::session::SessionContext;

/// Reads every distinct reference in a collection, up to a fixed number.
pub struct ReferenceResolutionValidator<'a> {
    client: &'a dyn FhirClient,
    max_resolutions: usize,
    max_concurrent_reads: usize,
}

/// Distinct references collected from a collection, in first-seen order.
#[derive(Debug, Default)]
struct ReferenceScan {
    remote: Vec<String>,
    unresolvable: Vec<String>,
    contained_checked: usize,
    contained_missing: Vec<String>,
}

impl<'a> ReferenceResolutionValidator<'a> {
    pub fn new(client: &'a dyn FhirClient, max_resolutions: usize, max_concurrent_reads: usize) -> Self {
        Self {
            client,
            max_resolutions,
            max_concurrent_reads: max_concurrent_reads.max(1),
        }
    }

    pub fn from_session(session: &'a SessionContext) -> Self {
        Self::new(
            session.client(),
            session.config.limits.max_resolutions,
            session.config.limits.max_concurrent_reads,
        )
    }

    /// Attempt a read of each distinct literal reference, stopping at
    /// `max_resolutions`. `#id` references are checked against the resource's
    /// `contained` list and do not count toward the bound.
    pub async fn resolve_all(&self, collection: &ResourceCollection) -> Vec<ValidationOutcome> {
        let mut scan = scan(collection);
        let mut outcomes = Vec::new();

        for missing in &scan.contained_missing {
            outcomes.push(ValidationOutcome::fail(format!(
                "Contained reference {missing} does not match any contained resource"
            )));
        }
        for literal in &scan.unresolvable {
            tracing::debug!("Reference {} is not a literal Type/id reference, not read", literal);
        }

        let distinct = scan.remote.len();
        if distinct == 0 && scan.contained_checked == 0 {
            outcomes.push(ValidationOutcome::skip("No resolvable references found"));
            return outcomes;
        }
        if distinct > self.max_resolutions {
            tracing::info!(
                "Resolving {} of {} distinct references",
                self.max_resolutions,
                distinct
            );
            scan.remote.truncate(self.max_resolutions);
        }

        let attempted = scan.remote.len();
        let failures: Vec<String> = stream::iter(scan.remote)
            .map(|literal| async move { self.read_reference(&literal).await.err() })
            .buffered(self.max_concurrent_reads)
            .filter_map(|failure| async move { failure })
            .collect()
            .await;

        let failed = failures.len();
        outcomes.extend(failures.into_iter().map(ValidationOutcome::fail));

        if failed == 0 && outcomes.is_empty() {
            outcomes.push(ValidationOutcome::pass(format!(
                "Resolved {attempted} of {distinct} distinct references and {} contained references",
                scan.contained_checked
            )));
        }
        tracing::info!(
            "Reference resolution: {} attempted, {} failed, {} distinct found",
            attempted,
            failed,
            distinct
        );
        outcomes
    }

    /// Read one literal reference. The error is the failure message.
    async fn read_reference(&self, literal: &str) -> std::result::Result<(), String> {
        let Some(target) = ReferenceTarget::parse(literal) else {
            return Err(format!("Reference {literal} is not a readable reference"));
        };

        let reply = if target.is_absolute() || target.version.is_some() {
            self.client.fetch(literal).await
        } else {
            self.client.read(&target.resource_type, &target.id).await
        };

        match reply {
            Ok(reply) if reply.status == 200 && reply.resource_type() == Some(target.resource_type.as_str()) => {
                Ok(())
            }
            Ok(reply) => Err(format!(
                "Could not resolve reference {literal}: HTTP {} returned {}",
                reply.status,
                reply.resource_type().unwrap_or("no resource")
            )),
            Err(e) => Err(format!("Could not resolve reference {literal}: {e}")),
        }
    }

    /// Read every resource of `resource_type` recorded for delayed checks.
    ///
    /// An empty cache entry yields a skip: availability depends on which
    /// earlier checks ran.
    pub async fn read_delayed(
        &self,
        cache: &DelayedReferenceCache,
        resource_type: &str,
    ) -> (Vec<ParsedResource>, Vec<ValidationOutcome>) {
        let ids = cache.all(resource_type);
        if ids.is_empty() {
            return (
                Vec::new(),
                vec![ValidationOutcome::skip(format!(
                    "No {resource_type} references were found by earlier checks"
                ))],
            );
        }

        let replies: Vec<_> = stream::iter(ids)
            .map(|id| async move {
                let reply = self.client.read(resource_type, &id).await;
                (id, reply)
            })
            .buffered(self.max_concurrent_reads)
            .collect()
            .await;

        let mut resources = Vec::new();
        let mut outcomes = Vec::new();
        for (id, reply) in replies {
            let parsed = match reply {
                Ok(reply) if reply.status == 200 => ParsedResource::from_value(reply.body).map_err(|e| e.to_string()),
                Ok(reply) => Err(format!("HTTP {}", reply.status)),
                Err(e) => Err(e.to_string()),
            };
            match parsed {
                Ok(resource) if resource.is_type(resource_type) => resources.push(resource),
                Ok(resource) => outcomes.push(ValidationOutcome::fail(format!(
                    "Read of {resource_type}/{id} returned {}",
                    resource.resource_type()
                ))),
                Err(e) => outcomes.push(ValidationOutcome::fail(format!(
                    "Could not read {resource_type}/{id}: {e}"
                ))),
            }
        }
        (resources, outcomes)
    }
}

fn scan(collection: &ResourceCollection) -> ReferenceScan {
    let mut scan = ReferenceScan::default();
    let mut seen = HashSet::new();

    for resource in collection.iter() {
        for literal in resource.references() {
            if let Some(local_id) = literal.strip_prefix('#') {
                scan.contained_checked += 1;
                if resource.contained(local_id).is_none() {
                    scan.contained_missing.push(format!("{} in {}", literal, resource.label()));
                }
                continue;
            }
            if !seen.insert(literal) {
                continue;
            }
            if ReferenceTarget::parse(literal).is_some() {
                scan.remote.push(literal.to_string());
            } else {
                scan.unresolvable.push(literal.to_string());
            }
        }
    }
    scan
}
