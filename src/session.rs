//! Session-scoped context shared by every check in one run.

use std::sync::Arc;

use crate::client::{CapabilityStatement, FhirClient};
use crate::config::ConformanceConfig;
use crate::conformance::profile::{MandatoryElementValidator, StructuralValidator};
use crate::error::Result;
use crate::model::resource::ReferenceTarget;
use crate::path::PathResolver;
use crate::references::cache::DelayedReferenceCache;
use crate::search::status_retry::StatusValueTable;
use crate::terminology::TerminologyService;

/// Everything a check needs besides its own inputs.
///
/// Only the delayed reference cache is mutated during a run, and it
/// synchronises internally, so a `SessionContext` can be shared by reference
/// across concurrent checks.
pub struct SessionContext {
    pub config: ConformanceConfig,
    pub client: Arc<dyn FhirClient>,
    /// Client that sends no credentials, for access-denied checks.
    pub unauthenticated_client: Option<Arc<dyn FhirClient>>,
    pub capabilities: Option<CapabilityStatement>,
    pub terminology: Option<Arc<dyn TerminologyService>>,
    pub structural_validator: Arc<dyn StructuralValidator>,
    pub status_values: StatusValueTable,
    pub references: DelayedReferenceCache,
    pub resolver: PathResolver,
}

impl SessionContext {
    pub fn builder(client: Arc<dyn FhirClient>) -> SessionBuilder {
        SessionBuilder::new(client)
    }

    pub fn client(&self) -> &dyn FhirClient {
        self.client.as_ref()
    }

    /// Record the target of `literal` when its type is configured for delayed
    /// checks. Returns `true` for a newly recorded pair.
    pub fn record_delayed_reference(&self, literal: &str) -> bool {
        match ReferenceTarget::parse(literal) {
            Some(target) if self.config.is_delayed_type(&target.resource_type) => {
                self.references.record(target.resource_type, target.id)
            }
            _ => false,
        }
    }

    /// Start a new run: forget every recorded reference.
    pub fn reset(&self) {
        self.references.clear();
    }
}

pub struct SessionBuilder {
    config: ConformanceConfig,
    client: Arc<dyn FhirClient>,
    unauthenticated_client: Option<Arc<dyn FhirClient>>,
    capabilities: Option<CapabilityStatement>,
    terminology: Option<Arc<dyn TerminologyService>>,
    structural_validator: Option<Arc<dyn StructuralValidator>>,
    status_values: StatusValueTable,
}

impl SessionBuilder {
    pub fn new(client: Arc<dyn FhirClient>) -> Self {
        Self {
            config: ConformanceConfig::default(),
            client,
            unauthenticated_client: None,
            capabilities: None,
            terminology: None,
            structural_validator: None,
            status_values: StatusValueTable::builtin(),
        }
    }

    pub fn with_config(mut self, config: ConformanceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_unauthenticated_client(mut self, client: Arc<dyn FhirClient>) -> Self {
        self.unauthenticated_client = Some(client);
        self
    }

    pub fn with_capabilities(mut self, capabilities: CapabilityStatement) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    /// Fetch the server's CapabilityStatement through the session client.
    pub async fn with_fetched_capabilities(mut self) -> Self {
        self.capabilities = CapabilityStatement::fetch(self.client.as_ref()).await;
        if self.capabilities.is_none() {
            tracing::warn!("No CapabilityStatement available; documented-support checks will warn");
        }
        self
    }

    pub fn with_terminology(mut self, terminology: Arc<dyn TerminologyService>) -> Self {
        self.terminology = Some(terminology);
        self
    }

    pub fn with_structural_validator(mut self, validator: Arc<dyn StructuralValidator>) -> Self {
        self.structural_validator = Some(validator);
        self
    }

    pub fn with_status_values(mut self, status_values: StatusValueTable) -> Self {
        self.status_values = status_values;
        self
    }

    pub fn build(self) -> Result<SessionContext> {
        self.config.validate()?;
        Ok(SessionContext {
            config: self.config,
            client: self.client,
            unauthenticated_client: self.unauthenticated_client,
            capabilities: self.capabilities,
            terminology: self.terminology,
            structural_validator: self
                .structural_validator
                .unwrap_or_else(|| Arc::new(MandatoryElementValidator::new())),
            status_values: self.status_values,
            references: DelayedReferenceCache::new(),
            resolver: PathResolver::new(),
        })
    }
}
